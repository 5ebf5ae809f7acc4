//! Events the call manager pushes to its subscribers (UI, loggers, tests).

use duet_common::ids::CallId;
use serde::Serialize;

use crate::engine::RemoteTrack;
use crate::state::CallState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CallEvent {
    /// Lifecycle transition.
    StateChanged(CallState),
    /// Whole seconds since the call connected.
    Duration(u64),
    /// Human-readable failure for the user.
    Error(String),
    /// An invite arrived; the session is now ringing.
    IncomingCall {
        call_id: CallId,
        from: String,
        from_name: String,
    },
    RemoteTrack(RemoteTrack),
    MuteChanged(bool),
    /// The callee declined.
    Rejected { call_id: CallId, reason: String },
}
