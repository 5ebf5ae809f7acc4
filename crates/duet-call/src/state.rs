//! Call session state: who is calling whom, and where the call is in its lifecycle.
//!
//! ```text
//!   idle ──start──▶ calling ──────────────┐
//!   idle ──invite─▶ ringing ──accept──▶ connecting ──transport up──▶ connected
//!                                                                      │
//!   any live state ──end──▶ ended          calling/connecting/connected ──transport down──▶ failed
//! ```

use chrono::{DateTime, Utc};
use duet_common::ids::CallId;
use serde::Serialize;
use std::fmt;

/// Lifecycle of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    Connecting,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }

    /// A call is in progress; a new one cannot start.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            CallState::Calling | CallState::Ringing | CallState::Connecting | CallState::Connected
        )
    }

    /// States from which a transport failure is reportable.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            CallState::Calling | CallState::Connecting | CallState::Connected
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

/// One call attempt as seen from the local side.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub call_id: Option<CallId>,
    pub local_party: String,
    pub remote_party: Option<String>,
    pub role: Option<Role>,
    pub state: CallState,
    pub is_muted: bool,
    /// Set once, when the transport first reports connected.
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(local_party: impl Into<String>) -> Self {
        Self {
            call_id: None,
            local_party: local_party.into(),
            remote_party: None,
            role: None,
            state: CallState::Idle,
            is_muted: false,
            connected_at: None,
        }
    }

    /// Forget everything about the current call. The lifecycle state is left
    /// for the caller to set, since teardown ends in different states.
    pub fn reset(&mut self) {
        self.call_id = None;
        self.remote_party = None;
        self.role = None;
        self.is_muted = false;
        self.connected_at = None;
    }

    pub fn is_bound_to(&self, call_id: &CallId) -> bool {
        self.call_id.as_ref() == Some(call_id)
    }
}
