//! Relay WebSocket protocol.
//!
//! Every frame is a JSON object `{"op": "<Name>", "d": <data>}`.
//!
//! ```text
//!   client ── Identify { username } ──▶ relay
//!   client ◀── Ready { session_id } ─── relay
//!   client ── Signal(message) ────────▶ relay ── Signal(message) ──▶ every session of message.to
//!   client ◀── Error { code, message } ─ relay
//! ```

use serde::{Deserialize, Serialize};

use crate::signal::SignalMessage;

/// Frame could not be parsed, or made no sense in this direction.
pub const ERROR_MALFORMED: u16 = 4000;
/// `from` of a signal does not match the identified user.
pub const ERROR_SENDER_MISMATCH: u16 = 4001;
/// Signal sent before `Identify`.
pub const ERROR_NOT_IDENTIFIED: u16 = 4003;
/// Recipient has no connected session.
pub const ERROR_RECIPIENT_OFFLINE: u16 = 4404;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d")]
pub enum RelayFrame {
    /// Client → Relay: claim a user name for this connection
    Identify { username: String },

    /// Relay → Client: identification accepted
    Ready { session_id: String },

    /// Bidirectional: a call signaling message
    Signal(SignalMessage),

    /// Relay → Client: a frame was refused
    Error { code: u16, message: String },
}

impl RelayFrame {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        RelayFrame::Error {
            code,
            message: message.into(),
        }
    }
}
