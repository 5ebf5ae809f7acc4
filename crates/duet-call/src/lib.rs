//! # duet-call
//!
//! One-to-one voice call state machine.
//!
//! The manager drives a single call at a time between two named parties:
//! - invite, offer/answer and candidate exchange over a pluggable signaling channel
//! - out-of-order delivery tolerated (early offers and candidates are buffered)
//! - late async results from a torn-down call are discarded
//! - transport failure reported once, with the remote party told exactly once
//!
//! Media, the negotiation engine and signaling transport are capabilities
//! supplied by the embedder (see [`engine`], [`media`], [`signaling`]).

pub mod buffers;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod media;
pub mod signaling;
pub mod state;
pub mod timer;

#[cfg(test)]
mod testing;

pub use credentials::{CredentialSource, RelaySource};
pub use error::{CallError, CallResult};
pub use events::CallEvent;
pub use manager::{CallConfig, CallManager, CallManagerBuilder};
pub use state::{CallSession, CallState, Role};
pub use timer::format_duration;
