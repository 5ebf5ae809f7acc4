//! Error types for the call state machine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// The user or environment refused microphone access.
    #[error("Microphone access denied: {0}")]
    MediaAccessDenied(String),

    /// Offer creation or publishing failed while starting a call.
    #[error("Failed to start call: {0}")]
    CallStartFailed(String),

    /// Peer setup or publishing failed while accepting a call.
    #[error("Failed to accept call: {0}")]
    CallAcceptFailed(String),

    /// A message arrived that the current negotiation state cannot accept.
    #[error("Negotiation protocol violation: {0}")]
    NegotiationProtocolViolation(String),

    /// Applying a remote description or producing an answer failed.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The engine rejected a single remote candidate.
    #[error("Candidate rejected: {0}")]
    CandidateApplicationFailed(String),

    /// The underlying connection reported failed or closed.
    #[error("Transport failed")]
    TransportFailed,

    /// Relay credentials could not be fetched; calls fall back to STUN only.
    #[error("Credential fetch failed: {0}")]
    CredentialFetchFailed(String),

    #[error("A call is already in progress")]
    CallInProgress,

    /// The session this operation belonged to was torn down while it was suspended.
    #[error("Call session was torn down")]
    SessionClosed,
}

pub type CallResult<T> = std::result::Result<T, CallError>;
