//! Call signaling messages: shared between the call state machine and the relay.
//!
//! Every message travels as `{"topic": "call/<name>", "payload": {...}}` with
//! camelCase payload fields, which is also what browser peers send. The relay
//! only reads `from`/`to`; everything else is opaque to it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::CallId;

/// Reason sent with a callee's explicit decline.
pub const REJECT_REASON_DECLINED: &str = "User declined";

/// Named signaling topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Request,
    Offer,
    Answer,
    Accept,
    Reject,
    End,
    IceCandidate,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Request,
        Topic::Offer,
        Topic::Answer,
        Topic::Accept,
        Topic::Reject,
        Topic::End,
        Topic::IceCandidate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Request => "call/request",
            Topic::Offer => "call/offer",
            Topic::Answer => "call/answer",
            Topic::Accept => "call/accept",
            Topic::Reject => "call/reject",
            Topic::End => "call/end",
            Topic::IceCandidate => "call/ice-candidate",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An offer or answer as produced by the negotiation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// The `sdp` field on the wire: either a full description object or a bare SDP string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SdpPayload {
    Description(SessionDescription),
    Raw(String),
}

impl SdpPayload {
    /// Resolve to a description; a bare string takes the type implied by its topic.
    pub fn into_description(self, implied: SdpType) -> SessionDescription {
        match self {
            SdpPayload::Description(d) => d,
            SdpPayload::Raw(sdp) => SessionDescription { kind: implied, sdp },
        }
    }
}

impl From<SessionDescription> for SdpPayload {
    fn from(d: SessionDescription) -> Self {
        SdpPayload::Description(d)
    }
}

/// A network candidate in browser JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    /// Candidate type from the `typ` token of the candidate line.
    pub fn kind(&self) -> CandidateKind {
        let mut tokens = self.candidate.split_whitespace();
        while let Some(tok) = tokens.next() {
            if tok == "typ" {
                return match tokens.next() {
                    Some("host") => CandidateKind::Host,
                    Some("srflx") => CandidateKind::ServerReflexive,
                    Some("prflx") => CandidateKind::PeerReflexive,
                    Some("relay") => CandidateKind::Relay,
                    _ => CandidateKind::Unknown,
                };
            }
        }
        CandidateKind::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateKind::Host => "host",
            CandidateKind::ServerReflexive => "srflx",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::Relay => "relay",
            CandidateKind::Unknown => "unknown",
        })
    }
}

/// `call/request`: caller → callee invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvite {
    pub call_id: CallId,
    pub from: String,
    pub from_name: String,
    pub to: String,
}

/// `call/offer` and `call/answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionMessage {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
    pub sdp: SdpPayload,
}

/// `call/accept` and `call/end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallControl {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
}

/// `call/reject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRejection {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// `call/ice-candidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMessage {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
    pub candidate: IceCandidate,
}

/// A signaling message on one of the call topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum SignalMessage {
    #[serde(rename = "call/request")]
    Request(CallInvite),
    #[serde(rename = "call/offer")]
    Offer(DescriptionMessage),
    #[serde(rename = "call/answer")]
    Answer(DescriptionMessage),
    #[serde(rename = "call/accept")]
    Accept(CallControl),
    #[serde(rename = "call/reject")]
    Reject(CallRejection),
    #[serde(rename = "call/end")]
    End(CallControl),
    #[serde(rename = "call/ice-candidate")]
    IceCandidate(CandidateMessage),
}

impl SignalMessage {
    pub fn topic(&self) -> Topic {
        match self {
            SignalMessage::Request(_) => Topic::Request,
            SignalMessage::Offer(_) => Topic::Offer,
            SignalMessage::Answer(_) => Topic::Answer,
            SignalMessage::Accept(_) => Topic::Accept,
            SignalMessage::Reject(_) => Topic::Reject,
            SignalMessage::End(_) => Topic::End,
            SignalMessage::IceCandidate(_) => Topic::IceCandidate,
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            SignalMessage::Request(m) => &m.call_id,
            SignalMessage::Offer(m) | SignalMessage::Answer(m) => &m.call_id,
            SignalMessage::Accept(m) | SignalMessage::End(m) => &m.call_id,
            SignalMessage::Reject(m) => &m.call_id,
            SignalMessage::IceCandidate(m) => &m.call_id,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            SignalMessage::Request(m) => &m.from,
            SignalMessage::Offer(m) | SignalMessage::Answer(m) => &m.from,
            SignalMessage::Accept(m) | SignalMessage::End(m) => &m.from,
            SignalMessage::Reject(m) => &m.from,
            SignalMessage::IceCandidate(m) => &m.from,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            SignalMessage::Request(m) => &m.to,
            SignalMessage::Offer(m) | SignalMessage::Answer(m) => &m.to,
            SignalMessage::Accept(m) | SignalMessage::End(m) => &m.to,
            SignalMessage::Reject(m) => &m.to,
            SignalMessage::IceCandidate(m) => &m.to,
        }
    }
}
