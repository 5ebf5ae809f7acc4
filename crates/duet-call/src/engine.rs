//! Negotiation engine capability: the peer connection primitive the state machine drives.
//!
//! The engine itself (SDP generation, ICE, DTLS/SRTP) lives outside this crate.
//! Each [`PeerConnection`] comes with its own event receiver; the call manager
//! drains it for exactly as long as that connection belongs to the live session.

use async_trait::async_trait;
use duet_common::ice::RelayConfig;
use duet_common::signal::{IceCandidate, SessionDescription};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::media::AudioTrack;

/// Receiver half of a peer connection's event subscription.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Creates peer connections.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_peer(
        &self,
        config: &RelayConfig,
    ) -> anyhow::Result<(Arc<dyn PeerConnection>, EngineEvents)>;
}

/// One peer-to-peer media connection attempt.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &AudioTrack) -> anyhow::Result<()>;

    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;

    async fn create_answer(&self) -> anyhow::Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> anyhow::Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> anyhow::Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()>;

    async fn stats(&self) -> anyhow::Result<ConnectionStats>;

    /// Must be safe to call more than once.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Callbacks from a peer connection.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A local candidate was gathered and should be sent to the remote peer.
    LocalCandidate(IceCandidate),
    GatheringState(IceGatheringState),
    /// Remote media arrived.
    RemoteTrack(RemoteTrack),
    ConnectionState(ConnectionState),
    IceConnectionState(IceConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// Aggregate transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    /// Transient; may recover on its own.
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Remote media surfaced to whoever renders audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: Option<String>,
    pub kind: String,
}

/// Snapshot of a peer connection for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub connection_state: Option<ConnectionState>,
    pub ice_connection_state: Option<IceConnectionState>,
    pub ice_gathering_state: Option<IceGatheringState>,
    pub signaling_state: Option<String>,
    pub candidate_pairs: Vec<CandidatePairStats>,
    pub local_candidates: Vec<CandidateStats>,
    pub remote_candidates: Vec<CandidateStats>,
}

impl ConnectionStats {
    /// The pair ICE settled on, if any.
    pub fn selected_pair(&self) -> Option<&CandidatePairStats> {
        self.candidate_pairs
            .iter()
            .find(|p| p.state == "succeeded" && p.nominated)
            .or_else(|| self.candidate_pairs.iter().find(|p| p.state == "succeeded"))
    }

    pub fn local_candidate(&self, id: &str) -> Option<&CandidateStats> {
        self.local_candidates.iter().find(|c| c.id == id)
    }

    pub fn remote_candidate(&self, id: &str) -> Option<&CandidateStats> {
        self.remote_candidates.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidatePairStats {
    pub local_candidate_id: String,
    pub remote_candidate_id: String,
    pub state: String,
    pub nominated: bool,
    pub priority: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateStats {
    pub id: String,
    pub candidate_type: String,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub protocol: String,
}
