//! Peer connection callbacks: local candidates, remote media, transport state,
//! and the connection watchdog.

use chrono::Utc;
use duet_common::signal::{CandidateMessage, IceCandidate, SignalMessage};
use std::sync::Arc;

use super::CallManager;
use crate::engine::{
    ConnectionState, ConnectionStats, EngineEvent, EngineEvents, IceConnectionState,
    IceGatheringState,
};
use crate::error::CallError;
use crate::events::CallEvent;
use crate::state::CallState;
use crate::timer::CallTimer;

const CONNECTION_FAILED_MESSAGE: &str = "Connection failed. Please check your network settings.";

impl CallManager {
    /// Drain one peer connection's events for as long as it belongs to the
    /// session started at `epoch`. Holds only a weak reference to the manager.
    pub(super) fn spawn_event_pump(&self, epoch: u64, mut events: EngineEvents) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = CallManager { inner };
                if !manager.on_engine_event(epoch, event).await {
                    break;
                }
            }
            tracing::trace!(epoch, "Engine event pump stopped");
        });
    }

    /// Returns false once the connection no longer belongs to the live session.
    async fn on_engine_event(&self, epoch: u64, event: EngineEvent) -> bool {
        if self.inner.shared.lock().await.epoch != epoch {
            return false;
        }

        match event {
            EngineEvent::LocalCandidate(candidate) => self.send_local_candidate(epoch, candidate).await,
            EngineEvent::GatheringState(state) => {
                tracing::debug!(?state, "ICE gathering state");
                if state == IceGatheringState::Complete {
                    tracing::info!("ICE gathering complete");
                    self.arm_watchdog(epoch).await;
                }
            }
            EngineEvent::RemoteTrack(track) => {
                tracing::info!(track = %track.track_id, kind = %track.kind, "Received remote track");
                self.emit(CallEvent::RemoteTrack(track));
            }
            EngineEvent::ConnectionState(state) => {
                tracing::debug!(?state, "Connection state");
                match state {
                    ConnectionState::Connected => self.mark_connected(epoch).await,
                    ConnectionState::Disconnected => {
                        tracing::warn!("Connection disconnected, waiting for it to recover");
                    }
                    ConnectionState::Failed => self.fail_call(epoch, true).await,
                    ConnectionState::Closed => self.fail_call(epoch, false).await,
                    ConnectionState::New | ConnectionState::Connecting => {}
                }
            }
            EngineEvent::IceConnectionState(state) => {
                tracing::debug!(?state, "ICE connection state");
                match state {
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        self.log_selected_pair(epoch).await;
                    }
                    IceConnectionState::Disconnected => {
                        tracing::warn!("ICE disconnected, may reconnect");
                    }
                    IceConnectionState::Failed => self.fail_call(epoch, true).await,
                    _ => {}
                }
            }
        }
        true
    }

    async fn send_local_candidate(&self, epoch: u64, candidate: IceCandidate) {
        let Ok((call_id, to)) = self.addressing(epoch).await else {
            return;
        };
        tracing::debug!(call = %call_id, kind = %candidate.kind(), "Sending local candidate");

        let message = SignalMessage::IceCandidate(CandidateMessage {
            call_id: call_id.clone(),
            from: self.inner.local_user.clone(),
            to,
            candidate,
        });
        if let Err(e) = self.publish(message).await {
            tracing::warn!(call = %call_id, error = %e, "Failed to send local candidate");
        }
    }

    /// Transport is up: stamp the connect time and start the timer, each only once.
    async fn mark_connected(&self, epoch: u64) {
        let mut shared = self.inner.shared.lock().await;
        if shared.epoch != epoch {
            return;
        }
        if shared.timer.is_none() {
            shared.timer = Some(CallTimer::start(
                self.inner.config.timer_period,
                self.inner.events.clone(),
            ));
        }
        if shared.session.connected_at.is_none() {
            shared.session.connected_at = Some(Utc::now());
        }
        if let Some(watchdog) = shared.watchdog.take() {
            watchdog.abort();
        }
        if self.transition(&mut shared, CallState::Connected) {
            tracing::info!(call = ?shared.session.call_id, "Call connected");
        }
    }

    /// The transport gave up. Ends the session in `Failed` and tells the
    /// remote party, at most once per session.
    async fn fail_call(&self, epoch: u64, report: bool) {
        {
            let shared = self.inner.shared.lock().await;
            if shared.epoch != epoch {
                return;
            }
            if !(shared.session.state.can_fail() || shared.setup_in_flight) {
                tracing::debug!(state = %shared.session.state, "Ignoring transport failure");
                return;
            }
        }

        tracing::error!(
            error = %CallError::TransportFailed,
            report,
            "Connection failed"
        );
        let message = report.then(|| CONNECTION_FAILED_MESSAGE.to_string());
        self.finish(Some(epoch), CallState::Failed, true, message).await;
    }

    async fn arm_watchdog(&self, epoch: u64) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.watchdog_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                CallManager { inner }.check_connection(epoch).await;
            }
        });

        let mut shared = self.inner.shared.lock().await;
        if shared.epoch != epoch || shared.session.state == CallState::Connected {
            handle.abort();
            return;
        }
        if let Some(previous) = shared.watchdog.replace(handle) {
            previous.abort();
        }
    }

    async fn check_connection(&self, epoch: u64) {
        let peer = {
            let shared = self.inner.shared.lock().await;
            if shared.epoch != epoch || shared.session.state == CallState::Connected {
                return;
            }
            match shared.peer.clone() {
                Some(peer) => peer,
                None => return,
            }
        };

        tracing::warn!(
            delay = ?self.inner.config.watchdog_delay,
            "Connection not established after candidate gathering completed"
        );
        match peer.stats().await {
            Ok(stats) => log_diagnostics(&stats),
            Err(e) => tracing::warn!(error = %e, "Could not read connection stats"),
        }
    }

    async fn log_selected_pair(&self, epoch: u64) {
        let peer = {
            let shared = self.inner.shared.lock().await;
            if shared.epoch != epoch {
                return;
            }
            match shared.peer.clone() {
                Some(peer) => peer,
                None => return,
            }
        };

        let stats = match peer.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::debug!(error = %e, "Could not read connection stats");
                return;
            }
        };
        let Some(pair) = stats.selected_pair() else {
            return;
        };

        let local = stats.local_candidate(&pair.local_candidate_id);
        let remote = stats.remote_candidate(&pair.remote_candidate_id);
        let local_type = local.map_or("unknown", |c| c.candidate_type.as_str());
        tracing::info!(
            local_type,
            local_address = ?local.and_then(|c| c.address.as_deref()),
            remote_type = remote.map_or("unknown", |c| c.candidate_type.as_str()),
            remote_address = ?remote.and_then(|c| c.address.as_deref()),
            "Selected candidate pair"
        );
        if local_type == "relay" {
            tracing::info!("Media is relayed through TURN");
        }
    }
}

fn log_diagnostics(stats: &ConnectionStats) {
    tracing::warn!(
        connection = ?stats.connection_state,
        ice = ?stats.ice_connection_state,
        gathering = ?stats.ice_gathering_state,
        signaling = ?stats.signaling_state,
        local_candidates = stats.local_candidates.len(),
        remote_candidates = stats.remote_candidates.len(),
        pairs = stats.candidate_pairs.len(),
        "Connection diagnostics"
    );
    for c in &stats.local_candidates {
        tracing::debug!(id = %c.id, kind = %c.candidate_type, address = ?c.address, port = ?c.port, protocol = %c.protocol, "Local candidate");
    }
    for c in &stats.remote_candidates {
        tracing::debug!(id = %c.id, kind = %c.candidate_type, address = ?c.address, port = ?c.port, protocol = %c.protocol, "Remote candidate");
    }
    for pair in &stats.candidate_pairs {
        tracing::debug!(
            local = %pair.local_candidate_id,
            remote = %pair.remote_candidate_id,
            state = %pair.state,
            nominated = pair.nominated,
            bytes_sent = pair.bytes_sent,
            bytes_received = pair.bytes_received,
            "Candidate pair"
        );
    }
}
