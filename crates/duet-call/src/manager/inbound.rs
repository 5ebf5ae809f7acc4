//! Inbound signaling: invites, descriptions, candidates and call control
//! arriving from the remote party.

use duet_common::signal::{
    CallControl, CallInvite, CallRejection, CandidateMessage, DescriptionMessage, SdpType,
    SessionDescription, SignalMessage,
};
use std::sync::Arc;

use super::CallManager;
use crate::engine::PeerConnection;
use crate::error::{CallError, CallResult};
use crate::events::CallEvent;
use crate::state::{CallState, Role};

impl CallManager {
    /// Feed one inbound signaling message to the state machine.
    ///
    /// Messages addressed to someone else, echoes of our own messages and
    /// messages for a call other than the bound one are dropped.
    pub async fn handle_signal(&self, message: SignalMessage) {
        let local = self.inner.local_user.as_str();
        if message.to() != local || message.from() == local {
            tracing::trace!(topic = %message.topic(), to = %message.to(), "Ignoring signal not meant for us");
            return;
        }

        tracing::debug!(
            topic = %message.topic(),
            call = %message.call_id(),
            from = %message.from(),
            "Received signal"
        );

        match message {
            SignalMessage::Request(invite) => self.on_invite(invite).await,
            SignalMessage::Offer(offer) => self.on_offer(offer).await,
            SignalMessage::Answer(answer) => self.on_answer(answer).await,
            SignalMessage::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            SignalMessage::Accept(control) => {
                tracing::info!(call = %control.call_id, peer = %control.from, "Call accepted by remote");
            }
            SignalMessage::Reject(rejection) => self.on_reject(rejection).await,
            SignalMessage::End(control) => self.on_end(control).await,
        }
    }

    async fn on_invite(&self, invite: CallInvite) {
        let released = {
            let mut shared = self.inner.shared.lock().await;
            if shared.is_busy() {
                tracing::warn!(
                    call = %invite.call_id,
                    from = %invite.from,
                    "Ignoring incoming call while busy"
                );
                return;
            }
            // Leftovers from an offer for some other call are discarded.
            let released = (!shared.admits(&invite.call_id)).then(|| shared.teardown());

            shared.session.call_id = Some(invite.call_id.clone());
            shared.session.remote_party = Some(invite.from.clone());
            shared.session.role = Some(Role::Callee);
            self.transition(&mut shared, CallState::Ringing);
            self.emit(CallEvent::IncomingCall {
                call_id: invite.call_id.clone(),
                from: invite.from.clone(),
                from_name: invite.from_name.clone(),
            });
            released
        };

        tracing::info!(call = %invite.call_id, from = %invite.from, "Incoming call");
        if let Some(released) = released {
            released.dispose().await;
        }
    }

    async fn on_offer(&self, message: DescriptionMessage) {
        let offer = message.sdp.into_description(SdpType::Offer);
        let (epoch, peer) = {
            let mut shared = self.inner.shared.lock().await;
            if !shared.admits(&message.call_id) {
                tracing::debug!(call = %message.call_id, "Dropping offer for another call");
                return;
            }
            if shared.session.role == Some(Role::Caller) {
                let e = CallError::NegotiationProtocolViolation("offer received by the caller".into());
                tracing::warn!(call = %message.call_id, error = %e, "Dropping offer");
                return;
            }
            let Some(peer) = shared.peer.clone() else {
                if shared.session.call_id.is_none() {
                    shared.session.call_id = Some(message.call_id.clone());
                    shared.session.remote_party = Some(message.from.clone());
                }
                if shared.buffers.store_offer(offer).is_some() {
                    tracing::debug!(call = %message.call_id, "Replaced an earlier pending offer");
                }
                tracing::info!(call = %message.call_id, "Storing offer until the call is accepted");
                return;
            };
            (shared.epoch, peer)
        };

        match self.answer_offer(epoch, &peer, offer).await {
            Ok(()) | Err(CallError::SessionClosed) => {}
            Err(e) => tracing::error!(call = %message.call_id, error = %e, "Error handling offer"),
        }
    }

    /// Apply a remote offer and send our answer. Only the first remote
    /// description of a session is honored.
    pub(super) async fn answer_offer(
        &self,
        epoch: u64,
        peer: &Arc<dyn PeerConnection>,
        offer: SessionDescription,
    ) -> CallResult<()> {
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.epoch != epoch {
                return Err(CallError::SessionClosed);
            }
            if shared.remote_description_seen {
                tracing::debug!("Dropping renegotiation offer");
                return Ok(());
            }
            shared.remote_description_seen = true;
        }

        peer.set_remote_description(offer)
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;
        tracing::debug!("Remote offer applied");
        self.drain_candidates(epoch, peer).await?;

        let answer = peer
            .create_answer()
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;
        peer.set_local_description(answer.clone())
            .await
            .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;

        let (call_id, to) = self.addressing(epoch).await?;
        self.publish(SignalMessage::Answer(DescriptionMessage {
            call_id: call_id.clone(),
            from: self.inner.local_user.clone(),
            to,
            sdp: answer.into(),
        }))
        .await
        .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;

        tracing::info!(call = %call_id, "Answer sent");
        Ok(())
    }

    async fn on_answer(&self, message: DescriptionMessage) {
        let answer = message.sdp.into_description(SdpType::Answer);
        let (epoch, peer) = {
            let mut shared = self.inner.shared.lock().await;
            if !shared.admits(&message.call_id) {
                tracing::debug!(call = %message.call_id, "Dropping answer for another call");
                return;
            }
            let Some(peer) = shared.peer.clone() else {
                let e = CallError::NegotiationProtocolViolation(
                    "answer received without a peer connection".into(),
                );
                tracing::warn!(call = %message.call_id, error = %e, "Dropping answer");
                return;
            };
            if shared.session.role != Some(Role::Caller) {
                let e = CallError::NegotiationProtocolViolation("answer received by the callee".into());
                tracing::warn!(call = %message.call_id, error = %e, "Dropping answer");
                return;
            }
            if shared.remote_description_seen {
                tracing::debug!(call = %message.call_id, "Dropping duplicate answer");
                return;
            }
            shared.remote_description_seen = true;
            (shared.epoch, peer)
        };

        if let Err(e) = peer.set_remote_description(answer).await {
            let e = CallError::NegotiationFailed(e.to_string());
            tracing::error!(call = %message.call_id, error = %e, "Error handling answer");
            return;
        }
        tracing::info!(call = %message.call_id, "Remote answer applied");

        match self.drain_candidates(epoch, &peer).await {
            Ok(()) | Err(CallError::SessionClosed) => {}
            Err(e) => tracing::warn!(call = %message.call_id, error = %e, "Error draining candidates"),
        }
    }

    async fn on_remote_candidate(&self, message: CandidateMessage) {
        let peer = {
            let mut shared = self.inner.shared.lock().await;
            if !shared.admits(&message.call_id) {
                tracing::trace!(call = %message.call_id, "Dropping candidate for another call");
                return;
            }
            match shared.peer.clone() {
                Some(peer) if shared.remote_description_applied => peer,
                _ => {
                    if shared.session.call_id.is_none() {
                        shared.session.call_id = Some(message.call_id.clone());
                        shared.session.remote_party = Some(message.from.clone());
                    }
                    shared.buffers.queue_candidate(message.candidate);
                    tracing::debug!(
                        call = %message.call_id,
                        queued = shared.buffers.queued_candidates(),
                        "Queued remote candidate"
                    );
                    return;
                }
            }
        };

        let kind = message.candidate.kind();
        if let Err(e) = peer.add_ice_candidate(message.candidate).await {
            let e = CallError::CandidateApplicationFailed(e.to_string());
            tracing::warn!(call = %message.call_id, error = %e, "Skipping remote candidate");
        } else {
            tracing::debug!(call = %message.call_id, %kind, "Applied remote candidate");
        }
    }

    /// Apply queued candidates, oldest first, until the queue is observed
    /// empty. Candidates arriving meanwhile join the queue and are picked up
    /// by the next round, so arrival order is kept.
    async fn drain_candidates(&self, epoch: u64, peer: &Arc<dyn PeerConnection>) -> CallResult<()> {
        loop {
            let batch = {
                let mut shared = self.inner.shared.lock().await;
                if shared.epoch != epoch {
                    return Err(CallError::SessionClosed);
                }
                let batch = shared.buffers.take_candidates();
                if batch.is_empty() {
                    shared.remote_description_applied = true;
                    return Ok(());
                }
                batch
            };

            tracing::debug!(count = batch.len(), "Applying queued candidates");
            for candidate in batch {
                if let Err(e) = peer.add_ice_candidate(candidate).await {
                    let e = CallError::CandidateApplicationFailed(e.to_string());
                    tracing::warn!(error = %e, "Skipping queued candidate");
                }
            }
        }
    }

    async fn on_reject(&self, rejection: CallRejection) {
        let epoch = {
            let shared = self.inner.shared.lock().await;
            if !shared.session.is_bound_to(&rejection.call_id) {
                tracing::debug!(call = %rejection.call_id, "Ignoring rejection for another call");
                return;
            }
            shared.epoch
        };

        tracing::info!(call = %rejection.call_id, reason = %rejection.reason, "Call rejected");
        self.emit(CallEvent::Rejected {
            call_id: rejection.call_id,
            reason: rejection.reason,
        });
        self.finish(Some(epoch), CallState::Ended, false, None).await;
    }

    async fn on_end(&self, control: CallControl) {
        let epoch = {
            let shared = self.inner.shared.lock().await;
            if !shared.session.is_bound_to(&control.call_id) {
                tracing::debug!(call = %control.call_id, "Ignoring end for another call");
                return;
            }
            shared.epoch
        };

        tracing::info!(call = %control.call_id, from = %control.from, "Call ended by remote");
        self.finish(Some(epoch), CallState::Ended, false, None).await;
    }
}
