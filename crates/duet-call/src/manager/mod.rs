//! Call manager: the call signaling and negotiation state machine.
//!
//! One manager owns at most one call at a time. Three kinds of input drive it:
//! - user actions: [`CallManager::start_call`], [`CallManager::accept_call`],
//!   [`CallManager::reject_call`], [`CallManager::end_call`], [`CallManager::toggle_mute`]
//! - inbound signaling: [`CallManager::handle_signal`]
//! - peer connection callbacks, drained by a per-connection event pump
//!
//! State lives behind one async mutex that is never held across an engine,
//! media or signaling await. Every suspended operation remembers the session
//! epoch it started in and re-checks it after each await; teardown bumps the
//! epoch, so results that land after a call ended are discarded.

mod inbound;
mod transport;


use duet_common::ice::RelayConfig;
use duet_common::ids::{CallId, generate_call_id};
use duet_common::signal::{
    CallControl, CallInvite, CallRejection, DescriptionMessage, SignalMessage,
    REJECT_REASON_DECLINED,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::buffers::PendingBuffers;
use crate::credentials::RelaySource;
use crate::engine::{NegotiationEngine, PeerConnection};
use crate::error::{CallError, CallResult};
use crate::events::CallEvent;
use crate::media::{AudioConstraints, LocalStream, MediaSource};
use crate::signaling::SignalingChannel;
use crate::state::{CallSession, CallState, Role};
use crate::timer::CallTimer;

/// Tunables for a call manager.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long after candidate gathering completes before an unconnected
    /// call gets a diagnostic snapshot logged.
    pub watchdog_delay: Duration,
    pub timer_period: Duration,
    /// Upper bound on the relay credential fetch during [`CallManagerBuilder::build`].
    pub credential_timeout: Duration,
    pub reject_reason: String,
    pub audio: AudioConstraints,
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            watchdog_delay: Duration::from_secs(10),
            timer_period: Duration::from_secs(1),
            credential_timeout: Duration::from_secs(5),
            reject_reason: REJECT_REASON_DECLINED.to_string(),
            audio: AudioConstraints::default(),
            event_capacity: 256,
        }
    }
}

pub struct CallManagerBuilder {
    local_user: String,
    display_name: Option<String>,
    engine: Arc<dyn NegotiationEngine>,
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaSource>,
    relay: RelaySource,
    config: CallConfig,
}

impl CallManagerBuilder {
    /// Name shown to the callee in the invite. Defaults to the user name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn relay_source(mut self, relay: RelaySource) -> Self {
        self.relay = relay;
        self
    }

    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the relay configuration and build the manager.
    pub async fn build(self) -> CallManager {
        let relay = self.relay.resolve(self.config.credential_timeout).await;
        tracing::debug!(
            user = %self.local_user,
            ice_servers = relay.ice_servers.len(),
            relay = relay.has_relay(),
            "Call manager ready"
        );

        let (events, _) = broadcast::channel(self.config.event_capacity);
        let display_name = self
            .display_name
            .unwrap_or_else(|| self.local_user.clone());

        CallManager {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared::new(&self.local_user)),
                local_user: self.local_user,
                display_name,
                config: self.config,
                relay,
                engine: self.engine,
                signaling: self.signaling,
                media: self.media,
                events,
            }),
        }
    }
}

/// Handle to a call manager. Clones share the same call.
#[derive(Clone)]
pub struct CallManager {
    inner: Arc<Inner>,
}

struct Inner {
    local_user: String,
    display_name: String,
    config: CallConfig,
    relay: RelayConfig,
    engine: Arc<dyn NegotiationEngine>,
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaSource>,
    events: broadcast::Sender<CallEvent>,
    shared: Mutex<Shared>,
}

/// Mutable call state. Only touched with the lock held, never across an await.
struct Shared {
    session: CallSession,
    /// Bumped on every teardown.
    epoch: u64,
    /// Set while start/accept is suspended between its first and last step.
    setup_in_flight: bool,
    /// A caller setup has bound the call but the invite is not out yet, so
    /// the remote party does not know about it.
    invite_pending: bool,
    /// Call torn down most recently. Late messages for it are dropped.
    finished_call: Option<CallId>,
    peer: Option<Arc<dyn PeerConnection>>,
    stream: Option<LocalStream>,
    buffers: PendingBuffers,
    /// A remote description was handed to the peer. Later descriptions are dropped.
    remote_description_seen: bool,
    /// The remote description is applied and the candidate queue has been drained.
    remote_description_applied: bool,
    timer: Option<CallTimer>,
    watchdog: Option<JoinHandle<()>>,
}

impl Shared {
    fn new(local_user: &str) -> Self {
        Self {
            session: CallSession::new(local_user),
            epoch: 0,
            setup_in_flight: false,
            invite_pending: false,
            finished_call: None,
            peer: None,
            stream: None,
            buffers: PendingBuffers::new(),
            remote_description_seen: false,
            remote_description_applied: false,
            timer: None,
            watchdog: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.session.state.is_live() || self.setup_in_flight
    }

    /// Whether a message for `call_id` belongs to this session, or could
    /// start one. Traffic for the call just torn down never does.
    fn admits(&self, call_id: &CallId) -> bool {
        match &self.session.call_id {
            Some(bound) => bound == call_id,
            None => self.finished_call.as_ref() != Some(call_id),
        }
    }

    /// Detach every call resource and reset the session. The lifecycle state
    /// is left untouched.
    fn teardown(&mut self) -> Released {
        self.epoch += 1;
        self.setup_in_flight = false;
        self.invite_pending = false;
        if let Some(call_id) = self.session.call_id.take() {
            self.finished_call = Some(call_id);
        }
        self.session.reset();
        self.buffers.clear();
        self.remote_description_seen = false;
        self.remote_description_applied = false;
        Released {
            peer: self.peer.take(),
            stream: self.stream.take(),
            timer: self.timer.take(),
            watchdog: self.watchdog.take(),
        }
    }
}

/// Resources detached by a teardown, released once the lock is dropped.
struct Released {
    peer: Option<Arc<dyn PeerConnection>>,
    stream: Option<LocalStream>,
    timer: Option<CallTimer>,
    watchdog: Option<JoinHandle<()>>,
}

impl Released {
    fn is_empty(&self) -> bool {
        self.peer.is_none() && self.stream.is_none() && self.timer.is_none() && self.watchdog.is_none()
    }

    async fn dispose(self) {
        if self.is_empty() {
            return;
        }
        tracing::debug!("Cleaning up call resources");

        if let Some(timer) = self.timer {
            timer.stop();
        }
        if let Some(watchdog) = self.watchdog {
            watchdog.abort();
        }
        if let Some(stream) = self.stream {
            stream.stop();
        }
        if let Some(peer) = self.peer {
            if let Err(e) = peer.close().await {
                tracing::warn!(error = %e, "Peer connection did not close cleanly");
            }
        }
    }
}

/// Which half of the handshake a setup step belongs to, for error mapping.
#[derive(Clone, Copy)]
enum Setup {
    Start,
    Accept,
}

impl Setup {
    fn error(self, e: impl std::fmt::Display) -> CallError {
        match self {
            Setup::Start => CallError::CallStartFailed(e.to_string()),
            Setup::Accept => CallError::CallAcceptFailed(e.to_string()),
        }
    }
}

/// Text shown to the user for a failed action.
fn user_message(err: &CallError) -> String {
    match err {
        CallError::MediaAccessDenied(_) => {
            "Please allow microphone access to make voice calls".to_string()
        }
        other => other.to_string(),
    }
}

impl CallManager {
    pub fn builder(
        local_user: impl Into<String>,
        engine: Arc<dyn NegotiationEngine>,
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaSource>,
    ) -> CallManagerBuilder {
        CallManagerBuilder {
            local_user: local_user.into(),
            display_name: None,
            engine,
            signaling,
            media,
            relay: RelaySource::default(),
            config: CallConfig::default(),
        }
    }

    /// Subscribe to call events. Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    pub fn local_user(&self) -> &str {
        &self.inner.local_user
    }

    /// The relay configuration every peer connection of this manager uses.
    pub fn relay_config(&self) -> &RelayConfig {
        &self.inner.relay
    }

    /// Copy of the current session.
    pub async fn snapshot(&self) -> CallSession {
        self.inner.shared.lock().await.session.clone()
    }

    pub async fn state(&self) -> CallState {
        self.inner.shared.lock().await.session.state
    }

    /// Call `remote_party`. Returns the new call id once the invite and offer are out.
    pub async fn start_call(&self, remote_party: &str) -> CallResult<CallId> {
        let call_id = generate_call_id();
        let (epoch, released) = {
            let mut shared = self.inner.shared.lock().await;
            if shared.is_busy() {
                tracing::warn!(peer = %remote_party, "Refusing to start a call while another is in progress");
                return Err(CallError::CallInProgress);
            }
            let released = shared.teardown();
            shared.setup_in_flight = true;
            shared.invite_pending = true;
            shared.session.call_id = Some(call_id.clone());
            shared.session.remote_party = Some(remote_party.to_string());
            shared.session.role = Some(Role::Caller);
            (shared.epoch, released)
        };
        released.dispose().await;

        tracing::info!(call = %call_id, peer = %remote_party, "Starting call");

        let mut invited = false;
        match self
            .run_start(epoch, &call_id, remote_party, &mut invited)
            .await
        {
            Ok(()) => Ok(call_id),
            Err(CallError::SessionClosed) => {
                tracing::debug!(call = %call_id, "Call was ended before setup finished");
                Err(CallError::SessionClosed)
            }
            Err(e) => {
                tracing::error!(call = %call_id, error = %e, "Error starting call");
                self.emit(CallEvent::Error(user_message(&e)));
                self.finish(Some(epoch), CallState::Idle, invited, None).await;
                Err(e)
            }
        }
    }

    async fn run_start(
        &self,
        epoch: u64,
        call_id: &CallId,
        remote_party: &str,
        invited: &mut bool,
    ) -> CallResult<()> {
        let stream = self.ensure_stream(epoch).await?;
        let peer = self.open_peer(epoch, &stream, Setup::Start).await?;

        let offer = peer.create_offer().await.map_err(|e| Setup::Start.error(e))?;
        peer.set_local_description(offer.clone())
            .await
            .map_err(|e| Setup::Start.error(e))?;
        self.ensure_current(epoch).await?;

        let inner = &self.inner;
        self.publish(SignalMessage::Request(CallInvite {
            call_id: call_id.clone(),
            from: inner.local_user.clone(),
            from_name: inner.display_name.clone(),
            to: remote_party.to_string(),
        }))
        .await
        .map_err(|e| Setup::Start.error(e))?;
        *invited = true;

        {
            let mut shared = inner.shared.lock().await;
            if shared.epoch != epoch {
                drop(shared);
                // Hung up while the invite was in flight: withdraw it.
                tracing::info!(call = %call_id, "Call ended during setup, withdrawing invite");
                let withdraw = SignalMessage::End(CallControl {
                    call_id: call_id.clone(),
                    from: inner.local_user.clone(),
                    to: remote_party.to_string(),
                });
                if let Err(e) = self.publish(withdraw).await {
                    tracing::warn!(call = %call_id, error = %e, "Failed to send call end");
                }
                return Err(CallError::SessionClosed);
            }
            shared.invite_pending = false;
        }

        self.publish(SignalMessage::Offer(DescriptionMessage {
            call_id: call_id.clone(),
            from: inner.local_user.clone(),
            to: remote_party.to_string(),
            sdp: offer.into(),
        }))
        .await
        .map_err(|e| Setup::Start.error(e))?;

        let mut shared = inner.shared.lock().await;
        if shared.epoch != epoch {
            return Err(CallError::SessionClosed);
        }
        shared.setup_in_flight = false;
        if shared.session.state != CallState::Connected {
            self.transition(&mut shared, CallState::Calling);
        }
        tracing::info!(call = %call_id, "Call request and offer sent");
        Ok(())
    }

    /// Answer the incoming call `call_id`.
    pub async fn accept_call(&self, call_id: &CallId) -> CallResult<()> {
        let (epoch, remote_party) = {
            let mut shared = self.inner.shared.lock().await;
            let bound_here = shared.session.is_bound_to(call_id);
            if shared.setup_in_flight
                || shared.session.role == Some(Role::Caller)
                || matches!(
                    shared.session.state,
                    CallState::Calling | CallState::Connecting | CallState::Connected
                )
                || (shared.session.state.is_live() && !bound_here)
            {
                return Err(CallError::CallInProgress);
            }
            let remote_party = match (&shared.session.remote_party, bound_here) {
                (Some(remote), true) => remote.clone(),
                _ => {
                    return Err(CallError::CallAcceptFailed(format!(
                        "no invite or offer received for {call_id}"
                    )));
                }
            };
            shared.setup_in_flight = true;
            shared.session.role = Some(Role::Callee);
            (shared.epoch, remote_party)
        };

        tracing::info!(call = %call_id, peer = %remote_party, "Accepting call");

        match self.run_accept(epoch, call_id, &remote_party).await {
            Ok(()) => Ok(()),
            Err(CallError::SessionClosed) => {
                tracing::debug!(call = %call_id, "Call was ended before accept finished");
                Err(CallError::SessionClosed)
            }
            Err(e) => {
                tracing::error!(call = %call_id, error = %e, "Error accepting call");
                self.emit(CallEvent::Error(user_message(&e)));
                self.finish(Some(epoch), CallState::Idle, true, None).await;
                Err(e)
            }
        }
    }

    async fn run_accept(&self, epoch: u64, call_id: &CallId, remote_party: &str) -> CallResult<()> {
        let stream = self.ensure_stream(epoch).await?;
        let peer = self.open_peer(epoch, &stream, Setup::Accept).await?;

        let pending = {
            let mut shared = self.inner.shared.lock().await;
            if shared.epoch != epoch {
                return Err(CallError::SessionClosed);
            }
            shared.buffers.take_offer()
        };
        if let Some(offer) = pending {
            tracing::info!(call = %call_id, "Processing pending offer");
            match self.answer_offer(epoch, &peer, offer).await {
                Ok(()) => {}
                Err(CallError::SessionClosed) => return Err(CallError::SessionClosed),
                // The transport callbacks fail the call if negotiation never recovers.
                Err(e) => tracing::error!(call = %call_id, error = %e, "Error handling offer"),
            }
        }

        self.ensure_current(epoch).await?;
        self.publish(SignalMessage::Accept(CallControl {
            call_id: call_id.clone(),
            from: self.inner.local_user.clone(),
            to: remote_party.to_string(),
        }))
        .await
        .map_err(|e| Setup::Accept.error(e))?;

        let mut shared = self.inner.shared.lock().await;
        if shared.epoch != epoch {
            return Err(CallError::SessionClosed);
        }
        shared.setup_in_flight = false;
        // The transport may already be up if the offer was answered above.
        if shared.session.state != CallState::Connected {
            self.transition(&mut shared, CallState::Connecting);
        }
        Ok(())
    }

    /// Decline the incoming call `call_id`.
    pub async fn reject_call(&self, call_id: &CallId) {
        let (remote_party, released) = {
            let mut shared = self.inner.shared.lock().await;
            if !shared.session.is_bound_to(call_id) {
                tracing::warn!(call = %call_id, "Reject for a call this manager does not know");
                return;
            }
            let remote_party = shared.session.remote_party.clone();
            let released = shared.teardown();
            self.transition(&mut shared, CallState::Idle);
            (remote_party, released)
        };

        tracing::info!(call = %call_id, "Rejecting call");

        if let Some(to) = remote_party {
            let reject = SignalMessage::Reject(CallRejection {
                call_id: call_id.clone(),
                from: self.inner.local_user.clone(),
                to,
                reason: self.inner.config.reject_reason.clone(),
            });
            if let Err(e) = self.publish(reject).await {
                tracing::warn!(call = %call_id, error = %e, "Failed to send call rejection");
            }
        }
        released.dispose().await;
    }

    /// Hang up. Safe to call at any time and any number of times.
    pub async fn end_call(&self) {
        self.finish(None, CallState::Ended, true, None).await;
    }

    /// Flip mute on every local audio track. Returns the new mute state, or
    /// `false` when there is no local stream.
    pub async fn toggle_mute(&self) -> bool {
        let mut shared = self.inner.shared.lock().await;
        let Some(stream) = shared.stream.clone() else {
            return false;
        };
        let muted = !shared.session.is_muted;
        shared.session.is_muted = muted;
        stream.set_enabled(!muted);
        tracing::debug!(muted, "Toggled mute");
        self.emit(CallEvent::MuteChanged(muted));
        muted
    }

    /// Tear the session down and settle in `terminal`.
    ///
    /// With `expected_epoch` set, does nothing if that session is already gone.
    /// Sends `call/end` when `notify_remote` is set and the remote party has
    /// heard of the bound call.
    /// Returns whether a teardown happened.
    async fn finish(
        &self,
        expected_epoch: Option<u64>,
        terminal: CallState,
        notify_remote: bool,
        error: Option<String>,
    ) -> bool {
        let (notice, released) = {
            let mut shared = self.inner.shared.lock().await;
            if expected_epoch.is_some_and(|e| e != shared.epoch) {
                return false;
            }
            let notify_remote = notify_remote && !shared.invite_pending;
            let notice = match (&shared.session.call_id, &shared.session.remote_party) {
                (Some(call_id), Some(to)) if notify_remote => Some(CallControl {
                    call_id: call_id.clone(),
                    from: self.inner.local_user.clone(),
                    to: to.clone(),
                }),
                _ => None,
            };
            if let Some(message) = error {
                self.emit(CallEvent::Error(message));
            }
            let released = shared.teardown();
            self.transition(&mut shared, terminal);
            (notice, released)
        };

        if let Some(control) = notice {
            let call_id = control.call_id.clone();
            tracing::info!(call = %call_id, "Ending call");
            if let Err(e) = self.publish(SignalMessage::End(control)).await {
                tracing::warn!(call = %call_id, error = %e, "Failed to send call end");
            }
        }
        released.dispose().await;
        true
    }

    /// The local stream, acquiring the microphone on first use.
    async fn ensure_stream(&self, epoch: u64) -> CallResult<LocalStream> {
        {
            let shared = self.inner.shared.lock().await;
            if shared.epoch != epoch {
                return Err(CallError::SessionClosed);
            }
            if let Some(stream) = &shared.stream {
                return Ok(stream.clone());
            }
        }

        tracing::debug!("Requesting microphone access");
        let stream = self
            .inner
            .media
            .acquire_audio(&self.inner.config.audio)
            .await
            .map_err(|e| CallError::MediaAccessDenied(e.to_string()))?;

        let mut shared = self.inner.shared.lock().await;
        if shared.epoch != epoch {
            stream.stop();
            return Err(CallError::SessionClosed);
        }
        tracing::debug!(tracks = stream.audio_tracks().len(), "Microphone access granted");
        shared.stream = Some(stream.clone());
        Ok(stream)
    }

    /// Create the peer connection, attach local tracks, then make it visible
    /// to inbound handlers. Until it is installed, offers and candidates are buffered.
    async fn open_peer(
        &self,
        epoch: u64,
        stream: &LocalStream,
        setup: Setup,
    ) -> CallResult<Arc<dyn PeerConnection>> {
        tracing::debug!(
            ice_servers = self.inner.relay.ice_servers.len(),
            "Creating peer connection"
        );
        let (peer, events) = self
            .inner
            .engine
            .create_peer(&self.inner.relay)
            .await
            .map_err(|e| setup.error(e))?;

        for track in stream.audio_tracks() {
            if let Err(e) = peer.add_track(track).await {
                let _ = peer.close().await;
                return Err(setup.error(e));
            }
            tracing::debug!(track = %track.id(), kind = track.kind(), "Added local track");
        }

        {
            let mut shared = self.inner.shared.lock().await;
            if shared.epoch != epoch {
                drop(shared);
                let _ = peer.close().await;
                return Err(CallError::SessionClosed);
            }
            shared.peer = Some(peer.clone());
            shared.remote_description_seen = false;
            shared.remote_description_applied = false;
        }

        self.spawn_event_pump(epoch, events);
        Ok(peer)
    }

    async fn ensure_current(&self, epoch: u64) -> CallResult<()> {
        if self.inner.shared.lock().await.epoch == epoch {
            Ok(())
        } else {
            Err(CallError::SessionClosed)
        }
    }

    /// Call id and remote party of the live session.
    async fn addressing(&self, epoch: u64) -> CallResult<(CallId, String)> {
        let shared = self.inner.shared.lock().await;
        if shared.epoch != epoch {
            return Err(CallError::SessionClosed);
        }
        match (&shared.session.call_id, &shared.session.remote_party) {
            (Some(call_id), Some(remote)) => Ok((call_id.clone(), remote.clone())),
            _ => Err(CallError::NegotiationFailed(
                "session has no remote party".to_string(),
            )),
        }
    }

    async fn publish(&self, message: SignalMessage) -> anyhow::Result<()> {
        tracing::debug!(
            topic = %message.topic(),
            call = %message.call_id(),
            to = %message.to(),
            "Publishing signal"
        );
        self.inner.signaling.publish(message).await
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }

    /// Set the lifecycle state, notifying subscribers on change.
    fn transition(&self, shared: &mut Shared, next: CallState) -> bool {
        let previous = shared.session.state;
        if previous == next {
            return false;
        }
        shared.session.state = next;
        tracing::info!(from = %previous, to = %next, "Call state changed");
        self.emit(CallEvent::StateChanged(next));
        true
    }
}
