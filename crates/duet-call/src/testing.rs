//! In-memory capabilities for exercising the call manager.

use async_trait::async_trait;
use duet_common::ice::{RelayConfig, TurnCredentials};
use duet_common::ids::CallId;
use duet_common::signal::{
    CallControl, CallInvite, CallRejection, CandidateMessage, DescriptionMessage, IceCandidate,
    SdpType, SessionDescription, SignalMessage, Topic,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast, mpsc};

use crate::credentials::{CredentialSource, RelaySource};
use crate::engine::{
    ConnectionStats, EngineEvent, EngineEvents, NegotiationEngine, PeerConnection,
};
use crate::events::CallEvent;
use crate::manager::CallManager;
use crate::media::{AudioConstraints, AudioTrack, LocalStream, MediaSource};
use crate::signaling::SignalingChannel;
use crate::state::CallState;

fn sdp_kind(desc: &SessionDescription) -> &'static str {
    match desc.kind {
        SdpType::Offer => "offer",
        SdpType::Answer => "answer",
        _ => "other",
    }
}

// --- Engine ---

#[derive(Default)]
pub struct FakeEngine {
    configs: Mutex<Vec<RelayConfig>>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail_create: AtomicBool,
    fail_offer: AtomicBool,
    fail_remote: AtomicBool,
    rejected: Mutex<Vec<String>>,
    remote_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeEngine {
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_offer(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    /// Peers created from now on refuse every remote description.
    pub fn fail_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    /// Peers created from now on refuse this candidate line.
    pub fn reject_candidate(&self, line: &str) {
        self.rejected.lock().unwrap().push(line.to_string());
    }

    /// Peers created from now on hold `set_remote_description` until a
    /// permit is added to the returned semaphore.
    pub fn gate_remote_description(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.remote_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn configs(&self) -> Vec<RelayConfig> {
        self.configs.lock().unwrap().clone()
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().unwrap().clone()
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers()[index].clone()
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn create_peer(
        &self,
        config: &RelayConfig,
    ) -> anyhow::Result<(Arc<dyn PeerConnection>, EngineEvents)> {
        self.configs.lock().unwrap().push(config.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("peer connection unavailable");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(FakePeer {
            ops: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            remote_set: AtomicBool::new(false),
            early_candidates: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
            fail_remote: self.fail_remote.load(Ordering::SeqCst),
            rejected: self.rejected.lock().unwrap().clone(),
            remote_gate: self.remote_gate.lock().unwrap().clone(),
            events: tx,
        });
        self.peers.lock().unwrap().push(peer.clone());
        let peer: Arc<dyn PeerConnection> = peer;
        Ok((peer, rx))
    }
}

pub struct FakePeer {
    ops: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    remote_set: AtomicBool,
    early_candidates: AtomicUsize,
    closed: AtomicBool,
    fail_offer: bool,
    fail_remote: bool,
    rejected: Vec<String>,
    remote_gate: Option<Arc<Semaphore>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl FakePeer {
    /// Simulate an engine callback.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count_ops(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    /// Candidate lines the peer accepted, in application order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    /// Candidates handed over before any remote description was set.
    pub fn early_candidates(&self) -> usize {
        self.early_candidates.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, track: &AudioTrack) -> anyhow::Result<()> {
        self.record(format!("add_track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> anyhow::Result<SessionDescription> {
        self.record("create_offer");
        if self.fail_offer {
            anyhow::bail!("offer generation failed");
        }
        Ok(SessionDescription::offer("v=0 local-offer"))
    }

    async fn create_answer(&self) -> anyhow::Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription::answer("v=0 local-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> anyhow::Result<()> {
        self.record(format!("set_local:{}", sdp_kind(&desc)));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> anyhow::Result<()> {
        if let Some(gate) = &self.remote_gate {
            gate.acquire().await?.forget();
        }
        self.record(format!("set_remote:{}", sdp_kind(&desc)));
        if self.fail_remote {
            anyhow::bail!("remote description rejected");
        }
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        if !self.remote_set.load(Ordering::SeqCst) {
            self.early_candidates.fetch_add(1, Ordering::SeqCst);
        }
        if self.rejected.contains(&candidate.candidate) {
            anyhow::bail!("malformed candidate");
        }
        self.applied.lock().unwrap().push(candidate.candidate);
        Ok(())
    }

    async fn stats(&self) -> anyhow::Result<ConnectionStats> {
        self.record("stats");
        Ok(ConnectionStats::default())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record("close");
        }
        Ok(())
    }
}

// --- Signaling ---

#[derive(Default)]
pub struct FakeSignaling {
    sent: Mutex<Vec<SignalMessage>>,
    gate: Mutex<Option<(Topic, Arc<Semaphore>)>>,
}

impl FakeSignaling {
    /// Hold publishes of `topic` until a permit is added to the returned semaphore.
    pub fn gate(&self, topic: Topic) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some((topic, gate.clone()));
        gate
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.sent().iter().map(SignalMessage::topic).collect()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.topics().into_iter().filter(|t| *t == topic).count()
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn publish(&self, message: SignalMessage) -> anyhow::Result<()> {
        let gate = self
            .gate
            .lock()
            .unwrap()
            .clone()
            .filter(|(topic, _)| *topic == message.topic());
        if let Some((_, gate)) = gate {
            gate.acquire().await?.forget();
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// --- Media ---

#[derive(Default)]
pub struct FakeMedia {
    deny: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    streams: Mutex<Vec<LocalStream>>,
}

impl FakeMedia {
    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    /// Hold acquisition until a permit is added to the returned semaphore.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Every track handed out so far.
    pub fn tracks(&self) -> Vec<AudioTrack> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .flat_map(|s| s.audio_tracks().to_vec())
            .collect()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire_audio(&self, constraints: &AudioConstraints) -> anyhow::Result<LocalStream> {
        assert!(!constraints.video);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        if self.deny.load(Ordering::SeqCst) {
            anyhow::bail!("NotAllowedError: Permission denied");
        }
        let mut streams = self.streams.lock().unwrap();
        let stream = LocalStream::new(vec![AudioTrack::new(
            format!("mic-{}", streams.len()),
            "Fake Microphone",
        )]);
        streams.push(stream.clone());
        Ok(stream)
    }
}

// --- Credentials ---

pub struct FixedCredentials;

#[async_trait]
impl CredentialSource for FixedCredentials {
    async fn fetch(&self) -> anyhow::Result<TurnCredentials> {
        Ok(TurnCredentials {
            username: "1718049123:alice".into(),
            credential: "c2VjcmV0".into(),
        })
    }
}

// --- Harness ---

pub struct Harness {
    pub manager: CallManager,
    pub engine: Arc<FakeEngine>,
    pub signaling: Arc<FakeSignaling>,
    pub media: Arc<FakeMedia>,
    events: broadcast::Receiver<CallEvent>,
    seen: Vec<CallEvent>,
}

impl Harness {
    pub async fn new(user: &str) -> Self {
        Self::with_relay(user, RelaySource::default()).await
    }

    pub async fn with_relay(user: &str, relay: RelaySource) -> Self {
        let engine = Arc::new(FakeEngine::default());
        let signaling = Arc::new(FakeSignaling::default());
        let media = Arc::new(FakeMedia::default());
        let manager = CallManager::builder(user, engine.clone(), signaling.clone(), media.clone())
            .display_name(format!("{user} (display)"))
            .relay_source(relay)
            .build()
            .await;
        let events = manager.subscribe();
        Self {
            manager,
            engine,
            signaling,
            media,
            events,
            seen: Vec::new(),
        }
    }

    pub async fn deliver(&self, message: SignalMessage) {
        self.manager.handle_signal(message).await;
    }

    /// Every event emitted so far.
    pub fn events(&mut self) -> &[CallEvent] {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    pub fn states(&mut self) -> Vec<CallState> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                CallEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&mut self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn durations(&mut self) -> Vec<u64> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Duration(secs) => Some(*secs),
                _ => None,
            })
            .collect()
    }
}

/// Let spawned tasks run until they block. Needs a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// --- Messages ---

pub fn invite(call_id: &CallId, from: &str, to: &str) -> SignalMessage {
    SignalMessage::Request(CallInvite {
        call_id: call_id.clone(),
        from: from.into(),
        from_name: from.to_uppercase(),
        to: to.into(),
    })
}

pub fn offer(call_id: &CallId, from: &str, to: &str) -> SignalMessage {
    SignalMessage::Offer(DescriptionMessage {
        call_id: call_id.clone(),
        from: from.into(),
        to: to.into(),
        sdp: SessionDescription::offer("v=0 remote-offer").into(),
    })
}

pub fn answer(call_id: &CallId, from: &str, to: &str) -> SignalMessage {
    SignalMessage::Answer(DescriptionMessage {
        call_id: call_id.clone(),
        from: from.into(),
        to: to.into(),
        sdp: SessionDescription::answer("v=0 remote-answer").into(),
    })
}

pub fn candidate(call_id: &CallId, from: &str, to: &str, line: &str) -> SignalMessage {
    SignalMessage::IceCandidate(CandidateMessage {
        call_id: call_id.clone(),
        from: from.into(),
        to: to.into(),
        candidate: IceCandidate::new(line),
    })
}

pub fn reject(call_id: &CallId, from: &str, to: &str) -> SignalMessage {
    SignalMessage::Reject(CallRejection {
        call_id: call_id.clone(),
        from: from.into(),
        to: to.into(),
        reason: "User declined".into(),
    })
}

pub fn end(call_id: &CallId, from: &str, to: &str) -> SignalMessage {
    SignalMessage::End(CallControl {
        call_id: call_id.clone(),
        from: from.into(),
        to: to.into(),
    })
}
