//! WebSocket signaling channel speaking the relay protocol.

use async_trait::async_trait;
use duet_call::signaling::SignalingChannel;
use duet_common::protocol::RelayFrame;
use duet_common::signal::SignalMessage;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How the background task retries a lost relay connection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff: 2, 4, 8, ... seconds, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = 2u64.saturating_pow(attempt.min(32));
        Duration::from_secs(secs).min(self.max_delay)
    }
}

/// Signaling over a relay connection, with auto-reconnect.
///
/// ```rust,no_run
/// use duet_client::RelayChannel;
///
/// # async fn run() -> duet_client::Result<()> {
/// let channel = RelayChannel::connect("ws://localhost:8080/call", "alice").await?;
/// let mut inbound = channel.subscribe();
/// while let Ok(message) = inbound.recv().await {
///     println!("{} from {}", message.topic(), message.from());
/// }
/// # Ok(())
/// # }
/// ```
pub struct RelayChannel {
    username: String,
    outbound: mpsc::Sender<SignalMessage>,
    inbound: broadcast::Sender<SignalMessage>,
    session_id: Arc<Mutex<Option<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayChannel {
    pub async fn connect(url: &str, username: &str) -> Result<Self> {
        Self::connect_with(url, username, ReconnectPolicy::default()).await
    }

    /// Connect and identify. The first connection must succeed; later drops
    /// are retried in the background according to `policy`.
    pub async fn connect_with(url: &str, username: &str, policy: ReconnectPolicy) -> Result<Self> {
        let socket = open(url, username).await?;

        let (outbound, outbound_rx) = mpsc::channel(64);
        let (inbound, _) = broadcast::channel(256);
        let session_id = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run(
            url.to_owned(),
            username.to_owned(),
            policy,
            socket,
            outbound_rx,
            inbound.clone(),
            Arc::clone(&session_id),
        ));

        Ok(Self {
            username: username.to_owned(),
            outbound,
            inbound,
            session_id,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Subscribe to inbound signaling messages.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.inbound.subscribe()
    }

    /// Session id from the latest `Ready`, if identified.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    /// Queue a message for the relay. Messages published while reconnecting
    /// are sent once the connection is back.
    pub async fn send(&self, message: SignalMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Stop the background task. Later sends fail with [`ClientError::NotConnected`].
    pub async fn close(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl SignalingChannel for RelayChannel {
    async fn publish(&self, message: SignalMessage) -> anyhow::Result<()> {
        Ok(self.send(message).await?)
    }
}

async fn open(url: &str, username: &str) -> Result<Socket> {
    let (mut socket, _) = connect_async(url).await?;
    let identify = serde_json::to_string(&RelayFrame::Identify {
        username: username.to_owned(),
    })?;
    socket.send(Message::Text(identify.into())).await?;
    Ok(socket)
}

enum Exit {
    /// Every handle to the channel is gone.
    Shutdown,
    /// The relay closed the connection.
    Closed,
}

async fn run(
    url: String,
    username: String,
    policy: ReconnectPolicy,
    first: Socket,
    mut outbound: mpsc::Receiver<SignalMessage>,
    inbound: broadcast::Sender<SignalMessage>,
    session_id: Arc<Mutex<Option<String>>>,
) {
    let mut socket = Some(first);
    let mut attempts = 0u32;

    loop {
        let result = match socket.take() {
            Some(ws) => Ok(ws),
            None => open(&url, &username).await,
        };
        let result = match result {
            Ok(ws) => drive(ws, &mut outbound, &inbound, &session_id, &mut attempts).await,
            Err(e) => Err(e),
        };

        let reason = match result {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Closed) => "closed by relay".to_string(),
            Err(e) => e.to_string(),
        };
        *session_id.lock().await = None;

        attempts += 1;
        if attempts > policy.max_attempts {
            error!(user = %username, "Relay: max reconnect attempts reached: {reason}");
            break;
        }
        let delay = policy.delay(attempts);
        warn!(user = %username, "Relay: disconnected ({reason}), reconnecting in {delay:?} (attempt {attempts})");
        sleep(delay).await;
    }
    debug!(user = %username, "Relay task stopped");
}

/// Pump one connection until it ends.
async fn drive(
    socket: Socket,
    outbound: &mut mpsc::Receiver<SignalMessage>,
    inbound: &broadcast::Sender<SignalMessage>,
    session_id: &Mutex<Option<String>>,
    attempts: &mut u32,
) -> Result<Exit> {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(message) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                };
                let text = serde_json::to_string(&RelayFrame::Signal(message))?;
                sink.send(Message::Text(text.into())).await?;
            }
            next = stream.next() => {
                let Some(msg) = next else {
                    return Ok(Exit::Closed);
                };
                let text = match msg? {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok(Exit::Closed),
                    _ => continue,
                };
                let frame = match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Relay: unreadable frame");
                        continue;
                    }
                };

                match frame {
                    RelayFrame::Ready { session_id: id } => {
                        info!(session = %id, "Relay: identified");
                        *session_id.lock().await = Some(id);
                        *attempts = 0;
                    }
                    RelayFrame::Signal(message) => {
                        debug!(topic = %message.topic(), from = %message.from(), "Relay: signal received");
                        let _ = inbound.send(message);
                    }
                    RelayFrame::Error { code, message } => {
                        warn!(code, "Relay refused a frame: {message}");
                    }
                    RelayFrame::Identify { .. } => {}
                }
            }
        }
    }
}
