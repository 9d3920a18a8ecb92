//! Realtime channel to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle with bounded, fixed-delay retries
//! - Automatic reconnect, re-sending `join_project` for the current room
//! - Fire-and-forget state broadcast
//! - Inbound event stream filtered to the joined project
//!
//! ```text
//!  RealtimeChannel ── spawn ──► supervisor task
//!        │                        │  connect_async (≤ max_attempts)
//!        │ ChannelPublisher       │  run_session: outgoing ⇄ websocket
//!        ▼                        ▼
//!   mpsc<ClientMessage>      mpsc<ChannelEvent> ──► session
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ovio_canvas::{PlacedComponent, ProjectId};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::identity::Identity;
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::server::default_relay_url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Websocket endpoint
    pub url: String,
    /// Consecutive failed connection attempts before going offline
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Queue depth for outgoing messages and inbound events
    pub buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            max_attempts: 5,
            retry_delay: Duration::from_millis(1000),
            buffer: 256,
        }
    }
}

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Transport established (room membership re-sent)
    Connected,
    /// Established transport lost; reconnecting
    Disconnected,
    /// Retries exhausted; broadcast unavailable until restarted
    Offline { attempts: u32 },
    /// Inbound event for the joined project
    Message(ServerMessage),
}

/// Cloneable sending half of the channel.
#[derive(Clone)]
pub struct ChannelPublisher {
    outgoing: mpsc::Sender<ClientMessage>,
    state: watch::Receiver<ConnectionState>,
}

impl ChannelPublisher {
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Publish the document to the room. Dropped when not connected.
    ///
    /// Returns whether the message was queued for sending.
    pub fn broadcast_state(&self, project_id: ProjectId, canvas: Vec<PlacedComponent>) -> bool {
        if !self.is_connected() {
            log::debug!("Skipping broadcast for project {project_id}: channel not connected");
            return false;
        }
        match self.send(ClientMessage::state_update(project_id, canvas)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Broadcast dropped: {e}");
                false
            }
        }
    }

    fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        self.outgoing.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::NotConnected,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }
}

/// In-process stand-in for the server side of a loopback channel.
pub struct LoopbackPeer {
    /// Messages the channel would have written to the socket
    pub outgoing: mpsc::Receiver<ClientMessage>,
    /// Inject events as if they came from the socket
    pub events: mpsc::Sender<ChannelEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl LoopbackPeer {
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// The realtime channel.
pub struct RealtimeChannel {
    identity: Identity,
    config: ChannelConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Joined project; re-joined after every reconnect
    room: Arc<RwLock<Option<ProjectId>>>,
    outgoing_tx: mpsc::Sender<ClientMessage>,
    /// Handed to the supervisor on `connect`
    outgoing_rx: Option<mpsc::Receiver<ClientMessage>>,
    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    pub fn new(identity: Identity, config: ChannelConfig) -> Self {
        let (mut channel, outgoing_rx) = Self::build(identity, config);
        channel.outgoing_rx = Some(outgoing_rx);
        channel
    }

    /// Create a channel wired to in-process queues instead of a socket (for testing).
    ///
    /// The channel starts `Connected`; `connect` is a no-op.
    pub fn loopback(identity: Identity) -> (Self, LoopbackPeer) {
        let (channel, outgoing) = Self::build(identity, ChannelConfig::default());
        channel.state_tx.send_replace(ConnectionState::Connected);
        let peer = LoopbackPeer {
            outgoing,
            events: channel.event_tx.clone(),
            state: channel.state_tx.clone(),
        };
        (channel, peer)
    }

    fn build(identity: Identity, config: ChannelConfig) -> (Self, mpsc::Receiver<ClientMessage>) {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.buffer);
        let (event_tx, event_rx) = mpsc::channel(config.buffer);
        let (shutdown_tx, _) = watch::channel(false);
        let channel = Self {
            identity,
            config,
            state_tx: Arc::new(state_tx),
            room: Arc::new(RwLock::new(None)),
            outgoing_tx,
            outgoing_rx: None,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            task: None,
        };
        (channel, outgoing_rx)
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    pub fn publisher(&self) -> ChannelPublisher {
        ChannelPublisher {
            outgoing: self.outgoing_tx.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn room(&self) -> Option<ProjectId> {
        self.room.read().await.clone()
    }

    /// Start the transport supervisor. Returns immediately; progress is
    /// reported through [`ChannelEvent`]s. Calling it again is a no-op.
    pub fn connect(&mut self) {
        let Some(outgoing_rx) = self.outgoing_rx.take() else {
            return;
        };

        let supervisor = Supervisor {
            config: self.config.clone(),
            identity: self.identity.clone(),
            state_tx: self.state_tx.clone(),
            room: self.room.clone(),
            outgoing_rx,
            event_tx: self.event_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        self.task = Some(tokio::spawn(supervisor.run()));
    }

    /// Announce presence in a project room.
    ///
    /// Sent now if connected; the supervisor re-sends it after each reconnect.
    pub async fn join_room(&self, project_id: ProjectId) {
        *self.room.write().await = Some(project_id.clone());
        if self.connection_state() == ConnectionState::Connected {
            let join = self.identity.join_message(project_id);
            if let Err(e) = self.publisher().send(join) {
                log::warn!("Could not queue join: {e}");
            }
        }
    }

    /// Leave the current room, if any.
    pub async fn leave_room(&self) {
        let Some(project_id) = self.room.write().await.take() else {
            return;
        };
        if self.connection_state() == ConnectionState::Connected {
            let _ = self.publisher().send(ClientMessage::LeaveProject { project_id });
        }
    }

    /// Leave the room and stop the transport. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        self.leave_room().await;
        self.shutdown_tx.send_replace(true);

        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                log::warn!("Channel supervisor did not stop in time");
            }
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

enum Step {
    Outgoing(Option<ClientMessage>),
    Inbound(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Shutdown,
}

/// Owns the socket for the lifetime of the channel.
struct Supervisor {
    config: ChannelConfig,
    identity: Identity,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    room: Arc<RwLock<Option<ProjectId>>>,
    outgoing_rx: mpsc::Receiver<ClientMessage>,
    event_tx: mpsc::Sender<ChannelEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut failures = 0u32;
        let mut ever_connected = false;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.state_tx.send_replace(if ever_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            let attempt = tokio::select! {
                result = tokio_tungstenite::connect_async(self.config.url.as_str()) => Some(result),
                _ = self.shutdown_rx.changed() => None,
            };
            let Some(attempt) = attempt else { break };

            match attempt {
                Ok((ws, _)) => {
                    failures = 0;
                    ever_connected = true;
                    self.discard_stale_outgoing();
                    self.state_tx.send_replace(ConnectionState::Connected);
                    log::info!("Channel connected to {}", self.config.url);
                    let _ = self.event_tx.send(ChannelEvent::Connected).await;

                    match self.run_session(ws).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost => {
                            log::warn!("Channel connection to {} lost", self.config.url);
                            self.state_tx.send_replace(ConnectionState::Reconnecting);
                            let _ = self.event_tx.send(ChannelEvent::Disconnected).await;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "Channel connect attempt {failures}/{} to {} failed: {e}",
                        self.config.max_attempts,
                        self.config.url
                    );
                    if failures >= self.config.max_attempts {
                        log::warn!("Giving up on realtime channel; continuing local-only");
                        self.state_tx.send_replace(ConnectionState::Disconnected);
                        let _ = self.event_tx.send(ChannelEvent::Offline { attempts: failures }).await;
                        return;
                    }
                }
            }

            let stop = tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => false,
                _ = self.shutdown_rx.changed() => true,
            };
            if stop {
                break;
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        log::debug!("Channel supervisor stopped");
    }

    /// Anything queued while the socket was down predates the reconnect.
    fn discard_stale_outgoing(&mut self) {
        while let Ok(msg) = self.outgoing_rx.try_recv() {
            log::debug!("Dropping queued {} from before reconnect", msg.event_name());
        }
    }

    async fn run_session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        let room = self.room.read().await.clone();
        if let Some(project_id) = room {
            let join = self.identity.join_message(project_id.clone());
            if send_message(&mut sink, &join).await.is_err() {
                return SessionEnd::Lost;
            }
            log::info!("Joined project {project_id} as {}", self.identity.username);
        }

        loop {
            let step = tokio::select! {
                biased;
                msg = self.outgoing_rx.recv() => Step::Outgoing(msg),
                frame = stream.next() => Step::Inbound(frame),
                _ = self.shutdown_rx.changed() => Step::Shutdown,
            };

            match step {
                Step::Outgoing(Some(msg)) => {
                    if send_message(&mut sink, &msg).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                Step::Outgoing(None) => return SessionEnd::Shutdown,
                Step::Inbound(Some(Ok(Message::Text(text)))) => self.handle_inbound(text.as_str()).await,
                Step::Inbound(Some(Ok(Message::Close(_)))) | Step::Inbound(Some(Err(_))) | Step::Inbound(None) => {
                    return SessionEnd::Lost;
                }
                Step::Inbound(Some(Ok(_))) => {}
                Step::Shutdown => {
                    // Flush what was queued before the shutdown (typically leave_project).
                    while let Ok(msg) = self.outgoing_rx.try_recv() {
                        let _ = send_message(&mut sink, &msg).await;
                    }
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    async fn handle_inbound(&self, text: &str) {
        let msg = match ServerMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Discarding malformed frame: {e}");
                return;
            }
        };

        let joined = self.room.read().await.clone();
        if joined.as_ref() != Some(msg.project_id()) {
            log::debug!(
                "Discarding event for project {} (joined: {:?})",
                msg.project_id(),
                joined.as_ref().map(ProjectId::as_str)
            );
            return;
        }

        let _ = self.event_tx.send(ChannelEvent::Message(msg)).await;
    }
}

async fn send_message<S>(sink: &mut S, msg: &ClientMessage) -> Result<(), ProtocolError>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let text = msg.encode()?;
    log::debug!("→ {}", msg.event_name());
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)
}
