//! Reference relay for the realtime channel.
//!
//! ```text
//! Session A ──┐                         ┌──► Session B   state_update (not echoed to A)
//!             ├── Room (project_id) ────┤
//! Session C ──┘    BroadcastGroup       └──► everyone     presence_update
//! ```
//!
//! The relay holds no document state. It routes `state_update` to the other
//! members of a project room and keeps the presence list for each room.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use ovio_canvas::ProjectId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomFrame, RoomManager};
use crate::protocol::{ClientMessage, Collaborator, ServerMessage};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where `ovio-relay` listens unless told otherwise.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:9090";

/// Websocket url of a relay on [`DEFAULT_RELAY_ADDR`].
pub fn default_relay_url() -> String {
    format!("ws://{DEFAULT_RELAY_ADDR}")
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Frames buffered per member before it starts skipping
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_RELAY_ADDR.to_string(),
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub relayed_updates: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    relayed_updates: AtomicU64,
}

pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    counters: Arc<Counters>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn rooms(&self) -> Arc<RoomManager> {
        self.rooms.clone()
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            relayed_updates: self.counters.relayed_updates.load(Ordering::Relaxed),
            active_rooms: self.rooms.room_count().await,
        }
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let counters = self.counters.clone();
            tokio::spawn(async move {
                counters.total_connections.fetch_add(1, Ordering::Relaxed);
                counters.active_connections.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = handle_connection(stream, addr, &rooms, &counters).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                counters.active_connections.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}

/// A connection's membership in one room.
struct Membership {
    project_id: ProjectId,
    room: Arc<BroadcastGroup>,
    frames: broadcast::Receiver<RoomFrame>,
}

enum Step {
    Inbound(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Room(Result<RoomFrame, broadcast::error::RecvError>),
}

async fn next_frame(membership: &mut Option<Membership>) -> Result<RoomFrame, broadcast::error::RecvError> {
    match membership {
        Some(m) => m.frames.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: &RoomManager,
    counters: &Counters,
) -> Result<(), BoxError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let connection = Uuid::new_v4();
    let mut membership: Option<Membership> = None;
    log::info!("WebSocket connection {connection} established from {addr}");

    let result = pump(ws, addr, connection, &mut membership, rooms, counters).await;

    if let Some(m) = membership.take() {
        leave(m, connection, rooms).await;
    }
    result
}

async fn pump(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    connection: Uuid,
    membership: &mut Option<Membership>,
    rooms: &RoomManager,
    counters: &Counters,
) -> Result<(), BoxError> {
    let (mut sink, mut inbound) = ws.split();

    loop {
        let step = tokio::select! {
            frame = inbound.next() => Step::Inbound(frame),
            frame = next_frame(membership) => Step::Room(frame),
        };

        match step {
            Step::Inbound(Some(Ok(Message::Text(text)))) => {
                let msg = match ClientMessage::decode(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("Discarding malformed frame from {addr}: {e}");
                        continue;
                    }
                };
                handle_message(msg, connection, membership, rooms, counters).await?;
            }
            Step::Inbound(Some(Ok(Message::Ping(data)))) => sink.send(Message::Pong(data)).await?,
            Step::Inbound(Some(Ok(Message::Close(_)))) | Step::Inbound(None) => {
                log::info!("Connection closed from {addr}");
                return Ok(());
            }
            Step::Inbound(Some(Err(e))) => return Err(e.into()),
            Step::Inbound(Some(Ok(_))) => {}
            Step::Room(Ok(frame)) => {
                if frame.is_for(&connection) {
                    sink.send(Message::Text(frame.text.to_string().into())).await?;
                }
            }
            Step::Room(Err(broadcast::error::RecvError::Lagged(n))) => {
                log::warn!("Connection {connection} lagged by {n} frames");
            }
            Step::Room(Err(broadcast::error::RecvError::Closed)) => return Ok(()),
        }
    }
}

async fn handle_message(
    msg: ClientMessage,
    connection: Uuid,
    membership: &mut Option<Membership>,
    rooms: &RoomManager,
    counters: &Counters,
) -> Result<(), BoxError> {
    match msg {
        ClientMessage::JoinProject { project_id, user_id, username, name } => {
            if let Some(previous) = membership.take() {
                leave(previous, connection, rooms).await;
            }
            let user = Collaborator::new(user_id, username).with_name(name);
            let (room, frames) = rooms.join(&project_id, connection, user.clone()).await;
            log::info!("{} joined project {project_id}", user.display_name());

            room.broadcast(
                Some(connection),
                &ServerMessage::CollaboratorAdded { project_id: project_id.clone(), user },
            )?;
            let users = room.collaborators().await;
            room.broadcast(None, &ServerMessage::PresenceUpdate { project_id: project_id.clone(), users })?;

            *membership = Some(Membership { project_id, room, frames });
        }
        ClientMessage::StateUpdate { project_id, state } => match membership {
            Some(m) if m.project_id == project_id => {
                let reached = m.room.broadcast(Some(connection), &ServerMessage::StateUpdate { project_id, state })?;
                counters.relayed_updates.fetch_add(1, Ordering::Relaxed);
                log::debug!("Relayed state_update to {} receivers", reached.saturating_sub(1));
            }
            _ => log::warn!("Ignoring state_update for {project_id} from a connection outside that room"),
        },
        ClientMessage::LeaveProject { project_id } => {
            if membership.as_ref().is_some_and(|m| m.project_id == project_id) {
                if let Some(m) = membership.take() {
                    leave(m, connection, rooms).await;
                }
            }
        }
    }
    Ok(())
}

async fn leave(membership: Membership, connection: Uuid, rooms: &RoomManager) {
    let Membership { project_id, room, frames } = membership;
    drop(frames);

    if let Some(user) = room.leave(&connection).await {
        log::info!("{} left project {project_id}", user.display_name());
    }
    if room.member_count().await > 0 {
        let users = room.collaborators().await;
        if let Err(e) = room.broadcast(None, &ServerMessage::PresenceUpdate { project_id: project_id.clone(), users }) {
            log::error!("Could not announce departure in {project_id}: {e}");
        }
    }
    rooms.remove_if_empty(&project_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[tokio::test]
    async fn test_fresh_relay_stats() {
        let relay = RelayServer::with_defaults();
        let stats = relay.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_join_and_leave_announce_presence() {
        let rooms = RoomManager::new(16);
        let counters = Counters::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let join = |user: &str, id: &str| ClientMessage::JoinProject {
            project_id: ProjectId::from("7"),
            user_id: id.into(),
            username: user.into(),
            name: user.into(),
        };

        let mut ma = None;
        handle_message(join("john", "1"), a, &mut ma, &rooms, &counters).await.unwrap();
        let mut mb = None;
        handle_message(join("sarah", "2"), b, &mut mb, &rooms, &counters).await.unwrap();

        let frames = &mut ma.as_mut().unwrap().frames;
        // A's own collaborator_added is skipped by the origin tag.
        let own = frames.recv().await.unwrap();
        assert!(!own.is_for(&a));
        let presence = frames.recv().await.unwrap();
        assert!(presence.text.contains("presence_update"));
        let added = frames.recv().await.unwrap();
        assert!(added.is_for(&a) && added.text.contains("sarah"));

        handle_message(
            ClientMessage::LeaveProject { project_id: ProjectId::from("7") },
            b,
            &mut mb,
            &rooms,
            &counters,
        )
        .await
        .unwrap();
        assert!(mb.is_none());
        assert_eq!(rooms.get(&ProjectId::from("7")).await.unwrap().member_count().await, 1);

        leave(ma.take().unwrap(), a, &rooms).await;
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_state_update_outside_room_ignored() {
        let rooms = RoomManager::new(16);
        let counters = Counters::default();
        let mut membership = None;
        handle_message(
            ClientMessage::state_update(ProjectId::from("7"), Vec::new()),
            Uuid::new_v4(),
            &mut membership,
            &rooms,
            &counters,
        )
        .await
        .unwrap();
        assert_eq!(counters.relayed_updates.load(Ordering::Relaxed), 0);
        assert_eq!(rooms.room_count().await, 0);
    }
}
