//! Per-project fan-out for the relay server.
//!
//! Every project room shares one tokio broadcast channel. Frames are encoded
//! once and tagged with the sending connection so each receiver can skip its
//! own messages. A receiver that falls more than `capacity` frames behind
//! skips ahead (lagged) instead of blocking the room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use ovio_canvas::ProjectId;

use crate::protocol::{Collaborator, ProtocolError, ServerMessage};

/// One encoded frame on a room's broadcast channel.
#[derive(Debug, Clone)]
pub struct RoomFrame {
    /// Connection that caused the frame; `None` for frames meant for everyone
    pub origin: Option<Uuid>,
    pub text: Arc<String>,
}

impl RoomFrame {
    /// Whether `connection` should forward this frame to its socket.
    pub fn is_for(&self, connection: &Uuid) -> bool {
        self.origin.as_ref() != Some(connection)
    }
}

/// Snapshot of one room's counters.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub members: usize,
}

/// Members and fan-out channel of one project room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<RoomFrame>,
    /// Join order is kept so presence lists are stable
    members: RwLock<Vec<(Uuid, Collaborator)>>,
    capacity: usize,
    frames_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Empty room whose channel buffers up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: RwLock::new(Vec::new()),
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Register a connection and subscribe it to the room.
    pub async fn join(&self, connection: Uuid, user: Collaborator) -> broadcast::Receiver<RoomFrame> {
        let mut members = self.members.write().await;
        members.retain(|(id, _)| id != &connection);
        members.push((connection, user));
        self.sender.subscribe()
    }

    /// Remove a connection. Returns who it was, if it was a member.
    pub async fn leave(&self, connection: &Uuid) -> Option<Collaborator> {
        let mut members = self.members.write().await;
        let index = members.iter().position(|(id, _)| id == connection)?;
        Some(members.remove(index).1)
    }

    /// Number of connections in the room.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Members in join order, as sent in `presence_update`.
    pub async fn collaborators(&self) -> Vec<Collaborator> {
        self.members.read().await.iter().map(|(_, user)| user.clone()).collect()
    }

    /// Encode once and fan out. Returns the number of receivers reached.
    pub fn broadcast(&self, origin: Option<Uuid>, msg: &ServerMessage) -> Result<usize, ProtocolError> {
        let text = Arc::new(msg.encode()?);
        Ok(self.broadcast_encoded(origin, text))
    }

    /// Fan out an already encoded frame.
    pub fn broadcast_encoded(&self, origin: Option<Uuid>, text: Arc<String>) -> usize {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.sender.send(RoomFrame { origin, text }).unwrap_or(0)
    }

    /// Frames sent so far and current member count.
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            members: self.member_count().await,
        }
    }

    /// Per-room frame buffer size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Project id → room.
pub struct RoomManager {
    rooms: RwLock<HashMap<ProjectId, Arc<BroadcastGroup>>>,
    capacity: usize,
}

impl RoomManager {
    /// No rooms yet; each new room gets `capacity` frames of buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// The room for `project_id`, if one is open.
    pub async fn get(&self, project_id: &ProjectId) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(project_id).cloned()
    }

    /// Join the room for `project_id`, opening it if needed.
    ///
    /// Membership is registered under the rooms lock, so a concurrent
    /// `remove_if_empty` cannot close the room in between.
    pub async fn join(
        &self,
        project_id: &ProjectId,
        connection: Uuid,
        user: Collaborator,
    ) -> (Arc<BroadcastGroup>, broadcast::Receiver<RoomFrame>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(project_id.clone())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.capacity)))
            .clone();
        let frames = room.join(connection, user).await;
        (room, frames)
    }

    /// Drop the room once nobody is left in it.
    pub async fn remove_if_empty(&self, project_id: &ProjectId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(project_id) {
            if room.member_count().await == 0 {
                rooms.remove(project_id);
                log::debug!("Closed empty room {project_id}");
                return true;
            }
        }
        false
    }

    /// Number of open rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Projects that currently have an open room.
    pub async fn active_projects(&self) -> Vec<ProjectId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CanvasState;

    fn update(project: &str) -> ServerMessage {
        ServerMessage::StateUpdate {
            project_id: ProjectId::from(project),
            state: CanvasState { canvas: Vec::new() },
        }
    }

    #[tokio::test]
    async fn test_join_leave_keeps_order() {
        let group = BroadcastGroup::new(16);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _ra = group.join(a, Collaborator::new("1", "john")).await;
        let _rb = group.join(b, Collaborator::new("2", "sarah")).await;

        let names: Vec<String> = group.collaborators().await.into_iter().map(|c| c.username).collect();
        assert_eq!(names, vec!["john", "sarah"]);

        assert_eq!(group.leave(&a).await.map(|c| c.username), Some("john".to_string()));
        assert_eq!(group.leave(&a).await, None);
        assert_eq!(group.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_same_connection_replaces_entry() {
        let group = BroadcastGroup::new(16);
        let conn = Uuid::new_v4();
        let _r1 = group.join(conn, Collaborator::new("1", "john")).await;
        let _r2 = group.join(conn, Collaborator::new("1", "john")).await;
        assert_eq!(group.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_frames_skip_origin() {
        let group = BroadcastGroup::new(16);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut ra = group.join(a, Collaborator::new("1", "john")).await;
        let mut rb = group.join(b, Collaborator::new("2", "sarah")).await;

        assert_eq!(group.broadcast(Some(a), &update("7")).unwrap(), 2);

        let fa = ra.recv().await.unwrap();
        let fb = rb.recv().await.unwrap();
        assert!(!fa.is_for(&a));
        assert!(fb.is_for(&b));
        assert!(Arc::ptr_eq(&fa.text, &fb.text));
        assert_eq!(group.stats().await.frames_sent, 1);
    }

    #[tokio::test]
    async fn test_lagging_receiver_skips_ahead() {
        let group = BroadcastGroup::new(2);
        let conn = Uuid::new_v4();
        let mut rx = group.join(conn, Collaborator::new("1", "john")).await;

        for _ in 0..5 {
            group.broadcast(None, &update("7")).unwrap();
        }
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(3))));
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_room_manager_isolation_and_cleanup() {
        let manager = RoomManager::new(16);
        let p7 = ProjectId::from("7");
        let p8 = ProjectId::from("8");

        let (john, sarah) = (Uuid::new_v4(), Uuid::new_v4());
        let (room, _rx) = manager.join(&p7, john, Collaborator::new("1", "john")).await;
        let (same, _rx2) = manager.join(&p7, sarah, Collaborator::new("2", "sarah")).await;
        assert!(Arc::ptr_eq(&room, &same));
        let (_other, _rx3) = manager.join(&p8, Uuid::new_v4(), Collaborator::new("3", "ali")).await;
        assert_eq!(manager.room_count().await, 2);

        room.leave(&john).await;
        assert!(!manager.remove_if_empty(&p7).await);
        room.leave(&sarah).await;
        assert!(manager.remove_if_empty(&p7).await);
        assert_eq!(manager.active_projects().await, vec![p8]);
    }

    #[tokio::test]
    async fn test_manager_join_registers_member() {
        let manager = RoomManager::new(16);
        let p7 = ProjectId::from("7");
        let conn = Uuid::new_v4();

        let (room, _rx) = manager.join(&p7, conn, Collaborator::new("1", "john")).await;
        assert_eq!(room.member_count().await, 1);
        assert!(!manager.remove_if_empty(&p7).await);
        assert!(Arc::ptr_eq(&room, &manager.get(&p7).await.unwrap()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_never_lands_in_a_closed_room() {
        let manager = Arc::new(RoomManager::new(16));
        let p7 = ProjectId::from("7");

        let churn = {
            let manager = manager.clone();
            let p7 = p7.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let conn = Uuid::new_v4();
                    let (room, _rx) = manager.join(&p7, conn, Collaborator::new("1", "john")).await;
                    room.leave(&conn).await;
                    manager.remove_if_empty(&p7).await;
                }
            })
        };

        for _ in 0..500 {
            let conn = Uuid::new_v4();
            let (room, _rx) = manager.join(&p7, conn, Collaborator::new("2", "sarah")).await;
            let open = manager.get(&p7).await.expect("room closed under a member");
            assert!(Arc::ptr_eq(&room, &open));
            room.leave(&conn).await;
            manager.remove_if_empty(&p7).await;
            tokio::task::yield_now().await;
        }
        churn.await.unwrap();
    }
}
