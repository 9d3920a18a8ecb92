//! Who else is looking at the project.
//!
//! Presence is eventually consistent: `presence_update` replaces the whole
//! set, `collaborator_added` appends (deduplicated by id), and nothing else
//! removes entries.

use ovio_canvas::{ProjectId, UserId};

use crate::protocol::{Collaborator, ServerMessage};

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    project_id: ProjectId,
    collaborators: Vec<Collaborator>,
}

impl PresenceTracker {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            collaborators: Vec::new(),
        }
    }

    pub fn collaborators(&self) -> &[Collaborator] {
        &self.collaborators
    }

    pub fn len(&self) -> usize {
        self.collaborators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.collaborators.iter().any(|c| &c.id == id)
    }

    /// Replace the set wholesale. Duplicate ids in `users` keep the first entry.
    pub fn replace(&mut self, users: Vec<Collaborator>) {
        self.collaborators.clear();
        for user in users {
            self.add(user);
        }
    }

    /// Append unless already present. Returns whether the set grew.
    pub fn add(&mut self, user: Collaborator) -> bool {
        if self.contains(&user.id) {
            return false;
        }
        self.collaborators.push(user);
        true
    }

    /// Apply a presence event. Returns whether the set may have changed.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        if msg.project_id() != &self.project_id {
            return false;
        }
        match msg {
            ServerMessage::PresenceUpdate { users, .. } => {
                self.replace(users.clone());
                true
            }
            ServerMessage::CollaboratorAdded { user, .. } => self.add(user.clone()),
            ServerMessage::StateUpdate { .. } => false,
        }
    }
}
