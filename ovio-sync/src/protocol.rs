//! JSON wire protocol for the realtime channel.
//!
//! Every websocket text frame carries one event envelope:
//! ```text
//! {"event": "state_update", "data": {"project_id": 7, "state": {"canvas": [...]}}}
//! ```
//!
//! Outbound (session → server): `join_project`, `leave_project`, `state_update`.
//! Inbound (server → session): `state_update`, `presence_update`, `collaborator_added`.
//!
//! Frames that fail to decode (unknown event, missing `project_id`, absent
//! `state.canvas`) are malformed and get dropped by the receiver.

use ovio_canvas::{PlacedComponent, ProjectId, UserId};
use serde::{Deserialize, Serialize};

/// Canvas payload shared by REST bodies and `state_update` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasState {
    pub canvas: Vec<PlacedComponent>,
}

/// A user viewing the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaborator {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Collaborator {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Full name when known, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }
}

/// Events a session sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinProject {
        project_id: ProjectId,
        user_id: UserId,
        username: String,
        name: String,
    },
    LeaveProject {
        project_id: ProjectId,
    },
    StateUpdate {
        project_id: ProjectId,
        state: CanvasState,
    },
}

impl ClientMessage {
    pub fn state_update(project_id: ProjectId, canvas: Vec<PlacedComponent>) -> Self {
        ClientMessage::StateUpdate {
            project_id,
            state: CanvasState { canvas },
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        match self {
            ClientMessage::JoinProject { project_id, .. }
            | ClientMessage::LeaveProject { project_id }
            | ClientMessage::StateUpdate { project_id, .. } => project_id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinProject { .. } => "join_project",
            ClientMessage::LeaveProject { .. } => "leave_project",
            ClientMessage::StateUpdate { .. } => "state_update",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Events the server pushes to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    StateUpdate {
        project_id: ProjectId,
        state: CanvasState,
    },
    PresenceUpdate {
        project_id: ProjectId,
        users: Vec<Collaborator>,
    },
    CollaboratorAdded {
        project_id: ProjectId,
        user: Collaborator,
    },
}

impl ServerMessage {
    pub fn project_id(&self) -> &ProjectId {
        match self {
            ServerMessage::StateUpdate { project_id, .. }
            | ServerMessage::PresenceUpdate { project_id, .. }
            | ServerMessage::CollaboratorAdded { project_id, .. } => project_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    NotConnected,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotConnected => write!(f, "Channel not connected"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use ovio_canvas::{ComponentKind, Position};
    use serde_json::json;

    #[test]
    fn test_join_wire_format() {
        let msg = ClientMessage::JoinProject {
            project_id: ProjectId::from("7"),
            user_id: UserId::from("3"),
            username: "sarah".into(),
            name: "Sarah".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "join_project",
                "data": {"project_id": "7", "user_id": "3", "username": "sarah", "name": "Sarah"}
            })
        );
        assert_eq!(msg.event_name(), "join_project");
    }

    #[test]
    fn test_state_update_from_backend() {
        // The backend emits integer project ids.
        let text = r#"{"event":"state_update","data":{"project_id":42,"state":{"canvas":[
            {"id":"button","uniqueId":"button-1","x":100,"y":100,"props":{},"actions":[]}
        ]}}}"#;
        let msg = ServerMessage::decode(text).unwrap();
        assert_eq!(msg.project_id(), &ProjectId::from("42"));
        match msg {
            ServerMessage::StateUpdate { state, .. } => {
                assert_eq!(state.canvas.len(), 1);
                assert_eq!(state.canvas[0].kind, ComponentKind::Button);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let missing_canvas = r#"{"event":"state_update","data":{"project_id":7,"state":{}}}"#;
        let missing_project = r#"{"event":"state_update","data":{"state":{"canvas":[]}}}"#;
        let unknown_event = r#"{"event":"cursor_moved","data":{"project_id":7}}"#;
        let not_json = "state_update";

        for text in [missing_canvas, missing_project, unknown_event, not_json] {
            assert!(
                matches!(ServerMessage::decode(text), Err(ProtocolError::DeserializationError(_))),
                "should reject {text}"
            );
        }
    }

    #[test]
    fn test_presence_messages() {
        let text = r#"{"event":"presence_update","data":{"project_id":"7","users":[
            {"id":1,"username":"john"},{"id":2,"username":"sarah","name":"Sarah K"}
        ]}}"#;
        match ServerMessage::decode(text).unwrap() {
            ServerMessage::PresenceUpdate { users, .. } => {
                assert_eq!(users[0].display_name(), "john");
                assert_eq!(users[1].display_name(), "Sarah K");
            }
            other => panic!("unexpected {other:?}"),
        }

        let added = ServerMessage::CollaboratorAdded {
            project_id: ProjectId::from("7"),
            user: Collaborator::new("9", "mike"),
        };
        let back = ServerMessage::decode(&added.encode().unwrap()).unwrap();
        assert_eq!(back, added);
    }

    #[test]
    fn test_client_state_update_carries_canvas() {
        let canvas = vec![PlacedComponent::new("card-1", ComponentKind::Card, Position::new(1.0, 2.0))];
        let msg = ClientMessage::state_update(ProjectId::from("7"), canvas.clone());
        // A relayed client frame decodes as the matching server event.
        let relayed = ServerMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            relayed,
            ServerMessage::StateUpdate {
                project_id: ProjectId::from("7"),
                state: CanvasState { canvas },
            }
        );
    }
}
