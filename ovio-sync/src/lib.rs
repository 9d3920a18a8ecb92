//! # ovio-sync — persistence and realtime collaboration for Ovio projects
//!
//! Keeps a project's [`CanvasDocument`](ovio_canvas::CanvasDocument) in step
//! with the REST backend and with every other session editing the same
//! project.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   REST (load/save)   ┌───────────────┐
//! │ EditorSession │ ◄──────────────────► │ StateStore    │
//! │ (actor task)  │                      │ (HTTP/memory) │
//! └──────┬────────┘                      └───────────────┘
//!        │ SyncCoordinator (Loading → Ready, debounce, last-writer-wins)
//!        │ PresenceTracker
//!        ▼
//! ┌───────────────┐   JSON over ws       ┌───────────────┐
//! │RealtimeChannel│ ◄──────────────────► │ RelayServer   │
//! └───────────────┘                      │ (rooms)       │
//!                                        └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON event envelopes exchanged over the websocket
//! - [`persistence`]: `StateStore` trait with REST and in-memory backends
//! - [`channel`]: websocket client with bounded retries
//! - [`coordinator`]: the sync state machine (no I/O)
//! - [`presence`]: who else is in the project
//! - [`session`]: actor that wires the pieces together
//! - [`broadcast`] / [`server`]: reference relay server

pub mod broadcast;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod identity;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{BroadcastGroup, RoomManager};
pub use channel::{ChannelConfig, ChannelEvent, ChannelPublisher, ConnectionState, LoopbackPeer, RealtimeChannel};
pub use config::{ConfigError, SessionConfig};
pub use coordinator::{
    Commit, CommitRefusal, EditOutcome, LoadDecision, LocalEdit, Phase, RemoteDecision, SyncCoordinator,
    DEFAULT_QUIET_PERIOD,
};
pub use identity::Identity;
pub use persistence::{HttpStateStore, LoadOutcome, MemoryStateStore, PersistenceError, StateStore};
pub use presence::PresenceTracker;
pub use protocol::{CanvasState, ClientMessage, Collaborator, ProtocolError, ServerMessage};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use session::{
    ChangeOrigin, EditorSession, LoadSource, Notice, NoticeLevel, SessionError, SessionEvent, SessionHandle,
    SessionOptions,
};
