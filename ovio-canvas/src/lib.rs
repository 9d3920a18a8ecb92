//! # ovio-canvas — canvas document model for the Ovio editor
//!
//! A project's canvas is an ordered list of [`PlacedComponent`]s, each with a
//! position, a free-form property bag and a list of attached [`Action`]s.
//! [`CanvasDocument`] offers the synchronous CRUD the editor performs on it;
//! persistence and realtime sync live in `ovio-sync`.
//!
//! ```text
//! CanvasDocument (project_id)
//!   └── PlacedComponent  "button-1717171717171"  (x, y, props)
//!         └── Action     "action-1717171717200"  (type, config)
//! ```

pub mod action;
pub mod component;
pub mod document;
pub mod ids;

pub use action::{Action, ActionType};
pub use component::{ComponentKind, PlacedComponent, Position, Properties};
pub use document::CanvasDocument;
pub use ids::{ProjectId, UserId};
