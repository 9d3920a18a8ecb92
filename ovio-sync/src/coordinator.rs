//! Sync state machine for one editor session.
//!
//! ```text
//!            load completes (ok / not found / error)
//!  Loading ─────────────────────────────────────────► Ready
//!    │ remote state_update: discarded                 │ remote state_update: replaces components
//!    │ local edit: applied, no commit                 │ local edit: (re)arms commit timer
//!    │ save now: refused                              │ timer due / save now: Commit
//! ```
//!
//! The coordinator performs no I/O. The session driver feeds it events and
//! executes the [`Commit`]s it hands back. Time is passed in explicitly so
//! the debounce can be driven deterministically.

use std::time::Duration;

use ovio_canvas::{
    Action, ActionType, CanvasDocument, ComponentKind, PlacedComponent, Position, ProjectId, Properties,
};
use tokio::time::Instant;

use crate::persistence::{LoadOutcome, PersistenceError};

/// Quiet period after the last edit before autosave fires.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
}

/// Single-slot timer: scheduling replaces any pending deadline.
#[derive(Debug, Default)]
pub struct CommitTimer {
    deadline: Option<Instant>,
}

impl CommitTimer {
    pub fn schedule(&mut self, at: Instant) {
        self.deadline = Some(at);
    }

    /// Returns whether a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Clears and returns `true` once the deadline has passed.
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// A user edit to the canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEdit {
    AddComponent { kind: ComponentKind, position: Position },
    MoveComponent { id: String, position: Position },
    UpdateProperties { id: String, partial: Properties },
    AddAction { component_id: String, action_type: ActionType },
    UpdateActionConfig { component_id: String, action_id: String, partial: Properties },
    RemoveComponent { id: String },
    RemoveAction { component_id: String, action_id: String },
}

impl LocalEdit {
    pub fn apply(self, doc: &mut CanvasDocument) -> EditOutcome {
        let changed = match self {
            LocalEdit::AddComponent { kind, position } => {
                return EditOutcome::ComponentAdded(doc.add_component(kind, position));
            }
            LocalEdit::AddAction { component_id, action_type } => {
                return match doc.add_action(&component_id, action_type) {
                    Some(action) => EditOutcome::ActionAdded { component_id, action },
                    None => EditOutcome::Unchanged,
                };
            }
            LocalEdit::MoveComponent { id, position } => doc.move_component(&id, position),
            LocalEdit::UpdateProperties { id, partial } => doc.update_properties(&id, partial),
            LocalEdit::UpdateActionConfig { component_id, action_id, partial } => {
                doc.update_action_config(&component_id, &action_id, partial)
            }
            LocalEdit::RemoveComponent { id } => doc.remove_component(&id).is_some(),
            LocalEdit::RemoveAction { component_id, action_id } => {
                doc.remove_action(&component_id, &action_id).is_some()
            }
        };
        if changed {
            EditOutcome::Updated
        } else {
            EditOutcome::Unchanged
        }
    }
}

/// What a [`LocalEdit`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// Target missing or value already current
    Unchanged,
    Updated,
    ComponentAdded(PlacedComponent),
    ActionAdded { component_id: String, action: Action },
}

impl EditOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, EditOutcome::Unchanged)
    }
}

/// Identifies one `load_state` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum LoadDecision {
    /// Server state installed as the baseline. `discarded_edits` counts
    /// local edits made while loading that the baseline replaced.
    Loaded { changed: bool, discarded_edits: usize },
    /// No server state; starting from an empty canvas
    Fresh { changed: bool, discarded_edits: usize },
    /// Load failed; local state kept, editing continues local-only
    Failed(PersistenceError),
    /// Stale ticket, already Ready, or torn down
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    Applied { changed: bool },
    DiscardedWhileLoading,
    DiscardedForeignProject,
    DiscardedTornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitRefusal {
    /// The authoritative baseline has not arrived yet
    Loading,
    TornDown,
}

impl std::fmt::Display for CommitRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitRefusal::Loading => write!(f, "Project is still loading"),
            CommitRefusal::TornDown => write!(f, "Session has ended"),
        }
    }
}

/// Document state to save and broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub project_id: ProjectId,
    pub canvas: Vec<PlacedComponent>,
}

pub struct SyncCoordinator {
    document: CanvasDocument,
    phase: Phase,
    timer: CommitTimer,
    quiet_period: Duration,
    next_ticket: u64,
    pending_load: Option<LoadTicket>,
    /// Changed local edits applied while `Loading`
    provisional_edits: usize,
    torn_down: bool,
}

impl SyncCoordinator {
    /// Coordinator in `Loading` with an empty document.
    pub fn new(project_id: ProjectId, quiet_period: Duration) -> Self {
        Self {
            document: CanvasDocument::new(project_id),
            phase: Phase::Loading,
            timer: CommitTimer::default(),
            quiet_period,
            next_ticket: 0,
            pending_load: None,
            provisional_edits: 0,
            torn_down: false,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        self.document.project_id()
    }

    /// Current local document.
    pub fn document(&self) -> &CanvasDocument {
        &self.document
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// When the pending autosave is due, if any.
    pub fn commit_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Register a `load_state` request. Only the latest ticket is honoured.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.pending_load = Some(ticket);
        ticket
    }

    /// Install the result of the initial load and move to `Ready`.
    pub fn on_load_complete(
        &mut self,
        ticket: LoadTicket,
        result: Result<LoadOutcome, PersistenceError>,
    ) -> LoadDecision {
        if self.torn_down || self.phase == Phase::Ready || self.pending_load != Some(ticket) {
            log::debug!("Ignoring load result for ticket {:?}", ticket);
            return LoadDecision::Ignored;
        }
        self.pending_load = None;
        self.phase = Phase::Ready;
        let provisional = std::mem::take(&mut self.provisional_edits);
        let discarded = |changed: bool| if changed { provisional } else { 0 };

        match result {
            Ok(LoadOutcome::Loaded(canvas)) => {
                log::info!("Project {} ready with {} components", self.project_id(), canvas.len());
                let changed = self.document.replace_components(canvas);
                LoadDecision::Loaded { changed, discarded_edits: discarded(changed) }
            }
            Ok(LoadOutcome::NotFound) => {
                log::info!("Project {} has no saved state; starting empty", self.project_id());
                let changed = self.document.replace_components(Vec::new());
                LoadDecision::Fresh { changed, discarded_edits: discarded(changed) }
            }
            Err(e) => {
                log::warn!("Loading project {} failed, editing locally: {e}", self.project_id());
                LoadDecision::Failed(e)
            }
        }
    }

    /// Apply a user edit. In `Ready`, a change re-arms the commit timer.
    pub fn apply_local(&mut self, edit: LocalEdit, now: Instant) -> EditOutcome {
        if self.torn_down {
            return EditOutcome::Unchanged;
        }
        let outcome = edit.apply(&mut self.document);
        if outcome.changed() {
            match self.phase {
                Phase::Ready => self.timer.schedule(now + self.quiet_period),
                Phase::Loading => self.provisional_edits += 1,
            }
        }
        outcome
    }

    /// Accept or discard a peer's `state_update`. Never touches the timer.
    pub fn on_remote_state(&mut self, project_id: &ProjectId, canvas: Vec<PlacedComponent>) -> RemoteDecision {
        if self.torn_down {
            return RemoteDecision::DiscardedTornDown;
        }
        if project_id != self.project_id() {
            return RemoteDecision::DiscardedForeignProject;
        }
        if self.phase == Phase::Loading {
            log::debug!("Discarding remote state for {project_id}: initial load pending");
            return RemoteDecision::DiscardedWhileLoading;
        }
        RemoteDecision::Applied { changed: self.document.replace_components(canvas) }
    }

    /// The autosave, once its quiet period has elapsed.
    pub fn poll_commit(&mut self, now: Instant) -> Option<Commit> {
        if self.torn_down || !self.timer.take_if_due(now) {
            return None;
        }
        Some(self.commit())
    }

    /// Explicit save: cancels any pending autosave and commits immediately.
    pub fn commit_now(&mut self) -> Result<Commit, CommitRefusal> {
        if self.torn_down {
            return Err(CommitRefusal::TornDown);
        }
        if self.phase == Phase::Loading {
            return Err(CommitRefusal::Loading);
        }
        self.timer.cancel();
        Ok(self.commit())
    }

    /// Cancel the pending autosave and ignore all later continuations.
    pub fn teardown(&mut self) {
        if self.timer.cancel() {
            log::debug!("Dropping pending autosave for project {}", self.project_id());
        }
        self.pending_load = None;
        self.torn_down = true;
    }

    fn commit(&self) -> Commit {
        Commit {
            project_id: self.project_id().clone(),
            canvas: self.document.snapshot(),
        }
    }
}
