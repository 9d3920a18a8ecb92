//! One editor session: a project document kept in sync with the backend and
//! with other sessions.
//!
//! ```text
//!  SessionHandle ── Command ──►  actor task  ◄── ChannelEvent ── RealtimeChannel
//!        ▲                        │  SyncCoordinator
//!        │ SessionEvent           │  PresenceTracker
//!        └────────────────────────┤
//!                                 ├── spawn ──► loader     (load_state, once)
//!                                 └── Commit ─► committer  (save_state, then broadcast)
//! ```
//!
//! All document mutation happens on the actor task. Persistence runs on the
//! loader and committer tasks, so a slow backend never blocks edits. Commits
//! are executed in the order they were produced.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use ovio_canvas::{PlacedComponent, ProjectId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{ChannelEvent, ChannelPublisher, RealtimeChannel};
use crate::coordinator::{
    Commit, CommitRefusal, EditOutcome, LoadDecision, LoadTicket, LocalEdit, Phase, RemoteDecision,
    SyncCoordinator,
};
use crate::persistence::{LoadOutcome, PersistenceError, StateStore};
use crate::presence::PresenceTracker;
use crate::protocol::{Collaborator, ServerMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The session task has stopped
    Closed,
    /// Save requested while it cannot run
    Refused(CommitRefusal),
    Persistence(PersistenceError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Closed => write!(f, "Session closed"),
            SessionError::Refused(reason) => write!(f, "Save refused: {reason}"),
            SessionError::Persistence(e) => write!(f, "Save failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<PersistenceError> for SessionError {
    fn from(e: PersistenceError) -> Self {
        SessionError::Persistence(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Non-blocking message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Stored state installed
    Stored,
    /// Nothing stored yet
    Empty,
    /// Load failed; editing local-only
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
    Load,
}

/// Events reported to whoever drives the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Loaded { components: usize, source: LoadSource },
    DocumentChanged { origin: ChangeOrigin },
    PresenceChanged(Vec<Collaborator>),
    /// A commit finished; `saved` is false when persistence failed
    Committed { components: usize, saved: bool, broadcast: bool },
    Notice(Notice),
}

enum Command {
    Edit { edit: LocalEdit, reply: oneshot::Sender<EditOutcome> },
    SaveNow { reply: oneshot::Sender<Result<(), SessionError>> },
    Snapshot { reply: oneshot::Sender<Vec<PlacedComponent>> },
    Collaborators { reply: oneshot::Sender<Vec<Collaborator>> },
    Phase { reply: oneshot::Sender<Phase> },
    Teardown { reply: oneshot::Sender<()> },
}

/// Session parameters.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub project_id: ProjectId,
    pub quiet_period: Duration,
    pub buffer: usize,
}

impl SessionOptions {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            quiet_period: crate::coordinator::DEFAULT_QUIET_PERIOD,
            buffer: 256,
        }
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }
}

/// Client side of a running session.
pub struct SessionHandle {
    project_id: ProjectId,
    commands: mpsc::Sender<Command>,
    events: Option<mpsc::Receiver<SessionEvent>>,
}

impl SessionHandle {
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Take the event receiver (can only be called once).
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    pub async fn edit(&self, edit: LocalEdit) -> Result<EditOutcome, SessionError> {
        self.request(|reply| Command::Edit { edit, reply }).await
    }

    /// Commit immediately. Resolves once the save has completed.
    pub async fn save_now(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::SaveNow { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<Vec<PlacedComponent>, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn collaborators(&self) -> Result<Vec<Collaborator>, SessionError> {
        self.request(|reply| Command::Collaborators { reply }).await
    }

    pub async fn phase(&self) -> Result<Phase, SessionError> {
        self.request(|reply| Command::Phase { reply }).await
    }

    /// Stop the session. Safe to call more than once.
    pub async fn teardown(&self) {
        let _ = self.request(|reply| Command::Teardown { reply }).await;
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).await.map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

pub struct EditorSession;

impl EditorSession {
    /// Start a session for `options.project_id`.
    ///
    /// Loading starts immediately. With a channel, the session connects and
    /// joins the project room; without one it stays local-only.
    pub fn spawn(
        options: SessionOptions,
        store: Arc<dyn StateStore>,
        channel: Option<RealtimeChannel>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(options.buffer);
        let (event_tx, event_rx) = mpsc::channel(options.buffer);

        let handle = SessionHandle {
            project_id: options.project_id.clone(),
            commands: command_tx,
            events: Some(event_rx),
        };
        let task = tokio::spawn(run(options, store, channel, command_rx, event_tx));
        (handle, task)
    }
}

type LoadResult = (LoadTicket, Result<LoadOutcome, PersistenceError>);

struct CommitJob {
    commit: Commit,
    reply: Option<oneshot::Sender<Result<(), SessionError>>>,
}

enum Step {
    Command(Option<Command>),
    Channel(Option<ChannelEvent>),
    Load(Option<LoadResult>),
    CommitDue,
}

struct Actor {
    coordinator: SyncCoordinator,
    presence: PresenceTracker,
    jobs: mpsc::UnboundedSender<CommitJob>,
    events: mpsc::Sender<SessionEvent>,
}

async fn run(
    options: SessionOptions,
    store: Arc<dyn StateStore>,
    mut channel: Option<RealtimeChannel>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
) {
    let project_id = options.project_id.clone();
    let mut channel_events = None;
    let mut publisher = None;
    if let Some(channel) = channel.as_mut() {
        channel_events = channel.take_event_rx();
        publisher = Some(channel.publisher());
        channel.connect();
        channel.join_room(project_id.clone()).await;
    }

    let (jobs, job_rx) = mpsc::unbounded_channel();
    let committer = tokio::spawn(run_committer(store.clone(), publisher, job_rx, events.clone()));

    let mut actor = Actor {
        coordinator: SyncCoordinator::new(project_id.clone(), options.quiet_period),
        presence: PresenceTracker::new(project_id.clone()),
        jobs,
        events,
    };

    let (load_tx, mut load_rx) = mpsc::channel::<LoadResult>(1);
    let ticket = actor.coordinator.begin_load();
    tokio::spawn(async move {
        let result = store.load_state(&project_id).await;
        let _ = load_tx.send((ticket, result)).await;
    });
    let mut loading = true;

    loop {
        let deadline = actor.coordinator.commit_deadline();
        let step = tokio::select! {
            cmd = commands.recv() => Step::Command(cmd),
            ev = recv_optional(&mut channel_events) => Step::Channel(ev),
            res = load_rx.recv(), if loading => Step::Load(res),
            _ = sleep_until_optional(deadline) => Step::CommitDue,
        };

        match step {
            Step::Command(Some(cmd)) => {
                if actor.handle_command(cmd, channel.as_mut()).await.is_break() {
                    break;
                }
            }
            Step::Command(None) => {
                log::debug!("All session handles dropped");
                actor.teardown(channel.as_mut()).await;
                break;
            }
            Step::Channel(Some(ev)) => actor.handle_channel_event(ev),
            Step::Channel(None) => channel_events = None,
            Step::Load(Some((ticket, result))) => {
                loading = false;
                actor.handle_load(ticket, result);
            }
            Step::Load(None) => loading = false,
            Step::CommitDue => {
                if let Some(commit) = actor.coordinator.poll_commit(Instant::now()) {
                    actor.dispatch(commit, None);
                }
            }
        }
    }

    // Let queued saves finish before the task ends.
    drop(actor);
    let _ = committer.await;
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("Session event dropped: {e}");
        }
    }

    fn notice(&self, notice: Notice) {
        self.emit(SessionEvent::Notice(notice));
    }

    /// Breaks once the session has been torn down.
    async fn handle_command(&mut self, cmd: Command, channel: Option<&mut RealtimeChannel>) -> ControlFlow<()> {
        match cmd {
            Command::Edit { edit, reply } => {
                let outcome = self.coordinator.apply_local(edit, Instant::now());
                if outcome.changed() {
                    self.emit(SessionEvent::DocumentChanged { origin: ChangeOrigin::Local });
                }
                let _ = reply.send(outcome);
            }
            Command::SaveNow { reply } => match self.coordinator.commit_now() {
                Ok(commit) => self.dispatch(commit, Some(reply)),
                Err(reason) => {
                    self.notice(Notice::info(format!("Not saved: {reason}")));
                    let _ = reply.send(Err(SessionError::Refused(reason)));
                }
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.coordinator.document().snapshot());
            }
            Command::Collaborators { reply } => {
                let _ = reply.send(self.presence.collaborators().to_vec());
            }
            Command::Phase { reply } => {
                let _ = reply.send(self.coordinator.phase());
            }
            Command::Teardown { reply } => {
                self.teardown(channel).await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_load(&mut self, ticket: LoadTicket, result: Result<LoadOutcome, PersistenceError>) {
        let (source, changed, discarded) = match self.coordinator.on_load_complete(ticket, result) {
            LoadDecision::Loaded { changed, discarded_edits } => (LoadSource::Stored, changed, discarded_edits),
            LoadDecision::Fresh { changed, discarded_edits } => (LoadSource::Empty, changed, discarded_edits),
            LoadDecision::Failed(e) => {
                self.notice(Notice::warning(format!("Could not load project, changes stay local: {e}")));
                (LoadSource::Failed, false, 0)
            }
            LoadDecision::Ignored => return,
        };
        if discarded > 0 {
            self.notice(Notice::info(format!(
                "{discarded} edit(s) made while loading were replaced by the saved project"
            )));
        }
        if changed {
            self.emit(SessionEvent::DocumentChanged { origin: ChangeOrigin::Load });
        }
        let components = self.coordinator.document().len();
        self.emit(SessionEvent::Loaded { components, source });
    }

    fn handle_channel_event(&mut self, ev: ChannelEvent) {
        match ev {
            ChannelEvent::Connected => log::info!("Realtime channel up for project {}", self.coordinator.project_id()),
            ChannelEvent::Disconnected => self.notice(Notice::info("Realtime connection lost, reconnecting")),
            ChannelEvent::Offline { attempts } => self.notice(Notice::warning(format!(
                "Realtime collaboration unavailable after {attempts} attempts, editing locally"
            ))),
            ChannelEvent::Message(ServerMessage::StateUpdate { project_id, state }) => {
                match self.coordinator.on_remote_state(&project_id, state.canvas) {
                    RemoteDecision::Applied { changed: true } => {
                        self.emit(SessionEvent::DocumentChanged { origin: ChangeOrigin::Remote });
                    }
                    RemoteDecision::Applied { changed: false } => {}
                    other => log::debug!("Remote state for {project_id} not applied: {other:?}"),
                }
            }
            ChannelEvent::Message(msg) => {
                if self.presence.apply(&msg) {
                    self.emit(SessionEvent::PresenceChanged(self.presence.collaborators().to_vec()));
                }
            }
        }
    }

    fn dispatch(&self, commit: Commit, reply: Option<oneshot::Sender<Result<(), SessionError>>>) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(CommitJob { commit, reply }) {
            if let Some(reply) = job.reply {
                let _ = reply.send(Err(SessionError::Closed));
            }
        }
    }

    async fn teardown(&mut self, channel: Option<&mut RealtimeChannel>) {
        self.coordinator.teardown();
        if let Some(channel) = channel {
            channel.disconnect().await;
        }
        log::info!("Session for project {} closed", self.coordinator.project_id());
    }
}

/// Executes commits one at a time: save, then broadcast when connected.
async fn run_committer(
    store: Arc<dyn StateStore>,
    publisher: Option<ChannelPublisher>,
    mut jobs: mpsc::UnboundedReceiver<CommitJob>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(CommitJob { commit, reply }) = jobs.recv().await {
        let Commit { project_id, canvas } = commit;
        let components = canvas.len();

        let saved = store.save_state(&project_id, &canvas).await;
        if let Err(e) = &saved {
            log::warn!("Saving project {project_id} failed: {e}");
            let _ = events.try_send(SessionEvent::Notice(Notice::warning(format!("Save failed: {e}"))));
        } else {
            log::info!("Saved {components} components for project {project_id}");
        }

        let broadcast = publisher
            .as_ref()
            .is_some_and(|p| p.broadcast_state(project_id.clone(), canvas));

        let _ = events.try_send(SessionEvent::Committed { components, saved: saved.is_ok(), broadcast });
        if let Some(reply) = reply {
            let _ = reply.send(saved.map_err(SessionError::from));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStateStore;
    use ovio_canvas::{ComponentKind, Position};

    #[tokio::test(start_paused = true)]
    async fn test_offline_session_loads_empty_and_saves() {
        let store = Arc::new(MemoryStateStore::new());
        let (mut handle, task) = EditorSession::spawn(SessionOptions::new("7"), store.clone(), None);
        let mut events = handle.take_events().unwrap();
        assert!(handle.take_events().is_none());

        assert_eq!(events.recv().await, Some(SessionEvent::Loaded { components: 0, source: LoadSource::Empty }));
        assert_eq!(handle.phase().await.unwrap(), Phase::Ready);

        handle
            .edit(LocalEdit::AddComponent { kind: ComponentKind::Heading, position: Position::new(1.0, 2.0) })
            .await
            .unwrap();
        handle.save_now().await.unwrap();
        assert_eq!(store.get(&ProjectId::from("7")).await.map(|c| c.len()), Some(1));

        handle.teardown().await;
        task.await.unwrap();
        assert_eq!(handle.phase().await, Err(SessionError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_session() {
        let store = Arc::new(MemoryStateStore::new());
        let (handle, task) = EditorSession::spawn(SessionOptions::new("7"), store, None);
        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_ends_the_actor_and_is_idempotent() {
        let store = Arc::new(MemoryStateStore::new());
        let (handle, task) = EditorSession::spawn(SessionOptions::new("7"), store, None);
        assert_eq!(handle.phase().await.unwrap(), Phase::Ready);

        handle.teardown().await;
        task.await.unwrap();
        handle.teardown().await;
        let edit = LocalEdit::AddComponent { kind: ComponentKind::Text, position: Position::default() };
        assert_eq!(handle.edit(edit).await, Err(SessionError::Closed));
    }

    #[test]
    fn test_notice_constructors() {
        assert_eq!(Notice::warning("x").level, NoticeLevel::Warning);
        assert_eq!(Notice::info("y").message, "y");
    }
}
