//! Terminal editing session for an Ovio project.
//!
//! Loads the project canvas, joins its realtime room and applies line
//! commands from stdin. Edits autosave after the quiet period; `save`
//! commits immediately.

mod commands;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use ovio_canvas::ProjectId;
use ovio_sync::channel::RealtimeChannel;
use ovio_sync::config::SessionConfig;
use ovio_sync::coordinator::EditOutcome;
use ovio_sync::identity::Identity;
use ovio_sync::persistence::{HttpStateStore, MemoryStateStore, StateStore};
use ovio_sync::session::{
    ChangeOrigin, EditorSession, LoadSource, NoticeLevel, SessionError, SessionEvent, SessionHandle, SessionOptions,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::commands::Command;

/// Session command line arguments.
///
/// Unset options fall back to OVIO_API_URL, OVIO_WS_URL, OVIO_TOKEN and
/// OVIO_QUIET_MS.
#[derive(Parser, Debug)]
#[command(name = "ovio-session")]
#[command(about = "Edit an Ovio project canvas from the terminal")]
struct Args {
    /// Project to open
    project_id: String,

    /// REST base url
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Realtime websocket url
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long)]
    token: Option<String>,

    /// Autosave quiet period in milliseconds
    #[arg(long, value_name = "MS")]
    quiet_ms: Option<u64>,

    /// Keep everything in memory; no backend, no collaboration
    #[arg(long)]
    offline: bool,
}

impl Args {
    fn into_config(self, mut config: SessionConfig) -> Result<(ProjectId, SessionConfig), Box<dyn std::error::Error>> {
        if let Some(url) = self.api_url {
            config.api_url = Some(url);
        }
        if let Some(url) = self.ws_url {
            config.ws_url = Some(url);
        }
        if self.offline {
            config.api_url = None;
            config.ws_url = None;
        }
        if let Some(token) = self.token {
            config.token = token;
        }
        if let Some(ms) = self.quiet_ms {
            config.quiet_period = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok((ProjectId::from(self.project_id), config))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (project_id, config) = args.into_config(SessionConfig::from_env()?)?;

    info!("Opening project {project_id}");

    let (identity, store) = connect_backend(&config).await?;
    let channel = config
        .channel_config()
        .map(|channel_config| RealtimeChannel::new(identity.clone(), channel_config));
    if channel.is_none() {
        info!("No realtime url configured; collaboration disabled");
    }

    let options = SessionOptions {
        project_id,
        quiet_period: config.quiet_period,
        buffer: config.buffer,
    };
    let (mut handle, task) = EditorSession::spawn(options, store, channel);
    if let Some(events) = handle.take_events() {
        tokio::spawn(print_events(events));
    }

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match commands::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(cmd)) => {
                if let Err(e) = execute(&handle, cmd).await {
                    eprintln!("error: {e}");
                    if e == SessionError::Closed {
                        break;
                    }
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    handle.teardown().await;
    task.await?;
    Ok(())
}

/// Resolve who we are and where documents live.
async fn connect_backend(config: &SessionConfig) -> Result<(Identity, Arc<dyn StateStore>), Box<dyn std::error::Error>> {
    let Some(api_url) = config.api_url.as_deref() else {
        info!("Offline session; documents are kept in memory");
        return Ok((Identity::local("guest"), Arc::new(MemoryStateStore::new())));
    };

    let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
    let identity = if config.token.is_empty() {
        warn!("No token configured; saving will likely be rejected");
        Identity::local("guest")
    } else {
        match Identity::fetch(&client, api_url, &config.token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Could not resolve user ({e}); continuing as guest");
                Identity::new("guest", "guest", config.token.clone())
            }
        }
    };

    let store = HttpStateStore::with_client(client, api_url, identity.clone());
    Ok((identity, Arc::new(store)))
}

async fn execute(handle: &SessionHandle, cmd: Command) -> Result<(), SessionError> {
    match cmd {
        Command::Edit(edit) => match handle.edit(edit).await? {
            EditOutcome::ComponentAdded(c) => println!("added {}", c.unique_id),
            EditOutcome::ActionAdded { component_id, action } => {
                println!("added {} to {component_id}", action.id)
            }
            EditOutcome::Updated => {}
            EditOutcome::Unchanged => println!("nothing changed"),
        },
        Command::Save => {
            handle.save_now().await?;
            println!("saved");
        }
        Command::List => {
            let canvas = handle.snapshot().await?;
            if canvas.is_empty() {
                println!("(empty canvas)");
            }
            for c in canvas {
                println!(
                    "{:<24} {:<10} ({}, {})  props={}  actions={}",
                    c.unique_id,
                    c.kind.as_str(),
                    c.position.x,
                    c.position.y,
                    serde_json::Value::Object(c.properties.clone()),
                    c.actions.iter().map(|a| format!("{}:{}", a.id, a.action_type)).collect::<Vec<_>>().join(",")
                );
            }
        }
        Command::Who => {
            let users = handle.collaborators().await?;
            if users.is_empty() {
                println!("nobody else here");
            }
            for user in users {
                println!("{} ({})", user.display_name(), user.id);
            }
        }
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Loaded { components, source } => match source {
                LoadSource::Stored => println!("loaded {components} components"),
                LoadSource::Empty => println!("new project, canvas is empty"),
                LoadSource::Failed => println!("working locally with {components} components"),
            },
            SessionEvent::DocumentChanged { origin: ChangeOrigin::Remote } => {
                println!("canvas updated by a collaborator")
            }
            SessionEvent::DocumentChanged { .. } => {}
            SessionEvent::PresenceChanged(users) => {
                let names: Vec<&str> = users.iter().map(|u| u.display_name()).collect();
                println!("online: {}", names.join(", "));
            }
            SessionEvent::Committed { components, saved: true, .. } => {
                log::debug!("committed {components} components")
            }
            SessionEvent::Committed { .. } => {}
            SessionEvent::Notice(notice) => match notice.level {
                NoticeLevel::Info => println!("note: {}", notice.message),
                NoticeLevel::Warning => println!("warning: {}", notice.message),
            },
        }
    }
}
