//! Who the session is acting as.
//!
//! Passed explicitly to the persistence client and the realtime channel
//! rather than read from ambient storage.

use ovio_canvas::{ProjectId, UserId};
use serde::Deserialize;

use crate::persistence::PersistenceError;
use crate::protocol::{ClientMessage, Collaborator};

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    /// Bearer token for REST calls. Empty when running offline.
    pub token: String,
}

/// `/auth/me` answers either with the user object or wraps it in `user`.
#[derive(Deserialize)]
#[serde(untagged)]
enum MeResponse {
    Wrapped { user: MeUser },
    Bare(MeUser),
}

#[derive(Deserialize)]
struct MeUser {
    id: UserId,
    username: String,
    #[serde(default)]
    name: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>, token: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            user_id: user_id.into(),
            name: username.clone(),
            username,
            token: token.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Identity for a session with no backend.
    pub fn local(username: impl Into<String>) -> Self {
        Self::new("local", username, "")
    }

    /// `Authorization` header value, if a token is set.
    pub fn bearer(&self) -> Option<String> {
        (!self.token.is_empty()).then(|| format!("Bearer {}", self.token))
    }

    pub fn collaborator(&self) -> Collaborator {
        Collaborator::new(self.user_id.clone(), self.username.clone()).with_name(self.name.clone())
    }

    pub fn join_message(&self, project_id: ProjectId) -> ClientMessage {
        ClientMessage::JoinProject {
            project_id,
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
        }
    }

    /// Resolve the current user with `GET {api_url}/auth/me`.
    pub async fn fetch(
        client: &reqwest::Client,
        api_url: &str,
        token: &str,
    ) -> Result<Self, PersistenceError> {
        let url = format!("{}/auth/me", api_url.trim_end_matches('/'));
        let response = client.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PersistenceError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PersistenceError::Status(status.as_u16()));
        }

        let user = match response.json::<MeResponse>().await? {
            MeResponse::Wrapped { user } | MeResponse::Bare(user) => user,
        };
        log::info!("Authenticated as {} ({})", user.username, user.id);

        let name = user.name.unwrap_or_else(|| user.username.clone());
        Ok(Self::new(user.id, user.username, token).with_name(name))
    }
}
