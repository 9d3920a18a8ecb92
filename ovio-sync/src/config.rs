//! Session configuration.
//!
//! Defaults match a local development backend for REST and a local
//! `ovio-relay` for realtime. `from_env` overlays the
//! `OVIO_*` variables; the session binary layers its flags on top.

use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::coordinator::DEFAULT_QUIET_PERIOD;
use crate::server::default_relay_url;

pub const ENV_API_URL: &str = "OVIO_API_URL";
pub const ENV_WS_URL: &str = "OVIO_WS_URL";
pub const ENV_TOKEN: &str = "OVIO_TOKEN";
pub const ENV_QUIET_MS: &str = "OVIO_QUIET_MS";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Variable set but not parseable
    InvalidValue { key: &'static str, value: String },
    /// Quiet period must be positive
    ZeroQuietPeriod,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value } => write!(f, "Invalid value for {key}: {value:?}"),
            ConfigError::ZeroQuietPeriod => write!(f, "Quiet period must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST base url; `None` keeps documents in memory
    pub api_url: Option<String>,
    /// Realtime endpoint; `None` disables broadcast and presence
    pub ws_url: Option<String>,
    pub token: String,
    /// Autosave debounce
    pub quiet_period: Duration,
    pub request_timeout: Duration,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    /// Depth of the session's command and event queues
    pub buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: Some("http://localhost:5000".to_string()),
            ws_url: Some(default_relay_url()),
            token: String::new(),
            quiet_period: DEFAULT_QUIET_PERIOD,
            request_timeout: Duration::from_secs(10),
            connect_attempts: 5,
            retry_delay: Duration::from_millis(1000),
            buffer: 256,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = non_empty(url);
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            config.ws_url = non_empty(url);
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            config.token = token;
        }
        if let Some(raw) = lookup(ENV_QUIET_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_QUIET_MS,
                value: raw.clone(),
            })?;
            config.quiet_period = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quiet_period.is_zero() {
            return Err(ConfigError::ZeroQuietPeriod);
        }
        Ok(())
    }

    /// No backend at all: memory store, no channel.
    pub fn offline() -> Self {
        Self {
            api_url: None,
            ws_url: None,
            ..Self::default()
        }
    }

    pub fn channel_config(&self) -> Option<ChannelConfig> {
        let url = self.ws_url.clone()?;
        Some(ChannelConfig {
            url,
            max_attempts: self.connect_attempts,
            retry_delay: self.retry_delay,
            buffer: self.buffer,
        })
    }
}

/// Empty strings switch a url off.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
