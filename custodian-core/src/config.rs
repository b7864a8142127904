//! Session service configuration.
//!
//! Loaded once at startup from the `[session]` table of a TOML file. Absent
//! keys take their defaults; the result is validated before use.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default server locator embedded in session identifiers
pub const DEFAULT_SERVER_ID: &str = "01";

/// Default ceiling on concurrently active sessions
pub const DEFAULT_MAX_SESSIONS: u64 = 5000;

/// Settings for the session service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionServiceConfig {
    /// Locator of this server, embedded in every session identifier.
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// Admission-control ceiling on active sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,

    /// Names of the timeout handlers run when a session expires.
    #[serde(default)]
    pub timeout_handlers: BTreeSet<String>,

    #[serde(default = "default_max_idle_minutes")]
    pub max_idle_minutes: u64,

    #[serde(default = "default_max_session_minutes")]
    pub max_session_minutes: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Bound of the outward notification queue.
    #[serde(default = "default_notification_queue_capacity")]
    pub notification_queue_capacity: usize,

    /// Buffer of the session event broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Identity treated as the super user, if any.
    #[serde(default)]
    pub super_user: Option<String>,

    /// Most sessions returned by a single search.
    #[serde(default = "default_max_session_list_size")]
    pub max_session_list_size: usize,
}

fn default_server_id() -> String {
    DEFAULT_SERVER_ID.to_string()
}

fn default_max_sessions() -> u64 {
    DEFAULT_MAX_SESSIONS
}

fn default_max_idle_minutes() -> u64 {
    30
}

fn default_max_session_minutes() -> u64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_notification_queue_capacity() -> usize {
    1024
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_max_session_list_size() -> usize {
    200
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            max_sessions: default_max_sessions(),
            timeout_handlers: BTreeSet::new(),
            max_idle_minutes: default_max_idle_minutes(),
            max_session_minutes: default_max_session_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            notification_queue_capacity: default_notification_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
            super_user: None,
            max_session_list_size: default_max_session_list_size(),
        }
    }
}

impl SessionServiceConfig {
    #[must_use]
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: u64) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    #[must_use]
    pub fn with_timeout_handler(mut self, name: impl Into<String>) -> Self {
        self.timeout_handlers.insert(name.into());
        self
    }

    #[must_use]
    pub fn with_super_user(mut self, super_user: impl Into<String>) -> Self {
        self.super_user = Some(super_user.into());
        self
    }

    #[must_use]
    pub fn with_lifetimes(mut self, max_idle_minutes: u64, max_session_minutes: u64) -> Self {
        self.max_idle_minutes = max_idle_minutes;
        self.max_session_minutes = max_session_minutes;
        self
    }

    pub fn max_idle(&self) -> TimeDelta {
        minutes(self.max_idle_minutes)
    }

    pub fn max_session(&self) -> TimeDelta {
        minutes(self.max_session_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_id.trim().is_empty() {
            return Err(ConfigError::Invalid("server_id must not be empty".into()));
        }
        if self.server_id.contains(['@', ':']) {
            return Err(ConfigError::Invalid(format!(
                "server_id {:?} must not contain '@' or ':'",
                self.server_id
            )));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be positive".into()));
        }
        if self.max_idle_minutes == 0 || self.max_session_minutes == 0 {
            return Err(ConfigError::Invalid(
                "session lifetimes must be positive".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if self.notification_queue_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be positive".into()));
        }
        Ok(())
    }
}

fn minutes(value: u64) -> TimeDelta {
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    session: SessionServiceConfig,
}

/// Reads [`SessionServiceConfig`] from TOML
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the `[session]` table of the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<SessionServiceConfig, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML document
    pub fn from_toml(contents: &str) -> Result<SessionServiceConfig, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        file.session.validate()?;
        Ok(file.session)
    }
}
