//! Snapshots and query types handed to callers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InternalSession, SessionState};

/// Point-in-time view of an internal session for transport, audit and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub client_id: Option<String>,
    pub domain: String,
    pub state: SessionState,
    pub stateless: bool,
    pub max_idle_minutes: i64,
    pub max_session_minutes: i64,
    /// Seconds since the session was last used.
    pub idle_seconds: i64,
    /// Seconds until the maximum lifetime is reached.
    pub time_left_seconds: i64,
    pub properties: BTreeMap<String, String>,
}

/// Reduced view returned by session searches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSession {
    pub session_handle: String,
    pub client_id: Option<String>,
    pub domain: String,
    pub latest_access_time: DateTime<Utc>,
    pub max_idle_expiration_time: DateTime<Utc>,
    pub max_session_expiration_time: DateTime<Utc>,
}

impl From<&InternalSession> for PartialSession {
    fn from(session: &InternalSession) -> Self {
        let last_access = session.last_access();
        Self {
            session_handle: session.id().to_handle().to_string(),
            client_id: session.client_id(),
            domain: session.domain().to_string(),
            latest_access_time: last_access,
            max_idle_expiration_time: last_access + session.max_idle(),
            max_session_expiration_time: session.created_at() + session.max_session(),
        }
    }
}

/// Whether a search returned everything it matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Success,
    SizeLimitExceeded,
}

/// Bounded search outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults<T> {
    pub entries: Vec<T>,
    pub status: SearchStatus,
}

impl<T> SearchResults<T> {
    /// Truncate `entries` to `limit`, flagging the result when anything was cut
    pub fn bounded(mut entries: Vec<T>, limit: usize) -> Self {
        let status = if entries.len() > limit {
            entries.truncate(limit);
            SearchStatus::SizeLimitExceeded
        } else {
            SearchStatus::Success
        };
        Self { entries, status }
    }
}

/// Criteria for [`crate::SessionOperations::get_matching_sessions`]
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl SessionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn matches(&self, session: &InternalSession) -> bool {
        let client_ok = match &self.client_id {
            Some(wanted) => session.client_id().as_deref() == Some(wanted.as_str()),
            None => true,
        };
        let domain_ok = match &self.domain {
            Some(wanted) => session.domain() == wanted,
            None => true,
        };
        client_ok && domain_ok
    }
}

/// Condition a restricted token is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRestriction {
    /// Usable only by the named agent
    Dn(String),
    /// Usable only from the given address
    Ip(String),
}

impl TokenRestriction {
    /// Whether a presenter with this distinguished name and address satisfies the restriction
    pub fn is_satisfied(&self, dn: &str, ip: &str) -> bool {
        match self {
            TokenRestriction::Dn(expected) => expected.eq_ignore_ascii_case(dn),
            TokenRestriction::Ip(expected) => expected == ip,
        }
    }
}
