//! Session identifiers.
//!
//! Encoded form: `[shandle:]<KIND>-<opaque>@<server_id>`, where KIND is `SF`
//! for stateful and `SL` for stateless sessions. The `shandle:` prefix marks
//! a client-visible handle, which can name a session but never recover it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

const HANDLE_PREFIX: &str = "shandle:";

/// Where a session's authoritative state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// State held in the server registry
    Stateful,
    /// State carried entirely by the token
    Stateless,
}

impl SessionKind {
    fn code(&self) -> &'static str {
        match self {
            SessionKind::Stateful => "SF",
            SessionKind::Stateless => "SL",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "SF" => Some(SessionKind::Stateful),
            "SL" => Some(SessionKind::Stateless),
            _ => None,
        }
    }
}

/// Immutable, parsed session identifier
///
/// Equality and hashing use the encoded form only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId {
    encoded: String,
    kind: SessionKind,
    handle: bool,
    opaque: String,
    server_id: String,
}

impl SessionId {
    /// Build a full (non-handle) identifier
    pub fn new(kind: SessionKind, opaque: impl Into<String>, server_id: impl Into<String>) -> Self {
        let opaque = opaque.into();
        let server_id = server_id.into();
        Self {
            encoded: format!("{}-{}@{}", kind.code(), opaque, server_id),
            kind,
            handle: false,
            opaque,
            server_id,
        }
    }

    /// Parse an encoded identifier
    pub fn parse(encoded: &str) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidSessionId(encoded.to_string());

        let (handle, body) = match encoded.strip_prefix(HANDLE_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, encoded),
        };
        let (head, server_id) = body.rsplit_once('@').ok_or_else(invalid)?;
        let (code, opaque) = head.split_once('-').ok_or_else(invalid)?;
        let kind = SessionKind::from_code(code).ok_or_else(invalid)?;

        if opaque.is_empty() || server_id.is_empty() || server_id.contains(':') {
            return Err(invalid());
        }

        Ok(Self {
            encoded: encoded.to_string(),
            kind,
            handle,
            opaque: opaque.to_string(),
            server_id: server_id.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_stateless(&self) -> bool {
        self.kind == SessionKind::Stateless
    }

    /// Whether this is a client-visible handle rather than a session id
    pub fn is_session_handle(&self) -> bool {
        self.handle
    }

    /// Locator of the server owning the session
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn opaque(&self) -> &str {
        &self.opaque
    }

    /// The client-visible handle for this session
    pub fn to_handle(&self) -> SessionId {
        if self.handle {
            return self.clone();
        }
        Self {
            encoded: format!("{HANDLE_PREFIX}{}", self.encoded),
            handle: true,
            ..self.clone()
        }
    }
}

impl PartialEq for SessionId {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for SessionId {}

impl Hash for SessionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl PartialOrd for SessionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SessionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.encoded
    }
}
