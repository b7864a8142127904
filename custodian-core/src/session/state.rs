//! Session lifecycle state and event types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an internal session
///
/// Transitions only move forward: `Inactive -> Valid -> Invalid -> Destroyed`,
/// with any step allowed to be skipped. Nothing leaves `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created but not yet authenticated
    Inactive,
    /// Authenticated and usable
    Valid,
    /// Rejected; will never become usable
    Invalid,
    /// Removed from service
    Destroyed,
}

impl SessionState {
    fn rank(&self) -> u8 {
        match self {
            SessionState::Inactive => 0,
            SessionState::Valid => 1,
            SessionState::Invalid => 2,
            SessionState::Destroyed => 3,
        }
    }

    /// Whether the session has left service for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Invalid | SessionState::Destroyed)
    }

    /// Whether moving to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Inactive => "INACTIVE",
            SessionState::Valid => "VALID",
            SessionState::Invalid => "INVALID",
            SessionState::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventType {
    Creation,
    IdleTimeout,
    MaxTimeout,
    Logout,
    Reactivation,
    Destroy,
    PropertyChanged,
    ProtectedProperty,
}

impl SessionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventType::Creation => "SESSION_CREATION",
            SessionEventType::IdleTimeout => "IDLE_TIMEOUT",
            SessionEventType::MaxTimeout => "MAX_TIMEOUT",
            SessionEventType::Logout => "LOGOUT",
            SessionEventType::Reactivation => "REACTIVATION",
            SessionEventType::Destroy => "DESTROY",
            SessionEventType::PropertyChanged => "PROPERTY_CHANGED",
            SessionEventType::ProtectedProperty => "PROTECTED_PROPERTY",
        }
    }

    /// Whether this event ends a session because a lifetime ran out
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionEventType::IdleTimeout | SessionEventType::MaxTimeout
        )
    }
}

impl fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
