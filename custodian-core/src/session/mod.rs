//! Session identity, records and snapshots
//!
//! - [`SessionId`] - parsed identifier with kind, handle flag and server locator
//! - [`InternalSession`] - the authoritative, mutable server-side record
//! - [`Session`] - the lightweight handle clients hold
//! - [`SessionInfo`] / [`PartialSession`] - immutable snapshots for callers

mod id;
mod info;
mod internal;
mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use id::{SessionId, SessionKind};
pub use info::{
    PartialSession, SearchResults, SearchStatus, SessionInfo, SessionQuery, TokenRestriction,
};
pub use internal::{
    InternalSession, InternalSessionFactory, PROTECTED_PROPERTY_PREFIX, is_protected_property,
};
pub use state::{SessionEventType, SessionState};

/// Client-facing handle to a session
///
/// Carries no state of its own; everything is resolved through the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl From<SessionId> for Session {
    fn from(id: SessionId) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.id)
    }
}
