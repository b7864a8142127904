//! Registry of live internal sessions.
//!
//! The registry is the single source of truth for whether a session is
//! alive on this server. Both maps are sharded, so inserts and removals are
//! atomic per key and unrelated sessions never contend on one lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::session::{InternalSession, SessionEventType, SessionId, SessionState};

/// Concurrent map from session id to session record
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<InternalSession>>,
    /// Secondary ids (handles, restricted tokens) to primary ids
    aliases: DashMap<SessionId, SessionId>,
    /// Primary ids to the secondary ids pointing at them
    by_primary: DashMap<SessionId, Vec<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its id, together with its handle alias.
    ///
    /// A record that is already destroyed or invalid, or whose removal has
    /// started, can never be registered again.
    pub fn register(&self, session: Arc<InternalSession>) -> Result<()> {
        let id = session.id().clone();
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(SessionError::Duplicate(id.to_string())),
            Entry::Vacant(slot) => {
                Self::check_registrable(&session)?;
                // The shard stays locked until the slot is filled, so a
                // concurrent removal always sees the alias
                self.link(id.to_handle(), &id);
                slot.insert(session);
            }
        }
        debug!(session_id = %id, "Session registered");
        Ok(())
    }

    fn check_registrable(session: &InternalSession) -> Result<()> {
        let state = session.state();
        if state.is_terminal() {
            return Err(SessionError::InvalidStateTransition {
                from: state,
                to: SessionState::Valid,
            });
        }
        if session.is_removal_claimed() {
            return Err(SessionError::Validation(format!(
                "session {} is being removed",
                session.id()
            )));
        }
        Ok(())
    }

    /// Map a secondary id onto a registered session
    pub fn add_alias(&self, alias: SessionId, primary: &SessionId) -> Result<()> {
        // Holding the read guard keeps the primary from being removed meanwhile
        let Some(_guard) = self.sessions.get(primary) else {
            return Err(SessionError::NotFound(primary.to_string()));
        };
        self.link(alias, primary);
        Ok(())
    }

    fn link(&self, alias: SessionId, primary: &SessionId) {
        if let Some(previous) = self.aliases.insert(alias.clone(), primary.clone())
            && previous != *primary
            && let Some(mut list) = self.by_primary.get_mut(&previous)
        {
            list.retain(|a| *a != alias);
        }
        let mut list = self.by_primary.entry(primary.clone()).or_default();
        if !list.contains(&alias) {
            list.push(alias);
        }
    }

    /// Look a session up by primary id or alias
    pub fn get(&self, id: &SessionId) -> Option<Arc<InternalSession>> {
        if let Some(session) = self.sessions.get(id) {
            return Some(Arc::clone(session.value()));
        }
        let primary = self.aliases.get(id).map(|entry| entry.value().clone())?;
        self.sessions
            .get(&primary)
            .map(|session| Arc::clone(session.value()))
    }

    /// Look a session up by primary id only
    pub fn get_primary(&self, id: &SessionId) -> Option<Arc<InternalSession>> {
        self.sessions.get(id).map(|session| Arc::clone(session.value()))
    }

    /// Primary id an alias points at
    pub fn resolve_alias(&self, alias: &SessionId) -> Option<SessionId> {
        self.aliases.get(alias).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove exactly this record.
    ///
    /// A different record registered under the same id is left alone.
    /// Returns whether anything was removed.
    pub fn remove(&self, session: &Arc<InternalSession>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Drop every alias of `id`, and `id` itself if it is an alias.
    ///
    /// Only the keys recorded for `id` are touched.
    pub fn remove_session_id(&self, id: &SessionId) {
        if let Some((_, primary)) = self.aliases.remove(id)
            && let Some(mut list) = self.by_primary.get_mut(&primary)
        {
            list.retain(|alias| alias != id);
        }
        if let Some((_, aliases)) = self.by_primary.remove(id) {
            for alias in aliases {
                self.aliases.remove_if(&alias, |_, primary| primary == id);
            }
        }
    }

    /// Number of secondary ids currently mapped
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every registered session
    pub fn sessions(&self) -> Vec<Arc<InternalSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Sessions whose idle or max lifetime has run out at `now`
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(Arc<InternalSession>, SessionEventType)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value();
                session
                    .timeout_event(now)
                    .map(|event| (Arc::clone(session), event))
            })
            .collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}
