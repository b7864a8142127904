//! Sessions still in the middle of authentication

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::{InternalSession, SessionId};

/// Holds sessions that have not finished authenticating
///
/// These are never in the main registry; a completed login moves the record
/// there.
pub trait AuthenticationSessionStore: Send + Sync {
    fn add_session(&self, session: Arc<InternalSession>);

    /// Remove and return the pending session for `id`
    fn remove_session(&self, id: &SessionId) -> Option<Arc<InternalSession>>;

    fn get_session(&self, id: &SessionId) -> Option<Arc<InternalSession>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuthenticationSessionStore {
    sessions: DashMap<SessionId, Arc<InternalSession>>,
}

impl InMemoryAuthenticationSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl AuthenticationSessionStore for InMemoryAuthenticationSessionStore {
    fn add_session(&self, session: Arc<InternalSession>) {
        self.sessions.insert(session.id().clone(), session);
    }

    fn remove_session(&self, id: &SessionId) -> Option<Arc<InternalSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    fn get_session(&self, id: &SessionId) -> Option<Arc<InternalSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }
}
