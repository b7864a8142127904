//! Routing of session operations by session kind.
//!
//! Stateful and stateless sessions keep their authoritative state in
//! different places, so each kind gets its own [`SessionOperations`]
//! implementation. The choice is a pure function of the id's kind tag.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::credential::SsoToken;
use crate::error::Result;
use crate::session::{
    PartialSession, SearchResults, Session, SessionId, SessionInfo, SessionKind, SessionQuery,
    TokenRestriction,
};

/// Operations a session kind must supply
///
/// Every method may fail with [`crate::SessionError::OperationFailed`] or
/// [`crate::SessionError::PermissionDenied`].
#[async_trait]
pub trait SessionOperations: Send + Sync {
    /// The session for `id`, or `None` if it is unknown
    async fn resolve_session(&self, id: &SessionId) -> Result<Option<Session>>;

    /// Destroy `session` if `requester` is allowed to; `None` is a no-op
    async fn destroy(&self, requester: &Session, session: Option<Session>) -> Result<()>;

    async fn check_session_exists(&self, id: &SessionId) -> Result<bool>;

    /// Snapshot of the session, optionally resetting its idle time
    async fn get_session_info(&self, id: &SessionId, reset: bool) -> Result<SessionInfo>;

    /// Sessions visible to `session` whose client id matches `pattern`
    async fn get_valid_sessions(
        &self,
        session: &Session,
        pattern: Option<&str>,
    ) -> Result<SearchResults<SessionInfo>>;

    async fn get_matching_sessions(&self, query: &SessionQuery) -> Result<Vec<PartialSession>>;

    async fn logout(&self, session: &Session) -> Result<()>;

    /// Register a notification endpoint for `session`
    async fn add_session_listener(&self, session: &Session, url: &str) -> Result<()>;

    /// The master session behind a restricted token id
    async fn deference_restricted_id(
        &self,
        session: &Session,
        restricted_id: &SessionId,
    ) -> Result<SessionId>;

    async fn set_external_property(
        &self,
        client: &SsoToken,
        id: &SessionId,
        name: &str,
        value: &str,
    ) -> Result<()>;

    /// Issue (or look up) a restricted token id for the master session
    async fn get_restricted_token_id(
        &self,
        master: &SessionId,
        restriction: &TokenRestriction,
    ) -> Result<SessionId>;
}

/// Selects the [`SessionOperations`] matching a session id
#[derive(Clone)]
pub struct SessionOperationDispatcher {
    stateful: Arc<dyn SessionOperations>,
    stateless: Arc<dyn SessionOperations>,
}

impl SessionOperationDispatcher {
    pub fn new(
        stateful: Arc<dyn SessionOperations>,
        stateless: Arc<dyn SessionOperations>,
    ) -> Self {
        Self {
            stateful,
            stateless,
        }
    }

    /// The implementation responsible for `id`
    pub fn get_operation(&self, id: &SessionId) -> &Arc<dyn SessionOperations> {
        let operations = match id.kind() {
            SessionKind::Stateful => &self.stateful,
            SessionKind::Stateless => &self.stateless,
        };
        debug!(session_id = %id, kind = ?id.kind(), "Routing session operation");
        operations
    }

    /// Parse `encoded` and select its implementation.
    ///
    /// Fails with [`crate::SessionError::InvalidSessionId`] if the id is malformed.
    pub fn get_operation_for(
        &self,
        encoded: &str,
    ) -> Result<(SessionId, &Arc<dyn SessionOperations>)> {
        let id = SessionId::parse(encoded)?;
        let operations = self.get_operation(&id);
        Ok((id, operations))
    }
}

impl std::fmt::Debug for SessionOperationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOperationDispatcher").finish_non_exhaustive()
    }
}
