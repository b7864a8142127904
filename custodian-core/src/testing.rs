//! Test doubles shared by unit tests

use async_trait::async_trait;

use crate::credential::SsoToken;
use crate::dispatcher::SessionOperations;
use crate::error::{Result, SessionError};
use crate::session::{
    PartialSession, SearchResults, Session, SessionId, SessionInfo, SessionQuery,
    TokenRestriction,
};

/// Capabilities that fail every call; exercises the service's own paths
pub(crate) struct NoOperations;

#[async_trait]
impl SessionOperations for NoOperations {
    async fn resolve_session(&self, _id: &SessionId) -> Result<Option<Session>> {
        Ok(None)
    }

    async fn destroy(&self, _requester: &Session, _session: Option<Session>) -> Result<()> {
        Err(SessionError::OperationFailed("unsupported".to_string()))
    }

    async fn check_session_exists(&self, _id: &SessionId) -> Result<bool> {
        Ok(false)
    }

    async fn get_session_info(&self, id: &SessionId, _reset: bool) -> Result<SessionInfo> {
        Err(SessionError::NotFound(id.to_string()))
    }

    async fn get_valid_sessions(
        &self,
        _session: &Session,
        _pattern: Option<&str>,
    ) -> Result<SearchResults<SessionInfo>> {
        Ok(SearchResults::bounded(Vec::new(), 0))
    }

    async fn get_matching_sessions(&self, _query: &SessionQuery) -> Result<Vec<PartialSession>> {
        Ok(Vec::new())
    }

    async fn logout(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    async fn add_session_listener(&self, _session: &Session, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn deference_restricted_id(
        &self,
        _session: &Session,
        restricted_id: &SessionId,
    ) -> Result<SessionId> {
        Err(SessionError::NotFound(restricted_id.to_string()))
    }

    async fn set_external_property(
        &self,
        _client: &SsoToken,
        _id: &SessionId,
        _name: &str,
        _value: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_restricted_token_id(
        &self,
        master: &SessionId,
        _restriction: &TokenRestriction,
    ) -> Result<SessionId> {
        Err(SessionError::NotFound(master.to_string()))
    }
}
