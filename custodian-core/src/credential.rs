//! Short-lived credentials handed to timeout handlers and property setters

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::session::SessionId;

/// Credential scoped to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoToken {
    session_id: SessionId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SsoToken {
    pub fn new(session_id: SessionId, issued_at: DateTime<Utc>, lifetime: TimeDelta) -> Self {
        Self {
            expires_at: issued_at + lifetime,
            session_id,
            issued_at,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Issues credentials for sessions
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn create_token(&self, session_id: &SessionId) -> Result<SsoToken>;
}

/// Issues fixed-lifetime tokens for any full session id
#[derive(Debug, Clone)]
pub struct ScopedCredentialProvider {
    lifetime: TimeDelta,
}

impl ScopedCredentialProvider {
    pub fn new(lifetime: TimeDelta) -> Self {
        Self { lifetime }
    }
}

impl Default for ScopedCredentialProvider {
    fn default() -> Self {
        Self::new(TimeDelta::minutes(1))
    }
}

#[async_trait]
impl CredentialProvider for ScopedCredentialProvider {
    async fn create_token(&self, session_id: &SessionId) -> Result<SsoToken> {
        if session_id.is_session_handle() {
            return Err(SessionError::Validation(format!(
                "cannot issue a credential for handle {session_id}"
            )));
        }
        Ok(SsoToken::new(session_id.clone(), Utc::now(), self.lifetime))
    }
}
