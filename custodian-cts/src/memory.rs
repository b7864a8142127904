//! In-memory TokenBackend implementation.
//!
//! Stores tokens in a map and publishes every mutation on a broadcast
//! channel that serves as the change feed. Useful for tests and development
//! without a directory server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use crate::backend::TokenBackend;
use crate::config::{DEFAULT_CHANGE_FEED_CAPACITY, QueueConfig};
use crate::error::BackendError;
use crate::filter::TokenFilter;
use crate::options::Options;
use crate::token::{ChangeType, PartialToken, Token, TokenChange};

/// In-memory token store with a broadcast change feed
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<String, Token>>,
    changes: broadcast::Sender<TokenChange>,
}

impl InMemoryTokenStore {
    /// Create a store whose change feed buffers `capacity` entries per subscriber
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            tokens: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Create a store sized by `config.change_feed_capacity`
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.change_feed_capacity)
    }

    /// Number of stored tokens
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }

    fn apply_ttl(token: &mut Token, options: &Options) {
        if token.expiry().is_none()
            && let Some(ttl) = options.ttl()
            && let Ok(ttl) = chrono::Duration::from_std(ttl)
        {
            token.set_expiry(Some(Utc::now() + ttl));
        }
    }

    fn publish(&self, change_type: ChangeType, token: Token) {
        // No receivers is fine: nobody is subscribed
        let _ = self.changes.send(TokenChange { change_type, token });
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_FEED_CAPACITY)
    }
}

#[async_trait]
impl TokenBackend for InMemoryTokenStore {
    async fn create(&self, mut token: Token, options: &Options) -> Result<Token, BackendError> {
        Self::apply_ttl(&mut token, options);

        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(token.id()) {
            return Err(BackendError::AlreadyExists(token.id().to_string()));
        }
        tokens.insert(token.id().to_string(), token.clone());
        drop(tokens);

        self.publish(ChangeType::Added, token.clone());
        Ok(token)
    }

    async fn read(
        &self,
        token_id: &str,
        _options: &Options,
    ) -> Result<Option<Token>, BackendError> {
        Ok(self.tokens.read().await.get(token_id).cloned())
    }

    async fn update(&self, mut token: Token, options: &Options) -> Result<Token, BackendError> {
        Self::apply_ttl(&mut token, options);

        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token.id()) {
            Some(existing) => *existing = token.clone(),
            None => return Err(BackendError::NotFound(token.id().to_string())),
        }
        drop(tokens);

        self.publish(ChangeType::Modified, token.clone());
        Ok(token)
    }

    async fn delete(
        &self,
        token_id: &str,
        options: &Options,
    ) -> Result<PartialToken, BackendError> {
        let removed = self
            .tokens
            .write()
            .await
            .remove(token_id)
            .ok_or_else(|| BackendError::NotFound(token_id.to_string()))?;

        let partial = if options.pre_delete_read() {
            removed.to_partial(&[])
        } else {
            PartialToken::id_only(token_id)
        };
        self.publish(ChangeType::Deleted, removed);
        Ok(partial)
    }

    async fn query(&self, filter: &TokenFilter) -> Result<Vec<Token>, BackendError> {
        let tokens = self.tokens.read().await;
        let mut matched: Vec<Token> = tokens
            .values()
            .filter(|token| filter.matches(token))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(matched)
    }

    async fn partial_query(&self, filter: &TokenFilter) -> Result<Vec<PartialToken>, BackendError> {
        let returned = filter.returned_attributes();
        Ok(self
            .query(filter)
            .await?
            .iter()
            .map(|token| token.to_partial(returned))
            .collect())
    }

    async fn subscribe(
        &self,
        _filter: &TokenFilter,
    ) -> Result<broadcast::Receiver<TokenChange>, BackendError> {
        Ok(self.changes.subscribe())
    }
}
