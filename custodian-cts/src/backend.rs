//! Persistence backend contract consumed by the task queue.
//!
//! The backend abstraction lets the queue run against a directory server,
//! a database, or the in-memory store used in tests and development.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BackendError;
use crate::filter::TokenFilter;
use crate::options::Options;
use crate::token::{PartialToken, Token, TokenChange};

/// Storage operations for token records
///
/// Every method is executed by the task queue at most once per task; the
/// queue never retries, so implementations that want retries must do them
/// internally.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    /// Persist a new token, returning the stored copy
    async fn create(&self, token: Token, options: &Options) -> Result<Token, BackendError>;

    /// Read a token by ID, `None` when absent
    async fn read(&self, token_id: &str, options: &Options) -> Result<Option<Token>, BackendError>;

    /// Replace an existing token, returning the stored copy
    async fn update(&self, token: Token, options: &Options) -> Result<Token, BackendError>;

    /// Remove a token by ID
    async fn delete(&self, token_id: &str, options: &Options)
    -> Result<PartialToken, BackendError>;

    /// All tokens matching the filter
    async fn query(&self, filter: &TokenFilter) -> Result<Vec<Token>, BackendError>;

    /// Matching tokens projected onto the filter's returned attributes
    async fn partial_query(&self, filter: &TokenFilter) -> Result<Vec<PartialToken>, BackendError>;

    /// Open a change feed for the filter.
    ///
    /// The receiver may carry changes that do not match `filter`; callers
    /// apply the filter themselves.
    async fn subscribe(
        &self,
        filter: &TokenFilter,
    ) -> Result<broadcast::Receiver<TokenChange>, BackendError>;
}
