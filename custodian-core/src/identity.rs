//! Identity comparison used by the super-user check

use async_trait::async_trait;

use crate::timeout::BoxError;

/// Resolves identity records from an external store
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Whether `a` and `b` name the same identity record
    async fn same_identity(&self, a: &str, b: &str) -> Result<bool, BoxError>;
}

/// Treats identities as equal when their names match ignoring ASCII case
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseInsensitiveIdentityStore;

#[async_trait]
impl IdentityStore for CaseInsensitiveIdentityStore {
    async fn same_identity(&self, a: &str, b: &str) -> Result<bool, BoxError> {
        Ok(a.trim().eq_ignore_ascii_case(b.trim()))
    }
}
