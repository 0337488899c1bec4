//! Shared key-value store with per-key expiration.
//!
//! Every piece of cluster state (liveness, leadership, jobs) lives behind
//! [`KeyValueStore`]. Two backends exist:
//!
//! - [`RedisStore`]: the production backend
//! - [`MemoryStore`]: in-process, used by tests and single-node runs

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Outcome of an atomic claim-or-renew on a singleton key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Value stored under the key after the operation.
    pub holder: String,
    /// Current fencing term.
    pub term: u64,
    /// True when the key was absent and this call created it.
    pub acquired: bool,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Refreshes the TTL of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Live keys starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically: if `key` is absent, store `candidate` with `ttl` and bump
    /// the counter at `term_key`; if it holds `candidate`, refresh its TTL;
    /// otherwise leave it untouched. Reports the resulting holder.
    async fn claim_or_renew(
        &self,
        key: &str,
        term_key: &str,
        candidate: &str,
        ttl: Duration,
    ) -> Result<Claim>;

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}
