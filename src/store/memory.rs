//! In-process store with TTL support.
//!
//! Expiry is evaluated lazily against `tokio::time::Instant`, so tests running
//! on a paused runtime clock control key lifetimes with `tokio::time::advance`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{HiveError, Result};
use crate::store::{Claim, KeyValueStore};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

fn stored_term(data: &HashMap<String, Entry>, term_key: &str) -> u64 {
    data.get(term_key)
        .and_then(|e| std::str::from_utf8(&e.value).ok()?.parse().ok())
        .unwrap_or(0)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing connectivity: every operation fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Remaining lifetime of a key, `None` if absent or without TTL.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let data = self.data.read().await;
        data.get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| e.expires_at)
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let data = self.data.read().await;
        data.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HiveError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_available()?;
        let mut data = self.data.write().await;
        data.insert(key.to_string(), Entry::new(value.to_vec(), None));
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.check_available()?;
        let mut data = self.data.write().await;
        data.insert(key.to_string(), Entry::new(value.to_vec(), Some(ttl)));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some_and(|e| !e.is_expired()))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let mut data = self.data.write().await;
        data.retain(|_, entry| !entry.is_expired());
        Ok(data
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn claim_or_renew(
        &self,
        key: &str,
        term_key: &str,
        candidate: &str,
        ttl: Duration,
    ) -> Result<Claim> {
        self.check_available()?;
        let mut data = self.data.write().await;

        let holder = data
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| String::from_utf8_lossy(&e.value).into_owned());

        match holder {
            None => {
                let term = stored_term(&data, term_key) + 1;
                data.insert(
                    term_key.to_string(),
                    Entry::new(term.to_string().into_bytes(), None),
                );
                data.insert(
                    key.to_string(),
                    Entry::new(candidate.as_bytes().to_vec(), Some(ttl)),
                );
                Ok(Claim {
                    holder: candidate.to_string(),
                    term,
                    acquired: true,
                })
            }
            Some(holder) => {
                if holder == candidate {
                    if let Some(entry) = data.get_mut(key) {
                        entry.expires_at = Some(Instant::now() + ttl);
                    }
                }
                Ok(Claim {
                    holder,
                    term: stored_term(&data, term_key),
                    acquired: false,
                })
            }
        }
    }
}
