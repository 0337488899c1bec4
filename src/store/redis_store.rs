//! Redis-backed store.
//!
//! A single multiplexed `ConnectionManager` (automatic reconnection) is shared
//! by all callers. Concurrency is capped by a semaphore sized from
//! `StoreConfig::pool_size`, and every round trip is bounded by
//! `StoreConfig::op_timeout_ms`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::error::{HiveError, Result};
use crate::store::{Claim, KeyValueStore};

const SCAN_BATCH: usize = 256;

/// Claim the singleton key if absent, refresh it if already ours.
/// KEYS[1] = key, KEYS[2] = term counter.
/// ARGV[1] = candidate, ARGV[2] = ttl in ms.
const CLAIM_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  local term = redis.call('INCR', KEYS[2])
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return {ARGV[1], term, 1}
end
if current == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
local term = tonumber(redis.call('GET', KEYS[2]) or '0')
return {current, term, 0}
"#;

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    permits: Arc<Semaphore>,
    op_timeout: Duration,
    claim_script: Script,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;
        let manager = timeout(config.op_timeout(), client.get_connection_manager())
            .await
            .map_err(|_| HiveError::StoreTimeout(config.op_timeout()))??;

        tracing::info!(
            host = %config.host,
            port = config.port,
            pool_size = config.pool_size,
            "Connected to store"
        );

        Ok(Self {
            manager,
            permits: Arc::new(Semaphore::new(config.pool_size.max(1))),
            op_timeout: config.op_timeout(),
            claim_script: Script::new(CLAIM_SCRIPT),
        })
    }

    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        bounded(&self.permits, self.op_timeout, op, f(self.manager.clone())).await
    }
}

/// Runs one store round trip inside a pool slot and the operation timeout.
/// The slot is held until `fut` completes or the timeout fires.
async fn bounded<T, Fut>(
    permits: &Semaphore,
    op_timeout: Duration,
    op: &'static str,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = RedisResult<T>>,
{
    let _permit = permits
        .acquire()
        .await
        .map_err(|_| HiveError::Internal("store pool closed".to_string()))?;

    match timeout(op_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::debug!(op, error = %e, "Store operation failed");
            Err(e.into())
        }
        Err(_) => {
            tracing::debug!(
                op,
                timeout_ms = op_timeout.as_millis() as u64,
                "Store operation timed out"
            );
            Err(HiveError::StoreTimeout(op_timeout))
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Escapes glob metacharacters so a key prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run("GET", |mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.run("SET", |mut conn| async move {
            redis::cmd("SET").arg(key).arg(value).query_async(&mut conn).await
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ms = ttl_millis(ttl);
        self.run("SET PX", |mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ms)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ms = ttl_millis(ttl);
        self.run("PEXPIRE", |mut conn| async move {
            redis::cmd("PEXPIRE").arg(key).arg(ms).query_async(&mut conn).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self
            .run("DEL", |mut conn| async move {
                redis::cmd("DEL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let pattern = pattern.as_str();
            let (next, batch): (u64, Vec<String>) = self
                .run("SCAN", |mut conn| async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across iterations
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn claim_or_renew(
        &self,
        key: &str,
        term_key: &str,
        candidate: &str,
        ttl: Duration,
    ) -> Result<Claim> {
        let mut invocation = self.claim_script.prepare_invoke();
        invocation
            .key(key)
            .key(term_key)
            .arg(candidate)
            .arg(ttl_millis(ttl));

        let (holder, term, acquired): (String, u64, i64) = self
            .run("CLAIM", |mut conn| async move {
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        Ok(Claim {
            holder,
            term,
            acquired: acquired == 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use redis::{ErrorKind, RedisError};
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn second_caller_waits_for_a_free_slot() {
        let permits = Arc::new(Semaphore::new(1));
        let (release, held) = oneshot::channel::<()>();

        let first = tokio::spawn({
            let permits = Arc::clone(&permits);
            async move {
                bounded(&permits, Duration::from_secs(60), "first", async move {
                    let _ = held.await;
                    Ok::<u32, RedisError>(1)
                })
                .await
            }
        });
        while permits.available_permits() != 0 {
            tokio::task::yield_now().await;
        }

        let second = tokio::spawn({
            let permits = Arc::clone(&permits);
            async move {
                bounded(&permits, Duration::from_secs(60), "second", async {
                    Ok::<u32, RedisError>(2)
                })
                .await
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!second.is_finished(), "second caller must wait while the slot is held");

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(second.await.unwrap().unwrap(), 2);
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out_and_frees_its_slot() {
        let permits = Semaphore::new(1);
        let limit = Duration::from_millis(500);

        let err = bounded(&permits, limit, "slow", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<u32, RedisError>(1)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, HiveError::StoreTimeout(d) if d == limit));
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn redis_errors_map_to_store_unavailable() {
        let permits = Semaphore::new(1);
        let err = bounded(&permits, Duration::from_secs(1), "GET", async {
            Err::<u32, RedisError>(RedisError::from((ErrorKind::IoError, "connection refused")))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, HiveError::StoreUnavailable(_)));
        assert_eq!(permits.available_permits(), 1);
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("nodes:default:"), "nodes:default:");
        assert_eq!(escape_glob("nodes:r*ck?:"), "nodes:r\\*ck\\?:");
        assert_eq!(escape_glob("a[1]\\"), "a\\[1\\]\\\\");
    }

    #[test]
    fn ttl_is_at_least_one_millisecond() {
        assert_eq!(ttl_millis(Duration::from_secs(3)), 3000);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }
}
