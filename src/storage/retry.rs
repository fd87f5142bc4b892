//! Bounded retries with jittered exponential backoff for transient storage failures

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;

use super::StorageBackend;

/// Retry policy applied at the adapter boundary
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based): exponential, capped, with full jitter
    /// over the upper half of the window.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let half = capped / 2;
        let jitter_ms = fastrand::u64(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient storage failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Storage decorator that retries transient failures of the inner backend
pub struct RetryingStorage {
    inner: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
}

impl RetryingStorage {
    pub fn new(inner: Arc<dyn StorageBackend>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl StorageBackend for RetryingStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.policy.run("get", || self.inner.get(key)).await
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.policy
            .run("put", || self.inner.put(key, data.clone()))
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.policy.run("delete", || self.inner.delete(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.policy.run("exists", || self.inner.exists(key)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.policy.run("list", || self.inner.list(prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a transient error until `failures` attempts have been made.
    struct FlakyStorage {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StorageBackend for FlakyStorage {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Error::transient("flaky", "try again"))
            } else {
                Ok(Some(Bytes::from("ok")))
            }
        }

        async fn put(&self, _key: &str, _data: Bytes) -> Result<()> {
            Err(Error::adapter("flaky", "read-only"))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Ok(true)
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(FlakyStorage {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let storage = RetryingStorage::new(inner.clone(), fast_policy(3));

        let data = storage.get("k").await.unwrap();
        assert_eq!(data, Some(Bytes::from("ok")));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let inner = Arc::new(FlakyStorage {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let storage = RetryingStorage::new(inner.clone(), fast_policy(2));

        assert!(storage.get("k").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let inner = Arc::new(FlakyStorage {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let storage = RetryingStorage::new(inner, fast_policy(5));
        let err = storage.put("k", Bytes::new()).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        for attempt in 1..10 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(400));
        }
    }
}
