//! Collapses duplicate trigger requests that share an idempotency key.
//!
//! The first caller for a key starts the action on its own task; concurrent
//! callers wait for its result and get it back marked as replayed. The task
//! owns the entry, so a caller that goes away does not cancel the run or free
//! the key. Completed entries stay around for the TTL and are evicted lazily on
//! the next call. Failed executions are removed so the key can be retried.

use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::AppError;

pub const IN_PROGRESS_MESSAGE: &str =
    "Settlement trigger already in progress for this idempotency key.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdempotencyResult {
    pub message: String,
    pub replayed: bool,
}

type Slot = Option<Result<String, String>>;
type Entries = Arc<Mutex<HashMap<String, Arc<Entry>>>>;

struct Entry {
    created_at: Instant,
    result: watch::Sender<Slot>,
}

impl Entry {
    fn new(created_at: Instant) -> Self {
        let (result, _) = watch::channel(None);
        Self { created_at, result }
    }

    fn is_completed(&self) -> bool {
        self.result.borrow().is_some()
    }

    fn publish(&self, value: Result<String, String>) {
        self.result.send_replace(Some(value));
    }
}

enum Claim {
    Run(Arc<Entry>),
    Wait(Arc<Entry>),
}

pub struct IdempotentTriggerGateway {
    entries: Entries,
    ttl: Duration,
    wait_timeout: Duration,
}

impl IdempotentTriggerGateway {
    pub fn new(ttl: Duration, wait_timeout: Duration) -> Result<Self, AppError> {
        if ttl.is_zero() {
            return Err(AppError::Configuration(
                "Idempotency TTL must be greater than zero.".to_string(),
            ));
        }
        if wait_timeout.is_zero() {
            return Err(AppError::Configuration(
                "Idempotency wait timeout must be greater than zero.".to_string(),
            ));
        }
        Ok(Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            wait_timeout,
        })
    }

    /// Runs `action` at most once per key within the TTL window.
    ///
    /// A missing or blank key always runs the action. A keyed action runs to
    /// completion even if this future is dropped.
    pub async fn execute<F, Fut>(
        &self,
        key: Option<&str>,
        action: F,
    ) -> Result<IdempotencyResult, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AppError>> + Send + 'static,
    {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            let message = action().await?;
            return Ok(IdempotencyResult {
                message,
                replayed: false,
            });
        };

        match self.claim(key) {
            Claim::Run(entry) => self.run_first(key, entry, action()).await,
            Claim::Wait(entry) => self.await_existing(key, entry).await,
        }
    }

    /// Number of live entries, completed or pending.
    pub fn len(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, key: &str) -> Claim {
        let mut entries = lock_entries(&self.entries);
        let now = Instant::now();
        entries.retain(|_, entry| {
            !(entry.is_completed() && now.duration_since(entry.created_at) > self.ttl)
        });

        match entries.get(key) {
            Some(existing) => Claim::Wait(existing.clone()),
            None => {
                let fresh = Arc::new(Entry::new(now));
                entries.insert(key.to_string(), fresh.clone());
                Claim::Run(fresh)
            }
        }
    }

    async fn run_first<Fut>(
        &self,
        key: &str,
        entry: Arc<Entry>,
        work: Fut,
    ) -> Result<IdempotencyResult, AppError>
    where
        Fut: Future<Output = Result<String, AppError>> + Send + 'static,
    {
        let entries = self.entries.clone();
        let owned_key = key.to_string();
        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(AppError::Internal(
                    "idempotent trigger panicked".to_string(),
                )),
            };

            match &result {
                Ok(message) => entry.publish(Ok(message.clone())),
                Err(err) => {
                    warn!(
                        event = "idempotent_trigger_failed",
                        idempotency_key = %owned_key,
                        error = %err
                    );
                    remove_entry(&entries, &owned_key, &entry);
                    entry.publish(Err(err.to_string()));
                }
            }
            result
        });

        let message = task.await.map_err(|e| {
            AppError::Internal(format!("idempotent trigger task failed: {}", e))
        })??;
        Ok(IdempotencyResult {
            message,
            replayed: false,
        })
    }

    async fn await_existing(
        &self,
        key: &str,
        entry: Arc<Entry>,
    ) -> Result<IdempotencyResult, AppError> {
        let mut rx = entry.result.subscribe();
        let outcome = match tokio::time::timeout(self.wait_timeout, rx.wait_for(Option::is_some))
            .await
        {
            Ok(Ok(slot)) => (*slot).clone(),
            Ok(Err(_)) => Some(Err("idempotent trigger was abandoned".to_string())),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(message)) => {
                info!(event = "idempotent_replay", idempotency_key = key);
                Ok(IdempotencyResult {
                    message,
                    replayed: true,
                })
            }
            Some(Err(reason)) => Err(AppError::TriggerFailed(reason)),
            None => {
                info!(event = "idempotent_wait_timeout", idempotency_key = key);
                Ok(IdempotencyResult {
                    message: IN_PROGRESS_MESSAGE.to_string(),
                    replayed: true,
                })
            }
        }
    }
}

fn remove_entry(entries: &Entries, key: &str, entry: &Arc<Entry>) {
    let mut entries = lock_entries(entries);
    if entries
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, entry))
    {
        entries.remove(key);
    }
}

fn lock_entries(entries: &Entries) -> MutexGuard<'_, HashMap<String, Arc<Entry>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counted_run(calls: Arc<AtomicU64>) -> impl Future<Output = Result<String, AppError>> {
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("run {}", n))
        }
    }

    fn gateway() -> Arc<IdempotentTriggerGateway> {
        Arc::new(
            IdempotentTriggerGateway::new(Duration::from_secs(60), Duration::from_secs(2)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sequential_calls_replay() {
        let gateway = gateway();
        let calls = Arc::new(AtomicU64::new(0));

        let first = gateway
            .execute(Some("abc"), || counted_run(calls.clone()))
            .await
            .unwrap();
        let second = gateway
            .execute(Some("  abc "), || counted_run(calls.clone()))
            .await
            .unwrap();

        assert_eq!(
            first,
            IdempotencyResult {
                message: "run 1".into(),
                replayed: false
            }
        );
        assert_eq!(
            second,
            IdempotencyResult {
                message: "run 1".into(),
                replayed: true
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_key_always_runs() {
        let gateway = gateway();
        let calls = Arc::new(AtomicU64::new(0));

        for key in [None, Some(""), Some("   ")] {
            let result = gateway
                .execute(key, || counted_run(calls.clone()))
                .await
                .unwrap();
            assert!(!result.replayed);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(gateway.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let gateway = gateway();
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gateway = gateway.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                gateway
                    .execute(Some("same-key"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("settled".to_string())
                    })
                    .await
            }));
        }

        let mut replayed = 0;
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.message, "settled");
            if result.replayed {
                replayed += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(replayed, 7);
    }

    #[tokio::test]
    async fn test_failure_reaches_waiters_and_frees_key() {
        let gateway = gateway();

        let first = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .execute(Some("k"), || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err(AppError::Internal("boom".to_string()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = gateway
            .execute(Some("k"), || async { Ok("unused".to_string()) })
            .await;

        assert!(matches!(first.await.unwrap(), Err(AppError::Internal(_))));
        assert!(matches!(waiter, Err(AppError::TriggerFailed(ref m)) if m.contains("boom")));

        let retry = gateway
            .execute(Some("k"), || async { Ok("second".to_string()) })
            .await
            .unwrap();
        assert_eq!(retry.message, "second");
        assert!(!retry.replayed);
    }

    #[tokio::test]
    async fn test_waiter_times_out_with_in_progress_message() {
        let gateway = Arc::new(
            IdempotentTriggerGateway::new(Duration::from_secs(60), Duration::from_millis(30))
                .unwrap(),
        );
        let slow = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .execute(Some("slow"), || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok("finished".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = gateway
            .execute(Some("slow"), || async { Ok("unused".to_string()) })
            .await
            .unwrap();
        assert_eq!(waiter.message, IN_PROGRESS_MESSAGE);
        assert!(waiter.replayed);
        assert_eq!(slow.await.unwrap().unwrap().message, "finished");
    }

    #[tokio::test]
    async fn test_expired_entry_runs_again() {
        let gateway =
            IdempotentTriggerGateway::new(Duration::from_millis(20), Duration::from_secs(1))
                .unwrap();
        gateway
            .execute(Some("ttl"), || async { Ok("one".to_string()) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let again = gateway
            .execute(Some("ttl"), || async { Ok("two".to_string()) })
            .await
            .unwrap();
        assert_eq!(again.message, "two");
        assert!(!again.replayed);
    }

    #[tokio::test]
    async fn test_dropped_first_caller_still_completes_for_key() {
        let gateway = gateway();
        let calls = Arc::new(AtomicU64::new(0));
        let first = {
            let gateway = gateway.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                gateway
                    .execute(Some("c"), || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("settled once".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .execute(Some("c"), || async { Ok("unused".to_string()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let waited = waiter.await.unwrap().unwrap();
        assert_eq!(waited.message, "settled once");
        assert!(waited.replayed);

        let again = gateway
            .execute(Some("c"), || counted_run(calls.clone()))
            .await
            .unwrap();
        assert_eq!(again.message, "settled once");
        assert!(again.replayed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_action_frees_key() {
        let gateway = gateway();
        let result = gateway
            .execute(Some("p"), || async {
                if true {
                    panic!("pass exploded");
                }
                Ok("never".to_string())
            })
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(gateway.is_empty());
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(matches!(
            IdempotentTriggerGateway::new(Duration::ZERO, Duration::from_secs(1)),
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            IdempotentTriggerGateway::new(Duration::from_secs(1), Duration::ZERO),
            Err(AppError::Configuration(_))
        ));
    }
}
