//! Resource lock registry
//!
//! One async mutex per resource id, created on first use, plus a processing
//! set that answers "is this id busy?" without touching the mutex. Locks live
//! in memory only: they confer no durability and vanish with the process.

use dashmap::{DashMap, DashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Registry of per-resource locks
#[derive(Default, Clone)]
pub struct ResourceLockRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Lock table, one entry per resource id
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Ids currently running a guarded operation
    processing: DashSet<String>,
}

impl ResourceLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the mutex for a resource id
    fn lock_for(&self, resource_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.inner.locks.get(resource_id) {
            return lock.clone();
        }
        self.inner
            .locks
            .entry(resource_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire exclusive access to a resource.
    ///
    /// Tries a non-blocking acquisition first. If the lock is held, waits up
    /// to `timeout` on the async mutex so the calling runtime keeps serving
    /// other requests. A zero timeout never waits and fails with
    /// [`Error::ResourceBusy`]; an expired wait fails with [`Error::LockTimeout`].
    pub async fn acquire(&self, resource_id: &str, timeout: Duration) -> Result<ResourceGuard> {
        let lock = self.lock_for(resource_id);

        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) if timeout.is_zero() => {
                return Err(Error::ResourceBusy(resource_id.to_string()));
            }
            Err(_) => {
                tracing::debug!("Waiting up to {:?} for lock on {}", timeout, resource_id);
                let started = Instant::now();
                match tokio::time::timeout(timeout, lock.lock_owned()).await {
                    Ok(guard) => {
                        tracing::debug!(
                            "Lock on {} acquired after {:.2}s",
                            resource_id,
                            started.elapsed().as_secs_f64()
                        );
                        guard
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Could not acquire lock for {} within {}s",
                            resource_id,
                            timeout.as_secs_f64()
                        );
                        return Err(Error::LockTimeout {
                            resource_id: resource_id.to_string(),
                            timeout,
                        });
                    }
                }
            }
        };

        self.inner.processing.insert(resource_id.to_string());

        Ok(ResourceGuard {
            resource_id: resource_id.to_string(),
            registry: self.inner.clone(),
            _guard: guard,
        })
    }

    /// Run `operation` while holding the lock for `resource_id`.
    ///
    /// The guard is dropped on every exit path, including a panic unwinding
    /// out of the operation.
    pub async fn run_exclusive<F, Fut, T>(
        &self,
        resource_id: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire(resource_id, timeout).await?;
        operation().await
    }

    /// Non-blocking check against the processing set
    pub fn is_busy(&self, resource_id: &str) -> bool {
        self.inner.processing.contains(resource_id)
    }

    /// Number of ids currently holding a lock
    pub fn busy_count(&self) -> usize {
        self.inner.processing.len()
    }

    /// Number of entries in the lock table
    pub fn lock_count(&self) -> usize {
        self.inner.locks.len()
    }

    /// Drop lock table entries nobody holds or waits on.
    ///
    /// Waiters and holders keep a clone of the entry's `Arc`, and new clones
    /// are only handed out under the map's shard lock, so a strong count of
    /// one inside `retain` means the entry is idle.
    pub fn prune_idle(&self) -> usize {
        let before = self.inner.locks.len();
        self.inner
            .locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        let pruned = before.saturating_sub(self.inner.locks.len());
        if pruned > 0 {
            tracing::debug!("Pruned {} idle resource locks", pruned);
        }
        pruned
    }
}

/// Exclusive access to one resource id.
///
/// Dropping the guard removes the id from the processing set and then
/// releases the mutex.
pub struct ResourceGuard {
    resource_id: String,
    registry: Arc<RegistryInner>,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.registry.processing.remove(&self.resource_id);
        // `_guard` is dropped after this body, releasing the mutex.
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_acquire_marks_busy() {
        let locks = ResourceLockRegistry::new();
        assert!(!locks.is_busy("a"));

        let guard = locks.acquire("a", Duration::from_secs(1)).await.unwrap();
        assert!(locks.is_busy("a"));
        assert!(!locks.is_busy("b"));
        assert_eq!(guard.resource_id(), "a");

        drop(guard);
        assert!(!locks.is_busy("a"));
        assert_eq!(locks.lock_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_busy_error() {
        let locks = ResourceLockRegistry::new();
        let _guard = locks.acquire("a", Duration::ZERO).await.unwrap();

        let err = locks.acquire("a", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::ResourceBusy(id) if id == "a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_waits_full_duration() {
        let locks = ResourceLockRegistry::new();
        let holder = locks.clone();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel();

        let hold = tokio::spawn(async move {
            let _guard = holder.acquire("A", Duration::from_secs(1)).await.unwrap();
            held_tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
        });
        held_rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let probe = Instant::now();
        assert!(locks.is_busy("A"));
        assert!(probe.elapsed() < Duration::from_millis(50));

        let started = Instant::now();
        let result = locks
            .run_exclusive("A", Duration::from_secs(1), || async { Ok(()) })
            .await;
        let waited = started.elapsed();

        assert!(matches!(result, Err(Error::LockTimeout { .. })));
        assert!(waited >= Duration::from_millis(950), "waited only {:?}", waited);
        assert!(waited < Duration::from_millis(2500), "waited {:?}", waited);

        hold.abort();
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = ResourceLockRegistry::new();
        let guard = locks.acquire("a", Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .run_exclusive("a", Duration::from_secs(5), || async { Ok(42) })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
        assert!(!locks.is_busy("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_are_serialized() {
        let locks = ResourceLockRegistry::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                tokio::spawn(async move {
                    locks
                        .run_exclusive("shared", Duration::from_secs(10), || async {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            assert_eq!(locks.busy_count(), 1);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!locks.is_busy("shared"));
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_block() {
        let locks = ResourceLockRegistry::new();
        let _a = locks.acquire("a", Duration::ZERO).await.unwrap();
        let _b = locks.acquire("b", Duration::ZERO).await.unwrap();
        assert_eq!(locks.busy_count(), 2);
    }

    #[tokio::test]
    async fn test_released_on_error() {
        let locks = ResourceLockRegistry::new();
        let result: Result<()> = locks
            .run_exclusive("a", Duration::ZERO, || async {
                Err(Error::validation("bad config"))
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!locks.is_busy("a"));
        assert!(locks.acquire("a", Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_released_on_transform_failure() {
        let locks = ResourceLockRegistry::new();
        let result: Result<()> = locks
            .run_exclusive("a", Duration::ZERO, || async {
                Err(Error::transform(0, "standardization", "zero range"))
            })
            .await;
        assert!(matches!(result, Err(Error::TransformFailure { .. })));
        assert!(!locks.is_busy("a"));
        assert!(locks.acquire("a", Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_released_on_panic() {
        let locks = ResourceLockRegistry::new();
        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .run_exclusive("a", Duration::ZERO, || async {
                        if locks.is_busy("a") {
                            panic!("unexpected fault");
                        }
                        Ok(())
                    })
                    .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!locks.is_busy("a"));
        assert!(locks.acquire("a", Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held_locks() {
        let locks = ResourceLockRegistry::new();
        let held = locks.acquire("held", Duration::ZERO).await.unwrap();
        drop(locks.acquire("idle", Duration::ZERO).await.unwrap());
        assert_eq!(locks.lock_count(), 2);

        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.lock_count(), 1);
        assert!(locks.is_busy("held"));

        drop(held);
        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.lock_count(), 0);
    }
}
