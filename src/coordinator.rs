//! Request Coordinator
//!
//! Collapses concurrent loads of the same `(group, key)` into one. The first
//! caller spawns the load on its own task; everyone arriving while it runs
//! awaits the same shared result, value or error. When the load finishes its
//! record is dropped so the next miss starts a fresh load.
//!
//! Because the load runs on a spawned task, a caller that gives up (drops its
//! future or times out) does not cancel it for the others, and the load still
//! populates the cache. The task drops the record itself, even when the load
//! panics and nobody is left waiting.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

type LoadFuture = Shared<BoxFuture<'static, Result<Bytes>>>;
type LoadKey = (String, String);

/// A load in progress
struct InFlight {
    /// Distinguishes this load from a later one for the same key
    id: u64,
    future: LoadFuture,
    waiters: AtomicU64,
}

/// Coordinator counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Loads running right now
    pub in_flight: u64,
    /// Loads started
    pub loads: u64,
    /// Callers that joined a load someone else started
    pub coalesced: u64,
}

/// Deduplicates concurrent loads per `(group, key)`
#[derive(Default)]
pub struct RequestCoordinator {
    in_flight: Arc<DashMap<LoadKey, InFlight>>,
    next_id: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` unless an identical one is already running, then share its result
    ///
    /// `load` is only called by the caller that starts the load. Must be
    /// called from within a tokio runtime.
    #[instrument(skip(self, load))]
    pub async fn run<F, Fut>(&self, group: &str, key: &str, load: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let load_key: LoadKey = (group.to_string(), key.to_string());

        let future = match self.in_flight.entry(load_key) {
            Entry::Occupied(entry) => {
                let in_flight = entry.get();
                in_flight.waiters.fetch_add(1, Ordering::Relaxed);
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight load");
                in_flight.future.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.loads.fetch_add(1, Ordering::Relaxed);

                let map = Arc::clone(&self.in_flight);
                let task_key = entry.key().clone();
                let work = load();
                let handle = tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(work).catch_unwind().await;
                    map.remove_if(&task_key, |_, f| f.id == id);
                    outcome.unwrap_or_else(|_| {
                        let (group, key) = task_key;
                        warn!(group = %group, key = %key, "Load panicked");
                        Err(Error::LoadAborted { group, key })
                    })
                });

                let (group, key) = entry.key().clone();
                let future = handle
                    .map(move |joined| match joined {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(group = %group, key = %key, "Load task failed: {}", e);
                            Err(Error::LoadAborted { group, key })
                        }
                    })
                    .boxed()
                    .shared();

                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                    waiters: AtomicU64::new(1),
                });
                debug!("Started load");
                future
            }
        };

        future.await
    }

    /// Callers currently waiting on the load for `(group, key)`, if one is running
    pub fn waiters(&self, group: &str, key: &str) -> Option<u64> {
        self.in_flight
            .get(&(group.to_string(), key.to_string()))
            .map(|f| f.waiters.load(Ordering::Relaxed))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            in_flight: self.in_flight.len() as u64,
            loads: self.loads.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_single_call() {
        let coordinator = RequestCoordinator::new();
        let value = coordinator
            .run("users", "1", || async { Ok(Bytes::from_static(b"alice")) })
            .await
            .unwrap();

        assert_eq!(value, Bytes::from_static(b"alice"));
        assert_eq!(coordinator.in_flight(), 0);
        assert_eq!(coordinator.stats().loads, 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_load() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run("users", "1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(Bytes::from_static(b"alice"))
                    })
                    .await
            }));
        }

        while coordinator.waiters("users", "1") != Some(10) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        release.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Bytes::from_static(b"alice"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = coordinator.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.coalesced, 9);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_error_reaches_every_waiter() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run("users", "404", move || async move {
                        release.notified().await;
                        Err(Error::ItemNotFound {
                            group: "users".into(),
                            key: "404".into(),
                        })
                    })
                    .await
            }));
        }

        while coordinator.waiters("users", "404") != Some(3) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        release.notify_one();

        for handle in handles {
            assert_matches!(handle.await.unwrap(), Err(Error::ItemNotFound { .. }));
        }
    }

    #[tokio::test]
    async fn test_next_call_starts_fresh() {
        let coordinator = RequestCoordinator::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            calls.fetch_add(1, Ordering::SeqCst);
            let n = calls.load(Ordering::SeqCst);
            let value = coordinator
                .run("g", "k", move || async move { Ok(Bytes::from(n.to_string())) })
                .await
                .unwrap();
            assert_eq!(value, Bytes::from(n.to_string()));
        }
        assert_eq!(coordinator.stats().loads, 3);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_group() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let release = Arc::new(Notify::new());

        let first = {
            let coordinator = Arc::clone(&coordinator);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                coordinator
                    .run("a", "k", move || async move {
                        release.notified().await;
                        Ok(Bytes::from_static(b"a"))
                    })
                    .await
            })
        };
        while coordinator.in_flight() != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Same key, other group: its own load
        let other = coordinator
            .run("b", "k", || async { Ok(Bytes::from_static(b"b")) })
            .await
            .unwrap();
        assert_eq!(other, Bytes::from_static(b"b"));

        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(coordinator.stats().coalesced, 0);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_load() {
        let coordinator = Arc::new(RequestCoordinator::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            coordinator.run("g", "slow", move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"v"))
            }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_load_is_aborted() {
        let coordinator = RequestCoordinator::new();
        let result = coordinator
            .run("g", "boom", || async {
                if true {
                    panic!("loader blew up");
                }
                Ok(Bytes::new())
            })
            .await;

        assert_matches!(result, Err(Error::LoadAborted { .. }));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_load_without_waiters_is_cleared() {
        let coordinator = Arc::new(RequestCoordinator::new());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            coordinator.run("g", "boom", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if true {
                    panic!("loader blew up");
                }
                Ok(Bytes::new())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(coordinator.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(coordinator.in_flight(), 0);

        let value = coordinator
            .run("g", "boom", || async { Ok(Bytes::from_static(b"fresh")) })
            .await
            .unwrap();
        assert_eq!(value, Bytes::from_static(b"fresh"));
        assert_eq!(coordinator.stats().loads, 2);
    }
}
