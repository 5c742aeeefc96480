//! Coalescing of concurrent identical work
//!
//! Concurrent callers asking for the same key share one in-flight future and
//! all receive its single outcome. Once the shared future completes it is
//! removed, so the next caller starts fresh work.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use widesync_core::Result;

type InFlight<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Per-key single-flight execution
pub struct Coalescer<K, T>
where
    K: Eq + Hash,
{
    inflight: DashMap<K, InFlight<T>>,
}

impl<K, T> Default for Coalescer<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<K, T> Coalescer<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    /// Empty coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key`, or join the attempt already in flight.
    ///
    /// `make` is only called when no attempt is in flight.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = match self.inflight.entry(key.clone()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let fut = make().boxed().shared();
                e.insert(fut.clone());
                fut
            }
        };
        let outcome = shared.clone().await;
        self.inflight.remove_if(&key, |_, f| f.ptr_eq(&shared));
        outcome
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use widesync_core::Error;

    #[tokio::test]
    async fn concurrent_callers_share_one_attempt() {
        let coalescer = Arc::new(Coalescer::<String, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                coalescer
                    .run("c".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn sequential_callers_run_again() {
        let coalescer = Coalescer::<&'static str, ()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            coalescer
                .run("c", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter() {
        let coalescer = Arc::new(Coalescer::<&'static str, ()>::new());
        let a = {
            let c = Arc::clone(&coalescer);
            tokio::spawn(async move {
                c.run("c", || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(Error::store("boom"))
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = coalescer.run("c", || async { Ok(()) }).await;
        assert!(matches!(b, Err(Error::Store { .. })));
        assert!(a.await.unwrap().is_err());
    }
}
