//! Per-tick batching of point lookups.
//!
//! The first [`CoalescingLoader::load`] of a batch yields once and then
//! flushes; every load polled before it resumes joins the same pending
//! batch. The flush fetches all distinct keys with one call and hands each
//! waiter its value (or `None`). Nothing is kept after a flush, so a later load of the same key
//! starts a fresh batch.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{OrmError, Result};

type BatchFn<K, V> = dyn Fn(Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>>> + Send + Sync;
type Waiter<V> = oneshot::Sender<Result<Option<V>>>;

struct PendingBatch<K, V> {
    keys: Vec<K>,
    waiters: HashMap<K, Vec<Waiter<V>>>,
    scheduled: bool,
}

struct LoaderInner<K, V> {
    pending: Mutex<PendingBatch<K, V>>,
    fetch: Box<BatchFn<K, V>>,
}

/// Request-coalescing loader keyed by `K`.
pub struct CoalescingLoader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

impl<K, V> Clone for CoalescingLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> CoalescingLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// `fetch` receives the distinct pending keys in first-request order and
    /// returns the values it found.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>>> + Send + 'static,
    {
        Self {
            inner: Arc::new(LoaderInner {
                pending: Mutex::new(PendingBatch {
                    keys: Vec::new(),
                    waiters: HashMap::new(),
                    scheduled: false,
                }),
                fetch: Box::new(move |keys| fetch(keys).boxed()),
            }),
        }
    }

    pub async fn load(&self, key: K) -> Result<Option<V>> {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut guard = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let batch = &mut *guard;
            match batch.waiters.entry(key) {
                Entry::Occupied(mut entry) => entry.get_mut().push(tx),
                Entry::Vacant(entry) => {
                    batch.keys.push(entry.key().clone());
                    entry.insert(vec![tx]);
                }
            }
            !std::mem::replace(&mut batch.scheduled, true)
        };

        if leader {
            // The first caller of a batch runs the flush in its own future, so
            // every load polled alongside it joins before the fetch starts.
            let pending = PendingFlush(Some(self.inner.clone()));
            tokio::task::yield_now().await;
            if let Some(inner) = pending.disarm() {
                flush(inner).await;
            }
        }

        rx.await
            .map_err(|_| OrmError::exception("LoaderError", "batch dropped before resolving"))?
    }
}

/// Hands a scheduled batch to a background task if the leading load is
/// dropped before it gets to flush.
struct PendingFlush<K, V>(Option<Arc<LoaderInner<K, V>>>)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static;

impl<K, V> PendingFlush<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    fn disarm(mut self) -> Option<Arc<LoaderInner<K, V>>> {
        self.0.take()
    }
}

impl<K, V> Drop for PendingFlush<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    fn drop(&mut self) {
        let Some(inner) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(flush(inner));
            }
            Err(_) => {
                let mut batch = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
                batch.scheduled = false;
                batch.keys.clear();
                batch.waiters.clear();
            }
        }
    }
}

async fn flush<K, V>(inner: Arc<LoaderInner<K, V>>)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    let (keys, waiters) = {
        let mut batch = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        batch.scheduled = false;
        (
            std::mem::take(&mut batch.keys),
            std::mem::take(&mut batch.waiters),
        )
    };
    debug!("Loader flushing {} keys", keys.len());

    match (inner.fetch)(keys).await {
        Ok(found) => {
            for (key, senders) in waiters {
                let value = found.get(&key);
                for sender in senders {
                    let _ = sender.send(Ok(value.cloned()));
                }
            }
        }
        Err(err) => {
            let shared = Arc::new(err);
            for sender in waiters.into_values().flatten() {
                let _ = sender.send(Err(OrmError::Batched(shared.clone())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn recording_loader(calls: Arc<Mutex<Vec<Vec<i64>>>>) -> CoalescingLoader<i64, String> {
        CoalescingLoader::new(move |keys: Vec<i64>| {
            calls.lock().unwrap().push(keys.clone());
            async move {
                Ok(keys
                    .into_iter()
                    .filter(|k| k % 2 == 0)
                    .map(|k| (k, format!("row-{}", k)))
                    .collect())
            }
        })
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = recording_loader(calls.clone());

        let results = join_all((1..=6).map(|k| loader.load(k))).await;
        assert_eq!(calls.lock().unwrap().as_slice(), &[vec![1, 2, 3, 4, 5, 6]]);
        assert_eq!(results[0].as_ref().unwrap(), &None);
        assert_eq!(results[1].as_ref().unwrap().as_deref(), Some("row-2"));
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_merged() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = recording_loader(calls.clone());

        let results = join_all([4, 4, 4].map(|k| loader.load(k))).await;
        assert_eq!(calls.lock().unwrap().as_slice(), &[vec![4]]);
        for result in results {
            assert_eq!(result.unwrap().as_deref(), Some("row-4"));
        }
    }

    #[tokio::test]
    async fn test_no_cache_across_flushes() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = recording_loader(calls.clone());

        loader.load(2).await.unwrap();
        loader.load(2).await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_one_fetch_per_batch_on_multi_thread_runtime() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        for _ in 0..100 {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let loader = recording_loader(calls.clone());
            let results = rt.block_on(join_all((1..=200).map(|k| loader.load(k))));

            let calls = calls.lock().unwrap();
            assert_eq!(calls.len(), 1, "lookups split across {} fetches", calls.len());
            assert_eq!(calls[0], (1..=200).collect::<Vec<i64>>());
            assert_eq!(results[199].as_ref().unwrap().as_deref(), Some("row-200"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batching_inside_multi_thread_task() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = recording_loader(calls.clone());

        let results = join_all((1..=4).map(|k| loader.load(k))).await;
        assert_eq!(calls.lock().unwrap().as_slice(), &[vec![1, 2, 3, 4]]);
        assert_eq!(results[3].as_ref().unwrap().as_deref(), Some("row-4"));
    }

    #[tokio::test]
    async fn test_dropped_leader_still_resolves_batch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = recording_loader(calls.clone());

        let first = loader.load(1);
        let second = loader.load(2);
        assert!(first.now_or_never().is_none());

        assert_eq!(second.await.unwrap().as_deref(), Some("row-2"));
        assert_eq!(calls.lock().unwrap().as_slice(), &[vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_fetch_error_reaches_every_waiter() {
        let loader: CoalescingLoader<i64, String> = CoalescingLoader::new(|_keys: Vec<i64>| async {
            Err(OrmError::exception("DriverError", "connection reset"))
        });
        let results = join_all([1, 2].map(|k| loader.load(k))).await;
        for result in results {
            let err = result.unwrap_err();
            assert!(matches!(err, OrmError::Batched(_)));
            assert!(err.to_string().contains("connection reset"));
        }
    }
}
