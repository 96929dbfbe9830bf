//! Per-controller reconcile queue (spec §5): a FIFO of object keys, shared
//! by a pool of worker tasks, that coalesces duplicate enqueues into a
//! single pending item so a burst of watch events for the same object
//! only produces one reconcile.
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// FIFO queue of reconcile keys with duplicate coalescing.
///
/// Cloning shares the underlying queue; every clone observes the same
/// pending items and wakes the same waiters.
#[derive(Clone)]
pub struct ReconcileQueue<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    order: Mutex<VecDeque<K>>,
    pending: Mutex<HashSet<K>>,
    notify: Notify,
}

impl<K> Default for ReconcileQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ReconcileQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                order: Mutex::new(VecDeque::new()),
                pending: Mutex::new(HashSet::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue `key`. If it is already pending, this is a no-op and
    /// returns `false` instead of appending a second copy.
    pub async fn enqueue(&self, key: K) -> bool {
        let mut pending = self.inner.pending.lock().await;
        if !pending.insert(key.clone()) {
            return false;
        }
        drop(pending);
        self.inner.order.lock().await.push_back(key);
        self.inner.notify.notify_one();
        true
    }

    /// Wait for and remove the next key. The key stays "pending" (so a
    /// re-enqueue during processing is coalesced with the in-flight run)
    /// until the caller reports completion via [`ReconcileQueue::done`].
    pub async fn dequeue(&self) -> K {
        loop {
            {
                let mut order = self.inner.order.lock().await;
                if let Some(key) = order.pop_front() {
                    return key;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Mark `key` as finished processing, allowing a future enqueue of the
    /// same key to be accepted again.
    pub async fn done(&self, key: &K) {
        self.inner.pending.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.inner.order.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Runs `worker_count` concurrent workers pulling keys off `queue` and
/// handing each to `handler`. Runs until the process is torn down;
/// intended to be spawned once per controller at startup.
pub async fn run_workers<K, F, Fut>(queue: ReconcileQueue<K>, worker_count: usize, handler: F)
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    let mut workers = Vec::with_capacity(worker_count);

    for id in 0..worker_count {
        let queue = queue.clone();
        let handler = handler.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let key = queue.dequeue().await;
                tracing::debug!(worker = id, ?key, "dequeued reconcile key");
                handler(key.clone()).await;
                queue.done(&key).await;
            }
        }));
    }

    futures::future::join_all(workers).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn duplicate_enqueue_while_pending_is_coalesced() {
        let queue: ReconcileQueue<String> = ReconcileQueue::new();

        assert!(queue.enqueue("ns/a".to_string()).await);
        assert!(!queue.enqueue("ns/a".to_string()).await);
        assert_eq!(queue.len().await, 1);

        let key = queue.dequeue().await;
        assert_eq!(key, "ns/a");

        // still pending until `done` is called
        assert!(!queue.enqueue("ns/a".to_string()).await);

        queue.done(&key).await;
        assert!(queue.enqueue("ns/a".to_string()).await);
    }

    #[tokio::test]
    async fn distinct_keys_are_not_coalesced() {
        let queue: ReconcileQueue<String> = ReconcileQueue::new();
        assert!(queue.enqueue("ns/a".to_string()).await);
        assert!(queue.enqueue("ns/b".to_string()).await);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn dequeue_waits_for_an_item() {
        let queue: ReconcileQueue<String> = ReconcileQueue::new();
        let count = Arc::new(AtomicUsize::new(0));

        let waiter_queue = queue.clone();
        let waiter_count = count.clone();
        let waiter = tokio::spawn(async move {
            let key = waiter_queue.dequeue().await;
            waiter_count.fetch_add(1, Ordering::SeqCst);
            key
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        queue.enqueue("ns/c".to_string()).await;
        let key = waiter.await.unwrap();
        assert_eq!(key, "ns/c");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
