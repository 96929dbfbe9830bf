//! Reconciler entry points: one module per watched CRD. Both controllers
//! share the watch → [`crate::queue::ReconcileQueue`] → worker-pool
//! pipeline described in spec §5, rather than going through
//! `kube::runtime::Controller`'s own scheduler, so the coalescing and
//! worker-count knobs are explicit.
pub mod certificaterequest;
pub mod clusterdeployment;

use crate::error::Disposition;
use crate::queue::ReconcileQueue;
use std::hash::Hash;
use std::time::Duration;

/// A namespaced resource name, the unit both controllers queue and dequeue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How long to wait before re-enqueueing a key after a failed reconcile,
/// per the retry taxonomy in spec §7. `None` means don't self-requeue: a
/// `Spec` error won't resolve until the resource changes (which re-triggers
/// the watch on its own), and a `Swallowed` error is already being
/// redelivered by the watch.
pub fn retry_delay(disposition: Disposition) -> Option<Duration> {
    match disposition {
        Disposition::Transient => Some(Duration::from_secs(30)),
        Disposition::Maintenance => Some(Duration::from_secs(5 * 60)),
        Disposition::Validation => Some(Duration::from_secs(2 * 60)),
        Disposition::Spec | Disposition::Swallowed => None,
    }
}

/// Re-enqueue `key` on `queue` after `delay`, without blocking the caller.
pub fn requeue_after<K>(queue: ReconcileQueue<K>, key: K, delay: Duration)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        queue.enqueue(key).await;
    });
}
