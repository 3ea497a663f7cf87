//! Notification hub: debounced broadcaster.
//!
//! ```text
//! notify() ──try_send──▶ [trigger (cap 1)] ──▶ dispatcher
//!                                               │ window restarts on every trigger
//!                                               ▼ quiet for `debounce`
//!                                             broadcast: drain waiters, send Signal
//! ```
//!
//! The trigger channel holds at most one pending notification, so `notify`
//! never blocks and floods collapse to a single pending flag. A trigger that
//! lands while a broadcast is in progress stays queued and opens the next
//! window. Waiters are oneshot senders; sending never blocks, and a waiter
//! that stopped listening is simply skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Delivered once to every waiter registered when a broadcast fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    /// Sequence number of the broadcast, starting at 1.
    pub generation: u64,
}

struct Inner {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Signal>>>,
    next_id: AtomicU64,
    broadcasts: AtomicU64,
}

impl Inner {
    fn waiters(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Signal>>> {
        // The map stays consistent even if a holder panicked.
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self) {
        let waiters = std::mem::take(&mut *self.waiters());
        let generation = self.broadcasts.fetch_add(1, Ordering::SeqCst) + 1;
        let count = waiters.len();
        let mut delivered = 0;
        for (_, tx) in waiters {
            if tx.send(Signal { generation }).is_ok() {
                delivered += 1;
            }
        }
        debug!(generation, waiters = count, delivered, "change broadcast");
    }
}

/// Handle to the hub. Cheap to clone; the dispatcher stops once every
/// handle is dropped, waking remaining waiters with `None`.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<Inner>,
    trigger: mpsc::Sender<()>,
}

impl NotificationHub {
    /// Create a hub and spawn its dispatcher on the current tokio runtime.
    pub fn new(debounce: Duration) -> Self {
        let inner = Arc::new(Inner {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
        });
        let (trigger, rx) = mpsc::channel(1);
        tokio::spawn(dispatch(inner.clone(), rx, debounce));
        debug!(?debounce, "notification hub started");
        Self { inner, trigger }
    }

    /// Record that something changed. Never blocks.
    pub fn notify(&self) {
        // Full means a notification is already pending; Closed cannot
        // happen while this handle is alive.
        let _ = self.trigger.try_send(());
    }

    /// Register a waiter for the next broadcast.
    pub fn register(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.waiters().insert(id, tx);
        Subscription {
            id,
            rx: Some(rx),
            inner: self.inner.clone(),
        }
    }

    /// Number of currently registered waiters.
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters().len()
    }

    /// Number of broadcasts sent so far.
    pub fn broadcast_count(&self) -> u64 {
        self.inner.broadcasts.load(Ordering::SeqCst)
    }
}

/// A single-use registration. Dropping it unregisters the waiter.
pub struct Subscription {
    id: u64,
    rx: Option<oneshot::Receiver<Signal>>,
    inner: Arc<Inner>,
}

impl Subscription {
    /// Wait for the next broadcast. Returns `None` if the hub shut down or
    /// this subscription already received its signal.
    ///
    /// Cancel safe: dropping the future before it resolves keeps the
    /// registration intact.
    pub async fn wait(&mut self) -> Option<Signal> {
        let rx = self.rx.as_mut()?;
        let signal = rx.await.ok();
        self.rx = None;
        signal
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.waiters().remove(&self.id);
    }
}

async fn dispatch(inner: Arc<Inner>, mut trigger: mpsc::Receiver<()>, debounce: Duration) {
    while trigger.recv().await.is_some() {
        let mut open = true;
        while open {
            tokio::select! {
                more = trigger.recv() => {
                    // Another change inside the window: restart it.
                    open = more.is_some();
                }
                () = tokio::time::sleep(debounce) => break,
            }
        }
        inner.broadcast();
        if !open {
            break;
        }
    }
    inner.waiters().clear();
    debug!("notification hub stopped");
}
