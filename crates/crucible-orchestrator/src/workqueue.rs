// crates/crucible-orchestrator/src/workqueue.rs
// ============================================================================
// Module: Controller Workqueue
// Description: Deduplicating async workqueue with rate-limited requeue.
// Purpose: Feed controller workers one key at a time, retrying with backoff.
// Dependencies: crucible-core, tokio
// ============================================================================

//! ## Overview
//! A typed workqueue in the controller-runtime mold: adding a key that is
//! already queued or in flight is a no-op, `get` hands a key to exactly one
//! worker, and `requeue` re-adds a failed key after a fibonacci backoff
//! derived from its retry count. `done` clears the in-flight mark and the
//! retry counter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crucible_core::backoff_delay;
use tokio::sync::Notify;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Ceiling applied to per-key backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Workqueue
// ============================================================================

/// Internal queue state.
struct Inner<K> {
    /// Keys awaiting a worker, in arrival order.
    queue: VecDeque<K>,
    /// Keys queued or currently processing.
    tracked: BTreeSet<K>,
    /// Retry counts per key.
    retries: BTreeMap<K, u32>,
    /// True once shut down; `get` drains and then returns `None`.
    closed: bool,
}

/// Deduplicating workqueue shared between the poller and workers.
pub struct Workqueue<K> {
    /// Queue state behind a mutex.
    inner: Mutex<Inner<K>>,
    /// Wakes workers blocked in `get`.
    notify: Notify,
}

impl<K: Ord + Clone + Send + 'static> Workqueue<K> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                tracked: BTreeSet::new(),
                retries: BTreeMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Adds a key unless it is already queued or in flight.
    pub fn add(&self, key: K) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return,
        };
        if inner.closed || !inner.tracked.insert(key.clone()) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Waits for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            {
                let mut inner = self.inner.lock().ok()?;
                if let Some(key) = inner.queue.pop_front() {
                    return Some(key);
                }
                if inner.closed {
                    return None;
                }
                // Hold no entry; fall through to await a notification.
                drop(inner);
            }
            self.notify.notified().await;
        }
    }

    /// Marks a key finished and clears its retry counter.
    pub fn done(&self, key: &K) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tracked.remove(key);
            inner.retries.remove(key);
        }
    }

    /// Bumps a key's retry count and returns the capped backoff delay to
    /// wait before calling [`Workqueue::reinsert`].
    pub fn backoff(&self, key: &K) -> Duration {
        let Ok(mut inner) = self.inner.lock() else {
            return Duration::ZERO;
        };
        let attempts = inner.retries.entry(key.clone()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        backoff_delay(*attempts).min(MAX_BACKOFF)
    }

    /// Puts a still-tracked key back in line after a failed attempt.
    pub fn reinsert(&self, key: K) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.closed || !inner.tracked.contains(&key) {
                return;
            }
            inner.queue.push_back(key);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Shuts the queue down; workers drain and exit.
    pub fn shutdown(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }
}
