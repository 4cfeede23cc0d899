//! Bridging queue between producer threads and the cooperative scheduler.
//!
//! Producers call [`BridgingQueue::put`] from any thread and never block on
//! the scheduler. The scheduler suspends on
//! [`BridgingQueue::wait_until_nonempty`] instead of polling. Each suspended
//! consumer is represented by a waiter (a `oneshot` sender) kept in a FIFO
//! list under the same lock as the items, so registration, resolution and
//! removal never race with each other.
//!
//! Plain OS threads can also consume through [`BridgingQueue::blocking_get`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use kairos_types::Envelope;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors returned by non-suspending queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct Inner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

impl<T> Inner<T> {
    /// Resolve the earliest live waiter, if any.
    fn wake_one(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                break;
            }
        }
    }
}

/// Multi-producer queue with a scheduler-friendly "wait until non-empty".
pub struct BridgingQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> BridgingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Append an item and resolve the earliest outstanding waiter.
    ///
    /// Never suspends. Safe from any thread.
    pub fn put(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        inner.wake_one();
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Pop the oldest item without suspending.
    pub fn get_nowait(&self) -> Result<T, QueueError> {
        self.inner.lock().items.pop_front().ok_or(QueueError::Empty)
    }

    /// Suspend until the queue holds at least one item.
    ///
    /// Returns immediately if it already does. Items are not reserved for the
    /// woken consumer; a follow-up [`get_nowait`](Self::get_nowait) may still
    /// find the queue empty. Dropping the returned future deregisters the
    /// waiter, and a wake-up that was delivered but never observed is passed
    /// on to the next waiter.
    pub async fn wait_until_nonempty(&self) {
        let (rx, id) = {
            let mut inner = self.inner.lock();
            if !inner.items.is_empty() {
                return;
            }
            let id = inner.next_waiter_id;
            inner.next_waiter_id = inner.next_waiter_id.wrapping_add(1);
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(Waiter { id, tx });
            (rx, id)
        };

        let mut guard = WaiterGuard {
            queue: self,
            id,
            observed: false,
        };
        // The sender is only dropped after a successful send or together with
        // the queue, which `&self` keeps alive.
        let _ = rx.await;
        guard.observed = true;
    }

    /// Suspend until an item can be taken, then take it.
    ///
    /// Retries when another consumer empties the queue between the wake-up
    /// and the pop.
    pub async fn get(&self) -> T {
        loop {
            self.wait_until_nonempty().await;
            if let Ok(item) = self.get_nowait() {
                return item;
            }
        }
    }

    /// Block the calling OS thread until an item arrives or `timeout` elapses.
    ///
    /// Must not be called from inside an async task.
    pub fn blocking_get(&self, timeout: Option<Duration>) -> Result<T, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                        return inner.items.pop_front().ok_or(QueueError::Empty);
                    }
                }
                None => self.not_empty.wait(&mut inner),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Number of consumers currently suspended on this queue.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

impl<T> Default for BridgingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BridgingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BridgingQueue")
            .field("len", &inner.items.len())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// Outbound envelope sink, implemented by the transport layer's outbox.
pub trait EnvelopeSink: Send + Sync {
    fn send(&self, envelope: Envelope);
}

impl EnvelopeSink for BridgingQueue<Envelope> {
    fn send(&self, envelope: Envelope) {
        self.put(envelope);
    }
}

/// Deregisters a waiter whose future is dropped before it observes a wake-up.
struct WaiterGuard<'a, T> {
    queue: &'a BridgingQueue<T>,
    id: u64,
    observed: bool,
}

impl<T> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        if self.observed {
            return;
        }
        let mut inner = self.queue.inner.lock();
        let before = inner.waiters.len();
        inner.waiters.retain(|w| w.id != self.id);
        let still_registered = inner.waiters.len() != before;
        // Already resolved by `put` but cancelled before observing it.
        if !still_registered && !inner.items.is_empty() {
            inner.wake_one();
        }
    }
}
