//! Sliding-buffer delivery for `FanoutHub`'s broadcast groups.
//!
//! A regular bounded channel blocks (or rejects) once full. The demux
//! task in [`crate::hub`] must never block on a slow subscriber, so each
//! subscriber instead gets a [`SlidingSender`]/[`SlidingReceiver`] pair:
//! pushing past capacity silently discards the oldest buffered item
//! rather than the new one, and pushing never blocks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
}

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

/// The sending half of a sliding-buffer channel. Cloneable; `push` never
/// blocks.
pub struct SlidingSender<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SlidingSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SlidingSender<T> {
    /// Push `item`, dropping the oldest buffered item if already at
    /// capacity. Returns `false` once the receiving half has been
    /// dropped or [`close`](Self::close) has been called; callers use
    /// this to prune dead subscribers on their next broadcast.
    pub fn push(&self, item: T) -> bool {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return false;
        }
        if state.buffer.len() >= self.inner.capacity {
            state.buffer.pop_front();
            metrics::counter!("cqrsbus_broadcast_dropped_total").increment(1);
        }
        state.buffer.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
        true
    }

    /// Close the channel from the sending side, waking any pending
    /// `recv` with `None`. Used by `FanoutHub::shutdown`.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        state.closed = true;
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

/// The receiving half of a sliding-buffer channel.
pub struct SlidingReceiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> SlidingReceiver<T> {
    /// Wait for the next buffered item, or `None` once the channel is
    /// closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            {
                let mut state = lock(&self.inner.state);
                if let Some(item) = state.buffer.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

impl<T> Drop for SlidingReceiver<T> {
    fn drop(&mut self) {
        // Marks the channel closed so a sender's next `push` reports
        // `false` and the owning broadcast group prunes this entry.
        let mut state = lock(&self.inner.state);
        state.closed = true;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Build a sliding-buffer channel of the given capacity (clamped to at
/// least 1).
pub fn sliding_channel<T>(capacity: usize) -> (SlidingSender<T>, SlidingReceiver<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            buffer: VecDeque::new(),
            closed: false,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });
    (
        SlidingSender {
            inner: Arc::clone(&inner),
        },
        SlidingReceiver { inner },
    )
}

/// A fan-out group of sliding-buffer subscribers sharing one producer
/// side. Used by `FanoutHub` for both its command and event broadcast
/// groups.
pub struct BroadcastGroup<T> {
    subscribers: Mutex<Vec<SlidingSender<T>>>,
}

impl<T> Default for BroadcastGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> BroadcastGroup<T> {
    /// Create an empty broadcast group.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber with the given sliding-buffer capacity
    /// and return its receiver.
    pub fn subscribe(&self, capacity: usize) -> SlidingReceiver<T> {
        let (tx, rx) = sliding_channel(capacity);
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Deliver `item` to every live subscriber, pruning any whose
    /// receiver has been dropped or closed.
    pub fn broadcast(&self, item: &T) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|sender| sender.push(item.clone()));
    }

    /// Close every subscriber (used by `FanoutHub::shutdown`).
    pub fn close_all(&self) {
        let mut subscribers = lock(&self.subscribers);
        for sender in subscribers.drain(..) {
            sender.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sliding_channel_drops_oldest_when_full() {
        let (tx, mut rx) = sliding_channel(1);
        assert!(tx.push(1));
        assert!(tx.push(2));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn closing_receiver_is_observed_by_sender() {
        let (tx, rx) = sliding_channel::<i32>(1);
        drop(rx);
        assert!(!tx.push(1));
    }

    #[tokio::test]
    async fn broadcast_group_prunes_dropped_subscribers() {
        let group: BroadcastGroup<i32> = BroadcastGroup::new();
        let mut a = group.subscribe(4);
        let b = group.subscribe(4);
        drop(b);

        group.broadcast(&7);
        group.broadcast(&7);

        assert_eq!(a.recv().await, Some(7));
    }
}
