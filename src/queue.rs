//! # BlockingQueue: async FIFO decoupling producers from consumers.
//!
//! ```text
//! enqueue(item) ──► oldest live waiter? ──yes──► hand item over
//!                         │
//!                         no ──► buffer item
//!
//! dequeue() ──► buffered item? ──yes──► resolve with it
//!                     │
//!                     no ──► register waiter, park until enqueue
//! ```
//!
//! ## Rules
//! - `enqueue` never blocks.
//! - Waiters are served in registration order; items are delivered in enqueue order.
//! - Each item is delivered exactly once. A waiter whose `dequeue` future was
//!   dropped is skipped, and the item goes to the next waiter (or the buffer).
//!   An item handed to a waiter that is dropped before taking it goes back to
//!   the front of the buffer, so `dequeue` is safe to race in `select!`.
//! - `clear` discards buffered items only; parked waiters stay parked.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct State<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

impl<T> State<T> {
    fn prune_waiters(&mut self) {
        self.waiters.retain(|w| !w.is_closed());
    }
}

/// A parked `dequeue`. Puts back an item it was handed but never took.
struct Waiter<'a, T> {
    state: &'a Mutex<State<T>>,
    rx: oneshot::Receiver<T>,
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(item) = self.rx.try_recv() {
            self.state.lock().items.push_front(item);
        }
    }
}

/// Unbounded async FIFO with parked consumers.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Hands `item` to the oldest waiting consumer, or buffers it.
    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock();
        let mut item = item;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return,
                // receiver dropped: try the next waiter
                Err(back) => item = back,
            }
        }
        state.items.push_back(item);
    }

    /// Resolves with the oldest buffered item, or parks until one is enqueued.
    pub async fn dequeue(&self) -> T {
        loop {
            let mut waiter = {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return item;
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Waiter {
                    state: &self.state,
                    rx,
                }
            };
            // The sender only disappears through `enqueue`, which always sends
            // before dropping; a failed receive means we raced a drop and re-register.
            if let Ok(item) = (&mut waiter.rx).await {
                return item;
            }
        }
    }

    /// Takes the oldest buffered item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// True iff no buffered items remain.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// True iff at least one consumer is parked.
    pub fn is_blocked(&self) -> bool {
        let mut state = self.state.lock();
        state.prune_waiters();
        !state.waiters.is_empty()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Discards buffered items; parked consumers are unaffected.
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }
}

impl<T: Clone> BlockingQueue<T> {
    /// Copies the buffered items in delivery order.
    pub fn snapshot(&self) -> Vec<T> {
        self.state.lock().items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn buffered_items_come_out_in_order() {
        let q = BlockingQueue::new();
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.len(), 5);
        for i in 0..5 {
            assert_eq!(q.dequeue().await, i);
        }
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn waiters_are_served_in_registration_order() {
        let q = Arc::new(BlockingQueue::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.dequeue().await }));
            // let each consumer park before the next registers
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(q.is_blocked());

        q.enqueue("a");
        q.enqueue("b");
        q.enqueue("c");

        let mut got = Vec::new();
        for h in handles {
            got.push(h.await.unwrap());
        }
        assert_eq!(got, vec!["a", "b", "c"]);
        assert!(!q.is_blocked());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn mixed_interleaving_delivers_each_item_once() {
        let q = Arc::new(BlockingQueue::new());
        q.enqueue(0);
        let early = {
            let q = q.clone();
            tokio::spawn(async move { (q.dequeue().await, q.dequeue().await) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(early.await.unwrap(), (0, 1));
        assert_eq!(q.snapshot(), vec![2, 3]);
        assert_eq!(q.dequeue().await, 2);
        assert_eq!(q.dequeue().await, 3);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_swallow_items() {
        let q = Arc::new(BlockingQueue::new());
        let abandoned = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        abandoned.abort();
        let _ = abandoned.await;

        q.enqueue(42);
        assert_eq!(q.try_dequeue(), Some(42));
    }

    #[tokio::test]
    async fn item_handed_to_a_dropped_waiter_is_put_back() {
        let q = BlockingQueue::new();
        let mut waiter = Box::pin(q.dequeue());
        assert!(futures::poll!(&mut waiter).is_pending());
        q.enqueue(1);
        q.enqueue(2);
        drop(waiter);

        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), Some(2));
        assert!(!q.is_blocked());
    }

    #[tokio::test]
    async fn clear_keeps_waiters_parked() {
        let q = Arc::new(BlockingQueue::new());
        q.enqueue(1);
        q.clear();
        assert!(q.is_empty());

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.clear();
        assert!(q.is_blocked());
        q.enqueue(9);
        assert_eq!(waiter.await.unwrap(), 9);
    }
}
