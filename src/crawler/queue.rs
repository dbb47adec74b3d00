//! Work queue shared between worker pools.
//!
//! A queue is *open* while at least one [ProducerGuard] is alive. [WorkQueue::pop] on an empty open
//! queue waits for a push or for the last producer to go away; on an empty closed queue it returns
//! `None`, which is the consumer's signal to exit.

use crate::crawler::cancel::CancellationToken;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Upper bound on one idle wait, so a waiting consumer notices cancellation promptly.
const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    producers: usize,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Empty queue with no producers.
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    /// Queue with a fixed supply of items.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: items.into_iter().collect(),
                producers: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Register a producer. The queue stays open until every guard has been dropped.
    ///
    /// Register producers before starting consumers, or a consumer may see a closed empty queue.
    pub fn producer(&self) -> ProducerGuard<'_, T> {
        self.lock().producers += 1;
        ProducerGuard { queue: self }
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.ready.notify_one();
    }

    /// Take the next item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Take the next item, waiting while the queue is empty but still open.
    ///
    /// Returns `None` once the queue is empty and closed, or when `cancel` is set.
    pub fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        let mut state = self.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            // Emptiness is checked before producer liveness, under one lock.
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.producers == 0 {
                return None;
            }
            state = match self.ready.wait_timeout(state, IDLE_WAIT) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self) -> bool {
        self.lock().producers > 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a [WorkQueue] open while alive. Dropped on worker exit, including on panic.
#[derive(Debug)]
pub struct ProducerGuard<'a, T> {
    queue: &'a WorkQueue<T>,
}

impl<T> ProducerGuard<'_, T> {
    pub fn push(&self, item: T) {
        self.queue.push(item);
    }
}

impl<T> Drop for ProducerGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.producers = state.producers.saturating_sub(1);
        let closed = state.producers == 0;
        drop(state);
        if closed {
            self.queue.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn fixed_supply_drains_then_stops() {
        let queue = WorkQueue::from_items([1, 2, 3]);
        let token = CancellationToken::new();
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.pop(&token), Some(2));
        assert_eq!(queue.pop(&token), Some(3));
        assert_eq!(queue.pop(&token), None);
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn consumer_waits_for_live_producer() {
        let queue = WorkQueue::new();
        let token = CancellationToken::new();
        let received = AtomicUsize::new(0);
        thread::scope(|s| {
            let producer = queue.producer();
            s.spawn(|| {
                while let Some(n) = queue.pop(&token) {
                    received.fetch_add(n, Ordering::SeqCst);
                }
            });
            s.spawn(move || {
                thread::sleep(Duration::from_millis(250));
                producer.push(5);
                thread::sleep(Duration::from_millis(250));
                producer.push(7);
            });
        });
        assert_eq!(received.load(Ordering::SeqCst), 12);
        assert!(!queue.is_open());
    }

    #[test]
    fn cancellation_wakes_idle_consumer() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let token = CancellationToken::new();
        let _producer = queue.producer();
        thread::scope(|s| {
            let handle = s.spawn(|| queue.pop(&token));
            thread::sleep(Duration::from_millis(50));
            token.cancel();
            assert_eq!(handle.join().ok().flatten(), None);
        });
    }

    #[test]
    fn pop_returns_none_after_cancel_even_with_items() {
        let queue = WorkQueue::from_items(["a"]);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(queue.pop(&token), None);
        assert_eq!(queue.len(), 1);
    }
}
