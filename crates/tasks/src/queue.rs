use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// Multi-producer single-consumer FIFO with a blocking wait for arrivals.
///
/// Producers never block. The consumer parks in [`AsyncQueue::await_nonempty`]
/// until an item lands or the queue is cancelled. Cancelling closes the
/// producer side: later enqueues fail with [`QueueError::Closed`] while
/// already queued items stay drainable, so shutdown never loses jobs.
pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
}

struct Inner<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        AsyncQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                cancelled: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Pushes to the tail and wakes the consumer. O(1) amortised.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.cancelled {
            return Err(QueueError::Closed);
        }

        inner.items.push_back(item);
        self.condvar.notify_one();
        Ok(())
    }

    /// Pops the head, returning immediately with `None` on an empty queue.
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Parks the caller until an item is enqueued or the queue is cancelled.
    /// Returns immediately when items are already pending.
    pub fn await_nonempty(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.is_empty() && !inner.cancelled {
            inner = self.condvar.wait(inner).unwrap();
        }
    }

    /// Closes the queue and wakes any parked consumer. Idempotent.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled = true;
        self.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().unwrap().cancelled
    }

    /// Advisory item count.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        AsyncQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let queue = AsyncQueue::new();
        for i in 0..100 {
            queue.enqueue(i).unwrap();
        }

        for i in 0..100 {
            assert_eq!(queue.try_dequeue(), Some(i));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let queue: AsyncQueue<u32> = AsyncQueue::new();
        assert!(queue.try_dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn await_wakes_on_enqueue() {
        let queue = Arc::new(AsyncQueue::new());
        let consumer = Arc::clone(&queue);

        let join = thread::spawn(move || {
            consumer.await_nonempty();
            consumer.try_dequeue()
        });

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(7u32).unwrap();
        assert_eq!(join.join().unwrap(), Some(7));
    }

    #[test]
    fn cancel_wakes_parked_consumer() {
        let queue: Arc<AsyncQueue<u32>> = Arc::new(AsyncQueue::new());
        let consumer = Arc::clone(&queue);

        let join = thread::spawn(move || {
            consumer.await_nonempty();
        });

        thread::sleep(Duration::from_millis(20));
        queue.cancel();
        join.join().unwrap();
    }

    #[test]
    fn enqueue_after_cancel_fails() {
        let queue = AsyncQueue::new();
        queue.enqueue(1u32).unwrap();
        queue.cancel();
        queue.cancel(); // idempotent

        assert_eq!(queue.enqueue(2), Err(QueueError::Closed));
        // Items enqueued before the cancel stay drainable.
        assert_eq!(queue.try_dequeue(), Some(1));
    }

    #[test]
    fn multi_producer_no_items_lost() {
        let queue = Arc::new(AsyncQueue::new());

        let mut joins = Vec::new();
        for p in 0..4usize {
            let queue = Arc::clone(&queue);
            joins.push(thread::spawn(move || {
                for i in 0..1000i32 {
                    queue.enqueue((p, i)).unwrap();
                }
            }));
        }
        for join in joins {
            join.join().unwrap();
        }

        assert_eq!(queue.size(), 4000);

        // Per-producer order is preserved even though interleaving is free.
        let mut last = [-1i32; 4];
        while let Some((p, i)) = queue.try_dequeue() {
            assert!(i > last[p]);
            last[p] = i;
        }
    }
}
