//! Bounded FIFO queue
//!
//! A fixed-capacity ring buffer with both non-blocking and suspending variants of
//! enqueue and dequeue. Producers serialize on the head lock and consumers on the
//! tail lock, so one producer and one consumer never contend with each other.
//! Two counting semaphores track free and filled slots:
//!
//! ```text
//!   enqueue:  free.acquire  -> lock head -> write slot -> filled.release
//!   dequeue:  filled.acquire -> lock tail -> take slot -> free.release
//! ```
//!
//! The queue owns only its slots. Items are moved in and out; callers that need
//! shared items enqueue `Arc`s or `Bytes`.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};

/// Queue operation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No free slot for a non-blocking enqueue
    #[error("queue is full")]
    Full,
    /// No item for a non-blocking dequeue
    #[error("queue is empty")]
    Empty,
    /// The queue has been closed
    #[error("queue is closed")]
    Closed,
}

/// Bounded multi-producer multi-consumer queue
pub struct BoundedQueue<T> {
    slots: Box<[Mutex<Option<T>>]>,
    head: Mutex<usize>,
    tail: Mutex<usize>,
    size: AtomicUsize,
    free: Semaphore,
    filled: Semaphore,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            head: Mutex::new(0),
            tail: Mutex::new(0),
            size: AtomicUsize::new(0),
            free: Semaphore::new(capacity),
            filled: Semaphore::new(0),
        }
    }

    /// Enqueue without waiting, failing with `Full` if no slot is free
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        match self.free.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(QueueError::Full),
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed),
        }
        self.push(item);
        Ok(())
    }

    /// Enqueue, suspending the caller until a slot is free
    pub async fn enqueue_blocking(&self, item: T) -> Result<(), QueueError> {
        self.free
            .acquire()
            .await
            .map_err(|_| QueueError::Closed)?
            .forget();
        self.push(item);
        Ok(())
    }

    /// Dequeue without waiting, failing with `Empty` if there is no item
    pub fn dequeue(&self) -> Result<T, QueueError> {
        match self.filled.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(QueueError::Empty),
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed),
        }
        self.pop()
    }

    /// Dequeue, suspending the caller until an item is available
    pub async fn dequeue_blocking(&self) -> Result<T, QueueError> {
        self.filled
            .acquire()
            .await
            .map_err(|_| QueueError::Closed)?
            .forget();
        self.pop()
    }

    /// Close the queue
    ///
    /// Wakes every suspended caller with `Closed`. Later operations also fail
    /// with `Closed`; items still buffered are dropped with the queue.
    pub fn close(&self) {
        self.free.close();
        self.filled.close();
    }

    pub fn is_closed(&self) -> bool {
        self.filled.is_closed()
    }

    /// Number of items currently stored
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // Caller holds a free-slot permit
    fn push(&self, item: T) {
        {
            let mut head = self.head.lock();
            *self.slots[*head].lock() = Some(item);
            *head = (*head + 1) % self.slots.len();
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        self.filled.add_permits(1);
    }

    // Caller holds a filled-slot permit
    fn pop(&self) -> Result<T, QueueError> {
        let item = {
            let mut tail = self.tail.lock();
            let item = self.slots[*tail].lock().take();
            if item.is_some() {
                *tail = (*tail + 1) % self.slots.len();
                self.size.fetch_sub(1, Ordering::AcqRel);
            }
            item
        };

        match item {
            Some(item) => {
                self.free.add_permits(1);
                Ok(item)
            }
            None => Err(QueueError::Empty),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_capacity_and_fifo() {
        let queue = BoundedQueue::new(10);

        for i in 0..10 {
            queue.enqueue(i).unwrap();
        }
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.enqueue(99), Err(QueueError::Full));

        for i in 0..10 {
            assert_eq!(queue.dequeue().unwrap(), i);
        }
        assert_eq!(queue.dequeue(), Err(QueueError::Empty));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let queue = BoundedQueue::new(3);

        for round in 0..5 {
            queue.enqueue(round * 2).unwrap();
            queue.enqueue(round * 2 + 1).unwrap();
            assert_eq!(queue.dequeue().unwrap(), round * 2);
            assert_eq!(queue.dequeue().unwrap(), round * 2 + 1);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_and_non_blocking_mix() {
        let queue = BoundedQueue::new(10);

        for i in 0..10 {
            queue.enqueue(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.dequeue().unwrap(), i);
        }
        for i in 10..15 {
            queue.enqueue_blocking(i).await.unwrap();
        }
        for i in 5..15 {
            assert_eq!(queue.dequeue_blocking().await.unwrap(), i);
        }
        assert_eq!(queue.dequeue(), Err(QueueError::Empty));
    }

    #[tokio::test]
    async fn test_blocking_dequeue_waits_for_item() {
        let queue = Arc::new(BoundedQueue::new(4));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_blocking().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        let item = Arc::new(String::from("reading"));
        queue.enqueue(Arc::clone(&item)).unwrap();

        let received = consumer.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&received, &item));
    }

    #[tokio::test]
    async fn test_blocking_enqueue_waits_for_room() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.enqueue(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue_blocking(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.dequeue().unwrap(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(queue.dequeue().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(2));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_blocking().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert_eq!(consumer.await.unwrap(), Err(QueueError::Closed));
        assert_eq!(queue.enqueue(1), Err(QueueError::Closed));
        assert!(queue.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumers() {
        const PER_PRODUCER: usize = 500;
        let queue = Arc::new(BoundedQueue::new(8));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for i in 0..PER_PRODUCER {
                        queue.enqueue_blocking(p * PER_PRODUCER + i).await.unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    for _ in 0..(2 * PER_PRODUCER) {
                        seen.push(queue.dequeue_blocking().await.unwrap());
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();

        assert_eq!(all, (0..4 * PER_PRODUCER).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
