// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded FIFO queue shared by the ingest side and the delivery engine.
//!
//! A fixed ring of `N` slots guarded by one lock. None of the operations
//! waits for the lock longer than [`LOCK_WAIT`]: under contention the
//! `try_*` operations fail with [`EnqueueError::Busy`] or `None`, and the
//! occupancy queries report `0`. Callers poll again on their next loop
//! iteration.
//!
//! # Invariants
//!
//! - `count` is the number of occupied slots, `0 <= count <= N`
//! - `head` is the next write slot, `tail` the next read slot
//! - a rejected enqueue or an empty dequeue leaves the ring untouched

use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

/// Longest time any queue operation waits for the lock.
pub const LOCK_WAIT: Duration = Duration::from_micros(200);

/// Hook run on every item still queued when the queue is released.
pub type ReleaseFn<T> = Box<dyn Fn(T) + Send + Sync>;

/// Enqueue failure. The rejected item is handed back.
pub enum EnqueueError<T> {
    /// Every slot is occupied.
    Full(T),
    /// The lock could not be taken in time.
    Busy(T),
}

impl<T> EnqueueError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Busy(item) => item,
        }
    }
}

impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Busy(_) => f.write_str("Busy(..)"),
        }
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("queue is full"),
            Self::Busy(_) => f.write_str("queue is busy"),
        }
    }
}

impl<T> std::error::Error for EnqueueError<T> {}

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, item: T) -> Result<(), T> {
        if self.count == self.slots.len() {
            return Err(item);
        }
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.slots.len();
        self.count += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % self.slots.len();
        self.count -= 1;
        item
    }
}

/// Fixed-capacity FIFO with non-blocking access.
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    capacity: usize,
    release: Option<ReleaseFn<T>>,
}

impl<T> BoundedQueue<T> {
    /// Create a queue of `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            capacity,
            release: None,
        }
    }

    /// Run `release` on every item left in the queue at shutdown.
    pub fn with_release(mut self, release: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `item`, taking ownership on success.
    pub fn try_enqueue(&self, item: T) -> Result<(), EnqueueError<T>> {
        let Some(mut ring) = self.ring.try_lock_for(LOCK_WAIT) else {
            return Err(EnqueueError::Busy(item));
        };
        ring.push(item).map_err(EnqueueError::Full)
    }

    /// Remove the oldest item. `None` when empty or contended.
    pub fn try_dequeue(&self) -> Option<T> {
        self.ring.try_lock_for(LOCK_WAIT)?.pop()
    }

    /// Free slots, or 0 when the lock is contended.
    pub fn available_slots(&self) -> usize {
        self.ring
            .try_lock()
            .map_or(0, |ring| self.capacity - ring.count)
    }

    /// Occupied slots, or 0 when the lock is contended.
    pub fn available_occupied(&self) -> usize {
        self.ring.try_lock().map_or(0, |ring| ring.count)
    }

    /// Exact number of queued items. Waits for the lock.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every queued item, oldest first. Waits for the lock.
    pub fn drain(&self) -> Vec<T> {
        let mut ring = self.ring.lock();
        let mut items = Vec::with_capacity(ring.count);
        while let Some(item) = ring.pop() {
            items.push(item);
        }
        items
    }

    /// Drain the queue through the release hook. Returns the item count.
    pub fn release_all(&self) -> usize {
        let items = self.drain();
        let released = items.len();
        match &self.release {
            Some(release) => items.into_iter().for_each(|item| release(item)),
            None => drop(items),
        }
        released
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("occupied", &self.available_occupied())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_full_then_free_slot() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            queue.try_enqueue(i).expect("slot available");
        }
        let err = queue.try_enqueue(4).expect_err("queue full");
        assert!(matches!(err, EnqueueError::Full(4)));
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.try_dequeue(), Some(0));
        queue.try_enqueue(4).expect("slot freed");
        assert_eq!(queue.drain(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_dequeue_leaves_state() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(2);
        assert_eq!(queue.try_dequeue(), None);
        assert_eq!(queue.available_slots(), 2);
        assert_eq!(queue.available_occupied(), 0);
    }

    #[test]
    fn test_wraparound_keeps_fifo_order() {
        let queue = BoundedQueue::new(3);
        let mut next = 0;
        let mut expected = 0;
        for _ in 0..10 {
            while queue.try_enqueue(next).is_ok() {
                next += 1;
            }
            for _ in 0..2 {
                assert_eq!(queue.try_dequeue(), Some(expected));
                expected += 1;
            }
            assert!(queue.len() <= queue.capacity());
        }
    }

    #[test]
    fn test_occupancy_queries() {
        let queue = BoundedQueue::new(5);
        queue.try_enqueue("a").expect("enqueue");
        queue.try_enqueue("b").expect("enqueue");
        assert_eq!(queue.available_slots(), 3);
        assert_eq!(queue.available_occupied(), 2);
    }

    #[test]
    fn test_contention_reports_busy_and_zero() {
        let queue = BoundedQueue::new(2);
        queue.try_enqueue(1).expect("enqueue");

        let guard = queue.ring.lock();
        assert!(matches!(queue.try_enqueue(2), Err(EnqueueError::Busy(2))));
        assert_eq!(queue.try_dequeue(), None);
        assert_eq!(queue.available_slots(), 0);
        assert_eq!(queue.available_occupied(), 0);
        drop(guard);

        assert_eq!(queue.available_occupied(), 1);
    }

    #[test]
    fn test_release_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let queue = BoundedQueue::new(4).with_release(move |_: String| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue.try_enqueue("x".to_string()).expect("enqueue");
        queue.try_enqueue("y".to_string()).expect("enqueue");
        drop(queue);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_all_empties_queue() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue(1u8).expect("enqueue");
        assert_eq!(queue.release_all(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.release_all(), 0);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        const ITEMS: u32 = 2000;
        let queue = Arc::new(BoundedQueue::new(8));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut item = 0;
                while item < ITEMS {
                    match queue.try_enqueue(item) {
                        Ok(()) => item += 1,
                        Err(_) => thread::yield_now(),
                    }
                }
            })
        };

        let mut received = Vec::with_capacity(ITEMS as usize);
        while received.len() < ITEMS as usize {
            match queue.try_dequeue() {
                Some(item) => received.push(item),
                None => thread::yield_now(),
            }
            assert!(queue.available_occupied() <= queue.capacity());
        }

        producer.join().expect("producer thread");
        assert_eq!(received, (0..ITEMS).collect::<Vec<_>>());
    }
}
