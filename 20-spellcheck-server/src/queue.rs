//! Fixed-capacity FIFO shared between the acceptor and the worker pool.
//!
//! [`BoundedQueue`] is a ring buffer guarded by one mutex and two condition
//! variables: `has_item` wakes consumers blocked on an empty queue and
//! `has_space` wakes producers blocked on a full one. Both waits re-check
//! their predicate in a loop, so spurious wakeups are harmless.
//!
//! Closing the queue is the only way to interrupt a blocked caller. After
//! [`BoundedQueue::close`], producers get their item handed back and
//! consumers drain whatever is still queued before seeing `None`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Returned by [`BoundedQueue::push`] once the queue has been closed.
///
/// Carries the rejected item so the caller keeps ownership of it.
#[derive(Debug, Error)]
#[error("queue is closed")]
pub struct PushError<T>(pub T);

/// Blocking bounded buffer for handing work from one thread to another.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    has_item: Condvar,
    has_space: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            count: 0,
            closed: false,
        }
    }

    fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    fn insert(&mut self, item: T) {
        debug_assert!(self.slots[self.tail].is_none(), "overwrote a live slot");
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
    }

    fn remove(&mut self) -> Option<T> {
        let item = self.slots[self.head].take()?;
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        Some(item)
    }
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be at least 1");
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            has_item: Condvar::new(),
            has_space: Condvar::new(),
            capacity,
        }
    }

    /// Appends `item`, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the item inside [`PushError`] if the queue is closed, either
    /// before the call or while the caller was waiting for space.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut ring = self.lock();
        while ring.is_full() && !ring.closed {
            ring = self
                .has_space
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if ring.closed {
            return Err(PushError(item));
        }

        ring.insert(item);
        drop(ring);
        self.has_item.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue is closed and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut ring = self.lock();
        while ring.count == 0 && !ring.closed {
            ring = self
                .has_item
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let item = ring.remove()?;
        drop(ring);
        self.has_space.notify_one();
        Some(item)
    }

    /// Closes the queue and wakes every blocked producer and consumer.
    ///
    /// Idempotent. Items already queued stay available to [`pop`](Self::pop).
    pub fn close(&self) {
        self.lock().closed = true;
        self.has_item.notify_all();
        self.has_space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Every critical section leaves the ring consistent, so a poisoned lock
    // still guards valid state.
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use crossbeam_channel::{RecvTimeoutError, unbounded};

    use super::*;

    const SETTLE: Duration = Duration::from_millis(100);
    const DEADLINE: Duration = Duration::from_secs(5);

    #[test]
    fn pops_in_push_order_across_wraparound() {
        let queue = BoundedQueue::new(3);
        for round in 0..4 {
            for n in 0..3 {
                queue.push(round * 10 + n).expect("queue open");
            }
            assert_eq!(queue.len(), 3);
            let drained: Vec<_> = (0..3).filter_map(|_| queue.pop()).collect();
            assert_eq!(drained, vec![round * 10, round * 10 + 1, round * 10 + 2]);
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn push_blocks_while_full() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.push(1).expect("queue open");
        queue.push(2).expect("queue open");

        let (done_tx, done_rx) = unbounded();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.push(3).expect("queue open");
                done_tx.send(()).expect("test alive");
            })
        };

        assert_eq!(
            done_rx.recv_timeout(SETTLE),
            Err(RecvTimeoutError::Timeout),
            "push must wait for a free slot"
        );
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(1));
        done_rx.recv_timeout(DEADLINE).expect("push resumes after pop");
        producer.join().expect("producer thread");

        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn pop_blocks_while_empty() {
        let queue = Arc::new(BoundedQueue::new(1));
        let (item_tx, item_rx) = unbounded();
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                item_tx.send(queue.pop()).expect("test alive");
            })
        };

        assert_eq!(
            item_rx.recv_timeout(SETTLE),
            Err(RecvTimeoutError::Timeout),
            "pop must wait for an item"
        );

        queue.push("conn").expect("queue open");
        assert_eq!(item_rx.recv_timeout(DEADLINE), Ok(Some("conn")));
        consumer.join().expect("consumer thread");
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(3));
        let (item_tx, item_rx) = unbounded();
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let item_tx = item_tx.clone();
                thread::spawn(move || item_tx.send(queue.pop()).expect("test alive"))
            })
            .collect();

        thread::sleep(SETTLE);
        queue.close();

        for _ in 0..2 {
            assert_eq!(item_rx.recv_timeout(DEADLINE), Ok(None));
        }
        for consumer in consumers {
            consumer.join().expect("consumer thread");
        }
    }

    #[test]
    fn close_hands_item_back_to_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(7).expect("queue open");

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(8))
        };

        thread::sleep(SETTLE);
        queue.close();

        let result = producer.join().expect("producer thread");
        assert!(matches!(result, Err(PushError(8))));
        assert!(queue.is_closed());
    }

    #[test]
    fn closed_queue_drains_before_reporting_none() {
        let queue = BoundedQueue::new(3);
        queue.push('a').expect("queue open");
        queue.push('b').expect("queue open");
        queue.close();

        assert!(matches!(queue.push('c'), Err(PushError('c'))));
        assert_eq!(queue.pop(), Some('a'));
        assert_eq!(queue.pop(), Some('b'));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn concurrent_producers_keep_their_own_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(BoundedQueue::new(3));
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.push((producer, seq)).expect("queue open");
                    }
                })
            })
            .collect();

        let mut next_seq = [0usize; PRODUCERS];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let (producer, seq) = queue.pop().expect("queue open");
            assert_eq!(seq, next_seq[producer], "producer {producer} reordered");
            next_seq[producer] += 1;
        }

        for producer in producers {
            producer.join().expect("producer thread");
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn stress_one_producer_many_consumers() {
        const ITEMS: usize = 10_000;
        const CONSUMERS: usize = 4;

        let queue = Arc::new(BoundedQueue::new(3));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (item_tx, item_rx) = unbounded();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let max_seen = Arc::clone(&max_seen);
                let item_tx = item_tx.clone();
                thread::spawn(move || {
                    while let Some(item) = queue.pop() {
                        max_seen.fetch_max(queue.len(), Ordering::Relaxed);
                        item_tx.send(item).expect("test alive");
                    }
                })
            })
            .collect();
        drop(item_tx);

        for item in 0..ITEMS {
            queue.push(item).expect("queue open");
            max_seen.fetch_max(queue.len(), Ordering::Relaxed);
        }
        queue.close();

        let mut seen = HashSet::with_capacity(ITEMS);
        for _ in 0..ITEMS {
            let item = item_rx.recv_timeout(DEADLINE).expect("item delivered");
            assert!(seen.insert(item), "item {item} delivered twice");
        }
        for consumer in consumers {
            consumer.join().expect("consumer thread");
        }

        assert_eq!(seen.len(), ITEMS);
        assert!(item_rx.try_recv().is_err(), "no extra items");
        assert!(max_seen.load(Ordering::Relaxed) <= queue.capacity());
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_is_rejected() {
        let _queue: BoundedQueue<()> = BoundedQueue::new(0);
    }
}
