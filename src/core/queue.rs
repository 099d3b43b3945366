// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixed-capacity blocking queue with backpressure on both ends.

use crate::macros::log_debug;
use crossbeam_utils::CachePadded;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// A fixed-capacity circular buffer guarded by a mutex and two condition
/// variables.
///
/// Producers calling [`push()`](Self::push) block while the queue is full;
/// consumers calling [`pop()`](Self::pop) block while it is empty. Closing
/// the queue with [`close()`](Self::close) stops admission immediately but
/// lets consumers drain the items already queued.
///
/// ```
/// # use workpool::BoundedQueue;
/// # use std::num::NonZeroUsize;
/// let queue = BoundedQueue::new(NonZeroUsize::new(4).unwrap());
/// queue.push(1).unwrap();
/// queue.push(2).unwrap();
/// queue.close();
/// assert_eq!(queue.push(3), Err(3));
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct BoundedQueue<T> {
    /// Capacity of the ring, fixed at construction.
    capacity: NonZeroUsize,
    /// Ring storage and indices, all mutated under this mutex.
    state: Mutex<State<T>>,
    /// Signaled when a slot frees up or the queue is closed.
    not_full: Condvar,
    /// Signaled when an item arrives or the queue is closed.
    not_empty: Condvar,
    /// Mirror of the occupancy count, readable without taking the lock.
    len: CachePadded<AtomicUsize>,
}

/// Contents of the queue, only accessible with the mutex held.
struct State<T> {
    /// Ring storage, sized to the capacity once at construction.
    slots: Box<[Option<T>]>,
    /// Index of the oldest occupied slot.
    head: usize,
    /// Index of the next slot to write.
    tail: usize,
    /// Number of occupied slots. `head == tail` is ambiguous between empty
    /// and full and is disambiguated by this field alone.
    count: usize,
    /// Whether the queue has been closed.
    closed: bool,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue with the given capacity.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                slots: std::iter::repeat_with(|| None).take(capacity.get()).collect(),
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Inserts an item at the tail of the queue, blocking while the queue is
    /// full.
    ///
    /// Fails and hands the item back if the queue is closed. A close always
    /// wins over available space: once [`close()`](Self::close) has been
    /// called, no item is ever admitted, even into a free slot.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().unwrap();
        while state.count == self.capacity.get() && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }
        if state.closed {
            return Err(item);
        }

        let tail = state.tail;
        state.slots[tail] = Some(item);
        state.tail = (tail + 1) % self.capacity.get();
        state.count += 1;
        self.len.store(state.count, Ordering::Release);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the item at the head of the queue, blocking while the queue is
    /// empty and not closed.
    ///
    /// Returns [`None`] only when the queue is closed *and* empty: items
    /// queued before the close are still handed out, so consumers drain the
    /// queue before observing the shutdown signal.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        while state.count == 0 && !state.closed {
            state = self.not_empty.wait(state).unwrap();
        }
        if state.count == 0 {
            return None;
        }

        let head = state.head;
        let item = state.slots[head].take().expect("occupied slot within count");
        state.head = (head + 1) % self.capacity.get();
        state.count -= 1;
        self.len.store(state.count, Ordering::Release);
        self.not_full.notify_one();
        Some(item)
    }

    /// Closes the queue and wakes every blocked producer and consumer.
    ///
    /// Subsequent (and currently blocked) [`push()`](Self::push) calls fail;
    /// [`pop()`](Self::pop) keeps returning the items already queued and
    /// returns [`None`] once they are drained. Closing an already closed
    /// queue has no further effect.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        log_debug!("Queue closed with {} item(s) left to drain", state.count);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Returns whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Returns the number of items currently queued.
    ///
    /// This reads an atomic mirror of the count and doesn't take the lock, so
    /// the value may be stale by the time it is observed.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed capacity of the queue.
    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn queue_of(capacity: usize) -> BoundedQueue<usize> {
        BoundedQueue::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_fifo_order() {
        let queue = queue_of(8);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn test_len_tracks_occupancy() {
        let queue = queue_of(4);
        assert!(queue.is_empty());
        assert_eq!(queue.capacity().get(), 4);

        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.len(), 2);

        queue.pop().unwrap();
        assert_eq!(queue.len(), 1);
        queue.pop().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wraps_around_capacity() {
        let queue = queue_of(3);
        // Cycle through the ring several times so that head and tail wrap.
        for round in 0..10 {
            queue.push(3 * round).unwrap();
            queue.push(3 * round + 1).unwrap();
            queue.push(3 * round + 2).unwrap();
            assert_eq!(queue.len(), 3);
            assert_eq!(queue.pop(), Some(3 * round));
            assert_eq!(queue.pop(), Some(3 * round + 1));
            assert_eq!(queue.pop(), Some(3 * round + 2));
        }
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = std::sync::Arc::new(queue_of(2));
        let consumer = std::thread::spawn({
            let queue = queue.clone();
            move || queue.pop()
        });
        queue.push(42).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_push_blocks_until_pop() {
        let queue = std::sync::Arc::new(queue_of(2));
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let producer = std::thread::spawn({
            let queue = queue.clone();
            move || queue.push(3)
        });
        assert_eq!(queue.pop(), Some(1));
        producer.join().unwrap().unwrap();

        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_close_wins_over_available_space() {
        let queue = queue_of(4);
        queue.push(1).unwrap();
        queue.close();

        // Plenty of free slots, but the close stops admission anyway, without
        // touching the occupancy count.
        assert_eq!(queue.push(2), Err(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_lets_consumers_drain() {
        let queue = queue_of(8);
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        queue.close();
        assert!(queue.is_closed());

        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue = std::sync::Arc::new(queue_of(2));
        let consumer = std::thread::spawn({
            let queue = queue.clone();
            move || queue.pop()
        });
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = std::sync::Arc::new(queue_of(1));
        queue.push(1).unwrap();

        let producer = std::thread::spawn({
            let queue = queue.clone();
            move || queue.push(2)
        });
        queue.close();
        assert_eq!(producer.join().unwrap(), Err(2));

        // The item queued before the close is still there.
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        const ITEMS_PER_PRODUCER: usize = 1000;
        const NUM_PRODUCERS: usize = 4;
        const NUM_CONSUMERS: usize = 3;

        // A small capacity forces producers to block on backpressure.
        let queue = std::sync::Arc::new(queue_of(8));

        let producers: Vec<_> = (0..NUM_PRODUCERS)
            .map(|_| {
                std::thread::spawn({
                    let queue = queue.clone();
                    move || {
                        for i in 0..ITEMS_PER_PRODUCER {
                            queue.push(i).unwrap();
                        }
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..NUM_CONSUMERS)
            .map(|_| {
                std::thread::spawn({
                    let queue = queue.clone();
                    move || {
                        let mut sum = 0;
                        while let Some(i) = queue.pop() {
                            sum += i;
                        }
                        sum
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        queue.close();

        let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(
            total,
            NUM_PRODUCERS * (ITEMS_PER_PRODUCER * (ITEMS_PER_PRODUCER - 1)) / 2
        );
    }
}
