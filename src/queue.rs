//! # Queue — Bounded Multi-Producer/Multi-Consumer FIFOs
//!
//! The three coordination queues of the engine (work, worker completions,
//! test completions) share one implementation: a mutex-guarded `VecDeque`
//! with two condition variables. Capacity is enforced by blocking the
//! producer, which is what bounds memory when the scan produces candidates
//! faster than verifiers drain them.
//!
//! Beyond plain FIFO the engine needs two extras: `push_front`, used by the
//! master to schedule sieve work ahead of older verification jobs, and
//! `clear`, used on block preemption to drop stale jobs in one atomic sweep.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded blocking FIFO. All operations are safe to call from any thread.
pub struct JobQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> JobQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        JobQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while the queue is full. Items pushed after
    /// [`close`](Self::close) are dropped.
    pub fn push_back(&self, item: T) {
        self.push(item, false);
    }

    /// Insert an item at the head, ahead of everything queued. Blocks while
    /// full, like `push_back`.
    pub fn push_front(&self, item: T) {
        self.push(item, true);
    }

    fn push(&self, item: T, front: bool) {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.len() >= self.capacity && !inner.closed {
            inner = self.not_full.wait(inner).unwrap();
        }
        if inner.closed {
            return;
        }
        if front {
            inner.items.push_front(item);
        } else {
            inner.items.push_back(item);
        }
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Remove and return the head item, blocking while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub fn pop_front(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Drop every queued item atomically, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let dropped = inner.items.len();
        inner.items.clear();
        drop(inner);
        self.not_full.notify_all();
        dropped
    }

    /// Close the queue: wake all blocked consumers (they observe `None`) and
    /// unblock producers. Used only at shutdown.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
