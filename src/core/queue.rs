// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A closable blocking FIFO queue.

use super::util::Status;
use std::collections::VecDeque;
use std::fmt;

/// Error returned by [`TaskQueue::push()`] once the queue is closed. The
/// rejected item is handed back to the caller.
#[derive(PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pushing to a closed queue")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

/// State protected by the queue's mutex. Keeping the items and the closed
/// flag under the same lock means that a consumer can't miss a wake-up
/// between checking for emptiness and going to sleep.
struct QueueState<T> {
    /// Items pushed but not popped yet, in push order.
    pending: VecDeque<T>,
    /// Whether [`TaskQueue::close()`] was called.
    closed: bool,
}

/// An unbounded multi-producer multi-consumer FIFO queue, with blocking pops
/// and a one-way close signal.
///
/// Once closed, the queue rejects new items but still hands out the items that
/// were pushed before: consumers only observe the closure after the queue is
/// drained.
///
/// ```
/// # use taskengine::TaskQueue;
/// let queue = TaskQueue::new();
/// queue.push(1).unwrap();
/// queue.push(2).unwrap();
/// queue.close();
///
/// assert!(queue.push(3).is_err());
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct TaskQueue<T> {
    status: Status<QueueState<T>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// Creates a new empty and open queue.
    pub fn new() -> Self {
        Self {
            status: Status::new(QueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Appends an item at the back of the queue and wakes up one blocked
    /// consumer.
    ///
    /// Fails if the queue is closed, in which case nothing is enqueued.
    pub fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        let mut state = self.status.lock();
        if state.closed {
            return Err(QueueClosed(item));
        }
        state.pending.push_back(item);
        drop(state);

        self.status.wake_one();
        Ok(())
    }

    /// Removes the item at the front of the queue, blocking while the queue is
    /// empty and open.
    ///
    /// Items pushed before [`close()`](Self::close) are still returned after
    /// it. Returns [`None`] only once the queue is both closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self
            .status
            .wait_while(|state| state.pending.is_empty() && !state.closed);
        state.pending.pop_front()
    }

    /// Removes the item at the front of the queue if there is one, without
    /// blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.status.lock().pending.pop_front()
    }

    /// Closes the queue and wakes up all blocked consumers.
    ///
    /// Returns whether this call closed the queue, i.e. false if it was
    /// already closed.
    pub fn close(&self) -> bool {
        let mut state = self.status.lock();
        let was_open = !state.closed;
        state.closed = true;
        drop(state);

        self.status.wake_all();
        was_open
    }

    /// Returns whether [`close()`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.status.lock().closed
    }

    /// Returns the number of items waiting in the queue.
    pub fn len(&self) -> usize {
        self.status.lock().pending.len()
    }

    /// Returns whether no item is waiting in the queue.
    pub fn is_empty(&self) -> bool {
        self.status.lock().pending.is_empty()
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.status.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}
