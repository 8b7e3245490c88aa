// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One-shot result channel between a worker thread and the submitter of a
//! task.

use super::envelope::TaskId;
use super::util::Status;
use crate::error::{Error, Result, TaskFailure};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Content of the shared cell.
enum Slot<T> {
    /// No outcome was written yet.
    Pending,
    /// The task returned a value.
    Ready(T),
    /// The task failed, or was dropped before running.
    Failed(TaskFailure),
    /// The outcome was moved out by [`TaskHandle::join()`].
    Taken,
}

impl<T> Slot<T> {
    fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }
}

/// Creates a [`Promise`] paired with a [`TaskHandle`], sharing one cell.
///
/// The cell is freed once both sides are dropped, whichever goes last.
pub(crate) fn channel<T>(id: TaskId) -> (Promise<T>, TaskHandle<T>) {
    let slot = Arc::new(Status::new(Slot::Pending));
    let promise = Promise { slot: slot.clone() };
    let handle = TaskHandle { id, slot };
    (promise, handle)
}

/// Writing side of the channel, owned by the envelope of the task.
pub(crate) struct Promise<T> {
    slot: Arc<Status<Slot<T>>>,
}

impl<T> Promise<T> {
    /// Writes the outcome of the task and wakes up the submitter.
    pub(crate) fn complete(self, outcome: std::thread::Result<T>) {
        let slot = match outcome {
            Ok(value) => Slot::Ready(value),
            Err(payload) => Slot::Failed(TaskFailure::Panicked(payload)),
        };
        self.slot.notify_all(slot);
        // The destructor now observes a completed slot and does nothing.
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.is_pending() {
            *slot = Slot::Failed(TaskFailure::Abandoned);
            drop(slot);
            self.slot.wake_all();
        }
    }
}

/// Handle to the outcome of a task submitted to an
/// [`Engine`](crate::Engine).
///
/// The outcome is written exactly once by the worker thread that runs the
/// task. Dropping the handle doesn't cancel the task: it still runs, and its
/// value is simply discarded.
pub struct TaskHandle<T> {
    id: TaskId,
    slot: Arc<Status<Slot<T>>>,
}

impl<T> TaskHandle<T> {
    /// Returns the identifier of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns whether the task has finished, either successfully or not.
    pub fn is_finished(&self) -> bool {
        !self.slot.lock().is_pending()
    }

    /// Blocks the current thread until the task has finished.
    ///
    /// This can be called any number of times, before consuming the outcome
    /// with [`join()`](Self::join).
    pub fn wait(&self) {
        let _guard = self.slot.wait_while(|slot| slot.is_pending());
    }

    /// Blocks the current thread until the task has finished or the timeout
    /// has elapsed. Returns whether the task has finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (_guard, timed_out) = self
            .slot
            .wait_timeout_while(timeout, |slot| slot.is_pending());
        !timed_out
    }

    /// Blocks the current thread until the task has finished, and returns its
    /// outcome.
    ///
    /// If the task panicked, this returns [`Error::TaskFailed`] carrying the
    /// original panic payload.
    pub fn join(self) -> Result<T> {
        let mut slot = self.slot.wait_while(|slot| slot.is_pending());
        take_outcome(&mut slot)
    }

    /// Returns the outcome of the task if it has finished, or gives the handle
    /// back otherwise. This never blocks.
    pub fn try_join(self) -> std::result::Result<Result<T>, Self> {
        let mut slot = self.slot.lock();
        if slot.is_pending() {
            drop(slot);
            return Err(self);
        }
        let outcome = take_outcome(&mut slot);
        drop(slot);
        Ok(outcome)
    }
}

/// Moves the outcome out of a finished slot.
fn take_outcome<T>(slot: &mut Slot<T>) -> Result<T> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(value) => Ok(value),
        Slot::Failed(failure) => Err(Error::TaskFailed(failure)),
        // Only the unique handle takes the outcome, and only once it's written.
        Slot::Pending | Slot::Taken => unreachable!("task outcome isn't available"),
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_channel<T>() -> (Promise<T>, TaskHandle<T>) {
        channel(TaskId::new(0))
    }

    #[test]
    fn test_complete_then_join() {
        let (promise, handle) = new_channel();
        assert!(!handle.is_finished());

        promise.complete(Ok(42));
        assert!(handle.is_finished());
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_panicked_outcome() {
        let (promise, handle) = new_channel::<u32>();
        promise.complete(std::panic::catch_unwind(|| panic!("oops")));

        match handle.join() {
            Err(Error::TaskFailed(failure)) => assert_eq!(failure.message(), Some("oops")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_promise_abandons() {
        let (promise, handle) = new_channel::<u32>();
        drop(promise);

        assert!(handle.is_finished());
        assert!(matches!(
            handle.join(),
            Err(Error::TaskFailed(TaskFailure::Abandoned))
        ));
    }

    #[test]
    fn test_try_join_pending() {
        let (promise, handle) = new_channel();

        let handle = handle.try_join().unwrap_err();
        promise.complete(Ok("done"));
        assert_eq!(handle.try_join().unwrap().unwrap(), "done");
    }

    #[test]
    fn test_wait_timeout() {
        let (promise, handle) = new_channel();
        assert!(!handle.wait_timeout(Duration::from_millis(10)));

        promise.complete(Ok(()));
        assert!(handle.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_many_times() {
        let (promise, handle) = new_channel();
        promise.complete(Ok(vec![1, 2, 3]));

        handle.wait();
        handle.wait();
        assert!(handle.is_finished());
        assert_eq!(handle.join().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_join_from_another_thread() {
        let (promise, handle) = new_channel();

        let waiter = std::thread::spawn(move || handle.join().unwrap());
        std::thread::sleep(Duration::from_millis(10));
        promise.complete(Ok(7));

        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn test_handle_dropped_first() {
        let (promise, handle) = new_channel();
        drop(handle);
        // The writer still owns the cell and can complete it.
        promise.complete(Ok(1));
    }
}
