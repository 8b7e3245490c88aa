// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Type-erased units of work.

use super::channel::{channel, TaskHandle};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Identifier of a task, unique within the [`Engine`](crate::Engine) that
/// accepted it. Identifiers increase in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value of this identifier.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A queued task: the user's closure together with the writing side of its
/// result channel, erased to a single boxed call.
pub(crate) struct Envelope {
    id: TaskId,
    action: Box<dyn FnOnce() + Send + 'static>,
}

impl Envelope {
    /// Wraps the given function into an envelope, returning the handle through
    /// which the function's outcome will be delivered.
    pub(crate) fn new<F, T>(id: TaskId, f: F) -> (Self, TaskHandle<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, handle) = channel(id);
        let action = Box::new(move || {
            // A panicking task must not unwind into the worker thread, so that
            // the pool keeps its size.
            let outcome = catch_unwind(AssertUnwindSafe(f));
            // If the handle is already gone, completing drops the outcome here,
            // and its destructor may panic too.
            let _ = catch_unwind(AssertUnwindSafe(move || promise.complete(outcome)));
        });
        (Self { id, action }, handle)
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Runs the task and publishes its outcome. This never panics.
    pub(crate) fn run(self) {
        (self.action)()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{Error, TaskFailure};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_run_delivers_value() {
        let (envelope, handle) = Envelope::new(TaskId::new(3), || 6 * 7);
        assert_eq!(envelope.id(), TaskId::new(3));
        assert_eq!(handle.id(), TaskId::new(3));

        envelope.run();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_run_catches_panic() {
        let (envelope, handle) = Envelope::new(TaskId::new(0), || -> u32 { panic!("inside task") });

        envelope.run();
        match handle.join() {
            Err(Error::TaskFailed(failure)) => assert_eq!(failure.message(), Some("inside task")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_envelope_never_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (envelope, handle) = Envelope::new(TaskId::new(0), {
            let counter = counter.clone();
            move || counter.fetch_add(1, Ordering::SeqCst)
        });

        drop(envelope);
        assert!(matches!(
            handle.join(),
            Err(Error::TaskFailed(TaskFailure::Abandoned))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_task_id_order_and_display() {
        assert!(TaskId::new(1) < TaskId::new(2));
        assert_eq!(TaskId::new(5).as_u64(), 5);
        assert_eq!(TaskId::new(5).to_string(), "#5");
    }
}
