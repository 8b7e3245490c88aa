// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types returned by the engine and by task handles.

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Errors reported by an [`Engine`](crate::Engine) or a
/// [`TaskHandle`](crate::TaskHandle).
#[derive(Debug, Error)]
pub enum Error {
    /// The engine configuration was rejected, e.g. a worker count of zero.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A task was submitted after the engine started shutting down. Nothing
    /// was enqueued.
    #[error("the engine is shutting down or has stopped")]
    EngineStopped,

    /// The submitted task itself failed. Only its own handle observes this.
    #[error("task failed: {0}")]
    TaskFailed(TaskFailure),

    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn a worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// Pinning a worker thread to a CPU failed under
    /// [`CpuPinningPolicy::Always`](crate::CpuPinningPolicy::Always).
    #[error("failed to pin worker threads to CPUs: {0}")]
    CpuPinning(String),
}

/// Alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The reason why a task didn't produce a value.
pub enum TaskFailure {
    /// The task panicked. The original panic payload is kept so that the
    /// submitter can inspect it or re-raise it.
    Panicked(Box<dyn Any + Send + 'static>),
    /// The task was discarded without ever running.
    Abandoned,
}

impl TaskFailure {
    /// Returns the panic message, if the task panicked with a string payload
    /// (which is the case for `panic!("...")` with or without formatting
    /// arguments).
    pub fn message(&self) -> Option<&str> {
        match self {
            TaskFailure::Panicked(payload) => {
                if let Some(s) = payload.downcast_ref::<&'static str>() {
                    Some(*s)
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    Some(s.as_str())
                } else {
                    None
                }
            }
            TaskFailure::Abandoned => None,
        }
    }

    /// Returns the original panic payload, or [`None`] if the task was
    /// abandoned.
    pub fn into_payload(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            TaskFailure::Panicked(payload) => Some(payload),
            TaskFailure::Abandoned => None,
        }
    }

    /// Re-raises the task's panic on the current thread.
    ///
    /// An abandoned task is reported with a fresh panic.
    pub fn resume_unwind(self) -> ! {
        match self {
            TaskFailure::Panicked(payload) => std::panic::resume_unwind(payload),
            TaskFailure::Abandoned => panic!("task was abandoned before running"),
        }
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Panicked(_) => f
                .debug_tuple("Panicked")
                .field(&self.message().unwrap_or("<non-string payload>"))
                .finish(),
            TaskFailure::Abandoned => f.write_str("Abandoned"),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Panicked(_) => match self.message() {
                Some(msg) => write!(f, "task panicked: {msg}"),
                None => f.write_str("task panicked"),
            },
            TaskFailure::Abandoned => f.write_str("task was abandoned before running"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn catch(f: impl FnOnce() + std::panic::UnwindSafe) -> TaskFailure {
        TaskFailure::Panicked(std::panic::catch_unwind(f).unwrap_err())
    }

    #[test]
    fn test_message_static_str() {
        let failure = catch(|| panic!("boom"));
        assert_eq!(failure.message(), Some("boom"));
        assert_eq!(failure.to_string(), "task panicked: boom");
    }

    #[test]
    fn test_message_formatted() {
        let n = 42;
        let failure = catch(move || panic!("bad input {n}"));
        assert_eq!(failure.message(), Some("bad input 42"));
    }

    #[test]
    fn test_message_custom_payload() {
        let failure = catch(|| std::panic::panic_any(7u32));
        assert_eq!(failure.message(), None);
        assert_eq!(failure.to_string(), "task panicked");
        let payload = failure.into_payload().unwrap();
        assert_eq!(*payload.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn test_abandoned() {
        let failure = TaskFailure::Abandoned;
        assert_eq!(failure.message(), None);
        assert!(failure.into_payload().is_none());
    }

    #[test]
    #[should_panic(expected = "original message")]
    fn test_resume_unwind() {
        let failure = catch(|| panic!("original message"));
        failure.resume_unwind();
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::EngineStopped.to_string(),
            "the engine is shutting down or has stopped"
        );
        assert_eq!(
            Error::TaskFailed(TaskFailure::Abandoned).to_string(),
            "task failed: task was abandoned before running"
        );
    }
}
