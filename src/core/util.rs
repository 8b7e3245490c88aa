// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
///
/// No user code ever runs while the mutex is held, so a poisoned mutex still
/// guards a consistent value and poisoning is ignored.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Locks the status, without waiting on any condition.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes up one thread waiting on this status.
    pub fn wake_one(&self) {
        self.condvar.notify_one();
    }

    /// Wakes up all the threads waiting on this status.
    pub fn wake_all(&self) {
        self.condvar.notify_all();
    }

    /// Sets the status to the given value and notifies all waiting threads.
    pub fn notify_all(&self, t: T) {
        *self.lock() = t;
        self.condvar.notify_all();
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.lock(), predicate)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the predicate is false on this status, or until the given
    /// timeout elapses.
    ///
    /// The returned boolean is true if the timeout elapsed while the predicate
    /// was still true.
    pub fn wait_timeout_while(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&mut T) -> bool,
    ) -> (MutexGuard<'_, T>, bool) {
        let (guard, result) = self
            .condvar
            .wait_timeout_while(self.lock(), timeout, predicate)
            .unwrap_or_else(PoisonError::into_inner);
        (guard, result.timed_out())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn status_notify_wakes_waiter() {
        let status = Arc::new(Status::new(0));

        let waiter = std::thread::spawn({
            let status = status.clone();
            move || {
                let value = *status.wait_while(|x| *x == 0);
                value
            }
        });

        status.notify_all(42);
        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn status_lock_then_wake() {
        let status = Arc::new(Status::new(Vec::new()));

        let waiter = std::thread::spawn({
            let status = status.clone();
            move || {
                let item = status.wait_while(|v| v.is_empty()).pop();
                item
            }
        });

        status.lock().push("hello");
        status.wake_one();
        assert_eq!(waiter.join().unwrap(), Some("hello"));
    }

    #[test]
    fn status_wait_timeout() {
        let status = Status::new(false);

        let (guard, timed_out) = status.wait_timeout_while(Duration::from_millis(10), |x| !*x);
        assert!(timed_out);
        assert!(!*guard);
        drop(guard);

        status.notify_all(true);
        let (guard, timed_out) = status.wait_timeout_while(Duration::from_secs(1), |x| !*x);
        assert!(!timed_out);
        assert!(*guard);
    }

    #[test]
    fn status_survives_poisoning() {
        let status = Arc::new(Status::new(1));

        let _ = std::thread::spawn({
            let status = status.clone();
            move || {
                let _guard = status.lock();
                panic!("poisoning the mutex");
            }
        })
        .join();

        assert_eq!(*status.lock(), 1);
        status.notify_all(2);
        assert_eq!(*status.wait_while(|x| *x == 1), 2);
    }
}
