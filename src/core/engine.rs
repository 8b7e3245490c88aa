// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A task engine running submitted closures on a fixed set of worker threads.

use super::channel::TaskHandle;
use super::envelope::{Envelope, TaskId};
use super::queue::QueueClosed;
use super::worker::{spawn_workers, SharedContext, WorkerHandle};
use crate::error::{Error, Result};
use crate::macros::{log_debug, log_trace};
use std::convert::TryFrom;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Number of threads to spawn in an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = Error;

    fn try_from(thread_count: usize) -> Result<Self> {
        let count = NonZeroUsize::try_from(thread_count).map_err(|_| {
            Error::InvalidConfiguration("the number of worker threads must be positive".into())
        })?;
        Ok(ThreadCount::Count(count))
    }
}

impl ThreadCount {
    /// Resolves this setting to a concrete number of threads.
    fn resolve(self) -> Result<NonZeroUsize> {
        match self {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().map_err(|e| {
                    Error::InvalidConfiguration(format!(
                        "getting the available parallelism failed: {e}"
                    ))
                })
            }
            ThreadCount::Count(count) => Ok(count),
        }
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), or fails for any thread, building an
    /// engine fails with [`Error::CpuPinning`].
    Always,
}

/// Lifecycle of an [`Engine`]. States are ordered and only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    /// The engine accepts new tasks.
    Active,
    /// A shutdown was requested: new tasks are rejected, but queued and running
    /// tasks still complete.
    Draining,
    /// All the worker threads have exited.
    Stopped,
}

/// A builder for [`Engine`].
#[derive(Clone, Copy, Debug)]
pub struct EngineBuilder {
    /// Number of worker threads to spawn in the engine.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl EngineBuilder {
    /// Spawns an engine.
    ///
    /// ```
    /// # use taskengine::{CpuPinningPolicy, EngineBuilder, ThreadCount};
    /// let engine = EngineBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// }
    /// .build()
    /// .unwrap();
    ///
    /// let handle = engine.submit(|| 6 * 7).unwrap();
    /// assert_eq!(handle.join().unwrap(), 42);
    /// ```
    pub fn build(&self) -> Result<Engine> {
        let num_threads = self.num_threads.resolve()?;
        Engine::spawn(num_threads, self.cpu_pinning)
    }
}

/// A pool of worker threads executing submitted tasks in submission order.
///
/// Each call to [`submit()`](Self::submit) returns a [`TaskHandle`] through
/// which the task's value, or its panic, is delivered. Tasks start in the order
/// they were submitted, but may complete in any order.
///
/// Dropping the engine has the same effect as calling
/// [`shutdown()`](Self::shutdown): tasks already submitted still run.
pub struct Engine {
    /// Context shared with the worker threads.
    context: Arc<SharedContext>,
    /// Handles to the worker threads, taken by the first shutdown.
    workers: Mutex<Vec<WorkerHandle>>,
    /// Number of worker threads that were spawned.
    num_threads: NonZeroUsize,
    /// Identifier of the next submitted task.
    next_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with the given number of worker threads, without CPU
    /// pinning.
    ///
    /// Fails with [`Error::InvalidConfiguration`] if `worker_count` is zero.
    pub fn new(worker_count: usize) -> Result<Self> {
        EngineBuilder {
            num_threads: ThreadCount::try_from(worker_count)?,
            cpu_pinning: CpuPinningPolicy::No,
        }
        .build()
    }

    fn spawn(num_threads: NonZeroUsize, cpu_pinning: CpuPinningPolicy) -> Result<Self> {
        let context = Arc::new(SharedContext::new());
        let workers = spawn_workers(num_threads, cpu_pinning, &context)?;
        Ok(Self {
            context,
            workers: Mutex::new(workers),
            num_threads,
            next_id: AtomicU64::new(0),
        })
    }

    /// Returns the number of worker threads that have been spawned in this
    /// engine.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Returns the current lifecycle state of this engine.
    pub fn state(&self) -> EngineState {
        *self.context.state.lock()
    }

    /// Returns the number of submitted tasks that no worker has picked up yet.
    pub fn pending_tasks(&self) -> usize {
        self.context.queue.len()
    }

    /// Submits a task to run on one of the worker threads.
    ///
    /// Fails with [`Error::EngineStopped`] if [`shutdown()`](Self::shutdown)
    /// was already called, in which case the task is dropped without running.
    ///
    /// ```
    /// # use taskengine::Engine;
    /// let engine = Engine::new(4).unwrap();
    /// let handles = (1..=5u64)
    ///     .map(|n| engine.submit(move || (1..=n).product::<u64>()).unwrap())
    ///     .collect::<Vec<_>>();
    /// let factorials = handles
    ///     .into_iter()
    ///     .map(|handle| handle.join().unwrap())
    ///     .collect::<Vec<_>>();
    /// assert_eq!(factorials, [1, 2, 6, 24, 120]);
    /// ```
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (envelope, handle) = Envelope::new(id, f);
        // The closed check and the insertion happen under the queue lock, so no
        // task can slip in once the shutdown has started.
        match self.context.queue.push(envelope) {
            Ok(()) => {
                log_trace!("[engine] Submitted task {id}");
                Ok(handle)
            }
            Err(QueueClosed(_envelope)) => {
                log_trace!("[engine] Rejected task {id}, the engine is shutting down");
                Err(Error::EngineStopped)
            }
        }
    }

    /// Stops accepting tasks, lets the worker threads finish all the tasks
    /// already submitted, and waits for them to exit.
    ///
    /// Only the first call does anything: later calls return immediately, even
    /// while the first one is still waiting for the workers. Use
    /// [`await_termination()`](Self::await_termination) to wait for the
    /// workers from elsewhere.
    ///
    /// Calling this from within a task running on this engine is allowed: the
    /// calling worker thread is simply not waited for, and exits on its own
    /// once the queue is drained.
    pub fn shutdown(&self) {
        if !self.context.close() {
            log_debug!("[engine] Shutdown already requested");
            return;
        }

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        log_debug!("[engine] Joining worker threads...");
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread_id() == current {
                log_debug!("[engine] Shutdown called from a worker thread, not joining it");
                continue;
            }
            worker.join();
        }
        log_debug!("[engine] Joined worker threads.");
    }

    /// Blocks until all the worker threads have exited, which only happens
    /// after [`shutdown()`](Self::shutdown) has been called.
    pub fn await_termination(&self) {
        let _guard = self
            .context
            .state
            .wait_while(|state| *state != EngineState::Stopped);
    }
}

impl Drop for Engine {
    /// Drains the queue and joins all the threads in the engine.
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("num_threads", &self.num_threads)
            .field("state", &self.state())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}
