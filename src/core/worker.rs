// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker threads: spawning, CPU pinning and the main execution loop.

use super::engine::{CpuPinningPolicy, EngineState};
use super::envelope::Envelope;
use super::queue::TaskQueue;
use super::util::Status;
use crate::error::{Error, Result};
use crate::macros::{log_debug, log_error, log_trace, log_warn};
use crossbeam_utils::CachePadded;
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

/// Whether pinning threads to CPUs is implemented on this platform.
pub(crate) const CPU_PINNING_SUPPORTED: bool = cfg!(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
));

/// Context shared between the engine and the worker threads.
pub(crate) struct SharedContext {
    /// Tasks waiting for a worker.
    pub(crate) queue: TaskQueue<Envelope>,
    /// Lifecycle of the engine. Only ever moves forward.
    pub(crate) state: Status<EngineState>,
    /// Number of worker threads that haven't exited yet.
    num_live_workers: CachePadded<AtomicUsize>,
}

impl SharedContext {
    pub(crate) fn new() -> Self {
        Self {
            queue: TaskQueue::new(),
            state: Status::new(EngineState::Active),
            num_live_workers: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Closes the queue and moves the state to [`EngineState::Draining`] as one
    /// step: the state lock is held while closing, so a task rejected by the
    /// queue is never observed together with an [`EngineState::Active`] state.
    ///
    /// Returns whether this call closed the queue.
    pub(crate) fn close(&self) -> bool {
        let mut guard = self.state.lock();
        if !self.queue.close() {
            return false;
        }
        if *guard < EngineState::Draining {
            log_debug!("[engine] State transition {:?} -> Draining", *guard);
            *guard = EngineState::Draining;
        }
        drop(guard);
        self.state.wake_all();
        true
    }

    /// Moves the state forward to `state`, unless it's already there or
    /// beyond, and notifies the threads waiting on it.
    pub(crate) fn advance_state(&self, state: EngineState) {
        let mut guard = self.state.lock();
        if *guard < state {
            log_debug!("[engine] State transition {:?} -> {state:?}", *guard);
            *guard = state;
        }
        drop(guard);
        self.state.wake_all();
    }
}

/// Handle to a worker thread, owned by the engine.
pub(crate) struct WorkerHandle {
    /// Worker index.
    id: usize,
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Returns the identifier of the underlying thread.
    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Waits for the thread to exit.
    pub(crate) fn join(self) {
        let _id = self.id;
        let result = self.handle.join();
        match result {
            Ok(_) => log_debug!("[engine] Worker {_id} joined with result: {result:?}"),
            Err(_) => log_error!("[engine] Worker {_id} joined with result: {result:?}"),
        }
    }
}

/// Spawns `num_threads` worker threads consuming the queue of `context`.
///
/// On failure, the threads that were already spawned are stopped and joined
/// before returning.
pub(crate) fn spawn_workers(
    num_threads: NonZeroUsize,
    cpu_pinning: CpuPinningPolicy,
    context: &Arc<SharedContext>,
) -> Result<Vec<WorkerHandle>> {
    let cpu_pinning = if CPU_PINNING_SUPPORTED {
        cpu_pinning
    } else {
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                return Err(Error::CpuPinning(
                    "pinning threads to CPUs is not implemented on this platform".into(),
                ))
            }
        }
        CpuPinningPolicy::No
    };

    let num_threads = num_threads.get();
    let (pin_sender, pin_receiver) = mpsc::channel();
    let mut workers = Vec::with_capacity(num_threads);

    for id in 0..num_threads {
        let worker = Worker {
            id,
            context: context.clone(),
        };
        let pin_sender = pin_sender.clone();

        context.num_live_workers.fetch_add(1, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("taskengine-worker-{id}"))
            .spawn(move || {
                let pinned = match cpu_pinning {
                    CpuPinningPolicy::No => Ok(()),
                    CpuPinningPolicy::IfSupported | CpuPinningPolicy::Always => {
                        pin_current_thread(id)
                    }
                };
                // The receiver outlives the spawning loop, which waits for every worker's
                // report.
                let _ = pin_sender.send(pinned);
                drop(pin_sender);
                worker.run();
            });

        match spawned {
            Ok(handle) => workers.push(WorkerHandle { id, handle }),
            Err(e) => {
                context.num_live_workers.fetch_sub(1, Ordering::SeqCst);
                log_error!("[engine] Failed to spawn worker thread #{id}: {e}");
                stop_workers(context, workers);
                return Err(Error::ThreadSpawn(e));
            }
        }
    }
    drop(pin_sender);
    log_debug!("[engine] Spawned {num_threads} worker threads");

    let failures: Vec<String> = pin_receiver
        .iter()
        .filter_map(|pinned| pinned.err())
        .collect();
    if !failures.is_empty() {
        let failures = failures.join("; ");
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Failed to set CPU affinity: {failures}");
            }
            CpuPinningPolicy::Always => {
                stop_workers(context, workers);
                return Err(Error::CpuPinning(failures));
            }
        }
    }

    Ok(workers)
}

/// Closes the queue and joins the given workers, used when the engine can't be
/// built after all.
fn stop_workers(context: &SharedContext, workers: Vec<WorkerHandle>) {
    context.close();
    for worker in workers {
        worker.join();
    }
}

#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize) -> std::result::Result<(), String> {
    let mut cpu_set = CpuSet::new();
    cpu_set
        .set(id)
        .map_err(|e| format!("thread #{id}: {e}"))?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(|e| format!("thread #{id}: {e}"))?;
    log_debug!("Pinned thread #{id} to CPU #{id}");
    Ok(())
}

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(id: usize) -> std::result::Result<(), String> {
    Err(format!(
        "thread #{id}: pinning threads to CPUs is not implemented on this platform"
    ))
}

/// Context object owned by a worker thread.
struct Worker {
    /// Worker index.
    id: usize,
    /// Context shared with the engine.
    context: Arc<SharedContext>,
}

impl Worker {
    /// Main function run by this thread: executes tasks until the queue is
    /// closed and drained.
    fn run(self) {
        // Registers this thread's exit even if the loop unwinds.
        let _notifier = ExitNotifier {
            id: self.id,
            context: &self.context,
        };

        log_debug!("[worker {}] Waiting for tasks", self.id);
        while let Some(envelope) = self.context.queue.pop() {
            let _task = envelope.id();
            log_trace!("[worker {}] Running task {_task}", self.id);
            envelope.run();
            log_trace!("[worker {}] Finished task {_task}", self.id);
        }
        log_debug!("[worker {}] Queue closed and drained, exiting", self.id);
    }
}

/// Object whose destructor records that a worker thread exited. The last
/// worker to exit moves the engine to [`EngineState::Stopped`].
struct ExitNotifier<'a> {
    /// Worker index.
    id: usize,
    /// Context shared with the engine.
    context: &'a SharedContext,
}

impl Drop for ExitNotifier<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log_error!("[worker {}] Detected panic in this thread", self.id);
        }

        let live = self
            .context
            .num_live_workers
            .fetch_sub(1, Ordering::SeqCst);
        assert!(live > 0);
        log_debug!(
            "[worker {}] Decremented the number of live workers: {}",
            self.id,
            live - 1
        );

        if live == 1 {
            log_debug!("[worker {}] We're the last worker, engine stopped", self.id);
            self.context.advance_state(EngineState::Stopped);
        }
    }
}
