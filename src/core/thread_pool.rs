// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A bounded thread pool: fixed worker threads over a fixed-capacity queue.

use super::queue::BoundedQueue;
use crate::error::{BuildError, SubmitError};
use crate::macros::{log_debug, log_error, log_warn};
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
use std::sync::Arc;
use std::thread::JoinHandle;

/// Maximum number of worker threads a pool will spawn. Requests above this
/// are clamped.
pub const MAX_THREADS: usize = 64;

/// Queue capacity used by [`ThreadPoolBuilder::default()`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A unit of work admitted into the pool.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`], with a minimum of one.
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

impl ThreadCount {
    /// Resolves to a concrete thread count, clamped to [`MAX_THREADS`].
    fn resolve(self) -> NonZeroUsize {
        let count = match self {
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            ThreadCount::Count(count) => count.get(),
        };
        if count > MAX_THREADS {
            log_warn!("Requested {count} worker threads, clamping to {MAX_THREADS}");
        }
        NonZeroUsize::new(count.min(MAX_THREADS)).unwrap()
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a thread pool will panic.
    Always,
}

/// A builder for [`ThreadPool`].
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Capacity of the task queue. Producers block once this many tasks are
    /// queued and not yet picked up by a worker.
    pub queue_capacity: NonZeroUsize,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl Default for ThreadPoolBuilder {
    /// Available parallelism, a queue of [`DEFAULT_QUEUE_CAPACITY`] tasks and
    /// no CPU pinning.
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            queue_capacity: NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
        }
    }
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool, or fails with the underlying OS error if a
    /// worker thread couldn't be created.
    ///
    /// The workers are spawned sequentially; if one of them fails to spawn,
    /// the ones already running are shut down and joined before the error is
    /// returned, so no thread is left behind.
    ///
    /// ```
    /// # use std::num::NonZeroUsize;
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// # use std::sync::Arc;
    /// # use workpool::{CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    /// let pool = ThreadPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     queue_capacity: NonZeroUsize::new(16).unwrap(),
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// }
    /// .build()
    /// .unwrap();
    ///
    /// let counter = Arc::new(AtomicUsize::new(0));
    /// for _ in 0..100 {
    ///     let counter = counter.clone();
    ///     pool.submit(move || {
    ///         counter.fetch_add(1, Ordering::Relaxed);
    ///     })
    ///     .unwrap();
    /// }
    ///
    /// // Dropping the pool blocks until every queued task has run.
    /// drop(pool);
    /// assert_eq!(counter.load(Ordering::Relaxed), 100);
    /// ```
    pub fn build(&self) -> Result<ThreadPool, BuildError> {
        let num_threads = self.num_threads.resolve();
        let cpu_pinning = self.cpu_pinning;

        // The queue (mutex and both condition variables) must exist before
        // the first worker starts its consume loop.
        let queue = Arc::new(BoundedQueue::new(self.queue_capacity));

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        let mut threads = Vec::with_capacity(num_threads.get());
        for id in 0..num_threads.get() {
            let context = WorkerContext {
                id,
                queue: queue.clone(),
            };
            let result = std::thread::Builder::new()
                .name(format!("workpool-{id}"))
                .spawn(move || {
                    #[cfg(all(
                        not(miri),
                        any(
                            target_os = "android",
                            target_os = "dragonfly",
                            target_os = "freebsd",
                            target_os = "linux"
                        )
                    ))]
                    pin_current_thread(id, cpu_pinning);
                    context.run()
                });
            match result {
                Ok(handle) => threads.push(WorkerThreadHandle { handle }),
                Err(e) => {
                    log_error!("[main thread] Failed to spawn worker thread {id}: {e}");
                    // Join the workers already spawned so none is abandoned.
                    queue.close();
                    for t in threads.drain(..) {
                        let _ = t.handle.join();
                    }
                    return Err(BuildError::Spawn {
                        worker: id,
                        source: e,
                    });
                }
            }
        }
        log_debug!("[main thread] Spawned threads");

        Ok(ThreadPool { threads, queue })
    }
}

/// Pins the current thread to the CPU matching the given worker index.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) {
    match cpu_pinning {
        CpuPinningPolicy::No => (),
        CpuPinningPolicy::IfSupported => {
            let mut cpu_set = CpuSet::new();
            if let Err(_e) = cpu_set.set(id) {
                log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
            } else if let Err(_e) = sched_setaffinity(Pid::from_raw(0), &cpu_set) {
                log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
            } else {
                log_debug!("Pinned thread #{id} to CPU #{id}");
            }
        }
        CpuPinningPolicy::Always => {
            let mut cpu_set = CpuSet::new();
            if let Err(e) = cpu_set.set(id) {
                panic!("Failed to set CPU affinity for thread #{id}: {e}");
            } else if let Err(e) = sched_setaffinity(Pid::from_raw(0), &cpu_set) {
                panic!("Failed to set CPU affinity for thread #{id}: {e}");
            } else {
                log_debug!("Pinned thread #{id} to CPU #{id}");
            }
        }
    }
}

/// A bounded thread pool.
///
/// A fixed set of worker threads, spawned once by
/// [`ThreadPoolBuilder::build()`], consumes tasks from a fixed-capacity
/// queue. [`submit()`](Self::submit) blocks while the queue is full
/// (backpressure) and fails once shutdown has begun. Dropping the pool closes
/// the queue, lets the workers drain the tasks already admitted, and joins
/// every worker thread.
pub struct ThreadPool {
    /// Handles to all the worker threads in the pool.
    threads: Vec<WorkerThreadHandle>,
    /// Task queue shared with the worker threads.
    queue: Arc<BoundedQueue<Job>>,
}

/// Handle to a worker thread in a thread pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl ThreadPool {
    /// Submits a task to the pool, blocking while the queue is full.
    ///
    /// Tasks submitted from one thread are dequeued in submission order; a
    /// pool with a single worker therefore executes them in that order.
    /// Fails with [`SubmitError::Cancelled`] once
    /// [`shutdown()`](Self::shutdown) has been called, even if queue slots
    /// are free.
    ///
    /// The task has no return channel: results must be communicated through
    /// state owned by the caller, e.g. an atomic accumulator captured by the
    /// closure. A task must not submit to its own pool: when the queue is
    /// full and no other worker is free to drain it, this deadlocks.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue
            .push(Box::new(task) as Job)
            .map_err(|_| SubmitError::Cancelled)
    }

    /// Begins shutdown: stops admission and wakes every blocked producer and
    /// worker.
    ///
    /// Tasks already queued still run to completion; no new task is admitted
    /// past this point, even into free queue slots. Calling this more than
    /// once has no further effect. Dropping the pool afterwards joins the
    /// workers once the queue is drained.
    pub fn shutdown(&self) {
        log_debug!("[main thread] Shutting down the pool...");
        self.queue.close();
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.threads.len().try_into().unwrap()
    }

    /// Returns the capacity of the task queue.
    pub fn queue_capacity(&self) -> NonZeroUsize {
        self.queue.capacity()
    }

    /// Returns the number of tasks queued and not yet picked up by a worker.
    ///
    /// This is a lock-free snapshot and may be stale by the time it is
    /// observed; it never counts tasks currently executing.
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for ThreadPool {
    /// Joins all the threads in the pool, blocking until every task admitted
    /// before the shutdown has run.
    #[allow(clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        self.shutdown();

        log_debug!("[main thread] Joining threads in the pool...");
        for (_i, t) in self.threads.drain(..).enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Thread {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");
    }
}

/// Context object owned by a worker thread.
struct WorkerContext {
    /// Thread index.
    id: usize,
    /// Task queue shared with the pool.
    queue: Arc<BoundedQueue<Job>>,
}

impl WorkerContext {
    /// Main function run by this thread: dequeue and execute tasks until the
    /// queue is closed and drained.
    fn run(&self) {
        log_debug!("[thread {}] Waiting for tasks", self.id);
        while let Some(task) = self.queue.pop() {
            log_debug!("[thread {}] Executing a task", self.id);
            // The task runs with no lock held, so queue operations and other
            // workers are never blocked by one task's execution time.
            task();
        }
        log_debug!("[thread {}] Queue closed and drained, exiting", self.id);
    }
}
