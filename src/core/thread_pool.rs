// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixed-size pool of worker threads sharing a single FIFO of tasks.

use super::handle::{completion_pair, Completer, TaskHandle};
use super::queue::{Task, TaskQueue};
use crate::error::{BuildError, TaskError};
use crate::macros::{log_debug, log_error, log_warn};
#[cfg(feature = "log_parallelism")]
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
use std::convert::TryFrom;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
#[cfg(any(test, feature = "log_parallelism"))]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    #[default]
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl ThreadCount {
    /// Resolves the number of threads to spawn.
    pub fn count(self) -> Result<NonZeroUsize, BuildError> {
        match self {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().map_err(BuildError::AvailableParallelism)
            }
            ThreadCount::Count(count) => Ok(count),
        }
    }
}

impl TryFrom<usize> for ThreadCount {
    type Error = BuildError;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count).map_err(|_| BuildError::ZeroThreads)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    #[default]
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), or fails, building the thread pool
    /// fails.
    Always,
}

/// A function run by each worker thread when it starts or stops.
pub type WorkerHook = Arc<dyn Fn() + Send + Sync>;

/// A builder for [`ThreadPool`].
#[derive(Clone, Default)]
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
    /// Function run once by each worker thread, before it waits for its first
    /// task.
    pub on_thread_start: Option<WorkerHook>,
    /// Function run once by each worker thread, after it has exited its task
    /// loop during shutdown.
    pub on_thread_stop: Option<WorkerHook>,
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use taskpool::{CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// # use std::sync::Arc;
    /// let started = Arc::new(AtomicUsize::new(0));
    /// let thread_pool = ThreadPoolBuilder {
    ///     num_threads: ThreadCount::try_from(4).unwrap(),
    ///     cpu_pinning: CpuPinningPolicy::No,
    ///     on_thread_start: Some({
    ///         let started = started.clone();
    ///         Arc::new(move || {
    ///             started.fetch_add(1, Ordering::SeqCst);
    ///         })
    ///     }),
    ///     on_thread_stop: None,
    /// }
    /// .build()
    /// .unwrap();
    ///
    /// let input = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
    /// let sum = thread_pool
    ///     .transform_reduce(&input, 0, |&x| x, |a, b| a + b)
    ///     .unwrap();
    /// assert_eq!(sum, 5 * 11);
    ///
    /// drop(thread_pool);
    /// assert_eq!(started.load(Ordering::SeqCst), 4);
    /// ```
    pub fn build(&self) -> Result<ThreadPool, BuildError> {
        ThreadPool::with_builder(self)
    }
}

/// State shared between the [`ThreadPool`] and its worker threads.
struct Shared {
    /// Tasks waiting for a worker.
    queue: TaskQueue,
    /// Per-worker statistics.
    #[cfg(feature = "log_parallelism")]
    stats: Box<[CachePadded<WorkerStats>]>,
    /// Number of tasks submitted so far.
    #[cfg(test)]
    submitted: AtomicUsize,
}

/// Counters updated by a single worker thread.
#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct WorkerStats {
    /// Number of tasks that this worker ran.
    tasks: AtomicUsize,
}

/// A pool of worker threads executing the submitted tasks in FIFO order of
/// submission.
///
/// Dropping the pool blocks until every task that was submitted (queued or
/// running) has finished, and then joins all the worker threads. The exception
/// is a pool whose last owner (e.g. an [`Arc<ThreadPool>`](std::sync::Arc)) is
/// dropped by one of its own tasks: a worker can't join itself, so that worker
/// is detached and the drop returns without waiting for it. The detached
/// worker still runs the remaining queued tasks before exiting.
///
/// ```
/// # use taskpool::ThreadPool;
/// let thread_pool = ThreadPool::new(4).unwrap();
///
/// let handles = (0..10)
///     .map(|i| thread_pool.enqueue(move || i * 2))
///     .collect::<Vec<_>>();
/// let doubled = handles
///     .into_iter()
///     .map(|handle| handle.join().unwrap())
///     .collect::<Vec<_>>();
/// assert_eq!(doubled, [0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
/// ```
pub struct ThreadPool {
    /// Number of worker threads.
    num_threads: NonZeroUsize,
    /// State shared with the worker threads.
    shared: Arc<Shared>,
    /// Handles to all the worker threads in the pool.
    threads: Vec<WorkerThreadHandle>,
}

/// Handle to a worker thread in a thread pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl ThreadPool {
    /// Spawns a thread pool with the given number of worker threads and
    /// default settings otherwise.
    ///
    /// Fails with [`BuildError::ZeroThreads`] if `num_threads` is zero.
    pub fn new(num_threads: usize) -> Result<Self, BuildError> {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads)?,
            ..Default::default()
        }
        .build()
    }

    /// Spawns a thread pool using the given parameters.
    fn with_builder(builder: &ThreadPoolBuilder) -> Result<Self, BuildError> {
        let count = builder.num_threads.count()?;
        let num_threads: usize = count.into();

        let shared = Arc::new(Shared {
            queue: TaskQueue::new(),
            #[cfg(feature = "log_parallelism")]
            stats: (0..num_threads).map(|_| CachePadded::default()).collect(),
            #[cfg(test)]
            submitted: AtomicUsize::new(0),
        });
        // Dropping this partially built pool (on error) terminates and joins the
        // threads spawned so far.
        let mut thread_pool = ThreadPool {
            num_threads: count,
            shared,
            threads: Vec::with_capacity(num_threads),
        };

        let (startup_sender, startup_receiver) = mpsc::channel();
        for id in 0..num_threads {
            let context = ThreadContext {
                id,
                shared: thread_pool.shared.clone(),
                cpu_pinning: builder.cpu_pinning,
                on_thread_start: builder.on_thread_start.clone(),
                on_thread_stop: builder.on_thread_stop.clone(),
            };
            let startup_sender = startup_sender.clone();
            let handle = std::thread::Builder::new()
                .name(format!("taskpool-worker-{id}"))
                .spawn(move || context.run(startup_sender))
                .map_err(|e| {
                    log_error!("[main thread] Failed to spawn worker thread #{id}: {e}");
                    BuildError::Spawn(e)
                })?;
            thread_pool.threads.push(WorkerThreadHandle { handle });
        }
        drop(startup_sender);
        log_debug!("[main thread] Spawned {num_threads} threads");

        // Every worker reports the outcome of its CPU pinning before running the
        // start hook. A closed channel means that all reports have been received.
        for report in startup_receiver.iter() {
            report?;
        }

        Ok(thread_pool)
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Returns the number of submitted tasks that no worker has claimed yet.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.num_queued()
    }

    /// Submits a task to the pool and returns a handle to its outcome.
    ///
    /// This never blocks beyond acquiring the queue lock. Arguments of the
    /// task are captured by the closure. A panic in the task is caught and
    /// reported through the handle; it doesn't affect the worker thread that
    /// ran it.
    ///
    /// Tasks may themselves submit tasks to the same pool, for example via an
    /// [`Arc<ThreadPool>`](std::sync::Arc).
    pub fn enqueue<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        // SAFETY: The task and its output are `'static`, so they can't outlive
        // anything they borrow.
        unsafe { self.enqueue_unchecked(f) }
    }

    /// Submits a task that may borrow non-`'static` data.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the task has finished and that its outcome
    /// has been moved out of the returned handle (with
    /// [`TaskHandle::join()`]) before the lifetime `'a` ends, including when
    /// the caller unwinds.
    pub(crate) unsafe fn enqueue_unchecked<'a, F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'a,
        R: Send + 'a,
    {
        let (completer, handle) = completion_pair();
        let task: Box<dyn FnOnce() + Send + 'a> = Box::new(move || run_task(f, completer));
        // SAFETY: Only the lifetime bound of the trait object changes. The task
        // drops its closure (and with it every borrow) before publishing its
        // outcome, and the caller guarantees that the outcome is consumed before
        // `'a` ends. Afterwards, the worker only drops an `Arc` to an empty slot.
        let task: Task =
            unsafe { std::mem::transmute::<Box<dyn FnOnce() + Send + 'a>, Task>(task) };
        self.shared.queue.push(task);
        #[cfg(test)]
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        handle
    }

    /// Returns the number of tasks submitted to this pool so far.
    #[cfg(test)]
    pub(crate) fn submitted_tasks(&self) -> usize {
        self.shared.submitted.load(Ordering::SeqCst)
    }
}

/// Runs a task's closure and publishes its outcome.
fn run_task<F, R>(f: F, completer: Completer<R>)
where
    F: FnOnce() -> R,
{
    let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic);
    if let Err(e) = &result {
        log_warn!("A task panicked: {e}");
    }
    completer.complete(result);
}

impl Drop for ThreadPool {
    /// Waits for all the submitted tasks to finish and joins all the threads in
    /// the pool.
    fn drop(&mut self) {
        log_debug!("[main thread] Notifying threads to finish...");
        self.shared.queue.terminate();

        log_debug!("[main thread] Joining threads in the pool...");
        let current = std::thread::current().id();
        for (i, t) in self.threads.drain(..).enumerate() {
            if t.handle.thread().id() == current {
                // The last owner of the pool was dropped by one of its own
                // tasks. This worker exits once the queue is drained.
                log_warn!("[thread {i}] Thread pool dropped from its own worker, detaching it");
                continue;
            }
            match t.handle.join() {
                Ok(()) => log_debug!("[main thread] Thread {i} joined"),
                Err(_) => log_error!("[main thread] Thread {i} panicked"),
            }
        }
        log_debug!("[main thread] Joined threads.");

        #[cfg(feature = "log_parallelism")]
        self.shared.print_statistics();
    }
}

#[cfg(feature = "log_parallelism")]
impl Shared {
    /// Logs how the tasks were distributed among the worker threads.
    fn print_statistics(&self) {
        let counts = self
            .stats
            .iter()
            .map(|stats| stats.tasks.load(Ordering::Relaxed))
            .collect::<Vec<_>>();
        let total = counts.iter().sum::<usize>();
        crate::macros::log_info!("Tasks executed per worker thread: {counts:?} (total {total})");
    }
}

/// Context object owned by a worker thread.
struct ThreadContext {
    /// Thread index.
    id: usize,
    /// State shared with the pool.
    shared: Arc<Shared>,
    /// Policy to pin this thread to a CPU.
    cpu_pinning: CpuPinningPolicy,
    /// Hook run before the task loop.
    on_thread_start: Option<WorkerHook>,
    /// Hook run after the task loop.
    on_thread_stop: Option<WorkerHook>,
}

impl ThreadContext {
    /// Main function run by this thread.
    fn run(self, startup: mpsc::Sender<Result<(), BuildError>>) {
        let id = self.id;
        // The receiver is gone if building the pool already failed, in which case
        // the queue is terminated and this thread exits right away.
        let _ = startup.send(pin_current_thread(id, self.cpu_pinning));
        drop(startup);

        self.run_hook(self.on_thread_start.as_ref(), "start");

        log_debug!("[thread {id}] Waiting for tasks");
        while let Some(task) = self.shared.queue.pop() {
            task();
            #[cfg(feature = "log_parallelism")]
            self.shared.stats[id].tasks.fetch_add(1, Ordering::Relaxed);
        }
        log_debug!("[thread {id}] Queue terminated and drained, exiting");

        self.run_hook(self.on_thread_stop.as_ref(), "stop");
    }

    /// Runs a start or stop hook, containing any panic to this call.
    fn run_hook(&self, hook: Option<&WorkerHook>, name: &str) {
        if let Some(hook) = hook {
            if panic::catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                log_error!("[thread {}] The {name} hook panicked", self.id);
            }
        }
    }
}

/// Pins the current thread to the CPU of the given index, following the
/// policy.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) -> Result<(), BuildError> {
    if cpu_pinning == CpuPinningPolicy::No {
        return Ok(());
    }

    let mut cpu_set = CpuSet::new();
    let result = cpu_set
        .set(id)
        .and_then(|()| sched_setaffinity(Pid::from_raw(0), &cpu_set));
    match (result, cpu_pinning) {
        (Ok(()), _) => {
            log_debug!("Pinned thread #{id} to CPU #{id}");
            Ok(())
        }
        (Err(e), CpuPinningPolicy::No | CpuPinningPolicy::IfSupported) => {
            log_warn!("Failed to set CPU affinity for thread #{id}: {e}");
            Ok(())
        }
        (Err(source), CpuPinningPolicy::Always) => {
            log_error!("Failed to set CPU affinity for thread #{id}: {source}");
            Err(BuildError::CpuPinning { worker: id, source })
        }
    }
}

/// Pins the current thread to the CPU of the given index, following the
/// policy.
#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) -> Result<(), BuildError> {
    match cpu_pinning {
        CpuPinningPolicy::No => Ok(()),
        CpuPinningPolicy::IfSupported => {
            log_warn!("Pinning thread #{id} to a CPU is not implemented on this platform.");
            Ok(())
        }
        CpuPinningPolicy::Always => Err(BuildError::CpuPinningUnsupported),
    }
}
