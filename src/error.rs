// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic;
use std::sync::{Mutex, PoisonError};

/// Error returned when a [`ThreadPool`](crate::ThreadPool) cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A thread pool needs at least one worker thread.
    #[error("the number of worker threads must be larger than 0")]
    ZeroThreads,
    /// [`std::thread::available_parallelism()`] failed.
    #[error("failed to query the available parallelism: {0}")]
    AvailableParallelism(#[source] io::Error),
    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn a worker thread: {0}")]
    Spawn(#[source] io::Error),
    /// Pinning a worker thread to its CPU failed, with
    /// [`CpuPinningPolicy::Always`](crate::CpuPinningPolicy::Always).
    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[error("failed to set CPU affinity for worker thread #{worker}: {source}")]
    CpuPinning {
        /// Index of the worker thread.
        worker: usize,
        /// Underlying system error.
        #[source]
        source: nix::errno::Errno,
    },
    /// [`CpuPinningPolicy::Always`](crate::CpuPinningPolicy::Always) was
    /// requested on a platform where pinning isn't implemented.
    #[error("pinning threads to CPUs is not implemented on this platform")]
    CpuPinningUnsupported,
}

/// Failure of a task, delivered through its
/// [`TaskHandle`](crate::TaskHandle).
///
/// Two errors compare equal when they are of the same kind with the same
/// message, regardless of their panic payloads.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task panicked. The message is the panic payload when it was a
    /// string, which is the case for all `panic!()` invocations with a
    /// message.
    #[error("task panicked: {message}")]
    Panicked {
        /// Rendered panic payload.
        message: String,
        /// Original panic payload, see [`TaskError::into_panic()`].
        payload: PanicPayload,
    },
    /// The task was dropped before any worker could run it.
    #[error("task was dropped before it could run")]
    Abandoned,
}

impl TaskError {
    /// Builds a [`TaskError::Panicked`] from the payload captured by
    /// [`std::panic::catch_unwind()`].
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        TaskError::Panicked {
            message,
            payload: PanicPayload::new(payload),
        }
    }

    /// Returns the panic message if the task panicked.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            TaskError::Panicked { message, .. } => Some(message),
            TaskError::Abandoned => None,
        }
    }

    /// Returns the original panic payload, as passed to
    /// [`std::panic::resume_unwind()`] or returned by
    /// [`std::thread::JoinHandle::join()`].
    ///
    /// This is [`None`] if the task didn't panic, or if this error is a clone.
    /// Only the error moved out of [`TaskHandle::join()`](crate::TaskHandle::join),
    /// [`ThreadPool::for_each()`](crate::ThreadPool::for_each) or
    /// [`ThreadPool::transform_reduce()`](crate::ThreadPool::transform_reduce)
    /// carries the payload.
    ///
    /// ```
    /// # use taskpool::ThreadPool;
    /// #[derive(Debug, PartialEq)]
    /// struct Failure(u32);
    ///
    /// let thread_pool = ThreadPool::new(1).unwrap();
    /// let handle = thread_pool.enqueue(|| -> u32 { std::panic::panic_any(Failure(7)) });
    /// let payload = handle.join().unwrap_err().into_panic().unwrap();
    /// assert_eq!(payload.downcast_ref::<Failure>(), Some(&Failure(7)));
    /// ```
    pub fn into_panic(self) -> Option<Box<dyn Any + Send>> {
        match self {
            TaskError::Panicked { payload, .. } => payload.into_inner(),
            TaskError::Abandoned => None,
        }
    }

    /// Propagates this failure to the current thread as a panic.
    ///
    /// The original payload is re-raised with [`std::panic::resume_unwind()`]
    /// when available. Otherwise this panics with the error message.
    pub fn resume_unwind(self) -> ! {
        let message = self.to_string();
        match self.into_panic() {
            Some(payload) => panic::resume_unwind(payload),
            None => panic!("{message}"),
        }
    }
}

/// Payload of a task panic, moved along with its [`TaskError`].
///
/// Cloning yields an empty payload, and all payloads compare equal.
#[derive(Default)]
pub struct PanicPayload {
    payload: Mutex<Option<Box<dyn Any + Send>>>,
}

impl PanicPayload {
    fn new(payload: Box<dyn Any + Send>) -> Self {
        Self {
            payload: Mutex::new(Some(payload)),
        }
    }

    /// Returns whether the original payload is held.
    pub fn is_present(&self) -> bool {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn into_inner(self) -> Option<Box<dyn Any + Send>> {
        self.payload
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for PanicPayload {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for PanicPayload {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for PanicPayload {}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicPayload")
            .field("present", &self.is_present())
            .finish()
    }
}
