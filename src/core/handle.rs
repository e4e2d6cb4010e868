// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Delivery of task results from the worker threads back to the submitter.

use super::util::Status;
use crate::error::TaskError;
use crate::macros::log_error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Completion state of a task.
enum Slot<T> {
    /// The task hasn't finished yet.
    Pending,
    /// The task finished, successfully or not.
    Done(Result<T, TaskError>),
    /// The outcome was moved out by [`TaskHandle::join()`].
    Taken,
}

impl<T> Slot<T> {
    fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }
}

/// Creates a connected pair of a [`Completer`], to be moved into the task,
/// and of the [`TaskHandle`] returned to the submitter.
pub fn completion_pair<T>() -> (Completer<T>, TaskHandle<T>) {
    let slot = Arc::new(Status::new(Slot::Pending));
    (
        Completer {
            slot: Some(slot.clone()),
        },
        TaskHandle { slot },
    )
}

/// Producer side of a task's result. Exactly one outcome is ever written.
///
/// If the completer is dropped without [`complete()`](Self::complete) having
/// been called (the task was dropped without running), the handle observes
/// [`TaskError::Abandoned`] rather than blocking forever.
pub struct Completer<T> {
    slot: Option<Arc<Status<Slot<T>>>>,
}

impl<T> Completer<T> {
    /// Publishes the task's outcome and wakes up every observer.
    pub fn complete(mut self, result: Result<T, TaskError>) {
        if let Some(slot) = self.slot.take() {
            slot.update_notify_all(|state| *state = Slot::Done(result));
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            log_error!("A task was dropped before running, marking it as abandoned");
            slot.update_notify_all(|state| *state = Slot::Done(Err(TaskError::Abandoned)));
        }
    }
}

/// Handle to the eventual outcome of a task submitted with
/// [`ThreadPool::enqueue()`](crate::ThreadPool::enqueue).
///
/// Observing the handle blocks the calling thread until a worker has run the
/// task. A task that panicked yields [`TaskError::Panicked`], carrying the
/// panic message. [`join()`](Self::join) also hands back the original panic
/// payload (see [`TaskError::into_panic()`]), while the copies returned by
/// [`get()`](Self::get) only carry the message. Dropping the handle doesn't
/// cancel the task: it still runs, and its outcome is discarded.
///
/// ```
/// # use taskpool::ThreadPool;
/// let thread_pool = ThreadPool::new(2).unwrap();
///
/// let handle = thread_pool.enqueue(|| 6 * 7);
/// assert_eq!(handle.get(), Ok(42));
/// // Observing a finished task again yields the same outcome.
/// assert_eq!(handle.get(), Ok(42));
/// assert_eq!(handle.join(), Ok(42));
///
/// let handle = thread_pool.enqueue(|| -> i32 { panic!("no answer") });
/// assert_eq!(handle.join().unwrap_err().panic_message(), Some("no answer"));
/// ```
pub struct TaskHandle<T> {
    slot: Arc<Status<Slot<T>>>,
}

impl<T> TaskHandle<T> {
    /// Waits for the task to finish and returns its outcome, consuming the
    /// handle.
    pub fn join(self) -> Result<T, TaskError> {
        let mut guard = self.slot.wait_while(|state| state.is_pending());
        match std::mem::replace(&mut *guard, Slot::Taken) {
            Slot::Done(result) => result,
            Slot::Pending | Slot::Taken => {
                unreachable!("a task handle observed a missing outcome after waiting")
            }
        }
    }

    /// Waits for the task to finish and returns a copy of its outcome. This
    /// can be called any number of times.
    pub fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let guard = self.slot.wait_while(|state| state.is_pending());
        match &*guard {
            Slot::Done(result) => result.clone(),
            Slot::Pending | Slot::Taken => {
                unreachable!("a task handle observed a missing outcome after waiting")
            }
        }
    }

    /// Waits for the task to finish, without retrieving its outcome.
    pub fn wait(&self) {
        drop(self.slot.wait_while(|state| state.is_pending()));
    }

    /// Waits for the task to finish for at most the given duration. Returns
    /// whether the task has finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (_guard, timed_out) = self
            .slot
            .wait_timeout_while(timeout, |state| state.is_pending());
        !timed_out
    }

    /// Returns whether the task has finished, without blocking.
    pub fn is_finished(&self) -> bool {
        !self.slot.lock().is_pending()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_complete_from_other_thread() {
        let (completer, handle) = completion_pair();
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(Ok("done".to_owned()));
        });
        assert_eq!(handle.join(), Ok("done".to_owned()));
        producer.join().unwrap();
    }

    #[test]
    fn test_get_is_repeatable() {
        let (completer, handle) = completion_pair::<u32>();
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        completer.complete(Err(TaskError::from_panic(payload)));
        for _ in 0..3 {
            let error = handle.get().unwrap_err();
            assert_eq!(error.panic_message(), Some("Box<dyn Any>"));
            // Copies don't carry the payload.
            assert!(error.into_panic().is_none());
        }
        let payload = handle.join().unwrap_err().into_panic().unwrap();
        assert_eq!(payload.downcast_ref::<u8>(), Some(&7));
    }

    #[test]
    fn test_multiple_waiters() {
        let (completer, handle) = completion_pair();
        let handle = Arc::new(handle);
        let waiters = (0..4)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.get())
            })
            .collect::<Vec<_>>();
        completer.complete(Ok(7));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(7));
        }
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let (completer, handle) = completion_pair::<()>();
        drop(completer);
        assert!(handle.is_finished());
        assert_eq!(handle.join(), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_wait_timeout_and_is_finished() {
        let (completer, handle) = completion_pair();
        assert!(!handle.is_finished());
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
        assert_eq!(format!("{handle:?}"), "TaskHandle { finished: false }");

        completer.complete(Ok(1));
        assert!(handle.wait_timeout(Duration::from_millis(10)));
        handle.wait();
        assert!(handle.is_finished());
        assert_eq!(format!("{handle:?}"), "TaskHandle { finished: true }");
    }

    #[test]
    fn test_non_clone_output_can_be_joined() {
        struct NotClone(u8);

        let (completer, handle) = completion_pair();
        completer.complete(Ok(NotClone(3)));
        assert_eq!(handle.join().map(|x| x.0), Ok(3));
    }
}
