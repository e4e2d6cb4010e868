// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A monitor: a value behind a [`Mutex`], paired with a [`Condvar`] to wait
/// for changes of that value.
///
/// None of the users of this type run foreign code while holding the lock, so
/// a poisoned mutex never holds a half-updated value and is simply recovered.
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

    /// Locks the status without waiting for any condition.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the status under the lock and notifies one waiting
    /// thread.
    pub fn update_notify_one<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.lock());
        self.condvar.notify_one();
        result
    }

    /// Applies `f` to the status under the lock and notifies all waiting
    /// threads.
    pub fn update_notify_all<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.lock());
        self.condvar.notify_all();
        result
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

    /// Same as [`wait_while()`](Self::wait_while), but gives up after the
    /// given timeout. The boolean is true if the timeout elapsed while the
    /// predicate was still true.
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
