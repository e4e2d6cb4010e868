// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The FIFO of pending tasks shared by all the worker threads.

use super::util::Status;
use std::collections::VecDeque;

/// A type-erased unit of work, owned by the queue until a worker claims it.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// State protected by the queue lock.
struct QueueState {
    /// Tasks that no worker has claimed yet, in submission order.
    tasks: VecDeque<Task>,
    /// Set once when the pool starts shutting down, never reset.
    terminated: bool,
}

/// A mutex-guarded FIFO of tasks with a condition variable to wake up idle
/// workers.
pub struct TaskQueue {
    state: Status<QueueState>,
}

impl TaskQueue {
    /// Creates an empty, running queue.
    pub fn new() -> Self {
        Self {
            state: Status::new(QueueState {
                tasks: VecDeque::new(),
                terminated: false,
            }),
        }
    }

    /// Appends a task and wakes up one idle worker.
    pub fn push(&self, task: Task) {
        self.state.update_notify_one(|state| {
            debug_assert!(!state.terminated, "pushed a task on a terminated queue");
            state.tasks.push_back(task);
        });
    }

    /// Blocks until a task is available and claims it, or returns [`None`]
    /// once the queue is both terminated and empty.
    ///
    /// Tasks that are still queued when termination is signaled are handed out
    /// normally: the queue is drained before any worker is told to exit.
    pub fn pop(&self) -> Option<Task> {
        let mut guard = self
            .state
            .wait_while(|state| state.tasks.is_empty() && !state.terminated);
        // A terminated queue with remaining tasks still yields them.
        guard.tasks.pop_front()
    }

    /// Marks the queue as terminated and wakes up every worker.
    pub fn terminate(&self) {
        self.state.update_notify_all(|state| state.terminated = true);
    }

    /// Number of tasks waiting to be claimed.
    pub fn num_queued(&self) -> usize {
        self.state.lock().tasks.len()
    }
}
