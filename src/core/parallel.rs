// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parallel algorithms over slices, expressed as one pool task per chunk.

use super::handle::TaskHandle;
use super::range::Partition;
use super::thread_pool::ThreadPool;
use crate::error::TaskError;
use crate::macros::log_debug;

/// Handles to the chunk tasks of one parallel call.
///
/// Chunk tasks borrow data from the caller's stack frame. Whatever happens on
/// the calling thread (including a panic while submitting), this group doesn't
/// go away before every chunk task has finished and its outcome has been moved
/// out of its handle.
struct ChunkGroup<R> {
    /// Pending handles, in reverse chunk order.
    handles: Vec<TaskHandle<R>>,
}

impl<R> ChunkGroup<R> {
    fn with_capacity(num_chunks: usize) -> Self {
        Self {
            handles: Vec::with_capacity(num_chunks),
        }
    }

    fn push(&mut self, handle: TaskHandle<R>) {
        self.handles.push(handle);
    }

    /// Waits for all the chunks and returns their outcomes in chunk order.
    fn join_all(mut self) -> Vec<Result<R, TaskError>> {
        self.handles.reverse();
        let mut results = Vec::with_capacity(self.handles.len());
        while let Some(handle) = self.handles.pop() {
            results.push(handle.join());
        }
        results
    }
}

impl<R> Drop for ChunkGroup<R> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            log_debug!(
                "[main thread] Waiting for {} outstanding chunk task(s)",
                self.handles.len()
            );
        }
        while let Some(handle) = self.handles.pop() {
            // The outcome is discarded: this only runs on an early exit.
            let _ = handle.join();
        }
    }
}

impl ThreadPool {
    /// Applies `f` to every item of the slice in parallel, mutating the items
    /// in place.
    ///
    /// The slice is split into at most [`num_threads()`](Self::num_threads)
    /// contiguous chunks of near-equal size, and each chunk is processed in
    /// order by one task. This blocks until all the chunks are done.
    ///
    /// If `f` panics, the first failure in chunk order is returned once every
    /// chunk has finished. Other chunks still run to completion, and a chunk
    /// stops at the item that panicked, so the slice may be partially
    /// processed.
    ///
    /// ```
    /// # use taskpool::ThreadPool;
    /// let thread_pool = ThreadPool::new(4).unwrap();
    ///
    /// let mut numbers = [1, 2, 3, 4, 5];
    /// thread_pool.for_each(&mut numbers, |x| *x *= 2).unwrap();
    /// assert_eq!(numbers, [2, 4, 6, 8, 10]);
    /// ```
    pub fn for_each<T, F>(&self, items: &mut [T], f: F) -> Result<(), TaskError>
    where
        T: Send,
        F: Fn(&mut T) + Sync,
    {
        let partition = Partition::new(items.len(), self.num_threads());
        if partition.num_chunks() == 0 {
            return Ok(());
        }

        let f = &f;
        let mut group = ChunkGroup::with_capacity(partition.num_chunks());
        let mut rest = items;
        for range in partition.iter() {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            // SAFETY: The group joins every chunk task before this function
            // returns or unwinds, so the borrows of `items` and `f` outlive the
            // tasks.
            let handle = unsafe { self.enqueue_unchecked(move || chunk.iter_mut().for_each(f)) };
            group.push(handle);
        }
        debug_assert!(rest.is_empty());

        group.join_all().into_iter().collect()
    }

    /// Transforms every item of the slice and combines the results in
    /// parallel.
    ///
    /// The slice is split into chunks like for
    /// [`for_each()`](Self::for_each). Each chunk computes
    /// `combine(combine(init, transform(x0)), transform(x1))...` from left to
    /// right, starting from a clone of `init`. The partial results are then
    /// combined in chunk order, again starting from `init`.
    ///
    /// `combine` must be associative and `init` must be an identity for it, as
    /// `init` is folded in once per chunk. With a deterministic `transform` and
    /// `combine`, the result only depends on the number of worker threads,
    /// never on scheduling. An empty slice yields `init`.
    ///
    /// If `transform` or `combine` panics inside a chunk, the first failure in
    /// chunk order is returned once every chunk has finished.
    ///
    /// ```
    /// # use taskpool::ThreadPool;
    /// let thread_pool = ThreadPool::new(4).unwrap();
    ///
    /// let input = (1..=100).collect::<Vec<u64>>();
    /// let sum_of_squares = thread_pool
    ///     .transform_reduce(&input, 0, |&x| x * x, |a, b| a + b)
    ///     .unwrap();
    /// assert_eq!(sum_of_squares, 338_350);
    ///
    /// let words = ["hello", "world", "rust"];
    /// let sentence = thread_pool
    ///     .transform_reduce(&words, String::new(), |w| format!("{w} "), |a, b| a + &b)
    ///     .unwrap();
    /// assert_eq!(sentence, "hello world rust ");
    /// ```
    pub fn transform_reduce<T, A, Tr, C>(
        &self,
        items: &[T],
        init: A,
        transform: Tr,
        combine: C,
    ) -> Result<A, TaskError>
    where
        T: Sync,
        A: Clone + Send,
        Tr: Fn(&T) -> A + Sync,
        C: Fn(A, A) -> A + Sync,
    {
        let partition = Partition::new(items.len(), self.num_threads());
        if partition.num_chunks() == 0 {
            return Ok(init);
        }

        let transform = &transform;
        let combine = &combine;
        let mut group = ChunkGroup::with_capacity(partition.num_chunks());
        for range in partition.iter() {
            let chunk = &items[range];
            let seed = init.clone();
            // SAFETY: The group joins every chunk task before this function
            // returns or unwinds, so the borrows of `items`, `transform` and
            // `combine` outlive the tasks.
            let handle = unsafe {
                self.enqueue_unchecked(move || {
                    chunk
                        .iter()
                        .fold(seed, |acc, item| combine(acc, transform(item)))
                })
            };
            group.push(handle);
        }

        let partials = group
            .join_all()
            .into_iter()
            .collect::<Result<Vec<A>, TaskError>>()?;
        Ok(partials.into_iter().fold(init, combine))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::PanicPayload;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_for_each_empty() {
        let thread_pool = ThreadPool::new(2).unwrap();
        let mut data: Vec<i32> = Vec::new();
        thread_pool.for_each(&mut data, |x| *x = 1).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_for_each_single_item_runs_one_task() {
        let thread_pool = ThreadPool::new(4).unwrap();
        let calls = AtomicUsize::new(0);
        let mut data = [10];
        thread_pool
            .for_each(&mut data, |x| {
                calls.fetch_add(1, Ordering::SeqCst);
                *x *= 2;
            })
            .unwrap();
        assert_eq!(data, [20]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(thread_pool.submitted_tasks(), 1);
    }

    #[test]
    fn test_submits_one_task_per_chunk() {
        let thread_pool = ThreadPool::new(4).unwrap();
        let mut submitted = 0;
        for (len, num_chunks) in [(0, 0), (1, 1), (3, 3), (4, 4), (1000, 4)] {
            let mut data = vec![0u64; len];
            thread_pool.for_each(&mut data, |x| *x += 1).unwrap();
            submitted += num_chunks;
            assert_eq!(thread_pool.submitted_tasks(), submitted, "for_each, len={len}");

            let sum = thread_pool.transform_reduce(&data, 0, |&x| x, |a, b| a + b);
            assert_eq!(sum, Ok(len as u64));
            submitted += num_chunks;
            assert_eq!(
                thread_pool.submitted_tasks(),
                submitted,
                "transform_reduce, len={len}"
            );
        }
    }

    #[test]
    fn test_for_each_uses_at_most_num_threads_workers() {
        let thread_pool = ThreadPool::new(4).unwrap();
        let threads = Mutex::new(Vec::new());
        let mut data = vec![0u8; 1000];
        thread_pool
            .for_each(&mut data, |_| {
                threads.lock().unwrap().push(std::thread::current().id());
            })
            .unwrap();
        let threads = threads.into_inner().unwrap();
        assert_eq!(threads.len(), 1000);
        let distinct = threads.iter().collect::<HashSet<_>>();
        assert!(!distinct.is_empty() && distinct.len() <= 4);
    }

    #[test]
    fn test_for_each_chunk_order_within_chunk() {
        // Each chunk processes its items left to right.
        let thread_pool = ThreadPool::new(3).unwrap();
        let order = Mutex::new(Vec::new());
        let mut data = (0..30).collect::<Vec<usize>>();
        thread_pool
            .for_each(&mut data, |x| order.lock().unwrap().push(*x))
            .unwrap();
        let order = order.into_inner().unwrap();
        for chunk in [0..10, 10..20, 20..30] {
            let seen = order
                .iter()
                .copied()
                .filter(|x| chunk.contains(x))
                .collect::<Vec<_>>();
            assert_eq!(seen, chunk.collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_for_each_panic_propagates_after_all_chunks() {
        let thread_pool = ThreadPool::new(2).unwrap();
        let mut data = [1, 2, 3];
        let result = thread_pool.for_each(&mut data, |x| {
            if *x == 2 {
                panic!("ForEach Test Exception");
            }
            *x *= 2;
        });
        assert_eq!(
            result,
            Err(TaskError::Panicked {
                message: "ForEach Test Exception".to_owned(),
                payload: PanicPayload::default(),
            })
        );
        // Chunks are [1, 2] and [3]: the first one stopped at the panic, the
        // second one completed.
        assert_eq!(data, [2, 2, 6]);
    }

    #[test]
    fn test_for_each_reports_first_failure_in_chunk_order() {
        let thread_pool = ThreadPool::new(4).unwrap();
        let mut data = [0, 1, 2, 3];
        let result = thread_pool.for_each(&mut data, |x| {
            if *x == 1 {
                // Fail late, after the later chunk has failed.
                std::thread::sleep(Duration::from_millis(50));
                panic!("chunk 1");
            }
            if *x == 3 {
                panic!("chunk 3");
            }
        });
        assert_eq!(result.unwrap_err().panic_message(), Some("chunk 1"));
    }

    #[test]
    fn test_for_each_keeps_panic_payload() {
        #[derive(Debug, PartialEq)]
        struct Failure {
            index: usize,
        }

        let thread_pool = ThreadPool::new(2).unwrap();
        let mut data = [0usize, 1, 2, 3];
        let error = thread_pool
            .for_each(&mut data, |x| {
                if *x == 3 {
                    std::panic::panic_any(Failure { index: *x });
                }
            })
            .unwrap_err();
        let payload = error.into_panic().unwrap();
        assert_eq!(payload.downcast_ref::<Failure>(), Some(&Failure { index: 3 }));
    }

    #[test]
    fn test_pool_usable_after_failure() {
        let thread_pool = ThreadPool::new(2).unwrap();
        let mut data = [1, 2, 3, 4];
        assert!(thread_pool
            .for_each(&mut data, |_| panic!("always"))
            .is_err());
        thread_pool.for_each(&mut data, |x| *x += 1).unwrap();
        assert_eq!(data, [2, 3, 4, 5]);
    }

    #[test]
    fn test_transform_reduce_empty() {
        let thread_pool = ThreadPool::new(2).unwrap();
        let data: [i32; 0] = [];
        let result = thread_pool.transform_reduce(&data, 7, |&x| x * 2, |a, b| a + b);
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_transform_reduce_single_item() {
        let thread_pool = ThreadPool::new(1).unwrap();
        let result = thread_pool.transform_reduce(&[10], 0, |&x| x * 2, |a, b| a + b);
        assert_eq!(result, Ok(20));
    }

    #[test]
    fn test_transform_reduce_product() {
        let thread_pool = ThreadPool::new(4).unwrap();
        let result = thread_pool.transform_reduce(&[1, 2, 3, 4, 5], 1, |&x| x, |a, b| a * b);
        assert_eq!(result, Ok(120));
    }

    #[test]
    fn test_transform_reduce_is_ordered() {
        // String concatenation is associative but not commutative.
        let thread_pool = ThreadPool::new(3).unwrap();
        let input = (0..26u8).map(|i| (b'a' + i) as char).collect::<Vec<_>>();
        for _ in 0..10 {
            let result = thread_pool.transform_reduce(
                &input,
                String::new(),
                |c| c.to_string(),
                |a, b| a + &b,
            );
            assert_eq!(result.as_deref(), Ok("abcdefghijklmnopqrstuvwxyz"));
        }
    }

    #[test]
    fn test_transform_reduce_panic() {
        let thread_pool = ThreadPool::new(2).unwrap();
        let result = thread_pool.transform_reduce(
            &[1, 2, 3],
            0,
            |&x| {
                if x == 2 {
                    panic!("Transform Test Exception");
                }
                x * 2
            },
            |a, b| a + b,
        );
        assert_eq!(
            result.unwrap_err().panic_message(),
            Some("Transform Test Exception")
        );
    }

    #[test]
    fn test_transform_reduce_panic_waits_for_other_chunks() {
        let thread_pool = ThreadPool::new(2).unwrap();
        let finished = AtomicUsize::new(0);
        // Chunks are [1, 2] and [3]. The second chunk finishes well after the
        // first one has failed.
        let result = thread_pool.transform_reduce(
            &[1, 2, 3],
            0,
            |&x| {
                if x == 2 {
                    panic!("Transform Test Exception");
                }
                if x == 3 {
                    std::thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                }
                x
            },
            |a, b| a + b,
        );
        assert_eq!(
            result.unwrap_err().panic_message(),
            Some("Transform Test Exception")
        );
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transform_reduce_borrows_caller_state() {
        let thread_pool = ThreadPool::new(4).unwrap();
        let weights = vec![2u64; 100];
        let input = (0..100).collect::<Vec<usize>>();
        let result = thread_pool.transform_reduce(&input, 0u64, |&i| weights[i], |a, b| a + b);
        assert_eq!(result, Ok(200));
    }
}
