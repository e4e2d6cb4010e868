// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Partitioning of an input range into contiguous chunks.

use std::num::NonZeroUsize;
use std::ops::Range;

/// A partition of `0..len` into contiguous, non-overlapping chunks of
/// near-equal size.
///
/// There are `min(max_chunks, len)` chunks. Each contains `len / num_chunks`
/// items, and the `len % num_chunks` leading chunks contain one more item.
/// Chunks are ordered: chunk `i + 1` starts where chunk `i` ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Total number of items.
    len: usize,
    /// Number of non-empty chunks.
    num_chunks: usize,
}

impl Partition {
    /// Partitions `0..len` into at most `max_chunks` chunks.
    pub fn new(len: usize, max_chunks: NonZeroUsize) -> Self {
        Self {
            len,
            num_chunks: max_chunks.get().min(len),
        }
    }

    /// Number of chunks, zero if and only if the range is empty.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Returns the range of the chunk at the given index.
    ///
    /// Panics if `index >= self.num_chunks()`.
    pub fn chunk(&self, index: usize) -> Range<usize> {
        assert!(
            index < self.num_chunks,
            "chunk index {index} out of bounds for {} chunks",
            self.num_chunks
        );
        let base = self.len / self.num_chunks;
        let remainder = self.len % self.num_chunks;
        let start = index * base + index.min(remainder);
        let end = start + base + usize::from(index < remainder);
        start..end
    }

    /// Iterates over the chunks in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Range<usize>> + '_ {
        (0..self.num_chunks).map(|index| self.chunk(index))
    }
}
