//! Batch accumulation.

use std::num::NonZeroUsize;

/// Gathers pool indices into fixed-size batches.
#[derive(Debug)]
pub struct Accumulator {
    members: Vec<usize>,
    batch_size: NonZeroUsize,
}

impl Accumulator {
    /// Create an empty accumulator that reports full at `batch_size` members.
    #[must_use]
    pub fn new(batch_size: NonZeroUsize) -> Self {
        Self {
            members: Vec::with_capacity(batch_size.get()),
            batch_size,
        }
    }

    /// Append the entity at pool index `idx`.
    pub fn add(&mut self, idx: usize) {
        self.members.push(idx);
    }

    /// Whether the accumulator holds at least a batch worth of members.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.batch_size.get()
    }

    /// Number of members currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the accumulator holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Take the accumulated batch, in insertion order, leaving the
    /// accumulator empty.
    pub fn drain(&mut self) -> Vec<usize> {
        std::mem::replace(
            &mut self.members,
            Vec::with_capacity(self.batch_size.get()),
        )
    }
}
