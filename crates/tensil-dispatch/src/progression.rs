//! Batch progression: a cheap cursor over a sample collection.
//!
//! A `Progression` is `{ set, tensor index, local offset }`. The invariant
//! is `offset < depth(index)` except transiently while `progress` wraps the
//! cursor into the next tensor. Cloning is cheap; the dispatcher hands each
//! worker its own copy while advancing the shared one.

use tensil_core::Tensor;

use crate::error::{DispatchError, Result};
use crate::samples::SampleSet;

#[derive(Clone)]
pub struct Progression {
    set: SampleSet,
    index: usize,
    offset: usize,
}

impl Progression {
    /// A cursor at the start of the collection.
    pub fn new(set: SampleSet) -> Result<Self> {
        if set.is_empty() {
            return Err(DispatchError::EmptySampleSet);
        }
        Ok(Self {
            set,
            index: 0,
            offset: 0,
        })
    }

    /// Current tensor index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Sample offset within the current tensor.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total samples in the underlying collection.
    pub fn global_size(&self) -> usize {
        self.set.total_samples()
    }

    /// Samples left in the current tensor. Workers must bound their slice
    /// requests by this.
    pub fn remaining_in_current(&self) -> Result<usize> {
        Ok(self.set.depth(self.index)? - self.offset)
    }

    /// Advance by `count` samples, wrapping tensor by tensor and cycling
    /// back to index 0 past the end of the collection.
    pub fn progress(&mut self, count: usize) -> Result<()> {
        self.offset += count;
        let tensors = self.set.len();
        let mut depth = self.set.depth(self.index)?;
        while self.offset >= depth {
            self.offset -= depth;
            self.index = (self.index + 1) % tensors;
            depth = self.set.depth(self.index)?;
        }
        Ok(())
    }

    /// Zero-copy input slice of exactly `size` samples from the current
    /// tensor only. Requests past the current tensor's remainder fail;
    /// slicing never crosses a tensor boundary.
    pub fn input_slice(&self, size: usize) -> Result<Tensor> {
        self.check_size(size)?;
        Ok(self
            .set
            .input(self.index)?
            .slice(self.offset, self.offset + size)?)
    }

    /// Zero-copy target slice, same bounds as [`input_slice`](Self::input_slice).
    pub fn target_slice(&self, size: usize) -> Result<Tensor> {
        self.check_size(size)?;
        Ok(self
            .set
            .target(self.index)?
            .slice(self.offset, self.offset + size)?)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let remaining = self.remaining_in_current()?;
        if size > remaining {
            return Err(DispatchError::SliceExceedsTensor {
                requested: size,
                remaining,
            });
        }
        Ok(())
    }
}
