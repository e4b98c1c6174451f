//! The optimizer-operation contract between the dispatcher and a model.

use parking_lot::Mutex;
use tensil_core::{Queue, Tensor};

use crate::error::Result;

/// One reentrant unit of optimization work, shared by every worker of a
/// dispatch. `process` consumes one batch slice on the worker's queue and
/// accumulates into internal state; `update_model` applies the accumulated
/// state once the dispatcher has joined all workers. Implementations
/// synchronize internally.
pub trait BatchOp: Send + Sync {
    fn process(&self, input: &Tensor, target: &Tensor, queue: &Queue) -> Result<()>;

    fn update_model(&self) -> Result<()>;
}

#[derive(Default)]
struct AccumulatorState {
    sum: Vec<f32>,
    samples: usize,
    slices: usize,
    updates: usize,
}

/// Reference `BatchOp`: collapses every input slice along depth and keeps a
/// running element-wise sum plus sample accounting. Useful as a smoke-test
/// op and as the template for real optimizer operations.
#[derive(Default)]
pub struct BatchAccumulator {
    state: Mutex<AccumulatorState>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples consumed so far.
    pub fn samples(&self) -> usize {
        self.state.lock().samples
    }

    /// Slices processed so far.
    pub fn slices(&self) -> usize {
        self.state.lock().slices
    }

    /// Times `update_model` has run.
    pub fn updates(&self) -> usize {
        self.state.lock().updates
    }

    /// Element-wise sum over every sample seen.
    pub fn sum(&self) -> Vec<f32> {
        self.state.lock().sum.clone()
    }
}

impl BatchOp for BatchAccumulator {
    fn process(&self, input: &Tensor, target: &Tensor, queue: &Queue) -> Result<()> {
        debug_assert_eq!(input.depth(), target.depth());
        let collapsed = input.sum_collapse(queue)?.to_host(queue)?;
        let mut state = self.state.lock();
        if state.sum.is_empty() {
            state.sum = vec![0.0; collapsed.len()];
        }
        for (acc, v) in state.sum.iter_mut().zip(&collapsed) {
            *acc += v;
        }
        state.samples += input.depth();
        state.slices += 1;
        Ok(())
    }

    fn update_model(&self) -> Result<()> {
        self.state.lock().updates += 1;
        Ok(())
    }
}
