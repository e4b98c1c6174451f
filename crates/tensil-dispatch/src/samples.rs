//! Paired input/target sample tensors shared across workers.
//!
//! A `SampleSet` holds an ordered list of `(input, target)` tensor pairs
//! behind one `Arc<RwLock<..>>`: cloning the set is cheap and every clone
//! observes the same data. Reads are concurrent; appending and shuffling
//! take the write lock. Pair `i` must have matching depths because a batch
//! slice covers the same sample range in both tensors.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tensil_core::Tensor;

use crate::error::{DispatchError, Result};

struct Inner {
    inputs: Vec<Tensor>,
    targets: Vec<Tensor>,
    total: usize,
}

#[derive(Clone)]
pub struct SampleSet {
    inner: Arc<RwLock<Inner>>,
}

impl Default for SampleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                inputs: Vec::new(),
                targets: Vec::new(),
                total: 0,
            })),
        }
    }

    /// Append a sample pair. Depths must be non-zero and equal.
    pub fn push(&self, input: Tensor, target: Tensor) -> Result<()> {
        let mut inner = self.inner.write();
        let index = inner.inputs.len();
        if input.depth() == 0 {
            return Err(DispatchError::EmptyTensor { index });
        }
        if input.depth() != target.depth() {
            return Err(DispatchError::DepthMismatch {
                index,
                inputs: input.depth(),
                targets: target.depth(),
            });
        }
        inner.total += input.depth();
        inner.inputs.push(input);
        inner.targets.push(target);
        Ok(())
    }

    /// Number of tensor pairs.
    pub fn len(&self) -> usize {
        self.inner.read().inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total sample count across all pairs.
    pub fn total_samples(&self) -> usize {
        self.inner.read().total
    }

    /// Depth of pair `index`.
    pub fn depth(&self, index: usize) -> Result<usize> {
        let inner = self.inner.read();
        inner
            .inputs
            .get(index)
            .map(Tensor::depth)
            .ok_or(DispatchError::EmptySampleSet)
    }

    /// Shared view of the input tensor at `index`.
    pub fn input(&self, index: usize) -> Result<Tensor> {
        let inner = self.inner.read();
        inner
            .inputs
            .get(index)
            .cloned()
            .ok_or(DispatchError::EmptySampleSet)
    }

    /// Shared view of the target tensor at `index`.
    pub fn target(&self, index: usize) -> Result<Tensor> {
        let inner = self.inner.read();
        inner
            .targets
            .get(index)
            .cloned()
            .ok_or(DispatchError::EmptySampleSet)
    }

    /// Reorder the pairs with one permutation applied to both lists, so
    /// input `i` and target `i` stay paired. A seed gives a reproducible
    /// order; without one the permutation comes from the thread RNG.
    pub fn shuffle(&self, seed: Option<u64>) {
        let mut inner = self.inner.write();
        let mut order: Vec<usize> = (0..inner.inputs.len()).collect();
        match seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                order.shuffle(&mut rng);
            }
            None => order.shuffle(&mut rand::thread_rng()),
        }
        let inputs = order.iter().map(|&i| inner.inputs[i].clone()).collect();
        let targets = order.iter().map(|&i| inner.targets[i].clone()).collect();
        inner.inputs = inputs;
        inner.targets = targets;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensil_core::{ContextConfig, DeviceContext, Queue};

    fn queue() -> Queue {
        DeviceContext::new(ContextConfig::default())
            .unwrap()
            .default_queue()
            .clone()
    }

    fn pair(depth: usize, fill: f32, q: &Queue) -> (Tensor, Tensor) {
        let input = Tensor::from_host(&vec![fill; 4 * depth], 2, 2, depth, q).unwrap();
        let target = Tensor::from_host(&vec![fill; depth], 1, 1, depth, q).unwrap();
        (input, target)
    }

    #[test]
    fn test_push_tracks_totals() {
        let q = queue();
        let set = SampleSet::new();
        let (i0, t0) = pair(5, 0.0, &q);
        let (i1, t1) = pair(3, 1.0, &q);
        set.push(i0, t0).unwrap();
        set.push(i1, t1).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.total_samples(), 8);
        assert_eq!(set.depth(1).unwrap(), 3);
    }

    #[test]
    fn test_push_rejects_depth_mismatch() {
        let q = queue();
        let set = SampleSet::new();
        let input = Tensor::new(2, 2, 4, &q).unwrap();
        let target = Tensor::new(1, 1, 3, &q).unwrap();
        assert!(matches!(
            set.push(input, target),
            Err(DispatchError::DepthMismatch { index: 0, inputs: 4, targets: 3 })
        ));
    }

    #[test]
    fn test_push_rejects_zero_depth() {
        let set = SampleSet::new();
        assert!(matches!(
            set.push(Tensor::empty(), Tensor::empty()),
            Err(DispatchError::EmptyTensor { index: 0 })
        ));
    }

    #[test]
    fn test_shuffle_keeps_pairs_together() {
        let q = queue();
        let set = SampleSet::new();
        for i in 0..6 {
            let (input, target) = pair(2, i as f32, &q);
            set.push(input, target).unwrap();
        }
        set.shuffle(Some(42));
        for i in 0..6 {
            let input = set.input(i).unwrap().to_host(&q).unwrap();
            let target = set.target(i).unwrap().to_host(&q).unwrap();
            assert_eq!(input[0], target[0], "pair {i} split by shuffle");
        }
        assert_eq!(set.total_samples(), 12);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let q = queue();
        let a = SampleSet::new();
        let b = SampleSet::new();
        for i in 0..8 {
            let (i0, t0) = pair(1, i as f32, &q);
            let (i1, t1) = pair(1, i as f32, &q);
            a.push(i0, t0).unwrap();
            b.push(i1, t1).unwrap();
        }
        a.shuffle(Some(7));
        b.shuffle(Some(7));
        for i in 0..8 {
            assert_eq!(
                a.input(i).unwrap().to_host(&q).unwrap(),
                b.input(i).unwrap().to_host(&q).unwrap()
            );
        }
    }

    #[test]
    fn test_clones_share_storage() {
        let q = queue();
        let set = SampleSet::new();
        let alias = set.clone();
        let (input, target) = pair(2, 0.0, &q);
        set.push(input, target).unwrap();
        assert_eq!(alias.len(), 1);
    }
}
