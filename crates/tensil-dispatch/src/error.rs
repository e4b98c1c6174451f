//! Dispatch-level error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Core(#[from] tensil_core::Error),

    #[error("sample set holds no tensors")]
    EmptySampleSet,

    #[error("sample tensor {index} has zero depth")]
    EmptyTensor { index: usize },

    #[error("sample pair {index}: input depth {inputs} != target depth {targets}")]
    DepthMismatch {
        index: usize,
        inputs: usize,
        targets: usize,
    },

    #[error("slice of {requested} samples exceeds the {remaining} remaining in the current tensor")]
    SliceExceedsTensor { requested: usize, remaining: usize },

    #[error("scheduling policy names no devices")]
    NoDevices,

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("tensor of depth {depth} carries {labels} labels")]
    LabelCount { depth: usize, labels: usize },

    #[error("batch operation: {0}")]
    Op(String),
}
