use std::path::PathBuf;

use crate::context::Device;

/// Errors raised by the tensil compute engine.
///
/// Every variant surfaces to the immediate caller; nothing here aborts the
/// process and there is no internal retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{op}: dimension mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimMismatch {
        op: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("{op}: depth mismatch: expected {expected}, got {got}")]
    DepthMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{op}: inner dimensions do not agree: {m}x{k1} * {k2}x{n}")]
    GemmDimMismatch {
        op: &'static str,
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    #[error("{op}: index {index} out of range (len {len})")]
    OutOfRange {
        op: &'static str,
        index: usize,
        len: usize,
    },

    #[error("view of {extent} elements at offset {offset} exceeds buffer capacity {capacity}")]
    ViewOutOfBounds {
        extent: usize,
        offset: usize,
        capacity: usize,
    },

    #[error("{op}: cannot resize a sub-view at offset {offset}: the backing buffer is shared with other views")]
    ViewResize { op: &'static str, offset: usize },

    #[error("cannot reshape {rows}x{cols}x{depth} into {new_rows}x{new_cols}x{new_depth}")]
    InvalidReshape {
        rows: usize,
        cols: usize,
        depth: usize,
        new_rows: usize,
        new_cols: usize,
        new_depth: usize,
    },

    #[error("device allocation of {elements} elements failed: {detail}")]
    Alloc { elements: usize, detail: String },

    #[error("kernel program '{program}' not found (searched {searched:?})")]
    ProgramNotFound {
        program: String,
        searched: Vec<PathBuf>,
    },

    #[error("kernel program '{program}' failed to compile:\n{log}")]
    KernelCompile { program: String, log: String },

    #[error("kernel '{kernel}' not found in program '{program}'")]
    KernelNotFound { program: String, kernel: String },

    #[error("device context is already initialized")]
    AlreadyInitialized,

    #[error("device mismatch: {left} vs {right}")]
    DeviceMismatch { left: Device, right: Device },

    #[error("device backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;
