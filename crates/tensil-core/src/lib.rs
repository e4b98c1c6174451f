//! # tensil-core
//!
//! Device-resident matrix/tensor engine for the tensil framework.
//!
//! Provides:
//! - `DeviceContext` with a compile-once kernel program cache
//! - `Matrix`: a buffer-backed row-major 2-D view
//! - `Tensor`: depth-many matrices in one contiguous allocation, with
//!   zero-copy slicing and single-call batched GEMM
//! - In-order `Queue`s and `Event` completion handles; host transfers
//!   are blocking, everything else is enqueued and awaited explicitly
//! - CPU backend by default, CUDA behind the `cuda` feature

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod kernels;
pub mod matrix;
pub mod params;
pub mod programs;
pub mod tensor;

pub use buffer::DeviceBuffer;
pub use config::ContextConfig;
pub use context::{Device, DeviceContext, Event, Queue};
pub use error::{Error, Result};
pub use matrix::Matrix;
pub use params::{ParamRecord, ParameterSet};
pub use programs::{KernelHandle, Program, ProgramCache};
pub use tensor::Tensor;
