//! Compute kernels backing Matrix and Tensor operations.
//!
//! `cpu` holds the host implementations (always available); `cuda` holds
//! the device dispatch behind the `cuda` feature.

pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;
