//! # tensil-dispatch
//!
//! Batch scheduling on top of `tensil-core`.
//!
//! Provides:
//! - `SampleSet`: shared, shuffleable paired input/target tensor lists
//! - `Progression`: a cheap cursor over the collection with per-tensor
//!   wrap-around and strictly bounded zero-copy batch slices
//! - `Policy` + `Dispatcher`: a fixed worker pool bound to device queues,
//!   partitioning each batch exactly across the workers
//! - `BatchOp`: the optimizer-operation contract workers invoke
//! - `wire`: the scatter records a data-distribution layer exchanges

pub mod dispatcher;
pub mod error;
pub mod op;
pub mod policy;
pub mod progression;
pub mod samples;
pub mod wire;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Result};
pub use op::{BatchAccumulator, BatchOp};
pub use policy::{partition, DeviceResource, Policy};
pub use progression::Progression;
pub use samples::SampleSet;
pub use wire::{ClassCatalog, DataScatter, RankShipment, TensorRecord};
