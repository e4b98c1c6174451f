//! Scatter wire interface: the records a data-distribution layer exchanges.
//!
//! A shipment for one rank carries its tensors; each record holds the raw
//! row-major, matrix-major element payload, the three dimensions, and one
//! integer class label per sample. Class names travel once, in a shared
//! catalog. Marshalling, transport and rank assignment live outside this
//! crate; here is only the contract.

use serde::{Deserialize, Serialize};
use tensil_core::{Queue, Tensor};

use crate::error::{DispatchError, Result};

/// One tensor on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
    pub rows: usize,
    pub cols: usize,
    pub depth: usize,
    /// Row-major, matrix-major payload, `rows * cols * depth` elements.
    pub elements: Vec<f32>,
    /// One class label per sample along the depth axis.
    pub labels: Vec<i32>,
}

impl TensorRecord {
    /// Blocking readback of a device tensor into a wire record.
    pub fn from_tensor(tensor: &Tensor, labels: Vec<i32>, queue: &Queue) -> Result<Self> {
        if labels.len() != tensor.depth() {
            return Err(DispatchError::LabelCount {
                depth: tensor.depth(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            rows: tensor.rows(),
            cols: tensor.cols(),
            depth: tensor.depth(),
            elements: tensor.to_host(queue)?,
            labels,
        })
    }

    /// Blocking upload of the payload onto the queue's device.
    pub fn to_tensor(&self, queue: &Queue) -> Result<Tensor> {
        if self.labels.len() != self.depth {
            return Err(DispatchError::LabelCount {
                depth: self.depth,
                labels: self.labels.len(),
            });
        }
        Ok(Tensor::from_host(
            &self.elements,
            self.rows,
            self.cols,
            self.depth,
            queue,
        )?)
    }

    /// Raw element payload as bytes, for zero-copy framing.
    pub fn element_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.elements)
    }

    /// Raw label payload as bytes.
    pub fn label_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.labels)
    }
}

/// The shared class-name list; label values index into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, label: i32) -> Option<&str> {
        usize::try_from(label)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn label(&self, name: &str) -> Option<i32> {
        self.names.iter().position(|n| n == name).map(|i| i as i32)
    }
}

/// Everything one rank receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankShipment {
    pub rank: usize,
    pub records: Vec<TensorRecord>,
    pub classes: ClassCatalog,
}

impl RankShipment {
    /// Tensor count for this rank, the first field on the wire.
    pub fn tensor_count(&self) -> usize {
        self.records.len()
    }
}

/// Transport contract for scattering sample data across ranks. Rank
/// assignment and the actual byte transport are the implementor's business.
pub trait DataScatter {
    fn ship(&self, shipment: &RankShipment) -> Result<()>;

    fn receive(&self, rank: usize) -> Result<RankShipment>;
}
