//! Ordered collections of learnable device matrices.
//!
//! `ParameterSet` tracks named weight/bias matrices in registration order
//! and offers a blocking host transfer contract: `snapshot()` reads every
//! matrix back into plain host records, `restore()` writes host records back
//! into the existing device allocations. External serialization layers
//! consume the records; this crate does not define a file format.

use serde::{Deserialize, Serialize};

use crate::context::Queue;
use crate::error::{Error, Result};
use crate::matrix::Matrix;

/// Host-side image of one parameter matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRecord {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f32>,
}

#[derive(Default)]
pub struct ParameterSet {
    entries: Vec<(String, Matrix)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matrix under `name`. Order is preserved and meaningful:
    /// `restore` matches records positionally.
    pub fn push(&mut self, name: impl Into<String>, matrix: Matrix) {
        self.entries.push((name.into(), matrix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Matrix> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Matrix)> {
        self.entries.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Blocking device-to-host readback of every parameter, in order.
    pub fn snapshot(&self, queue: &Queue) -> Result<Vec<ParamRecord>> {
        self.entries
            .iter()
            .map(|(name, matrix)| {
                Ok(ParamRecord {
                    name: name.clone(),
                    rows: matrix.rows(),
                    cols: matrix.cols(),
                    values: matrix.to_host(queue)?,
                })
            })
            .collect()
    }

    /// Blocking host-to-device write of every parameter, positionally.
    /// Record count, names and dimensions must all match the set.
    pub fn restore(&self, records: &[ParamRecord], queue: &Queue) -> Result<()> {
        if records.len() != self.entries.len() {
            return Err(Error::OutOfRange {
                op: "restore",
                index: records.len(),
                len: self.entries.len(),
            });
        }
        for ((name, matrix), record) in self.entries.iter().zip(records) {
            if record.name != *name {
                return Err(Error::Backend(format!(
                    "restore: record {:?} does not match parameter {:?}",
                    record.name, name
                )));
            }
            if record.rows != matrix.rows() || record.cols != matrix.cols() {
                return Err(Error::DimMismatch {
                    op: "restore",
                    expected_rows: matrix.rows(),
                    expected_cols: matrix.cols(),
                    rows: record.rows,
                    cols: record.cols,
                });
            }
            matrix.write_host(&record.values, queue)?;
        }
        Ok(())
    }
}
