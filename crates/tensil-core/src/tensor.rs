//! Tensor: depth-many equally-shaped matrices in one contiguous allocation.
//!
//! Layout is matrix-major: matrix `z` occupies the `z`-th matrix-sized slot
//! after `offset` (counted in matrix units, not elements). Slicing and
//! per-depth indexing are zero-copy views that alias the parent storage.
//! A tensor carrying the view flag must never be reallocated in place;
//! resizing it would corrupt the owner's data, so those paths fail with
//! [`Error::ViewResize`].

use crate::buffer::{self, DeviceBuffer};
use crate::context::{Device, Event, Queue};
use crate::error::{Error, Result};
use crate::kernels::cpu;
use crate::matrix::Matrix;

#[derive(Clone)]
pub struct Tensor {
    buffer: DeviceBuffer,
    rows: usize,
    cols: usize,
    depth: usize,
    /// Offset into the buffer in matrix-count units.
    offset: usize,
    view: bool,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Allocate an uninitialized batch of `depth` matrices of `rows x cols`.
    pub fn new(rows: usize, cols: usize, depth: usize, queue: &Queue) -> Result<Self> {
        let elements = rows * cols * depth;
        let buffer = if elements == 0 {
            DeviceBuffer::empty()
        } else {
            queue.alloc(elements)?
        };
        Ok(Self {
            buffer,
            rows,
            cols,
            depth,
            offset: 0,
            view: false,
        })
    }

    /// Blocking host-to-device construction, matrix-major row-major.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols * depth`.
    pub fn from_host(
        data: &[f32],
        rows: usize,
        cols: usize,
        depth: usize,
        queue: &Queue,
    ) -> Result<Self> {
        assert_eq!(
            data.len(),
            rows * cols * depth,
            "from_host: {depth}x{rows}x{cols} requires {} elements, got {}",
            rows * cols * depth,
            data.len()
        );
        let buffer = if data.is_empty() {
            DeviceBuffer::empty()
        } else {
            queue.upload(data)?
        };
        Ok(Self {
            buffer,
            rows,
            cols,
            depth,
            offset: 0,
            view: false,
        })
    }

    /// Device-to-device deep copy of another tensor.
    pub fn copy_of(other: &Tensor, queue: &Queue) -> Result<Self> {
        let t = Self::new(other.rows, other.cols, other.depth, queue)?;
        if !t.is_empty() {
            t.span_matrix()?.copy(&other.span_matrix()?, queue)?;
        }
        Ok(t)
    }

    /// A zero-depth tensor with no allocation.
    pub fn empty() -> Self {
        Self {
            buffer: DeviceBuffer::empty(),
            rows: 0,
            cols: 0,
            depth: 0,
            offset: 0,
            view: false,
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Batch axis length.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.rows * self.cols * self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this tensor aliases another tensor's storage.
    pub fn is_view(&self) -> bool {
        self.view
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn device(&self) -> Device {
        self.buffer.device()
    }

    fn matrix_elements(&self) -> usize {
        self.rows * self.cols
    }

    /// Element offset of matrix `z` inside the buffer.
    fn element_offset(&self, z: usize) -> usize {
        (self.offset + z) * self.matrix_elements()
    }

    fn check_queue(&self, queue: &Queue) -> Result<()> {
        if !self.is_empty() && queue.device() != self.device() {
            return Err(Error::DeviceMismatch {
                left: queue.device(),
                right: self.device(),
            });
        }
        Ok(())
    }

    fn check_same_shape(&self, op: &'static str, other: &Tensor) -> Result<()> {
        if self.depth != other.depth {
            return Err(Error::DepthMismatch {
                op,
                expected: self.depth,
                got: other.depth,
            });
        }
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::DimMismatch {
                op,
                expected_rows: self.rows,
                expected_cols: self.cols,
                rows: other.rows,
                cols: other.cols,
            });
        }
        Ok(())
    }

    /// Adopt `depth x rows x cols`, reallocating only when the element
    /// count changes. Views are never reallocated.
    fn ensure_shape(
        &mut self,
        op: &'static str,
        rows: usize,
        cols: usize,
        depth: usize,
        queue: &Queue,
    ) -> Result<()> {
        if self.rows == rows && self.cols == cols && self.depth == depth {
            return Ok(());
        }
        if rows * cols * depth == self.len() {
            self.rows = rows;
            self.cols = cols;
            self.depth = depth;
            return Ok(());
        }
        if self.view {
            return Err(Error::ViewResize {
                op,
                offset: self.offset,
            });
        }
        let elements = rows * cols * depth;
        self.buffer = if elements == 0 {
            DeviceBuffer::empty()
        } else {
            queue.alloc(elements)?
        };
        self.rows = rows;
        self.cols = cols;
        self.depth = depth;
        self.offset = 0;
        Ok(())
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Bounds-checked aliasing view of the `z`-th matrix.
    pub fn matrix(&self, z: usize) -> Result<Matrix> {
        if z >= self.depth {
            return Err(Error::OutOfRange {
                op: "matrix",
                index: z,
                len: self.depth,
            });
        }
        Matrix::view(&self.buffer, self.rows, self.cols, self.element_offset(z))
    }

    /// Zero-copy contiguous sub-tensor over `[begin, end)` along depth.
    pub fn slice(&self, begin: usize, end: usize) -> Result<Tensor> {
        if begin > end || end > self.depth {
            return Err(Error::OutOfRange {
                op: "slice",
                index: end,
                len: self.depth,
            });
        }
        Ok(Tensor {
            buffer: self.buffer.clone(),
            rows: self.rows,
            cols: self.cols,
            depth: end - begin,
            offset: self.offset + begin,
            view: true,
        })
    }

    /// Split into `n` shallow views of nearly equal depth; any remainder
    /// is handed out one extra matrix at a time to the leading shards.
    pub fn split(&self, n: usize) -> Result<Vec<Tensor>> {
        if n == 0 {
            return Err(Error::OutOfRange {
                op: "split",
                index: 0,
                len: self.depth,
            });
        }
        let base = self.depth / n;
        let remainder = self.depth % n;
        let mut shards = Vec::with_capacity(n);
        let mut begin = 0;
        for i in 0..n {
            let depth = base + usize::from(i < remainder);
            shards.push(self.slice(begin, begin + depth)?);
            begin += depth;
        }
        Ok(shards)
    }

    /// Each matrix reinterpreted as a `rows*cols x 1` column vector,
    /// same storage.
    pub fn flatten(&self) -> Result<Tensor> {
        self.reshape(self.rows * self.cols, 1, self.depth)
    }

    /// The whole batch as one `(depth * rows) x cols` matrix view.
    fn span_matrix(&self) -> Result<Matrix> {
        Matrix::view(
            &self.buffer,
            self.depth * self.rows,
            self.cols,
            self.element_offset(0),
        )
    }

    /// Reinterpret the same elements under a new shape. The element count
    /// must match, and the view's start must land on a matrix boundary of
    /// the new shape.
    pub fn reshape(&self, rows: usize, cols: usize, depth: usize) -> Result<Tensor> {
        let invalid = || Error::InvalidReshape {
            rows: self.rows,
            cols: self.cols,
            depth: self.depth,
            new_rows: rows,
            new_cols: cols,
            new_depth: depth,
        };
        if rows * cols * depth != self.len() {
            return Err(invalid());
        }
        let element_offset = self.element_offset(0);
        if rows * cols == 0 || element_offset % (rows * cols) != 0 {
            if !(self.is_empty() && rows * cols * depth == 0) {
                return Err(invalid());
            }
        }
        let new_offset = if rows * cols == 0 {
            0
        } else {
            element_offset / (rows * cols)
        };
        Ok(Tensor {
            buffer: self.buffer.clone(),
            rows,
            cols,
            depth,
            offset: new_offset,
            view: true,
        })
    }

    // =========================================================================
    // Host transfer (always blocking)
    // =========================================================================

    pub fn to_host(&self, queue: &Queue) -> Result<Vec<f32>> {
        self.check_queue(queue)?;
        self.buffer.read_range(self.element_offset(0), self.len())
    }

    pub fn write_host(&self, data: &[f32], queue: &Queue) -> Result<()> {
        self.check_queue(queue)?;
        if data.len() != self.len() {
            return Err(Error::OutOfRange {
                op: "write_host",
                index: data.len(),
                len: self.len(),
            });
        }
        self.buffer.write_range(self.element_offset(0), data)
    }

    // =========================================================================
    // Batch-wide element-wise operations (one dispatch over the whole span)
    // =========================================================================

    pub fn fill(&self, value: f32, queue: &Queue) -> Result<Event> {
        self.span_matrix()?.fill(value, queue)
    }

    /// In-place `self *= factor` across every matrix.
    pub fn ipscale(&self, factor: f32, queue: &Queue) -> Result<Event> {
        self.span_matrix()?.ipscale(factor, queue)
    }

    /// In-place `self += factor * other`, matrix by matrix.
    pub fn ipadd(&self, factor: f32, other: &Tensor, queue: &Queue) -> Result<Event> {
        self.check_same_shape("ipadd", other)?;
        self.span_matrix()?.ipadd(factor, &other.span_matrix()?, queue)
    }

    /// In-place `self -= factor * other`, matrix by matrix.
    pub fn ipsub(&self, factor: f32, other: &Tensor, queue: &Queue) -> Result<Event> {
        self.check_same_shape("ipsub", other)?;
        self.span_matrix()?.ipsub(factor, &other.span_matrix()?, queue)
    }

    /// In-place element-wise product, matrix by matrix.
    pub fn iphadamard(&self, other: &Tensor, queue: &Queue) -> Result<Event> {
        self.check_same_shape("iphadamard", other)?;
        self.span_matrix()?.iphadamard(&other.span_matrix()?, queue)
    }

    /// `self * factor` as a new tensor.
    pub fn scale(&self, factor: f32, queue: &Queue) -> Result<Tensor> {
        let out = Tensor::copy_of(self, queue)?;
        out.ipscale(factor, queue)?;
        Ok(out)
    }

    /// `self + factor * other` as a new tensor.
    pub fn add(&self, factor: f32, other: &Tensor, queue: &Queue) -> Result<Tensor> {
        let out = Tensor::copy_of(self, queue)?;
        out.ipadd(factor, other, queue)?;
        Ok(out)
    }

    /// `self - factor * other` as a new tensor.
    pub fn sub(&self, factor: f32, other: &Tensor, queue: &Queue) -> Result<Tensor> {
        let out = Tensor::copy_of(self, queue)?;
        out.ipsub(factor, other, queue)?;
        Ok(out)
    }

    /// Element-wise product as a new tensor.
    pub fn hadamard(&self, other: &Tensor, queue: &Queue) -> Result<Tensor> {
        let out = Tensor::copy_of(self, queue)?;
        out.iphadamard(other, queue)?;
        Ok(out)
    }

    // =========================================================================
    // Batched GEMM (one kernel call carrying per-matrix offsets)
    // =========================================================================

    /// `self[z] = alpha * op(a) * op(b[z])` for every depth slot.
    pub fn batched_gemm(
        &mut self,
        alpha: f32,
        trans_a: bool,
        a: &Matrix,
        trans_b: bool,
        b: &Tensor,
        queue: &Queue,
    ) -> Result<Event> {
        let dims = gemm_dims(
            "batched_gemm",
            (a.rows(), a.cols()),
            trans_a,
            (b.rows, b.cols),
            trans_b,
        )?;
        self.prepare_output("batched_gemm", dims, b.depth, None, queue)?;
        self.dispatch_batched(
            alpha,
            a.buffer(),
            |_| a.offset(),
            (a.offset(), a.len()),
            trans_a,
            b,
            trans_b,
            0.0,
            dims,
            queue,
        )
    }

    /// `self[z] = alpha * op(a) * op(b[z]) + beta * c` for every depth slot.
    #[allow(clippy::too_many_arguments)]
    pub fn batched_gemm_acc(
        &mut self,
        alpha: f32,
        trans_a: bool,
        a: &Matrix,
        trans_b: bool,
        b: &Tensor,
        beta: f32,
        c: &Matrix,
        queue: &Queue,
    ) -> Result<Event> {
        let dims = gemm_dims(
            "batched_gemm_acc",
            (a.rows(), a.cols()),
            trans_a,
            (b.rows, b.cols),
            trans_b,
        )?;
        self.prepare_output("batched_gemm_acc", dims, b.depth, Some(c), queue)?;
        // Seed every output slot with c, then let the kernel apply beta.
        for z in 0..self.depth {
            self.matrix(z)?.copy(c, queue)?;
        }
        self.dispatch_batched(
            alpha,
            a.buffer(),
            |_| a.offset(),
            (a.offset(), a.len()),
            trans_a,
            b,
            trans_b,
            beta,
            dims,
            queue,
        )
    }

    /// `self[z] = alpha * op(a[z]) * op(b[z])` for every depth slot.
    pub fn batched_gemm_tensor(
        &mut self,
        alpha: f32,
        trans_a: bool,
        a: &Tensor,
        trans_b: bool,
        b: &Tensor,
        queue: &Queue,
    ) -> Result<Event> {
        if a.depth != b.depth {
            return Err(Error::DepthMismatch {
                op: "batched_gemm_tensor",
                expected: a.depth,
                got: b.depth,
            });
        }
        let dims = gemm_dims(
            "batched_gemm_tensor",
            (a.rows, a.cols),
            trans_a,
            (b.rows, b.cols),
            trans_b,
        )?;
        self.prepare_output("batched_gemm_tensor", dims, b.depth, None, queue)?;
        self.dispatch_batched(
            alpha,
            &a.buffer,
            |z| a.element_offset(z),
            (a.element_offset(0), a.len()),
            trans_a,
            b,
            trans_b,
            0.0,
            dims,
            queue,
        )
    }

    fn prepare_output(
        &mut self,
        op: &'static str,
        (m, n, _k): (usize, usize, usize),
        depth: usize,
        acc: Option<&Matrix>,
        queue: &Queue,
    ) -> Result<()> {
        if let Some(c) = acc {
            if c.rows() != m || c.cols() != n {
                return Err(Error::DimMismatch {
                    op,
                    expected_rows: m,
                    expected_cols: n,
                    rows: c.rows(),
                    cols: c.cols(),
                });
            }
        }
        self.ensure_shape(op, m, n, depth, queue)?;
        self.check_queue(queue)
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_batched(
        &self,
        alpha: f32,
        a_buffer: &DeviceBuffer,
        a_offset_of: impl Fn(usize) -> usize,
        a_span: (usize, usize),
        trans_a: bool,
        b: &Tensor,
        trans_b: bool,
        beta: f32,
        (m, n, k): (usize, usize, usize),
        queue: &Queue,
    ) -> Result<Event> {
        if self.is_empty() || k == 0 {
            return Ok(Event::completed());
        }
        let c_base = self.element_offset(0);
        let b_base = b.element_offset(0);
        let (a_base, a_len) = a_span;
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                let c_offs: Vec<usize> =
                    (0..self.depth).map(|z| z * self.matrix_elements()).collect();
                let a_offs: Vec<usize> =
                    (0..self.depth).map(|z| a_offset_of(z) - a_base).collect();
                let b_offs: Vec<usize> =
                    (0..self.depth).map(|z| z * b.matrix_elements()).collect();
                buffer::host_ternary(
                    &self.buffer,
                    c_base,
                    self.len(),
                    a_buffer,
                    a_base,
                    a_len,
                    &b.buffer,
                    b_base,
                    b.len(),
                    |dst, a_s, b_s| {
                        cpu::batched_gemm(
                            dst, &c_offs, beta, alpha, a_s, &a_offs, trans_a, b_s, &b_offs,
                            trans_b, m, n, k,
                        )
                    },
                )?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => {
                let c_offs: Vec<usize> = (0..self.depth)
                    .map(|z| c_base + z * self.matrix_elements())
                    .collect();
                let a_offs: Vec<usize> = (0..self.depth).map(&a_offset_of).collect();
                let b_offs: Vec<usize> = (0..self.depth)
                    .map(|z| b_base + z * b.matrix_elements())
                    .collect();
                crate::kernels::cuda::batched_gemm(
                    queue,
                    &self.buffer,
                    &c_offs,
                    beta,
                    alpha,
                    a_buffer,
                    &a_offs,
                    trans_a,
                    &b.buffer,
                    &b_offs,
                    trans_b,
                    m,
                    n,
                    k,
                )
            }
        }
    }

    // =========================================================================
    // Depth reduction
    // =========================================================================

    /// Sum along the depth axis into a single matrix.
    ///
    /// Accumulations are issued without waiting so device work can
    /// pipeline; the in-order queue makes the result visible to any
    /// later operation or readback on the same queue.
    pub fn sum_collapse(&self, queue: &Queue) -> Result<Matrix> {
        if self.depth == 0 {
            return Matrix::new(self.rows, self.cols, queue);
        }
        let acc = Matrix::copy_of(&self.matrix(0)?, queue)?;
        for z in 1..self.depth {
            acc.ipadd(1.0, &self.matrix(z)?, queue)?;
        }
        Ok(acc)
    }
}

/// Derive batched output dimensions `(m, n, k)` from the transpose flags.
fn gemm_dims(
    op: &'static str,
    (a_rows, a_cols): (usize, usize),
    trans_a: bool,
    (b_rows, b_cols): (usize, usize),
    trans_b: bool,
) -> Result<(usize, usize, usize)> {
    let (m, k1) = if trans_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
    let (k2, n) = if trans_b { (b_cols, b_rows) } else { (b_rows, b_cols) };
    if k1 != k2 {
        return Err(Error::GemmDimMismatch { op, m, k1, k2, n });
    }
    Ok((m, n, k1))
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor({}x{}x{}, offset={}, view={}, {})",
            self.depth,
            self.rows,
            self.cols,
            self.offset,
            self.view,
            self.device()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::context::DeviceContext;

    fn queue() -> Queue {
        DeviceContext::new(ContextConfig::default())
            .unwrap()
            .default_queue()
            .clone()
    }

    fn iota(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_matrix_view_aliases_parent() {
        let q = queue();
        let t = Tensor::from_host(&[0.0; 12], 2, 2, 3, &q).unwrap();
        t.matrix(1).unwrap().fill(7.0, &q).unwrap();
        let host = t.to_host(&q).unwrap();
        assert_eq!(&host[0..4], &[0.0; 4]);
        assert_eq!(&host[4..8], &[7.0; 4]);
        assert_eq!(&host[8..12], &[0.0; 4]);
    }

    #[test]
    fn test_matrix_index_bounds_checked() {
        let q = queue();
        let t = Tensor::new(2, 2, 3, &q).unwrap();
        assert!(matches!(
            t.matrix(3),
            Err(Error::OutOfRange { op: "matrix", .. })
        ));
    }

    #[test]
    fn test_slice_aliases_absolute_index() {
        let q = queue();
        let t = Tensor::from_host(&[0.0; 16], 2, 2, 4, &q).unwrap();
        let s = t.slice(1, 3).unwrap();
        assert_eq!(s.depth(), 2);
        assert!(s.is_view());
        // writing slice-local matrix 0 lands at parent matrix 1
        s.matrix(0).unwrap().fill(5.0, &q).unwrap();
        let host = t.to_host(&q).unwrap();
        assert_eq!(&host[0..4], &[0.0; 4]);
        assert_eq!(&host[4..8], &[5.0; 4]);
    }

    #[test]
    fn test_slice_bounds() {
        let q = queue();
        let t = Tensor::new(2, 2, 4, &q).unwrap();
        assert!(t.slice(0, 5).is_err());
        assert!(t.slice(3, 2).is_err());
        assert_eq!(t.slice(4, 4).unwrap().depth(), 0);
    }

    #[test]
    fn test_split_leading_remainder() {
        let q = queue();
        let t = Tensor::new(3, 3, 10, &q).unwrap();
        let shards = t.split(3).unwrap();
        let depths: Vec<usize> = shards.iter().map(Tensor::depth).collect();
        assert_eq!(depths, vec![4, 3, 3]);
        // shards tile the parent without overlap
        let starts: Vec<usize> = shards.iter().map(|s| s.offset).collect();
        assert_eq!(starts, vec![0, 4, 7]);
    }

    #[test]
    fn test_split_more_shards_than_depth() {
        let q = queue();
        let t = Tensor::new(1, 1, 2, &q).unwrap();
        let depths: Vec<usize> = t.split(4).unwrap().iter().map(Tensor::depth).collect();
        assert_eq!(depths, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_reshape_checks_element_count() {
        let q = queue();
        let t = Tensor::new(2, 3, 4, &q).unwrap();
        assert!(t.reshape(4, 3, 2).is_ok());
        assert!(matches!(
            t.reshape(2, 2, 4),
            Err(Error::InvalidReshape { .. })
        ));
    }

    #[test]
    fn test_reshape_respects_view_offset() {
        let q = queue();
        let t = Tensor::new(2, 2, 4, &q).unwrap();
        let s = t.slice(1, 3).unwrap(); // starts at element 4
        assert!(s.reshape(1, 4, 2).is_ok());
        // element count matches but offset 4 does not land on an 8-element
        // matrix boundary
        assert!(s.reshape(8, 1, 1).is_err());
        // element count mismatch
        assert!(s.reshape(1, 3, 2).is_err());
    }

    #[test]
    fn test_tensorwide_elementwise() {
        let q = queue();
        let a = Tensor::from_host(&[1.0; 8], 2, 2, 2, &q).unwrap();
        let b = Tensor::from_host(&iota(8), 2, 2, 2, &q).unwrap();
        a.ipadd(2.0, &b, &q).unwrap();
        assert_eq!(
            a.to_host(&q).unwrap(),
            vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0]
        );
        a.ipscale(0.5, &q).unwrap();
        assert_eq!(a.to_host(&q).unwrap()[0], 0.5);
    }

    #[test]
    fn test_elementwise_shape_checked() {
        let q = queue();
        let a = Tensor::new(2, 2, 2, &q).unwrap();
        let b = Tensor::new(2, 2, 3, &q).unwrap();
        assert!(matches!(
            a.ipadd(1.0, &b, &q),
            Err(Error::DepthMismatch { op: "ipadd", .. })
        ));
    }

    #[test]
    fn test_batched_gemm_matrix_tensor() {
        let q = queue();
        let a = Matrix::from_host(&[1.0, 2.0, 3.0, 4.0], 2, 2, &q).unwrap();
        // two identity matrices along depth
        let b = Tensor::from_host(&[1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0], 2, 2, 2, &q).unwrap();
        let mut c = Tensor::empty();
        c.batched_gemm(1.0, false, &a, false, &b, &q).unwrap();
        assert_eq!(c.depth(), 2);
        assert_eq!(
            c.to_host(&q).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_batched_gemm_acc() {
        let q = queue();
        let a = Matrix::from_host(&[1.0, 0.0, 0.0, 1.0], 2, 2, &q).unwrap();
        let b = Tensor::from_host(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 2, 2, 2, &q).unwrap();
        let bias = Matrix::from_host(&[10.0; 4], 2, 2, &q).unwrap();
        let mut c = Tensor::empty();
        c.batched_gemm_acc(1.0, false, &a, false, &b, 1.0, &bias, &q)
            .unwrap();
        assert_eq!(
            c.to_host(&q).unwrap(),
            vec![11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0]
        );
    }

    #[test]
    fn test_batched_gemm_tensor_tensor() {
        let q = queue();
        let a = Tensor::from_host(&[2.0, 0.0, 0.0, 2.0, 3.0, 0.0, 0.0, 3.0], 2, 2, 2, &q).unwrap();
        let b = Tensor::from_host(&[1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0], 2, 2, 2, &q).unwrap();
        let mut c = Tensor::empty();
        c.batched_gemm_tensor(1.0, false, &a, false, &b, &q).unwrap();
        assert_eq!(
            c.to_host(&q).unwrap(),
            vec![2.0, 4.0, 6.0, 8.0, 3.0, 6.0, 9.0, 12.0]
        );
    }

    #[test]
    fn test_batched_gemm_depth_mismatch() {
        let q = queue();
        let a = Tensor::new(2, 2, 2, &q).unwrap();
        let b = Tensor::new(2, 2, 3, &q).unwrap();
        let mut c = Tensor::empty();
        assert!(matches!(
            c.batched_gemm_tensor(1.0, false, &a, false, &b, &q),
            Err(Error::DepthMismatch { .. })
        ));
    }

    #[test]
    fn test_batched_gemm_into_view_fails_on_resize() {
        let q = queue();
        let parent = Tensor::new(2, 2, 4, &q).unwrap();
        let mut out = parent.slice(0, 2).unwrap();
        let a = Matrix::new(3, 3, &q).unwrap();
        let b = Tensor::new(3, 3, 2, &q).unwrap();
        assert!(matches!(
            out.batched_gemm(1.0, false, &a, false, &b, &q),
            Err(Error::ViewResize { .. })
        ));
    }

    #[test]
    fn test_sum_collapse_ones() {
        let q = queue();
        let t = Tensor::from_host(&[1.0; 24], 2, 3, 4, &q).unwrap();
        let m = t.sum_collapse(&q).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.to_host(&q).unwrap(), vec![4.0; 6]);
    }

    #[test]
    fn test_sum_collapse_leaves_source_intact() {
        let q = queue();
        let t = Tensor::from_host(&iota(8), 2, 2, 2, &q).unwrap();
        let m = t.sum_collapse(&q).unwrap();
        assert_eq!(m.to_host(&q).unwrap(), vec![4.0, 6.0, 8.0, 10.0]);
        assert_eq!(t.to_host(&q).unwrap(), iota(8));
    }

    #[test]
    fn test_flatten_to_column_vectors() {
        let q = queue();
        let t = Tensor::from_host(&iota(12), 2, 2, 3, &q).unwrap();
        let f = t.flatten().unwrap();
        assert_eq!((f.rows(), f.cols(), f.depth()), (4, 1, 3));
        assert!(f.is_view());
        // same storage, just reshaped
        f.matrix(0).unwrap().fill(0.0, &q).unwrap();
        assert_eq!(&t.to_host(&q).unwrap()[0..4], &[0.0; 4]);
    }

    #[test]
    fn test_value_forms_leave_source_intact() {
        let q = queue();
        let a = Tensor::from_host(&[1.0; 8], 2, 2, 2, &q).unwrap();
        let b = Tensor::from_host(&[2.0; 8], 2, 2, 2, &q).unwrap();
        let sum = a.add(1.0, &b, &q).unwrap();
        assert_eq!(sum.to_host(&q).unwrap(), vec![3.0; 8]);
        assert_eq!(a.to_host(&q).unwrap(), vec![1.0; 8]);
        let prod = a.hadamard(&b, &q).unwrap();
        assert_eq!(prod.to_host(&q).unwrap(), vec![2.0; 8]);
        let diff = b.sub(1.0, &a, &q).unwrap();
        assert_eq!(diff.to_host(&q).unwrap(), vec![1.0; 8]);
        let scaled = b.scale(2.0, &q).unwrap();
        assert_eq!(scaled.to_host(&q).unwrap(), vec![4.0; 8]);
    }
}
