//! Matrix: a buffer-backed 2-D view, the unit of computation.
//!
//! A `Matrix` is a `rows x cols` row-major window starting at `offset`
//! elements into a shared [`DeviceBuffer`]. Cloning a `Matrix` clones the
//! view, not the storage: writes through any alias are visible through all
//! of them. A zero-sized matrix (`rows == 0` or `cols == 0`) is a valid,
//! allocation-free state; every operation skips kernel dispatch for it
//! because the backing kernel library rejects zero-size launches.
//!
//! Operations enqueue on an in-order [`Queue`] and return an [`Event`];
//! `wait()` is the caller's explicit synchronization point. Host-to-device
//! and device-to-host transfers are always blocking so host memory can be
//! released as soon as the call returns.

use crate::buffer::{self, DeviceBuffer};
use crate::context::{Device, Event, Queue};
use crate::error::{Error, Result};
use crate::kernels::cpu;

#[derive(Clone)]
pub struct Matrix {
    buffer: DeviceBuffer,
    rows: usize,
    cols: usize,
    offset: usize,
}

impl Matrix {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Allocate an uninitialized `rows x cols` matrix on the queue's device.
    pub fn new(rows: usize, cols: usize, queue: &Queue) -> Result<Self> {
        let buffer = if rows * cols == 0 {
            DeviceBuffer::empty()
        } else {
            queue.alloc(rows * cols)?
        };
        Ok(Self {
            buffer,
            rows,
            cols,
            offset: 0,
        })
    }

    /// Blocking host-to-device construction.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_host(data: &[f32], rows: usize, cols: usize, queue: &Queue) -> Result<Self> {
        assert_eq!(
            data.len(),
            rows * cols,
            "from_host: {rows}x{cols} requires {} elements, got {}",
            rows * cols,
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
            offset: 0,
        })
    }

    /// Device-to-device copy of another matrix.
    pub fn copy_of(other: &Matrix, queue: &Queue) -> Result<Self> {
        let m = Self::new(other.rows, other.cols, queue)?;
        m.copy_window_from(other, queue)?;
        Ok(m)
    }

    /// Zero-copy view into `buffer` at `offset` elements.
    ///
    /// The view aliases the buffer: mutations are visible through every
    /// other view of the same region.
    pub fn view(buffer: &DeviceBuffer, rows: usize, cols: usize, offset: usize) -> Result<Self> {
        if offset + rows * cols > buffer.len() {
            return Err(Error::ViewOutOfBounds {
                extent: rows * cols,
                offset,
                capacity: buffer.len(),
            });
        }
        Ok(Self {
            buffer: buffer.clone(),
            rows,
            cols,
            offset,
        })
    }

    /// A zero-sized matrix with no allocation.
    pub fn empty() -> Self {
        Self {
            buffer: DeviceBuffer::empty(),
            rows: 0,
            cols: 0,
            offset: 0,
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

    /// Number of elements in the view.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether the matrix is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element offset of this view inside its buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The shared backing buffer.
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn device(&self) -> Device {
        self.buffer.device()
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

    fn check_same_dims(&self, op: &'static str, other: &Matrix) -> Result<()> {
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

    /// Adopt `rows x cols`, reallocating only when the element count
    /// changes. Reallocating under a non-zero-offset sub-view would pull a
    /// shared buffer out from under the other views, so that fails loudly.
    fn ensure_shape(
        &mut self,
        op: &'static str,
        rows: usize,
        cols: usize,
        queue: &Queue,
    ) -> Result<()> {
        if self.rows == rows && self.cols == cols {
            return Ok(());
        }
        if rows * cols == self.len() {
            self.rows = rows;
            self.cols = cols;
            return Ok(());
        }
        if self.offset != 0 {
            return Err(Error::ViewResize {
                op,
                offset: self.offset,
            });
        }
        self.buffer = if rows * cols == 0 {
            DeviceBuffer::empty()
        } else {
            queue.alloc(rows * cols)?
        };
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }

    // =========================================================================
    // Host transfer (always blocking)
    // =========================================================================

    /// Blocking device-to-host readback of the whole view, row-major.
    pub fn to_host(&self, queue: &Queue) -> Result<Vec<f32>> {
        self.check_queue(queue)?;
        self.buffer.read_range(self.offset, self.len())
    }

    /// Blocking host-to-device write into the existing allocation.
    pub fn write_host(&self, data: &[f32], queue: &Queue) -> Result<()> {
        self.check_queue(queue)?;
        if data.len() != self.len() {
            return Err(Error::OutOfRange {
                op: "write_host",
                index: data.len(),
                len: self.len(),
            });
        }
        self.buffer.write_range(self.offset, data)
    }

    // =========================================================================
    // Element-wise operations
    // =========================================================================

    pub fn fill(&self, value: f32, queue: &Queue) -> Result<Event> {
        self.check_queue(queue)?;
        if self.is_empty() {
            return Ok(Event::completed());
        }
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_unary(&self.buffer, self.offset, self.len(), |dst| {
                    cpu::fill(dst, value)
                })?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => {
                crate::kernels::cuda::fill(queue, &self.buffer, self.offset, self.len(), value)
            }
        }
    }

    /// In-place `self *= factor`.
    pub fn ipscale(&self, factor: f32, queue: &Queue) -> Result<Event> {
        self.check_queue(queue)?;
        if self.is_empty() {
            return Ok(Event::completed());
        }
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_unary(&self.buffer, self.offset, self.len(), |dst| {
                    cpu::scale(dst, factor)
                })?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => {
                crate::kernels::cuda::scale(queue, &self.buffer, self.offset, self.len(), factor)
            }
        }
    }

    /// `self * factor` as a new matrix.
    pub fn scale(&self, factor: f32, queue: &Queue) -> Result<Matrix> {
        let out = Matrix::copy_of(self, queue)?;
        out.ipscale(factor, queue)?;
        Ok(out)
    }

    fn ip_axpy(&self, op: &'static str, factor: f32, other: &Matrix, queue: &Queue) -> Result<Event> {
        self.check_queue(queue)?;
        self.check_same_dims(op, other)?;
        if self.is_empty() {
            return Ok(Event::completed());
        }
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_binary(
                    &self.buffer,
                    self.offset,
                    &other.buffer,
                    other.offset,
                    self.len(),
                    |dst, src| cpu::axpy(dst, factor, src),
                )?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => crate::kernels::cuda::axpy(
                queue,
                &self.buffer,
                self.offset,
                &other.buffer,
                other.offset,
                self.len(),
                factor,
            ),
        }
    }

    /// In-place `self += factor * other`.
    pub fn ipadd(&self, factor: f32, other: &Matrix, queue: &Queue) -> Result<Event> {
        self.ip_axpy("ipadd", factor, other, queue)
    }

    /// `self + factor * other` as a new matrix.
    pub fn add(&self, factor: f32, other: &Matrix, queue: &Queue) -> Result<Matrix> {
        let out = Matrix::copy_of(self, queue)?;
        out.ip_axpy("add", factor, other, queue)?;
        Ok(out)
    }

    /// In-place `self -= factor * other`.
    pub fn ipsub(&self, factor: f32, other: &Matrix, queue: &Queue) -> Result<Event> {
        self.ip_axpy("ipsub", -factor, other, queue)
    }

    /// `self - factor * other` as a new matrix.
    pub fn sub(&self, factor: f32, other: &Matrix, queue: &Queue) -> Result<Matrix> {
        let out = Matrix::copy_of(self, queue)?;
        out.ip_axpy("sub", -factor, other, queue)?;
        Ok(out)
    }

    /// In-place element-wise product `self *= other`.
    pub fn iphadamard(&self, other: &Matrix, queue: &Queue) -> Result<Event> {
        self.check_queue(queue)?;
        self.check_same_dims("iphadamard", other)?;
        if self.is_empty() {
            return Ok(Event::completed());
        }
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_binary(
                    &self.buffer,
                    self.offset,
                    &other.buffer,
                    other.offset,
                    self.len(),
                    cpu::hadamard,
                )?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => crate::kernels::cuda::hadamard(
                queue,
                &self.buffer,
                self.offset,
                &other.buffer,
                other.offset,
                self.len(),
            ),
        }
    }

    /// Element-wise product as a new matrix.
    pub fn hadamard(&self, other: &Matrix, queue: &Queue) -> Result<Matrix> {
        let out = Matrix::copy_of(self, queue)?;
        out.iphadamard(other, queue)?;
        Ok(out)
    }

    // =========================================================================
    // Transpose and reductions
    // =========================================================================

    /// `self^T` as a new matrix.
    pub fn transpose(&self, queue: &Queue) -> Result<Matrix> {
        self.check_queue(queue)?;
        let out = Matrix::new(self.cols, self.rows, queue)?;
        if self.is_empty() {
            return Ok(out);
        }
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_binary(
                    &out.buffer,
                    out.offset,
                    &self.buffer,
                    self.offset,
                    self.len(),
                    |dst, src| cpu::transpose(dst, src, self.rows, self.cols),
                )?;
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => {
                crate::kernels::cuda::transpose(
                    queue,
                    &out.buffer,
                    out.offset,
                    &self.buffer,
                    self.offset,
                    self.rows,
                    self.cols,
                )?;
            }
        }
        Ok(out)
    }

    /// Sum of all elements. Synchronous: the scalar is read back to host.
    pub fn sum_reduce(&self, queue: &Queue) -> Result<f32> {
        let host = self.to_host(queue)?;
        Ok(cpu::sum(&host))
    }

    /// Euclidean norm of the elements. Synchronous scalar readback.
    pub fn l2_norm(&self, queue: &Queue) -> Result<f32> {
        let host = self.to_host(queue)?;
        Ok(cpu::sum_squares(&host).sqrt())
    }

    /// Flat row-major index of the maximum element. Always synchronous.
    pub fn index_of_max(&self, queue: &Queue) -> Result<usize> {
        if self.is_empty() {
            return Err(Error::OutOfRange {
                op: "index_of_max",
                index: 0,
                len: 0,
            });
        }
        let host = self.to_host(queue)?;
        Ok(cpu::index_of_max(&host))
    }

    // =========================================================================
    // GEMM
    // =========================================================================

    /// `self = alpha * op(a) * op(b)`.
    ///
    /// Result dimensions follow from the transpose flags; the output is
    /// resized under the [`ensure_shape`](Matrix::copy) rules. Dimension
    /// mismatches fail before anything is enqueued.
    pub fn gemm(
        &mut self,
        alpha: f32,
        trans_a: bool,
        a: &Matrix,
        trans_b: bool,
        b: &Matrix,
        queue: &Queue,
    ) -> Result<Event> {
        self.gemm_impl("gemm", alpha, trans_a, a, trans_b, b, 0.0, None, queue)
    }

    /// `self = alpha * op(a) * op(b) + beta * c`.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm_acc(
        &mut self,
        alpha: f32,
        trans_a: bool,
        a: &Matrix,
        trans_b: bool,
        b: &Matrix,
        beta: f32,
        c: &Matrix,
        queue: &Queue,
    ) -> Result<Event> {
        self.gemm_impl("gemm_acc", alpha, trans_a, a, trans_b, b, beta, Some(c), queue)
    }

    #[allow(clippy::too_many_arguments)]
    fn gemm_impl(
        &mut self,
        op: &'static str,
        alpha: f32,
        trans_a: bool,
        a: &Matrix,
        trans_b: bool,
        b: &Matrix,
        beta: f32,
        acc: Option<&Matrix>,
        queue: &Queue,
    ) -> Result<Event> {
        let (m, k1) = if trans_a { (a.cols, a.rows) } else { (a.rows, a.cols) };
        let (k2, n) = if trans_b { (b.cols, b.rows) } else { (b.rows, b.cols) };
        if k1 != k2 {
            return Err(Error::GemmDimMismatch { op, m, k1, k2, n });
        }

        if let Some(c) = acc {
            if c.rows != m || c.cols != n {
                return Err(Error::DimMismatch {
                    op,
                    expected_rows: m,
                    expected_cols: n,
                    rows: c.rows,
                    cols: c.cols,
                });
            }
        }

        self.ensure_shape(op, m, n, queue)?;
        self.check_queue(queue)?;

        // Zero-size operands never reach the kernel library.
        if m * n == 0 || k1 == 0 {
            return Ok(Event::completed());
        }

        if let Some(c) = acc {
            let same_region =
                self.buffer.ptr_eq(&c.buffer) && self.offset == c.offset;
            if !same_region {
                self.copy_window_from(c, queue)?;
            }
        }

        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_ternary(
                    &self.buffer,
                    self.offset,
                    m * n,
                    &a.buffer,
                    a.offset,
                    a.len(),
                    &b.buffer,
                    b.offset,
                    b.len(),
                    |dst, a_s, b_s| {
                        cpu::gemm(dst, beta, alpha, a_s, trans_a, b_s, trans_b, m, n, k1)
                    },
                )?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => crate::kernels::cuda::batched_gemm(
                queue,
                &self.buffer,
                &[self.offset],
                beta,
                alpha,
                &a.buffer,
                &[a.offset],
                trans_a,
                &b.buffer,
                &[b.offset],
                trans_b,
                m,
                n,
                k1,
            ),
        }
    }

    // =========================================================================
    // Copy
    // =========================================================================

    /// Copy `other` into `self`, reallocating only if the element count
    /// differs from the current allocation. Resizing a non-zero-offset
    /// sub-view is [`Error::ViewResize`].
    pub fn copy(&mut self, other: &Matrix, queue: &Queue) -> Result<Event> {
        self.ensure_shape("copy", other.rows, other.cols, queue)?;
        self.copy_window_from(other, queue)
    }

    /// Same-shape window copy; routes cross-device copies through a
    /// blocking host staging buffer.
    fn copy_window_from(&self, other: &Matrix, queue: &Queue) -> Result<Event> {
        if self.is_empty() {
            return Ok(Event::completed());
        }
        if self.device() != other.device() {
            let staged = other.buffer.read_range(other.offset, other.len())?;
            self.buffer.write_range(self.offset, &staged)?;
            return Ok(Event::completed());
        }
        match &self.buffer {
            DeviceBuffer::Host(_) => {
                buffer::host_binary(
                    &self.buffer,
                    self.offset,
                    &other.buffer,
                    other.offset,
                    self.len(),
                    |dst, src| dst.copy_from_slice(src),
                )?;
                Ok(Event::completed())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { .. } => crate::kernels::cuda::copy(
                queue,
                &self.buffer,
                self.offset,
                &other.buffer,
                other.offset,
                self.len(),
            ),
        }
    }
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Matrix({}x{}, offset={}, {})",
            self.rows,
            self.cols,
            self.offset,
            self.device()
        )
    }
}
