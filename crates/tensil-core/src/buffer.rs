//! Reference-counted device memory shared by aliasing views.
//!
//! A [`DeviceBuffer`] is an opaque allocation of f32 elements. Matrix and
//! Tensor views reference a `(offset, extent)` window of one buffer; the
//! allocation is freed when the last referencing view drops. Mutations
//! through one view are visible through every alias.
//!
//! The host backend keeps the data behind `Arc<RwLock<Vec<f32>>>` so the
//! aliasing contract holds on CPU exactly as it does for device memory.
//! When the destination and source of a binary operation share a buffer,
//! the source window is staged through a scratch copy before the write
//! lock is taken.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::{Device, Queue};
use crate::error::{Error, Result};

/// An opaque, reference-counted block of device memory.
#[derive(Clone)]
pub enum DeviceBuffer {
    /// Host allocation with shared-mutation semantics.
    Host(Arc<RwLock<Vec<f32>>>),
    /// CUDA device allocation.
    #[cfg(feature = "cuda")]
    Cuda {
        device: Arc<cudarc::driver::CudaDevice>,
        slice: Arc<RwLock<cudarc::driver::CudaSlice<f32>>>,
        index: usize,
    },
}

impl DeviceBuffer {
    /// A zero-length buffer; valid for zero-sized views, never dispatched.
    pub fn empty() -> Self {
        DeviceBuffer::Host(Arc::new(RwLock::new(Vec::new())))
    }

    pub(crate) fn alloc(queue: &Queue, elements: usize) -> Result<Self> {
        match queue.device() {
            Device::Cpu => Ok(DeviceBuffer::Host(Arc::new(RwLock::new(vec![
                0.0;
                elements
            ])))),
            #[cfg(feature = "cuda")]
            Device::Cuda(index) => {
                let device = Arc::clone(queue.cuda_device()?);
                let slice = device.alloc_zeros::<f32>(elements).map_err(|e| Error::Alloc {
                    elements,
                    detail: e.to_string(),
                })?;
                Ok(DeviceBuffer::Cuda {
                    device,
                    slice: Arc::new(RwLock::new(slice)),
                    index,
                })
            }
            #[cfg(not(feature = "cuda"))]
            Device::Cuda(_) => Err(Error::Backend(
                "cuda buffer requested but the cuda feature is not enabled".into(),
            )),
        }
    }

    pub(crate) fn upload(queue: &Queue, data: &[f32]) -> Result<Self> {
        match queue.device() {
            Device::Cpu => Ok(DeviceBuffer::Host(Arc::new(RwLock::new(data.to_vec())))),
            #[cfg(feature = "cuda")]
            Device::Cuda(index) => {
                let device = Arc::clone(queue.cuda_device()?);
                let slice = device.htod_sync_copy(data).map_err(|e| Error::Alloc {
                    elements: data.len(),
                    detail: e.to_string(),
                })?;
                Ok(DeviceBuffer::Cuda {
                    device,
                    slice: Arc::new(RwLock::new(slice)),
                    index,
                })
            }
            #[cfg(not(feature = "cuda"))]
            Device::Cuda(_) => Err(Error::Backend(
                "cuda buffer requested but the cuda feature is not enabled".into(),
            )),
        }
    }

    /// Capacity in elements.
    pub fn len(&self) -> usize {
        match self {
            DeviceBuffer::Host(data) => data.read().len(),
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { slice, .. } => {
                use cudarc::driver::DeviceSlice;
                slice.read().len()
            }
        }
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Device this buffer lives on.
    pub fn device(&self) -> Device {
        match self {
            DeviceBuffer::Host(_) => Device::Cpu,
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { index, .. } => Device::Cuda(*index),
        }
    }

    /// Whether two buffers are the same allocation (aliases).
    pub fn ptr_eq(&self, other: &DeviceBuffer) -> bool {
        match (self, other) {
            (DeviceBuffer::Host(a), DeviceBuffer::Host(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "cuda")]
            (DeviceBuffer::Cuda { slice: a, .. }, DeviceBuffer::Cuda { slice: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            #[cfg(feature = "cuda")]
            _ => false,
        }
    }

    fn check_window(&self, offset: usize, len: usize) -> Result<()> {
        let capacity = self.len();
        if offset + len > capacity {
            return Err(Error::ViewOutOfBounds {
                extent: len,
                offset,
                capacity,
            });
        }
        Ok(())
    }

    /// Blocking device-to-host read of one window.
    pub fn read_range(&self, offset: usize, len: usize) -> Result<Vec<f32>> {
        self.check_window(offset, len)?;
        match self {
            DeviceBuffer::Host(data) => Ok(data.read()[offset..offset + len].to_vec()),
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { device, slice, .. } => {
                let guard = slice.read();
                let view = guard.slice(offset..offset + len);
                device
                    .dtoh_sync_copy(&view)
                    .map_err(|e| Error::Backend(e.to_string()))
            }
        }
    }

    /// Blocking host-to-device write into one window.
    pub fn write_range(&self, offset: usize, data: &[f32]) -> Result<()> {
        self.check_window(offset, data.len())?;
        match self {
            DeviceBuffer::Host(dst) => {
                dst.write()[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            }
            #[cfg(feature = "cuda")]
            DeviceBuffer::Cuda { device, slice, .. } => {
                let mut guard = slice.write();
                let mut view = guard.slice_mut(offset..offset + data.len());
                device
                    .htod_sync_copy_into(data, &mut view)
                    .map_err(|e| Error::Backend(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceBuffer({}, {} elements)", self.device(), self.len())
    }
}

/// Run `f` over a mutable host window.
pub(crate) fn host_unary<R>(
    buf: &DeviceBuffer,
    offset: usize,
    len: usize,
    f: impl FnOnce(&mut [f32]) -> R,
) -> Result<R> {
    buf.check_window(offset, len)?;
    match buf {
        DeviceBuffer::Host(data) => {
            let mut guard = data.write();
            Ok(f(&mut guard[offset..offset + len]))
        }
        #[cfg(feature = "cuda")]
        _ => Err(Error::Backend("host kernel invoked on device buffer".into())),
    }
}

/// Run `f` over an immutable host window.
pub(crate) fn host_read<R>(
    buf: &DeviceBuffer,
    offset: usize,
    len: usize,
    f: impl FnOnce(&[f32]) -> R,
) -> Result<R> {
    buf.check_window(offset, len)?;
    match buf {
        DeviceBuffer::Host(data) => {
            let guard = data.read();
            Ok(f(&guard[offset..offset + len]))
        }
        #[cfg(feature = "cuda")]
        _ => Err(Error::Backend("host kernel invoked on device buffer".into())),
    }
}

/// Run `f(dst, src)` over two host windows of equal length.
///
/// When the windows share a buffer the source is staged through a scratch
/// copy, so overlapping aliases behave as if the read happened before any
/// write.
pub(crate) fn host_binary<R>(
    dst: &DeviceBuffer,
    dst_offset: usize,
    src: &DeviceBuffer,
    src_offset: usize,
    len: usize,
    f: impl FnOnce(&mut [f32], &[f32]) -> R,
) -> Result<R> {
    dst.check_window(dst_offset, len)?;
    src.check_window(src_offset, len)?;
    match (dst, src) {
        (DeviceBuffer::Host(d), DeviceBuffer::Host(s)) => {
            if Arc::ptr_eq(d, s) {
                let staged = s.read()[src_offset..src_offset + len].to_vec();
                let mut guard = d.write();
                Ok(f(&mut guard[dst_offset..dst_offset + len], &staged))
            } else {
                let src_guard = s.read();
                let mut dst_guard = d.write();
                Ok(f(
                    &mut dst_guard[dst_offset..dst_offset + len],
                    &src_guard[src_offset..src_offset + len],
                ))
            }
        }
        #[cfg(feature = "cuda")]
        _ => Err(Error::Backend("host kernel invoked on device buffer".into())),
    }
}

/// Run `f(dst, a, b)` over three host windows (GEMM-shaped operands).
///
/// `a` or `b` windows sharing the destination buffer are staged through
/// scratch copies.
pub(crate) fn host_ternary<R>(
    dst: &DeviceBuffer,
    dst_offset: usize,
    dst_len: usize,
    a: &DeviceBuffer,
    a_offset: usize,
    a_len: usize,
    b: &DeviceBuffer,
    b_offset: usize,
    b_len: usize,
    f: impl FnOnce(&mut [f32], &[f32], &[f32]) -> R,
) -> Result<R> {
    dst.check_window(dst_offset, dst_len)?;
    a.check_window(a_offset, a_len)?;
    b.check_window(b_offset, b_len)?;

    let (dst_arc, a_arc, b_arc) = match (dst, a, b) {
        (DeviceBuffer::Host(d), DeviceBuffer::Host(a), DeviceBuffer::Host(b)) => (d, a, b),
        #[cfg(feature = "cuda")]
        _ => return Err(Error::Backend("host kernel invoked on device buffer".into())),
    };

    let a_staged = if Arc::ptr_eq(dst_arc, a_arc) {
        Some(a_arc.read()[a_offset..a_offset + a_len].to_vec())
    } else {
        None
    };
    let b_staged = if Arc::ptr_eq(dst_arc, b_arc) {
        Some(b_arc.read()[b_offset..b_offset + b_len].to_vec())
    } else {
        None
    };

    let a_guard = if a_staged.is_none() {
        Some(a_arc.read())
    } else {
        None
    };
    let b_guard = if b_staged.is_none() && !Arc::ptr_eq(a_arc, b_arc) {
        Some(b_arc.read())
    } else {
        None
    };

    let a_slice: &[f32] = match (&a_staged, &a_guard) {
        (Some(v), _) => v,
        (None, Some(g)) => &g[a_offset..a_offset + a_len],
        (None, None) => unreachable!(),
    };
    let b_slice: &[f32] = match (&b_staged, &b_guard, &a_guard) {
        (Some(v), _, _) => v,
        (None, Some(g), _) => &g[b_offset..b_offset + b_len],
        // a and b share a buffer: reuse a's read guard.
        (None, None, Some(g)) => &g[b_offset..b_offset + b_len],
        (None, None, None) => unreachable!(),
    };

    let mut dst_guard = dst_arc.write();
    Ok(f(
        &mut dst_guard[dst_offset..dst_offset + dst_len],
        a_slice,
        b_slice,
    ))
}
