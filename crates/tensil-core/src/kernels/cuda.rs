//! CUDA kernel dispatch.
//!
//! Device handles are lazily created and cached per GPU index. Kernel
//! programs come from the context's [`ProgramCache`](crate::programs::ProgramCache)
//! (NVRTC-compiled from the configured search path) and are loaded onto
//! each device at most once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use cudarc::driver::{CudaDevice, CudaFunction, LaunchAsync, LaunchConfig};
use parking_lot::Mutex;

use crate::buffer::DeviceBuffer;
use crate::context::{Event, Queue};
use crate::error::{Error, Result};

const BLOCK_SIZE: usize = 256;

static DEVICES: OnceLock<Mutex<HashMap<usize, Arc<CudaDevice>>>> = OnceLock::new();

/// Registry of (device index, program name) pairs already loaded.
static LOADED: OnceLock<Mutex<HashSet<(usize, String)>>> = OnceLock::new();

/// Get or create the CUDA device handle for `index`.
pub fn device_handle(index: usize) -> Result<Arc<CudaDevice>> {
    let map = DEVICES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = map.lock();
    if let Some(dev) = map.get(&index) {
        return Ok(Arc::clone(dev));
    }
    let dev = CudaDevice::new(index)
        .map_err(|e| Error::Backend(format!("cuda device {index} init: {e}")))?;
    map.insert(index, Arc::clone(&dev));
    Ok(dev)
}

/// Number of usable CUDA devices.
pub fn device_count() -> usize {
    (0..16).take_while(|&i| CudaDevice::new(i).is_ok()).count()
}

fn grid_1d(n: usize) -> LaunchConfig {
    let grid = n.div_ceil(BLOCK_SIZE);
    LaunchConfig {
        grid_dim: (grid as u32, 1, 1),
        block_dim: (BLOCK_SIZE as u32, 1, 1),
        shared_mem_bytes: 0,
    }
}

fn grid_2d(rows: usize, cols: usize) -> LaunchConfig {
    LaunchConfig {
        grid_dim: (cols.div_ceil(16) as u32, rows.div_ceil(16) as u32, 1),
        block_dim: (16, 16, 1),
        shared_mem_bytes: 0,
    }
}

/// Fetch a kernel function, compiling the program through the queue's
/// cache and loading it onto the queue's device if needed.
fn function(queue: &Queue, program: &str, kernel: &str) -> Result<CudaFunction> {
    let handle = queue.programs().get(program, kernel)?;
    let dev = queue.cuda_device()?;
    let index = queue
        .device()
        .cuda_index()
        .ok_or_else(|| Error::Backend("cuda kernel launch on a cpu queue".into()))?;

    let key = (index, program.to_string());
    let loaded = LOADED.get_or_init(|| Mutex::new(HashSet::new()));
    if !loaded.lock().contains(&key) {
        dev.load_ptx(handle.program().ptx().clone(), program, &[])
            .map_err(|e| Error::Backend(format!("load module '{program}': {e}")))?;
        loaded.lock().insert(key);
    }

    dev.get_func(program, kernel).ok_or_else(|| Error::KernelNotFound {
        program: program.to_string(),
        kernel: kernel.to_string(),
    })
}

fn cuda_parts(buf: &DeviceBuffer) -> Result<&Arc<parking_lot::RwLock<cudarc::driver::CudaSlice<f32>>>> {
    match buf {
        DeviceBuffer::Cuda { slice, .. } => Ok(slice),
        DeviceBuffer::Host(_) => Err(Error::Backend("cuda kernel invoked on host buffer".into())),
    }
}

pub fn fill(queue: &Queue, buf: &DeviceBuffer, offset: usize, len: usize, value: f32) -> Result<Event> {
    let f = function(queue, "elementwise", "fill_f32")?;
    let slice = cuda_parts(buf)?;
    let guard = slice.read();
    unsafe {
        f.launch(grid_1d(len), (&*guard, offset as u32, len as u32, value))
            .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}

pub fn scale(queue: &Queue, buf: &DeviceBuffer, offset: usize, len: usize, factor: f32) -> Result<Event> {
    let f = function(queue, "elementwise", "scale_f32")?;
    let slice = cuda_parts(buf)?;
    let guard = slice.read();
    unsafe {
        f.launch(grid_1d(len), (&*guard, offset as u32, len as u32, factor))
            .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}

/// `dst += factor * src` over two buffer windows.
pub fn axpy(
    queue: &Queue,
    dst: &DeviceBuffer,
    dst_offset: usize,
    src: &DeviceBuffer,
    src_offset: usize,
    len: usize,
    factor: f32,
) -> Result<Event> {
    let f = function(queue, "elementwise", "axpy_f32")?;
    let d = cuda_parts(dst)?.read();
    let s = cuda_parts(src)?.read();
    unsafe {
        f.launch(
            grid_1d(len),
            (&*d, dst_offset as u32, &*s, src_offset as u32, len as u32, factor),
        )
        .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}

pub fn hadamard(
    queue: &Queue,
    dst: &DeviceBuffer,
    dst_offset: usize,
    src: &DeviceBuffer,
    src_offset: usize,
    len: usize,
) -> Result<Event> {
    let f = function(queue, "elementwise", "hadamard_f32")?;
    let d = cuda_parts(dst)?.read();
    let s = cuda_parts(src)?.read();
    unsafe {
        f.launch(
            grid_1d(len),
            (&*d, dst_offset as u32, &*s, src_offset as u32, len as u32),
        )
        .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}

/// Device-to-device window copy.
pub fn copy(
    queue: &Queue,
    dst: &DeviceBuffer,
    dst_offset: usize,
    src: &DeviceBuffer,
    src_offset: usize,
    len: usize,
) -> Result<Event> {
    let f = function(queue, "elementwise", "copy_f32")?;
    let d = cuda_parts(dst)?.read();
    let s = cuda_parts(src)?.read();
    unsafe {
        f.launch(
            grid_1d(len),
            (&*d, dst_offset as u32, &*s, src_offset as u32, len as u32),
        )
        .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}

pub fn transpose(
    queue: &Queue,
    dst: &DeviceBuffer,
    dst_offset: usize,
    src: &DeviceBuffer,
    src_offset: usize,
    rows: usize,
    cols: usize,
) -> Result<Event> {
    let f = function(queue, "gemm", "transpose_f32")?;
    let d = cuda_parts(dst)?.read();
    let s = cuda_parts(src)?.read();
    unsafe {
        f.launch(
            grid_2d(rows, cols),
            (
                &*d,
                dst_offset as u32,
                &*s,
                src_offset as u32,
                rows as u32,
                cols as u32,
            ),
        )
        .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}

/// One batched GEMM launch over per-matrix offset arrays.
///
/// Also covers the single-matrix case (`offsets.len() == 1`). The offset
/// arrays are uploaded once per call and indexed by `blockIdx.z`.
#[allow(clippy::too_many_arguments)]
pub fn batched_gemm(
    queue: &Queue,
    c: &DeviceBuffer,
    c_offsets: &[usize],
    beta: f32,
    alpha: f32,
    a: &DeviceBuffer,
    a_offsets: &[usize],
    trans_a: bool,
    b: &DeviceBuffer,
    b_offsets: &[usize],
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
) -> Result<Event> {
    let f = function(queue, "gemm", "gemm_batched_f32")?;
    let dev = queue.cuda_device()?;

    let to_u32 = |v: &[usize]| v.iter().map(|&x| x as u32).collect::<Vec<u32>>();
    let c_offs = dev
        .htod_sync_copy(&to_u32(c_offsets))
        .map_err(|e| Error::Backend(e.to_string()))?;
    let a_offs = dev
        .htod_sync_copy(&to_u32(a_offsets))
        .map_err(|e| Error::Backend(e.to_string()))?;
    let b_offs = dev
        .htod_sync_copy(&to_u32(b_offsets))
        .map_err(|e| Error::Backend(e.to_string()))?;

    let mut cfg = grid_2d(m, n);
    cfg.grid_dim.2 = c_offsets.len() as u32;

    let cg = cuda_parts(c)?.read();
    let ag = cuda_parts(a)?.read();
    let bg = cuda_parts(b)?.read();
    unsafe {
        f.launch(
            cfg,
            (
                &*cg,
                &c_offs,
                beta,
                alpha,
                &*ag,
                &a_offs,
                trans_a as u32,
                &*bg,
                &b_offs,
                trans_b as u32,
                m as u32,
                n as u32,
                k as u32,
            ),
        )
        .map_err(|e| Error::Backend(e.to_string()))?;
    }
    Ok(Event::on_queue(queue))
}
