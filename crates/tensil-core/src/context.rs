//! Device selection, command queues, and the process-wide context.
//!
//! A [`DeviceContext`] owns the selected device, a default in-order
//! [`Queue`], and the kernel program cache. It is an explicit object: the
//! owning process constructs it once and passes it (or its queues) to
//! whoever needs them. [`DeviceContext::install`] optionally registers one
//! context process-wide; a second `install` returns
//! [`Error::AlreadyInitialized`] instead of terminating anything.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::buffer::DeviceBuffer;
use crate::config::ContextConfig;
use crate::error::{Error, Result};
use crate::programs::{KernelHandle, ProgramCache};

/// Compute device a buffer or queue is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
    /// CUDA GPU with device index.
    Cuda(usize),
}

impl Device {
    /// Whether this is the CPU device.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Whether this is a CUDA device.
    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    /// CUDA device index, if applicable.
    pub fn cuda_index(&self) -> Option<usize> {
        match self {
            Device::Cuda(idx) => Some(*idx),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

/// An in-order command queue bound to one device.
///
/// Operations enqueued on one queue execute in program order. There is no
/// ordering guarantee across queues; the dispatcher's join barrier is the
/// only cross-queue synchronization point.
#[derive(Clone)]
pub struct Queue {
    device: Device,
    programs: Arc<ProgramCache>,
    #[cfg(feature = "cuda")]
    cuda: Option<Arc<cudarc::driver::CudaDevice>>,
}

impl Queue {
    pub(crate) fn for_device(device: Device, programs: Arc<ProgramCache>) -> Result<Self> {
        match device {
            Device::Cpu => Ok(Self {
                device,
                programs,
                #[cfg(feature = "cuda")]
                cuda: None,
            }),
            #[cfg(feature = "cuda")]
            Device::Cuda(idx) => {
                let dev = crate::kernels::cuda::device_handle(idx)?;
                Ok(Self {
                    device,
                    programs,
                    cuda: Some(dev),
                })
            }
            #[cfg(not(feature = "cuda"))]
            Device::Cuda(idx) => Err(Error::Backend(format!(
                "cuda:{idx} requested but the cuda feature is not enabled"
            ))),
        }
    }

    /// Device this queue feeds.
    pub fn device(&self) -> Device {
        self.device
    }

    /// The kernel program cache shared with the owning context.
    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn cuda_device(&self) -> Result<&Arc<cudarc::driver::CudaDevice>> {
        self.cuda
            .as_ref()
            .ok_or_else(|| Error::Backend("queue has no CUDA device handle".into()))
    }

    /// Allocate an uninitialized (zeroed) device buffer of `elements` f32s.
    pub fn alloc(&self, elements: usize) -> Result<DeviceBuffer> {
        DeviceBuffer::alloc(self, elements)
    }

    /// Blocking host-to-device upload into a fresh buffer.
    ///
    /// Always synchronous: the caller may free `data` as soon as this
    /// returns, so a non-blocking variant would invite use-after-free.
    pub fn upload(&self, data: &[f32]) -> Result<DeviceBuffer> {
        DeviceBuffer::upload(self, data)
    }

    /// Block until every operation enqueued so far has completed.
    pub fn sync(&self) -> Result<()> {
        match self.device {
            Device::Cpu => Ok(()),
            #[cfg(feature = "cuda")]
            Device::Cuda(_) => self
                .cuda_device()?
                .synchronize()
                .map_err(|e| Error::Backend(e.to_string())),
            #[cfg(not(feature = "cuda"))]
            Device::Cuda(_) => Ok(()),
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queue({})", self.device)
    }
}

/// Completion handle for an enqueued operation.
///
/// Non-blocking operations return immediately after enqueue; `wait` blocks
/// the caller until the device has executed them. Host-side buffers an
/// operation references must stay valid until then.
pub struct Event {
    #[cfg(feature = "cuda")]
    cuda: Option<Arc<cudarc::driver::CudaDevice>>,
    _priv: (),
}

impl Event {
    /// An already-completed event (CPU ops execute eagerly).
    pub fn completed() -> Self {
        Self {
            #[cfg(feature = "cuda")]
            cuda: None,
            _priv: (),
        }
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn on_queue(queue: &Queue) -> Self {
        Self {
            cuda: queue.cuda.clone(),
            _priv: (),
        }
    }

    /// Block until the operation behind this event has completed.
    pub fn wait(&self) -> Result<()> {
        #[cfg(feature = "cuda")]
        if let Some(dev) = &self.cuda {
            return dev.synchronize().map_err(|e| Error::Backend(e.to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event")
    }
}

static GLOBAL: OnceLock<Arc<DeviceContext>> = OnceLock::new();

/// Process-wide handle to the selected device, its default queue, and the
/// kernel program cache.
pub struct DeviceContext {
    config: ContextConfig,
    default_queue: Queue,
    programs: Arc<ProgramCache>,
}

impl DeviceContext {
    /// Construct a context from a configuration.
    ///
    /// This is the injectable form: the owning process creates one and
    /// passes it around. Nothing global is touched.
    pub fn new(config: ContextConfig) -> Result<Arc<Self>> {
        let programs = Arc::new(ProgramCache::new(config.kernel_paths.clone()));
        let default_queue = Queue::for_device(config.device, Arc::clone(&programs))?;
        tracing::debug!(device = %config.device, "device context created");
        Ok(Arc::new(Self {
            config,
            default_queue,
            programs,
        }))
    }

    /// Construct and register the process-wide context.
    ///
    /// A second call returns [`Error::AlreadyInitialized`]; the existing
    /// context stays installed and usable via [`DeviceContext::global`].
    pub fn install(config: ContextConfig) -> Result<Arc<Self>> {
        let ctx = Self::new(config)?;
        GLOBAL
            .set(Arc::clone(&ctx))
            .map_err(|_| Error::AlreadyInitialized)?;
        Ok(ctx)
    }

    /// The installed process-wide context, if any.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }

    /// Device selected by the configuration.
    pub fn device(&self) -> Device {
        self.config.device
    }

    /// The context's default in-order queue.
    pub fn default_queue(&self) -> &Queue {
        &self.default_queue
    }

    /// Create a fresh queue bound to `device`.
    ///
    /// Each dispatcher worker gets its own queue so per-worker operations
    /// stay ordered without serializing across workers.
    pub fn queue(&self, device: Device) -> Result<Queue> {
        Queue::for_device(device, Arc::clone(&self.programs))
    }

    /// Look up a kernel in the named program, compiling and caching the
    /// program on first access.
    pub fn kernel(&self, program: &str, kernel: &str) -> Result<KernelHandle> {
        self.programs.get(program, kernel)
    }

    /// The kernel program cache.
    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Configured kernel search path.
    pub fn kernel_paths(&self) -> &[std::path::PathBuf] {
        &self.config.kernel_paths
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceContext({})", self.config.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_properties() {
        assert!(Device::Cpu.is_cpu());
        assert!(!Device::Cpu.is_cuda());
        assert!(Device::Cuda(0).is_cuda());
        assert_eq!(Device::Cuda(1).cuda_index(), Some(1));
        assert_eq!(Device::Cpu.cuda_index(), None);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(format!("{}", Device::Cpu), "cpu");
        assert_eq!(format!("{}", Device::Cuda(2)), "cuda:2");
    }

    #[test]
    fn test_context_is_injectable() {
        let a = DeviceContext::new(ContextConfig::default()).unwrap();
        let b = DeviceContext::new(ContextConfig::default()).unwrap();
        assert_eq!(a.device(), Device::Cpu);
        assert_eq!(b.device(), Device::Cpu);
    }

    #[test]
    fn test_install_rejects_second_call() {
        // First install may race with other tests only if they also call
        // install; they don't, so the second call here must fail.
        let _ = DeviceContext::install(ContextConfig::default());
        let err = DeviceContext::install(ContextConfig::default()).unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
        assert!(DeviceContext::global().is_some());
    }

    #[test]
    fn test_queue_sync_is_trivial_on_cpu() {
        let ctx = DeviceContext::new(ContextConfig::default()).unwrap();
        ctx.default_queue().sync().unwrap();
    }

    #[test]
    fn test_event_wait() {
        Event::completed().wait().unwrap();
    }
}
