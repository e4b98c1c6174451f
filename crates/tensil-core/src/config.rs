//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::Device;

/// Configuration for a [`DeviceContext`](crate::DeviceContext).
///
/// Selects the compute device and the filesystem search path for named
/// kernel programs (one `<name>.cu` source unit per program).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Device the default queue is bound to.
    #[serde(default)]
    pub device: Device,
    /// Directories searched, in order, for kernel program sources.
    #[serde(default = "default_kernel_paths")]
    pub kernel_paths: Vec<PathBuf>,
}

fn default_kernel_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("kernels")]
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            device: Device::default(),
            kernel_paths: default_kernel_paths(),
        }
    }
}

impl ContextConfig {
    /// Config for a specific device with the default kernel search path.
    pub fn for_device(device: Device) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    /// Append a directory to the kernel search path.
    pub fn with_kernel_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kernel_paths.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let cfg = ContextConfig::default();
        assert_eq!(cfg.device, Device::Cpu);
        assert_eq!(cfg.kernel_paths, vec![PathBuf::from("kernels")]);
    }

    #[test]
    fn test_roundtrip_json() {
        let cfg = ContextConfig::for_device(Device::Cpu).with_kernel_path("/opt/tensil/kernels");
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ContextConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device, cfg.device);
        assert_eq!(back.kernel_paths, cfg.kernel_paths);
    }
}
