//! Scheduling policy: how many workers, on which devices, and how a batch
//! splits across them.

use serde::{Deserialize, Serialize};
use tensil_core::Device;

use crate::error::{DispatchError, Result};

/// Worker allocation policy for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Upper bound on pooled worker threads.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// Devices to schedule on, in allocation order.
    #[serde(default = "default_devices")]
    pub devices: Vec<Device>,
    /// When false each device gets exactly one worker.
    #[serde(default)]
    pub multithread_per_device: bool,
}

fn default_max_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_devices() -> Vec<Device> {
    vec![Device::Cpu]
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            devices: default_devices(),
            multithread_per_device: true,
        }
    }
}

/// Worker allocation for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResource {
    pub device: Device,
    pub threads: usize,
}

impl Policy {
    /// Distribute `max_threads` across the devices: an even share each,
    /// with the remainder handed out one extra thread per device in
    /// allocation order. Devices left with zero threads are dropped.
    pub fn resources(&self) -> Result<Vec<DeviceResource>> {
        if self.devices.is_empty() {
            return Err(DispatchError::NoDevices);
        }
        if !self.multithread_per_device {
            return Ok(self
                .devices
                .iter()
                .map(|&device| DeviceResource { device, threads: 1 })
                .collect());
        }
        let base = self.max_threads / self.devices.len();
        let remainder = self.max_threads % self.devices.len();
        let resources: Vec<DeviceResource> = self
            .devices
            .iter()
            .enumerate()
            .map(|(i, &device)| DeviceResource {
                device,
                threads: base + usize::from(i < remainder),
            })
            .filter(|r| r.threads > 0)
            .collect();
        if resources.is_empty() {
            return Err(DispatchError::NoDevices);
        }
        Ok(resources)
    }
}

/// Split `batch` samples across `workers`: `batch / workers` each, with the
/// remainder handed out one extra sample to the leading workers. The shares
/// always sum to exactly `batch`.
pub fn partition(batch: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let base = batch / workers;
    let remainder = batch % workers;
    (0..workers)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_sums_exactly() {
        for batch in [0usize, 1, 7, 32, 100, 101] {
            for workers in 1..=9usize {
                let shares = partition(batch, workers);
                assert_eq!(shares.len(), workers);
                assert_eq!(shares.iter().sum::<usize>(), batch, "B={batch} W={workers}");
                // leading workers carry the remainder, one each
                assert!(shares.windows(2).all(|w| w[0] >= w[1]));
                assert!(shares[0] - shares[workers - 1] <= 1);
            }
        }
    }

    #[test]
    fn test_partition_small_batch() {
        assert_eq!(partition(2, 4), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_resources_even_split_with_remainder() {
        let policy = Policy {
            max_threads: 7,
            devices: vec![Device::Cpu, Device::Cuda(0), Device::Cuda(1)],
            multithread_per_device: true,
        };
        let threads: Vec<usize> = policy.resources().unwrap().iter().map(|r| r.threads).collect();
        assert_eq!(threads, vec![3, 2, 2]);
    }

    #[test]
    fn test_resources_single_thread_mode() {
        let policy = Policy {
            max_threads: 8,
            devices: vec![Device::Cpu, Device::Cuda(0)],
            multithread_per_device: false,
        };
        let threads: Vec<usize> = policy.resources().unwrap().iter().map(|r| r.threads).collect();
        assert_eq!(threads, vec![1, 1]);
    }

    #[test]
    fn test_resources_drop_starved_devices() {
        let policy = Policy {
            max_threads: 2,
            devices: vec![Device::Cuda(0), Device::Cuda(1), Device::Cuda(2)],
            multithread_per_device: true,
        };
        let resources = policy.resources().unwrap();
        assert_eq!(resources.len(), 2);
        assert!(resources.iter().all(|r| r.threads == 1));
    }

    #[test]
    fn test_no_devices_is_an_error() {
        let policy = Policy {
            max_threads: 4,
            devices: Vec::new(),
            multithread_per_device: true,
        };
        assert!(matches!(policy.resources(), Err(DispatchError::NoDevices)));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: Policy = serde_json::from_str("{}").unwrap();
        assert!(policy.max_threads >= 1);
        assert_eq!(policy.devices, vec![Device::Cpu]);
        assert!(!policy.multithread_per_device);
    }
}
