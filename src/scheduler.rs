//! CPU-vs-GPU placement heuristic.
//!
//! The rule is deliberately simple: small problems stay on the CPU because
//! upload and read-back dominate, large ones go to the GPU when a GPU-class
//! adapter exists. There is no cost model and no accounting for transfer
//! size beyond the element count.
//!
//! ```rust
//! use annof::backend::{Device, DevicePolicy};
//! use annof::scheduler::{Scheduler, SchedulerConfig, StaticProbe};
//! use annof::tensors::Tensor;
//!
//! let config = SchedulerConfig { policy: Some(DevicePolicy::Auto), ..Default::default() };
//! let scheduler = Scheduler::with_probe(config, StaticProbe(true));
//! let small = Tensor::zeros(vec![10, 10]);
//! assert_eq!(scheduler.select_device(&small, &small), Device::Cpu);
//! ```

use crate::backend::{Device, DevicePolicy, get_device_policy};
use crate::tensors::Tensor;

/// Element count above which work is sent to the GPU.
pub const DEFAULT_GPU_THRESHOLD: usize = 1_000_000;

/// Answers whether a GPU-class device can be used.
pub trait DeviceProbe: Send + Sync {
    fn gpu_available(&self) -> bool;
}

/// Probes through `wgpu` adapter enumeration.
///
/// Enumeration is done once per process and the answer is cached. Without the
/// `wgpu` feature there is never a GPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuProbe;

#[cfg(feature = "wgpu")]
lazy_static::lazy_static! {
    static ref GPU_PRESENT: bool = {
        let present = crate::ops::wgpu::gpu_available();
        log::debug!("GPU-class adapter present: {present}");
        present
    };
}

impl DeviceProbe for WgpuProbe {
    #[cfg(feature = "wgpu")]
    fn gpu_available(&self) -> bool {
        *GPU_PRESENT
    }

    #[cfg(not(feature = "wgpu"))]
    fn gpu_available(&self) -> bool {
        false
    }
}

/// A probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl DeviceProbe for StaticProbe {
    fn gpu_available(&self) -> bool {
        self.0
    }
}

/// Tunables for [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Combined element count of both operands must exceed this to use the GPU.
    pub gpu_threshold: usize,
    /// Policy for this scheduler; `None` follows the process-wide
    /// [`get_device_policy`].
    pub policy: Option<DevicePolicy>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            gpu_threshold: DEFAULT_GPU_THRESHOLD,
            policy: None,
        }
    }
}

/// Picks a [`Device`] for a binary op.
pub struct Scheduler {
    config: SchedulerConfig,
    probe: Box<dyn DeviceProbe>,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_probe(config, WgpuProbe)
    }

    pub fn with_probe(config: SchedulerConfig, probe: impl DeviceProbe + 'static) -> Self {
        Self {
            config,
            probe: Box::new(probe),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the probe reports a GPU-class device.
    pub fn gpu_available(&self) -> bool {
        self.probe.gpu_available()
    }

    /// Chooses where an op over `a` and `b` should run.
    ///
    /// Never returns [`Device::Gpu`] when no GPU is discoverable, not even
    /// under [`DevicePolicy::ForceGpu`].
    pub fn select_device(&self, a: &Tensor, b: &Tensor) -> Device {
        let policy = self.config.policy.unwrap_or_else(get_device_policy);
        match policy {
            DevicePolicy::ForceCpu => Device::Cpu,
            DevicePolicy::ForceGpu if self.gpu_available() => Device::Gpu,
            DevicePolicy::ForceGpu => Device::Cpu,
            DevicePolicy::Auto => {
                let count = a.len().saturating_add(b.len());
                if count > self.config.gpu_threshold && self.gpu_available() {
                    Device::Gpu
                } else {
                    Device::Cpu
                }
            }
        }
    }
}
