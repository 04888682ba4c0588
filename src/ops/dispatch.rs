//! Operation Dispatch Layer
//!
//! The [`Executor`] asks its [`Scheduler`] where each op should run and calls
//! the matching backend. A GPU that is missing or fails mid-op is never an
//! error for the caller: the op is rerun on the CPU and a warning is logged.
//! Shape errors are returned as-is from whichever backend saw them first.
//!
//! Every method returns the [`Device`] that actually produced the result.
//!
//! # Example
//! ```rust
//! use annof::backend::Device;
//! use annof::ops::dispatch::Executor;
//! use annof::tensor;
//! use annof::tensors::Tensor;
//!
//! let exec = Executor::cpu_only();
//! let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let b = tensor!([[5.0, 6.0], [7.0, 8.0]]);
//! let mut out = Tensor::zeros(vec![2, 2]);
//! assert_eq!(exec.matmul(&a, &b, &mut out).unwrap(), Device::Cpu);
//! assert_eq!(out.data(), &[19.0, 22.0, 43.0, 50.0]);
//! ```

use super::FcGradients;
use crate::backend::{Device, DevicePolicy};
use crate::error::{TensorError, TensorResult};
use crate::scheduler::{Scheduler, SchedulerConfig, StaticProbe};
use crate::tensors::Tensor;

#[cfg(feature = "wgpu")]
use super::wgpu::GpuContext;

/// Routes ops between the CPU kernels and an optional GPU context.
#[derive(Debug)]
pub struct Executor {
    scheduler: Scheduler,
    #[cfg(feature = "wgpu")]
    gpu: Option<GpuContext>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Scheduler::default())
    }
}

impl Executor {
    /// Builds an executor around `scheduler`, creating a GPU context when the
    /// scheduler's probe reports a GPU.
    ///
    /// A context that fails to come up is logged and the executor stays
    /// CPU-only.
    pub fn new(scheduler: Scheduler) -> Self {
        #[cfg(feature = "wgpu")]
        {
            let gpu = if scheduler.gpu_available() {
                GpuContext::new()
                    .inspect_err(|e| log::warn!("GPU context unavailable, staying on CPU: {e}"))
                    .ok()
            } else {
                None
            };
            Self { scheduler, gpu }
        }
        #[cfg(not(feature = "wgpu"))]
        {
            Self { scheduler }
        }
    }

    /// An executor that never touches the GPU.
    pub fn cpu_only() -> Self {
        let config = SchedulerConfig {
            policy: Some(DevicePolicy::ForceCpu),
            ..Default::default()
        };
        Self {
            scheduler: Scheduler::with_probe(config, StaticProbe(false)),
            #[cfg(feature = "wgpu")]
            gpu: None,
        }
    }

    /// Uses an existing context instead of creating one.
    #[cfg(feature = "wgpu")]
    pub fn with_context(scheduler: Scheduler, ctx: GpuContext) -> Self {
        Self {
            scheduler,
            gpu: Some(ctx),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[cfg(feature = "wgpu")]
    pub fn gpu_context(&self) -> Option<&GpuContext> {
        self.gpu.as_ref()
    }

    /// The context to run on, if the scheduler picked the GPU and one exists.
    #[cfg(feature = "wgpu")]
    fn gpu_for(&self, a: &Tensor, b: &Tensor) -> Option<&GpuContext> {
        match self.scheduler.select_device(a, b) {
            Device::Gpu => self.gpu.as_ref(),
            Device::Cpu => None,
        }
    }

    /// Elementwise `out = a + b`.
    pub fn add(&self, a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<Device> {
        #[cfg(feature = "wgpu")]
        {
            if let Some(ctx) = self.gpu_for(a, b) {
                match super::wgpu::add_gpu(ctx, a, b, out) {
                    Ok(()) => return Ok(Device::Gpu),
                    Err(e) => fall_back("add", e)?,
                }
            }
        }

        super::cpu::add_cpu(a, b, out)?;
        Ok(Device::Cpu)
    }

    /// `out = a × b`.
    pub fn matmul(&self, a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<Device> {
        #[cfg(feature = "wgpu")]
        {
            if let Some(ctx) = self.gpu_for(a, b) {
                match super::wgpu::matmul_gpu(ctx, a, b, out) {
                    Ok(()) => return Ok(Device::Gpu),
                    Err(e) => fall_back("matmul", e)?,
                }
            }
        }

        super::cpu::matmul_cpu(a, b, out)?;
        Ok(Device::Cpu)
    }

    /// Dense layer forward pass; placement is decided on `input` and `weights`.
    pub fn fully_connected_forward(
        &self,
        input: &Tensor,
        weights: &Tensor,
        bias: &Tensor,
    ) -> TensorResult<(Tensor, Device)> {
        #[cfg(feature = "wgpu")]
        {
            if let Some(ctx) = self.gpu_for(input, weights) {
                match super::wgpu::fully_connected_forward_gpu(ctx, input, weights, bias) {
                    Ok(out) => return Ok((out, Device::Gpu)),
                    Err(e) => fall_back("fully_connected_forward", e)?,
                }
            }
        }

        let out = super::cpu::fully_connected_forward_cpu(input, weights, bias)?;
        Ok((out, Device::Cpu))
    }

    /// Dense layer backward pass; placement is decided on `input` and `weights`.
    pub fn fully_connected_backward(
        &self,
        grad_out: &Tensor,
        input: &Tensor,
        weights: &Tensor,
    ) -> TensorResult<(FcGradients, Device)> {
        #[cfg(feature = "wgpu")]
        {
            if let Some(ctx) = self.gpu_for(input, weights) {
                match super::wgpu::fully_connected_backward_gpu(ctx, grad_out, input, weights) {
                    Ok(grads) => return Ok((grads, Device::Gpu)),
                    Err(e) => fall_back("fully_connected_backward", e)?,
                }
            }
        }

        let grads = super::cpu::fully_connected_backward_cpu(grad_out, input, weights)?;
        Ok((grads, Device::Cpu))
    }
}

/// Swallows GPU failures with a warning; anything else is the caller's fault
/// and is returned.
#[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
fn fall_back(op: &str, err: TensorError) -> TensorResult<()> {
    if err.is_gpu_failure() {
        log::warn!("{op} failed on GPU, rerunning on CPU: {err}");
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuStage;

    #[test]
    fn cpu_only_runs_everything_on_cpu() {
        let exec = Executor::cpu_only();
        let a = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let mut out = Tensor::zeros(vec![2, 2]);
        assert_eq!(exec.add(&a, &a, &mut out).unwrap(), Device::Cpu);
        assert_eq!(out.data(), &[2.0, 4.0, 6.0, 8.0]);

        let bias = Tensor::zeros(vec![2]);
        let (y, device) = exec.fully_connected_forward(&a, &a, &bias).unwrap();
        assert_eq!(device, Device::Cpu);
        assert_eq!(y.data(), &[7.0, 10.0, 15.0, 22.0]);
    }

    #[test]
    fn gpu_choice_without_context_falls_back() {
        let config = SchedulerConfig {
            gpu_threshold: 0,
            policy: Some(DevicePolicy::Auto),
        };
        let exec = Executor {
            scheduler: Scheduler::with_probe(config, StaticProbe(true)),
            #[cfg(feature = "wgpu")]
            gpu: None,
        };
        let a = Tensor::new(vec![3], vec![1.0, 2.0, 3.0]);
        let mut out = Tensor::zeros(vec![3]);
        assert_eq!(exec.add(&a, &a, &mut out).unwrap(), Device::Cpu);
        assert_eq!(out.data(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn shape_errors_are_not_swallowed() {
        let exec = Executor::cpu_only();
        let a = Tensor::zeros(vec![2, 3]);
        let mut out = Tensor::zeros(vec![2, 2]);
        assert!(matches!(
            exec.matmul(&a, &a, &mut out),
            Err(TensorError::InnerDimMismatch { .. })
        ));
    }

    #[test]
    fn fall_back_only_hides_gpu_errors() {
        assert!(fall_back("add", TensorError::gpu(GpuStage::ReadBack, "lost device")).is_ok());
        assert!(fall_back("add", TensorError::GpuUnavailable).is_ok());
        let shape = TensorError::ShapeMismatch {
            expected: vec![1],
            actual: vec![2],
        };
        assert!(fall_back("add", shape).is_err());
    }

    #[cfg(feature = "wgpu")]
    #[test]
    fn large_work_runs_on_gpu_when_present() {
        let Some(ctx) = super::super::wgpu::test_context() else { return };
        let config = SchedulerConfig {
            gpu_threshold: 0,
            policy: Some(DevicePolicy::Auto),
        };
        let exec = Executor::with_context(Scheduler::with_probe(config, StaticProbe(true)), ctx);
        let a = Tensor::new(vec![4], vec![1.0, 2.0, 3.0, 4.0]);
        let mut out = Tensor::zeros(vec![4]);
        assert_eq!(exec.add(&a, &a, &mut out).unwrap(), Device::Gpu);
        assert_eq!(out.data(), &[2.0, 4.0, 6.0, 8.0]);
    }
}
