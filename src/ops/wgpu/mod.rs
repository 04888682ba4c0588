//! GPU-accelerated tensor operations using WGPU.
//!
//! Kernels are written in WGSL and compiled once per [`GpuContext`]. Every op
//! uploads its inputs, dispatches one compute pass, and blocks until the
//! result has been copied back into a host tensor.
//!
//! - [`add_gpu`] elementwise addition
//! - [`matmul_gpu`] tiled matrix multiplication
//! - [`fully_connected_forward_gpu`] / [`fully_connected_backward_gpu`] dense layer
//!
//! Errors from the device are reported as [`TensorError::GpuBackend`] so that
//! the [`Executor`](crate::ops::dispatch::Executor) can retry on the CPU.
//!
//! [`TensorError::GpuBackend`]: crate::error::TensorError::GpuBackend

mod context;
mod dense;
mod elementwise;
mod matmul;

pub use context::{GpuContext, gpu_available};
pub use dense::{fully_connected_backward_gpu, fully_connected_forward_gpu};
pub use elementwise::add_gpu;
pub use matmul::matmul_gpu;

const ADD: &str = include_str!("shaders/add.wgsl");
const MATMUL: &str = include_str!("shaders/matmul.wgsl");
const FC_FORWARD: &str = include_str!("shaders/fc_forward.wgsl");
const FC_BACKWARD: &str = include_str!("shaders/fc_backward.wgsl");

/// Invocations per workgroup for the 1-D kernels.
const LINEAR_GROUP: u32 = 64;

/// Edge of the square output tile computed by one matmul workgroup.
const MATMUL_TILE: u32 = 16;

/// Shared by the GPU op tests: a context, or `None` on machines without a GPU.
#[cfg(test)]
pub(crate) fn test_context() -> Option<GpuContext> {
    match GpuContext::new() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}
