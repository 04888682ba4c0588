//! annof: a small heterogeneous tensor execution core.
//!
//! Dense `f32` tensors, CPU kernels with scalar baselines next to vectorized
//! and cache-blocked versions, a WGPU compute backend, a size-based scheduler
//! that picks between them, and a registry of tensor-set optimization passes.
//!
//! # Modules
//!
//! - [`tensors`]: the [`Tensor`](tensors::Tensor) type and the `tensor!` macro
//! - [`ops`]: CPU and GPU kernels plus the [`Executor`](ops::dispatch::Executor)
//! - [`scheduler`]: CPU-vs-GPU placement
//! - [`backend`]: device names and the process-wide device policy
//! - [`passes`]: optimization passes and their registry
//! - [`approx`]: tolerance helpers for comparing kernel outputs
//! - [`error`]: the shared [`TensorError`](error::TensorError)
//!
//! # Example
//!
//! ```rust
//! use annof::ops::dispatch::Executor;
//! use annof::tensors::Tensor;
//!
//! let exec = Executor::default();
//! let a = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! let b = Tensor::new(vec![3, 1], vec![1.0, 1.0, 1.0]);
//! let mut out = Tensor::zeros(vec![2, 1]);
//! exec.matmul(&a, &b, &mut out).unwrap(); // far below the GPU threshold
//! assert_eq!(out.data(), &[6.0, 15.0]);
//! ```
//!
//! # Logging
//!
//! The crate logs through the `log` facade and installs no logger.

pub mod approx;
pub mod backend;
pub mod error;
pub mod ops;
pub mod passes;
pub mod scheduler;
pub mod tensors;
