//! # Operation Dispatch Layer
//!
//! This module defines tensor operations across the compute backends and the
//! layer that routes between them.
//!
//! ## Submodules
//!
//! - [`cpu`]: scalar baselines plus lane-vectorized and cache-blocked kernels
//! - [`wgpu`] *(feature `wgpu`, on by default)*: compute shaders dispatched through `wgpu`
//! - [`dispatch`]: the [`Executor`](dispatch::Executor), which asks the
//!   scheduler for a device and falls back to the CPU when the GPU fails
//!
//! ## Calling Convention
//!
//! Every entry point takes its inputs by reference and writes into a
//! pre-allocated, correctly shaped output tensor. Shapes are checked here, in
//! a backend-agnostic location, before any backend touches the output.
//!
//! ```rust
//! use annof::ops::cpu::{add_cpu, matmul_cpu};
//! use annof::tensors::Tensor;
//!
//! let a = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
//! let b = Tensor::new(vec![2, 2], vec![5.0, 6.0, 7.0, 8.0]);
//! let mut sum = Tensor::zeros(vec![2, 2]);
//! add_cpu(&a, &b, &mut sum).unwrap();
//! let mut prod = Tensor::zeros(vec![2, 2]);
//! matmul_cpu(&a, &b, &mut prod).unwrap();
//! assert_eq!(prod.data(), &[19.0, 22.0, 43.0, 50.0]);
//! ```
//!
//! ## Feature Flags
//!
//! - `simd`: AVX intrinsics in the CPU lane loops (requires `target_feature = "avx"`)
//! - `parallel`: rayon over independent matmul row-blocks
//! - `wgpu`: GPU backend

pub mod cpu;
pub mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use crate::error::{TensorError, TensorResult};
use crate::tensors::Tensor;

/// Gradients produced by a fully-connected backward step.
#[derive(Debug, Clone, PartialEq)]
pub struct FcGradients {
    /// `[batch, in]`
    pub input: Tensor,
    /// `[in, out]`
    pub weights: Tensor,
    /// `[1, out]`, reduced over the batch.
    pub bias: Tensor,
}

/// Dimensions of a fully-connected layer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FcDims {
    pub batch: usize,
    pub input: usize,
    pub output: usize,
}

pub(crate) fn check_elementwise(a: &Tensor, b: &Tensor, out: &Tensor) -> TensorResult<()> {
    a.expect_same_shape(b)?;
    a.expect_same_shape(out)
}

/// Returns `(m, k, n)` for `a: [m, k] × b: [k, n] → out: [m, n]`.
pub(crate) fn check_matmul(
    a: &Tensor,
    b: &Tensor,
    out: &Tensor,
) -> TensorResult<(usize, usize, usize)> {
    let (m, k) = a.matrix_dims()?;
    let (k2, n) = b.matrix_dims()?;
    if k != k2 {
        return Err(TensorError::InnerDimMismatch {
            lhs: a.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    }
    if out.shape() != [m, n] {
        return Err(TensorError::ShapeMismatch {
            expected: vec![m, n],
            actual: out.shape().to_vec(),
        });
    }
    Ok((m, k, n))
}

/// Validates `input: [batch, in]` against `weights: [in, out]`.
pub(crate) fn check_fc(input: &Tensor, weights: &Tensor) -> TensorResult<FcDims> {
    let (batch, in_features) = input.matrix_dims()?;
    let (w_in, output) = weights.matrix_dims()?;
    if in_features != w_in {
        return Err(TensorError::InnerDimMismatch {
            lhs: input.shape().to_vec(),
            rhs: weights.shape().to_vec(),
        });
    }
    Ok(FcDims {
        batch,
        input: in_features,
        output,
    })
}

/// Bias must hold exactly `out` elements (`[out]` or `[1, out]`).
pub(crate) fn check_bias(bias: &Tensor, dims: FcDims) -> TensorResult<()> {
    if bias.len() != dims.output {
        return Err(TensorError::ShapeMismatch {
            expected: vec![1, dims.output],
            actual: bias.shape().to_vec(),
        });
    }
    Ok(())
}

/// Output gradient must be `[batch, out]`.
pub(crate) fn check_fc_grad(grad_out: &Tensor, dims: FcDims) -> TensorResult<()> {
    if grad_out.shape() != [dims.batch, dims.output] {
        return Err(TensorError::ShapeMismatch {
            expected: vec![dims.batch, dims.output],
            actual: grad_out.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_check_reports_inner_dimension() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![4, 2]);
        let out = Tensor::zeros(vec![2, 2]);
        assert!(matches!(
            check_matmul(&a, &b, &out),
            Err(TensorError::InnerDimMismatch { .. })
        ));
    }

    #[test]
    fn matmul_check_reports_output_shape() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![3, 4]);
        let out = Tensor::zeros(vec![4, 2]);
        assert!(matches!(
            check_matmul(&a, &b, &out),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert_eq!(check_matmul(&a, &b, &Tensor::zeros(vec![2, 4])).unwrap(), (2, 3, 4));
    }

    #[test]
    fn fc_checks_accept_flat_or_row_bias() {
        let input = Tensor::zeros(vec![5, 3]);
        let weights = Tensor::zeros(vec![3, 2]);
        let dims = check_fc(&input, &weights).unwrap();
        assert_eq!(dims, FcDims { batch: 5, input: 3, output: 2 });
        assert!(check_bias(&Tensor::zeros(vec![2]), dims).is_ok());
        assert!(check_bias(&Tensor::zeros(vec![1, 2]), dims).is_ok());
        assert!(check_bias(&Tensor::zeros(vec![3]), dims).is_err());
    }
}
