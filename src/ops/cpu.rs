//! CPU backend tensor operations
//!
//! # CPU Backend
//!
//! Scalar baselines and their optimized counterparts. The baselines exist as
//! numeric references and for timing comparisons; the optimized kernels are
//! what the [`Executor`](super::dispatch::Executor) runs.
//!
//! ## Features
//!
//! - Lane-wise loops over [`FLOAT_LANES`] floats with a scalar remainder
//! - Optional AVX acceleration (enabled via the `simd` feature flag)
//! - Cache-blocked matmul over [`BLOCK`]-sized tiles
//! - Optional parallel row-blocks using [`rayon`](https://docs.rs/rayon) (`parallel` feature)
//!
//! ## Numerics
//!
//! - `add_cpu` is bit-identical to `add_cpu_baseline`: each element is a single addition
//! - `matmul_cpu` currently accumulates each cell in the same `p` order as
//!   `matmul_cpu_baseline`, but the blocked loop order is free to change, so
//!   the two are only promised to agree within a relative tolerance
//!
//! ## Safety
//!
//! - SIMD paths use `unsafe` blocks and are compiled only for AVX-capable targets

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx"))]
use core::arch::x86_64::*;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{check_bias, check_elementwise, check_fc, check_fc_grad, check_matmul, FcGradients};
use crate::error::TensorResult;
use crate::tensors::Tensor;

/// Floats processed per vector step.
pub const FLOAT_LANES: usize = 8;

/// Tile edge used when blocking the `(m, n, k)` index space.
pub const BLOCK: usize = 64;

/// Elementwise `out = a + b` with a plain scalar loop.
pub fn add_cpu_baseline(a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<()> {
    check_elementwise(a, b, out)?;
    let (a, b) = (a.data(), b.data());
    for (i, o) in out.data_mut().iter_mut().enumerate() {
        *o = a[i] + b[i];
    }
    Ok(())
}

/// Elementwise `out = a + b` over [`FLOAT_LANES`]-wide groups plus a scalar tail.
///
/// # Example
/// ```rust
/// use annof::ops::cpu::add_cpu;
/// use annof::tensors::Tensor;
///
/// let a = Tensor::new(vec![3], vec![1.0, 2.0, 3.0]);
/// let b = Tensor::new(vec![3], vec![10.0, 20.0, 30.0]);
/// let mut out = Tensor::zeros(vec![3]);
/// add_cpu(&a, &b, &mut out).unwrap();
/// assert_eq!(out.data(), &[11.0, 22.0, 33.0]);
/// ```
pub fn add_cpu(a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<()> {
    check_elementwise(a, b, out)?;
    let (a, b, out) = (a.data(), b.data(), out.data_mut());
    let split = a.len() - a.len() % FLOAT_LANES;

    add_lanes(&a[..split], &b[..split], &mut out[..split]);
    for i in split..a.len() {
        out[i] = a[i] + b[i];
    }
    Ok(())
}

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx"))]
fn add_lanes(a: &[f32], b: &[f32], out: &mut [f32]) {
    for i in (0..out.len()).step_by(FLOAT_LANES) {
        unsafe {
            let va = _mm256_loadu_ps(a.as_ptr().add(i));
            let vb = _mm256_loadu_ps(b.as_ptr().add(i));
            _mm256_storeu_ps(out.as_mut_ptr().add(i), _mm256_add_ps(va, vb));
        }
    }
}

#[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx")))]
fn add_lanes(a: &[f32], b: &[f32], out: &mut [f32]) {
    for ((o, x), y) in out
        .chunks_exact_mut(FLOAT_LANES)
        .zip(a.chunks_exact(FLOAT_LANES))
        .zip(b.chunks_exact(FLOAT_LANES))
    {
        let mut lane = [0.0f32; FLOAT_LANES];
        for l in 0..FLOAT_LANES {
            lane[l] = x[l] + y[l];
        }
        o.copy_from_slice(&lane);
    }
}

/// Matrix multiplication `out = a × b` (`a: m×k`, `b: k×n`) with the textbook
/// triple loop and one accumulator per output cell.
pub fn matmul_cpu_baseline(a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<()> {
    let (m, k, n) = check_matmul(a, b, out)?;
    let (a, b, c) = (a.data(), b.data(), out.data_mut());

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for l in 0..k {
                sum += a[i * k + l] * b[l * n + j];
            }
            c[i * n + j] = sum;
        }
    }
    Ok(())
}

/// Cache-blocked matrix multiplication `out = a × b`.
///
/// # Optimizations
/// - Output zeroed, then the `(m, n, k)` space is walked in [`BLOCK`]³ tiles
/// - Innermost loop is an `axpy` over a row strip of `out`, vectorized across lanes
/// - With `parallel`, row-blocks are independent and run on the rayon pool
///
/// # Errors
/// Fails before writing anything if the operands are not rank-2, the inner
/// dimensions differ, or `out` is not `[m, n]`.
pub fn matmul_cpu(a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<()> {
    let (_, k, n) = check_matmul(a, b, out)?;
    let (a, b, c) = (a.data(), b.data(), out.data_mut());
    c.fill(0.0);

    #[cfg(feature = "parallel")]
    c.par_chunks_mut(BLOCK * n)
        .enumerate()
        .for_each(|(bi, rows)| matmul_row_block(a, b, rows, bi * BLOCK, k, n));

    #[cfg(not(feature = "parallel"))]
    for (bi, rows) in c.chunks_mut(BLOCK * n).enumerate() {
        matmul_row_block(a, b, rows, bi * BLOCK, k, n);
    }

    Ok(())
}

/// Accumulates rows `row0..row0 + c.len() / n` of the product into `c`.
fn matmul_row_block(a: &[f32], b: &[f32], c: &mut [f32], row0: usize, k: usize, n: usize) {
    let rows = c.len() / n;
    for kk in (0..k).step_by(BLOCK) {
        let k_end = (kk + BLOCK).min(k);
        for jj in (0..n).step_by(BLOCK) {
            let j_end = (jj + BLOCK).min(n);
            for i in 0..rows {
                let a_row = &a[(row0 + i) * k..(row0 + i + 1) * k];
                let c_strip = &mut c[i * n + jj..i * n + j_end];
                for p in kk..k_end {
                    axpy(a_row[p], &b[p * n + jj..p * n + j_end], c_strip);
                }
            }
        }
    }
}

/// `y += alpha * x`
#[inline]
fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    let split = y.len() - y.len() % FLOAT_LANES;
    axpy_lanes(alpha, &x[..split], &mut y[..split]);
    for j in split..y.len() {
        y[j] += alpha * x[j];
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx"))]
#[inline]
fn axpy_lanes(alpha: f32, x: &[f32], y: &mut [f32]) {
    unsafe {
        let va = _mm256_set1_ps(alpha);
        for j in (0..y.len()).step_by(FLOAT_LANES) {
            let vx = _mm256_loadu_ps(x.as_ptr().add(j));
            let vy = _mm256_loadu_ps(y.as_ptr().add(j));
            _mm256_storeu_ps(y.as_mut_ptr().add(j), _mm256_add_ps(vy, _mm256_mul_ps(va, vx)));
        }
    }
}

#[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx")))]
#[inline]
fn axpy_lanes(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (ys, xs) in y
        .chunks_exact_mut(FLOAT_LANES)
        .zip(x.chunks_exact(FLOAT_LANES))
    {
        for l in 0..FLOAT_LANES {
            ys[l] += alpha * xs[l];
        }
    }
}

/// Fully-connected forward pass: `input × weights + bias`, bias broadcast over
/// the batch rows.
///
/// Shapes: `input: [batch, in]`, `weights: [in, out]`, `bias: [out]` or
/// `[1, out]`; returns `[batch, out]`.
pub fn fully_connected_forward_cpu(
    input: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
) -> TensorResult<Tensor> {
    let dims = check_fc(input, weights)?;
    check_bias(bias, dims)?;

    let mut out = Tensor::zeros(vec![dims.batch, dims.output]);
    matmul_cpu(input, weights, &mut out)?;

    let bias = bias.data();
    for row in out.data_mut().chunks_exact_mut(dims.output) {
        let split = row.len() - row.len() % FLOAT_LANES;
        add_in_place(&mut row[..split], &bias[..split]);
        for j in split..row.len() {
            row[j] += bias[j];
        }
    }
    Ok(out)
}

fn add_in_place(y: &mut [f32], x: &[f32]) {
    for (ys, xs) in y
        .chunks_exact_mut(FLOAT_LANES)
        .zip(x.chunks_exact(FLOAT_LANES))
    {
        for l in 0..FLOAT_LANES {
            ys[l] += xs[l];
        }
    }
}

/// Fully-connected backward pass.
///
/// - `input' = grad_out × weightsᵀ`
/// - `weights' = inputᵀ × grad_out`
/// - `bias' = Σ_batch grad_out`
pub fn fully_connected_backward_cpu(
    grad_out: &Tensor,
    input: &Tensor,
    weights: &Tensor,
) -> TensorResult<FcGradients> {
    let dims = check_fc(input, weights)?;
    check_fc_grad(grad_out, dims)?;
    let (batch, inf, outf) = (dims.batch, dims.input, dims.output);
    let (g, x, w) = (grad_out.data(), input.data(), weights.data());

    let mut input_grad = vec![0.0f32; batch * inf];
    for b in 0..batch {
        let g_row = &g[b * outf..(b + 1) * outf];
        for i in 0..inf {
            let w_row = &w[i * outf..(i + 1) * outf];
            input_grad[b * inf + i] = g_row.iter().zip(w_row).map(|(&gv, &wv)| gv * wv).sum();
        }
    }

    let mut weight_grad = vec![0.0f32; inf * outf];
    let mut bias_grad = vec![0.0f32; outf];
    for b in 0..batch {
        let g_row = &g[b * outf..(b + 1) * outf];
        for i in 0..inf {
            axpy(x[b * inf + i], g_row, &mut weight_grad[i * outf..(i + 1) * outf]);
        }
        add_in_place_tail(&mut bias_grad, g_row);
    }

    Ok(FcGradients {
        input: Tensor::new(vec![batch, inf], input_grad),
        weights: Tensor::new(vec![inf, outf], weight_grad),
        bias: Tensor::new(vec![1, outf], bias_grad),
    })
}

fn add_in_place_tail(y: &mut [f32], x: &[f32]) {
    let split = y.len() - y.len() % FLOAT_LANES;
    add_in_place(&mut y[..split], &x[..split]);
    for j in split..y.len() {
        y[j] += x[j];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::{first_abs_mismatch, first_rel_mismatch};
    use crate::error::TensorError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_tensor(rng: &mut StdRng, shape: Vec<usize>) -> Tensor {
        let len = shape.iter().product();
        let data = (0..len).map(|_| rng.random_range(-1.0f32..1.0)).collect();
        Tensor::new(shape, data)
    }

    #[test]
    fn add_matches_baseline_for_random_shapes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let rank = rng.random_range(1..=3);
            let shape: Vec<usize> = (0..rank).map(|_| rng.random_range(1..=37)).collect();
            let a = random_tensor(&mut rng, shape.clone());
            let b = random_tensor(&mut rng, shape.clone());
            let mut fast = Tensor::zeros(shape.clone());
            let mut slow = Tensor::zeros(shape);
            add_cpu(&a, &b, &mut fast).unwrap();
            add_cpu_baseline(&a, &b, &mut slow).unwrap();
            assert_eq!(first_abs_mismatch(fast.data(), slow.data(), 1e-6), None);
        }
    }

    #[test]
    fn add_handles_lengths_below_one_lane() {
        let a = Tensor::new(vec![3], vec![1.0, 2.0, 3.0]);
        let mut out = Tensor::zeros(vec![3]);
        add_cpu(&a, &a, &mut out).unwrap();
        assert_eq!(out.data(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn add_rejects_mismatch_without_writing() {
        let a = Tensor::new(vec![4], vec![1.0; 4]);
        let b = Tensor::new(vec![2, 2], vec![1.0; 4]);
        let mut out = Tensor::new(vec![4], vec![-1.0; 4]);
        assert!(matches!(
            add_cpu(&a, &b, &mut out),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(out.data().iter().all(|&x| x == -1.0));
    }

    #[test]
    fn matmul_known_values() {
        let a = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Tensor::new(vec![3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let expected = [58.0, 64.0, 139.0, 154.0];

        let mut out = Tensor::zeros(vec![2, 2]);
        matmul_cpu(&a, &b, &mut out).unwrap();
        assert_eq!(out.data(), &expected);

        matmul_cpu_baseline(&a, &b, &mut out).unwrap();
        assert_eq!(out.data(), &expected);
    }

    #[test]
    fn matmul_overwrites_stale_output() {
        let a = Tensor::new(vec![1, 1], vec![2.0]);
        let b = Tensor::new(vec![1, 1], vec![3.0]);
        let mut out = Tensor::new(vec![1, 1], vec![100.0]);
        matmul_cpu(&a, &b, &mut out).unwrap();
        assert_eq!(out[0], 6.0);
    }

    #[test]
    fn blocked_matmul_matches_baseline_on_block_edges() {
        let dims = [1usize, 8, 9, 64, 65];
        let mut rng = StdRng::seed_from_u64(42);
        for &m in &dims {
            for &k in &dims {
                for &n in &dims {
                    let a = random_tensor(&mut rng, vec![m, k]);
                    let b = random_tensor(&mut rng, vec![k, n]);
                    let mut fast = Tensor::zeros(vec![m, n]);
                    let mut slow = Tensor::zeros(vec![m, n]);
                    matmul_cpu(&a, &b, &mut fast).unwrap();
                    matmul_cpu_baseline(&a, &b, &mut slow).unwrap();
                    assert_eq!(
                        first_rel_mismatch(fast.data(), slow.data(), 1e-5),
                        None,
                        "m={m} k={k} n={n}"
                    );
                }
            }
        }
    }

    #[test]
    fn matmul_rejects_inner_dimension_mismatch() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![4, 2]);
        let mut out = Tensor::zeros(vec![2, 2]);
        assert!(matches!(
            matmul_cpu(&a, &b, &mut out),
            Err(TensorError::InnerDimMismatch { .. })
        ));
    }

    #[test]
    fn fully_connected_forward_adds_bias_per_row() {
        let input = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let weights = Tensor::new(vec![2, 3], vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
        let bias = Tensor::new(vec![1, 3], vec![0.5, -0.5, 0.0]);
        let out = fully_connected_forward_cpu(&input, &weights, &bias).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.data(), &[1.5, 1.5, 3.0, 3.5, 3.5, 7.0]);
    }

    #[test]
    fn fully_connected_backward_matches_hand_computation() {
        let input = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let weights = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let grad = Tensor::new(vec![2, 3], vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        let g = fully_connected_backward_cpu(&grad, &input, &weights).unwrap();

        // grad × Wᵀ
        assert_eq!(g.input.data(), &[4.0, 10.0, 2.0, 5.0]);
        // Xᵀ × grad
        assert_eq!(g.weights.data(), &[1.0, 3.0, 1.0, 2.0, 4.0, 2.0]);
        assert_eq!(g.bias.shape(), &[1, 3]);
        assert_eq!(g.bias.data(), &[1.0, 1.0, 1.0]);
    }
}
