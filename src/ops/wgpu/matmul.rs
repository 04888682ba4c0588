use super::MATMUL_TILE;
use super::context::{GpuContext, to_u32};
use crate::error::{GpuStage, TensorError, TensorResult};
use crate::ops::check_matmul;
use crate::tensors::Tensor;

/// Tiled matrix multiplication on the GPU: `out = a × b`.
///
/// Each workgroup owns a 16×16 tile of `out` and walks the shared dimension
/// one tile at a time through workgroup memory.
///
/// # Errors
///
/// Shape errors are reported before anything is uploaded. An output too large
/// for one dispatch grid is a [`GpuBackend`](TensorError::GpuBackend) failure.
pub fn matmul_gpu(ctx: &GpuContext, a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<()> {
    let (m, k, n) = check_matmul(a, b, out)?;

    let tile = MATMUL_TILE as usize;
    let grid = (
        to_u32(n.div_ceil(tile), "column tiles")?,
        to_u32(m.div_ceil(tile), "row tiles")?,
        1,
    );
    let max = ctx.max_workgroups();
    if grid.0 > max || grid.1 > max {
        return Err(TensorError::gpu(
            GpuStage::Enqueue,
            format!("{m}x{n} output needs {grid:?} tiles, limit is {max} per dimension"),
        ));
    }

    let params = [to_u32(m, "m")?, to_u32(k, "k")?, to_u32(n, "n")?, 0];

    ctx.scoped("matmul", || {
        let dims = ctx.uniform("matmul dims", params);
        let a_buf = ctx.upload("matmul a", a.data())?;
        let b_buf = ctx.upload("matmul b", b.data())?;
        let out_buf = ctx.output("matmul out", m * n)?;

        ctx.launch(
            &ctx.kernels.matmul,
            &[&dims, &a_buf, &b_buf, &out_buf],
            grid,
            &mut [(&out_buf, out.data_mut())],
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::first_rel_mismatch;
    use crate::ops::cpu::matmul_cpu_baseline;
    use crate::ops::wgpu::test_context;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn small_product() {
        let Some(ctx) = test_context() else { return };
        let a = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::new(vec![2, 2], vec![5.0, 6.0, 7.0, 8.0]);
        let mut out = Tensor::zeros(vec![2, 2]);
        matmul_gpu(&ctx, &a, &b, &mut out).unwrap();
        assert_eq!(out.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn ragged_tiles_match_baseline() {
        let Some(ctx) = test_context() else { return };
        let mut rng = StdRng::seed_from_u64(17);
        for (m, k, n) in [(1, 1, 1), (17, 33, 5), (64, 40, 100), (3, 129, 31)] {
            let a = Tensor::new(
                vec![m, k],
                (0..m * k).map(|_| rng.random_range(-1.0f32..1.0)).collect(),
            );
            let b = Tensor::new(
                vec![k, n],
                (0..k * n).map(|_| rng.random_range(-1.0f32..1.0)).collect(),
            );
            let mut want = Tensor::zeros(vec![m, n]);
            let mut got = Tensor::zeros(vec![m, n]);
            matmul_cpu_baseline(&a, &b, &mut want).unwrap();
            matmul_gpu(&ctx, &a, &b, &mut got).unwrap();
            assert_eq!(
                first_rel_mismatch(got.data(), want.data(), 1e-4),
                None,
                "{m}x{k}x{n}"
            );
        }
    }

    #[test]
    fn inner_dimension_mismatch() {
        let Some(ctx) = test_context() else { return };
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![2, 3]);
        let mut out = Tensor::zeros(vec![2, 3]);
        assert!(matches!(
            matmul_gpu(&ctx, &a, &b, &mut out),
            Err(TensorError::InnerDimMismatch { .. })
        ));
    }
}
