use super::LINEAR_GROUP;
use super::context::{GpuContext, to_u32};
use crate::error::TensorResult;
use crate::ops::check_elementwise;
use crate::tensors::Tensor;

/// Elementwise `out = a + b` on the GPU.
///
/// # Errors
///
/// - [`ShapeMismatch`](crate::error::TensorError::ShapeMismatch) if the three shapes differ
/// - [`GpuBackend`](crate::error::TensorError::GpuBackend) if the device rejects the work
///
/// On error `out` is left as it was.
pub fn add_gpu(ctx: &GpuContext, a: &Tensor, b: &Tensor, out: &mut Tensor) -> TensorResult<()> {
    check_elementwise(a, b, out)?;
    let len = a.len();

    let len_param = to_u32(len, "len")?;
    let grid = ctx.grid_1d(len, LINEAR_GROUP)?;

    ctx.scoped("add", || {
        let params = ctx.uniform("add params", [len_param, 0, 0, 0]);
        let a_buf = ctx.upload("add a", a.data())?;
        let b_buf = ctx.upload("add b", b.data())?;
        let out_buf = ctx.output("add out", len)?;

        ctx.launch(
            &ctx.kernels.add,
            &[&params, &a_buf, &b_buf, &out_buf],
            grid,
            &mut [(&out_buf, out.data_mut())],
        )
    })
}
