use super::LINEAR_GROUP;
use super::context::{GpuContext, to_u32};
use crate::error::TensorResult;
use crate::ops::{FcGradients, check_bias, check_fc, check_fc_grad};
use crate::tensors::Tensor;

/// Fully-connected forward pass on the GPU.
///
/// `input: [batch, in]`, `weights: [in, out]`, `bias: [out]` or `[1, out]`;
/// returns `[batch, out]`.
pub fn fully_connected_forward_gpu(
    ctx: &GpuContext,
    input: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
) -> TensorResult<Tensor> {
    let dims = check_fc(input, weights)?;
    check_bias(bias, dims)?;
    let mut out = Tensor::zeros(vec![dims.batch, dims.output]);

    let shape = dim_params(dims.batch, dims.input, dims.output)?;
    let grid = ctx.grid_1d(out.len(), LINEAR_GROUP)?;

    ctx.scoped("fc_forward", || {
        let params = ctx.uniform("fc_forward dims", shape);
        let x = ctx.upload("fc_forward x", input.data())?;
        let w = ctx.upload("fc_forward w", weights.data())?;
        let b = ctx.upload("fc_forward bias", bias.data())?;
        let y = ctx.output("fc_forward y", out.len())?;

        ctx.launch(
            &ctx.kernels.fc_forward,
            &[&params, &x, &w, &b, &y],
            grid,
            &mut [(&y, out.data_mut())],
        )
    })?;
    Ok(out)
}

fn dim_params(batch: usize, inputs: usize, outputs: usize) -> TensorResult<[u32; 4]> {
    Ok([
        to_u32(batch, "batch")?,
        to_u32(inputs, "inputs")?,
        to_u32(outputs, "outputs")?,
        0,
    ])
}

/// Fully-connected backward pass on the GPU.
///
/// All three gradients come out of a single dispatch; see
/// [`fully_connected_backward_cpu`](crate::ops::cpu::fully_connected_backward_cpu)
/// for the formulas.
pub fn fully_connected_backward_gpu(
    ctx: &GpuContext,
    grad_out: &Tensor,
    input: &Tensor,
    weights: &Tensor,
) -> TensorResult<FcGradients> {
    let dims = check_fc(input, weights)?;
    check_fc_grad(grad_out, dims)?;
    let mut grads = FcGradients {
        input: Tensor::zeros(vec![dims.batch, dims.input]),
        weights: Tensor::zeros(vec![dims.input, dims.output]),
        bias: Tensor::zeros(vec![1, dims.output]),
    };

    let shape = dim_params(dims.batch, dims.input, dims.output)?;
    let ids = grads.weights.len().max(grads.input.len());
    let grid = ctx.grid_1d(ids, LINEAR_GROUP)?;

    let FcGradients {
        input: gi,
        weights: gwt,
        bias: gbt,
    } = &mut grads;
    ctx.scoped("fc_backward", || {
        let params = ctx.uniform("fc_backward dims", shape);
        let g = ctx.upload("fc_backward grad_y", grad_out.data())?;
        let x = ctx.upload("fc_backward x", input.data())?;
        let w = ctx.upload("fc_backward w", weights.data())?;
        let gx = ctx.output("fc_backward grad_x", gi.len())?;
        let gw = ctx.output("fc_backward grad_w", gwt.len())?;
        let gb = ctx.output("fc_backward grad_b", gbt.len())?;

        ctx.launch(
            &ctx.kernels.fc_backward,
            &[&params, &g, &x, &w, &gx, &gw, &gb],
            grid,
            &mut [
                (&gx, gi.data_mut()),
                (&gw, gwt.data_mut()),
                (&gb, gbt.data_mut()),
            ],
        )
    })?;
    Ok(grads)
}
