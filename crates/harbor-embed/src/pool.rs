use anyhow::{ensure, Result};
use candle_core::{DType, Tensor, D};

/// Masked mean over the token axis, then L2 normalisation: `[B,T,H] -> [B,H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, width) = hidden.dims3()?;
    ensure!(attention_mask.dims() == [batch, tokens], "mask shape {:?} does not match [{batch}, {tokens}]", attention_mask.dims());

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(D::Minus1)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1.0, f64::MAX)?;
    let mean = summed.broadcast_div(&counts)?;

    let eps = if hidden.dtype() == DType::F16 { 1e-6 } else { 1e-12 };
    let norm = (mean.sqr()?.sum_keepdim(D::Minus1)?.sqrt()? + eps)?;
    let pooled = mean.broadcast_div(&norm)?;
    ensure!(pooled.dims() == [batch, width], "pooled shape mismatch: {:?}", pooled.dims());
    Ok(pooled)
}
