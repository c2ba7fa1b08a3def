//! Tensor diagnostics used by the probe binary and tests

use candle_core::{DType, Result, Tensor};

/// Smallest and largest element of a tensor
pub fn value_range(xs: &Tensor) -> Result<(f32, f32)> {
    let flat = xs.flatten_all()?.to_dtype(DType::F32)?;
    let min = flat.min(0)?.to_scalar::<f32>()?;
    let max = flat.max(0)?.to_scalar::<f32>()?;
    Ok((min, max))
}

/// Sample mean and (population) standard deviation over all elements
pub fn mean_std(xs: &Tensor) -> Result<(f64, f64)> {
    let flat = xs.flatten_all()?.to_dtype(DType::F64)?;
    let n = flat.elem_count();
    if n == 0 {
        candle_core::bail!("mean_std of an empty tensor")
    }
    let mean = flat.mean_all()?.to_scalar::<f64>()?;
    let var = flat
        .broadcast_sub(&Tensor::new(mean, flat.device())?)?
        .sqr()?
        .mean_all()?
        .to_scalar::<f64>()?;
    Ok((mean, var.sqrt()))
}
