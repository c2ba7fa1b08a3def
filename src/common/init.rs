//! Selective Gaussian re-initialisation of layer parameters
//!
//! Models list their direct submodules as `(name, LayerKind)` pairs; only the
//! 2-D convolution family is re-drawn, everything else keeps its
//! construction-time initialisation.

use candle_core::{Result, Tensor};
use candle_nn::VarMap;
use tracing::debug;

/// Closed set of layer types a model can report for initialisation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    ConvTranspose2d,
    Conv2d,
    Conv1d,
    BatchNorm,
    Lstm,
}

impl LayerKind {
    /// Whether `normal_init` touches this kind of layer
    pub fn is_gaussian_initialized(&self) -> bool {
        matches!(self, Self::ConvTranspose2d | Self::Conv2d)
    }
}

/// Join a VarBuilder prefix and a child name the way `VarBuilder::pp` does
pub fn var_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Draw `<path>.weight` from N(mean, std) and zero `<path>.bias`.
///
/// Returns `false` without touching anything when `kind` is not part of the
/// convolution family.
pub fn normal_init(
    varmap: &VarMap,
    path: &str,
    kind: LayerKind,
    mean: f64,
    std: f64,
) -> Result<bool> {
    if !kind.is_gaussian_initialized() {
        return Ok(false);
    }

    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::msg("VarMap lock poisoned"))?;

    let weight_name = var_path(path, "weight");
    let Some(weight) = data.get(&weight_name) else {
        candle_core::bail!("no variable named {weight_name} in the VarMap")
    };
    let sample =
        Tensor::randn(mean, std, weight.shape(), weight.device())?.to_dtype(weight.dtype())?;
    weight.set(&sample)?;

    if let Some(bias) = data.get(&var_path(path, "bias")) {
        bias.set(&bias.zeros_like()?)?;
    }

    debug!("normal_init {} ({:?}) mean={} std={}", path, kind, mean, std);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    #[test]
    fn test_var_path() {
        assert_eq!(var_path("", "deconv1"), "deconv1");
        assert_eq!(var_path("STAGE1_G", "deconv1"), "STAGE1_G.deconv1");
    }

    #[test]
    fn test_batch_norm_is_skipped() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _bn = candle_nn::batch_norm(4, candle_nn::BatchNormConfig::default(), vb.pp("bn"))?;
        assert!(!normal_init(&varmap, "bn", LayerKind::BatchNorm, 0.0, 0.02)?);
        Ok(())
    }

    #[test]
    fn test_missing_weight_is_an_error() {
        let varmap = VarMap::new();
        assert!(normal_init(&varmap, "deconv1", LayerKind::ConvTranspose2d, 0.0, 0.02).is_err());
    }
}
