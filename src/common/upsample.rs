//! N-d resampling for (N, C, ...) tensors
//!
//! Resizes the trailing spatial dims of a tensor either to a fixed size or by
//! per-axis scale factors. Each axis is handled separately with
//! `index_select`, so the same code covers 1-d, 2-d and 3-d volumes.

use candle_core::{Module, Result, Tensor};
use std::fmt;

/// Interpolation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    Nearest,
    Linear,
    Bilinear,
    Trilinear,
}

impl InterpolationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
            Self::Bilinear => "bilinear",
            Self::Trilinear => "trilinear",
        }
    }

    /// Spatial rank the mode is defined for; nearest works for any rank
    fn spatial_rank(&self) -> Option<usize> {
        match self {
            Self::Nearest => None,
            Self::Linear => Some(1),
            Self::Bilinear => Some(2),
            Self::Trilinear => Some(3),
        }
    }
}

/// Either an explicit output size or scale factors, never both
#[derive(Debug, Clone, PartialEq)]
pub enum ResampleTarget {
    Size(Vec<usize>),
    ScaleFactor(Vec<f64>),
}

#[derive(Debug, Clone)]
pub struct Upsample {
    target: ResampleTarget,
    mode: InterpolationMode,
    align_corners: bool,
}

impl Upsample {
    pub fn new(
        target: ResampleTarget,
        mode: InterpolationMode,
        align_corners: Option<bool>,
    ) -> Result<Self> {
        match &target {
            ResampleTarget::Size(size) => {
                if size.is_empty() || size.contains(&0) {
                    candle_core::bail!("upsample size must be non-empty and positive, got {size:?}")
                }
            }
            ResampleTarget::ScaleFactor(scale) => {
                if scale.is_empty() || scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                    candle_core::bail!(
                        "upsample scale factors must be non-empty and positive, got {scale:?}"
                    )
                }
            }
        }
        if mode == InterpolationMode::Nearest && align_corners.is_some() {
            candle_core::bail!("align_corners only applies to linear interpolation modes")
        }
        Ok(Self {
            target,
            mode,
            align_corners: align_corners.unwrap_or(false),
        })
    }

    /// Nearest-neighbour resampling by the given per-axis factors
    pub fn nearest_scale(scale: &[f64]) -> Result<Self> {
        Self::new(
            ResampleTarget::ScaleFactor(scale.to_vec()),
            InterpolationMode::Nearest,
            None,
        )
    }

    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    pub fn target(&self) -> &ResampleTarget {
        &self.target
    }

    /// Per-axis value taken from a target list, broadcasting single entries
    fn per_axis<T: Copy>(values: &[T], axis: usize, spatial: usize) -> Result<T> {
        match values.len() {
            1 => Ok(values[0]),
            n if n == spatial => Ok(values[axis]),
            n => candle_core::bail!(
                "upsample expects 1 or {spatial} target values for this input, got {n}"
            ),
        }
    }

    /// Output length of one axis plus the source/destination ratio used for indexing
    fn axis_plan(&self, in_len: usize, axis: usize, spatial: usize) -> Result<(usize, f64)> {
        let (out_len, scale) = match &self.target {
            ResampleTarget::Size(size) => {
                let out = Self::per_axis(size, axis, spatial)?;
                (out, in_len as f64 / out as f64)
            }
            ResampleTarget::ScaleFactor(scale) => {
                let s = Self::per_axis(scale, axis, spatial)?;
                ((in_len as f64 * s).floor() as usize, 1.0 / s)
            }
        };
        if out_len == 0 {
            candle_core::bail!("upsample would produce an empty axis from length {in_len}")
        }
        let ratio = if self.align_corners {
            if out_len > 1 {
                (in_len as f64 - 1.0) / (out_len as f64 - 1.0)
            } else {
                0.0
            }
        } else {
            scale
        };
        Ok((out_len, ratio))
    }

    fn resample_nearest(
        x: &Tensor,
        dim: usize,
        in_len: usize,
        out_len: usize,
        ratio: f64,
    ) -> Result<Tensor> {
        let idx: Vec<u32> = (0..out_len)
            .map(|o| ((o as f64 * ratio).floor() as usize).min(in_len - 1) as u32)
            .collect();
        let idx = Tensor::from_vec(idx, out_len, x.device())?;
        x.index_select(&idx, dim)
    }

    fn resample_linear(
        &self,
        x: &Tensor,
        dim: usize,
        in_len: usize,
        out_len: usize,
        ratio: f64,
    ) -> Result<Tensor> {
        let mut lo = Vec::with_capacity(out_len);
        let mut hi = Vec::with_capacity(out_len);
        let mut frac = Vec::with_capacity(out_len);
        for o in 0..out_len {
            let src = if self.align_corners {
                o as f64 * ratio
            } else {
                ((o as f64 + 0.5) * ratio - 0.5).max(0.0)
            };
            let i0 = (src.floor() as usize).min(in_len - 1);
            let i1 = (i0 + 1).min(in_len - 1);
            lo.push(i0 as u32);
            hi.push(i1 as u32);
            frac.push((src - i0 as f64) as f32);
        }

        let device = x.device();
        let a = x.index_select(&Tensor::from_vec(lo, out_len, device)?, dim)?;
        let b = x.index_select(&Tensor::from_vec(hi, out_len, device)?, dim)?;

        // Weight shaped to broadcast along `dim` only.
        let mut w_shape = vec![1usize; x.rank()];
        w_shape[dim] = out_len;
        let w = Tensor::from_vec(frac, out_len, device)?
            .to_dtype(x.dtype())?
            .reshape(w_shape)?;
        a.broadcast_add(&(b - &a)?.broadcast_mul(&w)?)
    }
}

impl Module for Upsample {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let rank = x.rank();
        if rank < 3 {
            candle_core::bail!("upsample expects (N, C, ...) input, got shape {:?}", x.dims())
        }
        let spatial = rank - 2;
        if let Some(expected) = self.mode.spatial_rank()
            && expected != spatial
        {
            candle_core::bail!(
                "{} interpolation expects {} spatial dims, got {}",
                self.mode.name(),
                expected,
                spatial
            )
        }
        if self.mode != InterpolationMode::Nearest && !x.dtype().is_float() {
            candle_core::bail!("linear interpolation requires a float tensor, got {:?}", x.dtype())
        }

        let mut out = x.contiguous()?;
        for axis in 0..spatial {
            let dim = axis + 2;
            let in_len = x.dim(dim)?;
            let (out_len, ratio) = self.axis_plan(in_len, axis, spatial)?;
            // Same length with a non-unit ratio still resamples.
            if out_len == in_len && ratio == 1.0 {
                continue;
            }
            out = match self.mode {
                InterpolationMode::Nearest => {
                    Self::resample_nearest(&out, dim, in_len, out_len, ratio)?
                }
                _ => self.resample_linear(&out, dim, in_len, out_len, ratio)?,
            }
            .contiguous()?;
        }
        Ok(out)
    }
}

impl fmt::Display for Upsample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            ResampleTarget::ScaleFactor(scale) => write!(f, "scale_factor={scale:?}")?,
            ResampleTarget::Size(size) => write!(f, "size={size:?}")?,
        }
        write!(f, ", mode={}", self.mode.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_display_matches_target() -> Result<()> {
        let up = Upsample::nearest_scale(&[1.0, 2.0, 2.0])?;
        assert_eq!(up.to_string(), "scale_factor=[1.0, 2.0, 2.0], mode=nearest");
        let up = Upsample::new(
            ResampleTarget::Size(vec![8, 8]),
            InterpolationMode::Bilinear,
            Some(true),
        )?;
        assert_eq!(up.to_string(), "size=[8, 8], mode=bilinear");
        Ok(())
    }

    #[test]
    fn test_nearest_rejects_align_corners() {
        let up = Upsample::new(
            ResampleTarget::ScaleFactor(vec![2.0]),
            InterpolationMode::Nearest,
            Some(false),
        );
        assert!(up.is_err());
    }

    #[test]
    fn test_wrong_target_length() -> Result<()> {
        let up = Upsample::nearest_scale(&[2.0, 2.0])?;
        let x = Tensor::zeros((1, 1, 2, 2, 2), DType::F32, &Device::Cpu)?;
        assert!(up.forward(&x).is_err());
        Ok(())
    }
}
