//! Convolution helpers shared by the generators
//!
//! Candle has no native 3-D convolution, so `Conv3d` sums `kt` 2-D
//! convolutions, one per temporal slice of the 5-D weight, over time-shifted
//! frames.

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder, init};

/// 3x3 convolution with padding 1 and no bias
pub fn conv3x3(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<Conv2d> {
    candle_nn::conv2d_no_bias(
        in_channels,
        out_channels,
        3,
        Conv2dConfig {
            padding: 1,
            stride,
            ..Default::default()
        },
        vb,
    )
}

/// 3x3x3 convolution with padding 1 and no bias
pub fn conv3d(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv3d> {
    Conv3d::new(in_channels, out_channels, (3, 3, 3), 1, false, vb)
}

/// 3-D convolution over (B, C, T, H, W) with zero padding and temporal stride 1
#[derive(Debug, Clone)]
pub struct Conv3d {
    weight: Tensor, // (out, in, kt, kh, kw)
    bias: Option<Tensor>,
    kt: usize,
    padding: usize,
}

impl Conv3d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize, usize),
        padding: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (kt, kh, kw) = kernel;
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kt, kh, kw),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = if bias {
            let bound = 1. / ((in_channels * kt * kh * kw) as f64).sqrt();
            Some(vb.get_with_hints(
                out_channels,
                "bias",
                init::Init::Uniform {
                    lo: -bound,
                    up: bound,
                },
            )?)
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            kt,
            padding,
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn pad_time(&self, x: &Tensor) -> Result<Tensor> {
        if self.padding == 0 {
            return Ok(x.clone());
        }
        x.pad_with_zeros(2, self.padding, self.padding)
    }
}

impl Module for Conv3d {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, c, t, _h, _w) = x.dims5()?;
        let x = self.pad_time(x)?;
        let t_pad = t + 2 * self.padding;
        if t_pad < self.kt {
            candle_core::bail!(
                "time dim too small after padding: t_pad={}, needed={}",
                t_pad,
                self.kt
            )
        }
        let t_out = t_pad - self.kt + 1;

        // y[t] = sum_k conv2d(x[t + k], w[:, :, k]); all output frames of a tap go through one call.
        let mut acc: Option<Tensor> = None;
        for ki in 0..self.kt {
            // Taps whose frames all fall in the zero padding contribute nothing.
            if ki + t_out <= self.padding || ki >= self.padding + t {
                continue;
            }
            let frames = x.narrow(2, ki, t_out)?.permute((0, 2, 1, 3, 4))?;
            let (_, _, _, h, w) = frames.dims5()?;
            let frames = frames.reshape((b * t_out, c, h, w))?;
            let kernel = self.weight.i((.., .., ki, .., ..))?.contiguous()?;
            let y = frames.conv2d(&kernel, self.padding, 1, 1, 1)?;
            acc = Some(match acc {
                None => y,
                Some(prev) => (prev + y)?,
            });
        }
        let (out_ch, _, _, kh, kw) = self.weight.dims5()?;
        let (h, w) = (x.dim(3)?, x.dim(4)?);
        let y = match acc {
            Some(y) => y,
            None => Tensor::zeros(
                (b * t_out, out_ch, h + 2 * self.padding + 1 - kh, w + 2 * self.padding + 1 - kw),
                x.dtype(),
                x.device(),
            )?,
        };

        let (_, out_ch, h_out, w_out) = y.dims4()?;
        let y = y
            .reshape((b, t_out, out_ch, h_out, w_out))?
            .permute((0, 2, 1, 3, 4))?
            .contiguous()?;

        match &self.bias {
            Some(bias) => y.broadcast_add(&bias.reshape((1, out_ch, 1, 1, 1))?),
            None => Ok(y),
        }
    }
}
