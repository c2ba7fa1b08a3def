//! Stage-2 refiner
//!
//! Re-encodes every stage-1 frame, fuses it with the stage-1 conditioning
//! feature, refines with residual blocks and upsamples across (time, space)
//! with 3-D blocks to 512x512 frames.
//!
//! Variable names mirror the `nn.Sequential` indices of the reference
//! checkpoints (`encoder.0`, `residual.2.block.3`, `upsample1.1`, ...).

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, VarBuilder};
use tracing::{debug, info};

use crate::common::{Conv3d, Upsample, conv3d, conv3x3};
use crate::config::{Stage2Config, TEMPORAL_FEATURE_DIM, VideoGeneratorConfig};
use crate::models::VideoGenerator;

/// Side length of the stage-1 frames the refiner consumes
pub const STAGE1_FRAME_SIZE: usize = 128;
/// Side length of the fused feature map
pub const FEATURE_MAP_SIZE: usize = 32;
/// Side length of the refined frames
pub const STAGE2_FRAME_SIZE: usize = 512;

const NUM_RESIDUAL_BLOCKS: usize = 4;

fn batch_norm(channels: usize, vb: VarBuilder) -> Result<BatchNorm> {
    candle_nn::batch_norm(channels, BatchNormConfig::default(), vb)
}

/// Two 3x3 conv + batch-norm layers with an identity shortcut
#[derive(Debug, Clone)]
pub struct ResBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
}

impl ResBlock {
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("block");
        Ok(Self {
            conv1: conv3x3(channels, channels, 1, vb.pp("0"))?,
            bn1: batch_norm(channels, vb.pp("1"))?,
            conv2: conv3x3(channels, channels, 1, vb.pp("3"))?,
            bn2: batch_norm(channels, vb.pp("4"))?,
        })
    }
}

impl ModuleT for ResBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let h = xs.apply(&self.conv1)?.apply_t(&self.bn1, train)?.relu()?;
        let h = h.apply(&self.conv2)?.apply_t(&self.bn2, train)?;
        (h + xs)?.relu()
    }
}

/// Nearest (1, 2, 2) upsample -> Conv3d -> BatchNorm3d -> ReLU
#[derive(Debug, Clone)]
pub struct UpBlock {
    upsample: Upsample,
    conv: Conv3d,
    bn: BatchNorm,
}

impl UpBlock {
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            upsample: Upsample::nearest_scale(&[1.0, 2.0, 2.0])?,
            conv: conv3d(in_channels, out_channels, vb.pp("1"))?,
            bn: batch_norm(out_channels, vb.pp("2"))?,
        })
    }
}

impl ModuleT for UpBlock {
    /// (B, C, T, H, W) -> (B, C_out, T, 2H, 2W)
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply(&self.upsample)?
            .apply(&self.conv)?
            .apply_t(&self.bn, train)?
            .relu()
    }
}

/// 3 -> ngf -> 2ngf -> 4ngf channels, 128x128 -> 32x32
#[derive(Debug, Clone)]
struct FrameEncoder {
    conv_in: Conv2d,
    down1: Conv2d,
    bn1: BatchNorm,
    down2: Conv2d,
    bn2: BatchNorm,
}

impl FrameEncoder {
    fn new(ngf: usize, vb: VarBuilder) -> Result<Self> {
        let down = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        Ok(Self {
            conv_in: conv3x3(3, ngf, 1, vb.pp("0"))?,
            down1: candle_nn::conv2d_no_bias(ngf, ngf * 2, 4, down, vb.pp("2"))?,
            bn1: batch_norm(ngf * 2, vb.pp("3"))?,
            down2: candle_nn::conv2d_no_bias(ngf * 2, ngf * 4, 4, down, vb.pp("5"))?,
            bn2: batch_norm(ngf * 4, vb.pp("6"))?,
        })
    }
}

impl ModuleT for FrameEncoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply(&self.conv_in)?
            .relu()?
            .apply(&self.down1)?
            .apply_t(&self.bn1, train)?
            .relu()?
            .apply(&self.down2)?
            .apply_t(&self.bn2, train)?
            .relu()
    }
}

/// Output of [`Stage2Generator::forward_t`]
#[derive(Debug, Clone)]
pub enum Stage2Output {
    /// Both stages, for staged supervised training
    Staged { stage1: Tensor, stage2: Tensor },
    /// Refined video only
    Refined(Tensor),
}

impl Stage2Output {
    pub fn stage2(&self) -> &Tensor {
        match self {
            Self::Staged { stage2, .. } => stage2,
            Self::Refined(stage2) => stage2,
        }
    }

    pub fn stage1(&self) -> Option<&Tensor> {
        match self {
            Self::Staged { stage1, .. } => Some(stage1),
            Self::Refined(_) => None,
        }
    }

    pub fn into_refined(self) -> Tensor {
        match self {
            Self::Staged { stage2, .. } => stage2,
            Self::Refined(stage2) => stage2,
        }
    }
}

/// Two-stage generator: stage-1 video plus a 512x512 refinement
#[derive(Debug, Clone)]
pub struct Stage2Generator {
    stage1: VideoGenerator,
    encoder: FrameEncoder,
    hr_joint_conv: Conv2d,
    hr_joint_bn: BatchNorm,
    residual: Vec<ResBlock>,
    upsample: Vec<UpBlock>,
    img: Conv3d,
    residual_upsample: Upsample,
    config: Stage2Config,
}

impl Stage2Generator {
    pub fn new(vb: VarBuilder, config: &Stage2Config) -> Result<Self> {
        config.validate()?;
        let ngf = config.ngf;

        let stage1 = VideoGenerator::new(vb.pp("STAGE1_G"), &VideoGeneratorConfig::default())?;
        let encoder = FrameEncoder::new(ngf, vb.pp("encoder"))?;

        let joint = vb.pp("hr_joint");
        let hr_joint_conv = conv3x3(TEMPORAL_FEATURE_DIM + ngf * 4, ngf * 4, 1, joint.pp("0"))?;
        let hr_joint_bn = batch_norm(ngf * 4, joint.pp("1"))?;

        let residual = (0..NUM_RESIDUAL_BLOCKS)
            .map(|i| ResBlock::new(ngf * 4, vb.pp("residual").pp(i)))
            .collect::<Result<Vec<_>>>()?;

        // 32 -> 64 -> 128 -> 256 -> 512, halving channels each step
        let widths = [ngf * 4, ngf * 2, ngf, ngf / 2, ngf / 4];
        let upsample = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| UpBlock::new(w[0], w[1], vb.pp(format!("upsample{}", i + 1))))
            .collect::<Result<Vec<_>>>()?;

        let img = conv3d(ngf / 4, 3, vb.pp("img").pp("0"))?;
        info!(
            "Stage2Generator: ngf={}, residual_video={}",
            ngf, config.residual_video
        );

        Ok(Self {
            stage1,
            encoder,
            hr_joint_conv,
            hr_joint_bn,
            residual,
            upsample,
            img,
            residual_upsample: Upsample::nearest_scale(&[1.0, 4.0, 4.0])?,
            config: config.clone(),
        })
    }

    pub fn stage1(&self) -> &VideoGenerator {
        &self.stage1
    }

    pub fn config(&self) -> &Stage2Config {
        &self.config
    }

    /// Refine a stage-1 video (B, F, 3, 128, 128) conditioned on its per-frame
    /// feature (B * F, 256, 1, 1). Returns (B, F, 3, 512, 512) before any
    /// residual add.
    pub fn refine(&self, stage1_video: &Tensor, feature: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, num_frames, channels, height, width) = stage1_video.dims5()?;
        if (channels, height, width) != (3, STAGE1_FRAME_SIZE, STAGE1_FRAME_SIZE) {
            candle_core::bail!(
                "stage-2 expects 3x{}x{} stage-1 frames, got {}x{}x{}",
                STAGE1_FRAME_SIZE,
                STAGE1_FRAME_SIZE,
                channels,
                height,
                width
            )
        }
        let n = batch_size * num_frames;

        let frames = stage1_video.reshape((n, 3, STAGE1_FRAME_SIZE, STAGE1_FRAME_SIZE))?;
        let encoded = self.encoder.forward_t(&frames, train)?;

        let c_code = feature
            .reshape((n, TEMPORAL_FEATURE_DIM, 1, 1))?
            .repeat((1, 1, FEATURE_MAP_SIZE, FEATURE_MAP_SIZE))?;
        let h = Tensor::cat(&[&encoded, &c_code], 1)?;
        let mut h = h
            .apply(&self.hr_joint_conv)?
            .apply_t(&self.hr_joint_bn, train)?
            .relu()?;
        for block in &self.residual {
            h = block.forward_t(&h, train)?;
        }
        debug!("stage-2 fused features: {:?}", h.dims());

        // (B*F, C, 32, 32) -> (B, C, F, 32, 32): frames become the depth axis
        let ch = h.dim(1)?;
        let mut h = h
            .reshape((batch_size, num_frames, ch, FEATURE_MAP_SIZE, FEATURE_MAP_SIZE))?
            .transpose(1, 2)?;
        for block in &self.upsample {
            h = block.forward_t(&h, train)?;
        }

        let video = self.img.forward(&h)?.tanh()?;
        let video = video.transpose(1, 2)?.reshape((
            batch_size,
            num_frames,
            3,
            STAGE2_FRAME_SIZE,
            STAGE2_FRAME_SIZE,
        ))?;
        debug!("stage-2 video: {:?}", video.dims());
        Ok(video)
    }

    /// Nearest (1, 4, 4) upsample of a stage-1 video to the stage-2 resolution
    pub fn upsample_stage1(&self, stage1_video: &Tensor) -> Result<Tensor> {
        self.residual_upsample.forward(stage1_video)
    }

    /// Run both stages on an audio embedding sequence.
    ///
    /// `train` selects batch statistics in every batch-norm layer and returns
    /// both stage outputs; otherwise only the refined video is returned. With
    /// `residual_video` the upsampled stage-1 video is added to the refined
    /// one without re-bounding, so values may leave [-1, 1].
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Stage2Output> {
        let (stage1_video, feature) = self.stage1.forward_with_feature(xs, train)?;
        let mut stage2_video = self.refine(&stage1_video, &feature, train)?;

        if self.config.residual_video {
            stage2_video = (self.upsample_stage1(&stage1_video)? + stage2_video)?;
        }

        if train {
            Ok(Stage2Output::Staged {
                stage1: stage1_video,
                stage2: stage2_video,
            })
        } else {
            Ok(Stage2Output::Refined(stage2_video))
        }
    }
}
