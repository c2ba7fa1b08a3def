//! Stage-1 audio-to-video generator
//!
//! Audio embeddings (B, F, 2 * dim_neck) are encoded along time into one
//! 256-wide feature per output frame, then each feature is decoded from a 1x1
//! map to an RGB frame by a DCGAN-style stack of transposed convolutions.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv1d, Conv1dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    LSTM, LSTMConfig, RNN, VarBuilder, VarMap,
};
use tracing::{debug, info};

use crate::common::{LayerKind, normal_init, var_path};
use crate::config::{TEMPORAL_FEATURE_DIM, TemporalEncoderKind, VideoGeneratorConfig};

const WINDOW_KERNEL: usize = 64;
const WINDOW_STRIDE: usize = 4;
const WINDOW_PADDING: usize = 30;

/// Temporal encoder, fixed at construction
#[derive(Debug, Clone)]
enum TemporalEncoder {
    /// Conv1d over the channel-major sequence
    Window(Conv1d),
    Recurrent(LSTM),
}

impl TemporalEncoder {
    fn new(kind: TemporalEncoderKind, audio_dim: usize, vb: &VarBuilder) -> Result<Self> {
        match kind {
            TemporalEncoderKind::Window => {
                let conv = candle_nn::conv1d(
                    audio_dim,
                    TEMPORAL_FEATURE_DIM,
                    WINDOW_KERNEL,
                    Conv1dConfig {
                        padding: WINDOW_PADDING,
                        stride: WINDOW_STRIDE,
                        ..Default::default()
                    },
                    vb.pp("window"),
                )?;
                Ok(Self::Window(conv))
            }
            TemporalEncoderKind::Recurrent => {
                let lstm = candle_nn::lstm(
                    audio_dim,
                    TEMPORAL_FEATURE_DIM,
                    LSTMConfig::default(),
                    vb.pp("lstm"),
                )?;
                Ok(Self::Recurrent(lstm))
            }
        }
    }

    fn layer(&self) -> (&'static str, LayerKind) {
        match self {
            Self::Window(_) => ("window", LayerKind::Conv1d),
            Self::Recurrent(_) => ("lstm", LayerKind::Lstm),
        }
    }

    /// (B, F, audio_dim) -> (B, F', 256)
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Window(conv) => xs.transpose(1, 2)?.apply(conv)?.transpose(1, 2),
            Self::Recurrent(lstm) => {
                let states = lstm.seq(xs)?;
                lstm.states_to_tensor(&states)
            }
        }
    }
}

/// ConvTranspose2d -> BatchNorm2d -> ReLU
#[derive(Debug, Clone)]
struct DeconvBlock {
    name: String,
    conv: ConvTranspose2d,
    bn: BatchNorm,
}

impl DeconvBlock {
    fn new(
        in_channels: usize,
        out_channels: usize,
        cfg: ConvTranspose2dConfig,
        name: String,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let conv = candle_nn::conv_transpose2d(in_channels, out_channels, 4, cfg, vb.pp(&name))?;
        let bn = candle_nn::batch_norm(
            out_channels,
            BatchNormConfig::default(),
            vb.pp(format!("{name}_bn")),
        )?;
        Ok(Self { name, conv, bn })
    }
}

impl ModuleT for DeconvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply(&self.conv)?.apply_t(&self.bn, train)?.relu()
    }
}

fn upsample_cfg() -> ConvTranspose2dConfig {
    ConvTranspose2dConfig {
        padding: 1,
        stride: 2,
        ..Default::default()
    }
}

/// Stage-1 generator: audio embedding sequence -> low-resolution video
#[derive(Debug, Clone)]
pub struct VideoGenerator {
    temporal: TemporalEncoder,
    blocks: Vec<DeconvBlock>,
    deconv7: ConvTranspose2d,
    config: VideoGeneratorConfig,
    prefix: String,
}

impl VideoGenerator {
    pub fn new(vb: VarBuilder, config: &VideoGeneratorConfig) -> Result<Self> {
        config.validate()?;
        let d = config.base_width;
        let temporal = TemporalEncoder::new(config.temporal, config.audio_dim(), &vb)?;

        // 1x1 -> 4x4, then every block doubles the side length.
        let mut widths = vec![8 * d, 4 * d, 2 * d, d, d / 2];
        if config.resolution.num_blocks() == 6 {
            widths.push(d / 4);
        }

        let mut blocks = Vec::with_capacity(widths.len());
        let mut in_channels = TEMPORAL_FEATURE_DIM;
        for (i, &out_channels) in widths.iter().enumerate() {
            let cfg = if i == 0 {
                ConvTranspose2dConfig::default()
            } else {
                upsample_cfg()
            };
            blocks.push(DeconvBlock::new(
                in_channels,
                out_channels,
                cfg,
                format!("deconv{}", i + 1),
                &vb,
            )?);
            in_channels = out_channels;
        }
        let deconv7 =
            candle_nn::conv_transpose2d(in_channels, 3, 4, upsample_cfg(), vb.pp("deconv7"))?;

        info!(
            "VideoGenerator: {:?} encoder, {} deconv blocks, {}x{} frames",
            config.temporal,
            blocks.len(),
            config.resolution.frame_size(),
            config.resolution.frame_size()
        );

        Ok(Self {
            temporal,
            blocks,
            deconv7,
            config: config.clone(),
            prefix: vb.prefix(),
        })
    }

    pub fn config(&self) -> &VideoGeneratorConfig {
        &self.config
    }

    /// Frames produced for an audio sequence of `num_frames` steps
    pub fn output_frames(&self, num_frames: usize) -> Option<usize> {
        match self.config.temporal {
            TemporalEncoderKind::Recurrent => Some(num_frames),
            TemporalEncoderKind::Window => (num_frames + 2 * WINDOW_PADDING)
                .checked_sub(WINDOW_KERNEL)
                .map(|n| n / WINDOW_STRIDE + 1),
        }
    }

    /// Direct submodules in declaration order, with the kind used by `weight_init`
    pub fn layers(&self) -> Vec<(String, LayerKind)> {
        let (name, kind) = self.temporal.layer();
        let mut layers = vec![(name.to_string(), kind)];
        for block in &self.blocks {
            layers.push((block.name.clone(), LayerKind::ConvTranspose2d));
            layers.push((format!("{}_bn", block.name), LayerKind::BatchNorm));
        }
        layers.push(("deconv7".to_string(), LayerKind::ConvTranspose2d));
        layers
    }

    /// Re-draw every 2-D (transposed) convolution weight from N(mean, std) and
    /// zero its bias. The temporal window, LSTM and batch-norm layers keep their
    /// current values. Returns the number of layers re-initialised.
    pub fn weight_init(&self, varmap: &VarMap, mean: f64, std: f64) -> Result<usize> {
        let mut count = 0;
        for (name, kind) in self.layers() {
            if normal_init(varmap, &var_path(&self.prefix, &name), kind, mean, std)? {
                count += 1;
            }
        }
        info!(
            "VideoGenerator weight_init: {} layers drawn from N({}, {})",
            count, mean, std
        );
        Ok(count)
    }

    /// Returns the video (B, F', 3, S, S) and the per-frame conditioning
    /// feature (B * F', 256, 1, 1).
    pub fn forward_with_feature(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (_, num_steps, audio_dim) = xs.dims3()?;
        if audio_dim != self.config.audio_dim() {
            candle_core::bail!(
                "audio embedding width must be {}, got {}",
                self.config.audio_dim(),
                audio_dim
            )
        }
        if self.output_frames(num_steps).is_none_or(|frames| frames == 0) {
            candle_core::bail!("audio sequence of {} steps yields no video frames", num_steps)
        }

        let encoded = self.temporal.forward(xs)?;
        let (batch_size, num_frames, feat_dim) = encoded.dims3()?;
        debug!("temporal encoder: {:?} -> {:?}", xs.dims(), encoded.dims());

        let feature = encoded.reshape((batch_size * num_frames, feat_dim, 1, 1))?;
        let mut x = feature.clone();
        for block in &self.blocks {
            x = block.forward_t(&x, train)?;
        }
        let x = self.deconv7.forward(&x)?.tanh()?;

        let (_, channels, height, width) = x.dims4()?;
        let video = x.reshape((batch_size, num_frames, channels, height, width))?;
        debug!("stage-1 video: {:?}", video.dims());
        Ok((video, feature))
    }
}

impl ModuleT for VideoGenerator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.forward_with_feature(xs, train)?.0)
    }
}
