//! Configuration structures for the video generators and the graph encoder

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;

/// Width of the per-frame feature emitted by the stage-1 temporal encoder.
pub const TEMPORAL_FEATURE_DIM: usize = 256;

/// How the stage-1 generator turns the audio sequence into per-frame features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalEncoderKind {
    /// Strided 1-D convolution over time (kernel 64, stride 4, padding 30)
    #[default]
    Window,
    /// Single-layer LSTM, frame count preserved
    Recurrent,
}

/// Number of spatial deconvolution stages in the stage-1 generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Five upsampling blocks, 128x128 frames
    #[default]
    Standard,
    /// Six upsampling blocks, 256x256 frames
    High,
}

impl Resolution {
    /// Side length of the frames produced by the generator
    pub fn frame_size(&self) -> usize {
        match self {
            Self::Standard => 128,
            Self::High => 256,
        }
    }

    /// Number of deconv + batch-norm + ReLU blocks before the RGB projection
    pub fn num_blocks(&self) -> usize {
        match self {
            Self::Standard => 5,
            Self::High => 6,
        }
    }
}

/// Stage-1 generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoGeneratorConfig {
    /// Base channel width `d`; the first deconv emits `8 * d` channels
    pub base_width: usize,
    /// Bottleneck dimension of the audio encoder; inputs are `2 * dim_neck` wide
    pub dim_neck: usize,
    pub temporal: TemporalEncoderKind,
    pub resolution: Resolution,
}

impl Default for VideoGeneratorConfig {
    fn default() -> Self {
        Self {
            base_width: 128,
            dim_neck: 32,
            temporal: TemporalEncoderKind::Window,
            resolution: Resolution::Standard,
        }
    }
}

impl VideoGeneratorConfig {
    /// Width of the audio embedding consumed per frame
    pub fn audio_dim(&self) -> usize {
        self.dim_neck * 2
    }

    pub fn with_temporal(mut self, temporal: TemporalEncoderKind) -> Self {
        self.temporal = temporal;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dim_neck == 0 {
            return Err(ConfigError::ZeroDimension("dim_neck"));
        }
        // The narrowest deconv emits d/2 channels, or d/4 for the high-resolution stack.
        let divisor = match self.resolution {
            Resolution::Standard => 2,
            Resolution::High => 4,
        };
        #[allow(clippy::manual_is_multiple_of)]
        if self.base_width == 0 || self.base_width % divisor != 0 {
            return Err(ConfigError::InvalidBaseWidth {
                base_width: self.base_width,
                divisor,
            });
        }
        Ok(())
    }
}

/// Stage-2 refiner configuration
///
/// The embedded stage-1 generator always uses `VideoGeneratorConfig::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage2Config {
    /// Add a nearest-upsampled copy of the stage-1 video to the refined output
    pub residual_video: bool,
    /// Base width of the refiner; the fused feature map has `4 * ngf` channels
    pub ngf: usize,
}

impl Default for Stage2Config {
    fn default() -> Self {
        Self {
            residual_video: false,
            ngf: 32,
        }
    }
}

impl Stage2Config {
    pub fn with_residual_video(mut self, residual_video: bool) -> Self {
        self.residual_video = residual_video;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        #[allow(clippy::manual_is_multiple_of)]
        if self.ngf < 4 || self.ngf % 4 != 0 {
            return Err(ConfigError::InvalidRefinerWidth(self.ngf));
        }
        Ok(())
    }
}

/// Graph encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoderConfig {
    /// Width of the raw node features
    pub in_channels: usize,
    /// Output width of each graph-attention layer
    pub hidden_dim: usize,
    pub num_classes: usize,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            hidden_dim: 152,
            num_classes: 10,
        }
    }
}

impl VideoEncoderConfig {
    pub fn new(in_channels: usize, hidden_dim: usize, num_classes: usize) -> Self {
        Self {
            in_channels,
            hidden_dim,
            num_classes,
        }
    }

    /// Width of the concatenated per-node features `[x0, x1, x2, x3]`
    pub fn feature_dim(&self) -> usize {
        self.in_channels + 3 * self.hidden_dim
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.in_channels == 0 {
            return Err(ConfigError::ZeroDimension("in_channels"));
        }
        if self.hidden_dim == 0 {
            return Err(ConfigError::ZeroDimension("hidden_dim"));
        }
        if self.num_classes == 0 {
            return Err(ConfigError::ZeroDimension("num_classes"));
        }
        Ok(())
    }
}

/// Load a JSON config file; missing fields fall back to their defaults
pub fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::JsonParse {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON config: {path}")]
    JsonParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} must be greater than zero")]
    ZeroDimension(&'static str),
    #[error("Invalid base width: {base_width}. Must be a non-zero multiple of {divisor}")]
    InvalidBaseWidth { base_width: usize, divisor: usize },
    #[error("Invalid refiner width: {0}. Must be a multiple of 4, at least 4")]
    InvalidRefinerWidth(usize),
}

impl From<ConfigError> for candle_core::Error {
    fn from(err: ConfigError) -> Self {
        candle_core::Error::wrap(err)
    }
}
