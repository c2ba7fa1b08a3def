//! Candle-Video-Gen: audio-driven video generators and a graph encoder for Candle.
//!
//! - [`VideoGenerator`]: audio embedding sequence -> 128x128 (or 256x256) frames
//! - [`Stage2Generator`]: refines stage-1 output to 512x512 frames
//! - [`VideoEncoder`]: graph-attention classifier over variable-size graphs
//!
//! Parameters are created through a `VarBuilder`; build it from a `VarMap` to
//! train them with any `candle_nn` optimiser.

pub mod common;
pub mod config;
pub mod models;
pub mod utils;

pub use common::{InterpolationMode, LayerKind, ResampleTarget, Upsample};
pub use config::{
    ConfigError, Resolution, Stage2Config, TemporalEncoderKind, VideoEncoderConfig,
    VideoGeneratorConfig,
};
pub use models::*;
