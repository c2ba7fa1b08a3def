//! Building blocks shared by the generators
//!
//! - **upsample**: nearest / linear resampling of (N, C, ...) tensors
//! - **conv**: bias-free 3x3 Conv2d helper and a Conv2d-backed Conv3d
//! - **init**: closed `LayerKind` set and Gaussian re-initialisation

pub mod conv;
pub mod init;
pub mod upsample;

pub use conv::{Conv3d, conv3d, conv3x3};
pub use init::{LayerKind, normal_init, var_path};
pub use upsample::{InterpolationMode, ResampleTarget, Upsample};
