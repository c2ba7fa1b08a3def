//! Graph-attention node encoder and classifier

pub mod encoder;
pub mod gat;

pub use encoder::VideoEncoder;
pub use gat::{EdgeAttention, GatConfig, GatConv};
