pub mod graph;
pub mod stage2;
pub mod video_generator;

pub use graph::{GatConfig, GatConv, VideoEncoder};
pub use stage2::{ResBlock, Stage2Generator, Stage2Output, UpBlock};
pub use video_generator::VideoGenerator;
