pub mod config;
pub mod export;
pub mod node;
pub mod sampler;
pub mod scene;
pub mod volume;
pub mod warp;
