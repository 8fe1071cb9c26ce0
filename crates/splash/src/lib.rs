//! wgpu + winit host for the `fluid` splash-cursor effect.

pub mod app;
pub mod gpu;
