//! Splash-cursor fluid solver.
//!
//! A stable-fluids pipeline on a 2D grid: every step is a full-screen pass
//! over ping-pong textures, issued through the [`RenderDevice`] trait so the
//! same stepper drives a GPU backend or the CPU reference device.
//!
//! Pointer input injects Gaussian splats of force and dye; the dye field is
//! composited onto the visible surface with premultiplied alpha.

pub mod color;
pub mod compositor;
pub mod config;
pub mod cpu;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod pointer;
pub mod shaders;
pub mod simulation;

pub use compositor::Compositor;
pub use config::{resolution_for, FilteringFallback, SimulationConfig};
pub use device::{
    DrawTarget, FilterMode, PassParams, ProgramId, RenderDevice, ShaderStage, TextureDescriptor,
    TextureFormat, TextureId,
};
pub use error::{ConfigError, FluidError, ShaderError};
pub use framebuffer::{DoubleFramebuffer, FieldFormats, Framebuffer, FramebufferPool};
pub use pointer::{Pointer, PointerId, PointerTracker, Splat};
pub use simulation::{EffectiveSettings, Fields, FluidSimulation, FrameClock, MAX_FRAME_DT};
