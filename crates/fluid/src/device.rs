//! Render-device abstraction.
//!
//! Every simulation pass is a full-screen draw that samples up to two field
//! textures and writes one target. `RenderDevice` is the minimal surface the
//! stepper needs from a backend: capability probes, texture allocation,
//! shader compile/link, program binding and draws.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use crate::error::{FluidError, ShaderError};
use crate::shaders::{BindingInfo, ShaderKind};

/// Renderable field formats, ordered from narrowest to widest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R16Float,
    Rg16Float,
    Rgba16Float,
    /// Unsigned 8-bit fallback; values are clamped to [0, 1].
    Rgba8Unorm,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R16Float => 1,
            TextureFormat::Rg16Float => 2,
            TextureFormat::Rgba16Float | TextureFormat::Rgba8Unorm => 4,
        }
    }

    /// Next wider format to try when this one is not renderable.
    pub fn fallback(self) -> Option<TextureFormat> {
        match self {
            TextureFormat::R16Float => Some(TextureFormat::Rg16Float),
            TextureFormat::Rg16Float => Some(TextureFormat::Rgba16Float),
            TextureFormat::Rgba16Float => Some(TextureFormat::Rgba8Unorm),
            TextureFormat::Rgba8Unorm => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
}

/// Where a draw lands: an offscreen field texture or the visible surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrawTarget {
    Texture(TextureId),
    Screen,
}

/// A texture bound to a reflected binding slot for one draw.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub binding: u32,
    pub texture: TextureId,
}

/// Source handed to `RenderDevice::compile_shader`, `#define` lines included.
#[derive(Clone, Debug)]
pub struct ShaderSource<'a> {
    pub kind: ShaderKind,
    pub stage: ShaderStage,
    pub text: &'a str,
}

/// Result of linking: the program handle plus its reflected bindings.
#[derive(Clone, Debug)]
pub struct LinkedProgram {
    pub id: ProgramId,
    pub bindings: Vec<BindingInfo>,
}

/// Uniform block shared by every pass. Layout matches `Params` in
/// `shaders/common.wgsl` (64 bytes, std140-compatible).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassParams {
    pub texel_size: [f32; 2],
    pub dye_texel_size: [f32; 2],
    pub point: [f32; 2],
    pub aspect_ratio: f32,
    pub radius: f32,
    pub color: [f32; 4],
    pub dt: f32,
    pub dissipation: f32,
    pub curl: f32,
    pub value: f32,
}

impl PassParams {
    pub fn with_texel_size(texel_size: Vec2) -> Self {
        Self {
            texel_size: texel_size.to_array(),
            ..Default::default()
        }
    }

    pub fn texel_size(&self) -> Vec2 {
        Vec2::from_array(self.texel_size)
    }

    pub fn dye_texel_size(&self) -> Vec2 {
        Vec2::from_array(self.dye_texel_size)
    }

    pub fn point(&self) -> Vec2 {
        Vec2::from_array(self.point)
    }

    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }

    pub fn set_color3(&mut self, color: Vec3) {
        self.color = color.extend(1.0).to_array();
    }
}

/// Backend executing the fluid passes.
///
/// Draw calls are fire-and-forget: a backend that cannot honor one logs the
/// problem and skips it, the same way a GL context would. Frame bracketing
/// and compile/link are the fallible operations.
pub trait RenderDevice {
    /// Whether `format` can be used as a render target and sampled.
    fn supports_render_format(&self, format: TextureFormat) -> bool;

    /// Whether `format` supports hardware bilinear filtering.
    fn supports_linear_filtering(&self, format: TextureFormat) -> bool;

    /// Current size of the visible surface in physical pixels.
    fn drawable_size(&self) -> (u32, u32);

    /// Allocates a texture cleared to transparent black.
    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId;

    fn release_texture(&mut self, texture: TextureId);

    fn compile_shader(&mut self, source: &ShaderSource<'_>) -> Result<ShaderId, ShaderError>;

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<LinkedProgram, ShaderError>;

    /// Makes `program` current for subsequent draws.
    fn use_program(&mut self, program: ProgramId);

    /// Toggles ONE / ONE_MINUS_SRC_ALPHA blending for subsequent draws.
    fn set_blending(&mut self, enabled: bool);

    /// Full-screen draw with the current program.
    fn draw(&mut self, target: DrawTarget, params: &PassParams, textures: &[TextureBinding]);

    fn begin_frame(&mut self) -> Result<(), FluidError>;

    fn end_frame(&mut self) -> Result<(), FluidError>;

    /// Submits work recorded outside a frame (initial allocation, resize blits).
    fn flush(&mut self) {}
}
