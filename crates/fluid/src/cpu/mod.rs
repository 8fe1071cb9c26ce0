//! CPU reference implementation of [`RenderDevice`].
//!
//! Evaluates every pass per texel (rows in parallel with rayon) and keeps
//! enough bookkeeping (binds, draws, allocations) for tests to observe how
//! the pipeline drives a device.

mod kernels;
mod texture;

pub use kernels::Variant;
pub use texture::CpuTexture;

use glam::{Vec2, Vec4};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::device::{
    DrawTarget, FilterMode, LinkedProgram, PassParams, ProgramId, RenderDevice, ShaderId,
    ShaderSource, ShaderStage, TextureBinding, TextureDescriptor, TextureFormat, TextureId,
};
use crate::error::{FluidError, ShaderError};
use crate::shaders::{
    defined_keywords, preprocess, reflect_bindings, BindingInfo, ShaderKind, MANUAL_FILTERING,
    SHADING,
};
use kernels::{shade, Bound, Fragment};

/// What the device claims to support. Defaults to everything.
#[derive(Clone, Debug)]
pub struct CpuCapabilities {
    pub render_formats: FxHashSet<TextureFormat>,
    pub linear_filtering: bool,
}

impl Default for CpuCapabilities {
    fn default() -> Self {
        Self {
            render_formats: [
                TextureFormat::R16Float,
                TextureFormat::Rg16Float,
                TextureFormat::Rgba16Float,
                TextureFormat::Rgba8Unorm,
            ]
            .into_iter()
            .collect(),
            linear_filtering: true,
        }
    }
}

impl CpuCapabilities {
    pub fn without_format(mut self, format: TextureFormat) -> Self {
        self.render_formats.remove(&format);
        self
    }

    pub fn without_linear_filtering(mut self) -> Self {
        self.linear_filtering = false;
        self
    }
}

/// One executed draw.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub kind: ShaderKind,
    pub target: DrawTarget,
    pub blending: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DeviceStats {
    /// `use_program` calls per program
    pub binds: FxHashMap<ProgramId, usize>,
    pub draws: Vec<DrawRecord>,
    pub textures_created: usize,
    pub textures_released: usize,
    pub frames: usize,
}

impl DeviceStats {
    pub fn bind_count(&self, program: ProgramId) -> usize {
        self.binds.get(&program).copied().unwrap_or(0)
    }

    pub fn draws_of(&self, kind: ShaderKind) -> usize {
        self.draws.iter().filter(|d| d.kind == kind).count()
    }
}

struct CompiledShader {
    kind: ShaderKind,
    stage: ShaderStage,
    variant: Variant,
    bindings: Vec<BindingInfo>,
}

struct LinkedShaders {
    kind: ShaderKind,
    variant: Variant,
}

pub struct CpuDevice {
    caps: CpuCapabilities,
    size: (u32, u32),
    textures: FxHashMap<TextureId, CpuTexture>,
    next_texture: u32,
    shaders: FxHashMap<ShaderId, CompiledShader>,
    next_shader: u32,
    programs: FxHashMap<ProgramId, LinkedShaders>,
    next_program: u32,
    current: Option<ProgramId>,
    blending: bool,
    screen: CpuTexture,
    in_frame: bool,
    lost: bool,
    failing_keywords: Vec<String>,
    failing_kinds: Vec<ShaderKind>,
    stats: DeviceStats,
}

impl CpuDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, CpuCapabilities::default())
    }

    pub fn with_capabilities(width: u32, height: u32, caps: CpuCapabilities) -> Self {
        Self {
            caps,
            size: (width.max(1), height.max(1)),
            textures: FxHashMap::default(),
            next_texture: 1,
            shaders: FxHashMap::default(),
            next_shader: 1,
            programs: FxHashMap::default(),
            next_program: 1,
            current: None,
            blending: false,
            screen: Self::screen_texture(width, height),
            in_frame: false,
            lost: false,
            failing_keywords: Vec::new(),
            failing_kinds: Vec::new(),
            stats: DeviceStats::default(),
        }
    }

    fn screen_texture(width: u32, height: u32) -> CpuTexture {
        CpuTexture::new(width, height, TextureFormat::Rgba16Float, FilterMode::Nearest)
    }

    /// Changes the drawable size, as a window resize would.
    pub fn set_drawable_size(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
        self.screen = Self::screen_texture(width, height);
    }

    /// Makes every later compile of a source defining `keyword` fail.
    pub fn fail_keyword(&mut self, keyword: &str) {
        self.failing_keywords.push(keyword.to_string());
    }

    /// Makes every later compile of `kind` fail.
    pub fn fail_shader(&mut self, kind: ShaderKind) {
        self.failing_kinds.push(kind);
    }

    /// Simulates losing the device; the next frame fails.
    pub fn lose(&mut self) {
        self.lost = true;
    }

    pub fn texture(&self, id: TextureId) -> Option<&CpuTexture> {
        self.textures.get(&id)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn screen(&self) -> &CpuTexture {
        &self.screen
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DeviceStats::default();
    }

    /// Kind and variant a linked program runs.
    pub fn program_info(&self, program: ProgramId) -> Option<(ShaderKind, Variant)> {
        self.programs.get(&program).map(|p| (p.kind, p.variant))
    }

    fn compile_error(source: &ShaderSource<'_>, log: String) -> ShaderError {
        ShaderError::Compile {
            kind: source.kind,
            stage: source.stage,
            log,
        }
    }
}

impl RenderDevice for CpuDevice {
    fn supports_render_format(&self, format: TextureFormat) -> bool {
        self.caps.render_formats.contains(&format)
    }

    fn supports_linear_filtering(&self, _format: TextureFormat) -> bool {
        self.caps.linear_filtering
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let filter = if self.caps.linear_filtering {
            desc.filter
        } else {
            FilterMode::Nearest
        };
        self.textures
            .insert(id, CpuTexture::new(desc.width, desc.height, desc.format, filter));
        self.stats.textures_created += 1;
        id
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.stats.textures_released += 1;
        } else {
            log::warn!("Released unknown texture {:?}", texture);
        }
    }

    fn compile_shader(&mut self, source: &ShaderSource<'_>) -> Result<ShaderId, ShaderError> {
        let expected = match source.kind {
            ShaderKind::BaseVertex => ShaderStage::Vertex,
            _ => ShaderStage::Fragment,
        };
        if source.stage != expected {
            return Err(Self::compile_error(
                source,
                format!("{:?} is not a {:?} shader", source.kind, source.stage),
            ));
        }

        let keywords = defined_keywords(source.text);
        if self.failing_kinds.contains(&source.kind) {
            return Err(Self::compile_error(source, "injected failure".to_string()));
        }
        if let Some(keyword) = keywords.iter().find(|k| self.failing_keywords.contains(k)) {
            return Err(Self::compile_error(
                source,
                format!("injected failure for {}", keyword),
            ));
        }

        let text = preprocess(source.text)?;
        let id = ShaderId(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(
            id,
            CompiledShader {
                kind: source.kind,
                stage: source.stage,
                variant: Variant {
                    manual_filtering: keywords.iter().any(|k| k == MANUAL_FILTERING),
                    shading: keywords.iter().any(|k| k == SHADING),
                },
                bindings: reflect_bindings(&text),
            },
        );
        Ok(id)
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<LinkedProgram, ShaderError> {
        let (Some(vs), Some(fs)) = (self.shaders.get(&vertex), self.shaders.get(&fragment)) else {
            return Err(ShaderError::Link {
                log: format!("unknown shader {:?} or {:?}", vertex, fragment),
            });
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err(ShaderError::Link {
                log: format!("stage mismatch: {:?} + {:?}", vs.stage, fs.stage),
            });
        }

        let mut bindings = vs.bindings.clone();
        for info in &fs.bindings {
            if !bindings.iter().any(|b| b.name == info.name) {
                bindings.push(info.clone());
            }
        }

        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(
            id,
            LinkedShaders {
                kind: fs.kind,
                variant: fs.variant,
            },
        );
        Ok(LinkedProgram { id, bindings })
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = Some(program);
        *self.stats.binds.entry(program).or_insert(0) += 1;
    }

    fn set_blending(&mut self, enabled: bool) {
        self.blending = enabled;
    }

    fn draw(&mut self, target: DrawTarget, params: &PassParams, textures: &[TextureBinding]) {
        let Some(program) = self.current else {
            log::error!("Draw without a bound program");
            return;
        };
        let Some(&LinkedShaders { kind, variant }) = self.programs.get(&program) else {
            log::error!("Draw with unknown program {:?}", program);
            return;
        };
        if let DrawTarget::Texture(id) = target {
            if textures.iter().any(|t| t.texture == id) {
                log::error!("Feedback loop: {:?} reads its own target {:?}", kind, id);
                return;
            }
        }

        let mut output = match target {
            DrawTarget::Screen => std::mem::replace(&mut self.screen, Self::screen_texture(1, 1)),
            DrawTarget::Texture(id) => match self.textures.remove(&id) {
                Some(texture) => texture,
                None => {
                    log::error!("Draw to unknown texture {:?}", id);
                    return;
                }
            },
        };

        let mut slots: [Option<&CpuTexture>; 4] = [None; 4];
        let mut missing = false;
        for binding in textures {
            match (self.textures.get(&binding.texture), slots.get_mut(binding.binding as usize)) {
                (Some(texture), Some(slot)) => *slot = Some(texture),
                _ => missing = true,
            }
        }

        if missing {
            log::error!("{:?} draw references an unknown texture or slot", kind);
        } else {
            let bound = Bound::new(slots);
            let (width, height) = (output.width, output.height);
            let format = output.format;
            let texel_size = params.texel_size();
            let blending = self.blending;

            output
                .data_mut()
                .par_chunks_mut(width as usize)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, texel) in row.iter_mut().enumerate() {
                        let frag = Fragment::at(x as u32, y as u32, width, height, texel_size);
                        let src = shade(kind, variant, params, &bound, &frag);
                        let value = if blending {
                            src + *texel * (1.0 - src.w)
                        } else {
                            src
                        };
                        *texel = CpuTexture::encode(format, value);
                    }
                });

            self.stats.draws.push(DrawRecord {
                program,
                kind,
                target,
                blending,
            });
        }

        match target {
            DrawTarget::Screen => self.screen = output,
            DrawTarget::Texture(id) => {
                self.textures.insert(id, output);
            }
        }
    }

    fn begin_frame(&mut self) -> Result<(), FluidError> {
        if self.lost {
            return Err(FluidError::Device("device lost".to_string()));
        }
        if self.in_frame {
            return Err(FluidError::Device("frame already in progress".to_string()));
        }
        self.in_frame = true;
        self.screen.clear();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), FluidError> {
        if !self.in_frame {
            return Err(FluidError::Device("end_frame without begin_frame".to_string()));
        }
        self.in_frame = false;
        self.stats.frames += 1;
        Ok(())
    }
}

/// Writes `value` into every texel of `texture`. False if it does not exist.
pub fn fill_texture(device: &mut CpuDevice, texture: TextureId, value: Vec4) -> bool {
    match device.textures.get_mut(&texture) {
        Some(tex) => {
            let encoded = CpuTexture::encode(tex.format, value);
            tex.data_mut().fill(encoded);
            true
        }
        None => false,
    }
}

/// Screen texel under a normalized position.
pub fn screen_at(device: &CpuDevice, uv: Vec2) -> Vec4 {
    device.screen.sample_nearest(uv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{ProgramSet, U_TEXTURE};

    fn texture(device: &mut CpuDevice) -> TextureId {
        device.create_texture(&TextureDescriptor {
            width: 4,
            height: 4,
            format: TextureFormat::Rgba16Float,
            filter: FilterMode::Nearest,
        })
    }

    #[test]
    fn test_feedback_loop_draw_is_rejected() {
        let mut device = CpuDevice::new(4, 4);
        let programs = ProgramSet::new(&mut device, false, false).unwrap();
        let target = texture(&mut device);
        assert!(fill_texture(&mut device, target, Vec4::ONE));

        programs.copy.bind(&mut device);
        let binding = programs.copy.texture(U_TEXTURE, target).unwrap();
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        device.draw(DrawTarget::Texture(target), &params, &[binding]);

        assert!(device.stats().draws.is_empty());
        assert_eq!(device.texture(target).unwrap().texel(0, 0), Vec4::ONE);
    }

    #[test]
    fn test_copy_draw_writes_target() {
        let mut device = CpuDevice::new(4, 4);
        let programs = ProgramSet::new(&mut device, false, false).unwrap();
        let source = texture(&mut device);
        let target = texture(&mut device);
        fill_texture(&mut device, source, Vec4::new(0.25, 0.5, 0.75, 1.0));

        programs.copy.bind(&mut device);
        let binding = programs.copy.texture(U_TEXTURE, source).unwrap();
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        device.draw(DrawTarget::Texture(target), &params, &[binding]);

        assert_eq!(device.stats().draws.len(), 1);
        assert_eq!(
            device.texture(target).unwrap().texel(3, 2),
            Vec4::new(0.25, 0.5, 0.75, 1.0)
        );
    }

    #[test]
    fn test_blending_is_premultiplied_over() {
        let mut device = CpuDevice::new(2, 2);
        let programs = ProgramSet::new(&mut device, false, false).unwrap();
        device.begin_frame().unwrap();

        let mut params = PassParams::with_texel_size(Vec2::splat(0.5));
        programs.color.bind(&mut device);
        params.color = [0.0, 0.0, 1.0, 1.0];
        device.set_blending(true);
        device.draw(DrawTarget::Screen, &params, &[]);
        params.color = [0.5, 0.0, 0.0, 0.5];
        device.draw(DrawTarget::Screen, &params, &[]);
        device.end_frame().unwrap();

        assert_eq!(screen_at(&device, Vec2::splat(0.5)), Vec4::new(0.5, 0.0, 0.5, 1.0));
    }

    #[test]
    fn test_link_rejects_swapped_stages() {
        let mut device = CpuDevice::new(2, 2);
        let programs = ProgramSet::new(&mut device, false, false).unwrap();
        let fragment = crate::shaders::compile_shader(&mut device, ShaderKind::Copy, &[]).unwrap();
        let result = device.link_program(fragment, fragment);
        assert!(matches!(result, Err(ShaderError::Link { .. })));
        assert!(device.program_info(programs.copy.id()).is_some());
    }

    #[test]
    fn test_frames_must_be_balanced() {
        let mut device = CpuDevice::new(2, 2);
        assert!(device.end_frame().is_err());
        device.begin_frame().unwrap();
        assert!(device.begin_frame().is_err());
        device.end_frame().unwrap();
        assert_eq!(device.stats().frames, 1);
    }
}
