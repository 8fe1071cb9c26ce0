use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use super::{
    preprocess, with_keywords, BindingInfo, BindingKind, ShaderKind, MANUAL_FILTERING, SHADING,
};
use crate::device::{
    ProgramId, RenderDevice, ShaderId, ShaderSource, ShaderStage, TextureBinding, TextureId,
};
use crate::error::ShaderError;

/// Compiles one stage of `kind` with the given keywords.
pub fn compile_shader<D: RenderDevice>(
    device: &mut D,
    kind: ShaderKind,
    keywords: &[&str],
) -> Result<ShaderId, ShaderError> {
    let stage = match kind {
        ShaderKind::BaseVertex => ShaderStage::Vertex,
        _ => ShaderStage::Fragment,
    };
    let text = with_keywords(&kind.source(), keywords);
    // Surface directive errors here rather than as an opaque backend failure.
    preprocess(&text)?;
    device
        .compile_shader(&ShaderSource {
            kind,
            stage,
            text: &text,
        })
        .inspect_err(|e| log::error!("{}", e))
}

/// A linked vertex/fragment pair and its reflected uniform locations.
#[derive(Clone, Debug)]
pub struct Program {
    id: ProgramId,
    uniforms: FxHashMap<String, BindingInfo>,
}

impl Program {
    pub fn link<D: RenderDevice>(
        device: &mut D,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<Self, ShaderError> {
        let linked = device
            .link_program(vertex, fragment)
            .inspect_err(|e| log::error!("{}", e))?;
        let uniforms = linked
            .bindings
            .into_iter()
            .map(|b| (b.name.clone(), b))
            .collect();
        Ok(Self {
            id: linked.id,
            uniforms,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn bind<D: RenderDevice>(&self, device: &mut D) {
        device.use_program(self.id);
    }

    /// Binding slot of a named uniform, if the program declares it.
    pub fn uniform(&self, name: &str) -> Option<u32> {
        self.uniforms.get(name).map(|b| b.binding)
    }

    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.uniforms.keys().map(String::as_str)
    }

    /// Pairs a named sampler uniform with a texture for a draw call.
    pub fn texture(&self, name: &str, texture: TextureId) -> Option<TextureBinding> {
        match self.uniforms.get(name) {
            Some(info) if info.kind == BindingKind::Texture => Some(TextureBinding {
                binding: info.binding,
                texture,
            }),
            _ => {
                log::warn!("Program {:?} has no texture uniform {}", self.id, name);
                None
            }
        }
    }
}

/// Hash of the sorted keyword list; identifies one material variant.
pub fn keywords_hash(keywords: &[&str]) -> u64 {
    let mut sorted: Vec<&str> = keywords.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = FxHasher::default();
    sorted.hash(&mut hasher);
    hasher.finish()
}

/// A fragment shader with keyword variants, linked lazily and cached.
pub struct Material {
    vertex: ShaderId,
    kind: ShaderKind,
    programs: FxHashMap<u64, Program>,
    active: Option<u64>,
}

impl Material {
    pub fn new(vertex: ShaderId, kind: ShaderKind) -> Self {
        Self {
            vertex,
            kind,
            programs: FxHashMap::default(),
            active: None,
        }
    }

    /// Switches to the variant for `keywords`, compiling it on first use.
    pub fn set_keywords<D: RenderDevice>(
        &mut self,
        device: &mut D,
        keywords: &[&str],
    ) -> Result<(), ShaderError> {
        let hash = keywords_hash(keywords);
        if !self.programs.contains_key(&hash) {
            let fragment = compile_shader(device, self.kind, keywords)?;
            let program = Program::link(device, self.vertex, fragment)?;
            log::debug!("Compiled {:?} variant {:?}", self.kind, keywords);
            self.programs.insert(hash, program);
        }
        self.active = Some(hash);
        Ok(())
    }

    pub fn active(&self) -> Option<&Program> {
        self.active.and_then(|hash| self.programs.get(&hash))
    }

    pub fn bind<D: RenderDevice>(&self, device: &mut D) {
        if let Some(program) = self.active() {
            program.bind(device);
        }
    }

    pub fn variant_count(&self) -> usize {
        self.programs.len()
    }
}

/// Every program the stepper and compositor use, compiled once.
pub struct ProgramSet {
    pub copy: Program,
    pub clear: Program,
    pub color: Program,
    pub splat: Program,
    pub advection: Program,
    pub divergence: Program,
    pub curl: Program,
    pub vorticity: Program,
    pub pressure: Program,
    pub gradient_subtract: Program,
    pub display: Material,
}

impl ProgramSet {
    pub fn new<D: RenderDevice>(
        device: &mut D,
        manual_filtering: bool,
        shading: bool,
    ) -> Result<Self, ShaderError> {
        let vertex = compile_shader(device, ShaderKind::BaseVertex, &[])?;

        let mut build = |kind: ShaderKind, keywords: &[&str]| -> Result<Program, ShaderError> {
            let fragment = compile_shader(device, kind, keywords)?;
            Program::link(device, vertex, fragment)
        };

        let advection_keywords: &[&str] = if manual_filtering {
            &[MANUAL_FILTERING]
        } else {
            &[]
        };

        let copy = build(ShaderKind::Copy, &[])?;
        let clear = build(ShaderKind::Clear, &[])?;
        let color = build(ShaderKind::Color, &[])?;
        let splat = build(ShaderKind::Splat, &[])?;
        let advection = build(ShaderKind::Advection, advection_keywords)?;
        let divergence = build(ShaderKind::Divergence, &[])?;
        let curl = build(ShaderKind::Curl, &[])?;
        let vorticity = build(ShaderKind::Vorticity, &[])?;
        let pressure = build(ShaderKind::Pressure, &[])?;
        let gradient_subtract = build(ShaderKind::GradientSubtract, &[])?;

        let mut display = Material::new(vertex, ShaderKind::Display);
        display.set_keywords(device, display_keywords(shading))?;

        Ok(Self {
            copy,
            clear,
            color,
            splat,
            advection,
            divergence,
            curl,
            vorticity,
            pressure,
            gradient_subtract,
            display,
        })
    }
}

pub(crate) fn display_keywords(shading: bool) -> &'static [&'static str] {
    if shading {
        &[SHADING]
    } else {
        &[]
    }
}
