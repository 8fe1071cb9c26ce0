//! wgpu implementation of the fluid render device.
//!
//! Each `draw` records one render pass: a fresh uniform buffer holding the
//! pass parameters, a bind group built from the program's reflected
//! bindings, and a cached pipeline keyed by program, target format and
//! blend state. Work recorded between `begin_frame` and `end_frame` is
//! submitted with the surface texture; work recorded outside a frame
//! (allocation blits) goes out on `flush`. Released textures stay alive
//! until the next submit, since recorded passes may still read them.

use std::borrow::Cow;

use fluid::device::{LinkedProgram, ShaderId, ShaderSource, TextureBinding};
use fluid::shaders::{
    preprocess, reflect_bindings, BindingInfo, BindingKind, ShaderKind, U_SOURCE, U_TEXTURE,
};
use fluid::{
    DrawTarget, FilterMode, FluidError, PassParams, ProgramId, RenderDevice, ShaderError,
    ShaderStage, TextureDescriptor, TextureFormat, TextureId,
};
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use super::{is_device_lost, GpuContext, GpuError};

const ALL_FORMATS: [TextureFormat; 4] = [
    TextureFormat::R16Float,
    TextureFormat::Rg16Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
];

pub fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
    }
}

/// ONE / ONE_MINUS_SRC_ALPHA when enabled.
pub fn blend_state(blending: bool) -> Option<wgpu::BlendState> {
    blending.then_some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING)
}

/// Bind group layout entries for reflected bindings. `filterable` selects
/// filtering samplers and filterable float textures.
pub fn layout_entries(
    bindings: &[BindingInfo],
    filterable: bool,
) -> Vec<wgpu::BindGroupLayoutEntry> {
    let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .map(|info| {
            let ty = match info.kind {
                BindingKind::Uniform => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<PassParams>() as u64
                    ),
                },
                BindingKind::Sampler => wgpu::BindingType::Sampler(if filterable {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                BindingKind::Texture => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
            };
            wgpu::BindGroupLayoutEntry {
                binding: info.binding,
                visibility,
                ty,
                count: None,
            }
        })
        .collect();
    entries.sort_by_key(|e| e.binding);
    entries
}

/// Input a pass samples between texel centers. Its filter picks the
/// sampler; every other pass reads at texel centers.
pub fn filtered_input(kind: ShaderKind) -> Option<&'static str> {
    match kind {
        ShaderKind::Advection => Some(U_SOURCE),
        ShaderKind::Copy | ShaderKind::Display => Some(U_TEXTURE),
        _ => None,
    }
}

/// Filter for a draw of `kind`. `filter_of` maps a bound binding index to
/// the filter of the texture bound there.
pub fn pass_filter(
    kind: ShaderKind,
    bindings: &[BindingInfo],
    filter_of: impl Fn(u32) -> Option<FilterMode>,
) -> FilterMode {
    filtered_input(kind)
        .and_then(|name| bindings.iter().find(|b| b.name == name))
        .and_then(|info| filter_of(info.binding))
        .unwrap_or(FilterMode::Nearest)
}

/// Resources released while recorded commands may still use them. Dropped
/// once those commands have been submitted.
pub struct Retired<T> {
    items: Vec<T>,
}

impl<T> Retired<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Call after `queue.submit`.
    pub fn collect(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for Retired<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct FormatSupport {
    render: bool,
    filterable: bool,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct CompiledModule {
    module: wgpu::ShaderModule,
    kind: ShaderKind,
    stage: ShaderStage,
    bindings: Vec<BindingInfo>,
}

struct LinkedModules {
    vertex: ShaderId,
    fragment: ShaderId,
    bindings: Vec<BindingInfo>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    screen_cleared: bool,
}

type PipelineKey = (ProgramId, wgpu::TextureFormat, bool);

pub struct WgpuDevice {
    ctx: GpuContext,
    formats: FxHashMap<TextureFormat, FormatSupport>,
    /// Every renderable field format is filterable
    filterable: bool,
    textures: FxHashMap<TextureId, GpuTexture>,
    next_texture: u32,
    shaders: FxHashMap<ShaderId, CompiledModule>,
    next_shader: u32,
    programs: FxHashMap<ProgramId, LinkedModules>,
    next_program: u32,
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
    current: Option<ProgramId>,
    blending: bool,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    frame: Option<Frame>,
    pending: Option<wgpu::CommandEncoder>,
    retired: Retired<GpuTexture>,
}

impl WgpuDevice {
    pub fn new(ctx: GpuContext) -> Self {
        let mut formats = FxHashMap::default();
        for format in ALL_FORMATS {
            let features = ctx.adapter.get_texture_format_features(wgpu_format(format));
            let support = FormatSupport {
                render: features.allowed_usages.contains(
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                ),
                filterable: features
                    .flags
                    .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE),
            };
            log::debug!("{:?}: {:?}", format, support);
            formats.insert(format, support);
        }
        let filterable = formats.values().filter(|s| s.render).all(|s| s.filterable);

        let sampler = |filter: wgpu::FilterMode, label: &str| {
            ctx.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(wgpu::FilterMode::Linear, "Field Linear Sampler");
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest, "Field Nearest Sampler");

        Self {
            ctx,
            formats,
            filterable,
            textures: FxHashMap::default(),
            next_texture: 1,
            shaders: FxHashMap::default(),
            next_shader: 1,
            programs: FxHashMap::default(),
            next_program: 1,
            pipelines: FxHashMap::default(),
            current: None,
            blending: false,
            linear_sampler,
            nearest_sampler,
            frame: None,
            pending: None,
            retired: Retired::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Resizes the surface; the simulation picks the new size up next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.ctx.resize(width, height);
    }

    fn acquire_surface(&mut self) -> Result<wgpu::SurfaceTexture, GpuError> {
        match self.ctx.surface.get_current_texture() {
            Ok(texture) => Ok(texture),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring");
                self.ctx.reconfigure();
                self.ctx
                    .surface
                    .get_current_texture()
                    .map_err(GpuError::Surface)
            }
            Err(e) => Err(GpuError::Surface(e)),
        }
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> bool {
        if self.pipelines.contains_key(&key) {
            return true;
        }
        let (program, format, blending) = key;
        let Some(linked) = self.programs.get(&program) else {
            return false;
        };
        let (Some(vs), Some(fs)) = (
            self.shaders.get(&linked.vertex),
            self.shaders.get(&linked.fragment),
        ) else {
            return false;
        };

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{:?} Pipeline", fs.kind)),
            layout: Some(&linked.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vs.module,
                entry_point: Some(vs.kind.entry_point()),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fs.module,
                entry_point: Some(fs.kind.entry_point()),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: blend_state(blending),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            log::error!("Failed to build {:?} pipeline: {}", fs.kind, error);
            return false;
        }
        self.pipelines.insert(key, pipeline);
        true
    }
}

impl RenderDevice for WgpuDevice {
    fn supports_render_format(&self, format: TextureFormat) -> bool {
        self.formats.get(&format).is_some_and(|s| s.render)
    }

    fn supports_linear_filtering(&self, format: TextureFormat) -> bool {
        self.filterable && self.formats.get(&format).is_some_and(|s| s.filterable)
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.ctx.size
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let texture = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Field Texture"),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: *desc,
            },
        );
        id
    }

    fn release_texture(&mut self, texture: TextureId) {
        match self.textures.remove(&texture) {
            Some(gpu) => self.retired.push(gpu),
            None => log::warn!("Released unknown texture {:?}", texture),
        }
    }

    fn compile_shader(
        &mut self,
        source: &ShaderSource<'_>,
    ) -> Result<ShaderId, ShaderError> {
        let text = preprocess(source.text)?;
        let bindings = reflect_bindings(&text);

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{:?}", source.kind)),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(text)),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Compile {
                kind: source.kind,
                stage: source.stage,
                log: error.to_string(),
            });
        }

        let id = ShaderId(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(
            id,
            CompiledModule {
                module,
                kind: source.kind,
                stage: source.stage,
                bindings,
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

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{:?} Bind Group Layout", fs.kind)),
            entries: &layout_entries(&bindings, self.filterable),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{:?} Pipeline Layout", fs.kind)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Link {
                log: error.to_string(),
            });
        }

        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(
            id,
            LinkedModules {
                vertex,
                fragment,
                bindings: bindings.clone(),
                bind_group_layout,
                pipeline_layout,
            },
        );
        Ok(LinkedProgram { id, bindings })
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = Some(program);
    }

    fn set_blending(&mut self, enabled: bool) {
        self.blending = enabled;
    }

    fn draw(&mut self, target: DrawTarget, params: &PassParams, textures: &[TextureBinding]) {
        let Some(program) = self.current else {
            log::error!("Draw without a bound program");
            return;
        };
        if let DrawTarget::Texture(id) = target {
            if textures.iter().any(|t| t.texture == id) {
                log::error!("Feedback loop: draw reads its own target {:?}", id);
                return;
            }
        }

        let format = match target {
            DrawTarget::Screen => {
                if self.frame.is_none() {
                    log::error!("Screen draw outside a frame");
                    return;
                }
                self.ctx.surface_format()
            }
            DrawTarget::Texture(id) => match self.textures.get(&id) {
                Some(gpu) => wgpu_format(gpu.desc.format),
                None => {
                    log::error!("Draw to unknown texture {:?}", id);
                    return;
                }
            },
        };

        let key = (program, format, self.blending);
        if !self.ensure_pipeline(key) {
            return;
        }

        let (Some(linked), Some(pipeline)) = (self.programs.get(&program), self.pipelines.get(&key))
        else {
            return;
        };

        let kind = self
            .shaders
            .get(&linked.fragment)
            .map_or(ShaderKind::Copy, |module| module.kind);
        let filter = pass_filter(kind, &linked.bindings, |binding| {
            textures
                .iter()
                .find(|t| t.binding == binding)
                .and_then(|t| self.textures.get(&t.texture))
                .map(|gpu| gpu.desc.filter)
        });
        let sampler = match filter {
            FilterMode::Linear if self.filterable => &self.linear_sampler,
            _ => &self.nearest_sampler,
        };

        let device = &self.ctx.device;
        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pass Params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries = Vec::with_capacity(linked.bindings.len());
        for info in &linked.bindings {
            let resource = match info.kind {
                BindingKind::Uniform => uniforms.as_entire_binding(),
                BindingKind::Sampler => wgpu::BindingResource::Sampler(sampler),
                BindingKind::Texture => {
                    let view = textures
                        .iter()
                        .find(|t| t.binding == info.binding)
                        .and_then(|t| self.textures.get(&t.texture))
                        .map(|gpu| &gpu.view);
                    match view {
                        Some(view) => wgpu::BindingResource::TextureView(view),
                        None => {
                            log::error!("No texture bound for {}", info.name);
                            return;
                        }
                    }
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: info.binding,
                resource,
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Bind Group"),
            layout: &linked.bind_group_layout,
            entries: &entries,
        });

        let (encoder, view, load) = match target {
            DrawTarget::Screen => {
                let Some(frame) = self.frame.as_mut() else {
                    return;
                };
                let load = if frame.screen_cleared {
                    wgpu::LoadOp::Load
                } else {
                    frame.screen_cleared = true;
                    wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
                };
                (&mut frame.encoder, &frame.view, load)
            }
            DrawTarget::Texture(id) => {
                let Some(gpu) = self.textures.get(&id) else {
                    return;
                };
                let encoder = match self.frame.as_mut() {
                    Some(frame) => &mut frame.encoder,
                    None => self.pending.get_or_insert_with(|| {
                        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("Fluid Setup Encoder"),
                        })
                    }),
                };
                (encoder, &gpu.view, wgpu::LoadOp::Load)
            }
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Fluid Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..6, 0..1);
    }

    fn begin_frame(&mut self) -> Result<(), FluidError> {
        if is_device_lost() {
            return Err(GpuError::DeviceLost.into());
        }
        if self.frame.is_some() {
            return Err(FluidError::Device("frame already in progress".to_string()));
        }
        self.flush();

        let surface_texture = self.acquire_surface()?;
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Frame Encoder"),
            });
        self.frame = Some(Frame {
            surface_texture,
            view,
            encoder,
            screen_cleared: false,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), FluidError> {
        let Some(frame) = self.frame.take() else {
            return Err(FluidError::Device("end_frame without begin_frame".to_string()));
        };
        let Frame {
            surface_texture,
            view,
            encoder,
            ..
        } = frame;
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.retired.collect();
        drop(view);
        surface_texture.present();
        if is_device_lost() {
            return Err(GpuError::DeviceLost.into());
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.pending.take() {
            self.ctx.queue.submit(std::iter::once(encoder.finish()));
        }
        if self.frame.is_none() {
            self.retired.collect();
        }
    }
}
