//! Per-frame fluid stepper.
//!
//! `update` runs the fixed pipeline: resize check, color cycling, queued
//! inputs, curl, vorticity confinement, divergence, pressure init, Jacobi
//! relaxation, gradient subtraction, velocity and dye advection, display.

use std::time::Instant;

use glam::{Vec2, Vec3};

use crate::color::wrap;
use crate::compositor::Compositor;
use crate::config::{resolution_for, SimulationConfig};
use crate::device::{DrawTarget, FilterMode, PassParams, RenderDevice, TextureBinding, TextureId};
use crate::error::FluidError;
use crate::framebuffer::{DoubleFramebuffer, FieldFormats, Framebuffer, FramebufferPool};
use crate::pointer::{PointerTracker, Splat};
use crate::shaders::{
    display_keywords, Program, ProgramSet, U_CURL, U_DIVERGENCE, U_PRESSURE, U_SOURCE, U_TARGET,
    U_TEXTURE, U_VELOCITY,
};

/// Largest timestep a single frame may advance (one 60 Hz frame).
pub const MAX_FRAME_DT: f32 = 1.0 / 60.0;

/// Wall-clock timestep source, clamped so a stalled frame cannot blow up the
/// advection.
#[derive(Debug, Default)]
pub struct FrameClock {
    last: Option<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = match self.last {
            Some(last) => (now - last).as_secs_f32(),
            None => 0.0,
        };
        self.last = Some(now);
        dt.min(MAX_FRAME_DT)
    }
}

/// Settings derived from the config after capability probing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub dye_resolution: u32,
    pub shading: bool,
    /// Float formats cannot be linearly filtered; advection interpolates manually.
    pub manual_filtering: bool,
}

/// Every field the pipeline reads or writes.
#[derive(Clone, Debug)]
pub struct Fields {
    pub dye: DoubleFramebuffer,
    pub velocity: DoubleFramebuffer,
    pub divergence: Framebuffer,
    pub curl: Framebuffer,
    pub pressure: DoubleFramebuffer,
}

pub struct FluidSimulation<D: RenderDevice> {
    device: D,
    config: SimulationConfig,
    settings: EffectiveSettings,
    formats: FieldFormats,
    programs: ProgramSet,
    pool: FramebufferPool,
    fields: Fields,
    pointers: PointerTracker,
    compositor: Compositor,
    canvas: (u32, u32),
    color_timer: f32,
}

/// Binds named textures and issues one full-screen draw with `program`.
fn run_pass<D: RenderDevice>(
    device: &mut D,
    program: &Program,
    target: DrawTarget,
    params: &PassParams,
    inputs: &[(&str, TextureId)],
) {
    program.bind(device);
    let bindings: Vec<TextureBinding> = inputs
        .iter()
        .filter_map(|&(name, texture)| program.texture(name, texture))
        .collect();
    if bindings.len() != inputs.len() {
        log::error!("Skipping pass {:?}: missing texture uniform", program.id());
        return;
    }
    device.draw(target, params, &bindings);
}

impl<D: RenderDevice> FluidSimulation<D> {
    pub fn new(mut device: D, config: SimulationConfig) -> Result<Self, FluidError> {
        config.validate()?;

        let formats = FieldFormats::probe(&device).ok_or(FluidError::NoRenderableFormat)?;
        let linear = device.supports_linear_filtering(formats.rgba)
            && device.supports_linear_filtering(formats.rg);

        let mut settings = EffectiveSettings {
            dye_resolution: config.dye_resolution,
            shading: config.shading,
            manual_filtering: !linear,
        };
        if !linear {
            let fallback = &config.filtering_fallback;
            if let Some(resolution) = fallback.dye_resolution {
                settings.dye_resolution = resolution;
            }
            if fallback.disable_shading {
                settings.shading = false;
            }
            log::warn!(
                "Linear filtering unsupported: manual filtering, dye resolution {}, shading {}",
                settings.dye_resolution,
                settings.shading
            );
        }
        log::info!("Field formats: {:?}", formats);

        let programs = ProgramSet::new(&mut device, settings.manual_filtering, settings.shading)?;

        let canvas = device.drawable_size();
        let mut pool = FramebufferPool::new();
        let fields = Self::create_fields(&mut device, &mut pool, &formats, &settings, &config, canvas);
        device.flush();

        let pointers = PointerTracker::new(canvas.0, canvas.1, config.seed);
        let compositor = Compositor::new(config.back_color, config.transparent);

        Ok(Self {
            device,
            config,
            settings,
            formats,
            programs,
            pool,
            fields,
            pointers,
            compositor,
            canvas,
            color_timer: 0.0,
        })
    }

    fn field_filter(settings: &EffectiveSettings) -> FilterMode {
        if settings.manual_filtering {
            FilterMode::Nearest
        } else {
            FilterMode::Linear
        }
    }

    fn create_fields(
        device: &mut D,
        pool: &mut FramebufferPool,
        formats: &FieldFormats,
        settings: &EffectiveSettings,
        config: &SimulationConfig,
        canvas: (u32, u32),
    ) -> Fields {
        let (sim_w, sim_h) = resolution_for(config.sim_resolution, canvas.0, canvas.1);
        let (dye_w, dye_h) = resolution_for(settings.dye_resolution, canvas.0, canvas.1);
        let filter = Self::field_filter(settings);

        Fields {
            dye: pool.create_double(device, dye_w, dye_h, formats.rgba, filter),
            velocity: pool.create_double(device, sim_w, sim_h, formats.rg, filter),
            divergence: pool.create(device, sim_w, sim_h, formats.r, FilterMode::Nearest),
            curl: pool.create(device, sim_w, sim_h, formats.r, FilterMode::Nearest),
            pressure: pool.create_double(device, sim_w, sim_h, formats.r, FilterMode::Nearest),
        }
    }

    /// Reallocates every field for the current canvas. Dye and velocity keep
    /// their (stretched) contents; the scratch fields start from zero.
    fn reallocate_fields(&mut self) {
        let (sim_w, sim_h) = resolution_for(self.config.sim_resolution, self.canvas.0, self.canvas.1);
        let (dye_w, dye_h) =
            resolution_for(self.settings.dye_resolution, self.canvas.0, self.canvas.1);
        let device = &mut self.device;
        let pool = &mut self.pool;
        let copy = &self.programs.copy;
        let fields = &mut self.fields;

        device.set_blending(false);
        pool.resize_double(device, copy, &mut fields.dye, dye_w, dye_h);
        pool.resize_double(device, copy, &mut fields.velocity, sim_w, sim_h);

        pool.release(device, &fields.divergence);
        pool.release(device, &fields.curl);
        pool.release_double(device, &fields.pressure);
        fields.divergence = pool.create(device, sim_w, sim_h, self.formats.r, FilterMode::Nearest);
        fields.curl = pool.create(device, sim_w, sim_h, self.formats.r, FilterMode::Nearest);
        fields.pressure =
            pool.create_double(device, sim_w, sim_h, self.formats.r, FilterMode::Nearest);
    }

    /// Runs one frame: simulation step plus display.
    pub fn update(&mut self, dt: f32) -> Result<(), FluidError> {
        self.device.begin_frame()?;
        self.resize_if_needed();
        self.update_colors(dt);
        self.apply_inputs();
        self.step(dt);
        self.render();
        self.device.end_frame()
    }

    /// Reallocates fields when the drawable size changed. Returns whether it did.
    pub fn resize_if_needed(&mut self) -> bool {
        let size = self.device.drawable_size();
        if size == self.canvas {
            return false;
        }
        log::debug!("Canvas resized {:?} -> {:?}", self.canvas, size);
        self.canvas = size;
        self.pointers.set_canvas_size(size.0, size.1);
        self.reallocate_fields();
        true
    }

    /// Advances the color-cycle timer; on wrap every pointer gets a new color.
    pub fn update_colors(&mut self, dt: f32) {
        self.color_timer += dt * self.config.color_update_speed;
        if self.color_timer >= 1.0 {
            self.color_timer = wrap(self.color_timer, 0.0, 1.0);
            self.pointers.recolor();
        }
    }

    /// Consumes queued splats and pending pointer moves, one splat each.
    pub fn apply_inputs(&mut self) {
        self.device.set_blending(false);
        for splat in self.pointers.take_pending_splats() {
            self.splat(splat);
        }
        for pointer in self.pointers.drain_moved() {
            self.splat(Splat {
                point: pointer.texcoord,
                force: pointer.delta * self.config.splat_force,
                color: pointer.color,
            });
        }
    }

    /// Splat radius widened along x on landscape canvases.
    fn corrected_radius(&self) -> f32 {
        let mut radius = self.config.splat_radius / 100.0;
        let aspect = self.pointers.aspect_ratio();
        if aspect > 1.0 {
            radius *= aspect;
        }
        radius
    }

    /// Gaussian injection of `force` into velocity and `color` into dye.
    pub fn splat(&mut self, splat: Splat) {
        let mut params = PassParams::with_texel_size(self.fields.velocity.texel_size());
        params.aspect_ratio = self.pointers.aspect_ratio();
        params.point = splat.point.to_array();
        params.radius = self.corrected_radius();
        params.set_color3(Vec3::new(splat.force.x, splat.force.y, 0.0));

        let fields = &mut self.fields;
        let splat_program = &self.programs.splat;
        run_pass(
            &mut self.device,
            splat_program,
            fields.velocity.write().target(),
            &params,
            &[(U_TARGET, fields.velocity.read().texture)],
        );
        fields.velocity.swap();

        params.texel_size = fields.dye.texel_size().to_array();
        params.set_color3(splat.color);
        run_pass(
            &mut self.device,
            splat_program,
            fields.dye.write().target(),
            &params,
            &[(U_TARGET, fields.dye.read().texture)],
        );
        fields.dye.swap();
    }

    /// Advances velocity and dye by `dt`.
    pub fn step(&mut self, dt: f32) {
        let device = &mut self.device;
        let programs = &self.programs;
        let fields = &mut self.fields;
        let config = &self.config;

        device.set_blending(false);
        let velocity_texel = fields.velocity.texel_size();
        let base = PassParams::with_texel_size(velocity_texel);

        run_pass(
            device,
            &programs.curl,
            fields.curl.target(),
            &base,
            &[(U_VELOCITY, fields.velocity.read().texture)],
        );

        let mut params = base;
        params.curl = config.curl;
        params.dt = dt;
        run_pass(
            device,
            &programs.vorticity,
            fields.velocity.write().target(),
            &params,
            &[
                (U_VELOCITY, fields.velocity.read().texture),
                (U_CURL, fields.curl.texture),
            ],
        );
        fields.velocity.swap();

        run_pass(
            device,
            &programs.divergence,
            fields.divergence.target(),
            &base,
            &[(U_VELOCITY, fields.velocity.read().texture)],
        );

        let mut params = base;
        params.value = config.pressure;
        run_pass(
            device,
            &programs.clear,
            fields.pressure.write().target(),
            &params,
            &[(U_TEXTURE, fields.pressure.read().texture)],
        );
        fields.pressure.swap();

        for _ in 0..config.pressure_iterations {
            run_pass(
                device,
                &programs.pressure,
                fields.pressure.write().target(),
                &base,
                &[
                    (U_PRESSURE, fields.pressure.read().texture),
                    (U_DIVERGENCE, fields.divergence.texture),
                ],
            );
            fields.pressure.swap();
        }

        run_pass(
            device,
            &programs.gradient_subtract,
            fields.velocity.write().target(),
            &base,
            &[
                (U_PRESSURE, fields.pressure.read().texture),
                (U_VELOCITY, fields.velocity.read().texture),
            ],
        );
        fields.velocity.swap();

        let mut params = base;
        params.dt = dt;
        params.dissipation = config.velocity_dissipation;
        if self.settings.manual_filtering {
            params.dye_texel_size = velocity_texel.to_array();
        }
        let velocity = fields.velocity.read().texture;
        run_pass(
            device,
            &programs.advection,
            fields.velocity.write().target(),
            &params,
            &[(U_VELOCITY, velocity), (U_SOURCE, velocity)],
        );
        fields.velocity.swap();

        params.dissipation = config.density_dissipation;
        if self.settings.manual_filtering {
            params.dye_texel_size = fields.dye.texel_size().to_array();
        }
        run_pass(
            device,
            &programs.advection,
            fields.dye.write().target(),
            &params,
            &[
                (U_VELOCITY, fields.velocity.read().texture),
                (U_SOURCE, fields.dye.read().texture),
            ],
        );
        fields.dye.swap();
    }

    pub fn render(&mut self) {
        self.compositor
            .render(&mut self.device, &self.programs, &self.fields.dye, self.canvas);
    }

    /// Toggles the display lighting term. Compiles the variant on first use;
    /// a failed compile keeps the current variant.
    pub fn set_shading(&mut self, enabled: bool) {
        let forced_off =
            self.settings.manual_filtering && self.config.filtering_fallback.disable_shading;
        let shading = enabled && !forced_off;
        match self
            .programs
            .display
            .set_keywords(&mut self.device, display_keywords(shading))
        {
            Ok(()) => {
                self.settings.shading = shading;
                self.config.shading = enabled;
            }
            Err(e) => log::warn!("Keeping previous display variant: {}", e),
        }
    }

    pub fn queue_random_splats(&mut self, amount: usize) {
        self.pointers.queue_random_splats(amount);
    }

    /// Releases every field texture and hands the device back.
    pub fn destroy(mut self) -> D {
        let fields = self.fields.clone();
        self.pool.release_double(&mut self.device, &fields.dye);
        self.pool.release_double(&mut self.device, &fields.velocity);
        self.pool.release(&mut self.device, &fields.divergence);
        self.pool.release(&mut self.device, &fields.curl);
        self.pool.release_double(&mut self.device, &fields.pressure);
        self.device.flush();
        self.device
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pointers(&self) -> &PointerTracker {
        &self.pointers
    }

    pub fn pointers_mut(&mut self) -> &mut PointerTracker {
        &mut self.pointers
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn programs(&self) -> &ProgramSet {
        &self.programs
    }

    pub fn pool(&self) -> &FramebufferPool {
        &self.pool
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn settings(&self) -> &EffectiveSettings {
        &self.settings
    }

    pub fn formats(&self) -> &FieldFormats {
        &self.formats
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas
    }

    /// Normalized canvas position of a pixel, for hosts mapping their own input.
    pub fn texcoord(&self, x: f32, y: f32) -> Vec2 {
        self.pointers.to_texcoord(x, y)
    }
}
