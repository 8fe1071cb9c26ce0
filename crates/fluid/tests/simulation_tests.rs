//! Pipeline tests for FluidSimulation on the CPU reference device
//!
//! Covers:
//! - Idle frames leave the fields empty
//! - Single-splat velocity decay
//! - Pass ordering and per-iteration pressure binds
//! - Resize behavior and texture lifetime
//! - Capability fallbacks and shader variants

use fluid::cpu::{CpuCapabilities, CpuDevice};
use fluid::shaders::{ShaderKind, SHADING};
use fluid::{
    resolution_for, DrawTarget, FilteringFallback, FluidError, FluidSimulation, PointerId,
    RenderDevice, ShaderError, SimulationConfig, Splat, TextureFormat,
};
use glam::{Vec2, Vec3};

const DT: f32 = 1.0 / 60.0;
const CANVAS: (u32, u32) = (64, 64);

fn small_config() -> SimulationConfig {
    SimulationConfig {
        sim_resolution: 32,
        dye_resolution: 48,
        seed: Some(7),
        ..SimulationConfig::default()
    }
}

fn simulation(config: SimulationConfig) -> FluidSimulation<CpuDevice> {
    FluidSimulation::new(CpuDevice::new(CANVAS.0, CANVAS.1), config).unwrap()
}

fn dye_peak(sim: &FluidSimulation<CpuDevice>) -> f32 {
    let id = sim.fields().dye.read().texture;
    sim.device().texture(id).unwrap().max_rgb()
}

fn velocity_peak(sim: &FluidSimulation<CpuDevice>) -> f32 {
    let id = sim.fields().velocity.read().texture;
    sim.device().texture(id).unwrap().max_xy_length()
}

/// Test that a simulation with no input keeps dye and velocity at zero
#[test]
fn test_idle_frames_keep_fields_empty() {
    let mut sim = simulation(small_config());
    for _ in 0..100 {
        sim.update(DT).unwrap();
    }
    assert_eq!(dye_peak(&sim), 0.0);
    assert_eq!(velocity_peak(&sim), 0.0);
    assert_eq!(sim.device().stats().frames, 100);
}

/// Test that after one splat the peak speed decreases every frame
#[test]
fn test_single_splat_velocity_decays() {
    let config = SimulationConfig {
        sim_resolution: 64,
        curl: 0.0,
        ..small_config()
    };
    let mut sim = simulation(config);
    sim.splat(Splat {
        point: Vec2::splat(0.5),
        force: Vec2::new(100.0, 0.0),
        color: Vec3::ZERO,
    });

    let mut previous = velocity_peak(&sim);
    assert!(previous > 90.0, "splat peak was {}", previous);

    for frame in 0..30 {
        sim.update(DT).unwrap();
        let peak = velocity_peak(&sim);
        assert!(peak.is_finite());
        assert!(
            peak < previous,
            "frame {}: peak {} did not drop below {}",
            frame,
            peak,
            previous
        );
        previous = peak;
    }
}

/// Test that the pressure program is bound once per Jacobi iteration
#[test]
fn test_pressure_bound_once_per_iteration() {
    let config = SimulationConfig {
        pressure_iterations: 13,
        ..small_config()
    };
    let mut sim = simulation(config);
    sim.device_mut().reset_stats();
    sim.step(DT);

    let stats = sim.device().stats();
    let pressure = sim.programs().pressure.id();
    assert_eq!(stats.bind_count(pressure), 13);
    assert_eq!(stats.draws_of(ShaderKind::Pressure), 13);
}

/// Test the pass order of one step and that no draw is rejected
#[test]
fn test_step_pass_order() {
    let config = SimulationConfig {
        pressure_iterations: 3,
        ..small_config()
    };
    let mut sim = simulation(config);
    sim.device_mut().reset_stats();
    sim.step(DT);

    let kinds: Vec<ShaderKind> = sim.device().stats().draws.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ShaderKind::Curl,
            ShaderKind::Vorticity,
            ShaderKind::Divergence,
            ShaderKind::Clear,
            ShaderKind::Pressure,
            ShaderKind::Pressure,
            ShaderKind::Pressure,
            ShaderKind::GradientSubtract,
            ShaderKind::Advection,
            ShaderKind::Advection,
        ]
    );
    assert!(sim.device().stats().draws.iter().all(|d| !d.blending));
}

/// Test that an unchanged canvas size keeps every texture
#[test]
fn test_resize_same_size_is_noop() {
    let mut sim = simulation(small_config());
    let before = sim.fields().clone();
    let created = sim.device().stats().textures_created;

    assert!(!sim.resize_if_needed());
    sim.update(DT).unwrap();

    let after = sim.fields();
    assert_eq!(before.dye.textures(), after.dye.textures());
    assert_eq!(before.velocity.textures(), after.velocity.textures());
    assert_eq!(before.pressure.textures(), after.pressure.textures());
    assert_eq!(before.curl.texture, after.curl.texture);
    assert_eq!(before.divergence.texture, after.divergence.texture);
    assert_eq!(sim.device().stats().textures_created, created);
}

/// Test that resizing reallocates fields at the new aspect and frees the old ones
#[test]
fn test_resize_reallocates_fields() {
    let mut sim = simulation(small_config());
    sim.splat(Splat {
        point: Vec2::splat(0.5),
        force: Vec2::ZERO,
        color: Vec3::new(1.0, 0.5, 0.0),
    });
    let old_dye = sim.fields().dye.textures();

    sim.device_mut().set_drawable_size(128, 64);
    assert!(sim.resize_if_needed());

    let fields = sim.fields();
    assert_eq!(
        (fields.velocity.width(), fields.velocity.height()),
        resolution_for(32, 128, 64)
    );
    assert_eq!(
        (fields.dye.width(), fields.dye.height()),
        resolution_for(48, 128, 64)
    );
    assert_eq!((fields.curl.width, fields.curl.height), (64, 32));
    for id in old_dye {
        assert!(sim.device().texture(id).is_none());
    }
    assert_eq!(sim.device().live_textures(), 8);
    assert_eq!(sim.pool().live_textures(), 8);

    // Dye survives the copy blit
    assert!(dye_peak(&sim) > 0.5);
    assert_eq!(sim.pointers().canvas_size(), (128, 64));
}

/// Test that a drag injects dye near the pointer
#[test]
fn test_pointer_drag_splats_dye() {
    let mut sim = simulation(small_config());
    let pointers = sim.pointers_mut();
    pointers.pointer_down(PointerId::Mouse, 32.0, 32.0);
    pointers.pointer_move(PointerId::Mouse, 40.0, 32.0);
    assert!(pointers.has_pending_input());

    sim.device_mut().reset_stats();
    sim.update(DT).unwrap();

    // One click splat plus one move splat, each touching velocity and dye
    assert_eq!(sim.device().stats().draws_of(ShaderKind::Splat), 4);
    assert!(dye_peak(&sim) > 0.0);
    assert!(velocity_peak(&sim) > 0.0);
    assert!(!sim.pointers().has_pending_input());
}

/// Test that queued random splats are applied on the next frame
#[test]
fn test_random_splats_applied_next_frame() {
    let mut sim = simulation(small_config());
    sim.queue_random_splats(10);
    assert_eq!(sim.device().stats().draws_of(ShaderKind::Splat), 0);

    sim.update(DT).unwrap();
    assert_eq!(sim.device().stats().draws_of(ShaderKind::Splat), 20);
    assert!(dye_peak(&sim) > 0.0);
}

/// Test that an opaque canvas paints the background color under the dye
#[test]
fn test_background_color_when_opaque() {
    let config = SimulationConfig {
        transparent: false,
        back_color: [0.5, 0.0, 0.0],
        ..small_config()
    };
    let mut sim = simulation(config);
    sim.update(DT).unwrap();

    let texel = sim.device().screen().texel(10, 10);
    assert!((texel.x - 0.5).abs() < 1e-6);
    assert_eq!(texel.w, 1.0);

    let screen_draws: Vec<_> = sim
        .device()
        .stats()
        .draws
        .iter()
        .filter(|d| d.target == DrawTarget::Screen)
        .collect();
    assert_eq!(screen_draws.len(), 2);
    assert!(screen_draws.iter().all(|d| d.blending));
}

/// Test that a transparent canvas leaves empty pixels fully transparent
#[test]
fn test_transparent_canvas_stays_clear() {
    let mut sim = simulation(small_config());
    sim.update(DT).unwrap();
    assert!(sim.device().screen().data().iter().all(|t| t.w == 0.0));
    assert_eq!(sim.device().stats().draws_of(ShaderKind::Color), 0);
}

/// Test that missing render formats fall back through the chain
#[test]
fn test_format_fallback_chain() {
    let caps = CpuCapabilities::default().without_format(TextureFormat::R16Float);
    let sim = FluidSimulation::new(CpuDevice::with_capabilities(64, 64, caps), small_config())
        .unwrap();
    assert_eq!(sim.formats().r, TextureFormat::Rg16Float);
    assert_eq!(sim.formats().rg, TextureFormat::Rg16Float);

    let caps = CpuCapabilities::default()
        .without_format(TextureFormat::R16Float)
        .without_format(TextureFormat::Rg16Float)
        .without_format(TextureFormat::Rgba16Float);
    let sim = FluidSimulation::new(CpuDevice::with_capabilities(64, 64, caps), small_config())
        .unwrap();
    assert_eq!(sim.formats().r, TextureFormat::Rgba8Unorm);
    assert_eq!(sim.formats().rgba, TextureFormat::Rgba8Unorm);

    let caps = CpuCapabilities {
        render_formats: Default::default(),
        linear_filtering: true,
    };
    let result = FluidSimulation::new(CpuDevice::with_capabilities(64, 64, caps), small_config());
    assert!(matches!(result, Err(FluidError::NoRenderableFormat)));
}

/// Test the default policy when linear filtering is unavailable
#[test]
fn test_filtering_fallback_policy() {
    let caps = CpuCapabilities::default().without_linear_filtering();
    let config = SimulationConfig {
        dye_resolution: 1440,
        shading: true,
        ..small_config()
    };
    let sim = FluidSimulation::new(CpuDevice::with_capabilities(64, 64, caps), config).unwrap();

    let settings = sim.settings();
    assert!(settings.manual_filtering);
    assert_eq!(settings.dye_resolution, 256);
    assert!(!settings.shading);
    assert_eq!(sim.fields().dye.height(), 256);

    let (_, advection) = sim
        .device()
        .program_info(sim.programs().advection.id())
        .unwrap();
    assert!(advection.manual_filtering);
    let display = sim.programs().display.active().unwrap().id();
    assert!(!sim.device().program_info(display).unwrap().1.shading);
}

/// Test that each fallback degradation can be turned off on its own
#[test]
fn test_filtering_fallback_is_configurable() {
    let caps = CpuCapabilities::default().without_linear_filtering();
    let config = SimulationConfig {
        shading: true,
        filtering_fallback: FilteringFallback {
            dye_resolution: None,
            disable_shading: false,
        },
        ..small_config()
    };
    let mut sim = FluidSimulation::new(CpuDevice::with_capabilities(64, 64, caps), config).unwrap();

    let settings = *sim.settings();
    assert!(settings.manual_filtering);
    assert_eq!(settings.dye_resolution, 48);
    assert!(settings.shading);
    sim.update(DT).unwrap();
}

/// Test that display variants compile once and are reused
#[test]
fn test_shading_variants_are_cached() {
    let mut sim = simulation(small_config());
    assert_eq!(sim.programs().display.variant_count(), 1);
    let shaded = sim.programs().display.active().unwrap().id();

    sim.set_shading(false);
    assert_eq!(sim.programs().display.variant_count(), 2);
    let flat = sim.programs().display.active().unwrap().id();
    assert_ne!(shaded, flat);
    assert!(!sim.settings().shading);

    sim.set_shading(true);
    assert_eq!(sim.programs().display.variant_count(), 2);
    assert_eq!(sim.programs().display.active().unwrap().id(), shaded);
    assert!(sim.device().program_info(shaded).unwrap().1.shading);
}

/// Test that a failed variant compile keeps the current display program
#[test]
fn test_shading_compile_failure_keeps_variant() {
    let config = SimulationConfig {
        shading: false,
        ..small_config()
    };
    let mut sim = simulation(config);
    let before = sim.programs().display.active().unwrap().id();

    sim.device_mut().fail_keyword(SHADING);
    sim.set_shading(true);

    assert_eq!(sim.programs().display.active().unwrap().id(), before);
    assert!(!sim.settings().shading);
    sim.update(DT).unwrap();
}

/// Test that a shader failure aborts construction with the failing kind
#[test]
fn test_init_fails_on_shader_error() {
    let mut device = CpuDevice::new(64, 64);
    device.fail_shader(ShaderKind::Vorticity);
    let result = FluidSimulation::new(device, small_config());
    assert!(matches!(
        result,
        Err(FluidError::Shader(ShaderError::Compile {
            kind: ShaderKind::Vorticity,
            ..
        }))
    ));
}

/// Test that invalid configs are rejected before touching the device
#[test]
fn test_init_rejects_invalid_config() {
    let config = SimulationConfig {
        sim_resolution: 0,
        ..small_config()
    };
    let result = FluidSimulation::new(CpuDevice::new(64, 64), config);
    assert!(matches!(result, Err(FluidError::Config(_))));
}

/// Test that destroy releases every texture the simulation allocated
#[test]
fn test_destroy_releases_all_textures() {
    let mut sim = simulation(small_config());
    sim.device_mut().set_drawable_size(80, 40);
    sim.update(DT).unwrap();

    let device = sim.destroy();
    assert_eq!(device.live_textures(), 0);
    assert_eq!(device.stats().textures_created, device.stats().textures_released);
}

/// Test that a lost device surfaces as an error from update
#[test]
fn test_device_loss_propagates() {
    let mut sim = simulation(small_config());
    sim.device_mut().lose();
    assert!(matches!(sim.update(DT), Err(FluidError::Device(_))));
}

/// Test that pointer colors cycle at the configured speed
#[test]
fn test_color_cycle_recolors_pointers() {
    let config = SimulationConfig {
        color_update_speed: 10.0,
        ..small_config()
    };
    let mut sim = simulation(config);
    let initial = sim.pointers().pointers()[0].color;

    // 0.05 * 10 = 0.5, below the wrap threshold
    sim.update_colors(0.05);
    assert_eq!(sim.pointers().pointers()[0].color, initial);

    sim.update_colors(0.06);
    assert_ne!(sim.pointers().pointers()[0].color, initial);
}

/// Test that the drawable size reported by the device drives the canvas
#[test]
fn test_canvas_tracks_device() {
    let sim = simulation(small_config());
    assert_eq!(sim.canvas_size(), sim.device().drawable_size());
}
