use std::sync::Arc;

use fluid::{FluidError, FluidSimulation, FrameClock, PointerId, SimulationConfig};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::gpu::{is_device_lost, GpuContext, WgpuDevice};

/// Keyboard actions the effect responds to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    RandomSplats,
    ToggleShading,
    Close,
}

pub fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::Named(NamedKey::Space) => Some(KeyAction::RandomSplats),
        Key::Named(NamedKey::Escape) => Some(KeyAction::Close),
        Key::Character(ch) if ch.eq_ignore_ascii_case("s") => Some(KeyAction::ToggleShading),
        _ => None,
    }
}

/// Opens the window and runs the effect until it is closed.
pub fn run(config: SimulationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let event_loop = EventLoop::new()?;
    let mut runner = SplashRunner::new(config);
    event_loop.run_app(&mut runner)?;
    match runner.error.take() {
        Some(e) => Err(Box::new(e)),
        None => Ok(()),
    }
}

struct SplashRunner {
    config: SimulationConfig,
    window: Option<Arc<Window>>,
    sim: Option<FluidSimulation<WgpuDevice>>,
    clock: FrameClock,
    cursor: (f32, f32),
    error: Option<FluidError>,
}

impl SplashRunner {
    fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            window: None,
            sim: None,
            clock: FrameClock::new(),
            cursor: (0.0, 0.0),
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), FluidError> {
        let window = event_loop
            .create_window(
                Window::default_attributes()
                    .with_title("Splash")
                    .with_transparent(self.config.transparent)
                    .with_inner_size(winit::dpi::LogicalSize::new(1280, 720)),
            )
            .map_err(|e| FluidError::Device(e.to_string()))?;
        let window = Arc::new(window);

        let ctx = pollster::block_on(GpuContext::new(window.clone()))?;
        let sim = FluidSimulation::new(WgpuDevice::new(ctx), self.config.clone())?;
        log::info!("Fluid ready: {:?}", sim.settings());

        window.request_redraw();
        self.window = Some(window);
        self.sim = Some(sim);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: FluidError) {
        log::error!("{}", error);
        self.error = Some(error);
        self.shutdown(event_loop);
    }

    /// Releases every GPU resource before the window goes away.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(sim) = self.sim.take() {
            drop(sim.destroy());
        }
        self.window = None;
        event_loop.exit();
    }

    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(sim) = &mut self.sim else {
            return;
        };
        let dt = self.clock.tick();
        if let Err(e) = sim.update(dt) {
            self.fail(event_loop, e);
            return;
        }
        if is_device_lost() {
            self.fail(event_loop, FluidError::Device("GPU device lost".to_string()));
        }
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, action: KeyAction) {
        let Some(sim) = &mut self.sim else {
            return;
        };
        match action {
            KeyAction::RandomSplats => {
                let amount = sim.pointers_mut().random_splat_count();
                sim.queue_random_splats(amount);
            }
            KeyAction::ToggleShading => {
                let shading = !sim.config().shading;
                sim.set_shading(shading);
                log::info!("Shading {}", if shading { "on" } else { "off" });
            }
            KeyAction::Close => self.shutdown(event_loop),
        }
    }
}

impl ApplicationHandler for SplashRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.shutdown(event_loop);
                return;
            }
            WindowEvent::RedrawRequested => {
                self.frame(event_loop);
                return;
            }
            WindowEvent::KeyboardInput {
                event,
                is_synthetic: false,
                ..
            } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    if let Some(action) = key_action(&event.logical_key) {
                        self.on_key(event_loop, action);
                    }
                }
                return;
            }
            _ => {}
        }

        let Some(sim) = &mut self.sim else {
            return;
        };
        match event {
            WindowEvent::Resized(size) => {
                sim.device_mut().resize(size.width, size.height);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x as f32, position.y as f32);
                sim.pointers_mut()
                    .pointer_move(PointerId::Mouse, self.cursor.0, self.cursor.1);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => {
                    sim.pointers_mut()
                        .pointer_down(PointerId::Mouse, self.cursor.0, self.cursor.1);
                }
                ElementState::Released => sim.pointers_mut().pointer_up(PointerId::Mouse),
            },
            WindowEvent::Touch(touch) => {
                let id = PointerId::Touch(touch.id);
                let (x, y) = (touch.location.x as f32, touch.location.y as f32);
                let pointers = sim.pointers_mut();
                match touch.phase {
                    TouchPhase::Started => pointers.pointer_down(id, x, y),
                    TouchPhase::Moved => pointers.pointer_move(id, x, y),
                    TouchPhase::Ended | TouchPhase::Cancelled => pointers.pointer_up(id),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
