//! Viewer application: frame loop, input mapping and backend switching

use crate::backend::{ActiveRenderer, Renderer, RendererError, RendererResult, Shader};
use crate::model::{Model, ModelError};
use crate::scene::{Camera, CameraInput, OrbitController, Projection};
use crate::window::{Window, WindowGeometry};
use crate::{shader, BackendType, RendererSettings, ViewerConfig};
use glam::{Vec2, Vec3};
use std::time::Instant;
use thiserror::Error;
use winit::{
    error::{EventLoopError, OsError},
    event::{ElementState, Event, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
};

/// Anisotropic filter levels cycled through by the viewer
const ANISOTROPY_LEVELS: [u32; 5] = [1, 2, 4, 8, 16];

/// Pixels of trackpad scrolling that count as one wheel notch
const PIXELS_PER_LINE: f32 = 40.0;

/// Errors that stop the viewer
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Event loop error: {0}")]
    EventLoop(#[from] EventLoopError),
    #[error("Failed to create window: {0}")]
    Window(#[from] OsError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Something the operator asked for from the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    SelectBackend(BackendType),
    ToggleWireframe,
    CycleMsaa,
    CycleAnisotropy,
    ToggleVsync,
    Quit,
}

impl ViewerCommand {
    pub fn from_key(key: KeyCode) -> Option<Self> {
        Some(match key {
            KeyCode::F1 => ViewerCommand::SelectBackend(BackendType::Wgpu),
            KeyCode::F2 => ViewerCommand::SelectBackend(BackendType::Vulkan),
            KeyCode::KeyW => ViewerCommand::ToggleWireframe,
            KeyCode::KeyM => ViewerCommand::CycleMsaa,
            KeyCode::KeyA => ViewerCommand::CycleAnisotropy,
            KeyCode::KeyV => ViewerCommand::ToggleVsync,
            KeyCode::Escape => ViewerCommand::Quit,
            _ => return None,
        })
    }
}

/// Off, then each supported level in turn, then off again
pub fn next_msaa_level(current: u32, supported: &[u32]) -> u32 {
    if current <= 1 {
        return supported.first().copied().unwrap_or(0);
    }
    supported
        .iter()
        .copied()
        .find(|&level| level > current)
        .unwrap_or(0)
}

/// Next power-of-two filter level up to `max`, wrapping to 1
pub fn next_anisotropy(current: u32, max: u32) -> u32 {
    ANISOTROPY_LEVELS
        .iter()
        .copied()
        .find(|&level| level > current && level <= max)
        .unwrap_or(1)
}

/// Apply a renderer setting command. Backend selection and quitting are
/// handled by the application and ignored here.
pub fn apply_command<R: Renderer + ?Sized>(
    renderer: &mut R,
    command: ViewerCommand,
) -> RendererResult<()> {
    match command {
        ViewerCommand::ToggleWireframe => {
            let enabled = !renderer.is_wireframe();
            renderer.toggle_wireframe(enabled);
            log::info!("Wireframe {}", if renderer.is_wireframe() { "on" } else { "off" });
        }
        ViewerCommand::CycleMsaa => {
            let level = next_msaa_level(renderer.msaa_level(), renderer.supported_msaa_levels());
            let (width, height) = renderer.surface_size();
            renderer.create_anti_aliasing_target(level, width, height)?;
        }
        ViewerCommand::CycleAnisotropy => {
            let level = next_anisotropy(
                renderer.anisotropic_filter(),
                renderer.max_anisotropic_filter_level(),
            );
            renderer.set_anisotropic_filter(level)?;
        }
        ViewerCommand::ToggleVsync => {
            let enabled = !renderer.vsync();
            renderer.set_vsync(enabled)?;
        }
        ViewerCommand::SelectBackend(_) | ViewerCommand::Quit => {}
    }
    Ok(())
}

/// Run one frame: animate, clear, draw, present
pub fn draw_frame<R: Renderer + ?Sized>(
    renderer: &mut R,
    model: &mut Model,
    shader: &Shader,
    camera: &Camera,
    dt: f32,
) -> RendererResult<()> {
    model.update(dt);
    renderer.clear()?;
    model.render(renderer, shader, camera);
    renderer.present()
}

/// Counts frames and reports the rate once per second
#[derive(Debug, Clone, Default)]
pub struct FpsCounter {
    frames: u32,
    elapsed: f32,
}

impl FpsCounter {
    /// Count a frame that took `dt` seconds; returns the rate when a full
    /// second has passed
    pub fn tick(&mut self, dt: f32) -> Option<f32> {
        self.frames += 1;
        self.elapsed += dt;
        if self.elapsed < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / self.elapsed;
        self.frames = 0;
        self.elapsed = 0.0;
        Some(fps)
    }
}

/// The viewer: one window, one renderer, one shader and one model at a time
pub struct ViewerApp {
    config: ViewerConfig,
    backend: BackendType,
    settings: RendererSettings,

    // Torn down model first, window last
    model: Option<Model>,
    shader: Option<Shader>,
    renderer: Option<ActiveRenderer>,
    window: Option<Window>,

    camera: Camera,
    orbit: OrbitController,
    input: CameraInput,
    cursor: Option<Vec2>,

    last_frame: Instant,
    fps: FpsCounter,
    fatal: Option<ViewerError>,
}

impl ViewerApp {
    pub fn new(config: ViewerConfig) -> Self {
        let camera = Camera {
            projection: Projection::perspective(
                config.fov,
                config.width as f32 / config.height.max(1) as f32,
                0.1,
                1000.0,
            ),
            ..Default::default()
        };
        let orbit = OrbitController::new(Vec3::new(0.0, 1.5, 0.0), config.radius)
            .with_angles(config.yaw, config.pitch);

        Self {
            backend: config.backend,
            settings: config.renderer_settings(),
            config,
            model: None,
            shader: None,
            renderer: None,
            window: None,
            camera,
            orbit,
            input: CameraInput::default(),
            cursor: None,
            last_frame: Instant::now(),
            fps: FpsCounter::default(),
            fatal: None,
        }
    }

    /// Open the window and run until it is closed
    pub fn run(mut self) -> Result<(), ViewerError> {
        let event_loop = EventLoop::new()?;
        event_loop.run(|event, target| self.handle_event(event, target))?;
        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    fn handle_event(&mut self, event: Event<()>, target: &EventLoopWindowTarget<()>) {
        target.set_control_flow(ControlFlow::Poll);
        match event {
            Event::Resumed if self.window.is_none() => {
                let geometry = WindowGeometry::new(self.config.width, self.config.height);
                if let Err(e) = self.build(target, self.backend, geometry) {
                    self.teardown();
                    self.fail(target, e);
                }
            }
            Event::WindowEvent { window_id, event } => {
                if self.window.as_ref().map(Window::id) == Some(window_id) {
                    self.handle_window_event(event, target);
                }
            }
            Event::AboutToWait => self.frame(target),
            Event::LoopExiting => self.teardown(),
            _ => {}
        }
    }

    fn handle_window_event(&mut self, event: WindowEvent, target: &EventLoopWindowTarget<()>) {
        if let Some(window) = &mut self.window {
            window.handle_event(&event);
        }
        match event {
            WindowEvent::CloseRequested => target.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(command) = ViewerCommand::from_key(key) {
                    self.execute(command, target);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.input.orbiting = state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                if let Some(last) = self.cursor {
                    self.input.mouse_delta += position - last;
                }
                self.cursor = Some(position);
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::MouseWheel { delta, .. } => {
                self.input.scroll_delta += match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / PIXELS_PER_LINE,
                };
            }
            _ => {}
        }
    }

    fn execute(&mut self, command: ViewerCommand, target: &EventLoopWindowTarget<()>) {
        match command {
            ViewerCommand::Quit => target.exit(),
            ViewerCommand::SelectBackend(backend) => self.switch_backend(target, backend),
            command => {
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                if let Err(e) = apply_command(renderer, command) {
                    log::warn!("{:?} failed: {}", command, e);
                }
            }
        }
    }

    fn frame(&mut self, target: &EventLoopWindowTarget<()>) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let (Some(window), Some(renderer), Some(shader), Some(model)) = (
            &mut self.window,
            &mut self.renderer,
            &self.shader,
            &mut self.model,
        ) else {
            return;
        };

        if window.was_resized() {
            window.clear_resize_flag();
            let (width, height) = window.dimensions();
            if let Err(e) = renderer.resize(width, height) {
                log::warn!("Resize to {}x{} failed: {}", width, height, e);
            }
            self.camera.set_aspect(width, height);
        }

        self.orbit.update(&mut self.camera, &self.input);
        self.input.reset_deltas();

        match draw_frame(renderer, model, shader, &self.camera, dt) {
            Ok(()) => {}
            Err(RendererError::SurfaceLost | RendererError::DeviceLost) => {
                log::warn!("{} renderer lost its surface or device, rebuilding", self.backend);
                self.rebuild(target, self.backend);
                return;
            }
            Err(e) => {
                self.fail(target, e.into());
                return;
            }
        }

        if let Some(fps) = self.fps.tick(dt) {
            log::info!("{:.1} FPS ({})", fps, self.backend);
        }
    }

    /// Tear the whole stack down and bring it back up on `backend`, falling
    /// back to the current backend if that fails
    fn switch_backend(&mut self, target: &EventLoopWindowTarget<()>, backend: BackendType) {
        if backend == self.backend && self.renderer.is_some() {
            return;
        }
        log::info!("Switching renderer: {} -> {}", self.backend, backend);
        self.rebuild(target, backend);
    }

    fn rebuild(&mut self, target: &EventLoopWindowTarget<()>, backend: BackendType) {
        let geometry = self
            .window
            .as_ref()
            .map(Window::geometry)
            .unwrap_or_else(|| WindowGeometry::new(self.config.width, self.config.height));
        self.capture_settings();
        self.teardown();

        let previous = self.backend;
        let Err(e) = self.build(target, backend, geometry) else {
            return;
        };
        self.teardown();
        if backend == previous {
            self.fail(target, e);
            return;
        }

        log::error!(
            "Failed to start {} renderer: {}; falling back to {}",
            backend,
            e,
            previous
        );
        if let Err(e) = self.build(target, previous, geometry) {
            self.teardown();
            self.fail(target, e);
        }
    }

    /// Create window, renderer, shader and model. On error whatever was
    /// created stays in place for [`Self::teardown`].
    fn build(
        &mut self,
        target: &EventLoopWindowTarget<()>,
        backend: BackendType,
        geometry: WindowGeometry,
    ) -> Result<(), ViewerError> {
        let title = format!("{} ({})", self.config.title, backend);
        let window = self.window.insert(Window::new(target, &title, geometry)?);

        // Multisampling is applied afterwards, the new device may not support
        // the level the old one ran at
        let settings = RendererSettings {
            msaa_level: 0,
            ..self.settings
        };
        let renderer = self
            .renderer
            .insert(ActiveRenderer::create(backend, window.window_arc(), &settings)?);

        let (width, height) = window.dimensions();
        if self.settings.msaa_level > 1 {
            if let Err(e) = renderer.create_anti_aliasing_target(self.settings.msaa_level, width, height) {
                log::warn!("Keeping MSAA off on {}: {}", backend, e);
            }
        }

        self.shader = Some(renderer.create_shader(&shader::descriptor())?);
        self.model = Some(Model::from_config(renderer, &self.config)?);

        window.restore_geometry(&geometry);
        window.set_title(&format!(
            "{} - {}",
            self.config.title,
            renderer.device_info().description()
        ));
        self.camera.set_aspect(width, height);
        self.backend = backend;
        self.last_frame = Instant::now();
        Ok(())
    }

    /// Remember renderer state so the next renderer starts with it
    fn capture_settings(&mut self) {
        if let Some(renderer) = &self.renderer {
            self.settings = RendererSettings {
                vsync: renderer.vsync(),
                msaa_level: renderer.msaa_level(),
                anisotropy: renderer.anisotropic_filter(),
                wireframe: renderer.is_wireframe(),
            };
        }
    }

    /// Release resources, then drop the renderer, then close the window
    fn teardown(&mut self) {
        if let Some(renderer) = &mut self.renderer {
            if let Some(model) = self.model.take() {
                model.release(renderer);
            }
            if let Some(shader) = self.shader.take() {
                renderer.release_shader(shader);
            }
        }
        self.renderer = None;
        self.window = None;
        self.input = CameraInput::default();
        self.cursor = None;
    }

    fn fail(&mut self, target: &EventLoopWindowTarget<()>, error: ViewerError) {
        log::error!("{}", error);
        self.fatal = Some(error);
        target.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::off_to_first(0, &[2, 4, 8], 2)]
    #[case::one_means_off(1, &[4, 8], 4)]
    #[case::step(4, &[2, 4, 8], 8)]
    #[case::wrap_to_off(8, &[2, 4, 8], 0)]
    #[case::none_supported(0, &[], 0)]
    fn test_next_msaa_level(#[case] current: u32, #[case] supported: &[u32], #[case] expected: u32) {
        assert_eq!(next_msaa_level(current, supported), expected);
    }

    #[rstest]
    #[case(1, 16, 2)]
    #[case(8, 16, 16)]
    #[case(16, 16, 1)]
    #[case(4, 4, 1)]
    #[case(1, 1, 1)]
    fn test_next_anisotropy(#[case] current: u32, #[case] max: u32, #[case] expected: u32) {
        assert_eq!(next_anisotropy(current, max), expected);
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(
            ViewerCommand::from_key(KeyCode::F2),
            Some(ViewerCommand::SelectBackend(BackendType::Vulkan))
        );
        assert_eq!(ViewerCommand::from_key(KeyCode::KeyM), Some(ViewerCommand::CycleMsaa));
        assert_eq!(ViewerCommand::from_key(KeyCode::KeyQ), None);
    }

    #[test]
    fn test_fps_counter_reports_once_per_second() {
        let mut fps = FpsCounter::default();
        assert_eq!(fps.tick(0.5), None);
        assert_eq!(fps.tick(0.5), Some(2.0));
        assert_eq!(fps.tick(0.25), None);
    }
}
