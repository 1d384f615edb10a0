//! Window management using winit

use std::sync::Arc;
use winit::{
    dpi::{PhysicalPosition, PhysicalSize},
    error::OsError,
    event::WindowEvent,
    event_loop::EventLoopWindowTarget,
    window::{Window as WinitWindow, WindowBuilder, WindowId},
};

/// Placement of a window, captured before a backend switch and restored on
/// the replacement window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
    /// Outer position, when the platform reports one
    pub position: Option<(i32, i32)>,
    pub maximized: bool,
}

impl WindowGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            position: None,
            maximized: false,
        }
    }
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    resized: bool,
}

impl Window {
    /// Create a window placed according to `geometry`
    pub fn new(
        target: &EventLoopWindowTarget<()>,
        title: &str,
        geometry: WindowGeometry,
    ) -> Result<Self, OsError> {
        let mut builder = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(geometry.width.max(1), geometry.height.max(1)))
            .with_maximized(geometry.maximized);
        if let Some((x, y)) = geometry.position {
            builder = builder.with_position(PhysicalPosition::new(x, y));
        }
        let window = Arc::new(builder.build(target)?);

        Ok(Self {
            window,
            resized: false,
        })
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    /// Current inner size in pixels, queried from the platform
    pub fn dimensions(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Capture size, position and maximized state
    pub fn geometry(&self) -> WindowGeometry {
        let (width, height) = self.dimensions();
        WindowGeometry {
            width,
            height,
            position: self.window.outer_position().ok().map(|p| (p.x, p.y)),
            maximized: self.window.is_maximized(),
        }
    }

    /// Re-apply a captured geometry
    pub fn restore_geometry(&self, geometry: &WindowGeometry) {
        if geometry.maximized {
            self.window.set_maximized(true);
            return;
        }
        if let Some((x, y)) = geometry.position {
            self.window.set_outer_position(PhysicalPosition::new(x, y));
        }
        let _ = self
            .window
            .request_inner_size(PhysicalSize::new(geometry.width, geometry.height));
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    /// Check if window was resized since last frame
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Clear the resize flag
    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        if let WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } = event {
            self.resized = true;
        }
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
