//! Model Viewer - an animated model viewer with interchangeable GPU backends
//!
//! Two renderers implement the same [`backend::Renderer`] contract:
//! - **wgpu**: cross-platform, high-level GPU abstraction
//! - **Vulkan**: direct Vulkan API via ash (native only)
//!
//! The viewer can switch between them at runtime. Models are skinned on the
//! GPU from a bone palette produced by [`animation::SkeletalAnimator`].

pub mod animation;
pub mod app;
pub mod backend;
pub mod model;
pub mod resources;
pub mod scene;
pub mod shader;
pub mod window;

pub use app::ViewerApp;
pub use backend::{ActiveRenderer, Renderer, RendererError, RendererSettings};
pub use model::{Model, ModelError};
pub use window::Window;

use std::path::PathBuf;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// wgpu backend - cross-platform, easier to use
    #[default]
    Wgpu,
    /// Vulkan backend via ash - maximum control (native only)
    Vulkan,
}

impl BackendType {
    pub fn name(&self) -> &'static str {
        match self {
            BackendType::Wgpu => "wgpu",
            BackendType::Vulkan => "Vulkan",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the viewer
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Which backend to start with
    pub backend: BackendType,
    pub vsync: bool,
    /// 0 disables multisampling
    pub msaa_level: u32,
    pub anisotropy: u32,
    pub wireframe: bool,
    /// Binary mesh file; the built-in demo column is shown when unset
    pub model_path: Option<PathBuf>,
    /// Diffuse map; a white texel is bound when unset
    pub diffuse_texture: Option<PathBuf>,
    /// Tangent-space normal map; a flat normal is bound when unset
    pub normal_texture: Option<PathBuf>,
    /// Animation clip to play
    pub clip: String,
    pub time_scale: f32,
    /// Initial camera elevation in degrees
    pub pitch: f32,
    /// Initial camera azimuth in degrees
    pub yaw: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    /// Initial orbit distance
    pub radius: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "Model Viewer".to_string(),
            width: 1280,
            height: 720,
            backend: BackendType::Wgpu,
            vsync: true,
            msaa_level: 0,
            anisotropy: 1,
            wireframe: false,
            model_path: None,
            diffuse_texture: None,
            normal_texture: None,
            clip: "Take1".to_string(),
            time_scale: 1.0,
            pitch: 30.0,
            yaw: 0.0,
            fov: 50.0,
            radius: 8.0,
        }
    }
}

impl ViewerConfig {
    /// Renderer state to start a backend with
    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            vsync: self.vsync,
            msaa_level: self.msaa_level,
            anisotropy: self.anisotropy,
            wireframe: self.wireframe,
        }
    }
}
