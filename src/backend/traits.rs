//! Core renderer abstraction
//!
//! The [`Renderer`] trait is the contract both the wgpu and Vulkan backends
//! implement. Resources are handed out as owner types that wrap an opaque
//! backend handle; they are not `Clone` and must be given back to the same
//! renderer through the matching `release_*` call before it is dropped.

use crate::backend::types::*;
use crate::resources::{ResourceError, TextureData, Vertex};
use crate::BackendType;
use std::path::Path;
use thiserror::Error;

/// Renderer error type
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to initialize renderer: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type RendererResult<T> = Result<T, RendererError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture (with its default view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

impl BufferHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl TextureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl ShaderHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// GPU-resident vertex buffer
#[derive(Debug, PartialEq, Eq)]
pub struct VertexBuffer {
    pub(crate) handle: BufferHandle,
    pub(crate) vertex_count: u32,
}

impl VertexBuffer {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// GPU-resident 32-bit index buffer
#[derive(Debug, PartialEq, Eq)]
pub struct IndexBuffer {
    pub(crate) handle: BufferHandle,
    pub(crate) index_count: u32,
}

impl IndexBuffer {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Uniform buffer updated from the CPU every frame
#[derive(Debug, PartialEq, Eq)]
pub struct ConstantBuffer {
    pub(crate) handle: BufferHandle,
    pub(crate) size: u64,
}

impl ConstantBuffer {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Sampled 2D texture with its full mip chain
#[derive(Debug, PartialEq, Eq)]
pub struct Texture2D {
    pub(crate) handle: TextureHandle,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) mip_levels: u32,
    pub(crate) format: TextureFormat,
}

impl Texture2D {
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

/// Compiled vertex + fragment program
#[derive(Debug, PartialEq, Eq)]
pub struct Shader {
    pub(crate) handle: ShaderHandle,
}

impl Shader {
    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }
}

/// Renderer contract implemented by every backend.
///
/// A value of an implementing type is always fully created; construction
/// happens through each backend's `create` function and teardown through
/// `Drop`. Resources created by a renderer must be released through it
/// before it is dropped.
pub trait Renderer {
    /// Which API this renderer drives
    fn api(&self) -> BackendType;

    /// Name and memory of the device picked at creation
    fn device_info(&self) -> &DeviceInfo;

    /// Current size of the presentable surface
    fn surface_size(&self) -> (u32, u32);

    /// Recreate the surface, depth and multisample targets at a new size
    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()>;

    /// Bind the active target and clear colour and depth
    fn clear(&mut self) -> RendererResult<()>;

    /// Resolve the multisample target if needed, then present
    fn present(&mut self) -> RendererResult<()>;

    // Resource creation

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> RendererResult<VertexBuffer>;

    fn create_index_buffer(&mut self, indices: &[u32]) -> RendererResult<IndexBuffer>;

    /// Upload an already decoded texture, every mip level included
    fn upload_texture_2d(&mut self, data: &TextureData) -> RendererResult<Texture2D>;

    /// Decode a texture file (DDS or any common image format) and upload it
    fn create_texture_2d(&mut self, path: &Path) -> RendererResult<Texture2D> {
        let data = TextureData::load(path)?;
        self.upload_texture_2d(&data)
    }

    fn create_constant_buffer(&mut self, label: &str, size: u64) -> RendererResult<ConstantBuffer>;

    /// Overwrite a constant buffer from offset zero
    fn update_constant_buffer(&mut self, buffer: &ConstantBuffer, data: &[u8]);

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> RendererResult<Shader>;

    // Resource release

    fn release_vertex_buffer(&mut self, buffer: VertexBuffer);

    fn release_index_buffer(&mut self, buffer: IndexBuffer);

    fn release_texture_2d(&mut self, texture: Texture2D);

    fn release_constant_buffer(&mut self, buffer: ConstantBuffer);

    fn release_shader(&mut self, shader: Shader);

    // Binding and drawing

    fn apply_shader(&mut self, shader: &Shader);

    fn apply_vertex_buffer(&mut self, buffer: &VertexBuffer);

    fn apply_index_buffer(&mut self, buffer: &IndexBuffer);

    fn apply_constant_buffer(&mut self, slot: ConstantSlot, buffer: &ConstantBuffer);

    fn apply_texture_2d(&mut self, slot: TextureSlot, texture: &Texture2D);

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);

    /// Draw `index_count` indices starting at `start_index`, offsetting every
    /// fetched index by `base_vertex`
    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32);

    // Raster state and capabilities

    /// Level 0 (or 1) disables multisampling. Any other level must be one of
    /// [`supported_msaa_levels`](Renderer::supported_msaa_levels).
    fn create_anti_aliasing_target(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
    ) -> RendererResult<()>;

    /// Active sample count, 0 when multisampling is off
    fn msaa_level(&self) -> u32;

    /// Sample counts above 1 the device supports, ascending
    fn supported_msaa_levels(&self) -> &[u32];

    fn max_msaa_level(&self) -> u32 {
        self.supported_msaa_levels().last().copied().unwrap_or(0)
    }

    fn toggle_wireframe(&mut self, enabled: bool);

    fn is_wireframe(&self) -> bool;

    fn max_anisotropic_filter_level(&self) -> u32;

    /// Clamped to `1..=max_anisotropic_filter_level()`
    fn set_anisotropic_filter(&mut self, level: u32) -> RendererResult<()>;

    fn anisotropic_filter(&self) -> u32;

    fn set_vsync(&mut self, enabled: bool) -> RendererResult<()>;

    fn vsync(&self) -> bool;
}

/// Normalizes a requested MSAA level against a supported list.
///
/// Returns `Ok(None)` when multisampling should be disabled.
pub(crate) fn resolve_msaa_level(level: u32, supported: &[u32]) -> RendererResult<Option<u32>> {
    if level <= 1 {
        return Ok(None);
    }
    if supported.contains(&level) {
        Ok(Some(level))
    } else {
        Err(RendererError::InvalidParameter(format!(
            "MSAA level {} is not supported (supported: {:?})",
            level, supported
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RendererError::InvalidParameter("level 3".into());
        assert_eq!(err.to_string(), "Invalid parameter: level 3");
        let err = RendererError::SurfaceLost;
        assert_eq!(err.to_string(), "Surface lost");
    }

    #[test]
    fn test_resolve_msaa_level() {
        let supported = [2, 4, 8];
        assert_eq!(resolve_msaa_level(0, &supported).unwrap(), None);
        assert_eq!(resolve_msaa_level(1, &supported).unwrap(), None);
        assert_eq!(resolve_msaa_level(4, &supported).unwrap(), Some(4));
        assert!(matches!(
            resolve_msaa_level(16, &supported),
            Err(RendererError::InvalidParameter(_))
        ));
    }
}
