//! Renderer abstraction layer
//!
//! Common traits and types implemented by the wgpu and Vulkan renderers,
//! plus a GPU-less recording renderer for tests.
//!
//! # Available Renderers
//!
//! - `wgpu_backend`: cross-platform renderer using wgpu
//! - `vulkan`: native Vulkan renderer using ash (not on wasm)
//! - `dummy`: records calls instead of drawing

pub mod dummy;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

#[cfg(not(target_arch = "wasm32"))]
pub mod vulkan;

pub use traits::*;
pub use types::*;

use crate::resources::{TextureData, Vertex};
use crate::BackendType;
use std::sync::Arc;
use winit::window::Window as WinitWindow;
use wgpu_backend::WgpuRenderer;

#[cfg(not(target_arch = "wasm32"))]
use vulkan::VulkanRenderer;

/// The renderer currently driving the window.
///
/// Only one exists at a time; switching backends drops the old value before
/// the new one is created.
pub enum ActiveRenderer {
    Wgpu(WgpuRenderer),
    #[cfg(not(target_arch = "wasm32"))]
    Vulkan(VulkanRenderer),
}

impl ActiveRenderer {
    /// Create a renderer of the requested type for `window`
    pub fn create(
        backend: BackendType,
        window: Arc<WinitWindow>,
        settings: &RendererSettings,
    ) -> RendererResult<Self> {
        let renderer = match backend {
            BackendType::Wgpu => ActiveRenderer::Wgpu(WgpuRenderer::create(window, settings)?),
            #[cfg(not(target_arch = "wasm32"))]
            BackendType::Vulkan => {
                ActiveRenderer::Vulkan(VulkanRenderer::create(window, settings)?)
            }
            #[cfg(target_arch = "wasm32")]
            BackendType::Vulkan => {
                return Err(RendererError::InitializationFailed(
                    "Vulkan renderer not available on web".into(),
                ))
            }
        };
        log::info!("Using {}", renderer.device_info().description());
        Ok(renderer)
    }
}

macro_rules! dispatch {
    ($self:ident, $r:ident => $call:expr) => {
        match $self {
            ActiveRenderer::Wgpu($r) => $call,
            #[cfg(not(target_arch = "wasm32"))]
            ActiveRenderer::Vulkan($r) => $call,
        }
    };
}

impl Renderer for ActiveRenderer {
    fn api(&self) -> BackendType {
        dispatch!(self, r => r.api())
    }

    fn device_info(&self) -> &DeviceInfo {
        dispatch!(self, r => r.device_info())
    }

    fn surface_size(&self) -> (u32, u32) {
        dispatch!(self, r => r.surface_size())
    }

    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        dispatch!(self, r => r.resize(width, height))
    }

    fn clear(&mut self) -> RendererResult<()> {
        dispatch!(self, r => r.clear())
    }

    fn present(&mut self) -> RendererResult<()> {
        dispatch!(self, r => r.present())
    }

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> RendererResult<VertexBuffer> {
        dispatch!(self, r => r.create_vertex_buffer(vertices))
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> RendererResult<IndexBuffer> {
        dispatch!(self, r => r.create_index_buffer(indices))
    }

    fn upload_texture_2d(&mut self, data: &TextureData) -> RendererResult<Texture2D> {
        dispatch!(self, r => r.upload_texture_2d(data))
    }

    fn create_constant_buffer(&mut self, label: &str, size: u64) -> RendererResult<ConstantBuffer> {
        dispatch!(self, r => r.create_constant_buffer(label, size))
    }

    fn update_constant_buffer(&mut self, buffer: &ConstantBuffer, data: &[u8]) {
        dispatch!(self, r => r.update_constant_buffer(buffer, data))
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> RendererResult<Shader> {
        dispatch!(self, r => r.create_shader(desc))
    }

    fn release_vertex_buffer(&mut self, buffer: VertexBuffer) {
        dispatch!(self, r => r.release_vertex_buffer(buffer))
    }

    fn release_index_buffer(&mut self, buffer: IndexBuffer) {
        dispatch!(self, r => r.release_index_buffer(buffer))
    }

    fn release_texture_2d(&mut self, texture: Texture2D) {
        dispatch!(self, r => r.release_texture_2d(texture))
    }

    fn release_constant_buffer(&mut self, buffer: ConstantBuffer) {
        dispatch!(self, r => r.release_constant_buffer(buffer))
    }

    fn release_shader(&mut self, shader: Shader) {
        dispatch!(self, r => r.release_shader(shader))
    }

    fn apply_shader(&mut self, shader: &Shader) {
        dispatch!(self, r => r.apply_shader(shader))
    }

    fn apply_vertex_buffer(&mut self, buffer: &VertexBuffer) {
        dispatch!(self, r => r.apply_vertex_buffer(buffer))
    }

    fn apply_index_buffer(&mut self, buffer: &IndexBuffer) {
        dispatch!(self, r => r.apply_index_buffer(buffer))
    }

    fn apply_constant_buffer(&mut self, slot: ConstantSlot, buffer: &ConstantBuffer) {
        dispatch!(self, r => r.apply_constant_buffer(slot, buffer))
    }

    fn apply_texture_2d(&mut self, slot: TextureSlot, texture: &Texture2D) {
        dispatch!(self, r => r.apply_texture_2d(slot, texture))
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        dispatch!(self, r => r.set_primitive_topology(topology))
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        dispatch!(self, r => r.draw_indexed(index_count, start_index, base_vertex))
    }

    fn create_anti_aliasing_target(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        dispatch!(self, r => r.create_anti_aliasing_target(level, width, height))
    }

    fn msaa_level(&self) -> u32 {
        dispatch!(self, r => r.msaa_level())
    }

    fn supported_msaa_levels(&self) -> &[u32] {
        dispatch!(self, r => r.supported_msaa_levels())
    }

    fn toggle_wireframe(&mut self, enabled: bool) {
        dispatch!(self, r => r.toggle_wireframe(enabled))
    }

    fn is_wireframe(&self) -> bool {
        dispatch!(self, r => r.is_wireframe())
    }

    fn max_anisotropic_filter_level(&self) -> u32 {
        dispatch!(self, r => r.max_anisotropic_filter_level())
    }

    fn set_anisotropic_filter(&mut self, level: u32) -> RendererResult<()> {
        dispatch!(self, r => r.set_anisotropic_filter(level))
    }

    fn anisotropic_filter(&self) -> u32 {
        dispatch!(self, r => r.anisotropic_filter())
    }

    fn set_vsync(&mut self, enabled: bool) -> RendererResult<()> {
        dispatch!(self, r => r.set_vsync(enabled))
    }

    fn vsync(&self) -> bool {
        dispatch!(self, r => r.vsync())
    }
}
