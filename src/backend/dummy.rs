//! Recording renderer for testing without a GPU.
//!
//! Performs no GPU work. Every clear, present and draw is recorded together
//! with the state bound at the time, and live resources are counted so tests
//! can check that nothing leaks across releases and MSAA changes.

use super::traits::*;
use super::types::*;
use crate::resources::{TextureData, Vertex};
use crate::BackendType;
use std::collections::HashMap;

/// One indexed draw with the state it was issued under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCall {
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
    pub shader: Option<ShaderHandle>,
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub constants: [Option<BufferHandle>; ConstantSlot::COUNT],
    pub textures: [Option<TextureHandle>; TextureSlot::COUNT],
    pub topology: PrimitiveTopology,
    pub wireframe: bool,
    pub samples: u32,
}

/// Something the renderer was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Resize { width: u32, height: u32 },
    Clear { width: u32, height: u32, samples: u32 },
    Draw(DrawCall),
    Present { width: u32, height: u32, resolved: bool },
}

/// Live resource counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub vertex_buffers: usize,
    pub index_buffers: usize,
    pub constant_buffers: usize,
    pub textures: usize,
    pub shaders: usize,
    /// Multisample colour and depth targets
    pub multisample_targets: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.vertex_buffers
            + self.index_buffers
            + self.constant_buffers
            + self.textures
            + self.shaders
            + self.multisample_targets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferKind {
    Vertex,
    Index,
    Constant,
}

#[derive(Debug, Default)]
struct BoundState {
    shader: Option<ShaderHandle>,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    constants: [Option<BufferHandle>; ConstantSlot::COUNT],
    textures: [Option<TextureHandle>; TextureSlot::COUNT],
    topology: PrimitiveTopology,
}

/// GPU-less [`Renderer`] that records what it is asked to do
#[derive(Debug)]
pub struct RecordingRenderer {
    info: DeviceInfo,
    width: u32,
    height: u32,
    supported_msaa_levels: Vec<u32>,
    max_anisotropy: u32,
    wireframe_supported: bool,

    msaa_level: u32,
    multisample_targets: usize,
    wireframe: bool,
    anisotropy: u32,
    vsync: bool,

    next_id: u64,
    buffers: HashMap<u64, BufferKind>,
    constant_data: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, TextureData>,
    shaders: HashMap<u64, ShaderDescriptor>,

    bound: BoundState,
    frame_open: bool,
    events: Vec<RecordedEvent>,
}

impl RecordingRenderer {
    /// Renderer with 2x/4x/8x MSAA, 16x anisotropy and wireframe support
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, vec![2, 4, 8], MAX_ANISOTROPY, true)
    }

    pub fn with_capabilities(
        width: u32,
        height: u32,
        msaa_levels: Vec<u32>,
        max_anisotropy: u32,
        wireframe_supported: bool,
    ) -> Self {
        Self {
            info: DeviceInfo {
                name: "Recording Renderer".to_string(),
                backend: BackendType::Wgpu,
                dedicated_video_memory: None,
            },
            width,
            height,
            supported_msaa_levels: filter_msaa_levels(msaa_levels),
            max_anisotropy: max_anisotropy.clamp(1, MAX_ANISOTROPY),
            wireframe_supported,
            msaa_level: 0,
            multisample_targets: 0,
            wireframe: false,
            anisotropy: 1,
            vsync: true,
            next_id: 1,
            buffers: HashMap::new(),
            constant_data: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            bound: BoundState::default(),
            frame_open: false,
            events: Vec::new(),
        }
    }

    /// Create with the same setup sequence the GPU backends run
    pub fn create(width: u32, height: u32, settings: &RendererSettings) -> RendererResult<Self> {
        let mut renderer = Self::new(width, height);
        renderer.apply_settings(settings)?;
        Ok(renderer)
    }

    /// Report a different API from [`Renderer::api`]
    pub fn with_api(mut self, api: BackendType) -> Self {
        self.info.backend = api;
        self
    }

    fn apply_settings(&mut self, settings: &RendererSettings) -> RendererResult<()> {
        self.vsync = settings.vsync;
        self.set_anisotropic_filter(settings.anisotropy)?;
        self.toggle_wireframe(settings.wireframe);
        let (w, h) = (self.width, self.height);
        self.create_anti_aliasing_target(settings.msaa_level, w, h)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn release_buffer(&mut self, handle: BufferHandle, kind: BufferKind) {
        let removed = self.buffers.remove(&handle.0);
        debug_assert_eq!(removed, Some(kind), "released a foreign {:?} buffer", kind);
        self.constant_data.remove(&handle.0);
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<RecordedEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.events.iter().filter_map(|e| match e {
            RecordedEvent::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn live_resources(&self) -> ResourceCounts {
        let count = |kind| self.buffers.values().filter(|&&k| k == kind).count();
        ResourceCounts {
            vertex_buffers: count(BufferKind::Vertex),
            index_buffers: count(BufferKind::Index),
            constant_buffers: count(BufferKind::Constant),
            textures: self.textures.len(),
            shaders: self.shaders.len(),
            multisample_targets: self.multisample_targets,
        }
    }

    /// Last bytes written to a constant buffer
    pub fn constant_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.constant_data.get(&buffer.0).map(Vec::as_slice)
    }

    /// Decoded data a texture was uploaded from
    pub fn texture_data(&self, texture: TextureHandle) -> Option<&TextureData> {
        self.textures.get(&texture.0)
    }
}

impl Renderer for RecordingRenderer {
    fn api(&self) -> BackendType {
        self.info.backend
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.width = width;
        self.height = height;
        self.events.push(RecordedEvent::Resize { width, height });
        let level = self.msaa_level;
        self.create_anti_aliasing_target(level, width, height)
    }

    fn clear(&mut self) -> RendererResult<()> {
        self.frame_open = true;
        self.events.push(RecordedEvent::Clear {
            width: self.width,
            height: self.height,
            samples: self.msaa_level.max(1),
        });
        Ok(())
    }

    fn present(&mut self) -> RendererResult<()> {
        if !self.frame_open {
            log::trace!("RecordingRenderer: present without clear, skipped");
            return Ok(());
        }
        self.frame_open = false;
        self.events.push(RecordedEvent::Present {
            width: self.width,
            height: self.height,
            resolved: self.msaa_level > 1,
        });
        Ok(())
    }

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> RendererResult<VertexBuffer> {
        if vertices.is_empty() {
            return Err(RendererError::BufferCreationFailed(
                "vertex buffer is empty".into(),
            ));
        }
        let id = self.allocate_id();
        self.buffers.insert(id, BufferKind::Vertex);
        log::trace!("RecordingRenderer: vertex buffer {} ({} vertices)", id, vertices.len());
        Ok(VertexBuffer {
            handle: BufferHandle(id),
            vertex_count: vertices.len() as u32,
        })
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> RendererResult<IndexBuffer> {
        if indices.is_empty() {
            return Err(RendererError::BufferCreationFailed(
                "index buffer is empty".into(),
            ));
        }
        let id = self.allocate_id();
        self.buffers.insert(id, BufferKind::Index);
        Ok(IndexBuffer {
            handle: BufferHandle(id),
            index_count: indices.len() as u32,
        })
    }

    fn upload_texture_2d(&mut self, data: &TextureData) -> RendererResult<Texture2D> {
        data.validate()
            .map_err(|e| RendererError::TextureCreationFailed(e.to_string()))?;
        let id = self.allocate_id();
        self.textures.insert(id, data.clone());
        Ok(Texture2D {
            handle: TextureHandle(id),
            width: data.width(),
            height: data.height(),
            mip_levels: data.mip_level_count(),
            format: data.format,
        })
    }

    fn create_constant_buffer(&mut self, label: &str, size: u64) -> RendererResult<ConstantBuffer> {
        let id = self.allocate_id();
        self.buffers.insert(id, BufferKind::Constant);
        self.constant_data.insert(id, vec![0; size as usize]);
        log::trace!("RecordingRenderer: constant buffer '{}' ({} bytes)", label, size);
        Ok(ConstantBuffer {
            handle: BufferHandle(id),
            size,
        })
    }

    fn update_constant_buffer(&mut self, buffer: &ConstantBuffer, data: &[u8]) {
        debug_assert!(data.len() as u64 <= buffer.size);
        if let Some(stored) = self.constant_data.get_mut(&buffer.handle.0) {
            let len = data.len().min(stored.len());
            stored[..len].copy_from_slice(&data[..len]);
        }
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> RendererResult<Shader> {
        if !desc.source.contains(&desc.vertex_entry) || !desc.source.contains(&desc.fragment_entry)
        {
            return Err(RendererError::ShaderCreationFailed(format!(
                "entry points '{}'/'{}' not found",
                desc.vertex_entry, desc.fragment_entry
            )));
        }
        let id = self.allocate_id();
        self.shaders.insert(id, desc.clone());
        Ok(Shader {
            handle: ShaderHandle(id),
        })
    }

    fn release_vertex_buffer(&mut self, buffer: VertexBuffer) {
        self.release_buffer(buffer.handle, BufferKind::Vertex);
    }

    fn release_index_buffer(&mut self, buffer: IndexBuffer) {
        self.release_buffer(buffer.handle, BufferKind::Index);
    }

    fn release_texture_2d(&mut self, texture: Texture2D) {
        let removed = self.textures.remove(&texture.handle.0);
        debug_assert!(removed.is_some(), "released a foreign texture");
    }

    fn release_constant_buffer(&mut self, buffer: ConstantBuffer) {
        self.release_buffer(buffer.handle, BufferKind::Constant);
    }

    fn release_shader(&mut self, shader: Shader) {
        let removed = self.shaders.remove(&shader.handle.0);
        debug_assert!(removed.is_some(), "released a foreign shader");
    }

    fn apply_shader(&mut self, shader: &Shader) {
        self.bound.shader = Some(shader.handle);
    }

    fn apply_vertex_buffer(&mut self, buffer: &VertexBuffer) {
        self.bound.vertex_buffer = Some(buffer.handle);
    }

    fn apply_index_buffer(&mut self, buffer: &IndexBuffer) {
        self.bound.index_buffer = Some(buffer.handle);
    }

    fn apply_constant_buffer(&mut self, slot: ConstantSlot, buffer: &ConstantBuffer) {
        self.bound.constants[slot.index()] = Some(buffer.handle);
    }

    fn apply_texture_2d(&mut self, slot: TextureSlot, texture: &Texture2D) {
        self.bound.textures[slot.index()] = Some(texture.handle);
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.bound.topology = topology;
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        if !self.frame_open {
            log::trace!("RecordingRenderer: draw outside a frame, skipped");
            return;
        }
        let draw = DrawCall {
            index_count,
            start_index,
            base_vertex,
            shader: self.bound.shader,
            vertex_buffer: self.bound.vertex_buffer,
            index_buffer: self.bound.index_buffer,
            constants: self.bound.constants,
            textures: self.bound.textures,
            topology: self.bound.topology,
            wireframe: self.wireframe,
            samples: self.msaa_level.max(1),
        };
        log::trace!("RecordingRenderer: {:?}", draw);
        self.events.push(RecordedEvent::Draw(draw));
    }

    fn create_anti_aliasing_target(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        let level = resolve_msaa_level(level, &self.supported_msaa_levels)?;
        self.multisample_targets = 0;
        match level {
            Some(samples) => {
                self.msaa_level = samples;
                self.multisample_targets = 2;
                log::trace!("RecordingRenderer: {}x MSAA at {}x{}", samples, width, height);
            }
            None => self.msaa_level = 0,
        }
        Ok(())
    }

    fn msaa_level(&self) -> u32 {
        self.msaa_level
    }

    fn supported_msaa_levels(&self) -> &[u32] {
        &self.supported_msaa_levels
    }

    fn toggle_wireframe(&mut self, enabled: bool) {
        if enabled && !self.wireframe_supported {
            log::warn!("Wireframe is not supported, staying solid");
            return;
        }
        self.wireframe = enabled;
    }

    fn is_wireframe(&self) -> bool {
        self.wireframe
    }

    fn max_anisotropic_filter_level(&self) -> u32 {
        self.max_anisotropy
    }

    fn set_anisotropic_filter(&mut self, level: u32) -> RendererResult<()> {
        self.anisotropy = level.clamp(1, self.max_anisotropy);
        Ok(())
    }

    fn anisotropic_filter(&self) -> u32 {
        self.anisotropy
    }

    fn set_vsync(&mut self, enabled: bool) -> RendererResult<()> {
        self.vsync = enabled;
        Ok(())
    }

    fn vsync(&self) -> bool {
        self.vsync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_msaa_level_keeps_state() {
        let mut r = RecordingRenderer::new(64, 64);
        r.create_anti_aliasing_target(4, 64, 64).unwrap();
        assert!(r.create_anti_aliasing_target(3, 64, 64).is_err());
        assert_eq!(r.msaa_level(), 4);
        assert_eq!(r.live_resources().multisample_targets, 2);
    }

    #[test]
    fn test_wireframe_unsupported_stays_solid() {
        let mut r = RecordingRenderer::with_capabilities(8, 8, vec![], 1, false);
        r.toggle_wireframe(true);
        assert!(!r.is_wireframe());
        assert_eq!(r.max_msaa_level(), 0);
    }

    #[test]
    fn test_anisotropy_is_clamped() {
        let mut r = RecordingRenderer::with_capabilities(8, 8, vec![4], 8, true);
        r.set_anisotropic_filter(0).unwrap();
        assert_eq!(r.anisotropic_filter(), 1);
        r.set_anisotropic_filter(64).unwrap();
        assert_eq!(r.anisotropic_filter(), 8);
    }

    #[test]
    fn test_draw_outside_frame_is_ignored() {
        let mut r = RecordingRenderer::new(8, 8);
        r.draw_indexed(3, 0, 0);
        assert_eq!(r.draws().count(), 0);
        r.clear().unwrap();
        r.draw_indexed(3, 0, 0);
        r.present().unwrap();
        assert_eq!(r.draws().count(), 1);
    }
}
