//! Common types shared between backends

use crate::BackendType;

/// Background colour used by [`Renderer::clear`](super::Renderer::clear) (SteelBlue).
pub const CLEAR_COLOR: [f32; 4] = [0.274_509_8, 0.509_803_9, 0.705_882_4, 1.0];

/// Depth value the depth target is cleared to.
pub const CLEAR_DEPTH: f32 = 1.0;

/// Highest sample count either backend will ever report.
pub const MAX_MSAA_LEVEL: u32 = 16;

/// Highest anisotropic filter level either backend will ever report.
pub const MAX_ANISOTROPY: u32 = 16;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Depth32Float,
    /// BC1 (DXT1), 8 bytes per 4x4 block
    Bc1RgbaUnorm,
    /// BC2 (DXT3), 16 bytes per 4x4 block
    Bc2RgbaUnorm,
    /// BC3 (DXT5), 16 bytes per 4x4 block
    Bc3RgbaUnorm,
    /// BC4 (ATI1), 8 bytes per 4x4 block
    Bc4RUnorm,
    /// BC5 (ATI2), 16 bytes per 4x4 block
    Bc5RgUnorm,
    /// BC7, 16 bytes per 4x4 block
    Bc7RgbaUnorm,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn is_compressed(&self) -> bool {
        self.block_size().is_some()
    }

    /// Bytes per 4x4 block for block-compressed formats
    pub fn block_size(&self) -> Option<u32> {
        match self {
            TextureFormat::Bc1RgbaUnorm | TextureFormat::Bc4RUnorm => Some(8),
            TextureFormat::Bc2RgbaUnorm
            | TextureFormat::Bc3RgbaUnorm
            | TextureFormat::Bc5RgUnorm
            | TextureFormat::Bc7RgbaUnorm => Some(16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float => 4,
            // Compressed formats are addressed by block, see `block_size`
            _ => 0,
        }
    }

    /// Bytes in one row of blocks (compressed) or pixels (uncompressed).
    pub fn bytes_per_row(&self, width: u32) -> u32 {
        match self.block_size() {
            Some(block) => width.div_ceil(4).max(1) * block,
            None => width * self.bytes_per_pixel(),
        }
    }

    /// Number of block rows (compressed) or pixel rows (uncompressed).
    pub fn rows(&self, height: u32) -> u32 {
        if self.is_compressed() {
            height.div_ceil(4).max(1)
        } else {
            height
        }
    }

    /// Size in bytes of a single mip level with the given dimensions.
    pub fn level_size(&self, width: u32, height: u32) -> usize {
        self.bytes_per_row(width) as usize * self.rows(height) as usize
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 | VertexFormat::Uint32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Uniform buffer binding points shared by every backend and the WGSL shader.
///
/// Both slots live in bind group 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantSlot {
    /// Per-frame camera, world and light data (binding 0)
    Frame,
    /// Skinning palette (binding 1)
    Bones,
}

impl ConstantSlot {
    pub const COUNT: usize = 2;

    pub fn binding(&self) -> u32 {
        match self {
            ConstantSlot::Frame => 0,
            ConstantSlot::Bones => 1,
        }
    }

    pub fn index(&self) -> usize {
        self.binding() as usize
    }
}

/// Texture binding points. Both slots live in bind group 1, the shared
/// sampler sits at binding [`SAMPLER_BINDING`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Diffuse,
    Normal,
}

pub const SAMPLER_BINDING: u32 = 2;

impl TextureSlot {
    pub const COUNT: usize = 2;

    pub fn binding(&self) -> u32 {
        match self {
            TextureSlot::Diffuse => 0,
            TextureSlot::Normal => 1,
        }
    }

    pub fn index(&self) -> usize {
        self.binding() as usize
    }

    /// RGBA8 texel bound when nothing was applied to the slot
    pub fn fallback_texel(&self) -> [u8; 4] {
        match self {
            TextureSlot::Diffuse => [255, 255, 255, 255],
            TextureSlot::Normal => [128, 128, 255, 255],
        }
    }
}

/// Shader program description
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    pub label: Option<String>,
    /// WGSL source containing both entry points
    pub source: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub vertex_layout: VertexBufferLayout,
}

/// Renderer state chosen at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererSettings {
    pub vsync: bool,
    /// 0 or 1 disables multisampling
    pub msaa_level: u32,
    pub anisotropy: u32,
    pub wireframe: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            msaa_level: 0,
            anisotropy: 1,
            wireframe: false,
        }
    }
}

/// Information about the GPU a renderer runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: BackendType,
    /// Dedicated video memory in bytes, if the API exposes it
    pub dedicated_video_memory: Option<u64>,
}

impl DeviceInfo {
    /// One-line human readable description
    pub fn description(&self) -> String {
        match self.dedicated_video_memory {
            Some(bytes) => format!(
                "{:?}: {} ({} MB)",
                self.backend,
                self.name,
                bytes / (1024 * 1024)
            ),
            None => format!("{:?}: {}", self.backend, self.name),
        }
    }
}

/// Filter sample counts down to what a device reports, sorted ascending.
pub fn filter_msaa_levels(candidates: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut levels: Vec<u32> = candidates
        .into_iter()
        .filter(|&n| n > 1 && n <= MAX_MSAA_LEVEL && n.is_power_of_two())
        .collect();
    levels.sort_unstable();
    levels.dedup();
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bc1_full(TextureFormat::Bc1RgbaUnorm, 256, 256, 32768)]
    #[case::bc1_tail(TextureFormat::Bc1RgbaUnorm, 1, 1, 8)]
    #[case::bc3_odd(TextureFormat::Bc3RgbaUnorm, 6, 2, 32)]
    #[case::rgba(TextureFormat::Rgba8Unorm, 3, 2, 24)]
    fn test_level_size(
        #[case] format: TextureFormat,
        #[case] width: u32,
        #[case] height: u32,
        #[case] expected: usize,
    ) {
        assert_eq!(format.level_size(width, height), expected);
    }

    #[test]
    fn test_filter_msaa_levels() {
        assert_eq!(filter_msaa_levels([8, 1, 4, 2, 4, 3, 64]), vec![2, 4, 8]);
        assert!(filter_msaa_levels([1]).is_empty());
    }

    #[test]
    fn test_slot_bindings_are_distinct() {
        assert_ne!(TextureSlot::Diffuse.binding(), TextureSlot::Normal.binding());
        assert_ne!(TextureSlot::Normal.binding(), SAMPLER_BINDING);
        assert_ne!(ConstantSlot::Frame.binding(), ConstantSlot::Bones.binding());
    }
}
