//! DirectDraw Surface reader
//!
//! Handles 2D textures in BC1-BC5, BC7 and 32-bit RGBA/BGRA, with or
//! without the DX10 extension header. Every stored mip level is kept.

use super::{full_mip_count, MipLevel, ResourceError, TextureData};
use crate::backend::types::TextureFormat;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

const MAGIC: &[u8; 4] = b"DDS ";

const DDSD_MIPMAPCOUNT: u32 = 0x0002_0000;
const DDSD_DEPTH: u32 = 0x0080_0000;
const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDSCAPS2_CUBEMAP: u32 = 0x200;

const DXGI_R8G8B8A8_UNORM: u32 = 28;
const DXGI_R8G8B8A8_UNORM_SRGB: u32 = 29;
const DXGI_BC1_UNORM: u32 = 71;
const DXGI_BC1_UNORM_SRGB: u32 = 72;
const DXGI_BC2_UNORM: u32 = 74;
const DXGI_BC2_UNORM_SRGB: u32 = 75;
const DXGI_BC3_UNORM: u32 = 77;
const DXGI_BC3_UNORM_SRGB: u32 = 78;
const DXGI_BC4_UNORM: u32 = 80;
const DXGI_BC5_UNORM: u32 = 83;
const DXGI_B8G8R8A8_UNORM: u32 = 87;
const DXGI_B8G8R8A8_UNORM_SRGB: u32 = 91;
const DXGI_BC7_UNORM: u32 = 98;
const DXGI_BC7_UNORM_SRGB: u32 = 99;

const D3D10_RESOURCE_DIMENSION_TEXTURE2D: u32 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PixelFormat {
    size: u32,
    flags: u32,
    four_cc: u32,
    rgb_bit_count: u32,
    r_mask: u32,
    g_mask: u32,
    b_mask: u32,
    a_mask: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Header {
    size: u32,
    flags: u32,
    height: u32,
    width: u32,
    pitch_or_linear_size: u32,
    depth: u32,
    mip_map_count: u32,
    reserved1: [u32; 11],
    pixel_format: PixelFormat,
    caps: u32,
    caps2: u32,
    caps3: u32,
    caps4: u32,
    reserved2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct HeaderDx10 {
    dxgi_format: u32,
    resource_dimension: u32,
    misc_flag: u32,
    array_size: u32,
    misc_flags2: u32,
}

fn four_cc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// True when `bytes` starts with the DDS magic
pub fn is_dds(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

fn read<T: Pod>(bytes: &[u8], offset: usize) -> Result<T, ResourceError> {
    bytes
        .get(offset..offset + size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .ok_or_else(|| ResourceError::InvalidDds("file is truncated inside a header".into()))
}

fn format_from_dxgi(dxgi: u32) -> Result<TextureFormat, ResourceError> {
    Ok(match dxgi {
        DXGI_R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        DXGI_R8G8B8A8_UNORM_SRGB => TextureFormat::Rgba8UnormSrgb,
        DXGI_B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        DXGI_B8G8R8A8_UNORM_SRGB => TextureFormat::Bgra8UnormSrgb,
        DXGI_BC1_UNORM | DXGI_BC1_UNORM_SRGB => TextureFormat::Bc1RgbaUnorm,
        DXGI_BC2_UNORM | DXGI_BC2_UNORM_SRGB => TextureFormat::Bc2RgbaUnorm,
        DXGI_BC3_UNORM | DXGI_BC3_UNORM_SRGB => TextureFormat::Bc3RgbaUnorm,
        DXGI_BC4_UNORM => TextureFormat::Bc4RUnorm,
        DXGI_BC5_UNORM => TextureFormat::Bc5RgUnorm,
        DXGI_BC7_UNORM | DXGI_BC7_UNORM_SRGB => TextureFormat::Bc7RgbaUnorm,
        other => {
            return Err(ResourceError::UnsupportedDdsFormat(format!(
                "DXGI format {}",
                other
            )))
        }
    })
}

fn format_from_pixel_format(pf: &PixelFormat) -> Result<TextureFormat, ResourceError> {
    if pf.flags & DDPF_FOURCC != 0 {
        let code = pf.four_cc;
        return match &code.to_le_bytes() {
            b"DXT1" => Ok(TextureFormat::Bc1RgbaUnorm),
            b"DXT2" | b"DXT3" => Ok(TextureFormat::Bc2RgbaUnorm),
            b"DXT4" | b"DXT5" => Ok(TextureFormat::Bc3RgbaUnorm),
            b"ATI1" | b"BC4U" => Ok(TextureFormat::Bc4RUnorm),
            b"ATI2" | b"BC5U" => Ok(TextureFormat::Bc5RgUnorm),
            other => Err(ResourceError::UnsupportedDdsFormat(format!(
                "FourCC {:?}",
                String::from_utf8_lossy(other)
            ))),
        };
    }

    if pf.flags & DDPF_RGB != 0 && pf.rgb_bit_count == 32 {
        match (pf.r_mask, pf.g_mask, pf.b_mask) {
            (0x0000_00ff, 0x0000_ff00, 0x00ff_0000) => return Ok(TextureFormat::Rgba8Unorm),
            (0x00ff_0000, 0x0000_ff00, 0x0000_00ff) => return Ok(TextureFormat::Bgra8Unorm),
            _ => {}
        }
    }

    Err(ResourceError::UnsupportedDdsFormat(format!(
        "pixel format flags {:#x}, {} bits per pixel",
        pf.flags, pf.rgb_bit_count
    )))
}

/// Decode a DDS file held in memory.
pub fn decode(bytes: &[u8], name: &str) -> Result<TextureData, ResourceError> {
    if !is_dds(bytes) {
        return Err(ResourceError::InvalidDds("missing 'DDS ' magic".into()));
    }

    let header: Header = read(bytes, MAGIC.len())?;
    if header.size as usize != size_of::<Header>() {
        return Err(ResourceError::InvalidDds(format!(
            "header size is {}, expected {}",
            header.size,
            size_of::<Header>()
        )));
    }
    if header.caps2 & DDSCAPS2_CUBEMAP != 0 {
        return Err(ResourceError::UnsupportedDdsFormat("cube maps".into()));
    }
    if header.flags & DDSD_DEPTH != 0 && header.depth > 1 {
        return Err(ResourceError::UnsupportedDdsFormat("volume textures".into()));
    }
    if header.width == 0 || header.height == 0 {
        return Err(ResourceError::InvalidDds("zero sized surface".into()));
    }

    let mut offset = MAGIC.len() + size_of::<Header>();
    let format = if header.pixel_format.flags & DDPF_FOURCC != 0
        && header.pixel_format.four_cc == four_cc(b"DX10")
    {
        let dx10: HeaderDx10 = read(bytes, offset)?;
        offset += size_of::<HeaderDx10>();
        if dx10.resource_dimension != D3D10_RESOURCE_DIMENSION_TEXTURE2D {
            return Err(ResourceError::UnsupportedDdsFormat(format!(
                "resource dimension {}",
                dx10.resource_dimension
            )));
        }
        if dx10.array_size > 1 {
            return Err(ResourceError::UnsupportedDdsFormat("texture arrays".into()));
        }
        format_from_dxgi(dx10.dxgi_format)?
    } else {
        format_from_pixel_format(&header.pixel_format)?
    };

    let mip_count = if header.flags & DDSD_MIPMAPCOUNT != 0 {
        header.mip_map_count.max(1)
    } else {
        1
    };

    let max_levels = full_mip_count(header.width, header.height);
    if mip_count > max_levels {
        return Err(ResourceError::InvalidDds(format!(
            "{} mip levels for a {}x{} surface, at most {} fit",
            mip_count, header.width, header.height, max_levels
        )));
    }

    let mut mips = Vec::new();
    let (mut width, mut height) = (header.width, header.height);
    for level in 0..mip_count {
        let size = format.level_size(width, height);
        let data = bytes.get(offset..offset + size).ok_or_else(|| {
            ResourceError::InvalidDds(format!(
                "mip level {} needs {} bytes at offset {}, file has {}",
                level,
                size,
                offset,
                bytes.len()
            ))
        })?;
        mips.push(MipLevel {
            width,
            height,
            data: data.to_vec(),
        });
        offset += size;
        width = (width / 2).max(1);
        height = (height / 2).max(1);
    }

    log::debug!(
        "Decoded DDS '{}': {}x{} {:?}, {} mip level(s)",
        name,
        header.width,
        header.height,
        format,
        mips.len()
    );

    Ok(TextureData {
        format,
        mips,
        name: name.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal DDS file for tests
    pub(crate) fn build_dds(
        width: u32,
        height: u32,
        mip_count: u32,
        pixel_format: (u32, [u8; 4]),
        payload_len: usize,
    ) -> Vec<u8> {
        let mut header = Header::zeroed();
        header.size = size_of::<Header>() as u32;
        header.flags = 0x1 | 0x2 | 0x4 | 0x1000 | DDSD_MIPMAPCOUNT;
        header.width = width;
        header.height = height;
        header.mip_map_count = mip_count;
        header.pixel_format.size = size_of::<PixelFormat>() as u32;
        header.pixel_format.flags = pixel_format.0;
        if pixel_format.0 & DDPF_FOURCC != 0 {
            header.pixel_format.four_cc = four_cc(&pixel_format.1);
        } else {
            header.pixel_format.rgb_bit_count = 32;
            header.pixel_format.r_mask = 0x0000_00ff;
            header.pixel_format.g_mask = 0x0000_ff00;
            header.pixel_format.b_mask = 0x00ff_0000;
            header.pixel_format.a_mask = 0xff00_0000;
        }

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        bytes.extend((0..payload_len).map(|i| i as u8));
        bytes
    }

    #[test]
    fn test_decode_bc1_mip_chain() {
        // 8x8: 32 bytes, then three 8-byte tail levels
        let bytes = build_dds(8, 8, 4, (DDPF_FOURCC, *b"DXT1"), 32 + 8 * 3);
        let texture = decode(&bytes, "bc1").unwrap();
        assert_eq!(texture.format, TextureFormat::Bc1RgbaUnorm);
        assert_eq!(texture.mips.len(), 4);
        assert_eq!(texture.width(), 8);
        let sizes: Vec<_> = texture.mips.iter().map(|m| (m.width, m.data.len())).collect();
        assert_eq!(sizes, vec![(8, 32), (4, 8), (2, 8), (1, 8)]);
    }

    #[test]
    fn test_decode_uncompressed_rgba() {
        let bytes = build_dds(2, 2, 1, (DDPF_RGB, [0; 4]), 16);
        let texture = decode(&bytes, "rgba").unwrap();
        assert_eq!(texture.format, TextureFormat::Rgba8Unorm);
        assert_eq!(texture.mips[0].data.len(), 16);
    }

    #[test]
    fn test_decode_dx10_bc7() {
        let mut bytes = build_dds(4, 4, 1, (DDPF_FOURCC, *b"DX10"), 0);
        let dx10 = HeaderDx10 {
            dxgi_format: DXGI_BC7_UNORM,
            resource_dimension: D3D10_RESOURCE_DIMENSION_TEXTURE2D,
            misc_flag: 0,
            array_size: 1,
            misc_flags2: 0,
        };
        bytes.extend_from_slice(bytemuck::bytes_of(&dx10));
        bytes.extend_from_slice(&[0u8; 16]);
        let texture = decode(&bytes, "bc7").unwrap();
        assert_eq!(texture.format, TextureFormat::Bc7RgbaUnorm);
    }

    #[test]
    fn test_decode_rejects_truncated_mips() {
        let bytes = build_dds(8, 8, 4, (DDPF_FOURCC, *b"DXT5"), 64);
        assert!(matches!(
            decode(&bytes, "short"),
            Err(ResourceError::InvalidDds(_))
        ));
    }

    #[test]
    fn test_decode_rejects_absurd_mip_count() {
        let bytes = build_dds(4, 4, u32::MAX, (DDPF_FOURCC, *b"DXT1"), 8);
        assert!(matches!(
            decode(&bytes, "huge"),
            Err(ResourceError::InvalidDds(msg)) if msg.contains("at most 3")
        ));
    }

    #[test]
    fn test_decode_rejects_levels_past_full_chain() {
        // 4x4 BC1 has three levels (4, 2, 1); the payload would cover six
        let bytes = build_dds(4, 4, 6, (DDPF_FOURCC, *b"DXT1"), 48);
        assert!(matches!(
            decode(&bytes, "bc1"),
            Err(ResourceError::InvalidDds(_))
        ));

        let bytes = build_dds(4, 4, 3, (DDPF_FOURCC, *b"DXT1"), 24);
        let texture = decode(&bytes, "bc1").unwrap();
        assert_eq!(texture.mip_level_count(), 3);
        assert!(texture.validate().is_ok());
    }

    #[test]
    fn test_decode_rejects_unknown_four_cc() {
        let bytes = build_dds(4, 4, 1, (DDPF_FOURCC, *b"ETC2"), 16);
        assert!(matches!(
            decode(&bytes, "etc"),
            Err(ResourceError::UnsupportedDdsFormat(_))
        ));
        assert!(matches!(
            decode(b"PNG.....", "png"),
            Err(ResourceError::InvalidDds(_))
        ));
    }
}
