//! Texture decoding

use super::{dds, ResourceError};
use crate::backend::types::{TextureFormat, TextureSlot};
use image::{imageops::FilterType, DynamicImage, RgbaImage};
use std::path::Path;

/// One level of a mip chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Decoded texture, ready for upload.
///
/// `mips[0]` is the full-size image; each following level halves both
/// dimensions down to 1.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub format: TextureFormat,
    pub mips: Vec<MipLevel>,
    pub name: String,
}

impl TextureData {
    /// Load a texture file. DDS files keep their stored mips, other image
    /// formats get a generated chain.
    pub fn load(path: &Path) -> Result<Self, ResourceError> {
        let bytes = std::fs::read(path).map_err(|source| ResourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        Self::from_bytes(&bytes, name)
    }

    /// Decode from memory, sniffing for DDS first
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, ResourceError> {
        if dds::is_dds(bytes) {
            return dds::decode(bytes, name);
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| ResourceError::ImageDecode(format!("{}: {}", name, e)))?;
        Ok(Self::from_image(img, name))
    }

    pub fn from_image(img: DynamicImage, name: &str) -> Self {
        let rgba = img.to_rgba8();
        Self {
            format: TextureFormat::Rgba8UnormSrgb,
            mips: generate_mips(rgba),
            name: name.to_string(),
        }
    }

    /// Create a 1x1 texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            mips: vec![MipLevel {
                width: 1,
                height: 1,
                data: color.to_vec(),
            }],
            name: name.to_string(),
        }
    }

    /// Texture bound to `slot` when a model supplies none
    pub fn fallback(slot: TextureSlot) -> Self {
        let name = match slot {
            TextureSlot::Diffuse => "fallback_diffuse",
            TextureSlot::Normal => "fallback_normal",
        };
        Self::solid_color(slot.fallback_texel(), name)
    }

    pub fn width(&self) -> u32 {
        self.mips.first().map_or(0, |m| m.width)
    }

    pub fn height(&self) -> u32 {
        self.mips.first().map_or(0, |m| m.height)
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mips.len() as u32
    }

    /// Check the mip chain before it reaches a GPU: a non-empty base level,
    /// no more levels than a full chain, each level half the previous one
    /// and holding exactly the bytes its format needs
    pub fn validate(&self) -> Result<(), ResourceError> {
        let invalid = |msg: String| Err(ResourceError::InvalidTexture(format!("'{}' {}", self.name, msg)));
        let (width, height) = (self.width(), self.height());
        if self.mips.is_empty() || width == 0 || height == 0 {
            return invalid("has no image data".into());
        }
        let max_levels = full_mip_count(width, height);
        if self.mip_level_count() > max_levels {
            return invalid(format!(
                "has {} mip levels, a {}x{} chain has at most {}",
                self.mip_level_count(),
                width,
                height,
                max_levels
            ));
        }
        for (level, mip) in self.mips.iter().enumerate() {
            let expected_size = ((width >> level).max(1), (height >> level).max(1));
            if (mip.width, mip.height) != expected_size {
                return invalid(format!(
                    "mip {} is {}x{}, expected {}x{}",
                    level, mip.width, mip.height, expected_size.0, expected_size.1
                ));
            }
            let expected = self.format.level_size(mip.width, mip.height);
            if mip.data.len() != expected {
                return invalid(format!(
                    "mip {} holds {} bytes, expected {}",
                    level,
                    mip.data.len(),
                    expected
                ));
            }
        }
        Ok(())
    }
}

/// Number of levels in a full chain for the given size
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn generate_mips(base: RgbaImage) -> Vec<MipLevel> {
    let count = full_mip_count(base.width(), base.height());
    let mut mips = Vec::with_capacity(count as usize);
    let mut current = base;
    for _ in 1..count {
        let width = (current.width() / 2).max(1);
        let height = (current.height() / 2).max(1);
        let next = image::imageops::resize(&current, width, height, FilterType::Triangle);
        mips.push(MipLevel {
            width: current.width(),
            height: current.height(),
            data: current.into_raw(),
        });
        current = next;
    }
    mips.push(MipLevel {
        width: current.width(),
        height: current.height(),
        data: current.into_raw(),
    });
    mips
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1, 1)]
    #[case(256, 256, 9)]
    #[case(300, 20, 9)]
    #[case(2, 1024, 11)]
    fn test_full_mip_count(#[case] width: u32, #[case] height: u32, #[case] expected: u32) {
        assert_eq!(full_mip_count(width, height), expected);
    }

    #[test]
    fn test_image_gets_full_chain() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            4,
            image::Rgba([10, 20, 30, 255]),
        ));
        let texture = TextureData::from_image(img, "checker");
        let dims: Vec<_> = texture.mips.iter().map(|m| (m.width, m.height)).collect();
        assert_eq!(dims, vec![(8, 4), (4, 2), (2, 1), (1, 1)]);
        assert!(texture
            .mips
            .iter()
            .all(|m| m.data.len() == (m.width * m.height * 4) as usize));
        assert_eq!(&texture.mips[3].data, &[10, 20, 30, 255]);
    }

    #[test]
    fn test_fallback_textures() {
        let normal = TextureData::fallback(TextureSlot::Normal);
        assert_eq!(normal.mips[0].data, vec![128, 128, 255, 255]);
        assert_eq!(normal.width(), 1);
    }

    #[test]
    fn test_validate_rejects_overlong_chain() {
        let mut texture = TextureData::solid_color([1, 2, 3, 4], "tiny");
        assert!(texture.validate().is_ok());

        texture.mips.push(texture.mips[0].clone());
        assert!(matches!(
            texture.validate(),
            Err(ResourceError::InvalidTexture(msg)) if msg.contains("at most 1")
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_level_size() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let mut texture = TextureData::from_image(img, "square");
        assert!(texture.validate().is_ok());

        texture.mips[1].width = 3;
        assert!(texture.validate().is_err());
        texture.mips[1].width = 2;
        texture.mips[2].data.push(0);
        assert!(texture.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = TextureData::load(Path::new("does/not/exist.dds")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.dds"));
    }
}
