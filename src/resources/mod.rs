//! Resource management
//!
//! CPU-side mesh, skeleton and texture data, plus the containers they are
//! read from.

pub mod dds;
mod mesh;
pub mod mesh_file;
mod texture;

pub use mesh::*;
pub use texture::*;

use thiserror::Error;

/// Errors raised while decoding resource files
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid DDS file: {0}")]
    InvalidDds(String),
    #[error("Unsupported DDS format: {0}")]
    UnsupportedDdsFormat(String),
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),
    #[error("Invalid mesh file: {0}")]
    InvalidMeshFile(String),
    #[error("Invalid texture data: {0}")]
    InvalidTexture(String),
}
