//! Skeletal animation
//!
//! Matrices follow glam's column-vector convention: a parent-relative
//! transform is applied as `parent * local`, and the skinning matrix of a
//! bone is `to_root * offset`. glam and WGSL both store matrices column
//! major, so the palette is uploaded as is.

mod animator;
mod clip;

pub use animator::*;
pub use clip::*;

use thiserror::Error;

/// Clip or skeleton data that cannot be animated safely
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    #[error("Clip '{clip}' has {tracks} bone track(s) but the skeleton has {bones} bone(s)")]
    TrackCountMismatch {
        clip: String,
        tracks: usize,
        bones: usize,
    },
    #[error("Clip '{clip}' has no keyframes for bone {bone}")]
    EmptyTrack { clip: String, bone: usize },
    #[error("Clip '{clip}' bone {bone}: keyframe {index} goes back in time")]
    UnorderedKeyframes {
        clip: String,
        bone: usize,
        index: usize,
    },
    #[error("Bone {bone} ('{name}') has parent {parent}, which is not stored before it")]
    InvalidHierarchy {
        bone: usize,
        name: String,
        parent: usize,
    },
}
