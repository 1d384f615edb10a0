//! Mesh, skeleton and vertex data

use crate::animation::{AnimationClip, BoneAnimation, Keyframe};
use crate::backend::types::{VertexAttribute, VertexBufferLayout, VertexFormat};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};
use std::collections::HashMap;

/// Maximum number of bones that can influence one vertex
pub const MAX_BONE_INFLUENCES: usize = 4;

/// Skinned vertex.
///
/// The layout is fixed at 104 bytes and matches [`Vertex::layout`] and the
/// vertex inputs of the WGSL shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub colour: [f32; 4],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
    /// Sum is at most 1.0, unused slots are 0
    pub weights: [f32; MAX_BONE_INFLUENCES],
    /// Bone index per weight slot, unused slots are 0
    pub bones: [u32; MAX_BONE_INFLUENCES],
}

impl Default for Vertex {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            colour: [1.0; 4],
            uv: uv.to_array(),
            normal: normal.to_array(),
            ..Self::zeroed()
        }
    }

    pub fn with_tangent_frame(mut self, tangent: Vec3, bitangent: Vec3) -> Self {
        self.tangent = tangent.to_array();
        self.bitangent = bitangent.to_array();
        self
    }

    /// Store `weight` for `bone` in the first free slot.
    ///
    /// Returns false when all slots are taken or the weight is not positive.
    pub fn add_bone_weight(&mut self, bone: u32, weight: f32) -> bool {
        if weight <= 0.0 {
            return false;
        }
        match self.weights.iter().position(|&w| w == 0.0) {
            Some(slot) => {
                self.weights[slot] = weight;
                self.bones[slot] = bone;
                true
            }
            None => false,
        }
    }

    pub fn layout() -> VertexBufferLayout {
        let attribute = |location: u32, format: VertexFormat, offset: u64| VertexAttribute {
            location,
            format,
            offset,
        };
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                attribute(0, VertexFormat::Float32x3, 0),
                attribute(1, VertexFormat::Float32x4, 12),
                attribute(2, VertexFormat::Float32x2, 28),
                attribute(3, VertexFormat::Float32x3, 36),
                attribute(4, VertexFormat::Float32x3, 48),
                attribute(5, VertexFormat::Float32x3, 60),
                attribute(6, VertexFormat::Float32x4, 72),
                attribute(7, VertexFormat::Uint32x4, 88),
            ],
        }
    }
}

/// Contiguous draw range inside the shared vertex and index buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subset {
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: u32,
}

/// Skeleton joint.
///
/// Bones are stored parent-before-child; the root is its own parent with id 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneInfo {
    pub name: String,
    pub parent_name: String,
    pub parent_id: usize,
    /// Inverse bind pose: model space into bone space
    pub offset: Mat4,
}

/// Everything a model needs to be drawn and animated
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<Subset>,
    pub bones: Vec<BoneInfo>,
    pub animations: HashMap<String, AnimationClip>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Single subset covering every index, for meshes built without one
    pub fn ensure_subsets(&mut self) {
        if self.subsets.is_empty() && !self.indices.is_empty() {
            self.subsets.push(Subset {
                index_count: self.indices.len() as u32,
                start_index: 0,
                base_vertex: 0,
            });
        }
    }

    /// A square column of three stacked bones with a looping "Take1" clip.
    ///
    /// The four sides form subset 0; the two caps form subset 1, whose
    /// indices are relative to its own vertex block.
    pub fn demo_skinned_column() -> Self {
        const HALF: f32 = 0.35;
        const HEIGHT: f32 = 3.0;
        const RINGS: u32 = 12;

        let mut mesh = MeshData::default();

        let sides = [
            (Vec3::Z, Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::Z, -Vec3::X),
            (-Vec3::X, Vec3::Z),
        ];

        for (normal, tangent) in sides {
            let base = mesh.vertices.len() as u32;
            for ring in 0..=RINGS {
                let v = ring as f32 / RINGS as f32;
                let y = v * HEIGHT;
                for (u, side) in [(0.0, -1.0), (1.0, 1.0)] {
                    let position = normal * HALF + tangent * (HALF * side) + Vec3::Y * y;
                    let mut vertex = Vertex::new(position, normal, Vec2::new(u, 1.0 - v))
                        .with_tangent_frame(tangent, Vec3::Y);
                    column_weights(&mut vertex, y);
                    mesh.vertices.push(vertex);
                }
            }
            for ring in 0..RINGS {
                let a = base + ring * 2;
                mesh.indices
                    .extend_from_slice(&[a, a + 1, a + 3, a, a + 3, a + 2]);
            }
        }

        mesh.subsets.push(Subset {
            index_count: mesh.indices.len() as u32,
            start_index: 0,
            base_vertex: 0,
        });

        let cap_base_vertex = mesh.vertices.len() as u32;
        let cap_start_index = mesh.indices.len() as u32;
        for (y, normal) in [(0.0, -Vec3::Y), (HEIGHT, Vec3::Y)] {
            let local_base = mesh.vertices.len() as u32 - cap_base_vertex;
            for (x, z) in [(-HALF, -HALF), (HALF, -HALF), (HALF, HALF), (-HALF, HALF)] {
                let uv = Vec2::new(x / (2.0 * HALF) + 0.5, z / (2.0 * HALF) + 0.5);
                let mut vertex = Vertex::new(Vec3::new(x, y, z), normal, uv)
                    .with_tangent_frame(Vec3::X, Vec3::Z);
                column_weights(&mut vertex, y);
                mesh.vertices.push(vertex);
            }
            let q = local_base;
            if normal.y > 0.0 {
                mesh.indices
                    .extend_from_slice(&[q, q + 3, q + 2, q, q + 2, q + 1]);
            } else {
                mesh.indices
                    .extend_from_slice(&[q, q + 1, q + 2, q, q + 2, q + 3]);
            }
        }
        mesh.subsets.push(Subset {
            index_count: mesh.indices.len() as u32 - cap_start_index,
            start_index: cap_start_index,
            base_vertex: cap_base_vertex,
        });

        for (i, name) in ["Root", "Spine", "Head"].iter().enumerate() {
            let parent_id = i.saturating_sub(1);
            mesh.bones.push(BoneInfo {
                name: name.to_string(),
                parent_name: if i == 0 {
                    name.to_string()
                } else {
                    ["Root", "Spine", "Head"][parent_id].to_string()
                },
                parent_id,
                offset: Mat4::from_translation(Vec3::new(0.0, -(i as f32), 0.0)),
            });
        }

        let bend = |parent_offset: f32, angles: [f32; 3]| BoneAnimation {
            keyframes: angles
                .iter()
                .enumerate()
                .map(|(i, degrees)| Keyframe {
                    time: i as f32,
                    translation: Vec3::new(0.0, parent_offset, 0.0),
                    scale: Vec3::ONE,
                    rotation: Quat::from_rotation_z(degrees.to_radians()),
                })
                .collect(),
        };

        let root = BoneAnimation {
            keyframes: [0.0f32, 90.0, 0.0]
                .iter()
                .enumerate()
                .map(|(i, degrees)| Keyframe {
                    time: i as f32,
                    rotation: Quat::from_rotation_y(degrees.to_radians()),
                    ..Keyframe::default()
                })
                .collect(),
        };

        mesh.animations.insert(
            "Take1".to_string(),
            AnimationClip {
                bone_animations: vec![root, bend(1.0, [0.0, 30.0, 0.0]), bend(1.0, [0.0, 45.0, 0.0])],
            },
        );

        mesh
    }
}

/// Blend between the two bones bracketing height `y` (bones sit at y = 0, 1, 2).
fn column_weights(vertex: &mut Vertex, y: f32) {
    let lower = (y.floor() as u32).min(2);
    let t = (y - lower as f32).clamp(0.0, 1.0);
    if lower == 2 || t == 0.0 {
        vertex.add_bone_weight(lower, 1.0);
    } else {
        vertex.add_bone_weight(lower, 1.0 - t);
        vertex.add_bone_weight(lower + 1, t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(size_of::<Vertex>(), 104);
        assert_eq!(layout.array_stride, 104);

        let offsets = [
            offset_of!(Vertex, position),
            offset_of!(Vertex, colour),
            offset_of!(Vertex, uv),
            offset_of!(Vertex, normal),
            offset_of!(Vertex, tangent),
            offset_of!(Vertex, bitangent),
            offset_of!(Vertex, weights),
            offset_of!(Vertex, bones),
        ];
        for (attr, offset) in layout.attributes.iter().zip(offsets) {
            assert_eq!(attr.offset as usize, offset, "location {}", attr.location);
        }
    }

    #[test]
    fn test_add_bone_weight_uses_first_free_slot() {
        let mut v = Vertex::default();
        assert!(v.add_bone_weight(3, 0.5));
        assert!(v.add_bone_weight(7, 0.25));
        assert!(!v.add_bone_weight(1, 0.0));
        assert_eq!(v.bones[..2], [3, 7]);
        assert_eq!(v.weights, [0.5, 0.25, 0.0, 0.0]);
        assert!(v.add_bone_weight(8, 0.1));
        assert!(v.add_bone_weight(9, 0.1));
        assert!(!v.add_bone_weight(10, 0.05));
    }

    #[test]
    fn test_demo_column_shape() {
        let mesh = MeshData::demo_skinned_column();
        assert_eq!(mesh.subsets.len(), 2);
        assert_eq!(mesh.bones.len(), 3);
        assert!(mesh.animations.contains_key("Take1"));

        for v in &mesh.vertices {
            let sum: f32 = v.weights.iter().sum();
            assert!(sum <= 1.0 + 1e-6);
            assert!(v.bones.iter().all(|&b| (b as usize) < mesh.bones.len()));
        }

        for (i, bone) in mesh.bones.iter().enumerate() {
            assert!(bone.parent_id <= i.saturating_sub(1));
        }

        let caps = mesh.subsets[1];
        let indices =
            &mesh.indices[caps.start_index as usize..(caps.start_index + caps.index_count) as usize];
        for &index in indices {
            assert!(((index + caps.base_vertex) as usize) < mesh.vertices.len());
        }
        assert_eq!(
            mesh.subsets[0].index_count + caps.index_count,
            mesh.indices.len() as u32
        );
    }
}
