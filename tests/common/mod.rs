//! Shared fixtures for the integration tests

#![allow(dead_code)]

use glam::{Mat4, Quat, Vec2, Vec3};
use model_viewer::animation::{AnimationClip, BoneAnimation, Keyframe};
use model_viewer::backend::dummy::RecordingRenderer;
use model_viewer::backend::{Renderer, Shader};
use model_viewer::resources::{BoneInfo, MeshData, Subset, Vertex};

pub const SURFACE_WIDTH: u32 = 320;
pub const SURFACE_HEIGHT: u32 = 240;

pub fn bone(name: &str, parent: Option<(&str, usize)>) -> BoneInfo {
    let (parent_name, parent_id) = parent.unwrap_or((name, 0));
    BoneInfo {
        name: name.to_string(),
        parent_name: parent_name.to_string(),
        parent_id,
        offset: Mat4::IDENTITY,
    }
}

pub fn keyframe(time: f32, translation: Vec3, rotation: Quat) -> Keyframe {
    Keyframe {
        time,
        translation,
        rotation,
        ..Keyframe::default()
    }
}

/// Two triangles, each in its own subset
pub fn quad_vertices() -> Vec<Vertex> {
    [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
        .into_iter()
        .map(|(x, y)| {
            let mut v = Vertex::new(Vec3::new(x, y, 0.0), Vec3::Z, Vec2::new(x, y) * 0.5 + 0.5);
            v.add_bone_weight(0, 1.0);
            v
        })
        .collect()
}

/// Two-bone mesh with a one second "Walk" clip: the root slides from the
/// origin to x = 1, the child stays put relative to it
pub fn walk_mesh() -> MeshData {
    let mut mesh = MeshData {
        vertices: quad_vertices(),
        indices: vec![0, 1, 2, 0, 2, 3],
        subsets: vec![
            Subset {
                index_count: 3,
                start_index: 0,
                base_vertex: 0,
            },
            Subset {
                index_count: 3,
                start_index: 3,
                base_vertex: 0,
            },
        ],
        bones: vec![bone("Root", None), bone("Child", Some(("Root", 0)))],
        ..MeshData::default()
    };
    let root = BoneAnimation::new(vec![
        keyframe(0.0, Vec3::ZERO, Quat::IDENTITY),
        keyframe(1.0, Vec3::X, Quat::IDENTITY),
    ]);
    let child = BoneAnimation::new(vec![
        keyframe(0.0, Vec3::ZERO, Quat::IDENTITY),
        keyframe(1.0, Vec3::ZERO, Quat::IDENTITY),
    ]);
    mesh.animations
        .insert("Walk".to_string(), AnimationClip::new(vec![root, child]));
    mesh
}

/// root -> child -> grandchild with the given still poses
pub fn chain_mesh(locals: [Keyframe; 3]) -> MeshData {
    let mut mesh = MeshData {
        vertices: quad_vertices(),
        indices: vec![0, 1, 2],
        bones: vec![
            bone("Root", None),
            bone("Child", Some(("Root", 0))),
            bone("Grandchild", Some(("Child", 1))),
        ],
        ..MeshData::default()
    };
    let tracks = locals.map(|k| BoneAnimation::new(vec![k])).to_vec();
    mesh.animations
        .insert("Pose".to_string(), AnimationClip::new(tracks));
    mesh
}

pub fn recording_renderer() -> RecordingRenderer {
    RecordingRenderer::new(SURFACE_WIDTH, SURFACE_HEIGHT)
}

pub fn model_shader(renderer: &mut RecordingRenderer) -> Shader {
    match renderer.create_shader(&model_viewer::shader::descriptor()) {
        Ok(shader) => shader,
        Err(e) => panic!("model shader rejected: {}", e),
    }
}

pub fn assert_mat_eq(actual: Mat4, expected: Mat4) {
    assert!(
        actual.abs_diff_eq(expected, 1e-5),
        "matrices differ:\n{:?}\n{:?}",
        actual,
        expected
    );
}
