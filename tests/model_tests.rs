//! Model loading, drawing and release against the recording renderer

mod common;

use common::{model_shader, recording_renderer, walk_mesh};
use glam::{Mat4, Vec3};
use model_viewer::app::draw_frame;
use model_viewer::backend::dummy::RecordedEvent;
use model_viewer::backend::{ConstantSlot, PrimitiveTopology, Renderer, TextureSlot};
use model_viewer::model::{FrameUniforms, ModelTextures};
use model_viewer::resources::{mesh_file, MeshData, TextureData};
use model_viewer::scene::Camera;
use model_viewer::shader::MAX_BONES;
use model_viewer::{Model, ModelError, ViewerConfig};

#[test]
fn test_subsets_are_drawn_in_order() {
    let mut renderer = recording_renderer();
    let shader = model_shader(&mut renderer);
    let mut model = Model::load(&mut renderer, walk_mesh(), ModelTextures::default(), "Walk").unwrap();

    draw_frame(&mut renderer, &mut model, &shader, &Camera::default(), 0.25).unwrap();

    let events = renderer.take_events();
    assert!(matches!(events.first(), Some(RecordedEvent::Clear { .. })));
    assert!(matches!(events.last(), Some(RecordedEvent::Present { .. })));

    let draws: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RecordedEvent::Draw(draw) => Some(draw),
            _ => None,
        })
        .collect();
    assert_eq!(draws.len(), 2);
    assert_eq!(
        draws.iter().map(|d| d.start_index).collect::<Vec<_>>(),
        [0, 3]
    );
    for draw in draws {
        assert_eq!(draw.index_count, 3);
        assert_eq!(draw.shader, Some(shader.handle()));
        assert_eq!(draw.vertex_buffer, model.vertex_buffer().map(|b| b.handle()));
        assert_eq!(draw.index_buffer, model.index_buffer().map(|b| b.handle()));
        assert_eq!(
            draw.constants[ConstantSlot::Bones.index()],
            model.bone_constants().map(|b| b.handle())
        );
        assert_eq!(draw.topology, PrimitiveTopology::TriangleList);
        assert_eq!(draw.textures, [None; TextureSlot::COUNT]);
    }

    model.release(&mut renderer);
    renderer.release_shader(shader);
}

#[test]
fn test_bone_palette_is_uploaded() {
    let mut renderer = recording_renderer();
    let shader = model_shader(&mut renderer);
    let mut model = Model::load(&mut renderer, walk_mesh(), ModelTextures::default(), "Walk").unwrap();

    draw_frame(&mut renderer, &mut model, &shader, &Camera::default(), 0.5).unwrap();

    let palette = model
        .bone_constants()
        .and_then(|b| renderer.constant_data(b.handle()))
        .unwrap();
    let child: Mat4 = bytemuck::pod_read_unaligned(&palette[64..128]);
    let expected = Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0));
    assert!(child.abs_diff_eq(expected, 1e-5));

    let frame = model
        .frame_constants()
        .and_then(|b| renderer.constant_data(b.handle()))
        .unwrap();
    let uniforms: FrameUniforms = bytemuck::pod_read_unaligned(frame);
    assert_eq!(uniforms.options[0], 2);

    model.release(&mut renderer);
    renderer.release_shader(shader);
}

#[test]
fn test_release_frees_everything() {
    let mut renderer = recording_renderer();
    let shader = model_shader(&mut renderer);
    let textures = ModelTextures {
        diffuse: Some(TextureData::solid_color([200, 10, 10, 255], "red")),
        normal: None,
    };
    let model = Model::load(&mut renderer, walk_mesh(), textures, "Walk").unwrap();

    let live = renderer.live_resources();
    assert_eq!(live.vertex_buffers, 1);
    assert_eq!(live.index_buffers, 1);
    assert_eq!(live.constant_buffers, 2);
    assert_eq!(live.textures, 1);
    assert!(model.texture(TextureSlot::Diffuse).is_some());
    assert!(model.texture(TextureSlot::Normal).is_none());

    model.release(&mut renderer);
    renderer.release_shader(shader);
    assert_eq!(renderer.live_resources().total(), 0);
}

#[test]
fn test_failed_load_leaves_nothing_behind() {
    let mut renderer = recording_renderer();
    let mut broken = TextureData::solid_color([0, 0, 0, 255], "broken");
    broken.mips[0].data.clear();
    let textures = ModelTextures {
        diffuse: None,
        normal: Some(broken),
    };
    let result = Model::load(&mut renderer, walk_mesh(), textures, "Walk");
    assert!(matches!(result, Err(ModelError::Renderer(_))));
    assert_eq!(renderer.live_resources().total(), 0);
}

#[test]
fn test_mesh_limits_are_checked() {
    let mut renderer = recording_renderer();

    let result = Model::load(&mut renderer, MeshData::default(), ModelTextures::default(), "Take1");
    assert!(matches!(result, Err(ModelError::EmptyMesh)));

    let mut mesh = walk_mesh();
    let extra = mesh.bones[1].clone();
    mesh.bones.resize(MAX_BONES + 1, extra);
    let result = Model::load(&mut renderer, mesh, ModelTextures::default(), "Walk");
    assert!(matches!(
        result,
        Err(ModelError::TooManyBones { bones, max }) if bones == MAX_BONES + 1 && max == MAX_BONES
    ));
    assert_eq!(renderer.live_resources().total(), 0);
}

#[test]
fn test_missing_clip_still_draws() {
    let mut renderer = recording_renderer();
    let shader = model_shader(&mut renderer);
    let mut model = Model::load(&mut renderer, walk_mesh(), ModelTextures::default(), "Run").unwrap();
    assert!(!model.animator().is_playing());

    draw_frame(&mut renderer, &mut model, &shader, &Camera::default(), 0.1).unwrap();
    assert_eq!(renderer.draws().count(), 2);
    assert!(model.animator().final_transforms().iter().all(|m| *m == Mat4::IDENTITY));

    model.release(&mut renderer);
    renderer.release_shader(shader);
}

#[test]
fn test_from_config_reads_mesh_file() {
    let path = std::env::temp_dir().join(format!("model_viewer_walk_{}.mesh", std::process::id()));
    mesh_file::save(&walk_mesh(), &path).unwrap();

    let config = ViewerConfig {
        model_path: Some(path.clone()),
        clip: "Walk".to_string(),
        time_scale: 0.5,
        ..Default::default()
    };
    let mut renderer = recording_renderer();
    let model = Model::from_config(&mut renderer, &config);
    let _ = std::fs::remove_file(&path);
    let model = model.unwrap();

    assert_eq!(model.mesh().bones.len(), 2);
    assert_eq!(model.subsets().len(), 2);
    assert!(model.animator().is_playing());
    assert_eq!(model.animator().time_scale(), 0.5);
    model.release(&mut renderer);
}

#[test]
fn test_default_config_shows_demo_column() {
    let mut renderer = recording_renderer();
    let model = Model::from_config(&mut renderer, &ViewerConfig::default()).unwrap();
    assert_eq!(model.mesh().bones.len(), 3);
    assert_eq!(model.subsets().len(), 2);
    assert!(model.animator().is_playing());
    model.release(&mut renderer);
}
