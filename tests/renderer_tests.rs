//! Renderer contract tests run against the recording renderer

mod common;

use common::{recording_renderer, SURFACE_HEIGHT, SURFACE_WIDTH};
use model_viewer::app::{apply_command, ViewerCommand};
use model_viewer::backend::dummy::{RecordedEvent, RecordingRenderer};
use model_viewer::backend::{Renderer, RendererError, RendererSettings};
use model_viewer::resources::TextureData;
use model_viewer::BackendType;
use rstest::rstest;

#[rstest]
#[case::two(2)]
#[case::four(4)]
#[case::eight(8)]
fn test_disabling_msaa_releases_targets(#[case] level: u32) {
    let mut renderer = recording_renderer();
    renderer
        .create_anti_aliasing_target(level, SURFACE_WIDTH, SURFACE_HEIGHT)
        .unwrap();
    assert_eq!(renderer.msaa_level(), level);
    assert!(renderer.live_resources().multisample_targets > 0);

    renderer
        .create_anti_aliasing_target(0, SURFACE_WIDTH, SURFACE_HEIGHT)
        .unwrap();
    assert_eq!(renderer.msaa_level(), 0);
    assert_eq!(renderer.live_resources().multisample_targets, 0);
}

#[rstest]
#[case::three(3)]
#[case::sixteen(16)]
fn test_unsupported_msaa_level_is_rejected(#[case] level: u32) {
    let mut renderer = recording_renderer();
    let result = renderer.create_anti_aliasing_target(level, SURFACE_WIDTH, SURFACE_HEIGHT);
    assert!(matches!(result, Err(RendererError::InvalidParameter(_))));
    assert_eq!(renderer.msaa_level(), 0);
    assert_eq!(renderer.live_resources().multisample_targets, 0);
}

#[test]
fn test_level_one_means_off() {
    let mut renderer = recording_renderer();
    renderer.create_anti_aliasing_target(4, 8, 8).unwrap();
    renderer.create_anti_aliasing_target(1, 8, 8).unwrap();
    assert_eq!(renderer.msaa_level(), 0);
}

#[test]
fn test_present_after_resize_uses_new_size() {
    let mut renderer = recording_renderer();
    renderer.create_anti_aliasing_target(4, SURFACE_WIDTH, SURFACE_HEIGHT).unwrap();
    renderer.resize(800, 600).unwrap();
    renderer.clear().unwrap();
    renderer.present().unwrap();

    assert_eq!(
        renderer.events(),
        &[
            RecordedEvent::Resize {
                width: 800,
                height: 600
            },
            RecordedEvent::Clear {
                width: 800,
                height: 600,
                samples: 4
            },
            RecordedEvent::Present {
                width: 800,
                height: 600,
                resolved: true
            },
        ]
    );
    assert_eq!(renderer.msaa_level(), 4);
}

#[test]
fn test_zero_resize_is_ignored() {
    let mut renderer = recording_renderer();
    renderer.resize(0, 100).unwrap();
    assert_eq!(renderer.surface_size(), (SURFACE_WIDTH, SURFACE_HEIGHT));
    assert!(renderer.events().is_empty());
}

#[test]
fn test_create_applies_settings() {
    let settings = RendererSettings {
        vsync: false,
        msaa_level: 8,
        anisotropy: 4,
        wireframe: true,
    };
    let renderer = RecordingRenderer::create(64, 64, &settings)
        .unwrap()
        .with_api(BackendType::Vulkan);
    assert_eq!(renderer.api(), BackendType::Vulkan);
    assert!(!renderer.vsync());
    assert_eq!(renderer.msaa_level(), 8);
    assert_eq!(renderer.anisotropic_filter(), 4);
    assert!(renderer.is_wireframe());
    assert_eq!(renderer.max_msaa_level(), 8);
}

#[test]
fn test_texture_upload_validates_mip_sizes() {
    let mut renderer = recording_renderer();
    let mut data = TextureData::solid_color([255, 0, 0, 255], "red");
    let texture = renderer.upload_texture_2d(&data).unwrap();
    assert_eq!((texture.width(), texture.height()), (1, 1));
    assert_eq!(renderer.texture_data(texture.handle()).map(|d| d.name.as_str()), Some("red"));

    data.mips[0].data.pop();
    assert!(renderer.upload_texture_2d(&data).is_err());
    assert_eq!(renderer.live_resources().textures, 1);
    renderer.release_texture_2d(texture);
    assert_eq!(renderer.live_resources().total(), 0);
}

#[test]
fn test_commands_cycle_renderer_state() {
    let mut renderer = recording_renderer();

    let mut seen = Vec::new();
    for _ in 0..4 {
        apply_command(&mut renderer, ViewerCommand::CycleMsaa).unwrap();
        seen.push(renderer.msaa_level());
    }
    assert_eq!(seen, [2, 4, 8, 0]);
    assert_eq!(renderer.live_resources().multisample_targets, 0);

    apply_command(&mut renderer, ViewerCommand::ToggleWireframe).unwrap();
    assert!(renderer.is_wireframe());
    apply_command(&mut renderer, ViewerCommand::CycleAnisotropy).unwrap();
    assert_eq!(renderer.anisotropic_filter(), 2);
    apply_command(&mut renderer, ViewerCommand::ToggleVsync).unwrap();
    assert!(!renderer.vsync());
}

#[test]
fn test_texture_upload_rejects_levels_past_full_chain() {
    let mut renderer = recording_renderer();
    let mut data = TextureData::solid_color([0, 255, 0, 255], "green");
    data.mips.extend(std::iter::repeat(data.mips[0].clone()).take(5));

    let result = renderer.upload_texture_2d(&data);
    assert!(matches!(result, Err(RendererError::TextureCreationFailed(msg)) if msg.contains("mip levels")));
    assert_eq!(renderer.live_resources().textures, 0);
}
