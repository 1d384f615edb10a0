//! Skeletal animation tests against small hand-built skeletons

mod common;

use common::{assert_mat_eq, chain_mesh, keyframe, walk_mesh};
use glam::{Mat4, Quat, Vec3};
use model_viewer::animation::{compose_root_transforms, BoneAnimation, Keyframe, SkeletalAnimator};
use rstest::rstest;
use std::f32::consts::FRAC_PI_2;

#[rstest]
#[case::before_first(-0.5, 0.0)]
#[case::at_first(0.0, 0.0)]
#[case::midway(0.5, 0.5)]
#[case::at_last(1.0, 1.0)]
#[case::after_last(7.0, 1.0)]
fn test_translation_is_clamped_and_lerped(#[case] time: f32, #[case] expected_x: f32) {
    let track = BoneAnimation::new(vec![
        keyframe(0.0, Vec3::ZERO, Quat::IDENTITY),
        keyframe(1.0, Vec3::X, Quat::IDENTITY),
    ]);
    assert_mat_eq(
        track.interpolate(time),
        Mat4::from_translation(Vec3::X * expected_x),
    );
}

#[test]
fn test_rotation_endpoints_match_keyframes() {
    let start = Quat::from_rotation_z(0.3);
    let end = Quat::from_rotation_z(1.2);
    let track = BoneAnimation::new(vec![
        keyframe(0.0, Vec3::ZERO, start),
        keyframe(2.0, Vec3::ZERO, end),
    ]);
    assert_mat_eq(track.interpolate(0.0), Mat4::from_quat(start));
    assert_mat_eq(track.interpolate(2.0), Mat4::from_quat(end));
    assert_mat_eq(track.interpolate(1.0), Mat4::from_quat(Quat::from_rotation_z(0.75)));
}

#[rstest]
#[case::quarter(0.25)]
#[case::three_quarters(0.75)]
fn test_rotation_follows_the_arc_not_the_chord(#[case] t: f32) {
    let full = 170f32.to_radians();
    let track = BoneAnimation::new(vec![
        keyframe(0.0, Vec3::ZERO, Quat::IDENTITY),
        keyframe(1.0, Vec3::ZERO, Quat::from_rotation_z(full)),
    ]);
    let (_, rotation, _) = track.interpolate(t).to_scale_rotation_translation();

    // Constant angular speed: the angle is exactly t of the way along
    let angle = rotation.angle_between(Quat::IDENTITY);
    assert!((angle - full * t).abs() < 1e-3, "angle {} at t {}", angle.to_degrees(), t);

    // A normalized linear blend lands noticeably elsewhere
    let chord = Quat::IDENTITY.lerp(Quat::from_rotation_z(full), t);
    assert!((chord.angle_between(Quat::IDENTITY) - full * t).abs() > 0.05);
}

#[test]
fn test_scale_is_blended_linearly() {
    let start = Keyframe {
        scale: Vec3::new(1.0, 2.0, 4.0),
        ..keyframe(0.0, Vec3::ZERO, Quat::IDENTITY)
    };
    let end = Keyframe {
        scale: Vec3::new(3.0, 2.0, 0.5),
        ..keyframe(2.0, Vec3::new(0.0, 8.0, 0.0), Quat::IDENTITY)
    };
    let track = BoneAnimation::new(vec![start, end]);

    let (scale, _, translation) = track.interpolate(0.5).to_scale_rotation_translation();
    assert!(scale.abs_diff_eq(Vec3::new(1.5, 2.0, 3.125), 1e-5), "{:?}", scale);
    assert!(translation.abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-5));
}

#[test]
fn test_walk_child_follows_root() {
    let mesh = walk_mesh();
    let mut animator = SkeletalAnimator::new();
    assert!(animator.select_clip(&mesh, "Walk").unwrap());
    assert_eq!(animator.end_time(), 1.0);

    animator.set_time(0.5);
    animator.evaluate(&mesh.bones);
    let expected = Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0));
    assert_mat_eq(animator.root_transforms()[1], expected);
    assert_mat_eq(animator.final_transforms()[1], expected);
}

#[test]
fn test_chain_composes_parent_before_child() {
    let root = keyframe(0.0, Vec3::new(1.0, 0.0, 0.0), Quat::from_rotation_z(FRAC_PI_2));
    let child = keyframe(0.0, Vec3::new(0.0, 2.0, 0.0), Quat::from_rotation_x(FRAC_PI_2));
    let grandchild = keyframe(0.0, Vec3::new(0.0, 0.0, 3.0), Quat::IDENTITY);
    let mesh = chain_mesh([root, child, grandchild]);

    let mut animator = SkeletalAnimator::new();
    animator.select_clip(&mesh, "Pose").unwrap();
    animator.evaluate(&mesh.bones);

    let expected = root.to_matrix() * child.to_matrix() * grandchild.to_matrix();
    assert_mat_eq(animator.root_transforms()[2], expected);

    // (0,0,3) -> rot x -> (0,-3,0) -> +(0,2,0) -> rot z -> (1,0,0) -> +(1,0,0)
    let origin = animator.root_transforms()[2].transform_point3(Vec3::ZERO);
    assert!(origin.abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5), "{:?}", origin);
}

#[test]
fn test_compose_root_transforms_directly() {
    let mesh = chain_mesh([Default::default(), Default::default(), Default::default()]);
    let local = [
        Mat4::from_translation(Vec3::X),
        Mat4::from_rotation_y(FRAC_PI_2),
        Mat4::from_translation(Vec3::Z),
    ];
    let mut out = [Mat4::IDENTITY; 3];
    compose_root_transforms(&local, &mesh.bones, &mut out);
    assert_mat_eq(out[0], local[0]);
    assert_mat_eq(out[1], local[0] * local[1]);
    assert_mat_eq(out[2], local[0] * local[1] * local[2]);
}

#[test]
fn test_missing_clip_keeps_bind_pose() {
    let mesh = walk_mesh();
    let mut animator = SkeletalAnimator::new();
    assert!(!animator.select_clip(&mesh, "Run").unwrap());
    assert!(!animator.is_playing());
    animator.update(0.4, &mesh.bones);
    assert_eq!(animator.final_transforms(), &[Mat4::IDENTITY; 2]);
}

#[rstest]
#[case::inside(0.4, 1.0, 0.4)]
#[case::scaled(0.3, 2.0, 0.6)]
#[case::wraps(1.2, 1.0, 0.0)]
fn test_clock_advances_by_scaled_dt(#[case] dt: f32, #[case] scale: f32, #[case] expected: f32) {
    let mesh = walk_mesh();
    let mut animator = SkeletalAnimator::new();
    animator.select_clip(&mesh, "Walk").unwrap();
    animator.set_time_scale(scale);
    animator.update(dt, &mesh.bones);
    assert!((animator.time() - expected).abs() < 1e-5);
}
