//! Per-frame bone palette evaluation

use super::{AnimationClip, AnimationError};
use crate::resources::{BoneInfo, MeshData};
use glam::Mat4;

/// Plays one clip against a skeleton and produces a skinning matrix per bone.
///
/// Scratch buffers are sized once at clip selection, so `update` does not
/// allocate.
#[derive(Debug, Clone)]
pub struct SkeletalAnimator {
    clip_name: String,
    clip: Option<AnimationClip>,
    end_time: f32,
    time: f32,
    time_scale: f32,
    local: Vec<Mat4>,
    to_root: Vec<Mat4>,
    final_transforms: Vec<Mat4>,
}

impl Default for SkeletalAnimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletalAnimator {
    pub fn new() -> Self {
        Self {
            clip_name: String::new(),
            clip: None,
            end_time: 0.0,
            time: 0.0,
            time_scale: 1.0,
            local: Vec::new(),
            to_root: Vec::new(),
            final_transforms: Vec::new(),
        }
    }

    /// Select the clip named `name` and rewind the clock.
    ///
    /// Returns `Ok(false)` when the mesh has no such clip; every bone then
    /// stays at the identity (bind pose). The skeleton order and clip shape
    /// are validated here so per-frame evaluation never indexes out of range.
    pub fn select_clip(&mut self, mesh: &MeshData, name: &str) -> Result<bool, AnimationError> {
        validate_hierarchy(&mesh.bones)?;

        let bone_count = mesh.bones.len();
        self.clip_name = name.to_string();
        self.clip = None;
        self.end_time = 0.0;
        self.time = 0.0;
        self.local = vec![Mat4::IDENTITY; bone_count];
        self.to_root = vec![Mat4::IDENTITY; bone_count];
        self.final_transforms = vec![Mat4::IDENTITY; bone_count];

        let clip = match mesh.animations.get(name) {
            Some(clip) => clip,
            None => {
                log::warn!("Animation clip '{}' not found, using bind pose", name);
                return Ok(false);
            }
        };

        validate_clip(name, clip, bone_count)?;
        if clip.bone_animations.len() > bone_count {
            log::warn!(
                "Clip '{}' has {} tracks for {} bones, extra tracks are ignored",
                name,
                clip.bone_animations.len(),
                bone_count
            );
        }

        self.end_time = clip.end_time();
        self.clip = Some(clip.clone());
        log::debug!(
            "Selected clip '{}' ({} bones, {:.2}s)",
            name,
            bone_count,
            self.end_time
        );
        Ok(true)
    }

    /// Advance the clock by `dt * time_scale` seconds and rebuild the palette.
    ///
    /// The clock restarts at zero once it passes the clip's end time.
    pub fn update(&mut self, dt: f32, bones: &[BoneInfo]) {
        if self.clip.is_none() {
            return;
        }
        self.time += dt * self.time_scale;
        if self.time > self.end_time {
            self.time = 0.0;
        }
        self.evaluate(bones);
    }

    /// Rebuild the palette at the current clock without advancing it
    pub fn evaluate(&mut self, bones: &[BoneInfo]) {
        let Some(clip) = &self.clip else {
            return;
        };
        debug_assert_eq!(bones.len(), self.local.len());

        clip.interpolate(self.time, &mut self.local);
        compose_root_transforms(&self.local, bones, &mut self.to_root);
        for ((out, to_root), bone) in self
            .final_transforms
            .iter_mut()
            .zip(&self.to_root)
            .zip(bones)
        {
            *out = *to_root * bone.offset;
        }
    }

    /// Jump the clock to `time` seconds
    pub fn set_time(&mut self, time: f32) {
        self.time = time.max(0.0);
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale;
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn clip_name(&self) -> &str {
        &self.clip_name
    }

    /// True when a clip was found at selection
    pub fn is_playing(&self) -> bool {
        self.clip.is_some()
    }

    pub fn end_time(&self) -> f32 {
        self.end_time
    }

    /// Bone transforms relative to the skeleton root
    pub fn root_transforms(&self) -> &[Mat4] {
        &self.to_root
    }

    /// Skinning palette, one matrix per bone
    pub fn final_transforms(&self) -> &[Mat4] {
        &self.final_transforms
    }
}

/// Walk bones parent-before-child and concatenate local transforms.
///
/// Bone 0 is the root. `out[i] = out[parent] * local[i]` for every other bone.
pub fn compose_root_transforms(local: &[Mat4], bones: &[BoneInfo], out: &mut [Mat4]) {
    if let (Some(first), Some(root)) = (out.first_mut(), local.first()) {
        *first = *root;
    }
    for i in 1..out.len().min(local.len()).min(bones.len()) {
        out[i] = out[bones[i].parent_id] * local[i];
    }
}

fn validate_hierarchy(bones: &[BoneInfo]) -> Result<(), AnimationError> {
    for (i, bone) in bones.iter().enumerate().skip(1) {
        if bone.parent_id >= i {
            return Err(AnimationError::InvalidHierarchy {
                bone: i,
                name: bone.name.clone(),
                parent: bone.parent_id,
            });
        }
    }
    match bones.first() {
        Some(root) if root.parent_id != 0 => Err(AnimationError::InvalidHierarchy {
            bone: 0,
            name: root.name.clone(),
            parent: root.parent_id,
        }),
        _ => Ok(()),
    }
}

fn validate_clip(name: &str, clip: &AnimationClip, bones: usize) -> Result<(), AnimationError> {
    if clip.bone_animations.len() < bones {
        return Err(AnimationError::TrackCountMismatch {
            clip: name.to_string(),
            tracks: clip.bone_animations.len(),
            bones,
        });
    }
    for (bone, track) in clip.bone_animations.iter().take(bones).enumerate() {
        if track.keyframes.is_empty() {
            return Err(AnimationError::EmptyTrack {
                clip: name.to_string(),
                bone,
            });
        }
        if let Some(index) = track
            .keyframes
            .windows(2)
            .position(|pair| pair[1].time < pair[0].time)
        {
            return Err(AnimationError::UnorderedKeyframes {
                clip: name.to_string(),
                bone,
                index: index + 1,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BoneAnimation, Keyframe};
    use glam::Vec3;

    fn bone(name: &str, parent_id: usize) -> BoneInfo {
        BoneInfo {
            name: name.into(),
            parent_name: String::new(),
            parent_id,
            offset: Mat4::IDENTITY,
        }
    }

    fn still(time: f32) -> BoneAnimation {
        BoneAnimation::new(vec![Keyframe {
            time,
            ..Keyframe::default()
        }])
    }

    fn mesh_with(bones: Vec<BoneInfo>, clip: AnimationClip) -> MeshData {
        let mut mesh = MeshData {
            bones,
            ..MeshData::default()
        };
        mesh.animations.insert("Take1".into(), clip);
        mesh
    }

    #[test]
    fn test_missing_clip_is_bind_pose() {
        let mesh = mesh_with(vec![bone("a", 0), bone("b", 0)], AnimationClip::default());
        let mut animator = SkeletalAnimator::new();
        assert!(!animator.select_clip(&mesh, "Run").unwrap());
        animator.update(5.0, &mesh.bones);
        assert_eq!(animator.final_transforms(), &[Mat4::IDENTITY; 2]);
        assert_eq!(animator.time(), 0.0);
    }

    #[test]
    fn test_short_clip_is_rejected() {
        let mesh = mesh_with(
            vec![bone("a", 0), bone("b", 0)],
            AnimationClip::new(vec![still(0.0)]),
        );
        let err = SkeletalAnimator::new().select_clip(&mesh, "Take1").unwrap_err();
        assert_eq!(
            err,
            AnimationError::TrackCountMismatch {
                clip: "Take1".into(),
                tracks: 1,
                bones: 2
            }
        );
    }

    #[test]
    fn test_empty_and_unordered_tracks_are_rejected() {
        let mesh = mesh_with(
            vec![bone("a", 0)],
            AnimationClip::new(vec![BoneAnimation::default()]),
        );
        assert!(matches!(
            SkeletalAnimator::new().select_clip(&mesh, "Take1"),
            Err(AnimationError::EmptyTrack { bone: 0, .. })
        ));

        let backwards = BoneAnimation::new(vec![
            Keyframe::default(),
            Keyframe {
                time: 2.0,
                ..Keyframe::default()
            },
            Keyframe {
                time: 1.0,
                ..Keyframe::default()
            },
        ]);
        let mesh = mesh_with(vec![bone("a", 0)], AnimationClip::new(vec![backwards]));
        assert!(matches!(
            SkeletalAnimator::new().select_clip(&mesh, "Take1"),
            Err(AnimationError::UnorderedKeyframes { index: 2, .. })
        ));
    }

    #[test]
    fn test_child_before_parent_is_rejected() {
        let mesh = mesh_with(
            vec![bone("a", 0), bone("b", 2), bone("c", 0)],
            AnimationClip::new(vec![still(0.0), still(0.0), still(0.0)]),
        );
        assert!(matches!(
            SkeletalAnimator::new().select_clip(&mesh, "Take1"),
            Err(AnimationError::InvalidHierarchy { bone: 1, parent: 2, .. })
        ));
    }

    #[test]
    fn test_extra_tracks_are_ignored() {
        let mesh = mesh_with(
            vec![bone("a", 0)],
            AnimationClip::new(vec![still(0.0), BoneAnimation::default()]),
        );
        let mut animator = SkeletalAnimator::new();
        assert!(animator.select_clip(&mesh, "Take1").unwrap());
        animator.update(0.1, &mesh.bones);
        assert_eq!(animator.final_transforms().len(), 1);
    }

    #[test]
    fn test_clock_wraps_to_zero_past_end() {
        let track = BoneAnimation::new(vec![
            Keyframe::default(),
            Keyframe {
                time: 1.0,
                translation: Vec3::X,
                ..Keyframe::default()
            },
        ]);
        let mesh = mesh_with(vec![bone("a", 0)], AnimationClip::new(vec![track]));
        let mut animator = SkeletalAnimator::new();
        animator.select_clip(&mesh, "Take1").unwrap();
        animator.set_time_scale(2.0);

        animator.update(0.25, &mesh.bones);
        assert!((animator.time() - 0.5).abs() < 1e-6);

        animator.update(0.3, &mesh.bones);
        assert_eq!(animator.time(), 0.0);
        assert_eq!(animator.final_transforms()[0], Mat4::IDENTITY);
    }

    #[test]
    fn test_offset_is_applied_after_root_transform() {
        let offset = Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0));
        let mut b = bone("a", 0);
        b.offset = offset;
        let pose = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0));
        let track = BoneAnimation::new(vec![Keyframe {
            translation: Vec3::new(2.0, 0.0, 0.0),
            ..Keyframe::default()
        }]);
        let mesh = mesh_with(vec![b], AnimationClip::new(vec![track]));
        let mut animator = SkeletalAnimator::new();
        animator.select_clip(&mesh, "Take1").unwrap();
        animator.evaluate(&mesh.bones);
        assert_eq!(animator.final_transforms()[0], pose * offset);
    }
}
