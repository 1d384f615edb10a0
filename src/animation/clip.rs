//! Keyframes, per-bone tracks and clips

use glam::{Mat4, Quat, Vec3};

/// Pose of one bone at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Quat,
}

impl Default for Keyframe {
    fn default() -> Self {
        Self {
            time: 0.0,
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Keyframe {
    /// Scale, then rotate about the origin, then translate
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Time-ordered keyframes for a single bone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoneAnimation {
    pub keyframes: Vec<Keyframe>,
}

impl BoneAnimation {
    pub fn new(keyframes: Vec<Keyframe>) -> Self {
        Self { keyframes }
    }

    pub fn start_time(&self) -> f32 {
        self.keyframes.first().map_or(0.0, |k| k.time)
    }

    pub fn end_time(&self) -> f32 {
        self.keyframes.last().map_or(0.0, |k| k.time)
    }

    /// Local transform of the bone at `time`.
    ///
    /// Clamps to the first and last keyframes outside their range. Between
    /// two keyframes translation and scale are lerped and rotation is
    /// slerped along the shortest arc. The track must hold at least one
    /// keyframe, which clip selection guarantees.
    pub fn interpolate(&self, time: f32) -> Mat4 {
        let (first, last) = match (self.keyframes.first(), self.keyframes.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Mat4::IDENTITY,
        };

        if time <= first.time {
            return first.to_matrix();
        }
        if time >= last.time {
            return last.to_matrix();
        }

        for pair in self.keyframes.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if time >= a.time && time <= b.time {
                let span = b.time - a.time;
                if span <= 0.0 {
                    return b.to_matrix();
                }
                let t = (time - a.time) / span;
                return Mat4::from_scale_rotation_translation(
                    a.scale.lerp(b.scale, t),
                    a.rotation.slerp(b.rotation, t),
                    a.translation.lerp(b.translation, t),
                );
            }
        }

        last.to_matrix()
    }
}

/// One track per bone, matched to the skeleton by position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationClip {
    pub bone_animations: Vec<BoneAnimation>,
}

impl AnimationClip {
    pub fn new(bone_animations: Vec<BoneAnimation>) -> Self {
        Self { bone_animations }
    }

    /// Earliest first keyframe over all tracks
    pub fn start_time(&self) -> f32 {
        self.bone_animations
            .iter()
            .filter(|a| !a.keyframes.is_empty())
            .map(BoneAnimation::start_time)
            .reduce(f32::min)
            .unwrap_or(0.0)
    }

    /// Latest last keyframe over all tracks
    pub fn end_time(&self) -> f32 {
        self.bone_animations
            .iter()
            .filter(|a| !a.keyframes.is_empty())
            .map(BoneAnimation::end_time)
            .reduce(f32::max)
            .unwrap_or(0.0)
    }

    /// Local transforms of the first `out.len()` bones at `time`
    pub fn interpolate(&self, time: f32, out: &mut [Mat4]) {
        for (local, track) in out.iter_mut().zip(&self.bone_animations) {
            *local = track.interpolate(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn key(time: f32, x: f32) -> Keyframe {
        Keyframe {
            time,
            translation: Vec3::new(x, 0.0, 0.0),
            ..Keyframe::default()
        }
    }

    #[test]
    fn test_single_keyframe_is_constant() {
        let track = BoneAnimation::new(vec![key(0.5, 3.0)]);
        for t in [-1.0, 0.5, 10.0] {
            assert_eq!(track.interpolate(t), Mat4::from_translation(Vec3::X * 3.0));
        }
    }

    #[test]
    fn test_interpolate_picks_correct_bracket() {
        let track = BoneAnimation::new(vec![key(0.0, 0.0), key(1.0, 10.0), key(3.0, 30.0)]);
        let m = track.interpolate(2.0);
        assert!((m.w_axis.x - 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_interpolate_rotation_is_shortest_arc() {
        let a = Keyframe::default();
        let b = Keyframe {
            time: 1.0,
            // Same orientation as a quarter turn, but in the opposite hemisphere
            rotation: -Quat::from_rotation_y(FRAC_PI_2),
            ..Keyframe::default()
        };
        let track = BoneAnimation::new(vec![a, b]);
        let (_, rotation, _) = track.interpolate(0.5).to_scale_rotation_translation();
        let expected = Quat::from_rotation_y(FRAC_PI_2 * 0.5);
        assert!(rotation.dot(expected).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_clip_time_range() {
        let clip = AnimationClip::new(vec![
            BoneAnimation::new(vec![key(0.2, 0.0), key(1.0, 0.0)]),
            BoneAnimation::new(vec![key(0.1, 0.0), key(0.8, 0.0), key(2.5, 0.0)]),
        ]);
        assert_eq!(clip.start_time(), 0.1);
        assert_eq!(clip.end_time(), 2.5);
        assert_eq!(AnimationClip::default().end_time(), 0.0);
    }
}
