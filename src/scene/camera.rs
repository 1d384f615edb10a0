//! Viewer camera and its orbit controller

use glam::{Mat4, Vec2, Vec3};

/// Perspective projection parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self::perspective(50.0, 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Right-handed projection into a 0..1 depth range
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// Camera looking at a target point
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    /// Update aspect ratio from a surface size; zero sizes are ignored
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.projection.aspect = width as f32 / height as f32;
        }
    }
}

/// Pointer input gathered between two frames
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Cursor movement in pixels
    pub mouse_delta: Vec2,
    /// Wheel movement, positive zooms in
    pub scroll_delta: f32,
    /// Orbit button held
    pub orbiting: bool,
}

impl CameraInput {
    /// Reset per-frame deltas (call after update)
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }
}

/// Orbits the camera around a target point.
///
/// Dragging changes azimuth and elevation, the wheel changes the distance.
#[derive(Debug, Clone)]
pub struct OrbitController {
    pub target: Vec3,
    pub distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Horizontal angle in radians
    pub azimuth: f32,
    /// Vertical angle in radians
    pub elevation: f32,
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// Radians per pixel
    pub orbit_sensitivity: f32,
    /// Distance factor per wheel notch
    pub zoom_factor: f32,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 10.0,
            min_distance: 1.0,
            max_distance: 100.0,
            azimuth: 0.0,
            elevation: std::f32::consts::FRAC_PI_6,
            min_elevation: -std::f32::consts::FRAC_PI_2 + 0.05,
            max_elevation: std::f32::consts::FRAC_PI_2 - 0.05,
            orbit_sensitivity: 0.005,
            zoom_factor: 1.1,
        }
    }
}

impl OrbitController {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            ..Default::default()
        }
    }

    pub fn with_angles(mut self, azimuth_degrees: f32, elevation_degrees: f32) -> Self {
        self.azimuth = azimuth_degrees.to_radians();
        self.elevation = elevation_degrees
            .to_radians()
            .clamp(self.min_elevation, self.max_elevation);
        self
    }

    /// Camera position for the current angles and distance
    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.elevation.cos() * self.azimuth.sin();
        let y = self.distance * self.elevation.sin();
        let z = self.distance * self.elevation.cos() * self.azimuth.cos();
        self.target + Vec3::new(x, y, z)
    }

    /// Apply input and place `camera` on the orbit
    pub fn update(&mut self, camera: &mut Camera, input: &CameraInput) {
        if input.scroll_delta > 0.0 {
            self.distance /= self.zoom_factor.powf(input.scroll_delta);
        } else if input.scroll_delta < 0.0 {
            self.distance *= self.zoom_factor.powf(-input.scroll_delta);
        }
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);

        if input.orbiting && input.mouse_delta != Vec2::ZERO {
            self.azimuth -= input.mouse_delta.x * self.orbit_sensitivity;
            self.elevation += input.mouse_delta.y * self.orbit_sensitivity;
            self.elevation = self.elevation.clamp(self.min_elevation, self.max_elevation);
            self.azimuth %= std::f32::consts::TAU;
        }

        camera.position = self.position();
        camera.target = self.target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_position() {
        let orbit = OrbitController::new(Vec3::ZERO, 8.0).with_angles(0.0, 30.0);
        let position = orbit.position();
        assert!((position.length() - 8.0).abs() < 1e-4);
        assert!((position.y - 4.0).abs() < 1e-4);
        assert!(position.x.abs() < 1e-4);
    }

    #[test]
    fn test_zoom_is_clamped() {
        let mut orbit = OrbitController::new(Vec3::ZERO, 2.0);
        let mut camera = Camera::default();
        let input = CameraInput {
            scroll_delta: 50.0,
            ..Default::default()
        };
        orbit.update(&mut camera, &input);
        assert_eq!(orbit.distance, orbit.min_distance);
        assert_eq!(camera.target, Vec3::ZERO);
    }

    #[test]
    fn test_drag_only_orbits_while_held() {
        let mut orbit = OrbitController::default();
        let mut camera = Camera::default();
        let mut input = CameraInput {
            mouse_delta: Vec2::new(100.0, 0.0),
            ..Default::default()
        };
        orbit.update(&mut camera, &input);
        assert_eq!(orbit.azimuth, 0.0);

        input.orbiting = true;
        orbit.update(&mut camera, &input);
        assert!(orbit.azimuth != 0.0);
    }

    #[test]
    fn test_set_aspect_ignores_zero() {
        let mut camera = Camera::default();
        camera.set_aspect(800, 400);
        assert_eq!(camera.projection.aspect, 2.0);
        camera.set_aspect(0, 400);
        assert_eq!(camera.projection.aspect, 2.0);
    }
}
