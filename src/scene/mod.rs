//! Camera and light placement for the viewer

mod camera;

pub use camera::*;

use glam::Vec3;

/// Single directional light with Blinn-Phong terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in
    pub direction: Vec3,
    pub diffuse: f32,
    pub ambient: f32,
    pub specular: f32,
    pub specular_power: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.8, -0.5, 0.5).normalize(),
            diffuse: 1.0,
            ambient: 0.5,
            specular: 0.1,
            specular_power: 32.0,
        }
    }
}
