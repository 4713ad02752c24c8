// crates/editor/src/camera.rs
use std::f32::consts::PI;

use glam::{Mat4, Vec2, Vec3};

/// Spherical-coordinate camera orbiting the origin.
#[derive(Clone, Debug, PartialEq)]
pub struct OrbitCamera {
    pub theta: f32,
    pub phi: f32,
    pub radius: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            theta: 1.5 * PI,
            phi: 0.2 * PI,
            radius: 50.0,
        }
    }
}

impl OrbitCamera {
    pub const MIN_RADIUS: f32 = 5.0;
    pub const MAX_RADIUS: f32 = 150.0;
    const PHI_MARGIN: f32 = 0.1;

    /// Left-drag: each pixel is a quarter of a degree.
    pub fn rotate(&mut self, delta: Vec2) {
        let d = delta * 0.25_f32.to_radians();
        self.theta += d.x;
        self.phi = (self.phi + d.y).clamp(Self::PHI_MARGIN, PI - Self::PHI_MARGIN);
    }

    /// Right-drag: each pixel moves 0.2 units.
    pub fn zoom(&mut self, delta: Vec2) {
        let d = 0.2 * (delta.x - delta.y);
        self.radius = (self.radius + d).clamp(Self::MIN_RADIUS, Self::MAX_RADIUS);
    }

    pub fn eye(&self) -> Vec3 {
        Vec3::new(
            self.radius * self.phi.sin() * self.theta.cos(),
            self.radius * self.phi.cos(),
            self.radius * self.phi.sin() * self.theta.sin(),
        )
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_lh(self.eye(), Vec3::ZERO, Vec3::Y)
    }

    pub fn proj(aspect: f32) -> Mat4 {
        Mat4::perspective_lh(0.25 * PI, aspect, 1.0, 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phi_stays_off_the_poles() {
        let mut c = OrbitCamera::default();
        c.rotate(Vec2::new(0.0, 100_000.0));
        assert!((c.phi - (PI - 0.1)).abs() < 1e-5);
        c.rotate(Vec2::new(0.0, -100_000.0));
        assert!((c.phi - 0.1).abs() < 1e-5);
    }

    #[test]
    fn radius_is_clamped() {
        let mut c = OrbitCamera::default();
        c.zoom(Vec2::new(10_000.0, 0.0));
        assert_eq!(c.radius, OrbitCamera::MAX_RADIUS);
        c.zoom(Vec2::new(-10_000.0, 0.0));
        assert_eq!(c.radius, OrbitCamera::MIN_RADIUS);
    }

    #[test]
    fn eye_lies_on_the_sphere() {
        let c = OrbitCamera::default();
        assert!((c.eye().length() - c.radius).abs() < 1e-3);
    }
}
