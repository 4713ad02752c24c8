// crates/engine_shared/src/constants.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Must match `MaxLights` in the shaders.
pub const MAX_LIGHTS: usize = 16;

/// Per-object constants, register `b0`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: [[f32; 4]; 4],
    pub tex_transform: [[f32; 4]; 4],
    pub displacement_map_texel_size: [f32; 2],
    pub grid_spatial_step: f32,
    pub _pad: f32,
}

impl ObjectConstants {
    pub fn new(world: Mat4, tex_transform: Mat4, texel_size: Vec2, grid_spatial_step: f32) -> Self {
        Self {
            world: world.to_cols_array_2d(),
            tex_transform: tex_transform.to_cols_array_2d(),
            displacement_map_texel_size: texel_size.to_array(),
            grid_spatial_step,
            _pad: 0.0,
        }
    }
}

impl Default for ObjectConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::ONE, 1.0)
    }
}

/// Per-material constants, register `b2`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub diffuse_albedo: [f32; 4],
    pub fresnel_r0: [f32; 3],
    pub roughness: f32,
    pub mat_transform: [[f32; 4]; 4],
}

impl MaterialConstants {
    pub fn new(diffuse_albedo: Vec4, fresnel_r0: Vec3, roughness: f32, mat_transform: Mat4) -> Self {
        Self {
            diffuse_albedo: diffuse_albedo.to_array(),
            fresnel_r0: fresnel_r0.to_array(),
            roughness,
            mat_transform: mat_transform.to_cols_array_2d(),
        }
    }
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self::new(Vec4::ONE, Vec3::splat(0.01), 0.25, Mat4::IDENTITY)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub strength: [f32; 3],
    pub falloff_start: f32,
    pub direction: [f32; 3],
    pub falloff_end: f32,
    pub position: [f32; 3],
    pub spot_power: f32,
}

impl Light {
    pub fn directional(direction: Vec3, strength: Vec3) -> Self {
        Self {
            direction: direction.to_array(),
            strength: strength.to_array(),
            ..Self::default()
        }
    }
}

impl Default for Light {
    fn default() -> Self {
        Self {
            strength: [0.5, 0.5, 0.5],
            falloff_start: 1.0,
            direction: [0.0, -1.0, 0.0],
            falloff_end: 10.0,
            position: [0.0, 0.0, 0.0],
            spot_power: 64.0,
        }
    }
}

/// Per-pass constants, register `b1`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PassConstants {
    pub view: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub eye_pos_w: [f32; 3],
    pub _pad0: f32,
    pub render_target_size: [f32; 2],
    pub inv_render_target_size: [f32; 2],
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub ambient_light: [f32; 4],
    pub fog_color: [f32; 4],
    pub fog_start: f32,
    pub fog_range: f32,
    pub _pad1: [f32; 2],
    pub lights: [Light; MAX_LIGHTS],
}

impl PassConstants {
    /// Fills every matrix (and its inverse) from a view and a projection.
    pub fn set_camera(&mut self, view: Mat4, proj: Mat4, eye: Vec3) {
        let view_proj = proj * view;
        self.view = view.to_cols_array_2d();
        self.inv_view = view.inverse().to_cols_array_2d();
        self.proj = proj.to_cols_array_2d();
        self.inv_proj = proj.inverse().to_cols_array_2d();
        self.view_proj = view_proj.to_cols_array_2d();
        self.inv_view_proj = view_proj.inverse().to_cols_array_2d();
        self.eye_pos_w = eye.to_array();
    }

    pub fn set_render_target_size(&mut self, width: u32, height: u32) {
        let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
        self.render_target_size = size.to_array();
        self.inv_render_target_size = size.recip().to_array();
    }
}

impl Default for PassConstants {
    fn default() -> Self {
        let identity = Mat4::IDENTITY.to_cols_array_2d();
        Self {
            view: identity,
            inv_view: identity,
            proj: identity,
            inv_proj: identity,
            view_proj: identity,
            inv_view_proj: identity,
            eye_pos_w: [0.0; 3],
            _pad0: 0.0,
            render_target_size: [1.0, 1.0],
            inv_render_target_size: [1.0, 1.0],
            near_z: 1.0,
            far_z: 1000.0,
            total_time: 0.0,
            delta_time: 0.0,
            ambient_light: [0.25, 0.25, 0.35, 1.0],
            fog_color: [0.7, 0.7, 0.7, 1.0],
            fog_start: 5.0,
            fog_range: 150.0,
            _pad1: [0.0; 2],
            lights: [Light::default(); MAX_LIGHTS],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The HLSL packing rules put these at exact byte sizes; a mismatch shifts
    // every field after it on the GPU side.
    #[test]
    fn layouts_match_hlsl_packing() {
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 144);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 96);
        assert_eq!(std::mem::size_of::<Light>(), 48);
        assert_eq!(
            std::mem::size_of::<PassConstants>(),
            6 * 64 + 16 + 16 + 16 + 16 + 16 + 16 + 48 * MAX_LIGHTS
        );
    }

    #[test]
    fn camera_inverse_round_trips() {
        let mut pass = PassConstants::default();
        let view = Mat4::look_at_lh(Vec3::new(0.0, 10.0, -20.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_lh(0.25 * std::f32::consts::PI, 16.0 / 9.0, 1.0, 1000.0);
        pass.set_camera(view, proj, Vec3::new(0.0, 10.0, -20.0));

        let vp = Mat4::from_cols_array_2d(&pass.view_proj);
        let inv = Mat4::from_cols_array_2d(&pass.inv_view_proj);
        assert!((vp * inv).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
