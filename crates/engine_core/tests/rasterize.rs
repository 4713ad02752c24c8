// crates/engine_core/tests/rasterize.rs
//! Draws shaded into the back buffer by the soft device's rasterizer.

mod common;

use engine_core::config::{RendererConfig, LIGHT_STEEL_BLUE};
use engine_core::gpu::soft::SoftDeviceConfig;
use engine_core::renderer::RenderLayer;
use glam::{Mat4, Vec3, Vec4};

use common::{config, quad_scene, Harness, QuadScene, DT};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn small_config() -> RendererConfig {
    RendererConfig {
        width: WIDTH,
        height: HEIGHT,
        ..config(2)
    }
}

fn harness(rasterize: bool, layers: &[RenderLayer]) -> (Harness, QuadScene) {
    let mut h = Harness::with_device(
        small_config(),
        SoftDeviceConfig {
            capture_presented: true,
            rasterize,
            ..Default::default()
        },
    );
    let scene = quad_scene(&mut h.renderer, &["Red", "Green"], layers);
    h.renderer.finish_setup().unwrap();

    // Looking down at the quad from above and in front; ambient only, no fog.
    let eye = Vec3::new(0.0, 1.5, -1.5);
    let view = Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_lh(0.25 * std::f32::consts::PI, WIDTH as f32 / HEIGHT as f32, 1.0, 1000.0);
    let pass = h.renderer.pass_constants_mut();
    pass.view_proj = (proj * view).to_cols_array_2d();
    pass.eye_pos_w = eye.to_array();
    pass.ambient_light = [1.0, 1.0, 1.0, 1.0];
    pass.fog_start = 100.0;
    pass.fog_range = 100.0;
    for light in &mut pass.lights {
        light.strength = [0.0; 3];
    }

    let materials = h.renderer.materials_mut();
    materials.get_mut(scene.materials[0]).unwrap().set_diffuse_albedo(Vec4::new(1.0, 0.0, 0.0, 1.0));
    materials.get_mut(scene.materials[1]).unwrap().set_diffuse_albedo(Vec4::new(0.0, 1.0, 0.0, 1.0));
    (h, scene)
}

fn pixel(image: &[u8], x: u32, y: u32) -> [u8; 4] {
    let at = ((y * WIDTH + x) * 4) as usize;
    [image[at], image[at + 1], image[at + 2], image[at + 3]]
}

fn clear_rgba() -> [u8; 4] {
    LIGHT_STEEL_BLUE.map(|c| (c * 255.0).round() as u8)
}

fn presented(h: &mut Harness) -> Vec<u8> {
    let report = h.frame(DT);
    h.settle(report.signalled_fence);
    h.assert_clean();
    h.soft.presented_image().unwrap().rgba
}

#[test]
fn quad_is_shaded_over_the_clear_color() {
    let (mut h, _) = harness(true, &[RenderLayer::Opaque]);
    let image = presented(&mut h);
    assert_eq!(pixel(&image, WIDTH / 2, HEIGHT / 2), [255, 0, 0, 255]);
    assert_eq!(pixel(&image, 0, 0), clear_rgba());
    assert_eq!(pixel(&image, WIDTH - 1, HEIGHT - 1), clear_rgba());
}

#[test]
fn nearer_quad_wins_the_depth_test_even_when_drawn_first() {
    // Item 0 (Red) is raised toward the eye and drawn before item 1 (Green).
    let (mut h, scene) = harness(true, &[RenderLayer::Opaque, RenderLayer::Opaque]);
    h.renderer
        .items_mut()
        .get_mut(scene.items[0])
        .unwrap()
        .set_world(Mat4::from_translation(Vec3::new(0.0, 0.25, 0.0)));

    let image = presented(&mut h);
    assert_eq!(pixel(&image, WIDTH / 2, HEIGHT / 2), [255, 0, 0, 255]);
}

#[test]
fn validation_only_devices_leave_the_clear_color() {
    let (mut h, _) = harness(false, &[RenderLayer::Opaque]);
    let image = presented(&mut h);
    assert!(image.chunks_exact(4).all(|px| px == clear_rgba()));
}
