// crates/editor/src/scene.rs
//! Hills, animated water, a wire-fence crate, tree billboards, a fireball
//! icosahedron and a tessellated patch.

use std::path::PathBuf;

use glam::{Mat4, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use engine_core::app::Application;
use engine_core::error::EngineError;
use engine_core::geometry::{GeometryGenerator, MeshData};
use engine_core::gpu::PrimitiveTopology;
use engine_core::input::{DragButton, InputPoller, KeyCode};
use engine_core::present::PresentSurface;
use engine_core::renderer::{
    BlurSettings, FrameTime, GeometryId, IndexData, MaterialId, MaterialParams, RenderItem, RenderLayer, Renderer,
    SubmeshGeometry,
};
use engine_core::texture_loader::DdsTextureLoader;
use engine_shared::{Light, TreeSpriteVertex};

use crate::camera::OrbitCamera;

/// Optional layers this scene fills.
pub const DEMO_LAYERS: [RenderLayer; 2] = [RenderLayer::TreeSprites, RenderLayer::Icosahedron];

const DISTURB_INTERVAL: f32 = 0.25;
const TREE_COUNT: usize = 16;

/// (texture name, file under the texture directory, material name)
const TEXTURES: [(&str, &str, &str); 6] = [
    ("grassTex", "grass.dds", "Grass"),
    ("waterTex", "water1.dds", "Water"),
    ("fenceTex", "WireFence.dds", "WireFence"),
    ("fireBallTex", "FireBall.dds", "FireBall"),
    ("treeArrayTex", "treeArray2.dds", "TreeSprite"),
    ("whiteTex", "white1x1.dds", "White"),
];

pub fn hills_height(x: f32, z: f32) -> f32 {
    0.3 * (z * (0.1 * x).sin() + x * (0.1 * z).cos())
}

pub fn hills_normal(x: f32, z: f32) -> Vec3 {
    let dfdx = 0.03 * z * (0.1 * x).cos() + 0.3 * (0.1 * z).cos();
    let dfdz = 0.3 * (0.1 * x).sin() - 0.03 * x * (0.1 * z).sin();
    Vec3::new(-dfdx, 1.0, -dfdz).normalize()
}

/// W/S step the spatial sigma down/up, A/D the iteration count up/down and
/// Q/E the intensity sigma down/up, never below zero. Returns false for
/// keys that are not blur controls.
pub fn adjust_blur(blur: &mut BlurSettings, key: KeyCode) -> bool {
    match key {
        KeyCode::KeyW => blur.spatial_sigma = (blur.spatial_sigma - 1.0).max(0.0),
        KeyCode::KeyS => blur.spatial_sigma += 1.0,
        KeyCode::KeyA => blur.count += 1,
        KeyCode::KeyD => blur.count = blur.count.saturating_sub(1),
        KeyCode::KeyQ => blur.intensity_sigma = (blur.intensity_sigma - 1.0).max(0.0),
        KeyCode::KeyE => blur.intensity_sigma += 1.0,
        _ => return false,
    }
    true
}

fn material_params(name: &str) -> MaterialParams {
    match name {
        "Grass" => MaterialParams::new(Vec4::ONE, Vec3::splat(0.01), 0.125),
        "Water" => MaterialParams::new(Vec4::new(1.0, 1.0, 1.0, 0.5), Vec3::splat(0.1), 0.0),
        "White" => MaterialParams::new(Vec4::ONE, Vec3::splat(0.1), 0.5),
        _ => MaterialParams::new(Vec4::ONE, Vec3::splat(0.02), 0.25),
    }
}

pub struct TextureWavesApp {
    title: String,
    texture_dir: PathBuf,
    camera: OrbitCamera,
    rng: StdRng,
    disturb_timer: f32,
    water_offset: Vec2,
}

impl TextureWavesApp {
    pub fn new(texture_dir: PathBuf) -> Self {
        Self::with_rng(texture_dir, StdRng::from_entropy())
    }

    pub fn with_rng(texture_dir: PathBuf, rng: StdRng) -> Self {
        Self {
            title: "Texture Waves".to_string(),
            texture_dir,
            camera: OrbitCamera::default(),
            rng,
            disturb_timer: 0.0,
            water_offset: Vec2::ZERO,
        }
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn water_offset(&self) -> Vec2 {
        self.water_offset
    }

    fn upload_mesh<S: PresentSurface>(
        renderer: &mut Renderer<S>,
        name: &str,
        mesh: &MeshData,
    ) -> Result<(GeometryId, SubmeshGeometry), EngineError> {
        let whole = SubmeshGeometry {
            index_count: mesh.indices.len() as u32,
            start_index: 0,
            base_vertex: 0,
        };
        let id = if mesh.vertices.len() <= usize::from(u16::MAX) {
            let indices = mesh.indices16();
            renderer.upload_geometry(name, &mesh.vertices, IndexData::U16(&indices), &[("whole", whole)])?
        } else {
            renderer.upload_geometry(name, &mesh.vertices, IndexData::U32(&mesh.indices), &[("whole", whole)])?
        };
        Ok((id, whole))
    }

    fn land_mesh() -> MeshData {
        let mut grid = GeometryGenerator.create_grid(160.0, 160.0, 50, 50);
        for v in &mut grid.vertices {
            let [x, _, z] = v.pos;
            v.pos[1] = hills_height(x, z);
            v.normal = hills_normal(x, z).to_array();
        }
        grid
    }

    fn tree_sprites(&mut self) -> Vec<TreeSpriteVertex> {
        (0..TREE_COUNT)
            .map(|_| {
                let x = self.rng.gen_range(-45.0..45.0);
                let z = self.rng.gen_range(-45.0..45.0);
                // Lift the billboard so its base sits on the terrain.
                let y = hills_height(x, z) + 8.0;
                TreeSpriteVertex {
                    pos: [x, y, z],
                    size: [20.0, 20.0],
                }
            })
            .collect()
    }

    fn setup_lighting<S: PresentSurface>(renderer: &mut Renderer<S>) {
        let pass = renderer.pass_constants_mut();
        pass.ambient_light = [0.25, 0.25, 0.35, 1.0];
        pass.fog_color = [0.7, 0.7, 0.7, 1.0];
        pass.fog_start = 50.0;
        pass.fog_range = 150.0;
        pass.near_z = 1.0;
        pass.far_z = 1000.0;
        pass.lights[0] = Light::directional(Vec3::new(0.57735, -0.57735, 0.57735), Vec3::new(0.9, 0.9, 0.9));
        pass.lights[1] = Light::directional(Vec3::new(-0.57735, -0.57735, 0.57735), Vec3::new(0.5, 0.5, 0.5));
        pass.lights[2] = Light::directional(Vec3::new(0.0, -0.707, -0.707), Vec3::new(0.2, 0.2, 0.2));
    }
}

impl Application for TextureWavesApp {
    fn title(&self) -> &str {
        &self.title
    }

    fn setup<S: PresentSurface>(&mut self, renderer: &mut Renderer<S>) -> Result<(), EngineError> {
        let loader = DdsTextureLoader;
        let mut materials: Vec<MaterialId> = Vec::with_capacity(TEXTURES.len());
        for (cb_index, (tex_name, file, material)) in TEXTURES.iter().enumerate() {
            let srv = renderer.load_texture(&loader, tex_name, &self.texture_dir.join(file))?;
            materials.push(renderer.create_material(material, cb_index as u32, srv, material_params(material))?);
        }
        let [grass, water, fence, fireball, tree, white] = [0, 1, 2, 3, 4, 5].map(|i| materials[i]);

        let (rows, cols, texel, step) = {
            let waves = renderer.create_wave_simulator()?;
            (waves.rows(), waves.cols(), waves.texel_size(), waves.spatial_step())
        };

        let generator = GeometryGenerator;
        let (waves_geo, waves_sub) = Self::upload_mesh(
            renderer,
            "waterGeo",
            &generator.create_grid(cols as f32 * step, rows as f32 * step, rows, cols),
        )?;
        let (land_geo, land_sub) = Self::upload_mesh(renderer, "landGeo", &Self::land_mesh())?;
        let (box_geo, box_sub) = Self::upload_mesh(renderer, "boxGeo", &generator.create_box(8.0, 8.0, 8.0, 3))?;
        let (ico_geo, ico_sub) = Self::upload_mesh(renderer, "icosahedronGeo", &generator.create_geosphere(4.0, 0))?;
        let (patch_geo, patch_sub) = Self::upload_mesh(renderer, "quadPatchGeo", &generator.create_quad_patch(20.0))?;

        let sprites = self.tree_sprites();
        let sprite_indices: Vec<u16> = (0..sprites.len() as u16).collect();
        let tree_sub = SubmeshGeometry {
            index_count: sprite_indices.len() as u32,
            start_index: 0,
            base_vertex: 0,
        };
        let tree_geo = renderer.upload_geometry(
            "treeSpritesGeo",
            &sprites,
            IndexData::U16(&sprite_indices),
            &[("points", tree_sub)],
        )?;

        let tile = Mat4::from_scale(Vec3::new(5.0, 5.0, 1.0));
        renderer.add_render_item(
            RenderLayer::Waves,
            RenderItem::new(0, water, waves_geo, waves_sub)
                .with_tex_transform(tile)
                .with_displacement(texel, step),
        )?;
        renderer.add_render_item(
            RenderLayer::Opaque,
            RenderItem::new(1, grass, land_geo, land_sub).with_tex_transform(tile),
        )?;
        renderer.add_render_item(
            RenderLayer::AlphaTested,
            RenderItem::new(2, fence, box_geo, box_sub).with_world(Mat4::from_translation(Vec3::new(3.0, 2.0, -9.0))),
        )?;
        renderer.add_render_item(
            RenderLayer::TreeSprites,
            RenderItem::new(3, tree, tree_geo, tree_sub).with_topology(PrimitiveTopology::PointList),
        )?;
        renderer.add_render_item(
            RenderLayer::Icosahedron,
            RenderItem::new(4, fireball, ico_geo, ico_sub)
                .with_world(Mat4::from_translation(Vec3::new(-12.0, 14.0, 10.0))),
        )?;
        renderer.add_render_item(
            RenderLayer::Tesselation,
            RenderItem::new(5, white, patch_geo, patch_sub)
                .with_world(Mat4::from_translation(Vec3::new(20.0, 12.0, 20.0)))
                .with_topology(PrimitiveTopology::PatchList(4)),
        )?;

        Self::setup_lighting(renderer);
        info!(target: "renderer", rows, cols, trees = TREE_COUNT, "texture waves scene built");
        Ok(())
    }

    fn update<S: PresentSurface>(
        &mut self,
        renderer: &mut Renderer<S>,
        time: FrameTime,
        input: &mut InputPoller,
    ) -> Result<(), EngineError> {
        if let Some(drag) = input.take_drag() {
            match drag.button {
                DragButton::Left => self.camera.rotate(drag.delta),
                DragButton::Right => self.camera.zoom(drag.delta),
            }
        }

        let surface = renderer.surface();
        let aspect = surface.width().max(1) as f32 / surface.height().max(1) as f32;
        let (view, proj, eye) = (self.camera.view(), OrbitCamera::proj(aspect), self.camera.eye());
        renderer.pass_constants_mut().set_camera(view, proj, eye);

        let wheel = input.take_wheel();
        if wheel != 0.0 {
            let pass = renderer.pass_constants_mut();
            pass.fog_start += wheel;
            debug!(target: "renderer", fog_start = pass.fog_start, "fog start moved");
        }

        let pressed = input.drain_pressed();
        if let Some(blur) = renderer.blur_settings_mut() {
            let mut changed = false;
            for key in pressed {
                changed |= adjust_blur(blur, key);
            }
            if changed {
                debug!(
                    target: "renderer",
                    count = blur.count,
                    spatial_sigma = blur.spatial_sigma,
                    intensity_sigma = blur.intensity_sigma,
                    "blur settings changed"
                );
            }
        }

        // Scroll the water texture.
        self.water_offset = (self.water_offset + Vec2::new(0.1, 0.02) * time.delta).fract();
        if let Some(water) = renderer.materials_mut().find_mut("Water") {
            water.set_mat_transform(Mat4::from_translation(self.water_offset.extend(0.0)));
        }

        self.disturb_timer += time.delta;
        if self.disturb_timer >= DISTURB_INTERVAL {
            self.disturb_timer = 0.0;
            if let Some((rows, cols)) = renderer.waves().map(|w| (w.rows(), w.cols())) {
                let i = self.rng.gen_range(4..=rows - 5);
                let j = self.rng.gen_range(4..=cols - 5);
                let magnitude = self.rng.gen_range(1.0..=2.0);
                debug!(target: "waves", i, j, magnitude, "random disturbance");
                renderer.disturb_waves(i, j, magnitude);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use engine_core::config::{RendererConfig, WaveConfig};
    use engine_core::gpu::soft::{SoftDevice, SoftDeviceConfig};
    use engine_core::gpu::Device;
    use engine_core::input::MouseScrollDelta;
    use engine_core::present::HeadlessSurface;
    use engine_core::shader::BuiltinShaderCompiler;
    use engine_shared::Vertex;

    use super::*;

    #[test]
    fn hills_normal_matches_finite_differences() {
        let (x, z) = (12.5, -31.0);
        let h = 1e-2;
        let dfdx = (hills_height(x + h, z) - hills_height(x - h, z)) / (2.0 * h);
        let dfdz = (hills_height(x, z + h) - hills_height(x, z - h)) / (2.0 * h);
        let expected = Vec3::new(-dfdx, 1.0, -dfdz).normalize();
        assert!((hills_normal(x, z) - expected).length() < 1e-3);
    }

    #[test]
    fn land_mesh_follows_the_hills() {
        let land = TextureWavesApp::land_mesh();
        assert_eq!(land.vertices.len(), 2500);
        let v: &Vertex = &land.vertices[1234];
        assert!((v.pos[1] - hills_height(v.pos[0], v.pos[2])).abs() < 1e-5);
    }

    fn headless(app: &mut TextureWavesApp) -> (Arc<SoftDevice>, Renderer<HeadlessSurface>) {
        headless_with(app, None)
    }

    fn headless_with(
        app: &mut TextureWavesApp,
        blur: Option<BlurSettings>,
    ) -> (Arc<SoftDevice>, Renderer<HeadlessSurface>) {
        let soft = Arc::new(SoftDevice::new(SoftDeviceConfig::default()).unwrap());
        let device: Arc<dyn Device> = soft.clone();
        let config = RendererConfig {
            width: 64,
            height: 48,
            optional_layers: DEMO_LAYERS.to_vec(),
            waves: WaveConfig {
                rows: 32,
                cols: 32,
                ..WaveConfig::default()
            },
            blur,
            ..RendererConfig::default()
        };
        let surface = HeadlessSurface::new(device.clone(), 2, 64, 48, false).unwrap();
        let mut renderer = Renderer::new(device, surface, &BuiltinShaderCompiler, config).unwrap();
        app.setup(&mut renderer).unwrap();
        renderer.finish_setup().unwrap();
        (soft, renderer)
    }

    #[test]
    fn scene_renders_every_item_without_textures_on_disk() {
        let mut app = TextureWavesApp::with_rng(PathBuf::from("does/not/exist"), StdRng::seed_from_u64(7));
        let (soft, mut renderer) = headless(&mut app);
        let mut input = InputPoller::default();

        let mut total = 0.0;
        let mut last_fence = 0;
        for _ in 0..4 {
            let time = FrameTime { delta: 0.1, total };
            total += 0.1;
            app.update(&mut renderer, time, &mut input).unwrap();
            let report = renderer.tick(time).unwrap();
            assert_eq!(report.draws, 6);
            assert_eq!(report.skipped_items, 0);
            last_fence = report.signalled_fence;
        }
        soft.wait_for_fence(last_fence, Duration::from_secs(5)).unwrap();
        assert!(soft.validation_errors().is_empty(), "{:?}", soft.validation_errors());
        assert!(soft.dispatch_count() > 0);
    }

    #[test]
    fn water_scrolls_and_wraps() {
        let mut app = TextureWavesApp::with_rng(PathBuf::from("does/not/exist"), StdRng::seed_from_u64(1));
        let (_soft, mut renderer) = headless(&mut app);
        let mut input = InputPoller::default();
        for _ in 0..20 {
            app.update(&mut renderer, FrameTime { delta: 0.25, total: 0.0 }, &mut input).unwrap();
        }
        let offset = app.water_offset();
        assert!((offset.x - 0.5).abs() < 1e-4, "{offset:?}");
        assert!((offset.y - 0.1).abs() < 1e-4, "{offset:?}");
        let water = renderer.materials().iter().find(|m| m.name() == "Water").unwrap();
        assert!(water.dirty().is_dirty());
    }

    #[test]
    fn wheel_moves_the_fog_start() {
        let mut app = TextureWavesApp::with_rng(PathBuf::from("does/not/exist"), StdRng::seed_from_u64(3));
        let (_soft, mut renderer) = headless(&mut app);
        let mut input = InputPoller::default();
        let time = FrameTime { delta: 0.01, total: 0.0 };

        input.mouse_wheel(MouseScrollDelta::LineDelta(0.0, 3.0));
        app.update(&mut renderer, time, &mut input).unwrap();
        assert_eq!(renderer.pass_constants().fog_start, 53.0);

        input.mouse_wheel(MouseScrollDelta::LineDelta(0.0, -1.0));
        app.update(&mut renderer, time, &mut input).unwrap();
        app.update(&mut renderer, time, &mut input).unwrap();
        assert_eq!(renderer.pass_constants().fog_start, 52.0);
    }

    #[test]
    fn blur_keys_step_the_settings_and_never_go_negative() {
        let mut blur = BlurSettings {
            count: 1,
            spatial_sigma: 1.0,
            intensity_sigma: 0.0,
        };
        for key in [KeyCode::KeyW, KeyCode::KeyW, KeyCode::KeyD, KeyCode::KeyD, KeyCode::KeyQ] {
            assert!(adjust_blur(&mut blur, key));
        }
        assert_eq!((blur.count, blur.spatial_sigma, blur.intensity_sigma), (0, 0.0, 0.0));
        for key in [KeyCode::KeyS, KeyCode::KeyA, KeyCode::KeyA, KeyCode::KeyE] {
            adjust_blur(&mut blur, key);
        }
        assert_eq!((blur.count, blur.spatial_sigma, blur.intensity_sigma), (2, 1.0, 1.0));
        assert!(!adjust_blur(&mut blur, KeyCode::KeyV));
    }

    #[test]
    fn blurred_scene_follows_the_key_controls() {
        let mut app = TextureWavesApp::with_rng(PathBuf::from("does/not/exist"), StdRng::seed_from_u64(5));
        let (soft, mut renderer) = headless_with(&mut app, Some(BlurSettings::default()));
        let mut input = InputPoller::default();
        let time = FrameTime { delta: 0.01, total: 0.0 };

        app.update(&mut renderer, time, &mut input).unwrap();
        let report = renderer.tick(time).unwrap();
        assert_eq!(report.draws, 6);
        assert_eq!(report.blur_iterations, BlurSettings::default().count);

        for key in [KeyCode::KeyD, KeyCode::KeyD, KeyCode::KeyS] {
            input.key_pressed(key);
        }
        app.update(&mut renderer, time, &mut input).unwrap();
        let report = renderer.tick(time).unwrap();
        assert_eq!(report.blur_iterations, 0);
        assert_eq!(renderer.blur_settings().unwrap().spatial_sigma, BlurSettings::default().spatial_sigma + 1.0);

        soft.wait_for_fence(report.signalled_fence, Duration::from_secs(5)).unwrap();
        assert!(soft.validation_errors().is_empty(), "{:?}", soft.validation_errors());
    }
}
