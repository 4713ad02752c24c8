// crates/engine_core/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use engine_core::config::{RendererConfig, WaveConfig};
use engine_core::geometry::GeometryGenerator;
use engine_core::gpu::soft::{SoftDevice, SoftDeviceConfig};
use engine_core::gpu::Device;
use engine_core::present::HeadlessSurface;
use engine_core::renderer::{
    FrameReport, FrameTime, IndexData, MaterialId, MaterialParams, RenderItem, RenderItemHandle, RenderLayer,
    Renderer, SubmeshGeometry,
};
use engine_core::shader::BuiltinShaderCompiler;

pub const DT: f32 = 1.0 / 60.0;

pub fn config(frame_resources: usize) -> RendererConfig {
    RendererConfig {
        frame_resources,
        width: 800,
        height: 600,
        fence_timeout_ms: 2000,
        waves: WaveConfig {
            rows: 32,
            cols: 32,
            ..WaveConfig::default()
        },
        ..RendererConfig::default()
    }
}

pub struct Harness {
    pub soft: Arc<SoftDevice>,
    pub renderer: Renderer<HeadlessSurface>,
    pub total: f32,
}

impl Harness {
    pub fn new(config: RendererConfig) -> Self {
        Self::with_device(config, SoftDeviceConfig::default())
    }

    pub fn with_device(config: RendererConfig, device_config: SoftDeviceConfig) -> Self {
        let soft = Arc::new(SoftDevice::new(device_config).unwrap());
        let device: Arc<dyn Device> = soft.clone();
        let surface = HeadlessSurface::new(
            device.clone(),
            config.back_buffer_count,
            config.width,
            config.height,
            config.vsync,
        )
        .unwrap();
        let renderer = Renderer::new(device, surface, &BuiltinShaderCompiler, config).unwrap();
        Self {
            soft,
            renderer,
            total: 0.0,
        }
    }

    pub fn frame(&mut self, delta: f32) -> FrameReport {
        self.total += delta;
        self.renderer
            .tick(FrameTime {
                delta,
                total: self.total,
            })
            .unwrap()
    }

    /// Waits until the device has executed everything up to `fence`.
    pub fn settle(&self, fence: u64) {
        self.soft.wait_for_fence(fence, Duration::from_secs(5)).unwrap();
    }

    pub fn assert_clean(&self) {
        assert!(self.soft.validation_errors().is_empty(), "{:?}", self.soft.validation_errors());
        assert!(self.soft.hazards().is_empty(), "{:?}", self.soft.hazards());
    }
}

pub struct QuadScene {
    pub materials: Vec<MaterialId>,
    pub items: Vec<RenderItemHandle>,
}

/// One quad mesh, `materials` materials in CB order and one item per
/// `layers` entry, each using material `i % materials.len()`.
pub fn quad_scene(renderer: &mut Renderer<HeadlessSurface>, materials: &[&str], layers: &[RenderLayer]) -> QuadScene {
    let quad = GeometryGenerator.create_grid(1.0, 1.0, 2, 2);
    let whole = SubmeshGeometry {
        index_count: quad.indices.len() as u32,
        start_index: 0,
        base_vertex: 0,
    };
    let indices = quad.indices16();
    let geometry = renderer
        .upload_geometry("quad", &quad.vertices, IndexData::U16(&indices), &[("whole", whole)])
        .unwrap();

    let materials: Vec<MaterialId> = materials
        .iter()
        .enumerate()
        .map(|(i, name)| {
            renderer
                .create_material(name, i as u32, 0, MaterialParams::default())
                .unwrap()
        })
        .collect();

    let items = layers
        .iter()
        .enumerate()
        .map(|(i, layer)| {
            let material = if materials.is_empty() {
                MaterialId(0)
            } else {
                materials[i % materials.len()]
            };
            renderer
                .add_render_item(*layer, RenderItem::new(i as u32, material, geometry, whole))
                .unwrap()
        })
        .collect();

    QuadScene { materials, items }
}
