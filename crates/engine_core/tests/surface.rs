// crates/engine_core/tests/surface.rs
//! Presentation surface, resize and per-frame draw order.

mod common;

use std::sync::Arc;

use proptest::prelude::*;

use engine_core::geometry::GeometryGenerator;
use engine_core::gpu::soft::{SoftDevice, SoftDeviceConfig};
use engine_core::gpu::{
    AllocatorId, Command, CommandList, CpuHandle, DescriptorKind, DescriptorPair, Device, GpuHandle, IndexFormat,
    PrimitiveTopology, ViewDesc, Viewport,
};
use engine_core::present::{HeadlessSurface, PresentSurface};
use engine_core::renderer::{FrameToken, IndexData, PsoRole, RenderLayer, RenderTarget, SubmeshGeometry};

use common::{config, quad_scene, Harness, DT};

fn view_kinds(soft: &SoftDevice, surface: &HeadlessSurface) -> (Vec<Option<DescriptorKind>>, Vec<Option<DescriptorKind>>) {
    let kinds = |views: Vec<Option<ViewDesc>>| -> Vec<Option<DescriptorKind>> {
        views.into_iter().map(|v| v.map(|v| v.kind())).collect()
    };
    (
        kinds(soft.heap_views(surface.rtv_heap().id).unwrap()),
        kinds(soft.heap_views(surface.dsv_heap().id).unwrap()),
    )
}

#[test]
fn resize_rebuilds_the_surface() {
    let mut h = Harness::new(config(3));
    quad_scene(&mut h.renderer, &["White"], &[RenderLayer::Opaque]);
    h.renderer.finish_setup().unwrap();
    h.frame(DT);

    let old_buffers = h.renderer.surface().back_buffers();
    let old_depth = h.renderer.surface().depth_buffer().unwrap();
    h.renderer.resize(1280, 720).unwrap();

    let surface = h.renderer.surface();
    assert_eq!(surface.viewport(), Viewport::full(1280, 720));
    assert_eq!(surface.current_back_buffer_index(), 0);
    assert!(old_buffers.iter().all(|b| !h.soft.is_alive(*b)));
    assert!(!h.soft.is_alive(old_depth));

    let dsvs: Vec<ViewDesc> = h
        .soft
        .heap_views(surface.dsv_heap().id)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(dsvs.len(), 1);
    assert_eq!(
        dsvs[0],
        ViewDesc::Dsv {
            resource: surface.depth_buffer().unwrap()
        }
    );
    for (slot, buffer) in surface.back_buffers().iter().enumerate() {
        let view = h.soft.view_at(surface.rtv_heap().slot(slot as u32).cpu).unwrap();
        assert_eq!(view, ViewDesc::Rtv { resource: *buffer });
    }

    let report = h.frame(DT);
    assert!(report.presented);
    h.settle(report.signalled_fence);
    let latest = h.renderer.surface().back_buffers();
    assert!(latest.iter().all(|b| h.soft.is_alive(*b)));
    h.assert_clean();
}

#[test]
fn repeated_resize_is_idempotent() {
    let mut h = Harness::new(config(2));
    h.renderer.finish_setup().unwrap();
    h.renderer.resize(1280, 720).unwrap();
    let first = (h.renderer.surface().viewport(), h.renderer.surface().scissor());
    let first_layout = view_kinds(&h.soft, h.renderer.surface());

    h.renderer.resize(1280, 720).unwrap();
    assert_eq!((h.renderer.surface().viewport(), h.renderer.surface().scissor()), first);
    assert_eq!(view_kinds(&h.soft, h.renderer.surface()), first_layout);
}

#[test]
fn resizing_reuses_released_resource_slots() {
    let mut h = Harness::new(config(2));
    quad_scene(&mut h.renderer, &["White"], &[RenderLayer::Opaque]);
    h.renderer.finish_setup().unwrap();
    h.renderer.resize(1024, 768).unwrap();
    let slots = h.soft.resource_slot_count();

    for k in 0..16u32 {
        h.renderer.resize(640 + k * 16, 480).unwrap();
        let report = h.frame(DT);
        assert!(report.presented);
        h.settle(report.signalled_fence);
    }
    assert_eq!(h.soft.resource_slot_count(), slots);
    h.assert_clean();
}

#[test]
fn failed_resize_skips_frames_until_the_next_success() {
    let mut h = Harness::new(config(2));
    h.renderer.finish_setup().unwrap();
    h.renderer.resize(0, 0).unwrap();
    assert!(!h.renderer.surface().is_ready());
    let skipped = h.frame(DT);
    assert!(!skipped.presented);
    assert_eq!(skipped.signalled_fence, 0);

    h.renderer.resize(640, 480).unwrap();
    assert!(h.frame(DT).presented);
}

#[test]
fn prepare_twice_records_what_prepare_once_does() {
    let soft = Arc::new(SoftDevice::new(SoftDeviceConfig::default()).unwrap());
    let device: Arc<dyn Device> = soft;
    let mut surface = HeadlessSurface::new(device, 2, 64, 64, false).unwrap();

    let mut once = CommandList::new(AllocatorId(0));
    surface.prepare(&mut once, FrameToken(1), [0.0; 4]);
    // Back to PRESENT without presenting, so frame 2 starts where frame 1 did.
    surface.finish(&mut CommandList::new(AllocatorId(0)));

    let mut twice = CommandList::new(AllocatorId(0));
    surface.prepare(&mut twice, FrameToken(2), [0.0; 4]);
    surface.prepare(&mut twice, FrameToken(2), [0.0; 4]);

    assert_eq!(once.commands(), twice.commands());
    assert!(matches!(once.commands()[0], Command::ResourceBarrier(_)));
}

#[test]
fn layers_are_submitted_in_draw_order() {
    let mut cfg = config(2);
    cfg.optional_layers = vec![RenderLayer::TreeSprites];
    let mut h = Harness::with_device(
        cfg,
        SoftDeviceConfig {
            record_trace: true,
            ..Default::default()
        },
    );
    // Registered out of order on purpose.
    let layers = [
        RenderLayer::Waves,
        RenderLayer::Transparent,
        RenderLayer::TreeSprites,
        RenderLayer::AlphaTested,
        RenderLayer::Tesselation,
        RenderLayer::Opaque,
        RenderLayer::Icosahedron,
    ];
    let scene = quad_scene(&mut h.renderer, &["White"], &layers);
    for handle in &scene.items {
        let topology = match handle.layer {
            RenderLayer::Tesselation => PrimitiveTopology::PatchList(4),
            RenderLayer::TreeSprites => PrimitiveTopology::PointList,
            _ => continue,
        };
        h.renderer.items_mut().get_mut(*handle).unwrap().set_topology(topology);
    }
    h.renderer.finish_setup().unwrap();
    h.soft.clear_trace();

    let report = h.frame(DT);
    // Icosahedron is optional and not enabled.
    assert_eq!(report.draws, 6);
    h.settle(report.signalled_fence);

    let pipelines = h.renderer.pipelines();
    let expected: Vec<_> = [
        PsoRole::Opaque,
        PsoRole::Tesselation,
        PsoRole::AlphaTested,
        PsoRole::TreeSprites,
        PsoRole::Transparent,
        PsoRole::WavesRender,
    ]
    .into_iter()
    .map(|role| pipelines.get(role).unwrap())
    .collect();

    let bound: Vec<_> = h
        .soft
        .trace()
        .into_iter()
        .filter_map(|e| match e.command {
            Command::SetPipelineState(pso) => Some(pso),
            _ => None,
        })
        .collect();
    assert_eq!(bound, expected);
    assert_eq!(
        h.renderer.frame_graph().unwrap().layer_order(),
        vec![
            RenderLayer::Opaque,
            RenderLayer::Tesselation,
            RenderLayer::AlphaTested,
            RenderLayer::TreeSprites,
            RenderLayer::Transparent,
            RenderLayer::Waves
        ]
    );
    h.assert_clean();
}

#[test]
fn hills_geometry_buffers() {
    let mut h = Harness::new(config(2));
    let grid = GeometryGenerator.create_grid(160.0, 160.0, 50, 50);
    assert_eq!(grid.vertices.len(), 50 * 50);
    assert_eq!(grid.triangle_count(), 49 * 49 * 2);

    let indices = grid.indices16();
    let whole = SubmeshGeometry {
        index_count: indices.len() as u32,
        start_index: 0,
        base_vertex: 0,
    };
    let id = h
        .renderer
        .upload_geometry("landGeo", &grid.vertices, IndexData::U16(&indices), &[("grid", whole)])
        .unwrap();
    h.renderer.finish_setup().unwrap();

    let mesh = h.renderer.geometries().get(id).unwrap();
    assert_eq!(mesh.index_buffer_view.format, IndexFormat::U16);
    assert_eq!(mesh.index_buffer_view.size_in_bytes, 49 * 49 * 6 * 2);
    assert_eq!(
        mesh.vertex_buffer_view.size_in_bytes as usize,
        2500 * std::mem::size_of::<engine_shared::Vertex>()
    );
    assert_eq!(h.renderer.geometries().submesh("landGeo", "grid").unwrap().1, whole);
}

#[test]
fn descriptor_heap_layout_after_setup() {
    let mut h = Harness::new(config(2));
    h.renderer.create_wave_simulator().unwrap();
    h.renderer.finish_setup().unwrap();

    // No textures: wave slots start at 0, the default SRV follows them.
    let heap = h.renderer.descriptor_heap().unwrap();
    assert_eq!(h.renderer.default_srv_slot(), Some(6));
    assert_eq!(heap.capacity, 7);
    let waves = h.renderer.waves().unwrap();
    for i in 0..3 {
        assert_eq!(waves.srv_handles()[i], heap.slot(i as u32).gpu);
        assert_eq!(waves.uav_handles()[i], heap.slot(3 + i as u32).gpu);
    }
    assert!(matches!(h.soft.view_at(heap.slot(6).cpu).unwrap(), ViewDesc::Srv { .. }));
}

proptest! {
    #[test]
    fn descriptor_offsets_never_accumulate(
        base in 0u64..1_000_000,
        stride in 1u32..256,
        slots in proptest::collection::vec(0u32..64, 1..16),
    ) {
        let pair = DescriptorPair {
            cpu: CpuHandle(base),
            gpu: GpuHandle(base + 1),
            stride,
        };
        for slot in slots {
            let at = pair.offset(slot);
            prop_assert_eq!(at.cpu, CpuHandle(base + u64::from(slot) * u64::from(stride)));
            prop_assert_eq!(at.gpu, GpuHandle(base + 1 + u64::from(slot) * u64::from(stride)));
            prop_assert_eq!(at.stride, stride);
        }
        prop_assert_eq!(pair.offset(0), pair);
    }
}
