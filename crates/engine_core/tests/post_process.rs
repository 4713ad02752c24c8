// crates/engine_core/tests/post_process.rs
//! Offscreen scene target, blur and the copy into the back buffer.

mod common;

use engine_core::config::{RendererConfig, LIGHT_STEEL_BLUE};
use engine_core::gpu::soft::SoftDeviceConfig;
use engine_core::gpu::{Command, ResourceState, ViewDesc, Viewport};
use engine_core::renderer::{BlurFilter, BlurSettings, PassKind, RenderLayer, RenderTarget};

use common::{config, quad_scene, Harness, DT};

fn blur_config(count: u32) -> RendererConfig {
    RendererConfig {
        width: 64,
        height: 32,
        blur: Some(BlurSettings {
            count,
            spatial_sigma: 1.0,
            intensity_sigma: 0.0,
        }),
        ..config(2)
    }
}

fn blurred_harness(count: u32) -> Harness {
    let mut h = Harness::with_device(
        blur_config(count),
        SoftDeviceConfig {
            record_trace: true,
            capture_presented: true,
            ..Default::default()
        },
    );
    quad_scene(&mut h.renderer, &["White"], &[RenderLayer::Opaque]);
    h.renderer.finish_setup().unwrap();
    h
}

fn clear_rgba() -> [u8; 4] {
    LIGHT_STEEL_BLUE.map(|c| (c * 255.0).round() as u8)
}

#[test]
fn blurred_scene_is_copied_into_the_presented_image() {
    let mut h = blurred_harness(2);
    h.soft.clear_trace();
    let report = h.frame(DT);
    h.settle(report.signalled_fence);
    h.assert_clean();
    assert_eq!(report.blur_iterations, 2);

    let commands: Vec<Command> = h.soft.trace().into_iter().map(|t| t.command).collect();
    let dispatches = commands.iter().filter(|c| matches!(c, Command::Dispatch { .. })).count();
    let copies = commands.iter().filter(|c| matches!(c, Command::CopyResource { .. })).count();
    // Two passes per iteration; in, out and the final copy to the back buffer.
    assert_eq!(dispatches, 4);
    assert_eq!(copies, 3);

    // A flat image stays flat under any blur.
    let image = h.soft.presented_image().unwrap();
    assert_eq!((image.width, image.height), (64, 32));
    assert!(image.rgba.chunks_exact(4).all(|px| px == clear_rgba()));

    let offscreen = h.renderer.offscreen_target().unwrap();
    assert_eq!(offscreen.state(), ResourceState::GenericRead);
    assert_eq!(h.soft.resource_state(offscreen.color_resource()), Some(ResourceState::GenericRead));
}

#[test]
fn zero_iterations_still_present_through_the_offscreen_target() {
    let mut h = blurred_harness(0);
    h.soft.clear_trace();
    let report = h.frame(DT);
    h.settle(report.signalled_fence);
    h.assert_clean();
    assert_eq!(report.blur_iterations, 0);

    let copies = h
        .soft
        .trace()
        .into_iter()
        .filter(|t| matches!(t.command, Command::CopyResource { .. }))
        .count();
    assert_eq!(copies, 1);
    assert!(h.soft.presented_image().unwrap().rgba.chunks_exact(4).all(|px| px == clear_rgba()));
}

#[test]
fn blur_pass_and_descriptors_appear_only_when_configured() {
    let h = blurred_harness(1);
    let kinds: Vec<PassKind> = h.renderer.frame_graph().unwrap().passes().iter().map(|p| p.kind).collect();
    assert!(kinds.contains(&PassKind::Blur));
    // No textures and no waves: the blur slots come first.
    assert_eq!(h.renderer.default_srv_slot(), Some(BlurFilter::DESCRIPTOR_COUNT));

    let mut plain = Harness::new(config(2));
    quad_scene(&mut plain.renderer, &["White"], &[RenderLayer::Opaque]);
    plain.renderer.finish_setup().unwrap();
    let kinds: Vec<PassKind> = plain.renderer.frame_graph().unwrap().passes().iter().map(|p| p.kind).collect();
    assert!(!kinds.contains(&PassKind::Blur));
    assert_eq!(plain.renderer.default_srv_slot(), Some(0));
    assert!(plain.renderer.offscreen_target().is_none());
}

#[test]
fn resize_rebuilds_the_offscreen_target_and_blur_maps() {
    let mut h = blurred_harness(1);
    h.frame(DT);
    let old_maps = h.renderer.blur_filter().unwrap().resources();

    h.renderer.resize(128, 48).unwrap();
    assert!(old_maps.iter().all(|m| !h.soft.is_alive(*m)));
    assert_eq!(h.renderer.offscreen_target().unwrap().viewport(), Viewport::full(128, 48));
    let filter = h.renderer.blur_filter().unwrap();
    assert_eq!(filter.size(), (128, 48));

    // The blur views were rewritten in place to name the new maps.
    let heap = h.renderer.descriptor_heap().unwrap();
    let views = h.soft.heap_views(heap.id).unwrap();
    let maps = filter.resources();
    assert!(matches!(views[0], Some(ViewDesc::Srv { resource, .. }) if resource == maps[0]));
    assert!(matches!(views[1], Some(ViewDesc::Srv { resource, .. }) if resource == maps[1]));
    assert!(matches!(views[2], Some(ViewDesc::Uav { resource, .. }) if resource == maps[0]));
    assert!(matches!(views[3], Some(ViewDesc::Uav { resource, .. }) if resource == maps[1]));

    let report = h.frame(DT);
    h.settle(report.signalled_fence);
    h.assert_clean();
    let image = h.soft.presented_image().unwrap();
    assert_eq!((image.width, image.height), (128, 48));
}
