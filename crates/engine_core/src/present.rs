// crates/engine_core/src/present.rs
//! Swap-chain side of the renderer.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::DeviceError;
use crate::gpu::{
    CommandList, CpuHandle, DescriptorHeap, DescriptorKind, Device, Format, HeapType, ResourceDesc, ResourceId,
    ResourceState, ScissorRect, TrackedResource, ViewDesc, Viewport,
};
use crate::renderer::render_target::{prepare_color_target, FrameToken, RenderTarget};

/// The back-buffer cycle the renderer draws into and presents.
pub trait PresentSurface: RenderTarget {
    fn back_buffer_count(&self) -> usize;
    fn current_back_buffer_index(&self) -> usize;
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// False after a failed resize, until a resize succeeds.
    fn is_ready(&self) -> bool;

    /// Returns the current back buffer to PRESENT.
    fn finish(&mut self, list: &mut CommandList);

    /// Moves the current back buffer to `after`, e.g. COPY_DEST before an
    /// offscreen target is copied in.
    fn transition_back_buffer(&mut self, list: &mut CommandList, after: ResourceState);

    /// Queues the current back buffer for presentation and moves to the next.
    fn present(&mut self) -> Result<(), DeviceError>;

    /// Releases and recreates every back buffer and the depth buffer at
    /// `(width, height)`. The device must be idle.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError>;

    fn vsync(&self) -> bool;
    fn set_vsync(&mut self, vsync: bool);
}

pub const BACK_BUFFER_FORMAT: Format = Format::R8G8B8A8Unorm;
pub const DEPTH_STENCIL_FORMAT: Format = Format::D24UnormS8Uint;

/// Back buffers owned on the device with no window attached. The window
/// runner blits whatever the device presents.
pub struct HeadlessSurface {
    device: Arc<dyn Device>,
    back_buffers: Vec<TrackedResource>,
    depth: Option<ResourceId>,
    rtv_heap: DescriptorHeap,
    dsv_heap: DescriptorHeap,
    count: usize,
    current: usize,
    width: u32,
    height: u32,
    viewport: Viewport,
    scissor: ScissorRect,
    vsync: bool,
    prepared: Option<FrameToken>,
}

impl HeadlessSurface {
    pub fn new(device: Arc<dyn Device>, count: usize, width: u32, height: u32, vsync: bool) -> Result<Self, DeviceError> {
        let count = count.max(1);
        let rtv_heap = device.create_descriptor_heap(DescriptorKind::Rtv, count as u32, false)?;
        let dsv_heap = device.create_descriptor_heap(DescriptorKind::Dsv, 1, false)?;
        let mut surface = Self {
            device,
            back_buffers: Vec::with_capacity(count),
            depth: None,
            rtv_heap,
            dsv_heap,
            count,
            current: 0,
            width,
            height,
            viewport: Viewport::full(width, height),
            scissor: ScissorRect::full(width, height),
            vsync,
            prepared: None,
        };
        surface.create_buffers(width, height)?;
        info!(target: "platform", count, width, height, "surface created");
        Ok(surface)
    }

    fn create_buffers(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        let color_desc = ResourceDesc::tex2d(BACK_BUFFER_FORMAT, width, height).with_render_target();
        for i in 0..self.count {
            let id = self.device.create_committed_resource(
                HeapType::Default,
                &color_desc,
                ResourceState::Present,
                &format!("back buffer {i}"),
            )?;
            self.back_buffers.push(TrackedResource::new(id, ResourceState::Present));
            self.device
                .create_view(&ViewDesc::Rtv { resource: id }, self.rtv_heap.slot(i as u32).cpu)?;
        }

        let depth_desc = ResourceDesc::tex2d(DEPTH_STENCIL_FORMAT, width, height).with_depth_stencil();
        let depth = self.device.create_committed_resource(
            HeapType::Default,
            &depth_desc,
            ResourceState::DepthWrite,
            "depth stencil",
        )?;
        self.depth = Some(depth);
        self.device
            .create_view(&ViewDesc::Dsv { resource: depth }, self.dsv_heap.slot(0).cpu)?;
        Ok(())
    }

    fn release_buffers(&mut self) {
        for buffer in self.back_buffers.drain(..) {
            self.device.release_resource(buffer.id);
        }
        if let Some(depth) = self.depth.take() {
            self.device.release_resource(depth);
        }
    }

    pub fn rtv_heap(&self) -> &DescriptorHeap {
        &self.rtv_heap
    }

    pub fn dsv_heap(&self) -> &DescriptorHeap {
        &self.dsv_heap
    }

    pub fn back_buffers(&self) -> Vec<ResourceId> {
        self.back_buffers.iter().map(|b| b.id).collect()
    }

    pub fn depth_buffer(&self) -> Option<ResourceId> {
        self.depth
    }

    fn current_buffer(&self) -> &TrackedResource {
        &self.back_buffers[self.current]
    }
}

impl RenderTarget for HeadlessSurface {
    fn color_resource(&self) -> ResourceId {
        self.current_buffer().id
    }

    fn rtv(&self) -> CpuHandle {
        self.rtv_heap.slot(self.current as u32).cpu
    }

    fn dsv(&self) -> CpuHandle {
        self.dsv_heap.slot(0).cpu
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn scissor(&self) -> ScissorRect {
        self.scissor
    }

    fn prepare(&mut self, list: &mut CommandList, token: FrameToken, clear_color: [f32; 4]) {
        let (rtv, dsv) = (self.rtv(), self.dsv());
        let buffer = &mut self.back_buffers[self.current];
        prepare_color_target(buffer, &mut self.prepared, list, token, rtv, dsv, clear_color);
    }

    fn on_resize(&mut self, _device: &Arc<dyn Device>, width: u32, height: u32) -> Result<(), DeviceError> {
        PresentSurface::resize(self, width, height)
    }
}

impl PresentSurface for HeadlessSurface {
    fn back_buffer_count(&self) -> usize {
        self.count
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_ready(&self) -> bool {
        self.back_buffers.len() == self.count && self.depth.is_some()
    }

    fn finish(&mut self, list: &mut CommandList) {
        self.back_buffers[self.current].transition(list, ResourceState::Present);
    }

    fn transition_back_buffer(&mut self, list: &mut CommandList, after: ResourceState) {
        self.back_buffers[self.current].transition(list, after);
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        let sync_interval = u32::from(self.vsync);
        self.device.present(self.current_buffer().id, sync_interval)?;
        self.current = (self.current + 1) % self.count;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        self.release_buffers();
        self.current = 0;
        self.prepared = None;
        self.create_buffers(width, height)?;
        self.width = width;
        self.height = height;
        self.viewport = Viewport::full(width, height);
        self.scissor = ScissorRect::full(width, height);
        debug!(target: "platform", width, height, "surface resized");
        Ok(())
    }

    fn vsync(&self) -> bool {
        self.vsync
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        self.release_buffers();
        self.device.release_descriptor_heap(&self.rtv_heap);
        self.device.release_descriptor_heap(&self.dsv_heap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::soft::{SoftDevice, SoftDeviceConfig};

    fn surface() -> (Arc<SoftDevice>, HeadlessSurface) {
        let soft = Arc::new(SoftDevice::new(SoftDeviceConfig::default()).unwrap());
        let device: Arc<dyn Device> = soft.clone();
        (soft, HeadlessSurface::new(device, 2, 800, 600, true).unwrap())
    }

    #[test]
    fn back_buffers_start_in_present() {
        let (device, s) = surface();
        for id in s.back_buffers() {
            assert_eq!(device.resource_state(id), Some(ResourceState::Present));
        }
        assert_eq!(device.resource_state(s.depth_buffer().unwrap()), Some(ResourceState::DepthWrite));
    }

    #[test]
    fn resize_leaves_no_stale_buffers() {
        let (device, mut s) = surface();
        let old = s.back_buffers();
        let old_depth = s.depth_buffer().unwrap();
        s.resize(1280, 720).unwrap();

        assert!(old.iter().all(|id| !device.is_alive(*id)));
        assert!(!device.is_alive(old_depth));
        assert_eq!(s.viewport(), Viewport::full(1280, 720));
        assert_eq!(s.current_back_buffer_index(), 0);

        let dsvs = device.heap_views(s.dsv_heap().id).unwrap();
        assert_eq!(dsvs.len(), 1);
        assert_eq!(dsvs[0], Some(ViewDesc::Dsv { resource: s.depth_buffer().unwrap() }));
    }

    #[test]
    fn failed_resize_marks_the_surface_not_ready() {
        let (_device, mut s) = surface();
        assert!(s.resize(0, 0).is_err());
        assert!(!s.is_ready());
        s.resize(640, 480).unwrap();
        assert!(s.is_ready());
    }
}
