// crates/engine_core/src/renderer/render_target.rs
//! Color + depth targets and their prepare-for-draw protocol.

use std::sync::Arc;

use tracing::debug;

use crate::error::DeviceError;
use crate::gpu::{
    CommandList, CpuHandle, DescriptorHeap, DescriptorKind, DescriptorPair, Device, Format, HeapType, ResourceDesc,
    ResourceId, ResourceState, ScissorRect, TrackedResource, ViewDesc, Viewport,
};

/// Identifies one frame. Handed out by the renderer; "prepared" flags are
/// compared against it instead of being cleared by hand.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FrameToken(pub u64);

pub trait RenderTarget {
    fn color_resource(&self) -> ResourceId;
    fn rtv(&self) -> CpuHandle;
    fn dsv(&self) -> CpuHandle;
    fn viewport(&self) -> Viewport;
    fn scissor(&self) -> ScissorRect;

    /// Transitions the color target for drawing, clears color and depth and
    /// binds both. Recording twice with the same token records nothing the
    /// second time.
    fn prepare(&mut self, list: &mut CommandList, token: FrameToken, clear_color: [f32; 4]);

    fn set_viewport(&self, list: &mut CommandList) {
        list.set_viewport(self.viewport());
        list.set_scissor_rect(self.scissor());
    }

    /// Records a full copy into `dest`. Both resources must already be in
    /// COPY_SOURCE / COPY_DEST.
    fn copy_to(&self, dest: &dyn RenderTarget, list: &mut CommandList) {
        list.copy_resource(dest.color_resource(), self.color_resource());
    }

    /// Targets whose size follows the window rebuild their resources here.
    fn on_resize(&mut self, _device: &Arc<dyn Device>, _width: u32, _height: u32) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Shared body of [`RenderTarget::prepare`].
pub(crate) fn prepare_color_target(
    color: &mut TrackedResource,
    prepared: &mut Option<FrameToken>,
    list: &mut CommandList,
    token: FrameToken,
    rtv: CpuHandle,
    dsv: CpuHandle,
    clear_color: [f32; 4],
) {
    if *prepared == Some(token) {
        return;
    }
    // Clears need the target in RENDER_TARGET already.
    color.transition(list, ResourceState::RenderTarget);
    list.clear_render_target_view(rtv, clear_color);
    list.clear_depth_stencil_view(dsv, 1.0, 0);
    list.set_render_targets(&[rtv], Some(dsv));
    *prepared = Some(token);
}

/// An offscreen color target sampled after it has been drawn, sharing the
/// depth buffer of the surface it is drawn alongside.
pub struct OffscreenTarget {
    device: Arc<dyn Device>,
    format: Format,
    color: TrackedResource,
    rtv_heap: DescriptorHeap,
    srv_heap: DescriptorHeap,
    dsv: CpuHandle,
    width: u32,
    height: u32,
    prepared: Option<FrameToken>,
}

impl OffscreenTarget {
    pub fn new(
        device: Arc<dyn Device>,
        width: u32,
        height: u32,
        format: Format,
        dsv: CpuHandle,
    ) -> Result<Self, DeviceError> {
        let rtv_heap = device.create_descriptor_heap(DescriptorKind::Rtv, 1, false)?;
        let srv_heap = device.create_descriptor_heap(DescriptorKind::CbvSrvUav, 1, true)?;
        let color = Self::create_color(&device, &rtv_heap, &srv_heap, width, height, format)?;
        Ok(Self {
            device,
            format,
            color,
            rtv_heap,
            srv_heap,
            dsv,
            width,
            height,
            prepared: None,
        })
    }

    fn create_color(
        device: &Arc<dyn Device>,
        rtv_heap: &DescriptorHeap,
        srv_heap: &DescriptorHeap,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<TrackedResource, DeviceError> {
        let desc = ResourceDesc::tex2d(format, width, height).with_render_target();
        let id = device.create_committed_resource(HeapType::Default, &desc, ResourceState::GenericRead, "offscreen color")?;
        device.create_view(&ViewDesc::Rtv { resource: id }, rtv_heap.slot(0).cpu)?;
        device.create_view(&ViewDesc::Srv { resource: id, format }, srv_heap.slot(0).cpu)?;
        Ok(TrackedResource::new(id, ResourceState::GenericRead))
    }

    pub fn srv(&self) -> DescriptorPair {
        self.srv_heap.slot(0)
    }

    pub fn srv_heap(&self) -> &DescriptorHeap {
        &self.srv_heap
    }

    pub fn state(&self) -> ResourceState {
        self.color.state()
    }

    /// Returns the color target to GENERIC_READ for sampling.
    pub fn finish(&mut self, list: &mut CommandList) {
        self.color.transition(list, ResourceState::GenericRead);
    }

    pub fn transition(&mut self, list: &mut CommandList, after: ResourceState) {
        self.color.transition(list, after);
    }
}

impl RenderTarget for OffscreenTarget {
    fn color_resource(&self) -> ResourceId {
        self.color.id
    }

    fn rtv(&self) -> CpuHandle {
        self.rtv_heap.slot(0).cpu
    }

    fn dsv(&self) -> CpuHandle {
        self.dsv
    }

    fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    fn scissor(&self) -> ScissorRect {
        ScissorRect::full(self.width, self.height)
    }

    fn prepare(&mut self, list: &mut CommandList, token: FrameToken, clear_color: [f32; 4]) {
        let (rtv, dsv) = (self.rtv(), self.dsv);
        prepare_color_target(&mut self.color, &mut self.prepared, list, token, rtv, dsv, clear_color);
    }

    /// Views are rewritten into the same slots.
    fn on_resize(&mut self, device: &Arc<dyn Device>, width: u32, height: u32) -> Result<(), DeviceError> {
        device.release_resource(self.color.id);
        self.color = Self::create_color(device, &self.rtv_heap, &self.srv_heap, width, height, self.format)?;
        self.width = width;
        self.height = height;
        self.prepared = None;
        debug!(target: "renderer", width, height, "offscreen target resized");
        Ok(())
    }
}

impl Drop for OffscreenTarget {
    fn drop(&mut self) {
        self.device.release_resource(self.color.id);
        self.device.release_descriptor_heap(&self.rtv_heap);
        self.device.release_descriptor_heap(&self.srv_heap);
    }
}
