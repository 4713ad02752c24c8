// crates/engine_core/src/gpu/device.rs

use std::time::Duration;

use super::command::{AllocatorId, CommandList};
use super::descriptor::{CpuHandle, DescriptorHeap, DescriptorKind, ViewDesc};
use super::pipeline::{PipelineDesc, PipelineId, RootSignatureDesc, RootSignatureId};
use super::resource::{GpuAddress, HeapType, ResourceDesc, ResourceId, ResourceState};
use crate::error::DeviceError;

/// The explicit graphics API the renderer is written against.
///
/// Submission (`execute`, `signal`, `present`) is asynchronous: the device
/// runs submitted work strictly in call order on its own timeline and
/// publishes progress only through the fence.
pub trait Device: Send + Sync {
    fn create_committed_resource(
        &self,
        heap: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        label: &str,
    ) -> Result<ResourceId, DeviceError>;

    fn release_resource(&self, id: ResourceId);

    fn resource_desc(&self, id: ResourceId) -> Result<ResourceDesc, DeviceError>;

    fn gpu_address(&self, id: ResourceId) -> Result<GpuAddress, DeviceError>;

    /// Writes into a persistently mapped upload-heap resource.
    fn write_mapped(&self, id: ResourceId, offset: u64, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Reads from a CPU-visible resource.
    fn read_mapped(&self, id: ResourceId, offset: u64, len: u64) -> Result<Vec<u8>, DeviceError>;

    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeap, DeviceError>;

    /// Invalidates every handle into `heap`.
    fn release_descriptor_heap(&self, heap: &DescriptorHeap);

    fn descriptor_stride(&self, kind: DescriptorKind) -> u32;

    fn create_view(&self, view: &ViewDesc, dest: CpuHandle) -> Result<(), DeviceError>;

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<RootSignatureId, DeviceError>;

    fn create_pipeline_state(&self, desc: &PipelineDesc) -> Result<PipelineId, DeviceError>;

    fn create_command_allocator(&self) -> Result<AllocatorId, DeviceError>;

    /// Fails if commands recorded from `id` have not finished executing.
    fn reset_command_allocator(&self, id: AllocatorId) -> Result<(), DeviceError>;

    fn execute(&self, list: CommandList) -> Result<(), DeviceError>;

    fn signal(&self, value: u64) -> Result<(), DeviceError>;

    fn completed_fence(&self) -> u64;

    /// Blocks until the completed fence reaches `value` or `timeout` elapses.
    fn wait_for_fence(&self, value: u64, timeout: Duration) -> Result<(), DeviceError>;

    fn present(&self, back_buffer: ResourceId, sync_interval: u32) -> Result<(), DeviceError>;
}
