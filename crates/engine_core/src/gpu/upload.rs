// crates/engine_core/src/gpu/upload.rs

use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;

use super::command::CommandList;
use super::device::Device;
use super::resource::{GpuAddress, HeapType, ResourceDesc, ResourceId, ResourceState, TrackedResource};
use crate::error::DeviceError;

/// Constant buffers must be placed on 256-byte boundaries.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

pub const fn constant_buffer_byte_size(size: u64) -> u64 {
    (size + (CONSTANT_BUFFER_ALIGNMENT - 1)) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// Fixed-capacity, persistently mapped array of `T` in an upload heap.
///
/// No synchronisation of its own: the caller guarantees the device is not
/// reading a slot while it is rewritten.
pub struct UploadBuffer<T: Pod> {
    device: Arc<dyn Device>,
    resource: ResourceId,
    address: GpuAddress,
    stride: u64,
    capacity: u32,
    _marker: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    pub fn new(device: Arc<dyn Device>, capacity: u32, is_constant_buffer: bool, label: &str) -> Result<Self, DeviceError> {
        let size = std::mem::size_of::<T>() as u64;
        let stride = if is_constant_buffer {
            constant_buffer_byte_size(size)
        } else {
            size
        };
        let desc = ResourceDesc::buffer(stride * u64::from(capacity.max(1)));
        let resource = device.create_committed_resource(HeapType::Upload, &desc, ResourceState::GenericRead, label)?;
        let address = device.gpu_address(resource)?;
        Ok(Self {
            device,
            resource,
            address,
            stride,
            capacity,
            _marker: PhantomData,
        })
    }

    fn check_slot(&self, slot: u32) -> Result<(), DeviceError> {
        if slot >= self.capacity {
            return Err(DeviceError::SlotOutOfRange {
                resource: self.resource,
                slot,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn copy_data(&self, slot: u32, value: &T) -> Result<(), DeviceError> {
        self.check_slot(slot)?;
        self.device
            .write_mapped(self.resource, u64::from(slot) * self.stride, bytemuck::bytes_of(value))
    }

    /// Reads slot `slot` back from the mapped memory.
    pub fn read(&self, slot: u32) -> Result<T, DeviceError> {
        self.check_slot(slot)?;
        let bytes = self.device.read_mapped(
            self.resource,
            u64::from(slot) * self.stride,
            std::mem::size_of::<T>() as u64,
        )?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn address(&self, slot: u32) -> GpuAddress {
        self.address.offset(u64::from(slot) * self.stride)
    }
}

impl<T: Pod> Drop for UploadBuffer<T> {
    fn drop(&mut self) {
        self.device.release_resource(self.resource);
    }
}

/// An upload-heap resource that must outlive the copy recorded from it.
/// Released when dropped, so keep it until the list has executed.
pub struct Staging {
    device: Arc<dyn Device>,
    pub resource: ResourceId,
}

impl Staging {
    pub fn with_bytes(device: Arc<dyn Device>, bytes: &[u8], label: &str) -> Result<Self, DeviceError> {
        let desc = ResourceDesc::buffer(bytes.len().max(1) as u64);
        let resource = device.create_committed_resource(HeapType::Upload, &desc, ResourceState::GenericRead, label)?;
        device.write_mapped(resource, 0, bytes)?;
        Ok(Self { device, resource })
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        self.device.release_resource(self.resource);
    }
}

/// Creates a default-heap buffer holding `bytes` and records the upload copy.
/// The returned staging buffer must stay alive until `list` has executed.
pub fn create_default_buffer(
    device: &Arc<dyn Device>,
    list: &mut CommandList,
    bytes: &[u8],
    label: &str,
) -> Result<(ResourceId, Staging), DeviceError> {
    let size = bytes.len().max(1) as u64;
    let id = device.create_committed_resource(HeapType::Default, &ResourceDesc::buffer(size), ResourceState::Common, label)?;
    let staging = Staging::with_bytes(device.clone(), bytes, &format!("{label} (upload)"))?;

    let mut tracked = TrackedResource::new(id, ResourceState::Common);
    tracked.transition(list, ResourceState::CopyDest);
    list.copy_buffer_region(id, 0, staging.resource, 0, bytes.len() as u64);
    tracked.transition(list, ResourceState::GenericRead);

    Ok((id, staging))
}
