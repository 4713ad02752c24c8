// crates/engine_core/src/renderer/frame_resource.rs

use std::sync::Arc;

use tracing::{debug, warn};

use engine_shared::{MaterialConstants, ObjectConstants, PassConstants, Vertex};

use crate::error::DeviceError;
use crate::gpu::{AllocatorId, Device, UploadBuffer};

/// Everything the host rewrites for one in-flight frame.
pub struct FrameResource {
    pub allocator: AllocatorId,
    pub pass_cb: UploadBuffer<PassConstants>,
    pub object_cb: UploadBuffer<ObjectConstants>,
    /// `None` when no material is registered.
    pub material_cb: Option<UploadBuffer<MaterialConstants>>,
    /// Dynamic wave vertices; unused while the GPU simulator drives the waves.
    pub waves_vb: Option<UploadBuffer<Vertex>>,
    /// Fence value signalled after this frame's submission; 0 = never submitted.
    pub fence: u64,
}

impl FrameResource {
    pub fn new(
        device: &Arc<dyn Device>,
        index: usize,
        object_count: u32,
        material_count: u32,
        wave_vertex_count: u32,
    ) -> Result<Self, DeviceError> {
        let allocator = device.create_command_allocator()?;
        let pass_cb = UploadBuffer::new(device.clone(), 1, true, &format!("frame {index} pass CB"))?;
        let object_cb = UploadBuffer::new(device.clone(), object_count, true, &format!("frame {index} object CB"))?;

        let material_cb = if material_count == 0 {
            warn!(target: "renderer", frame = index, "material count is 0, skipping material CB");
            None
        } else {
            Some(UploadBuffer::new(
                device.clone(),
                material_count,
                true,
                &format!("frame {index} material CB"),
            )?)
        };

        let waves_vb = if wave_vertex_count == 0 {
            None
        } else {
            Some(UploadBuffer::new(
                device.clone(),
                wave_vertex_count,
                false,
                &format!("frame {index} waves VB"),
            )?)
        };

        Ok(Self {
            allocator,
            pass_cb,
            object_cb,
            material_cb,
            waves_vb,
            fence: 0,
        })
    }

    pub fn in_flight(&self, completed_fence: u64) -> bool {
        self.fence != 0 && completed_fence < self.fence
    }
}

/// Fixed ring of frame resources. The index advances before the slot is
/// used, so the first frame lands on slot 1 (slot 0 when the ring is 1 long).
pub struct FrameRing {
    frames: Vec<FrameResource>,
    index: usize,
}

impl FrameRing {
    pub fn new(frames: Vec<FrameResource>) -> Self {
        assert!(!frames.is_empty(), "frame ring needs at least one frame resource");
        Self { frames, index: 0 }
    }

    pub fn build(
        device: &Arc<dyn Device>,
        len: usize,
        object_count: u32,
        material_count: u32,
        wave_vertex_count: u32,
    ) -> Result<Self, DeviceError> {
        let frames = (0..len.max(1))
            .map(|i| FrameResource::new(device, i, object_count, material_count, wave_vertex_count))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(target: "renderer", len = frames.len(), object_count, material_count, "frame ring built");
        Ok(Self::new(frames))
    }

    /// Moves to the next slot and returns its index.
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.frames.len();
        self.index
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current(&self) -> &FrameResource {
        &self.frames[self.index]
    }

    pub fn current_mut(&mut self) -> &mut FrameResource {
        &mut self.frames[self.index]
    }

    pub fn get(&self, index: usize) -> Option<&FrameResource> {
        self.frames.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameResource> + '_ {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::soft::{SoftDevice, SoftDeviceConfig};

    fn device() -> Arc<dyn Device> {
        Arc::new(SoftDevice::new(SoftDeviceConfig::default()).unwrap())
    }

    #[test]
    fn first_frame_uses_slot_one() {
        let mut ring = FrameRing::build(&device(), 3, 4, 2, 0).unwrap();
        assert_eq!(ring.advance(), 1);
        assert_eq!(ring.advance(), 2);
        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.advance(), 1);
    }

    #[test]
    fn single_slot_ring_always_reuses_slot_zero() {
        let mut ring = FrameRing::build(&device(), 1, 1, 1, 0).unwrap();
        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.advance(), 0);
    }

    #[test]
    fn zero_materials_skips_the_material_cb() {
        let ring = FrameRing::build(&device(), 2, 1, 0, 0).unwrap();
        assert!(ring.iter().all(|f| f.material_cb.is_none()));
        assert!(ring.current().waves_vb.is_none());
    }

    #[test]
    fn object_cb_slots_are_256_byte_apart() {
        let ring = FrameRing::build(&device(), 1, 3, 1, 0).unwrap();
        let cb = &ring.current().object_cb;
        assert_eq!(cb.stride(), 256);
        assert_eq!(cb.address(2).0 - cb.address(0).0, 512);
    }

    #[test]
    fn never_submitted_frames_are_not_in_flight() {
        let mut ring = FrameRing::build(&device(), 1, 1, 1, 0).unwrap();
        assert!(!ring.current().in_flight(0));
        ring.current_mut().fence = 4;
        assert!(ring.current().in_flight(3));
        assert!(!ring.current().in_flight(4));
    }
}
