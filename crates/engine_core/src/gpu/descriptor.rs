// crates/engine_core/src/gpu/descriptor.rs

use super::resource::{Format, GpuAddress, ResourceId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    CbvSrvUav,
    Rtv,
    Dsv,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct HeapId(pub u32);

/// CPU-side descriptor handle. Encodes the owning heap in the upper 32 bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct CpuHandle(pub u64);

/// Shader-visible descriptor handle. Zero means "not shader visible".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct GpuHandle(pub u64);

impl CpuHandle {
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl GpuHandle {
    pub const NULL: GpuHandle = GpuHandle(0);

    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A CPU/GPU handle pair plus the heap's increment size.
///
/// `offset` always starts from this pair's own base; it never mutates it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DescriptorPair {
    pub cpu: CpuHandle,
    pub gpu: GpuHandle,
    pub stride: u32,
}

impl DescriptorPair {
    pub fn offset(&self, index: u32) -> DescriptorPair {
        let bytes = u64::from(index) * u64::from(self.stride);
        DescriptorPair {
            cpu: self.cpu.offset(bytes),
            gpu: if self.gpu.is_null() {
                GpuHandle::NULL
            } else {
                self.gpu.offset(bytes)
            },
            stride: self.stride,
        }
    }
}

/// A heap returned by [`crate::gpu::Device::create_descriptor_heap`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorHeap {
    pub id: HeapId,
    pub kind: DescriptorKind,
    pub capacity: u32,
    pub shader_visible: bool,
    pub start: DescriptorPair,
}

impl DescriptorHeap {
    /// Handles for slot `index`. Slot bounds are a programmer error.
    pub fn slot(&self, index: u32) -> DescriptorPair {
        assert!(
            index < self.capacity,
            "descriptor slot {index} out of range for {:?} heap of {}",
            self.kind,
            self.capacity
        );
        self.start.offset(index)
    }

    pub fn stride(&self) -> u32 {
        self.start.stride
    }
}

/// View written into a descriptor slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ViewDesc {
    Cbv { address: GpuAddress, size: u32 },
    Srv { resource: ResourceId, format: Format },
    Uav { resource: ResourceId, format: Format },
    Rtv { resource: ResourceId },
    Dsv { resource: ResourceId },
}

impl ViewDesc {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            ViewDesc::Cbv { .. } | ViewDesc::Srv { .. } | ViewDesc::Uav { .. } => {
                DescriptorKind::CbvSrvUav
            }
            ViewDesc::Rtv { .. } => DescriptorKind::Rtv,
            ViewDesc::Dsv { .. } => DescriptorKind::Dsv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> DescriptorPair {
        DescriptorPair {
            cpu: CpuHandle(0x1_0000_0000),
            gpu: GpuHandle(0x8000_0001_0000_0000),
            stride: 32,
        }
    }

    #[test]
    fn repeated_offsets_do_not_accumulate() {
        let base = pair();
        let a = base.offset(1);
        let b = base.offset(1);
        let c = base.offset(1);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(base.offset(3).cpu.0 - base.cpu.0, 96);
        assert_eq!(base.offset(0), base);
    }

    #[test]
    fn null_gpu_handle_stays_null() {
        let p = DescriptorPair {
            gpu: GpuHandle::NULL,
            ..pair()
        };
        assert!(p.offset(5).gpu.is_null());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn slot_out_of_range_is_fatal() {
        let heap = DescriptorHeap {
            id: HeapId(1),
            kind: DescriptorKind::Dsv,
            capacity: 1,
            shader_visible: false,
            start: pair(),
        };
        let _ = heap.slot(1);
    }
}
