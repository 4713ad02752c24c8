// crates/engine_core/src/gpu/resource.rs

use super::command::CommandList;

/// Device-assigned resource handle. Zero is never handed out.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

/// Logical resource states the core transitions between.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    RenderTarget,
    DepthWrite,
    UnorderedAccess,
    CopySource,
    CopyDest,
    Present,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    Unknown,
    R32Float,
    R8G8B8A8Unorm,
    D24UnormS8Uint,
}

impl Format {
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Format::Unknown => 1,
            Format::R32Float | Format::R8G8B8A8Unorm | Format::D24UnormS8Uint => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeapType {
    /// GPU-local memory; written only through copies.
    Default,
    /// CPU-visible, persistently mapped.
    Upload,
    Readback,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dimension {
    Buffer,
    Texture2D,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceFlags {
    pub allow_unordered_access: bool,
    pub allow_render_target: bool,
    pub allow_depth_stencil: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResourceDesc {
    pub dimension: Dimension,
    pub format: Format,
    /// Byte size for buffers, texel width for textures.
    pub width: u64,
    pub height: u32,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    pub fn buffer(size: u64) -> Self {
        Self {
            dimension: Dimension::Buffer,
            format: Format::Unknown,
            width: size,
            height: 1,
            flags: ResourceFlags::default(),
        }
    }

    pub fn tex2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            dimension: Dimension::Texture2D,
            format,
            width: u64::from(width),
            height,
            flags: ResourceFlags::default(),
        }
    }

    pub fn with_unordered_access(mut self) -> Self {
        self.flags.allow_unordered_access = true;
        self
    }

    pub fn with_render_target(mut self) -> Self {
        self.flags.allow_render_target = true;
        self
    }

    pub fn with_depth_stencil(mut self) -> Self {
        self.flags.allow_depth_stencil = true;
        self
    }

    /// Total backing size in bytes.
    pub fn byte_size(&self) -> u64 {
        match self.dimension {
            Dimension::Buffer => self.width,
            Dimension::Texture2D => {
                self.width * u64::from(self.height) * u64::from(self.format.bytes_per_texel())
            }
        }
    }

    /// Bytes per texel row; equal to the byte size for buffers.
    pub fn row_pitch(&self) -> u64 {
        match self.dimension {
            Dimension::Buffer => self.width,
            Dimension::Texture2D => self.width * u64::from(self.format.bytes_per_texel()),
        }
    }
}

/// GPU virtual address of a byte inside a buffer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Barrier {
    pub const fn transition(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
        }
    }
}

/// A resource together with the state the host believes it is in.
///
/// Every transition the host records goes through [`TrackedResource::transition`],
/// so the recorded `before` always matches what the device will see when the
/// list executes in submission order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrackedResource {
    pub id: ResourceId,
    state: ResourceState,
}

impl TrackedResource {
    pub const fn new(id: ResourceId, state: ResourceState) -> Self {
        Self { id, state }
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Records `state -> after` into `list`. Returns false (and records
    /// nothing) when the resource is already in `after`.
    pub fn transition(&mut self, list: &mut CommandList, after: ResourceState) -> bool {
        if self.state == after {
            return false;
        }
        list.resource_barrier(&[Barrier::transition(self.id, self.state, after)]);
        self.state = after;
        true
    }

    /// Builds the barrier without recording it, for batching several
    /// transitions into one `ResourceBarrier` call.
    pub fn barrier_to(&mut self, after: ResourceState) -> Option<Barrier> {
        if self.state == after {
            return None;
        }
        let barrier = Barrier::transition(self.id, self.state, after);
        self.state = after;
        Some(barrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::command::Command;
    use crate::gpu::AllocatorId;

    #[test]
    fn transition_records_exact_pair() {
        let mut list = CommandList::new(AllocatorId(1));
        let mut res = TrackedResource::new(ResourceId(7), ResourceState::Common);

        assert!(res.transition(&mut list, ResourceState::CopyDest));
        assert!(!res.transition(&mut list, ResourceState::CopyDest));
        assert!(res.transition(&mut list, ResourceState::GenericRead));

        let barriers: Vec<_> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::ResourceBarrier(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(
            barriers,
            vec![
                Barrier::transition(ResourceId(7), ResourceState::Common, ResourceState::CopyDest),
                Barrier::transition(ResourceId(7), ResourceState::CopyDest, ResourceState::GenericRead),
            ]
        );
        assert_eq!(res.state(), ResourceState::GenericRead);
    }

    #[test]
    fn texture_sizes() {
        let desc = ResourceDesc::tex2d(Format::R32Float, 256, 128);
        assert_eq!(desc.byte_size(), 256 * 128 * 4);
        assert_eq!(desc.row_pitch(), 1024);
        assert_eq!(ResourceDesc::buffer(300).byte_size(), 300);
    }
}
