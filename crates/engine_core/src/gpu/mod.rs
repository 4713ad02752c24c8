// crates/engine_core/src/gpu/mod.rs
//! Explicit command-list / descriptor-heap / PSO API model.
//!
//! The renderer only talks to [`Device`]; [`soft::SoftDevice`] is the
//! host-side reference implementation used by the tests and the demo.

pub mod command;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod queue;
pub mod resource;
pub mod soft;
pub mod upload;

pub use command::{
    AllocatorId, Command, CommandList, IndexBufferView, IndexFormat, PrimitiveTopology, ScissorRect,
    VertexBufferView, Viewport,
};
pub use descriptor::{CpuHandle, DescriptorHeap, DescriptorKind, DescriptorPair, GpuHandle, HeapId, ViewDesc};
pub use device::Device;
pub use pipeline::{
    BlendMode, CullMode, FillMode, PipelineDesc, PipelineId, RangeKind, RootParameter, RootSignatureDesc,
    RootSignatureId, ShaderBlob, ShaderStage, TopologyType,
};
pub use queue::{CommandQueue, QueueStats};
pub use resource::{
    Barrier, Format, GpuAddress, HeapType, ResourceDesc, ResourceId, ResourceState, TrackedResource,
};
pub use upload::{constant_buffer_byte_size, create_default_buffer, Staging, UploadBuffer};
