// crates/engine_core/src/gpu/command.rs

use super::descriptor::{CpuHandle, GpuHandle, HeapId};
use super::pipeline::{PipelineId, RootSignatureId};
use super::resource::{Barrier, GpuAddress, ResourceId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct AllocatorId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    LineList,
    PointList,
    /// Patch list with the given number of control points.
    PatchList(u32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub const fn byte_size(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VertexBufferView {
    pub address: GpuAddress,
    pub size_in_bytes: u32,
    pub stride: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IndexBufferView {
    pub address: GpuAddress,
    pub size_in_bytes: u32,
    pub format: IndexFormat,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// One recorded command. Lists are plain data so any device can replay them.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    ResourceBarrier(Vec<Barrier>),
    SetPipelineState(PipelineId),
    SetGraphicsRootSignature(RootSignatureId),
    SetComputeRootSignature(RootSignatureId),
    SetDescriptorHeaps(Vec<HeapId>),
    SetGraphicsRootDescriptorTable { index: u32, base: GpuHandle },
    SetComputeRootDescriptorTable { index: u32, base: GpuHandle },
    SetGraphicsRootConstantBufferView { index: u32, address: GpuAddress },
    SetComputeRoot32BitConstants { index: u32, values: Vec<u32>, dest_offset: u32 },
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    ClearRenderTargetView { rtv: CpuHandle, color: [f32; 4] },
    ClearDepthStencilView { dsv: CpuHandle, depth: f32, stencil: u8 },
    SetRenderTargets { rtvs: Vec<CpuHandle>, dsv: Option<CpuHandle> },
    SetVertexBuffer(VertexBufferView),
    SetIndexBuffer(IndexBufferView),
    SetPrimitiveTopology(PrimitiveTopology),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    CopyResource { dst: ResourceId, src: ResourceId },
    CopyBufferRegion {
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    /// Copies a tightly packed upload buffer into a texture.
    CopyBufferToTexture { dst: ResourceId, src: ResourceId },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ListState {
    Recording,
    Closed,
}

/// A DIRECT command list bound to one allocator.
#[derive(Clone, Debug)]
pub struct CommandList {
    allocator: AllocatorId,
    commands: Vec<Command>,
    state: ListState,
}

impl CommandList {
    pub fn new(allocator: AllocatorId) -> Self {
        Self {
            allocator,
            commands: Vec::new(),
            state: ListState::Recording,
        }
    }

    pub fn allocator(&self) -> AllocatorId {
        self.allocator
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn close(&mut self) {
        self.state = ListState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == ListState::Closed
    }

    fn push(&mut self, command: Command) {
        debug_assert_eq!(
            self.state,
            ListState::Recording,
            "recording into a closed command list"
        );
        self.commands.push(command);
    }

    pub fn resource_barrier(&mut self, barriers: &[Barrier]) {
        if !barriers.is_empty() {
            self.push(Command::ResourceBarrier(barriers.to_vec()));
        }
    }

    pub fn set_pipeline_state(&mut self, pso: PipelineId) {
        self.push(Command::SetPipelineState(pso));
    }

    pub fn set_graphics_root_signature(&mut self, sig: RootSignatureId) {
        self.push(Command::SetGraphicsRootSignature(sig));
    }

    pub fn set_compute_root_signature(&mut self, sig: RootSignatureId) {
        self.push(Command::SetComputeRootSignature(sig));
    }

    pub fn set_descriptor_heaps(&mut self, heaps: &[HeapId]) {
        self.push(Command::SetDescriptorHeaps(heaps.to_vec()));
    }

    pub fn set_graphics_root_descriptor_table(&mut self, index: u32, base: GpuHandle) {
        self.push(Command::SetGraphicsRootDescriptorTable { index, base });
    }

    pub fn set_compute_root_descriptor_table(&mut self, index: u32, base: GpuHandle) {
        self.push(Command::SetComputeRootDescriptorTable { index, base });
    }

    pub fn set_graphics_root_constant_buffer_view(&mut self, index: u32, address: GpuAddress) {
        self.push(Command::SetGraphicsRootConstantBufferView { index, address });
    }

    pub fn set_compute_root_32bit_constants(&mut self, index: u32, values: &[u32], dest_offset: u32) {
        self.push(Command::SetComputeRoot32BitConstants {
            index,
            values: values.to_vec(),
            dest_offset,
        });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.push(Command::SetViewport(viewport));
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.push(Command::SetScissorRect(rect));
    }

    pub fn clear_render_target_view(&mut self, rtv: CpuHandle, color: [f32; 4]) {
        self.push(Command::ClearRenderTargetView { rtv, color });
    }

    pub fn clear_depth_stencil_view(&mut self, dsv: CpuHandle, depth: f32, stencil: u8) {
        self.push(Command::ClearDepthStencilView {
            dsv,
            depth,
            stencil,
        });
    }

    pub fn set_render_targets(&mut self, rtvs: &[CpuHandle], dsv: Option<CpuHandle>) {
        self.push(Command::SetRenderTargets {
            rtvs: rtvs.to_vec(),
            dsv,
        });
    }

    pub fn set_vertex_buffer(&mut self, view: VertexBufferView) {
        self.push(Command::SetVertexBuffer(view));
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.push(Command::SetIndexBuffer(view));
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.push(Command::SetPrimitiveTopology(topology));
    }

    pub fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count: 1,
            start_index,
            base_vertex,
            start_instance: 0,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    pub fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) {
        self.push(Command::CopyResource { dst, src });
    }

    pub fn copy_buffer_region(&mut self, dst: ResourceId, dst_offset: u64, src: ResourceId, src_offset: u64, size: u64) {
        self.push(Command::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        });
    }

    pub fn copy_buffer_to_texture(&mut self, dst: ResourceId, src: ResourceId) {
        self.push(Command::CopyBufferToTexture { dst, src });
    }
}
