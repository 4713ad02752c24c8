// crates/engine_core/src/gpu/soft/state.rs

use std::collections::HashSet;

use crate::gpu::{
    AllocatorId, Command, CpuHandle, DescriptorKind, GpuAddress, GpuHandle, HeapId, HeapType, PipelineDesc,
    ResourceDesc, ResourceId, ResourceState, RootSignatureDesc, ViewDesc,
};

use super::{Hazard, PresentedImage, TraceEntry, ValidationError};

pub(super) const SHADER_VISIBLE_BIT: u64 = 1 << 63;

/// Resource ids carry the slot index (plus one) in the low bits and the
/// slot's generation above it, so an id from a released slot never names
/// the resource that reuses the slot.
const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const MAX_GENERATION: u32 = u32::MAX >> INDEX_BITS;

fn split_id(id: ResourceId) -> Option<(usize, u32)> {
    let idx = ((id.0 & INDEX_MASK) as usize).checked_sub(1)?;
    Some((idx, id.0 >> INDEX_BITS))
}

pub(super) struct SoftResource {
    pub desc: ResourceDesc,
    pub heap: HeapType,
    pub state: ResourceState,
    pub data: Vec<u8>,
    pub label: String,
    pub alive: bool,
    pub generation: u32,
}

impl SoftResource {
    pub fn new(desc: ResourceDesc, heap: HeapType, state: ResourceState, data: Vec<u8>, label: &str) -> Self {
        Self {
            desc,
            heap,
            state,
            data,
            label: label.to_string(),
            alive: true,
            generation: 0,
        }
    }
}

pub(super) struct SoftHeap {
    pub kind: DescriptorKind,
    pub capacity: u32,
    pub stride: u32,
    pub shader_visible: bool,
    pub views: Vec<Option<ViewDesc>>,
    pub alive: bool,
}

pub(super) struct InFlight {
    pub submission: u64,
    pub allocator: AllocatorId,
    pub resources: HashSet<ResourceId>,
    /// Fence value that retires this list; `None` until the next signal.
    pub retire_at: Option<u64>,
}

impl InFlight {
    pub fn retired(&self, completed: u64) -> bool {
        matches!(self.retire_at, Some(v) if v <= completed)
    }
}

#[derive(Default)]
pub(super) struct SoftState {
    pub resources: Vec<SoftResource>,
    /// Released slots waiting to be reused, most recent last.
    pub free_resources: Vec<usize>,
    pub heaps: Vec<SoftHeap>,
    pub root_signatures: Vec<RootSignatureDesc>,
    pub pipelines: Vec<PipelineDesc>,
    pub allocators: u32,
    pub in_flight: Vec<InFlight>,
    pub submissions: u64,
    pub validation: Vec<ValidationError>,
    pub hazards: Vec<Hazard>,
    pub trace: Vec<TraceEntry>,
    pub presented: Option<PresentedImage>,
    pub present_count: u64,
    pub draw_count: u64,
    pub dispatch_count: u64,
}

pub(super) fn stride_for(kind: DescriptorKind) -> u32 {
    match kind {
        DescriptorKind::CbvSrvUav => 32,
        DescriptorKind::Rtv | DescriptorKind::Dsv => 8,
    }
}

impl SoftState {
    pub fn resource(&self, id: ResourceId) -> Option<&SoftResource> {
        let (idx, generation) = split_id(id)?;
        self.resources
            .get(idx)
            .filter(|r| r.alive && r.generation == generation)
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Option<&mut SoftResource> {
        let (idx, generation) = split_id(id)?;
        self.resources
            .get_mut(idx)
            .filter(|r| r.alive && r.generation == generation)
    }

    /// Stores `resource` in a released slot if one is free, else in a new one.
    pub fn insert_resource(&mut self, mut resource: SoftResource) -> Result<ResourceId, String> {
        if let Some(idx) = self.free_resources.pop() {
            let generation = self.resources[idx].generation + 1;
            resource.generation = generation;
            self.resources[idx] = resource;
            return Ok(ResourceId((idx as u32 + 1) | (generation << INDEX_BITS)));
        }
        if self.resources.len() >= INDEX_MASK as usize {
            return Err(format!("{} live resources exhaust the id space", self.resources.len()));
        }
        resource.generation = 0;
        self.resources.push(resource);
        Ok(ResourceId(self.resources.len() as u32))
    }

    /// Frees the backing store. A slot whose generation is exhausted is
    /// retired instead of reused.
    pub fn release_resource(&mut self, id: ResourceId) -> bool {
        let Some((idx, _)) = split_id(id) else {
            return false;
        };
        let Some(res) = self.resource_mut(id) else {
            return false;
        };
        res.alive = false;
        res.data = Vec::new();
        if res.generation < MAX_GENERATION {
            self.free_resources.push(idx);
        }
        true
    }

    pub fn label(&self, id: ResourceId) -> String {
        let slot = split_id(id).and_then(|(idx, generation)| Some((self.resources.get(idx)?, generation)));
        match slot {
            Some((r, generation)) if r.alive && r.generation == generation => r.label.clone(),
            Some((r, generation)) if r.generation == generation => format!("{} (released)", r.label),
            Some(_) => format!("{id:?} (released)"),
            None => format!("{id:?}"),
        }
    }

    pub fn heap(&self, id: HeapId) -> Option<&SoftHeap> {
        let idx = (id.0 as usize).checked_sub(1)?;
        self.heaps.get(idx).filter(|h| h.alive)
    }

    pub fn heap_mut(&mut self, id: HeapId) -> Option<&mut SoftHeap> {
        let idx = (id.0 as usize).checked_sub(1)?;
        self.heaps.get_mut(idx).filter(|h| h.alive)
    }

    /// Maps a CPU handle to (heap, slot).
    pub fn decode_cpu(&self, handle: CpuHandle) -> Result<(HeapId, u32), String> {
        decode(self, handle.0, false)
    }

    pub fn decode_gpu(&self, handle: GpuHandle) -> Result<(HeapId, u32), String> {
        if handle.0 & SHADER_VISIBLE_BIT == 0 {
            return Err(format!("GPU handle {:#x} is not shader visible", handle.0));
        }
        decode(self, handle.0 & !SHADER_VISIBLE_BIT, true)
    }

    /// Resolves a descriptor and checks that the resource it names is alive.
    pub fn view_at(&self, heap: HeapId, slot: u32) -> Result<ViewDesc, String> {
        let h = self
            .heap(heap)
            .ok_or_else(|| format!("descriptor heap {heap:?} was released"))?;
        let view = h
            .views
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or_else(|| format!("descriptor {heap:?}[{slot}] was never written"))?;
        if let Some(res) = view_resource(&view) {
            if self.resource(res).is_none() {
                return Err(format!("descriptor {heap:?}[{slot}] refers to {}", self.label(res)));
            }
        }
        Ok(view)
    }

    pub fn view_for_cpu(&self, handle: CpuHandle) -> Result<ViewDesc, String> {
        let (heap, slot) = self.decode_cpu(handle)?;
        self.view_at(heap, slot)
    }

    pub fn view_for_gpu(&self, handle: GpuHandle) -> Result<ViewDesc, String> {
        let (heap, slot) = self.decode_gpu(handle)?;
        self.view_at(heap, slot)
    }

    pub fn resolve_address(&self, address: GpuAddress) -> Result<(ResourceId, u64), String> {
        let id = ResourceId((address.0 >> 32) as u32);
        let offset = address.0 & 0xffff_ffff;
        let res = self
            .resource(id)
            .ok_or_else(|| format!("GPU address {:#x} refers to {}", address.0, self.label(id)))?;
        if offset > res.desc.byte_size() {
            return Err(format!("GPU address {:#x} is past the end of '{}'", address.0, res.label));
        }
        Ok((id, offset))
    }

    /// Every resource a list touches, resolved at submission time.
    pub fn referenced_resources(&self, commands: &[Command]) -> HashSet<ResourceId> {
        let mut out = HashSet::new();
        for command in commands {
            match command {
                Command::ResourceBarrier(barriers) => out.extend(barriers.iter().map(|b| b.resource)),
                Command::SetGraphicsRootDescriptorTable { base, .. }
                | Command::SetComputeRootDescriptorTable { base, .. } => {
                    if let Some(res) = self.view_for_gpu(*base).ok().and_then(|v| view_resource(&v)) {
                        out.insert(res);
                    }
                }
                Command::SetGraphicsRootConstantBufferView { address, .. } => {
                    if let Ok((res, _)) = self.resolve_address(*address) {
                        out.insert(res);
                    }
                }
                Command::SetVertexBuffer(view) => {
                    if let Ok((res, _)) = self.resolve_address(view.address) {
                        out.insert(res);
                    }
                }
                Command::SetIndexBuffer(view) => {
                    if let Ok((res, _)) = self.resolve_address(view.address) {
                        out.insert(res);
                    }
                }
                Command::ClearRenderTargetView { rtv: handle, .. } | Command::ClearDepthStencilView { dsv: handle, .. } => {
                    if let Some(res) = self.view_for_cpu(*handle).ok().and_then(|v| view_resource(&v)) {
                        out.insert(res);
                    }
                }
                Command::CopyResource { dst, src }
                | Command::CopyBufferRegion { dst, src, .. }
                | Command::CopyBufferToTexture { dst, src } => {
                    out.insert(*dst);
                    out.insert(*src);
                }
                _ => {}
            }
        }
        out
    }

    pub fn validation_error(&mut self, submission: u64, message: String) {
        tracing::warn!(target: "gpu", submission, "validation: {message}");
        self.validation.push(ValidationError { submission, message });
    }
}

fn decode(state: &SoftState, raw: u64, need_visible: bool) -> Result<(HeapId, u32), String> {
    let heap_id = HeapId((raw >> 32) as u32);
    let offset = (raw & 0xffff_ffff) as u32;
    let idx = (heap_id.0 as usize)
        .checked_sub(1)
        .ok_or_else(|| format!("null descriptor handle {raw:#x}"))?;
    let heap = state
        .heaps
        .get(idx)
        .ok_or_else(|| format!("descriptor handle {raw:#x} names no heap"))?;
    if !heap.alive {
        return Err(format!("descriptor handle {raw:#x} belongs to released heap {heap_id:?}"));
    }
    if need_visible && !heap.shader_visible {
        return Err(format!("heap {heap_id:?} is not shader visible"));
    }
    if offset % heap.stride != 0 {
        return Err(format!("descriptor handle {raw:#x} is not aligned to stride {}", heap.stride));
    }
    let slot = offset / heap.stride;
    if slot >= heap.capacity {
        return Err(format!("descriptor slot {slot} out of range for heap {heap_id:?} ({} slots)", heap.capacity));
    }
    Ok((heap_id, slot))
}

pub(super) fn view_resource(view: &ViewDesc) -> Option<ResourceId> {
    match *view {
        ViewDesc::Cbv { address, .. } => Some(ResourceId((address.0 >> 32) as u32)),
        ViewDesc::Srv { resource, .. }
        | ViewDesc::Uav { resource, .. }
        | ViewDesc::Rtv { resource }
        | ViewDesc::Dsv { resource } => Some(resource),
    }
}
