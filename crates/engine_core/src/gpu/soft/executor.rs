// crates/engine_core/src/gpu/soft/executor.rs
//! Replays one command list against the device state, validating every
//! command before applying it.

use std::collections::HashMap;

use crate::gpu::{
    Command, CommandList, CpuHandle, Format, GpuAddress, GpuHandle, HeapId, HeapType, IndexBufferView, PipelineId,
    PrimitiveTopology, RangeKind, ResourceId, ResourceState, RootParameter, RootSignatureId, ShaderStage,
    TopologyType, VertexBufferView, ViewDesc, Viewport,
};

use super::kernels::{self, KernelArg};
use super::raster::{self, DrawCall};
use super::state::SoftState;
use super::{SoftDeviceConfig, TraceEntry};

#[derive(Clone, Debug)]
enum RootArg {
    Table(GpuHandle),
    Cbv(GpuAddress),
    Constants(Vec<u32>),
}

#[derive(Default)]
struct Bindings {
    pipeline: Option<PipelineId>,
    graphics_sig: Option<RootSignatureId>,
    compute_sig: Option<RootSignatureId>,
    heaps: Vec<HeapId>,
    graphics_args: HashMap<u32, RootArg>,
    compute_args: HashMap<u32, RootArg>,
    rtvs: Vec<CpuHandle>,
    dsv: Option<CpuHandle>,
    viewport: Option<Viewport>,
    vertex_buffer: Option<VertexBufferView>,
    index_buffer: Option<IndexBufferView>,
    topology: Option<PrimitiveTopology>,
}

pub(super) fn execute_list(state: &mut SoftState, submission: u64, list: &CommandList, config: &SoftDeviceConfig) {
    let mut exec = Exec {
        state,
        submission,
        bindings: Bindings::default(),
        rasterize: config.rasterize,
    };
    for command in list.commands() {
        if config.record_trace {
            exec.state.trace.push(TraceEntry {
                submission,
                command: command.clone(),
            });
        }
        if let Err(message) = exec.run(command) {
            exec.state.validation_error(submission, message);
        }
    }
}

struct Exec<'a> {
    state: &'a mut SoftState,
    submission: u64,
    bindings: Bindings,
    rasterize: bool,
}

fn expect_state(label: &str, actual: ResourceState, allowed: &[ResourceState], usage: &str) -> Result<(), String> {
    if allowed.contains(&actual) {
        Ok(())
    } else {
        Err(format!("'{label}' used as {usage} while in {actual:?} (needs one of {allowed:?})"))
    }
}

impl Exec<'_> {
    fn run(&mut self, command: &Command) -> Result<(), String> {
        match command {
            Command::ResourceBarrier(barriers) => {
                let mut errors = Vec::new();
                for b in barriers {
                    let label = self.state.label(b.resource);
                    match self.state.resource_mut(b.resource) {
                        None => errors.push(format!("barrier on {label}")),
                        Some(res) => {
                            if res.state != b.before {
                                errors.push(format!(
                                    "barrier on '{label}' declares before={:?} but resource is {:?}",
                                    b.before, res.state
                                ));
                            }
                            res.state = b.after;
                        }
                    }
                }
                match errors.len() {
                    0 => Ok(()),
                    _ => Err(errors.join("; ")),
                }
            }

            Command::SetPipelineState(id) => {
                self.pipeline_index(*id)?;
                self.bindings.pipeline = Some(*id);
                Ok(())
            }

            Command::SetGraphicsRootSignature(id) => {
                self.signature(*id)?;
                self.bindings.graphics_sig = Some(*id);
                self.bindings.graphics_args.clear();
                Ok(())
            }

            Command::SetComputeRootSignature(id) => {
                self.signature(*id)?;
                self.bindings.compute_sig = Some(*id);
                self.bindings.compute_args.clear();
                Ok(())
            }

            Command::SetDescriptorHeaps(heaps) => {
                for heap in heaps {
                    let h = self
                        .state
                        .heap(*heap)
                        .ok_or_else(|| format!("SetDescriptorHeaps with released heap {heap:?}"))?;
                    if !h.shader_visible {
                        return Err(format!("SetDescriptorHeaps with non shader-visible heap {heap:?}"));
                    }
                }
                self.bindings.heaps = heaps.clone();
                Ok(())
            }

            Command::SetGraphicsRootDescriptorTable { index, base } => self.bind_table(false, *index, *base),
            Command::SetComputeRootDescriptorTable { index, base } => self.bind_table(true, *index, *base),

            Command::SetGraphicsRootConstantBufferView { index, address } => {
                match self.root_param(false, *index)? {
                    RootParameter::Cbv { .. } => {}
                    other => return Err(format!("root slot {index} is {other:?}, not a CBV")),
                }
                self.state.resolve_address(*address)?;
                self.bindings.graphics_args.insert(*index, RootArg::Cbv(*address));
                Ok(())
            }

            Command::SetComputeRoot32BitConstants {
                index,
                values,
                dest_offset,
            } => {
                let count = match self.root_param(true, *index)? {
                    RootParameter::Constants { count, .. } => count,
                    other => return Err(format!("root slot {index} is {other:?}, not root constants")),
                };
                let end = *dest_offset as usize + values.len();
                if end > count as usize {
                    return Err(format!("root constants write [{dest_offset}..{end}) exceeds {count} values"));
                }
                let entry = self
                    .bindings
                    .compute_args
                    .entry(*index)
                    .or_insert_with(|| RootArg::Constants(vec![0; count as usize]));
                if let RootArg::Constants(slots) = entry {
                    slots[*dest_offset as usize..end].copy_from_slice(values);
                }
                Ok(())
            }

            Command::SetViewport(viewport) => {
                if viewport.width <= 0.0 || viewport.height <= 0.0 {
                    return Err(format!("degenerate viewport {viewport:?}"));
                }
                self.bindings.viewport = Some(*viewport);
                Ok(())
            }

            Command::SetScissorRect(_) => Ok(()),

            Command::ClearRenderTargetView { rtv, color } => {
                let resource = match self.state.view_for_cpu(*rtv)? {
                    ViewDesc::Rtv { resource } => resource,
                    other => return Err(format!("ClearRenderTargetView through {other:?}")),
                };
                let res = self
                    .state
                    .resource_mut(resource)
                    .ok_or_else(|| format!("clear of released {resource:?}"))?;
                expect_state(&res.label, res.state, &[ResourceState::RenderTarget], "render target")?;
                let texel = texel_bytes(res.desc.format, *color);
                for chunk in res.data.chunks_exact_mut(texel.len()) {
                    chunk.copy_from_slice(&texel);
                }
                Ok(())
            }

            Command::ClearDepthStencilView { dsv, depth, .. } => {
                let resource = match self.state.view_for_cpu(*dsv)? {
                    ViewDesc::Dsv { resource } => resource,
                    other => return Err(format!("ClearDepthStencilView through {other:?}")),
                };
                let res = self
                    .state
                    .resource_mut(resource)
                    .ok_or_else(|| format!("clear of released {resource:?}"))?;
                expect_state(&res.label, res.state, &[ResourceState::DepthWrite], "depth target")?;
                let bytes = depth.to_le_bytes();
                for chunk in res.data.chunks_exact_mut(4) {
                    chunk.copy_from_slice(&bytes);
                }
                Ok(())
            }

            Command::SetRenderTargets { rtvs, dsv } => {
                for rtv in rtvs {
                    if !matches!(self.state.view_for_cpu(*rtv)?, ViewDesc::Rtv { .. }) {
                        return Err("SetRenderTargets with a non-RTV handle".to_string());
                    }
                }
                if let Some(dsv) = dsv {
                    if !matches!(self.state.view_for_cpu(*dsv)?, ViewDesc::Dsv { .. }) {
                        return Err("SetRenderTargets with a non-DSV depth handle".to_string());
                    }
                }
                self.bindings.rtvs = rtvs.clone();
                self.bindings.dsv = *dsv;
                Ok(())
            }

            Command::SetVertexBuffer(view) => {
                self.state.resolve_address(view.address)?;
                self.bindings.vertex_buffer = Some(*view);
                Ok(())
            }

            Command::SetIndexBuffer(view) => {
                self.state.resolve_address(view.address)?;
                self.bindings.index_buffer = Some(*view);
                Ok(())
            }

            Command::SetPrimitiveTopology(topology) => {
                self.bindings.topology = Some(*topology);
                Ok(())
            }

            Command::DrawIndexed {
                index_count,
                start_index,
                base_vertex,
                ..
            } => {
                self.validate_draw(*index_count, *start_index)?;
                self.state.draw_count += 1;
                if self.rasterize {
                    let call = self.draw_call(*index_count, *start_index, *base_vertex)?;
                    raster::draw(self.state, &call)?;
                }
                Ok(())
            }

            Command::Dispatch { x, y, z } => {
                let (entry, args) = self.prepare_dispatch()?;
                self.state.dispatch_count += 1;
                kernels::dispatch(self.state, &entry, &args, [*x, *y, *z])
            }

            Command::CopyResource { dst, src } => {
                let (src_bytes, src_size) = {
                    let s = self
                        .state
                        .resource(*src)
                        .ok_or_else(|| format!("copy from {}", self.state.label(*src)))?;
                    expect_state(&s.label, s.state, &[ResourceState::CopySource], "copy source")?;
                    (s.data.clone(), s.desc.byte_size())
                };
                let label = self.state.label(*dst);
                let d = self
                    .state
                    .resource_mut(*dst)
                    .ok_or_else(|| format!("copy into {label}"))?;
                expect_state(&d.label, d.state, &[ResourceState::CopyDest], "copy destination")?;
                if d.desc.byte_size() != src_size {
                    return Err(format!("CopyResource size mismatch into '{}'", d.label));
                }
                d.data.copy_from_slice(&src_bytes);
                Ok(())
            }

            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let bytes = self.copy_source_bytes(*src, *src_offset, *size)?;
                let label = self.state.label(*dst);
                let d = self
                    .state
                    .resource_mut(*dst)
                    .ok_or_else(|| format!("copy into {label}"))?;
                expect_state(&d.label, d.state, &[ResourceState::CopyDest], "copy destination")?;
                let start = *dst_offset as usize;
                let end = start + bytes.len();
                if end > d.data.len() {
                    return Err(format!("CopyBufferRegion overruns '{}'", d.label));
                }
                d.data[start..end].copy_from_slice(&bytes);
                Ok(())
            }

            Command::CopyBufferToTexture { dst, src } => {
                let len = self
                    .state
                    .resource(*dst)
                    .map(|d| d.desc.byte_size())
                    .ok_or_else(|| format!("texture upload into {}", self.state.label(*dst)))?;
                let bytes = self.copy_source_bytes(*src, 0, len)?;
                let d = self
                    .state
                    .resource_mut(*dst)
                    .ok_or_else(|| format!("texture upload into {dst:?}"))?;
                expect_state(&d.label, d.state, &[ResourceState::CopyDest], "copy destination")?;
                d.data.copy_from_slice(&bytes);
                Ok(())
            }
        }
    }

    fn pipeline_index(&self, id: PipelineId) -> Result<usize, String> {
        let idx = (id.0 as usize)
            .checked_sub(1)
            .filter(|i| *i < self.state.pipelines.len())
            .ok_or_else(|| format!("unknown pipeline {id:?}"))?;
        Ok(idx)
    }

    fn signature(&self, id: RootSignatureId) -> Result<usize, String> {
        (id.0 as usize)
            .checked_sub(1)
            .filter(|i| *i < self.state.root_signatures.len())
            .ok_or_else(|| format!("unknown root signature {id:?}"))
    }

    fn root_param(&self, compute: bool, index: u32) -> Result<RootParameter, String> {
        let sig = if compute {
            self.bindings.compute_sig
        } else {
            self.bindings.graphics_sig
        }
        .ok_or_else(|| "root argument set before any root signature".to_string())?;
        let desc = &self.state.root_signatures[self.signature(sig)?];
        desc.parameters
            .get(index as usize)
            .copied()
            .ok_or_else(|| format!("root slot {index} out of range for '{}'", desc.label))
    }

    fn bind_table(&mut self, compute: bool, index: u32, base: GpuHandle) -> Result<(), String> {
        match self.root_param(compute, index)? {
            RootParameter::Table { .. } => {}
            other => return Err(format!("root slot {index} is {other:?}, not a descriptor table")),
        }
        let (heap, _) = self.state.decode_gpu(base)?;
        if !self.bindings.heaps.contains(&heap) {
            return Err(format!("descriptor table in heap {heap:?}, which is not bound"));
        }
        let args = if compute {
            &mut self.bindings.compute_args
        } else {
            &mut self.bindings.graphics_args
        };
        args.insert(index, RootArg::Table(base));
        Ok(())
    }

    /// Resolves a bound table into the resource it names, checking view kind
    /// and resource state.
    fn table_resource(&self, range: RangeKind, base: GpuHandle) -> Result<ResourceId, String> {
        let view = self.state.view_for_gpu(base)?;
        let (resource, allowed, usage): (ResourceId, &[ResourceState], &str) = match (range, view) {
            // Sampling a texture that is still in UAV state is tolerated for
            // compute SRVs; graphics reads are checked by the caller.
            (RangeKind::Srv, ViewDesc::Srv { resource, .. }) => (
                resource,
                &[ResourceState::GenericRead, ResourceState::UnorderedAccess],
                "shader resource",
            ),
            (RangeKind::Uav, ViewDesc::Uav { resource, .. }) => {
                (resource, &[ResourceState::UnorderedAccess], "unordered access")
            }
            (RangeKind::Cbv, ViewDesc::Cbv { address, .. }) => return Ok(self.state.resolve_address(address)?.0),
            (range, view) => return Err(format!("{range:?} table points at {view:?}")),
        };
        let res = self
            .state
            .resource(resource)
            .ok_or_else(|| format!("table names {}", self.state.label(resource)))?;
        expect_state(&res.label, res.state, allowed, usage)?;
        Ok(resource)
    }

    fn copy_source_bytes(&self, src: ResourceId, offset: u64, size: u64) -> Result<Vec<u8>, String> {
        let s = self
            .state
            .resource(src)
            .ok_or_else(|| format!("copy from {}", self.state.label(src)))?;
        if s.heap == HeapType::Upload {
            expect_state(&s.label, s.state, &[ResourceState::GenericRead], "upload source")?;
        } else {
            expect_state(&s.label, s.state, &[ResourceState::CopySource], "copy source")?;
        }
        let start = offset as usize;
        let end = start + size as usize;
        s.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| format!("copy reads past the end of '{}'", s.label))
    }

    fn validate_draw(&self, index_count: u32, start_index: u32) -> Result<(), String> {
        let pso = self
            .bindings
            .pipeline
            .ok_or_else(|| "DrawIndexed without a pipeline state".to_string())?;
        let desc = &self.state.pipelines[self.pipeline_index(pso)?];
        let graphics = desc
            .graphics_state()
            .ok_or_else(|| format!("DrawIndexed with compute pipeline '{}'", desc.label))?;
        if self.bindings.graphics_sig != Some(desc.root_signature) {
            return Err(format!("pipeline '{}' drawn with a different root signature", desc.label));
        }

        let sig = &self.state.root_signatures[self.signature(desc.root_signature)?];
        for (i, param) in sig.parameters.iter().enumerate() {
            let i = i as u32;
            match (param, self.bindings.graphics_args.get(&i)) {
                (RootParameter::Table { range, .. }, Some(RootArg::Table(base))) => {
                    let resource = self.table_resource(*range, *base)?;
                    if *range == RangeKind::Srv {
                        let res = self.state.resource(resource).ok_or("released texture")?;
                        expect_state(&res.label, res.state, &[ResourceState::GenericRead], "pixel/vertex shader resource")?;
                    }
                }
                (RootParameter::Cbv { .. }, Some(RootArg::Cbv(address))) => {
                    self.state.resolve_address(*address)?;
                }
                (RootParameter::Constants { .. }, Some(RootArg::Constants(_))) => {}
                (param, None) => return Err(format!("draw with root slot {i} ({param:?}) unbound")),
                (param, Some(arg)) => return Err(format!("root slot {i} ({param:?}) bound to {arg:?}")),
            }
        }

        if self.bindings.rtvs.is_empty() {
            return Err("DrawIndexed with no render target bound".to_string());
        }
        for rtv in &self.bindings.rtvs {
            if let ViewDesc::Rtv { resource } = self.state.view_for_cpu(*rtv)? {
                let res = self.state.resource(resource).ok_or("released render target")?;
                expect_state(&res.label, res.state, &[ResourceState::RenderTarget], "render target")?;
            }
        }
        if let Some(dsv) = self.bindings.dsv {
            if let ViewDesc::Dsv { resource } = self.state.view_for_cpu(dsv)? {
                let res = self.state.resource(resource).ok_or("released depth buffer")?;
                expect_state(&res.label, res.state, &[ResourceState::DepthWrite], "depth target")?;
            }
        }
        if self.bindings.viewport.is_none() {
            return Err("DrawIndexed without a viewport".to_string());
        }

        let vb = self
            .bindings
            .vertex_buffer
            .ok_or_else(|| "DrawIndexed without a vertex buffer".to_string())?;
        let ib = self
            .bindings
            .index_buffer
            .ok_or_else(|| "DrawIndexed without an index buffer".to_string())?;
        for address in [vb.address, ib.address] {
            let (id, _) = self.state.resolve_address(address)?;
            let res = self.state.resource(id).ok_or("released geometry buffer")?;
            expect_state(&res.label, res.state, &[ResourceState::GenericRead], "vertex/index buffer")?;
        }
        let needed = u64::from(start_index + index_count) * u64::from(ib.format.byte_size());
        if needed > u64::from(ib.size_in_bytes) {
            return Err(format!(
                "DrawIndexed reads {needed} index bytes from a {}-byte view",
                ib.size_in_bytes
            ));
        }

        let topology = self
            .bindings
            .topology
            .ok_or_else(|| "DrawIndexed without a primitive topology".to_string())?;
        let compatible = matches!(
            (topology, graphics.topology),
            (PrimitiveTopology::TriangleList, TopologyType::Triangle)
                | (PrimitiveTopology::LineList, TopologyType::Line)
                | (PrimitiveTopology::PointList, TopologyType::Point)
                | (PrimitiveTopology::PatchList(_), TopologyType::Patch)
        );
        if !compatible {
            return Err(format!(
                "topology {topology:?} does not match pipeline '{}' ({:?})",
                desc.label, graphics.topology
            ));
        }
        Ok(())
    }

    /// Resolves the bindings of a validated draw for the rasterizer.
    fn draw_call(&self, index_count: u32, start_index: u32, base_vertex: i32) -> Result<DrawCall, String> {
        let pso = self.bindings.pipeline.ok_or("DrawIndexed without a pipeline state")?;
        let desc = &self.state.pipelines[self.pipeline_index(pso)?];
        let graphics = desc.graphics_state().ok_or("DrawIndexed with a compute pipeline")?.clone();
        let sig = &self.state.root_signatures[self.signature(desc.root_signature)?];

        let mut constants = [None; 3];
        let mut textures = [None; 2];
        for (i, param) in sig.parameters.iter().enumerate() {
            match (param, self.bindings.graphics_args.get(&(i as u32))) {
                (RootParameter::Cbv { register }, Some(RootArg::Cbv(address))) => {
                    if let Some(slot) = constants.get_mut(*register as usize) {
                        *slot = Some(self.state.resolve_address(*address)?);
                    }
                }
                (RootParameter::Table { range: RangeKind::Srv, register }, Some(RootArg::Table(base))) => {
                    if let (Some(slot), ViewDesc::Srv { resource, .. }) =
                        (textures.get_mut(*register as usize), self.state.view_for_gpu(*base)?)
                    {
                        *slot = Some(resource);
                    }
                }
                _ => {}
            }
        }

        let rtv = *self.bindings.rtvs.first().ok_or("DrawIndexed with no render target bound")?;
        let target = match self.state.view_for_cpu(rtv)? {
            ViewDesc::Rtv { resource } => resource,
            other => return Err(format!("render target bound through {other:?}")),
        };
        let depth = match self.bindings.dsv.map(|dsv| self.state.view_for_cpu(dsv)).transpose()? {
            Some(ViewDesc::Dsv { resource }) => Some(resource),
            _ => None,
        };

        Ok(DrawCall {
            graphics,
            constants,
            textures,
            target,
            depth,
            viewport: self.bindings.viewport.ok_or("DrawIndexed without a viewport")?,
            vertices: self.bindings.vertex_buffer.ok_or("DrawIndexed without a vertex buffer")?,
            indices: self.bindings.index_buffer.ok_or("DrawIndexed without an index buffer")?,
            topology: self.bindings.topology.ok_or("DrawIndexed without a primitive topology")?,
            index_count,
            start_index,
            base_vertex,
        })
    }

    fn prepare_dispatch(&self) -> Result<(String, Vec<KernelArg>), String> {
        let pso = self
            .bindings
            .pipeline
            .ok_or_else(|| "Dispatch without a pipeline state".to_string())?;
        let desc = &self.state.pipelines[self.pipeline_index(pso)?];
        let cs = desc
            .shader(ShaderStage::Compute)
            .ok_or_else(|| format!("Dispatch with graphics pipeline '{}'", desc.label))?;
        if self.bindings.compute_sig != Some(desc.root_signature) {
            return Err(format!("pipeline '{}' dispatched with a different root signature", desc.label));
        }

        let sig = &self.state.root_signatures[self.signature(desc.root_signature)?];
        let mut args = Vec::with_capacity(sig.parameters.len());
        for (i, param) in sig.parameters.iter().enumerate() {
            let arg = match (param, self.bindings.compute_args.get(&(i as u32))) {
                (RootParameter::Table { range, .. }, Some(RootArg::Table(base))) => {
                    KernelArg::Texture(self.table_resource(*range, *base)?)
                }
                (RootParameter::Constants { .. }, Some(RootArg::Constants(values))) => {
                    KernelArg::Constants(values.clone())
                }
                (RootParameter::Cbv { .. }, Some(RootArg::Cbv(_))) => KernelArg::Address,
                // Compute kernels may leave slots they never touch unbound.
                (_, None) => KernelArg::Missing,
                (param, Some(arg)) => return Err(format!("root slot {i} ({param:?}) bound to {arg:?}")),
            };
            args.push(arg);
        }
        Ok((cs.entry_point.clone(), args))
    }
}

fn texel_bytes(format: Format, color: [f32; 4]) -> Vec<u8> {
    match format {
        Format::R8G8B8A8Unorm => color
            .iter()
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
        Format::R32Float => color[0].to_le_bytes().to_vec(),
        Format::D24UnormS8Uint | Format::Unknown => vec![0; 4],
    }
}
