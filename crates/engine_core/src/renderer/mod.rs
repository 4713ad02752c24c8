// crates/engine_core/src/renderer/mod.rs
//! The frame loop: ring advance, constant-buffer upload, layered draws,
//! the optional blur, submission and present.

pub mod blur;
pub mod catalog;
pub mod frame_graph;
pub mod frame_resource;
pub mod pipeline;
pub mod render_item;
pub mod render_target;
pub mod wave_sim;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytemuck::Pod;
use tracing::{debug, info, trace, warn};

use engine_shared::PassConstants;

use crate::config::RendererConfig;
use crate::error::{CatalogError, EngineError};
use crate::gpu::{
    AllocatorId, CommandQueue, DescriptorHeap, DescriptorKind, Device, Format, ResourceState, Staging, ViewDesc,
};
use crate::present::{PresentSurface, BACK_BUFFER_FORMAT};
use crate::shader::ShaderCompiler;
use crate::texture_loader::TextureLoader;

pub use blur::{BlurFilter, BlurSettings};
pub use catalog::{
    GeometryCatalog, GeometryId, IndexData, Material, MaterialCatalog, MaterialId, MaterialParams, MeshGeometry,
    SubmeshGeometry, Texture, TextureCatalog,
};
pub use frame_graph::{FrameGraph, PassKind};
pub use frame_resource::{FrameResource, FrameRing};
pub use pipeline::{PipelineCatalog, PsoRole};
pub use render_item::{DirtyCounter, LayerRegistry, RenderItem, RenderItemHandle, RenderLayer};
pub use render_target::{FrameToken, OffscreenTarget, RenderTarget};
pub use wave_sim::GpuWaveSimulator;

use pipeline::slots;

/// Tick input: seconds since the last frame and since start.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FrameTime {
    pub delta: f32,
    pub total: f32,
}

/// What one [`Renderer::tick`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub ring_index: usize,
    /// Fence value the host blocked on before reusing the slot.
    pub waited_on: Option<u64>,
    pub signalled_fence: u64,
    pub object_writes: u32,
    pub material_writes: u32,
    pub draws: u32,
    pub skipped_items: u32,
    pub wave_step: bool,
    pub blur_iterations: u32,
    pub presented: bool,
}

struct Setup {
    allocator: AllocatorId,
    staging: Vec<Staging>,
}

/// Offscreen scene target and the blur run over it before present.
struct PostProcess {
    offscreen: OffscreenTarget,
    filter: BlurFilter,
    settings: BlurSettings,
}

/// Built by [`Renderer::finish_setup`].
struct FrameState {
    ring: FrameRing,
    heap: DescriptorHeap,
    graph: FrameGraph,
    default_srv_slot: u32,
}

pub struct Renderer<S: PresentSurface> {
    device: Arc<dyn Device>,
    queue: CommandQueue,
    surface: S,
    config: RendererConfig,
    pipelines: PipelineCatalog,
    materials: MaterialCatalog,
    geometries: GeometryCatalog,
    textures: TextureCatalog,
    items: LayerRegistry,
    waves: Option<GpuWaveSimulator>,
    post: Option<PostProcess>,
    pass: PassConstants,
    disturbances: Vec<(u32, u32, f32)>,
    setup: Option<Setup>,
    frame: Option<FrameState>,
    frame_count: u64,
}

impl<S: PresentSurface> Renderer<S> {
    /// Builds the pipelines and opens the setup command list. Scene content
    /// is added with the setup methods, then [`Renderer::finish_setup`].
    pub fn new(
        device: Arc<dyn Device>,
        surface: S,
        compiler: &dyn ShaderCompiler,
        config: RendererConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let mut queue = CommandQueue::new(device.clone(), Duration::from_millis(config.fence_timeout_ms));
        let pipelines = PipelineCatalog::build(&device, compiler)?;

        let allocator = device.create_command_allocator()?;
        queue.reset(allocator)?;

        let post = match config.blur.clone() {
            Some(settings) => {
                let (width, height) = (surface.width(), surface.height());
                let offscreen = OffscreenTarget::new(device.clone(), width, height, BACK_BUFFER_FORMAT, surface.dsv())?;
                let filter = BlurFilter::new(
                    device.clone(),
                    width,
                    height,
                    pipelines.require(PsoRole::HorzBlur)?,
                    pipelines.require(PsoRole::VertBlur)?,
                    pipelines.blur_signature,
                )?;
                Some(PostProcess {
                    offscreen,
                    filter,
                    settings,
                })
            }
            None => None,
        };

        let mut pass = PassConstants::default();
        pass.set_render_target_size(surface.width(), surface.height());

        info!(
            target: "renderer",
            frame_resources = config.frame_resources,
            width = surface.width(),
            height = surface.height(),
            blur = post.is_some(),
            "renderer created"
        );
        Ok(Self {
            materials: MaterialCatalog::new(config.frame_resources),
            device,
            queue,
            surface,
            config,
            pipelines,
            geometries: GeometryCatalog::new(),
            textures: TextureCatalog::new(),
            items: LayerRegistry::new(),
            waves: None,
            post,
            pass,
            disturbances: Vec::new(),
            setup: Some(Setup {
                allocator,
                staging: Vec::new(),
            }),
            frame: None,
            frame_count: 0,
        })
    }

    fn setup_mut(&mut self) -> Result<&mut Setup, EngineError> {
        self.setup.as_mut().ok_or(EngineError::SceneFinalized)
    }

    // --- SCENE SETUP ---

    /// Returns the texture's slot in the shader-visible heap.
    pub fn load_texture(&mut self, loader: &dyn TextureLoader, name: &str, path: &Path) -> Result<u32, EngineError> {
        self.setup_mut()?;
        let list = self.queue.list()?;
        self.textures.load(loader, &self.device, list, name, path)
    }

    pub fn create_material(
        &mut self,
        name: &str,
        cb_index: u32,
        diffuse_srv_index: u32,
        params: MaterialParams,
    ) -> Result<MaterialId, EngineError> {
        self.setup_mut()?;
        Ok(self.materials.create(name, cb_index, diffuse_srv_index, params)?)
    }

    pub fn upload_geometry<V: Pod>(
        &mut self,
        name: &str,
        vertices: &[V],
        indices: IndexData<'_>,
        submeshes: &[(&str, SubmeshGeometry)],
    ) -> Result<GeometryId, EngineError> {
        self.setup_mut()?;
        let list = self.queue.list()?;
        let (mut mesh, staging) = MeshGeometry::upload(&self.device, list, name, vertices, indices)?;
        for (sub_name, sub) in submeshes {
            mesh = mesh.with_submesh(sub_name, *sub);
        }
        let id = self.geometries.add(mesh)?;
        if let Some(setup) = self.setup.as_mut() {
            setup.staging.extend(staging);
        }
        debug!(target: "catalog", geometry = name, vertices = vertices.len(), "geometry uploaded");
        Ok(id)
    }

    /// Creates the GPU wave simulator from the configured grid.
    pub fn create_wave_simulator(&mut self) -> Result<&GpuWaveSimulator, EngineError> {
        self.setup_mut()?;
        let update = self.pipelines.require(PsoRole::WavesUpdate)?;
        let disturb = self.pipelines.require(PsoRole::WavesDisturb)?;
        let list = self.queue.list()?;
        let waves = GpuWaveSimulator::new(
            self.device.clone(),
            list,
            &self.config.waves,
            update,
            disturb,
            self.pipelines.wave_signature,
        )?;
        let waves = self.waves.insert(waves);
        Ok(&*waves)
    }

    /// The item's dirty counter is reset to the ring length.
    pub fn add_render_item(&mut self, layer: RenderLayer, mut item: RenderItem) -> Result<RenderItemHandle, EngineError> {
        self.setup_mut()?;
        item.dirty_mut().rebase(self.config.frame_resources);
        Ok(self.items.add(layer, item)?)
    }

    /// Builds the descriptor heap and frame ring, runs the setup list and
    /// waits for it. No scene content can be added afterwards.
    pub fn finish_setup(&mut self) -> Result<(), EngineError> {
        let setup = self.setup.take().ok_or(EngineError::SceneFinalized)?;

        // Layout: one SRV per texture, the six wave slots, the four blur
        // slots, then the default SRV.
        let texture_slots = self.textures.len() as u32;
        let wave_slots = if self.waves.is_some() {
            GpuWaveSimulator::DESCRIPTOR_COUNT
        } else {
            0
        };
        let blur_slots = if self.post.is_some() { BlurFilter::DESCRIPTOR_COUNT } else { 0 };
        let default_srv_slot = texture_slots + wave_slots + blur_slots;
        let heap = self
            .device
            .create_descriptor_heap(DescriptorKind::CbvSrvUav, default_srv_slot + 1, true)?;

        for texture in self.textures.iter() {
            let view = ViewDesc::Srv {
                resource: texture.resource,
                format: Format::R8G8B8A8Unorm,
            };
            self.device.create_view(&view, heap.slot(texture.heap_index).cpu)?;
        }
        if let Some(waves) = self.waves.as_mut() {
            waves.build_descriptors(&heap, texture_slots)?;
        }
        if let Some(post) = self.post.as_mut() {
            post.filter.build_descriptors(&heap, texture_slots + wave_slots)?;
        }
        let list = self.queue.list()?;
        let fallback = self.textures.fallback(&self.device, list)?;
        self.device.create_view(
            &ViewDesc::Srv {
                resource: fallback,
                format: Format::R8G8B8A8Unorm,
            },
            heap.slot(default_srv_slot).cpu,
        )?;

        let ring = FrameRing::build(
            &self.device,
            self.config.frame_resources,
            self.items.object_slot_count().max(1),
            self.materials.cb_slot_count(),
            0,
        )?;
        let graph = FrameGraph::build(
            &RenderLayer::draw_order(&self.config.optional_layers),
            self.post.is_some(),
        )?;

        self.queue.execute()?;
        self.queue.flush()?;
        drop(setup.staging);
        self.textures.release_staging();
        if let Some(waves) = self.waves.as_mut() {
            waves.release_staging();
        }
        debug!(target: "renderer", allocator = ?setup.allocator, "setup list retired");

        info!(
            target: "renderer",
            items = self.items.len(),
            materials = self.materials.len(),
            textures = self.textures.len(),
            heap_slots = heap.capacity,
            "scene ready"
        );
        self.frame = Some(FrameState {
            ring,
            heap,
            graph,
            default_srv_slot,
        });
        Ok(())
    }

    // --- FRAME LOOP ---

    /// Queues a disturbance at row `i`, column `j`; applied right before the
    /// next wave update.
    pub fn disturb_waves(&mut self, i: u32, j: u32, magnitude: f32) {
        if self.waves.is_some() {
            self.disturbances.push((i, j, magnitude));
        }
    }

    pub fn tick(&mut self, time: FrameTime) -> Result<FrameReport, EngineError> {
        let Self {
            queue,
            surface,
            config,
            pipelines,
            materials,
            geometries,
            textures,
            items,
            waves,
            post,
            pass,
            disturbances,
            frame,
            frame_count,
            ..
        } = self;
        let frame = frame.as_mut().ok_or(EngineError::SceneNotReady)?;

        if !surface.is_ready() {
            trace!(target: "renderer", "surface not ready, frame skipped");
            return Ok(FrameReport::default());
        }

        // Every ring slot has the same object-CB capacity; check before anything is recorded.
        let capacity = frame.ring.current().object_cb.capacity();
        if let Some((_, item)) = items.iter().find(|(_, item)| item.obj_cb_index() >= capacity) {
            return Err(CatalogError::SlotOutOfRange {
                kind: "object",
                slot: item.obj_cb_index(),
                capacity,
            }
            .into());
        }

        *frame_count += 1;
        let token = FrameToken(*frame_count);
        let mut report = FrameReport {
            frame: token.0,
            ring_index: frame.ring.advance(),
            ..FrameReport::default()
        };

        let slot_fence = frame.ring.current().fence;
        if frame.ring.current().in_flight(queue.completed_fence()) {
            report.waited_on = Some(slot_fence);
            queue.wait_for_fence(slot_fence)?;
        }
        let current = frame.ring.current();
        queue.reset(current.allocator)?;

        // Constant buffers. The slot's previous submission has retired.
        for item in items.iter_mut() {
            if item.dirty().is_dirty() {
                current.object_cb.copy_data(item.obj_cb_index(), &item.object_constants())?;
                item.dirty_mut().consume();
                report.object_writes += 1;
            }
        }
        if let Some(material_cb) = current.material_cb.as_ref() {
            for material in materials.iter_mut() {
                if material.dirty().is_dirty() {
                    material_cb.copy_data(material.cb_index(), &material.constants())?;
                    material.dirty_mut().consume();
                    report.material_writes += 1;
                }
            }
        }
        pass.total_time = time.total;
        pass.delta_time = time.delta;
        pass.set_render_target_size(surface.width(), surface.height());
        current.pass_cb.copy_data(0, pass)?;

        let list = queue.list()?;
        list.set_descriptor_heaps(&[frame.heap.id]);

        let default_srv = frame.heap.slot(frame.default_srv_slot).gpu;
        let mut scene_begun = false;
        for graph_pass in frame.graph.passes() {
            match graph_pass.kind {
                PassKind::WaveSimulation => {
                    if let Some(waves) = waves.as_mut() {
                        for (i, j, magnitude) in disturbances.drain(..) {
                            waves.disturb(list, i, j, magnitude);
                        }
                        report.wave_step = waves.update(list, time.delta);
                    }
                }
                PassKind::Layer(layer) => {
                    if !scene_begun {
                        let target: &mut dyn RenderTarget = match post.as_mut() {
                            Some(post) => &mut post.offscreen,
                            None => &mut *surface,
                        };
                        target.prepare(list, token, config.clear_color);
                        target.set_viewport(list);
                        list.set_graphics_root_signature(pipelines.default_signature);
                        list.set_graphics_root_constant_buffer_view(slots::PASS_CB, current.pass_cb.address(0));
                        let displacement = waves.as_ref().map_or(default_srv, |w| w.displacement_map());
                        list.set_graphics_root_descriptor_table(slots::DISPLACEMENT_TABLE, displacement);
                        scene_begun = true;
                    }

                    list.set_pipeline_state(pipelines.require(PsoRole::for_layer(layer))?);
                    for item in items.layer(layer) {
                        let Some(geometry) = geometries.get(item.geometry()) else {
                            warn!(target: "renderer", layer = layer.name(), slot = item.obj_cb_index(), "render item has no geometry, skipped");
                            report.skipped_items += 1;
                            continue;
                        };
                        let (Some(material), Some(material_cb)) =
                            (materials.get(item.material()), current.material_cb.as_ref())
                        else {
                            warn!(target: "renderer", layer = layer.name(), slot = item.obj_cb_index(), "render item has no material, skipped");
                            report.skipped_items += 1;
                            continue;
                        };

                        let srv = if (material.diffuse_srv_index() as usize) < textures.len() {
                            frame.heap.slot(material.diffuse_srv_index()).gpu
                        } else {
                            default_srv
                        };

                        list.set_vertex_buffer(geometry.vertex_buffer_view);
                        list.set_index_buffer(geometry.index_buffer_view);
                        list.set_primitive_topology(item.topology());
                        list.set_graphics_root_descriptor_table(slots::DIFFUSE_TABLE, srv);
                        list.set_graphics_root_constant_buffer_view(
                            slots::OBJECT_CB,
                            current.object_cb.address(item.obj_cb_index()),
                        );
                        list.set_graphics_root_constant_buffer_view(
                            slots::MATERIAL_CB,
                            material_cb.address(material.cb_index()),
                        );
                        list.draw_indexed(item.index_count(), item.start_index(), item.base_vertex());
                        report.draws += 1;
                    }
                }
                PassKind::Blur => {
                    if let Some(post) = post.as_mut() {
                        report.blur_iterations = post.filter.execute(list, &mut post.offscreen, &post.settings);
                    }
                }
                PassKind::Present => match post.as_mut() {
                    Some(post) => {
                        post.offscreen.transition(list, ResourceState::CopySource);
                        surface.transition_back_buffer(list, ResourceState::CopyDest);
                        post.offscreen.copy_to(&*surface, list);
                        surface.finish(list);
                        post.offscreen.finish(list);
                    }
                    None => surface.finish(list),
                },
            }
        }

        queue.execute()?;
        let fence = queue.signal()?;
        frame.ring.current_mut().fence = fence;
        report.signalled_fence = fence;
        surface.present()?;
        report.presented = true;

        trace!(
            target: "renderer",
            frame = report.frame,
            ring = report.ring_index,
            fence,
            draws = report.draws,
            "frame submitted"
        );
        Ok(report)
    }

    /// Waits for the device, then rebuilds the surface. A failed resize is
    /// logged and frames are skipped until a later resize succeeds.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        if self.queue.is_recording() {
            return Err(EngineError::SceneNotReady);
        }
        self.queue.flush()?;
        match self.surface.resize(width, height) {
            Ok(()) => {
                if let Some(post) = self.post.as_mut() {
                    post.offscreen.on_resize(&self.device, width, height)?;
                    post.filter.on_resize(width, height)?;
                }
                self.pass.set_render_target_size(width, height);
                info!(target: "renderer", width, height, "resized");
            }
            Err(err) => {
                warn!(target: "renderer", width, height, %err, "resize failed, skipping frames");
            }
        }
        Ok(())
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.surface.set_vsync(vsync);
        info!(target: "renderer", vsync, "vsync changed");
    }

    // --- ACCESSORS ---

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn pipelines(&self) -> &PipelineCatalog {
        &self.pipelines
    }

    pub fn materials(&self) -> &MaterialCatalog {
        &self.materials
    }

    /// Material edits mark the material dirty for the whole ring.
    pub fn materials_mut(&mut self) -> &mut MaterialCatalog {
        &mut self.materials
    }

    pub fn geometries(&self) -> &GeometryCatalog {
        &self.geometries
    }

    pub fn textures(&self) -> &TextureCatalog {
        &self.textures
    }

    pub fn items(&self) -> &LayerRegistry {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut LayerRegistry {
        &mut self.items
    }

    /// Moves an item to another object-CB slot. Once the ring exists the
    /// slot must also fit the per-frame object buffer.
    pub fn set_object_slot(&mut self, handle: RenderItemHandle, slot: u32) -> Result<(), EngineError> {
        if let Some(frame) = self.frame.as_ref() {
            let capacity = frame.ring.current().object_cb.capacity();
            if slot >= capacity {
                return Err(CatalogError::SlotOutOfRange {
                    kind: "object",
                    slot,
                    capacity,
                }
                .into());
            }
        }
        Ok(self.items.set_object_slot(handle, slot)?)
    }

    pub fn waves(&self) -> Option<&GpuWaveSimulator> {
        self.waves.as_ref()
    }

    pub fn blur_settings(&self) -> Option<&BlurSettings> {
        self.post.as_ref().map(|p| &p.settings)
    }

    /// Read by every later frame; None when the renderer was built without blur.
    pub fn blur_settings_mut(&mut self) -> Option<&mut BlurSettings> {
        self.post.as_mut().map(|p| &mut p.settings)
    }

    pub fn offscreen_target(&self) -> Option<&OffscreenTarget> {
        self.post.as_ref().map(|p| &p.offscreen)
    }

    pub fn blur_filter(&self) -> Option<&BlurFilter> {
        self.post.as_ref().map(|p| &p.filter)
    }

    pub fn pass_constants(&self) -> &PassConstants {
        &self.pass
    }

    /// Camera, lights and fog. Time and target size are filled in by `tick`.
    pub fn pass_constants_mut(&mut self) -> &mut PassConstants {
        &mut self.pass
    }

    pub fn frame_ring(&self) -> Option<&FrameRing> {
        self.frame.as_ref().map(|f| &f.ring)
    }

    pub fn descriptor_heap(&self) -> Option<&DescriptorHeap> {
        self.frame.as_ref().map(|f| &f.heap)
    }

    pub fn default_srv_slot(&self) -> Option<u32> {
        self.frame.as_ref().map(|f| f.default_srv_slot)
    }

    pub fn frame_graph(&self) -> Option<&FrameGraph> {
        self.frame.as_ref().map(|f| &f.graph)
    }
}

impl<S: PresentSurface> Drop for Renderer<S> {
    fn drop(&mut self) {
        if self.queue.is_recording() {
            if let Err(err) = self.queue.execute() {
                warn!(target: "renderer", %err, "failed to submit pending setup list");
            }
        }
        if let Err(err) = self.queue.flush() {
            warn!(target: "renderer", %err, "flush on shutdown failed");
        }
        if let Some(frame) = self.frame.as_ref() {
            self.device.release_descriptor_heap(&frame.heap);
        }
    }
}
