// crates/engine_core/src/renderer/wave_sim.rs
//! GPU wave simulation over three ping-ponged R32_FLOAT textures.

use std::sync::Arc;

use glam::Vec2;
use tracing::{debug, trace};

use super::pipeline::wave_slots;
use crate::config::WaveConfig;
use crate::error::{DeviceError, WaveError};
use crate::gpu::{
    CommandList, DescriptorHeap, DescriptorPair, Device, Format, GpuHandle, HeapType, PipelineId, ResourceDesc,
    ResourceId, ResourceState, RootSignatureId, Staging, TrackedResource, ViewDesc,
};

const PREV: usize = 0;
const CURR: usize = 1;
const NEXT: usize = 2;

/// Thread-group edge of `UpdateWavesCS`.
pub const WAVE_GROUP_SIZE: u32 = 16;

/// Damped wave equation constants `K0..K2` for `(damping, speed, dt, dx)`.
pub fn wave_constants(damping: f32, speed: f32, dt: f32, dx: f32) -> [f32; 3] {
    let d = damping * dt + 2.0;
    let e = (speed * speed) * (dt * dt) / (dx * dx);
    [(damping * dt - 2.0) / d, (4.0 - 8.0 * e) / d, (2.0 * e) / d]
}

pub struct GpuWaveSimulator {
    device: Arc<dyn Device>,
    rows: u32,
    cols: u32,
    dx: f32,
    time_step: f32,
    k: [f32; 3],
    elapsed: f32,

    // Rotated together: index 0 = Prev, 1 = Curr, 2 = Next.
    textures: [TrackedResource; 3],
    srv: [GpuHandle; 3],
    uav: [GpuHandle; 3],

    update_pso: PipelineId,
    disturb_pso: PipelineId,
    root_signature: RootSignatureId,
    staging: Vec<Staging>,
}

impl GpuWaveSimulator {
    /// SRVs for the three textures followed by their UAVs.
    pub const DESCRIPTOR_COUNT: u32 = 6;

    /// Creates the textures and records their initialisation into `list`.
    pub fn new(
        device: Arc<dyn Device>,
        list: &mut CommandList,
        config: &WaveConfig,
        update_pso: PipelineId,
        disturb_pso: PipelineId,
        root_signature: RootSignatureId,
    ) -> Result<Self, WaveError> {
        config.validate()?;
        let (rows, cols) = (config.rows, config.cols);

        let desc = ResourceDesc::tex2d(Format::R32Float, cols, rows).with_unordered_access();
        let create = |name: &str| -> Result<TrackedResource, DeviceError> {
            let id = device.create_committed_resource(HeapType::Default, &desc, ResourceState::Common, name)?;
            Ok(TrackedResource::new(id, ResourceState::Common))
        };
        let mut textures = [create("waves prev")?, create("waves curr")?, create("waves next")?];

        let zeros = vec![0u8; desc.byte_size() as usize];
        let mut staging = Vec::with_capacity(2);
        for (slot, final_state) in [(PREV, ResourceState::UnorderedAccess), (CURR, ResourceState::GenericRead)] {
            let upload = Staging::with_bytes(device.clone(), &zeros, "waves initial upload")?;
            textures[slot].transition(list, ResourceState::CopyDest);
            list.copy_buffer_to_texture(textures[slot].id, upload.resource);
            textures[slot].transition(list, final_state);
            staging.push(upload);
        }
        textures[NEXT].transition(list, ResourceState::UnorderedAccess);

        let k = wave_constants(config.damping, config.speed, config.dt, config.dx);
        debug!(target: "waves", rows, cols, k0 = k[0], k1 = k[1], k2 = k[2], "wave simulator created");

        Ok(Self {
            device,
            rows,
            cols,
            dx: config.dx,
            time_step: config.dt,
            k,
            elapsed: 0.0,
            textures,
            srv: [GpuHandle::NULL; 3],
            uav: [GpuHandle::NULL; 3],
            update_pso,
            disturb_pso,
            root_signature,
            staging,
        })
    }

    /// Writes the six views starting at `base_slot` of `heap`. Each slot is
    /// computed from the heap's base; the base itself never moves.
    pub fn build_descriptors(&mut self, heap: &DescriptorHeap, base_slot: u32) -> Result<(), DeviceError> {
        for i in 0..3 {
            let resource = self.textures[i].id;
            let srv: DescriptorPair = heap.slot(base_slot + i as u32);
            let uav: DescriptorPair = heap.slot(base_slot + 3 + i as u32);
            self.device.create_view(&ViewDesc::Srv { resource, format: Format::R32Float }, srv.cpu)?;
            self.device.create_view(&ViewDesc::Uav { resource, format: Format::R32Float }, uav.cpu)?;
            self.srv[i] = srv.gpu;
            self.uav[i] = uav.gpu;
        }
        Ok(())
    }

    /// Advances the simulation once `dt` worth of frame time has built up.
    /// Returns whether a step was recorded.
    pub fn update(&mut self, list: &mut CommandList, frame_dt: f32) -> bool {
        self.elapsed += frame_dt;
        if self.elapsed < self.time_step {
            // A disturbance this frame left Curr writable; sample it anyway.
            self.textures[CURR].transition(list, ResourceState::GenericRead);
            return false;
        }

        list.set_pipeline_state(self.update_pso);
        list.set_compute_root_signature(self.root_signature);
        let k = self.k.map(f32::to_bits);
        list.set_compute_root_32bit_constants(wave_slots::CONSTANTS, &k, 0);
        list.set_compute_root_descriptor_table(wave_slots::PREV_SRV, self.srv[PREV]);
        list.set_compute_root_descriptor_table(wave_slots::CURR_UAV, self.uav[CURR]);
        list.set_compute_root_descriptor_table(wave_slots::NEXT_UAV, self.uav[NEXT]);

        // Curr is read through a UAV by the update kernel.
        self.textures[CURR].transition(list, ResourceState::UnorderedAccess);
        list.dispatch(self.cols / WAVE_GROUP_SIZE, self.rows / WAVE_GROUP_SIZE, 1);

        // (Prev, Curr, Next) <- (Curr, Next, Prev)
        self.textures.rotate_left(1);
        self.srv.rotate_left(1);
        self.uav.rotate_left(1);

        self.textures[CURR].transition(list, ResourceState::GenericRead);
        self.elapsed = 0.0;
        trace!(target: "waves", "wave step recorded");
        true
    }

    /// Adds `magnitude` at row `i`, column `j` of Curr (and half of it to the
    /// four neighbours). Must be followed by an [`GpuWaveSimulator::update`]
    /// in the same frame, which returns Curr to GENERIC_READ.
    pub fn disturb(&mut self, list: &mut CommandList, i: u32, j: u32, magnitude: f32) {
        list.set_pipeline_state(self.disturb_pso);
        list.set_compute_root_signature(self.root_signature);
        list.set_compute_root_32bit_constants(wave_slots::CONSTANTS, &[magnitude.to_bits()], 3);
        list.set_compute_root_32bit_constants(wave_slots::CONSTANTS, &[j, i], 4);
        list.set_compute_root_descriptor_table(wave_slots::NEXT_UAV, self.uav[CURR]);

        self.textures[CURR].transition(list, ResourceState::UnorderedAccess);
        list.dispatch(1, 1, 1);
    }

    /// Shader-visible SRV of Curr, bound as the displacement map.
    pub fn displacement_map(&self) -> GpuHandle {
        self.srv[CURR]
    }

    pub fn displacement_resource(&self) -> ResourceId {
        self.textures[CURR].id
    }

    pub fn texel_size(&self) -> Vec2 {
        Vec2::new(1.0 / self.cols as f32, 1.0 / self.rows as f32)
    }

    pub fn spatial_step(&self) -> f32 {
        self.dx
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn constants(&self) -> [f32; 3] {
        self.k
    }

    /// Host-tracked states in (Prev, Curr, Next) order.
    pub fn states(&self) -> [ResourceState; 3] {
        self.textures.map(|t| t.state())
    }

    /// Resources in (Prev, Curr, Next) order.
    pub fn resources(&self) -> [ResourceId; 3] {
        self.textures.map(|t| t.id)
    }

    pub fn srv_handles(&self) -> [GpuHandle; 3] {
        self.srv
    }

    pub fn uav_handles(&self) -> [GpuHandle; 3] {
        self.uav
    }

    /// Drops the zero-fill uploads once the setup list has executed.
    pub fn release_staging(&mut self) {
        self.staging.clear();
    }
}

impl Drop for GpuWaveSimulator {
    fn drop(&mut self) {
        for t in &self.textures {
            self.device.release_resource(t.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_the_reference_values() {
        let k = wave_constants(0.2, 2.0, 0.03, 0.25);
        assert!((k[0] - (-0.994_02)).abs() < 1e-4, "{k:?}");
        assert!((k[1] - 1.764_31).abs() < 1e-4, "{k:?}");
        assert!((k[2] - 0.057_428).abs() < 1e-4, "{k:?}");
    }

    #[test]
    fn flat_surface_stays_flat() {
        // K0 + K1 + 4 K2 == 1 for any parameters.
        let k = wave_constants(0.0, 1.5, 0.02, 0.5);
        assert!((k[0] + k[1] + 4.0 * k[2] - 1.0).abs() < 1e-5);
    }
}
