// crates/engine_core/src/renderer/blur.rs
//! Separable bilateral blur applied in place to an offscreen target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::pipeline::{blur_slots, BLUR_CONSTANT_COUNT};
use super::render_target::{OffscreenTarget, RenderTarget};
use crate::error::{DeviceError, EngineError};
use crate::gpu::{
    CommandList, DescriptorHeap, DescriptorPair, Device, Format, GpuHandle, HeapType, PipelineId, ResourceDesc,
    ResourceId, ResourceState, RootSignatureId, TrackedResource, ViewDesc,
};

/// The weight constants hold `2 * MAX_BLUR_RADIUS + 1` taps.
pub const MAX_BLUR_RADIUS: usize = 5;

/// Threads per group along the blurred axis in `Blur.hlsl`.
pub const BLUR_GROUP_SIZE: u32 = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurSettings {
    /// Horizontal + vertical iterations per frame. 0 leaves the image as is.
    pub count: u32,
    /// Gaussian sigma in texels.
    pub spatial_sigma: f32,
    /// Edge-stopping sigma in 8-bit color units; 0 gives a plain Gaussian.
    pub intensity_sigma: f32,
}

impl Default for BlurSettings {
    fn default() -> Self {
        Self {
            count: 2,
            spatial_sigma: 2.0,
            intensity_sigma: 0.0,
        }
    }
}

impl BlurSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [("spatial_sigma", self.spatial_sigma), ("intensity_sigma", self.intensity_sigma)] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidConfig(format!("blur {name} must be finite and >= 0, got {value}")));
            }
        }
        Ok(())
    }
}

/// Normalized Gaussian taps for `sigma`. The radius is `ceil(2 sigma)`,
/// capped at [`MAX_BLUR_RADIUS`]; sigma 0 yields the single tap `[1.0]`.
pub fn gauss_weights(sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = ((2.0 * sigma).ceil() as usize).min(MAX_BLUR_RADIUS) as i32;
    let two_sigma2 = 2.0 * sigma * sigma;
    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / two_sigma2).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Root constants for one blur pass: radius, intensity sigma, weights.
fn blur_constants(settings: &BlurSettings) -> [u32; BLUR_CONSTANT_COUNT as usize] {
    let weights = gauss_weights(settings.spatial_sigma);
    let mut constants = [0u32; BLUR_CONSTANT_COUNT as usize];
    constants[0] = ((weights.len() - 1) / 2) as u32;
    constants[1] = settings.intensity_sigma.to_bits();
    for (slot, w) in constants[2..].iter_mut().zip(&weights) {
        *slot = w.to_bits();
    }
    constants
}

/// Two ping-ponged RGBA8 maps the size of the target being blurred.
pub struct BlurFilter {
    device: Arc<dyn Device>,
    width: u32,
    height: u32,
    maps: [TrackedResource; 2],
    // SRV 0, SRV 1, UAV 0, UAV 1 once built.
    descriptors: Option<[DescriptorPair; 4]>,
    horz_pso: PipelineId,
    vert_pso: PipelineId,
    root_signature: RootSignatureId,
}

impl BlurFilter {
    /// SRVs for the two maps followed by their UAVs.
    pub const DESCRIPTOR_COUNT: u32 = 4;

    pub fn new(
        device: Arc<dyn Device>,
        width: u32,
        height: u32,
        horz_pso: PipelineId,
        vert_pso: PipelineId,
        root_signature: RootSignatureId,
    ) -> Result<Self, DeviceError> {
        let maps = Self::create_maps(&device, width, height)?;
        debug!(target: "renderer", width, height, "blur filter created");
        Ok(Self {
            device,
            width,
            height,
            maps,
            descriptors: None,
            horz_pso,
            vert_pso,
            root_signature,
        })
    }

    fn create_maps(device: &Arc<dyn Device>, width: u32, height: u32) -> Result<[TrackedResource; 2], DeviceError> {
        let desc = ResourceDesc::tex2d(Format::R8G8B8A8Unorm, width, height).with_unordered_access();
        let create = |name: &str| -> Result<TrackedResource, DeviceError> {
            let id = device.create_committed_resource(HeapType::Default, &desc, ResourceState::Common, name)?;
            Ok(TrackedResource::new(id, ResourceState::Common))
        };
        let first = create("blur map 0")?;
        match create("blur map 1") {
            Ok(second) => Ok([first, second]),
            Err(err) => {
                device.release_resource(first.id);
                Err(err)
            }
        }
    }

    /// Writes the four views starting at `base_slot` of `heap` and keeps the
    /// slots so a resize can rewrite them in place.
    pub fn build_descriptors(&mut self, heap: &DescriptorHeap, base_slot: u32) -> Result<(), DeviceError> {
        let slots = [0, 1, 2, 3].map(|i| heap.slot(base_slot + i));
        self.descriptors = Some(slots);
        self.write_views()
    }

    fn write_views(&self) -> Result<(), DeviceError> {
        let Some(slots) = self.descriptors else {
            return Ok(());
        };
        let format = Format::R8G8B8A8Unorm;
        for (i, map) in self.maps.iter().enumerate() {
            let resource = map.id;
            self.device.create_view(&ViewDesc::Srv { resource, format }, slots[i].cpu)?;
            self.device.create_view(&ViewDesc::Uav { resource, format }, slots[2 + i].cpu)?;
        }
        Ok(())
    }

    /// Recreates both maps at the new size. The device must be idle.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        for map in &self.maps {
            self.device.release_resource(map.id);
        }
        self.maps = Self::create_maps(&self.device, width, height)?;
        self.width = width;
        self.height = height;
        self.write_views()?;
        debug!(target: "renderer", width, height, "blur maps resized");
        Ok(())
    }

    fn srv(&self, map: usize) -> GpuHandle {
        self.descriptors.map_or(GpuHandle::NULL, |d| d[map].gpu)
    }

    fn uav(&self, map: usize) -> GpuHandle {
        self.descriptors.map_or(GpuHandle::NULL, |d| d[2 + map].gpu)
    }

    /// Blurs `target` in place `settings.count` times and returns the number
    /// of iterations recorded. The target is left in COPY_DEST.
    pub fn execute(&mut self, list: &mut CommandList, target: &mut OffscreenTarget, settings: &BlurSettings) -> u32 {
        if settings.count == 0 {
            return 0;
        }
        let constants = blur_constants(settings);

        target.transition(list, ResourceState::CopySource);
        self.maps[0].transition(list, ResourceState::CopyDest);
        list.copy_resource(self.maps[0].id, target.color_resource());

        self.maps[0].transition(list, ResourceState::GenericRead);
        self.maps[1].transition(list, ResourceState::UnorderedAccess);

        list.set_compute_root_signature(self.root_signature);
        list.set_compute_root_32bit_constants(blur_slots::CONSTANTS, &constants, 0);

        let groups_x = self.width.div_ceil(BLUR_GROUP_SIZE);
        let groups_y = self.height.div_ceil(BLUR_GROUP_SIZE);
        for _ in 0..settings.count {
            // Map 0 -> map 1 across rows.
            list.set_pipeline_state(self.horz_pso);
            list.set_compute_root_descriptor_table(blur_slots::INPUT_SRV, self.srv(0));
            list.set_compute_root_descriptor_table(blur_slots::OUTPUT_UAV, self.uav(1));
            list.dispatch(groups_x, self.height, 1);

            self.maps[0].transition(list, ResourceState::UnorderedAccess);
            self.maps[1].transition(list, ResourceState::GenericRead);

            // Map 1 -> map 0 down columns.
            list.set_pipeline_state(self.vert_pso);
            list.set_compute_root_descriptor_table(blur_slots::INPUT_SRV, self.srv(1));
            list.set_compute_root_descriptor_table(blur_slots::OUTPUT_UAV, self.uav(0));
            list.dispatch(self.width, groups_y, 1);

            self.maps[0].transition(list, ResourceState::GenericRead);
            self.maps[1].transition(list, ResourceState::UnorderedAccess);
        }

        self.maps[0].transition(list, ResourceState::CopySource);
        target.transition(list, ResourceState::CopyDest);
        list.copy_resource(target.color_resource(), self.maps[0].id);
        trace!(target: "renderer", iterations = settings.count, "blur recorded");
        settings.count
    }

    /// Resources in (map 0, map 1) order.
    pub fn resources(&self) -> [ResourceId; 2] {
        self.maps.map(|m| m.id)
    }

    pub fn states(&self) -> [ResourceState; 2] {
        self.maps.map(|m| m.state())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for BlurFilter {
    fn drop(&mut self) {
        for map in &self.maps {
            self.device.release_resource(map.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_normalized_and_capped() {
        let w = gauss_weights(1.0);
        assert_eq!(w.len(), 5);
        assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(w[2] > w[1] && w[1] > w[0]);
        assert!((w[0] - w[4]).abs() < 1e-7);

        assert_eq!(gauss_weights(100.0).len(), 2 * MAX_BLUR_RADIUS + 1);
        assert_eq!(gauss_weights(0.0), vec![1.0]);
    }

    #[test]
    fn constants_pack_radius_sigma_and_weights() {
        let settings = BlurSettings {
            count: 1,
            spatial_sigma: 1.0,
            intensity_sigma: 12.0,
        };
        let c = blur_constants(&settings);
        assert_eq!(c[0], 2);
        assert_eq!(f32::from_bits(c[1]), 12.0);
        let weights = gauss_weights(1.0);
        for (i, w) in weights.iter().enumerate() {
            assert_eq!(f32::from_bits(c[2 + i]), *w);
        }
        assert!(c[2 + weights.len()..].iter().all(|v| *v == 0));
    }

    #[test]
    fn negative_sigma_is_rejected() {
        let settings = BlurSettings {
            spatial_sigma: -1.0,
            ..BlurSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(BlurSettings::default().validate().is_ok());
    }
}
