// crates/engine_core/src/gpu/soft/kernels.rs
//! Host implementations of the compute kernels in `WaveSim.hlsl` and
//! `Blur.hlsl`.
//!
//! Wave-grid reads outside the grid return 0 and writes outside it are
//! dropped, matching D3D's out-of-bounds rules for typed UAV/SRV access.
//! The blur clamps its taps to the image edge like the shader's cache fill.

use crate::gpu::{Format, ResourceId};

use super::state::SoftState;

/// Thread-group size declared by `UpdateWavesCS`.
pub(super) const WAVE_GROUP_SIZE: u32 = 16;

/// Threads per group along the blurred axis.
pub(super) const BLUR_GROUP_SIZE: u32 = 256;

/// Largest radius the blur's weight constants can describe.
pub(super) const MAX_BLUR_RADIUS: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub(super) enum KernelArg {
    Missing,
    Constants(Vec<u32>),
    Texture(ResourceId),
    Address,
}

/// Runs `entry` if a host kernel exists for it. Unknown kernels are no-ops.
pub(super) fn dispatch(state: &mut SoftState, entry: &str, args: &[KernelArg], groups: [u32; 3]) -> Result<(), String> {
    match entry {
        "UpdateWavesCS" => update_waves(state, args, groups),
        "DisturbWavesCS" => {
            let threads = groups[0] * groups[1] * groups[2];
            for _ in 0..threads {
                disturb_waves(state, args)?;
            }
            Ok(())
        }
        "HorzBlurCS" => blur(state, args, groups, Axis::Horizontal),
        "VertBlurCS" => blur(state, args, groups, Axis::Vertical),
        other => {
            tracing::trace!(target: "gpu", entry = other, "no host kernel; dispatch skipped");
            Ok(())
        }
    }
}

struct Grid {
    width: i64,
    height: i64,
    texels: Vec<f32>,
}

impl Grid {
    fn load(state: &SoftState, id: ResourceId) -> Result<Self, String> {
        let res = state
            .resource(id)
            .ok_or_else(|| format!("kernel reads released resource {}", state.label(id)))?;
        if res.desc.format != Format::R32Float {
            return Err(format!("kernel expects R32_FLOAT, '{}' is {:?}", res.label, res.desc.format));
        }
        Ok(Self {
            width: res.desc.width as i64,
            height: i64::from(res.desc.height),
            texels: bytemuck::pod_collect_to_vec(&res.data),
        })
    }

    fn store(self, state: &mut SoftState, id: ResourceId) -> Result<(), String> {
        let res = state
            .resource_mut(id)
            .ok_or_else(|| format!("kernel writes released resource {id:?}"))?;
        res.data.copy_from_slice(bytemuck::cast_slice(&self.texels));
        Ok(())
    }

    fn get(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            0.0
        } else {
            self.texels[(y * self.width + x) as usize]
        }
    }

    fn add(&mut self, x: i64, y: i64, value: f32) {
        if x >= 0 && y >= 0 && x < self.width && y < self.height {
            self.texels[(y * self.width + x) as usize] += value;
        }
    }
}

fn constants(args: &[KernelArg], index: usize, needed: usize) -> Result<&[u32], String> {
    match args.get(index) {
        Some(KernelArg::Constants(values)) if values.len() >= needed => Ok(values.as_slice()),
        Some(KernelArg::Constants(values)) => Err(format!(
            "root constants at slot {index} hold {} values, kernel needs {needed}",
            values.len()
        )),
        _ => Err(format!("root slot {index} is not bound to constants")),
    }
}

fn texture(args: &[KernelArg], index: usize) -> Result<ResourceId, String> {
    match args.get(index) {
        Some(KernelArg::Texture(id)) => Ok(*id),
        _ => Err(format!("root slot {index} is not bound to a texture table")),
    }
}

fn update_waves(state: &mut SoftState, args: &[KernelArg], groups: [u32; 3]) -> Result<(), String> {
    let k = constants(args, 0, 3)?;
    let (k0, k1, k2) = (f32::from_bits(k[0]), f32::from_bits(k[1]), f32::from_bits(k[2]));

    let prev = Grid::load(state, texture(args, 1)?)?;
    let curr = Grid::load(state, texture(args, 2)?)?;
    let next_id = texture(args, 3)?;
    let mut next = Grid::load(state, next_id)?;

    let threads_x = i64::from(groups[0] * WAVE_GROUP_SIZE).min(next.width);
    let threads_y = i64::from(groups[1] * WAVE_GROUP_SIZE).min(next.height);
    for y in 0..threads_y {
        for x in 0..threads_x {
            let value = k0 * prev.get(x, y)
                + k1 * curr.get(x, y)
                + k2 * (curr.get(x, y + 1) + curr.get(x, y - 1) + curr.get(x + 1, y) + curr.get(x - 1, y));
            next.texels[(y * next.width + x) as usize] = value;
        }
    }
    next.store(state, next_id)
}

fn disturb_waves(state: &mut SoftState, args: &[KernelArg]) -> Result<(), String> {
    let c = constants(args, 0, 6)?;
    let magnitude = f32::from_bits(c[3]);
    let half = 0.5 * magnitude;
    // Index constants are (column, row).
    let x = i64::from(c[4]);
    let y = i64::from(c[5]);

    let out_id = texture(args, 3)?;
    let mut out = Grid::load(state, out_id)?;
    out.add(x, y, magnitude);
    out.add(x + 1, y, half);
    out.add(x - 1, y, half);
    out.add(x, y + 1, half);
    out.add(x, y - 1, half);
    out.store(state, out_id)
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Axis {
    Horizontal,
    Vertical,
}

/// An R8G8B8A8_UNORM texture unpacked to floats in [0, 1].
struct Image {
    width: i64,
    height: i64,
    texels: Vec<[f32; 4]>,
}

impl Image {
    fn load(state: &SoftState, id: ResourceId) -> Result<Self, String> {
        let res = state
            .resource(id)
            .ok_or_else(|| format!("kernel reads released resource {}", state.label(id)))?;
        if res.desc.format != Format::R8G8B8A8Unorm {
            return Err(format!("blur expects R8G8B8A8_UNORM, '{}' is {:?}", res.label, res.desc.format));
        }
        let texels = res
            .data
            .chunks_exact(4)
            .map(|px| [0, 1, 2, 3].map(|c| f32::from(px[c]) / 255.0))
            .collect();
        Ok(Self {
            width: res.desc.width as i64,
            height: i64::from(res.desc.height),
            texels,
        })
    }

    fn store(self, state: &mut SoftState, id: ResourceId) -> Result<(), String> {
        let res = state
            .resource_mut(id)
            .ok_or_else(|| format!("kernel writes released resource {id:?}"))?;
        for (px, texel) in res.data.chunks_exact_mut(4).zip(&self.texels) {
            for (byte, value) in px.iter_mut().zip(texel) {
                *byte = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        Ok(())
    }

    fn clamped(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width - 1);
        let y = y.clamp(0, self.height - 1);
        self.texels[(y * self.width + x) as usize]
    }
}

/// Edge-stopping factor on the 8-bit color distance. Sigma 0 disables it.
fn range_weight(center: [f32; 4], sample: [f32; 4], intensity_sigma: f32) -> f32 {
    if intensity_sigma <= 0.0 {
        return 1.0;
    }
    let d2: f32 = (0..3).map(|c| ((sample[c] - center[c]) * 255.0).powi(2)).sum();
    (-d2 / (2.0 * intensity_sigma * intensity_sigma)).exp()
}

fn blur(state: &mut SoftState, args: &[KernelArg], groups: [u32; 3], axis: Axis) -> Result<(), String> {
    let c = constants(args, 0, 2 + 2 * MAX_BLUR_RADIUS + 1)?;
    let radius = c[0] as usize;
    if radius > MAX_BLUR_RADIUS {
        return Err(format!("blur radius {radius} exceeds {MAX_BLUR_RADIUS}"));
    }
    let intensity_sigma = f32::from_bits(c[1]);
    let weights: Vec<f32> = c[2..2 + 2 * radius + 1].iter().map(|w| f32::from_bits(*w)).collect();

    let input = Image::load(state, texture(args, 1)?)?;
    let out_id = texture(args, 2)?;
    let mut output = Image::load(state, out_id)?;
    if (input.width, input.height) != (output.width, output.height) {
        return Err(format!(
            "blur input is {}x{}, output is {}x{}",
            input.width, input.height, output.width, output.height
        ));
    }

    let (threads_x, threads_y) = match axis {
        Axis::Horizontal => (groups[0] * BLUR_GROUP_SIZE, groups[1]),
        Axis::Vertical => (groups[0], groups[1] * BLUR_GROUP_SIZE),
    };
    let threads_x = i64::from(threads_x).min(output.width);
    let threads_y = i64::from(threads_y).min(output.height);
    let radius = radius as i64;
    for y in 0..threads_y {
        for x in 0..threads_x {
            let center = input.clamped(x, y);
            let mut sum = [0.0f32; 4];
            let mut total = 0.0f32;
            for (k, w) in (-radius..=radius).zip(&weights) {
                let sample = match axis {
                    Axis::Horizontal => input.clamped(x + k, y),
                    Axis::Vertical => input.clamped(x, y + k),
                };
                let w = w * range_weight(center, sample, intensity_sigma);
                for ch in 0..4 {
                    sum[ch] += w * sample[ch];
                }
                total += w;
            }
            output.texels[(y * output.width + x) as usize] = if total > 0.0 {
                sum.map(|v| v / total)
            } else {
                center
            };
        }
    }
    output.store(state, out_id)
}
