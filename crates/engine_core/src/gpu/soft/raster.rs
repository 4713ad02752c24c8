// crates/engine_core/src/gpu/soft/raster.rs
//! Host rasterizer behind `DrawIndexed`.
//!
//! The built-in shader programs run on the CPU. The vertex side covers the
//! displacement map, tree sprite billboards, icosahedron subdivision and the
//! hill tessellator. Triangles are then scan converted with edge functions
//! and perspective-correct attributes, depth tested LESS against the f32
//! depth buffer and blended per the pipeline.
//!
//! Textures are point sampled. Triangles reaching behind the near plane are
//! dropped rather than clipped.

use bytemuck::Pod;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};
use tracing::trace;

use engine_shared::{MaterialConstants, ObjectConstants, PassConstants};

use crate::gpu::pipeline::GraphicsState;
use crate::gpu::{
    BlendMode, CullMode, FillMode, Format, IndexBufferView, IndexFormat, PrimitiveTopology, ResourceId, ShaderBlob,
    VertexBufferView, Viewport,
};

use super::state::SoftState;

/// `NUM_DIR_LIGHTS` in `Common.hlsl`.
const NUM_DIR_LIGHTS: usize = 3;
const ALPHA_CLIP: f32 = 0.1;
const MAX_TESS_FACTOR: f32 = 64.0;
/// Hill patches are fully tessellated closer than this and culled past the far distance.
const TESS_NEAR: f32 = 20.0;
const TESS_FAR: f32 = 100.0;
const MIN_CLIP_W: f32 = 1e-5;
const MAX_LINE_STEPS: u32 = 8192;

/// Constant buffer registers of the default root signature.
const OBJECT_CB: usize = 0;
const PASS_CB: usize = 1;
const MATERIAL_CB: usize = 2;
/// Shader resource registers of the default root signature.
const DIFFUSE_SRV: usize = 0;
const DISPLACEMENT_SRV: usize = 1;

/// Everything a validated draw resolved from the command list bindings.
pub(super) struct DrawCall {
    pub graphics: GraphicsState,
    /// (buffer, byte offset) per `b` register.
    pub constants: [Option<(ResourceId, u64)>; 3],
    /// Texture per `t` register.
    pub textures: [Option<ResourceId>; 2],
    pub target: ResourceId,
    pub depth: Option<ResourceId>,
    pub viewport: Viewport,
    pub vertices: VertexBufferView,
    pub indices: IndexBufferView,
    pub topology: PrimitiveTopology,
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
}

/// Shades `call` into its render target and depth buffer.
pub(super) fn draw(state: &mut SoftState, call: &DrawCall) -> Result<(), String> {
    let target = state.resource(call.target).ok_or("draw into a released render target")?;
    if target.desc.format != Format::R8G8B8A8Unorm {
        trace!(target: "gpu", format = ?target.desc.format, "render target format not rasterized");
        return Ok(());
    }
    let (width, height) = (target.desc.width as u32, target.desc.height);
    let depth_size = call
        .depth
        .and_then(|id| state.resource(id))
        .map(|d| (d.desc.width as u32, d.desc.height));

    // Targets leave the state while the shaders read through it.
    let mut color = std::mem::take(&mut state.resource_mut(call.target).ok_or("released render target")?.data);
    let mut depth = call
        .depth
        .and_then(|id| state.resource_mut(id))
        .map(|d| std::mem::take(&mut d.data));

    let outcome = {
        let mut surface = Surface {
            width,
            height,
            color: &mut color,
            depth: depth
                .as_deref_mut()
                .zip(depth_size)
                .map(|(data, (width, height))| DepthBuffer { width, height, data }),
        };
        rasterize(state, call, &mut surface)
    };

    if let Some(res) = state.resource_mut(call.target) {
        res.data = color;
    }
    if let (Some(id), Some(data)) = (call.depth, depth) {
        if let Some(res) = state.resource_mut(id) {
            res.data = data;
        }
    }
    let (triangles, pixels) = outcome?;
    trace!(target: "gpu", triangles, pixels, "draw rasterized");
    Ok(())
}

fn rasterize(state: &SoftState, call: &DrawCall, surface: &mut Surface<'_>) -> Result<(usize, u64), String> {
    let shader = Shader::new(state, call)?;
    let triangles = shader.assemble(state, call)?;
    let mut raster = Rasterizer {
        viewport: call.viewport,
        cull: call.graphics.cull,
        blend: call.graphics.blend,
        wireframe: call.graphics.fill == FillMode::Wireframe,
        pixels: 0,
    };
    for tri in &triangles {
        raster.triangle(&shader, tri, surface);
    }
    Ok((triangles.len(), raster.pixels))
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Program {
    Lit { displacement: bool, alpha_test: bool, fog: bool },
    TreeSprites { fog: bool },
    Icosahedron { fog: bool },
    Hills,
}

impl Program {
    fn of(graphics: &GraphicsState) -> Self {
        let ps_defines = |name: &str| graphics.ps.as_ref().is_some_and(|ps| has_define(ps, name));
        let fog = ps_defines("FOG");
        match graphics.vs.file.as_str() {
            "TreeSprite.hlsl" => Program::TreeSprites { fog },
            "Icosahedron.hlsl" => Program::Icosahedron { fog },
            "Tessellation.hlsl" => Program::Hills,
            _ => Program::Lit {
                displacement: has_define(&graphics.vs, "DISPLACEMENT_MAP"),
                alpha_test: ps_defines("ALPHA_TEST"),
                fog,
            },
        }
    }
}

fn has_define(blob: &ShaderBlob, name: &str) -> bool {
    std::str::from_utf8(&blob.bytecode).is_ok_and(|text| {
        text.lines()
            .filter_map(|line| line.trim_start().strip_prefix("#define "))
            .any(|rest| rest.split_whitespace().next() == Some(name))
    })
}

/// Per-vertex outputs, interpolated across each triangle.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Varying {
    clip: Vec4,
    pos_w: Vec3,
    normal_w: Vec3,
    uv: Vec2,
}

impl Varying {
    fn weighted(tri: &[Varying; 3], w: [f32; 3]) -> Self {
        Self {
            clip: tri[0].clip * w[0] + tri[1].clip * w[1] + tri[2].clip * w[2],
            pos_w: tri[0].pos_w * w[0] + tri[1].pos_w * w[1] + tri[2].pos_w * w[2],
            normal_w: tri[0].normal_w * w[0] + tri[1].normal_w * w[1] + tri[2].normal_w * w[2],
            uv: tri[0].uv * w[0] + tri[1].uv * w[1] + tri[2].uv * w[2],
        }
    }

    fn lerp(&self, other: &Varying, t: f32) -> Self {
        Self {
            clip: self.clip.lerp(other.clip, t),
            pos_w: self.pos_w.lerp(other.pos_w, t),
            normal_w: self.normal_w.lerp(other.normal_w, t),
            uv: self.uv.lerp(other.uv, t),
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct LocalVertex {
    pos: Vec3,
    normal: Vec3,
    uv: Vec2,
}

/// A point-sampled view of a texture's texels.
struct Texture<'a> {
    width: u32,
    height: u32,
    format: Format,
    data: &'a [u8],
}

impl<'a> Texture<'a> {
    fn bind(state: &'a SoftState, id: Option<ResourceId>) -> Option<Self> {
        let res = state.resource(id?)?;
        Some(Self {
            width: (res.desc.width as u32).max(1),
            height: res.desc.height.max(1),
            format: res.desc.format,
            data: &res.data,
        })
    }

    fn texel(&self, x: u32, y: u32) -> Vec4 {
        let at = (y as usize * self.width as usize + x as usize) * 4;
        let Some(b) = self.data.get(at..at + 4) else {
            return Vec4::ONE;
        };
        match self.format {
            Format::R8G8B8A8Unorm => Vec4::new(b[0] as f32, b[1] as f32, b[2] as f32, b[3] as f32) / 255.0,
            Format::R32Float => Vec4::new(f32::from_le_bytes([b[0], b[1], b[2], b[3]]), 0.0, 0.0, 1.0),
            Format::D24UnormS8Uint | Format::Unknown => Vec4::ONE,
        }
    }

    fn sample_wrap(&self, uv: Vec2) -> Vec4 {
        let wrap = |t: f32, size: u32| (((t - t.floor()) * size as f32) as u32).min(size - 1);
        self.texel(wrap(uv.x, self.width), wrap(uv.y, self.height))
    }

    fn sample_clamp(&self, uv: Vec2) -> Vec4 {
        let clamp = |t: f32, size: u32| ((t.clamp(0.0, 1.0) * size as f32) as u32).min(size - 1);
        self.texel(clamp(uv.x, self.width), clamp(uv.y, self.height))
    }
}

fn read_constants<T: Pod>(state: &SoftState, at: Option<(ResourceId, u64)>, name: &str) -> Result<T, String> {
    let (id, offset) = at.ok_or_else(|| format!("draw without {name} constants"))?;
    let res = state.resource(id).ok_or_else(|| format!("{name} constants in a released buffer"))?;
    let start = offset as usize;
    let bytes = res
        .data
        .get(start..start + std::mem::size_of::<T>())
        .ok_or_else(|| format!("{name} constants read past the end of '{}'", res.label))?;
    Ok(bytemuck::pod_read_unaligned(bytes))
}

fn read_indices(state: &SoftState, call: &DrawCall) -> Result<Vec<u32>, String> {
    let (id, offset) = state.resolve_address(call.indices.address)?;
    let res = state.resource(id).ok_or("released index buffer")?;
    let size = call.indices.format.byte_size() as usize;
    let start = offset as usize + call.start_index as usize * size;
    let bytes = res
        .data
        .get(start..start + call.index_count as usize * size)
        .ok_or_else(|| format!("indices read past the end of '{}'", res.label))?;
    Ok(match call.indices.format {
        IndexFormat::U16 => bytes
            .chunks_exact(2)
            .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
            .collect(),
        IndexFormat::U32 => bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    })
}

struct VertexReader<'a> {
    bytes: &'a [u8],
    stride: usize,
    base_vertex: i64,
}

impl<'a> VertexReader<'a> {
    fn new(state: &'a SoftState, call: &DrawCall) -> Result<Self, String> {
        let (id, offset) = state.resolve_address(call.vertices.address)?;
        let res = state.resource(id).ok_or("released vertex buffer")?;
        let start = offset as usize;
        let end = (start + call.vertices.size_in_bytes as usize).min(res.data.len());
        let bytes = res
            .data
            .get(start..end)
            .ok_or_else(|| format!("vertex view starts past the end of '{}'", res.label))?;
        Ok(Self {
            bytes,
            stride: call.vertices.stride as usize,
            base_vertex: i64::from(call.base_vertex),
        })
    }

    fn floats<const N: usize>(&self, index: u32) -> Result<[f32; N], String> {
        let vertex = self.base_vertex + i64::from(index);
        let chunk = usize::try_from(vertex)
            .ok()
            .map(|v| v * self.stride)
            .and_then(|at| self.bytes.get(at..at + 4 * N))
            .ok_or_else(|| format!("vertex {vertex} is outside the vertex buffer"))?;
        let mut out = [0.0; N];
        for (o, b) in out.iter_mut().zip(chunk.chunks_exact(4)) {
            *o = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        }
        Ok(out)
    }

    fn local(&self, index: u32) -> Result<LocalVertex, String> {
        let f = self.floats::<8>(index)?;
        Ok(LocalVertex {
            pos: Vec3::new(f[0], f[1], f[2]),
            normal: Vec3::new(f[3], f[4], f[5]),
            uv: Vec2::new(f[6], f[7]),
        })
    }
}

/// Triangles of a strip, with odd triangles flipped to keep the winding.
fn strip(vertices: &[Varying]) -> impl Iterator<Item = [Varying; 3]> + '_ {
    vertices
        .windows(3)
        .enumerate()
        .map(|(i, w)| if i % 2 == 0 { [w[0], w[1], w[2]] } else { [w[1], w[0], w[2]] })
}

fn midpoint(a: &LocalVertex, b: &LocalVertex) -> LocalVertex {
    let radius = a.pos.length();
    let pos = (0.5 * (a.pos + b.pos)).normalize_or_zero() * radius;
    LocalVertex {
        pos,
        normal: pos.normalize_or_zero(),
        uv: 0.5 * (a.uv + b.uv),
    }
}

struct Shader<'a> {
    program: Program,
    world: Mat4,
    view_proj: Mat4,
    uv_transform: Mat4,
    eye: Vec3,
    object: ObjectConstants,
    pass: PassConstants,
    material: MaterialConstants,
    diffuse_map: Option<Texture<'a>>,
    displacement_map: Option<Texture<'a>>,
}

impl<'a> Shader<'a> {
    fn new(state: &'a SoftState, call: &DrawCall) -> Result<Self, String> {
        let object: ObjectConstants = read_constants(state, call.constants[OBJECT_CB], "object")?;
        let pass: PassConstants = read_constants(state, call.constants[PASS_CB], "pass")?;
        let material: MaterialConstants = read_constants(state, call.constants[MATERIAL_CB], "material")?;
        let tex_transform = Mat4::from_cols_array_2d(&object.tex_transform);
        let mat_transform = Mat4::from_cols_array_2d(&material.mat_transform);
        Ok(Self {
            program: Program::of(&call.graphics),
            world: Mat4::from_cols_array_2d(&object.world),
            view_proj: Mat4::from_cols_array_2d(&pass.view_proj),
            uv_transform: mat_transform * tex_transform,
            eye: Vec3::from(pass.eye_pos_w),
            object,
            pass,
            material,
            diffuse_map: Texture::bind(state, call.textures[DIFFUSE_SRV]),
            displacement_map: Texture::bind(state, call.textures[DISPLACEMENT_SRV]),
        })
    }

    fn project(&self, v: &LocalVertex) -> Varying {
        let pos_w = self.world * v.pos.extend(1.0);
        let uv = self.uv_transform * Vec4::new(v.uv.x, v.uv.y, 0.0, 1.0);
        Varying {
            clip: self.view_proj * pos_w,
            pos_w: pos_w.xyz(),
            normal_w: Mat3::from_mat4(self.world) * v.normal,
            uv: uv.xy(),
        }
    }

    /// Lifts the vertex by the displacement map and rebuilds its normal from
    /// the neighboring heights.
    fn displace(&self, v: &mut LocalVertex) {
        let Some(map) = &self.displacement_map else {
            return;
        };
        v.pos.y += map.sample_wrap(v.uv).x;
        let [du, dv] = self.object.displacement_map_texel_size;
        let l = map.sample_clamp(v.uv - Vec2::new(du, 0.0)).x;
        let r = map.sample_clamp(v.uv + Vec2::new(du, 0.0)).x;
        let t = map.sample_clamp(v.uv - Vec2::new(0.0, dv)).x;
        let b = map.sample_clamp(v.uv + Vec2::new(0.0, dv)).x;
        v.normal = Vec3::new(-r + l, 2.0 * self.object.grid_spatial_step, b - t).normalize_or_zero();
    }

    fn assemble(&self, state: &SoftState, call: &DrawCall) -> Result<Vec<[Varying; 3]>, String> {
        let indices = read_indices(state, call)?;
        let vertices = VertexReader::new(state, call)?;
        let mut out = Vec::new();
        match self.program {
            Program::Lit { displacement, .. } => {
                for tri in indices.chunks_exact(3) {
                    let mut corners = [vertices.local(tri[0])?, vertices.local(tri[1])?, vertices.local(tri[2])?];
                    if displacement {
                        corners.iter_mut().for_each(|v| self.displace(v));
                    }
                    out.push(corners.map(|v| self.project(&v)));
                }
            }
            Program::Icosahedron { .. } => {
                for tri in indices.chunks_exact(3) {
                    let [v0, v1, v2] = [vertices.local(tri[0])?, vertices.local(tri[1])?, vertices.local(tri[2])?];
                    let (m0, m1, m2) = (midpoint(&v0, &v1), midpoint(&v1, &v2), midpoint(&v0, &v2));
                    let first = [v0, m0, m2, m1, v2].map(|v| self.project(&v));
                    out.extend(strip(&first));
                    out.push([m0, v1, m1].map(|v| self.project(&v)));
                }
            }
            Program::TreeSprites { .. } => {
                for &index in &indices {
                    let [x, y, z, w, h] = vertices.floats::<5>(index)?;
                    if let Some(quad) = self.billboard(Vec3::new(x, y, z), Vec2::new(w, h)) {
                        out.extend(strip(&quad));
                    }
                }
            }
            Program::Hills => {
                let points = match call.topology {
                    PrimitiveTopology::PatchList(points) => points,
                    other => return Err(format!("hill patches drawn as {other:?}")),
                };
                if points != 4 {
                    return Err(format!("hill patches need 4 control points, got {points}"));
                }
                for patch in indices.chunks_exact(4) {
                    let mut quad = [Vec3::ZERO; 4];
                    for (corner, &index) in quad.iter_mut().zip(patch) {
                        let [x, y, z] = vertices.floats::<3>(index)?;
                        *corner = Vec3::new(x, y, z);
                    }
                    self.tessellate(&quad, &mut out);
                }
            }
        }
        Ok(out)
    }

    /// Camera-facing quad around `center`, locked to the world up axis.
    fn billboard(&self, center: Vec3, size: Vec2) -> Option<[Varying; 4]> {
        let mut look = self.eye - center;
        look.y = 0.0;
        let look = look.try_normalize()?;
        let right = Vec3::Y.cross(look);
        let (half_w, half_h) = (0.5 * size.x * right, 0.5 * size.y * Vec3::Y);
        let corners = [
            (center + half_w - half_h, Vec2::new(0.0, 1.0)),
            (center + half_w + half_h, Vec2::new(0.0, 0.0)),
            (center - half_w - half_h, Vec2::new(1.0, 1.0)),
            (center - half_w + half_h, Vec2::new(1.0, 0.0)),
        ];
        Some(corners.map(|(pos_w, uv)| Varying {
            clip: self.view_proj * pos_w.extend(1.0),
            pos_w,
            normal_w: look,
            uv,
        }))
    }

    fn tessellate(&self, quad: &[Vec3; 4], out: &mut Vec<[Varying; 3]>) {
        let center = self.world * (0.25 * (quad[0] + quad[1] + quad[2] + quad[3])).extend(1.0);
        let d = center.xyz().distance(self.eye);
        let tess = MAX_TESS_FACTOR * ((TESS_FAR - d) / (TESS_FAR - TESS_NEAR)).clamp(0.0, 1.0);
        if tess <= 0.0 {
            return;
        }
        let n = (tess.ceil() as usize).clamp(1, MAX_TESS_FACTOR as usize);
        let step = 1.0 / n as f32;
        let grid: Vec<Varying> = (0..=n)
            .flat_map(|j| (0..=n).map(move |i| (i, j)))
            .map(|(i, j)| self.hill_point(quad, i as f32 * step, j as f32 * step))
            .collect();
        let row = n + 1;
        for j in 0..n {
            for i in 0..n {
                let a = j * row + i;
                let (b, c, d) = (a + 1, a + row, a + row + 1);
                out.push([grid[a], grid[b], grid[c]]);
                out.push([grid[c], grid[b], grid[d]]);
            }
        }
    }

    fn hill_point(&self, quad: &[Vec3; 4], u: f32, v: f32) -> Varying {
        let mut p = quad[0].lerp(quad[1], u).lerp(quad[2].lerp(quad[3], u), v);
        p.y = 0.3 * (p.z * p.x.sin() + p.x * p.z.cos());
        let pos_w = self.world * p.extend(1.0);
        Varying {
            clip: self.view_proj * pos_w,
            pos_w: pos_w.xyz(),
            normal_w: Vec3::Y,
            uv: Vec2::ZERO,
        }
    }

    fn diffuse(&self, uv: Vec2) -> Vec4 {
        let texel = self.diffuse_map.as_ref().map_or(Vec4::ONE, |t| t.sample_wrap(uv));
        texel * Vec4::from(self.material.diffuse_albedo)
    }

    /// Pixel color, or `None` when the fragment is clipped.
    fn pixel(&self, frag: &Varying) -> Option<Vec4> {
        match self.program {
            Program::Hills => Some(Vec4::ONE),
            Program::Lit { alpha_test, fog, .. } => {
                let diffuse = self.diffuse(frag.uv);
                if alpha_test && diffuse.w < ALPHA_CLIP {
                    return None;
                }
                Some(self.shade(diffuse, frag, fog))
            }
            Program::TreeSprites { fog } => {
                let diffuse = self.diffuse(frag.uv);
                (diffuse.w >= ALPHA_CLIP).then(|| self.shade(diffuse, frag, fog))
            }
            Program::Icosahedron { fog } => Some(self.shade(self.diffuse(frag.uv), frag, fog)),
        }
    }

    /// Ambient plus the directional lights, then optional distance fog.
    fn shade(&self, diffuse: Vec4, frag: &Varying, fog: bool) -> Vec4 {
        let normal = frag.normal_w.normalize_or_zero();
        let to_eye = self.eye - frag.pos_w;
        let dist = to_eye.length();
        let to_eye = if dist > 0.0 { to_eye / dist } else { Vec3::ZERO };

        let fresnel_r0 = Vec3::from(self.material.fresnel_r0);
        let shininess = (1.0 - self.material.roughness) * 256.0;
        let mut lit = Vec4::from(self.pass.ambient_light) * diffuse;
        for light in &self.pass.lights[..NUM_DIR_LIGHTS] {
            let light_vec = -Vec3::from(light.direction);
            let strength = Vec3::from(light.strength) * light_vec.dot(normal).max(0.0);
            lit += blinn_phong(strength, light_vec, normal, to_eye, diffuse.xyz(), fresnel_r0, shininess).extend(0.0);
        }

        if fog {
            let amount = ((dist - self.pass.fog_start) / self.pass.fog_range).clamp(0.0, 1.0);
            if !amount.is_nan() {
                lit = lit.lerp(Vec4::from(self.pass.fog_color), amount);
            }
        }
        lit.w = diffuse.w;
        lit
    }
}

fn blinn_phong(strength: Vec3, light_vec: Vec3, normal: Vec3, to_eye: Vec3, albedo: Vec3, r0: Vec3, m: f32) -> Vec3 {
    let half = (to_eye + light_vec).normalize_or_zero();
    let roughness = (m + 8.0) * half.dot(normal).max(0.0).powf(m) / 8.0;
    let f0 = 1.0 - half.dot(light_vec).clamp(0.0, 1.0);
    let fresnel = r0 + (Vec3::ONE - r0) * f0.powi(5);
    let specular = fresnel * roughness;
    let specular = specular / (specular + Vec3::ONE);
    (albedo + specular) * strength
}

struct DepthBuffer<'a> {
    width: u32,
    height: u32,
    data: &'a mut [u8],
}

struct Surface<'a> {
    width: u32,
    height: u32,
    color: &'a mut [u8],
    depth: Option<DepthBuffer<'a>>,
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

struct Rasterizer {
    viewport: Viewport,
    cull: CullMode,
    blend: BlendMode,
    wireframe: bool,
    pixels: u64,
}

impl Rasterizer {
    /// Screen-space x, y and viewport depth.
    fn to_screen(&self, clip: Vec4) -> Vec3 {
        let ndc = clip.xyz() / clip.w;
        let vp = &self.viewport;
        Vec3::new(
            vp.x + (ndc.x + 1.0) * 0.5 * vp.width,
            vp.y + (1.0 - ndc.y) * 0.5 * vp.height,
            vp.min_depth + ndc.z * (vp.max_depth - vp.min_depth),
        )
    }

    fn triangle(&mut self, shader: &Shader<'_>, tri: &[Varying; 3], surface: &mut Surface<'_>) {
        if tri.iter().any(|v| v.clip.w <= MIN_CLIP_W || v.clip.z < 0.0) {
            return;
        }
        let s = tri.map(|v| self.to_screen(v.clip));
        let (a, b, c) = (s[0].truncate(), s[1].truncate(), s[2].truncate());
        let area = edge(a, b, c);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        // Clockwise on screen is front facing; y grows downward.
        if self.cull == CullMode::Back && area < 0.0 {
            return;
        }
        if self.wireframe {
            for (i, j) in [(0, 1), (1, 2), (2, 0)] {
                self.line(shader, (&tri[i], s[i]), (&tri[j], s[j]), surface);
            }
            return;
        }

        let lo = a.min(b).min(c);
        let hi = a.max(b).max(c);
        let vp_lo = Vec2::new(self.viewport.x, self.viewport.y).max(Vec2::ZERO);
        let vp_hi = Vec2::new(self.viewport.x + self.viewport.width, self.viewport.y + self.viewport.height)
            .min(Vec2::new(surface.width as f32, surface.height as f32));
        let x0 = lo.x.floor().max(vp_lo.x);
        let y0 = lo.y.floor().max(vp_lo.y);
        let x1 = hi.x.ceil().min(vp_hi.x - 1.0);
        let y1 = hi.y.ceil().min(vp_hi.y - 1.0);
        if x0 > x1 || y0 > y1 {
            return;
        }

        let inv_w = tri.map(|v| 1.0 / v.clip.w);
        for y in y0 as u32..=y1 as u32 {
            for x in x0 as u32..=x1 as u32 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w = [edge(b, c, p) / area, edge(c, a, p) / area, edge(a, b, p) / area];
                if w.iter().any(|w| *w < 0.0) {
                    continue;
                }
                let z = w[0] * s[0].z + w[1] * s[1].z + w[2] * s[2].z;
                let pw = [w[0] * inv_w[0], w[1] * inv_w[1], w[2] * inv_w[2]];
                let sum = pw[0] + pw[1] + pw[2];
                let frag = Varying::weighted(tri, pw.map(|v| v / sum));
                self.plot(shader, surface, x, y, z, &frag);
            }
        }
    }

    fn line(&mut self, shader: &Shader<'_>, from: (&Varying, Vec3), to: (&Varying, Vec3), surface: &mut Surface<'_>) {
        let delta = to.1 - from.1;
        let steps = (delta.x.abs().max(delta.y.abs()).ceil() as u32).clamp(1, MAX_LINE_STEPS);
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let p = from.1.lerp(to.1, t);
            if p.x < 0.0 || p.y < 0.0 {
                continue;
            }
            let (x, y) = (p.x as u32, p.y as u32);
            if x >= surface.width || y >= surface.height {
                continue;
            }
            let frag = from.0.lerp(to.0, t);
            self.plot(shader, surface, x, y, p.z, &frag);
        }
    }

    fn plot(&mut self, shader: &Shader<'_>, surface: &mut Surface<'_>, x: u32, y: u32, z: f32, frag: &Varying) {
        if !(0.0..=1.0).contains(&z) {
            return;
        }
        let depth_at = surface
            .depth
            .as_ref()
            .filter(|d| x < d.width && y < d.height)
            .map(|d| (y as usize * d.width as usize + x as usize) * 4);
        if let (Some(at), Some(depth)) = (depth_at, surface.depth.as_ref()) {
            let Some(b) = depth.data.get(at..at + 4) else {
                return;
            };
            if z >= f32::from_le_bytes([b[0], b[1], b[2], b[3]]) {
                return;
            }
        }
        let Some(color) = shader.pixel(frag) else {
            return;
        };

        let at = (y as usize * surface.width as usize + x as usize) * 4;
        let Some(dst) = surface.color.get_mut(at..at + 4) else {
            return;
        };
        let out = match self.blend {
            BlendMode::Transparent => {
                let under = Vec4::new(dst[0] as f32, dst[1] as f32, dst[2] as f32, dst[3] as f32) / 255.0;
                let rgb = color.xyz() * color.w + under.xyz() * (1.0 - color.w);
                rgb.extend(color.w)
            }
            BlendMode::Opaque | BlendMode::AlphaToCoverage => color,
        };
        for (d, c) in dst.iter_mut().zip(out.to_array()) {
            *d = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        if let (Some(at), Some(depth)) = (depth_at, surface.depth.as_mut()) {
            if let Some(b) = depth.data.get_mut(at..at + 4) {
                b.copy_from_slice(&z.to_le_bytes());
            }
        }
        self.pixels += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::gpu::ShaderStage;

    fn blob(file: &str, text: &str) -> ShaderBlob {
        ShaderBlob {
            stage: ShaderStage::Pixel,
            file: file.to_string(),
            entry_point: "PS".to_string(),
            bytecode: Arc::from(text.as_bytes()),
        }
    }

    #[test]
    fn defines_are_read_from_the_preprocessed_prefix() {
        let ps = blob("Default.hlsl", "#define FOG 1\n#define ALPHA_TEST 1\n#ifdef FOG\n");
        assert!(has_define(&ps, "FOG"));
        assert!(has_define(&ps, "ALPHA_TEST"));
        assert!(!has_define(&ps, "DISPLACEMENT_MAP"));
        assert!(!has_define(&blob("Default.hlsl", "#define FOGGY 1\n"), "FOG"));
    }

    #[test]
    fn strips_flip_every_other_triangle() {
        let v = |x: f32| Varying {
            clip: Vec4::new(x, 0.0, 0.0, 1.0),
            pos_w: Vec3::ZERO,
            normal_w: Vec3::Y,
            uv: Vec2::ZERO,
        };
        let quad = [v(0.0), v(1.0), v(2.0), v(3.0)];
        let tris: Vec<[f32; 3]> = strip(&quad).map(|t| t.map(|v| v.clip.x)).collect();
        assert_eq!(tris, vec![[0.0, 1.0, 2.0], [2.0, 1.0, 3.0]]);
    }

    #[test]
    fn midpoints_stay_on_the_sphere() {
        let a = LocalVertex {
            pos: Vec3::new(2.0, 0.0, 0.0),
            normal: Vec3::X,
            uv: Vec2::ZERO,
        };
        let b = LocalVertex {
            pos: Vec3::new(0.0, 2.0, 0.0),
            normal: Vec3::Y,
            uv: Vec2::ONE,
        };
        let m = midpoint(&a, &b);
        assert!((m.pos.length() - 2.0).abs() < 1e-5);
        assert!((m.normal - m.pos / 2.0).length() < 1e-5);
        assert_eq!(m.uv, Vec2::splat(0.5));
    }

    #[test]
    fn specular_fades_without_light() {
        let n = Vec3::Y;
        let lit = blinn_phong(Vec3::ONE, Vec3::Y, n, Vec3::Y, Vec3::splat(0.5), Vec3::splat(0.02), 192.0);
        assert!(lit.x > 0.5);
        let dark = blinn_phong(Vec3::ZERO, Vec3::Y, n, Vec3::Y, Vec3::splat(0.5), Vec3::splat(0.02), 192.0);
        assert_eq!(dark, Vec3::ZERO);
    }

    #[test]
    fn edge_function_sign_follows_screen_winding() {
        // Top-left, top-right, bottom-left reads clockwise with y down.
        let area = edge(Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0));
        assert!(area > 0.0);
    }
}
