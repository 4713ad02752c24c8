// crates/engine_core/src/gpu/pipeline.rs

use std::sync::Arc;

use super::resource::Format;
use crate::error::ShaderError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RootSignatureId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

// --- ROOT SIGNATURES ---

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangeKind {
    Srv,
    Uav,
    Cbv,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RootParameter {
    /// Single-range descriptor table.
    Table { range: RangeKind, register: u32 },
    Cbv { register: u32 },
    Constants { count: u32, register: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RootSignatureDesc {
    pub label: String,
    pub parameters: Vec<RootParameter>,
    pub static_samplers: u32,
}

impl RootSignatureDesc {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            parameters: Vec::new(),
            static_samplers: 0,
        }
    }

    pub fn param(mut self, parameter: RootParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn samplers(mut self, count: u32) -> Self {
        self.static_samplers = count;
        self
    }
}

// --- SHADERS ---

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl ShaderStage {
    pub fn target_profile(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_5_1",
            ShaderStage::Pixel => "ps_5_1",
            ShaderStage::Geometry => "gs_5_1",
            ShaderStage::Hull => "hs_5_1",
            ShaderStage::Domain => "ds_5_1",
            ShaderStage::Compute => "cs_5_1",
        }
    }
}

impl std::str::FromStr for ShaderStage {
    type Err = ShaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VS" | "VERTEX" => Ok(ShaderStage::Vertex),
            "PS" | "PIXEL" => Ok(ShaderStage::Pixel),
            "GS" | "GEOMETRY" => Ok(ShaderStage::Geometry),
            "HS" | "HULL" => Ok(ShaderStage::Hull),
            "DS" | "DOMAIN" => Ok(ShaderStage::Domain),
            "CS" | "COMPUTE" => Ok(ShaderStage::Compute),
            _ => Err(ShaderError::UnknownStage(s.to_string())),
        }
    }
}

/// Compiled shader handed out by a [`crate::shader::ShaderCompiler`].
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderBlob {
    pub stage: ShaderStage,
    pub file: String,
    pub entry_point: String,
    pub bytecode: Arc<[u8]>,
}

// --- PIPELINE STATE ---

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InputElement {
    pub semantic: &'static str,
    pub format: VertexFormat,
    pub offset: u32,
}

pub const STANDARD_INPUT_LAYOUT: &[InputElement] = &[
    InputElement { semantic: "POSITION", format: VertexFormat::Float3, offset: 0 },
    InputElement { semantic: "NORMAL", format: VertexFormat::Float3, offset: 12 },
    InputElement { semantic: "TEXCOORD", format: VertexFormat::Float2, offset: 24 },
];

pub const TREE_SPRITE_INPUT_LAYOUT: &[InputElement] = &[
    InputElement { semantic: "POSITION", format: VertexFormat::Float3, offset: 0 },
    InputElement { semantic: "SIZE", format: VertexFormat::Float2, offset: 12 },
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlendMode {
    Opaque,
    /// Alpha clip in the pixel shader plus alpha-to-coverage.
    AlphaToCoverage,
    /// src-alpha / inv-src-alpha.
    Transparent,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CullMode {
    None,
    Back,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TopologyType {
    Point,
    Line,
    Triangle,
    Patch,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsState {
    pub vs: ShaderBlob,
    pub ps: Option<ShaderBlob>,
    pub gs: Option<ShaderBlob>,
    pub hs: Option<ShaderBlob>,
    pub ds: Option<ShaderBlob>,
    pub input_layout: Vec<InputElement>,
    pub blend: BlendMode,
    pub fill: FillMode,
    pub cull: CullMode,
    pub topology: TopologyType,
    pub rtv_format: Format,
    pub dsv_format: Format,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineKind {
    Graphics(Box<GraphicsState>),
    Compute { cs: ShaderBlob },
}

/// Pipeline description with builder-style overrides.
///
/// Derived pipelines start from a base description via [`PipelineDesc::derive`]
/// and change only what differs; nothing else is repeated.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub label: String,
    pub root_signature: RootSignatureId,
    pub kind: PipelineKind,
}

impl PipelineDesc {
    pub fn graphics(label: impl Into<String>, root_signature: RootSignatureId, vs: ShaderBlob, ps: ShaderBlob) -> Self {
        Self {
            label: label.into(),
            root_signature,
            kind: PipelineKind::Graphics(Box::new(GraphicsState {
                vs,
                ps: Some(ps),
                gs: None,
                hs: None,
                ds: None,
                input_layout: STANDARD_INPUT_LAYOUT.to_vec(),
                blend: BlendMode::Opaque,
                fill: FillMode::Solid,
                cull: CullMode::Back,
                topology: TopologyType::Triangle,
                rtv_format: Format::R8G8B8A8Unorm,
                dsv_format: Format::D24UnormS8Uint,
            })),
        }
    }

    pub fn compute(label: impl Into<String>, root_signature: RootSignatureId, cs: ShaderBlob) -> Self {
        Self {
            label: label.into(),
            root_signature,
            kind: PipelineKind::Compute { cs },
        }
    }

    pub fn derive(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self.clone()
        }
    }

    fn graphics_mut(&mut self) -> Option<&mut GraphicsState> {
        match &mut self.kind {
            PipelineKind::Graphics(state) => Some(&mut **state),
            PipelineKind::Compute { .. } => None,
        }
    }

    pub fn graphics_state(&self) -> Option<&GraphicsState> {
        match &self.kind {
            PipelineKind::Graphics(state) => Some(&**state),
            PipelineKind::Compute { .. } => None,
        }
    }

    pub fn is_compute(&self) -> bool {
        matches!(self.kind, PipelineKind::Compute { .. })
    }

    /// Shader bound at `stage`, if any.
    pub fn shader(&self, stage: ShaderStage) -> Option<&ShaderBlob> {
        match (&self.kind, stage) {
            (PipelineKind::Compute { cs }, ShaderStage::Compute) => Some(cs),
            (PipelineKind::Compute { .. }, _) => None,
            (PipelineKind::Graphics(g), ShaderStage::Vertex) => Some(&g.vs),
            (PipelineKind::Graphics(g), ShaderStage::Pixel) => g.ps.as_ref(),
            (PipelineKind::Graphics(g), ShaderStage::Geometry) => g.gs.as_ref(),
            (PipelineKind::Graphics(g), ShaderStage::Hull) => g.hs.as_ref(),
            (PipelineKind::Graphics(g), ShaderStage::Domain) => g.ds.as_ref(),
            (PipelineKind::Graphics(_), ShaderStage::Compute) => None,
        }
    }

    pub fn vertex_shader(mut self, vs: ShaderBlob) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.vs = vs;
        }
        self
    }

    pub fn pixel_shader(mut self, ps: ShaderBlob) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.ps = Some(ps);
        }
        self
    }

    pub fn geometry_shader(mut self, gs: ShaderBlob) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.gs = Some(gs);
        }
        self
    }

    pub fn tessellation(mut self, hs: ShaderBlob, ds: ShaderBlob) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.hs = Some(hs);
            g.ds = Some(ds);
        }
        self
    }

    pub fn input_layout(mut self, layout: &[InputElement]) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.input_layout = layout.to_vec();
        }
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.blend = blend;
        }
        self
    }

    pub fn fill(mut self, fill: FillMode) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.fill = fill;
        }
        self
    }

    pub fn cull(mut self, cull: CullMode) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.cull = cull;
        }
        self
    }

    pub fn topology(mut self, topology: TopologyType) -> Self {
        if let Some(g) = self.graphics_mut() {
            g.topology = topology;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(stage: ShaderStage, entry: &str) -> ShaderBlob {
        ShaderBlob {
            stage,
            file: "Default.hlsl".into(),
            entry_point: entry.into(),
            bytecode: Arc::from(&b""[..]),
        }
    }

    #[test]
    fn derived_pipeline_only_changes_overrides() {
        let base = PipelineDesc::graphics(
            "Opaque",
            RootSignatureId(1),
            blob(ShaderStage::Vertex, "VS"),
            blob(ShaderStage::Pixel, "PS"),
        );
        let transparent = base.derive("Transparent").blend(BlendMode::Transparent);

        let a = base.graphics_state().unwrap();
        let b = transparent.graphics_state().unwrap();
        assert_eq!(b.blend, BlendMode::Transparent);
        assert_eq!(a.blend, BlendMode::Opaque);
        assert_eq!(a.vs, b.vs);
        assert_eq!(a.cull, b.cull);
        assert_eq!(transparent.root_signature, base.root_signature);
    }

    #[test]
    fn compute_ignores_graphics_overrides() {
        let cs = PipelineDesc::compute("WavesUpdate", RootSignatureId(2), blob(ShaderStage::Compute, "UpdateWavesCS"))
            .blend(BlendMode::Transparent)
            .fill(FillMode::Wireframe);
        assert!(cs.is_compute());
        assert!(cs.graphics_state().is_none());
        assert_eq!(cs.shader(ShaderStage::Compute).unwrap().entry_point, "UpdateWavesCS");
    }

    #[test]
    fn stage_names_parse() {
        assert_eq!("vs".parse::<ShaderStage>().unwrap(), ShaderStage::Vertex);
        assert_eq!("CS".parse::<ShaderStage>().unwrap(), ShaderStage::Compute);
        assert!(matches!("XS".parse::<ShaderStage>(), Err(ShaderError::UnknownStage(_))));
    }
}
