// crates/engine_core/src/renderer/pipeline.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::render_item::RenderLayer;
use crate::error::{CatalogError, EngineError};
use crate::gpu::pipeline::TREE_SPRITE_INPUT_LAYOUT;
use crate::gpu::{
    BlendMode, CullMode, Device, FillMode, PipelineDesc, PipelineId, RangeKind, RootParameter, RootSignatureDesc,
    RootSignatureId, ShaderBlob, ShaderStage, TopologyType,
};
use crate::shader::{ShaderCompiler, ShaderDefinition};

/// Root parameter indices of the default graphics signature.
pub mod slots {
    pub const DIFFUSE_TABLE: u32 = 0;
    pub const OBJECT_CB: u32 = 1;
    pub const PASS_CB: u32 = 2;
    pub const MATERIAL_CB: u32 = 3;
    pub const DISPLACEMENT_TABLE: u32 = 4;
}

/// Root parameter indices of the wave compute signature.
pub mod wave_slots {
    pub const CONSTANTS: u32 = 0;
    pub const PREV_SRV: u32 = 1;
    pub const CURR_UAV: u32 = 2;
    pub const NEXT_UAV: u32 = 3;
}

/// Root parameter indices of the blur compute signature.
pub mod blur_slots {
    pub const CONSTANTS: u32 = 0;
    pub const INPUT_SRV: u32 = 1;
    pub const OUTPUT_UAV: u32 = 2;
}

/// Radius, intensity sigma, then eleven weights.
pub const BLUR_CONSTANT_COUNT: u32 = 13;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PsoRole {
    Opaque,
    AlphaTested,
    Transparent,
    TreeSprites,
    Icosahedron,
    Tesselation,
    WavesRender,
    WavesUpdate,
    WavesDisturb,
    HorzBlur,
    VertBlur,
}

impl PsoRole {
    pub const ALL: [PsoRole; 11] = [
        PsoRole::Opaque,
        PsoRole::AlphaTested,
        PsoRole::Transparent,
        PsoRole::TreeSprites,
        PsoRole::Icosahedron,
        PsoRole::Tesselation,
        PsoRole::WavesRender,
        PsoRole::WavesUpdate,
        PsoRole::WavesDisturb,
        PsoRole::HorzBlur,
        PsoRole::VertBlur,
    ];

    pub fn for_layer(layer: RenderLayer) -> Self {
        match layer {
            RenderLayer::Opaque => PsoRole::Opaque,
            RenderLayer::Tesselation => PsoRole::Tesselation,
            RenderLayer::AlphaTested => PsoRole::AlphaTested,
            RenderLayer::TreeSprites => PsoRole::TreeSprites,
            RenderLayer::Icosahedron => PsoRole::Icosahedron,
            RenderLayer::Transparent => PsoRole::Transparent,
            RenderLayer::Waves => PsoRole::WavesRender,
        }
    }
}

pub fn default_root_signature() -> RootSignatureDesc {
    RootSignatureDesc::new("default root signature")
        .param(RootParameter::Table { range: RangeKind::Srv, register: 0 })
        .param(RootParameter::Cbv { register: 0 })
        .param(RootParameter::Cbv { register: 1 })
        .param(RootParameter::Cbv { register: 2 })
        .param(RootParameter::Table { range: RangeKind::Srv, register: 1 })
        .samplers(6)
}

pub fn wave_root_signature() -> RootSignatureDesc {
    RootSignatureDesc::new("wave root signature")
        .param(RootParameter::Constants { count: 6, register: 0 })
        .param(RootParameter::Table { range: RangeKind::Srv, register: 0 })
        .param(RootParameter::Table { range: RangeKind::Uav, register: 0 })
        .param(RootParameter::Table { range: RangeKind::Uav, register: 1 })
}

pub fn blur_root_signature() -> RootSignatureDesc {
    RootSignatureDesc::new("blur root signature")
        .param(RootParameter::Constants {
            count: BLUR_CONSTANT_COUNT,
            register: 0,
        })
        .param(RootParameter::Table { range: RangeKind::Srv, register: 0 })
        .param(RootParameter::Table { range: RangeKind::Uav, register: 0 })
}

fn compile(
    compiler: &dyn ShaderCompiler,
    file: &str,
    entry: &str,
    stage: ShaderStage,
    defines: &[(&str, &str)],
) -> Result<ShaderBlob, EngineError> {
    let def = defines
        .iter()
        .fold(ShaderDefinition::new(file, entry, stage), |def, (k, v)| def.define(k, v));
    Ok(compiler.compile(&def)?)
}

/// Every PSO the frame loop uses, plus the root signatures.
pub struct PipelineCatalog {
    pub default_signature: RootSignatureId,
    pub wave_signature: RootSignatureId,
    pub blur_signature: RootSignatureId,
    pipelines: HashMap<PsoRole, PipelineId>,
    descs: HashMap<PsoRole, PipelineDesc>,
}

impl PipelineCatalog {
    pub fn build(device: &Arc<dyn Device>, compiler: &dyn ShaderCompiler) -> Result<Self, EngineError> {
        let default_signature = device.create_root_signature(&default_root_signature())?;
        let wave_signature = device.create_root_signature(&wave_root_signature())?;
        let blur_signature = device.create_root_signature(&blur_root_signature())?;

        let fog = [("FOG", "1")];
        let vs = compile(compiler, "Default.hlsl", "VS", ShaderStage::Vertex, &[])?;
        let ps = compile(compiler, "Default.hlsl", "PS", ShaderStage::Pixel, &fog)?;

        let opaque = PipelineDesc::graphics("opaque", default_signature, vs, ps);

        let alpha_tested = opaque
            .derive("alpha tested")
            .pixel_shader(compile(
                compiler,
                "Default.hlsl",
                "PS",
                ShaderStage::Pixel,
                &[("FOG", "1"), ("ALPHA_TEST", "1")],
            )?)
            .cull(CullMode::None);

        let transparent = opaque.derive("transparent").blend(BlendMode::Transparent);

        let waves_render = transparent.derive("waves render").vertex_shader(compile(
            compiler,
            "Default.hlsl",
            "VS",
            ShaderStage::Vertex,
            &[("DISPLACEMENT_MAP", "1")],
        )?);

        let tesselation = opaque
            .derive("tesselation")
            .vertex_shader(compile(compiler, "Tessellation.hlsl", "VS", ShaderStage::Vertex, &[])?)
            .tessellation(
                compile(compiler, "Tessellation.hlsl", "HS", ShaderStage::Hull, &[])?,
                compile(compiler, "Tessellation.hlsl", "DS", ShaderStage::Domain, &[])?,
            )
            .pixel_shader(compile(compiler, "Tessellation.hlsl", "PS", ShaderStage::Pixel, &[])?)
            .fill(FillMode::Wireframe)
            .topology(TopologyType::Patch);

        let tree_sprites = opaque
            .derive("tree sprites")
            .vertex_shader(compile(compiler, "TreeSprite.hlsl", "VS", ShaderStage::Vertex, &[])?)
            .geometry_shader(compile(compiler, "TreeSprite.hlsl", "GS", ShaderStage::Geometry, &[])?)
            .pixel_shader(compile(compiler, "TreeSprite.hlsl", "PS", ShaderStage::Pixel, &fog)?)
            .input_layout(TREE_SPRITE_INPUT_LAYOUT)
            .topology(TopologyType::Point)
            .blend(BlendMode::AlphaToCoverage)
            .cull(CullMode::None);

        let icosahedron = opaque
            .derive("icosahedron")
            .vertex_shader(compile(compiler, "Icosahedron.hlsl", "VS", ShaderStage::Vertex, &[])?)
            .geometry_shader(compile(compiler, "Icosahedron.hlsl", "GS", ShaderStage::Geometry, &[])?)
            .pixel_shader(compile(compiler, "Icosahedron.hlsl", "PS", ShaderStage::Pixel, &fog)?)
            .cull(CullMode::None);

        let waves_update = PipelineDesc::compute(
            "waves update",
            wave_signature,
            compile(compiler, "WaveSim.hlsl", "UpdateWavesCS", ShaderStage::Compute, &[])?,
        );
        let waves_disturb = PipelineDesc::compute(
            "waves disturb",
            wave_signature,
            compile(compiler, "WaveSim.hlsl", "DisturbWavesCS", ShaderStage::Compute, &[])?,
        );
        let horz_blur = PipelineDesc::compute(
            "horizontal blur",
            blur_signature,
            compile(compiler, "Blur.hlsl", "HorzBlurCS", ShaderStage::Compute, &[])?,
        );
        let vert_blur = PipelineDesc::compute(
            "vertical blur",
            blur_signature,
            compile(compiler, "Blur.hlsl", "VertBlurCS", ShaderStage::Compute, &[])?,
        );

        let mut catalog = Self {
            default_signature,
            wave_signature,
            blur_signature,
            pipelines: HashMap::new(),
            descs: HashMap::new(),
        };
        for (role, desc) in [
            (PsoRole::Opaque, opaque),
            (PsoRole::AlphaTested, alpha_tested),
            (PsoRole::Transparent, transparent),
            (PsoRole::WavesRender, waves_render),
            (PsoRole::Tesselation, tesselation),
            (PsoRole::TreeSprites, tree_sprites),
            (PsoRole::Icosahedron, icosahedron),
            (PsoRole::WavesUpdate, waves_update),
            (PsoRole::WavesDisturb, waves_disturb),
            (PsoRole::HorzBlur, horz_blur),
            (PsoRole::VertBlur, vert_blur),
        ] {
            let id = device.create_pipeline_state(&desc)?;
            catalog.pipelines.insert(role, id);
            catalog.descs.insert(role, desc);
        }
        info!(target: "renderer", count = catalog.pipelines.len(), "pipeline states built");
        Ok(catalog)
    }

    pub fn get(&self, role: PsoRole) -> Option<PipelineId> {
        self.pipelines.get(&role).copied()
    }

    pub fn require(&self, role: PsoRole) -> Result<PipelineId, CatalogError> {
        self.get(role).ok_or_else(|| CatalogError::Unknown {
            kind: "pipeline",
            name: format!("{role:?}"),
        })
    }

    pub fn desc(&self, role: PsoRole) -> Option<&PipelineDesc> {
        self.descs.get(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::soft::{SoftDevice, SoftDeviceConfig};
    use crate::shader::BuiltinShaderCompiler;

    fn catalog() -> PipelineCatalog {
        let device: Arc<dyn Device> = Arc::new(SoftDevice::new(SoftDeviceConfig::default()).unwrap());
        PipelineCatalog::build(&device, &BuiltinShaderCompiler).unwrap()
    }

    #[test]
    fn every_role_is_built() {
        let cat = catalog();
        for role in PsoRole::ALL {
            assert!(cat.get(role).is_some(), "{role:?} missing");
        }
    }

    #[test]
    fn derived_pipelines_override_only_what_differs() {
        let cat = catalog();
        let opaque = cat.desc(PsoRole::Opaque).unwrap().graphics_state().unwrap().clone();
        let transparent = cat.desc(PsoRole::Transparent).unwrap().graphics_state().unwrap().clone();
        assert_eq!(transparent.blend, BlendMode::Transparent);
        assert_eq!(transparent.vs, opaque.vs);
        assert_eq!(transparent.cull, opaque.cull);

        let tess = cat.desc(PsoRole::Tesselation).unwrap().graphics_state().unwrap();
        assert_eq!(tess.fill, FillMode::Wireframe);
        assert_eq!(tess.topology, TopologyType::Patch);
        assert!(tess.hs.is_some() && tess.ds.is_some());

        let sprites = cat.desc(PsoRole::TreeSprites).unwrap().graphics_state().unwrap();
        assert_eq!(sprites.cull, CullMode::None);
        assert_eq!(sprites.topology, TopologyType::Point);
        assert_eq!(sprites.blend, BlendMode::AlphaToCoverage);
    }

    #[test]
    fn compute_pipelines_use_their_own_signatures() {
        let cat = catalog();
        for role in [PsoRole::WavesUpdate, PsoRole::WavesDisturb] {
            let desc = cat.desc(role).unwrap();
            assert!(desc.is_compute());
            assert_eq!(desc.root_signature, cat.wave_signature);
        }
        for role in [PsoRole::HorzBlur, PsoRole::VertBlur] {
            assert_eq!(cat.desc(role).unwrap().root_signature, cat.blur_signature);
        }
        let waves = cat.desc(PsoRole::WavesRender).unwrap().graphics_state().unwrap();
        assert!(std::str::from_utf8(&waves.vs.bytecode).unwrap().contains("#define DISPLACEMENT_MAP"));
    }
}
