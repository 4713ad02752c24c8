// crates/engine_core/src/shader.rs
//! Shader sources and the compiler seam.

use std::sync::Arc;

use tracing::debug;

use crate::error::ShaderError;
use crate::gpu::{ShaderBlob, ShaderStage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderDefinition {
    pub file: String,
    pub entry_point: String,
    pub stage: ShaderStage,
    pub defines: Vec<(String, String)>,
}

impl ShaderDefinition {
    pub fn new(file: &str, entry_point: &str, stage: ShaderStage) -> Self {
        Self {
            file: file.to_string(),
            entry_point: entry_point.to_string(),
            stage,
            defines: Vec::new(),
        }
    }

    pub fn define(mut self, name: &str, value: &str) -> Self {
        self.defines.push((name.to_string(), value.to_string()));
        self
    }
}

pub trait ShaderCompiler {
    fn compile(&self, def: &ShaderDefinition) -> Result<ShaderBlob, ShaderError>;
}

const SOURCES: &[(&str, &str)] = &[
    ("Common.hlsl", include_str!("../../../assets/shaders/Common.hlsl")),
    ("Default.hlsl", include_str!("../../../assets/shaders/Default.hlsl")),
    ("TreeSprite.hlsl", include_str!("../../../assets/shaders/TreeSprite.hlsl")),
    ("Icosahedron.hlsl", include_str!("../../../assets/shaders/Icosahedron.hlsl")),
    ("Tessellation.hlsl", include_str!("../../../assets/shaders/Tessellation.hlsl")),
    ("WaveSim.hlsl", include_str!("../../../assets/shaders/WaveSim.hlsl")),
    ("Blur.hlsl", include_str!("../../../assets/shaders/Blur.hlsl")),
];

/// Serves the HLSL sources embedded at build time. The "bytecode" is the
/// preprocessed source prefixed with the requested defines, which is all a
/// host-side device needs to dispatch by entry point.
#[derive(Copy, Clone, Debug, Default)]
pub struct BuiltinShaderCompiler;

impl BuiltinShaderCompiler {
    pub fn source(file: &str) -> Option<&'static str> {
        SOURCES.iter().find(|(name, _)| *name == file).map(|(_, src)| *src)
    }
}

impl ShaderCompiler for BuiltinShaderCompiler {
    fn compile(&self, def: &ShaderDefinition) -> Result<ShaderBlob, ShaderError> {
        let source = Self::source(&def.file).ok_or_else(|| ShaderError::UnknownFile(def.file.clone()))?;
        if !declares_entry_point(source, &def.entry_point) {
            return Err(ShaderError::EntryPointMissing {
                file: def.file.clone(),
                entry: def.entry_point.clone(),
            });
        }

        let mut text = String::with_capacity(source.len() + 128);
        for (name, value) in &def.defines {
            text.push_str(&format!("#define {name} {value}\n"));
        }
        text.push_str(&format!(
            "// entry {} profile {}\n",
            def.entry_point,
            def.stage.target_profile()
        ));
        text.push_str(source);

        debug!(target: "renderer", file = %def.file, entry = %def.entry_point, "shader compiled");
        Ok(ShaderBlob {
            stage: def.stage,
            file: def.file.clone(),
            entry_point: def.entry_point.clone(),
            bytecode: Arc::from(text.into_bytes()),
        })
    }
}

/// True when `entry` appears as a whole identifier directly followed by `(`.
fn declares_entry_point(source: &str, entry: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    source.match_indices(entry).any(|(at, _)| {
        let before_ok = source[..at].chars().next_back().map_or(true, |c| !is_ident(c));
        let after = source[at + entry.len()..].trim_start();
        before_ok && after.starts_with('(')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_whole_word_entry_points() {
        let src = "float4 PS(VertexOut pin) : SV_Target {}\nvoid UpdateWavesCS (int3 id : SV_DispatchThreadID) {}";
        assert!(declares_entry_point(src, "PS"));
        assert!(declares_entry_point(src, "UpdateWavesCS"));
        assert!(!declares_entry_point(src, "WavesCS"));
        assert!(!declares_entry_point(src, "VS"));
    }

    #[test]
    fn compiles_every_builtin_entry_point() {
        let compiler = BuiltinShaderCompiler;
        for (file, entry, stage) in [
            ("Default.hlsl", "VS", ShaderStage::Vertex),
            ("Default.hlsl", "PS", ShaderStage::Pixel),
            ("TreeSprite.hlsl", "GS", ShaderStage::Geometry),
            ("Icosahedron.hlsl", "GS", ShaderStage::Geometry),
            ("Tessellation.hlsl", "HS", ShaderStage::Hull),
            ("Tessellation.hlsl", "DS", ShaderStage::Domain),
            ("WaveSim.hlsl", "UpdateWavesCS", ShaderStage::Compute),
            ("WaveSim.hlsl", "DisturbWavesCS", ShaderStage::Compute),
            ("Blur.hlsl", "HorzBlurCS", ShaderStage::Compute),
            ("Blur.hlsl", "VertBlurCS", ShaderStage::Compute),
        ] {
            let blob = compiler.compile(&ShaderDefinition::new(file, entry, stage)).unwrap();
            assert_eq!(blob.entry_point, entry);
        }
    }

    #[test]
    fn defines_are_prepended() {
        let def = ShaderDefinition::new("Default.hlsl", "PS", ShaderStage::Pixel).define("ALPHA_TEST", "1");
        let blob = BuiltinShaderCompiler.compile(&def).unwrap();
        assert!(std::str::from_utf8(&blob.bytecode).unwrap().starts_with("#define ALPHA_TEST 1\n"));
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let def = ShaderDefinition::new("WaveSim.hlsl", "VS", ShaderStage::Vertex);
        assert_eq!(
            BuiltinShaderCompiler.compile(&def),
            Err(ShaderError::EntryPointMissing {
                file: "WaveSim.hlsl".into(),
                entry: "VS".into()
            })
        );
        let def = ShaderDefinition::new("Nope.hlsl", "VS", ShaderStage::Vertex);
        assert!(matches!(BuiltinShaderCompiler.compile(&def), Err(ShaderError::UnknownFile(_))));
    }
}
