// crates/engine_core/src/config.rs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, WaveError};
use crate::renderer::{BlurSettings, RenderLayer};

/// CSS "LightSteelBlue", the clear color of every frame.
pub const LIGHT_STEEL_BLUE: [f32; 4] = [0.690_196_1, 0.768_627_5, 0.870_588_3, 1.0];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub rows: u32,
    pub cols: u32,
    /// Spatial step between grid points.
    pub dx: f32,
    /// Simulation time step in seconds.
    pub dt: f32,
    pub speed: f32,
    pub damping: f32,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            rows: 256,
            cols: 256,
            dx: 0.25,
            dt: 0.03,
            speed: 2.0,
            damping: 0.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Length of the frame-resource ring.
    pub frame_resources: usize,
    pub back_buffer_count: usize,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    /// Watchdog for every host fence wait.
    pub fence_timeout_ms: u64,
    /// Layers drawn between AlphaTested and Transparent.
    pub optional_layers: Vec<RenderLayer>,
    pub texture_dir: PathBuf,
    pub waves: WaveConfig,
    /// Draw into an offscreen target and blur it before presenting.
    pub blur: Option<BlurSettings>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_resources: 3,
            back_buffer_count: 2,
            width: 1280,
            height: 720,
            vsync: true,
            clear_color: LIGHT_STEEL_BLUE,
            fence_timeout_ms: 5000,
            optional_layers: Vec::new(),
            texture_dir: PathBuf::from("assets/textures"),
            waves: WaveConfig::default(),
            blur: None,
        }
    }
}

impl RendererConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` if given; no path means defaults.
    ///
    /// The wave grid is checked when a simulator is created, so a scene
    /// without waves is never rejected over it.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?;
                Self::from_json_str(&text)
            }
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.frame_resources == 0 {
            return Err(EngineError::InvalidConfig("frame_resources must be at least 1".into()));
        }
        if self.back_buffer_count == 0 {
            return Err(EngineError::InvalidConfig("back_buffer_count must be at least 1".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "window size {}x{} is empty",
                self.width, self.height
            )));
        }
        if let Some(layer) = self.optional_layers.iter().find(|l| !l.is_optional()) {
            return Err(EngineError::InvalidConfig(format!("{layer:?} is always drawn and cannot be listed as optional")));
        }
        if let Some(blur) = &self.blur {
            blur.validate()?;
        }
        Ok(())
    }
}

impl WaveConfig {
    pub fn validate(&self) -> Result<(), WaveError> {
        if self.rows == 0 || self.cols == 0 || self.rows % 16 != 0 || self.cols % 16 != 0 {
            return Err(WaveError::GridNotAligned {
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RendererConfig::from_json_str(r#"{ "frame_resources": 1, "waves": { "rows": 128 } }"#).unwrap();
        assert_eq!(config.frame_resources, 1);
        assert_eq!(config.waves.rows, 128);
        assert_eq!(config.waves.cols, 256);
        assert_eq!(config.clear_color, LIGHT_STEEL_BLUE);
        assert_eq!(config.fence_timeout_ms, 5000);
    }

    #[test]
    fn optional_layers_parse() {
        let config = RendererConfig::from_json_str(r#"{ "optional_layers": ["TreeSprites", "Icosahedron"] }"#).unwrap();
        assert_eq!(config.optional_layers, vec![RenderLayer::TreeSprites, RenderLayer::Icosahedron]);
    }

    #[test]
    fn unaligned_wave_grid_parses_but_fails_its_own_check() {
        let config = RendererConfig::from_json_str(r#"{ "waves": { "rows": 100 } }"#).unwrap();
        assert_eq!(
            config.waves.validate().unwrap_err(),
            WaveError::GridNotAligned { rows: 100, cols: 256 }
        );
    }

    #[test]
    fn blur_section_turns_post_processing_on() {
        assert_eq!(RendererConfig::default().blur, None);
        let config = RendererConfig::from_json_str(r#"{ "blur": { "count": 4 } }"#).unwrap();
        let blur = config.blur.unwrap();
        assert_eq!(blur.count, 4);
        assert_eq!(blur.spatial_sigma, BlurSettings::default().spatial_sigma);
        assert!(RendererConfig::from_json_str(r#"{ "blur": { "intensity_sigma": -2.0 } }"#).is_err());
    }

    #[test]
    fn rejects_empty_ring() {
        assert!(RendererConfig::from_json_str(r#"{ "frame_resources": 0 }"#).is_err());
    }
}
