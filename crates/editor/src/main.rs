// crates/editor/src/main.rs
mod camera;
mod scene;

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use engine_core::renderer::BlurSettings;
use engine_core::{PlatformRunner, RendererConfig};

use crate::scene::{TextureWavesApp, DEMO_LAYERS};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let mut config = RendererConfig::load(config_path.as_deref())
        .with_context(|| format!("loading renderer config {config_path:?}"))?;
    if config_path.is_none() {
        config.optional_layers = DEMO_LAYERS.to_vec();
        config.blur = Some(BlurSettings::default());
    }

    let app = TextureWavesApp::new(config.texture_dir.clone());
    PlatformRunner::new(app, config).start().context("running the texture waves demo")?;
    Ok(())
}
