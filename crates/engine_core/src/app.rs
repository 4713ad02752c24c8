// crates/engine_core/src/app.rs

use crate::error::EngineError;
use crate::input::InputPoller;
use crate::present::PresentSurface;
use crate::renderer::{FrameTime, Renderer};

/// A scene driven by the [`crate::platform_runner::PlatformRunner`].
///
/// `setup` runs once before [`Renderer::finish_setup`]; `update` runs every
/// frame before [`Renderer::tick`], and is where materials, render items and
/// the pass constants get mutated.
pub trait Application {
    fn title(&self) -> &str;

    fn setup<S: PresentSurface>(&mut self, renderer: &mut Renderer<S>) -> Result<(), EngineError>;

    fn update<S: PresentSurface>(
        &mut self,
        renderer: &mut Renderer<S>,
        time: FrameTime,
        input: &mut InputPoller,
    ) -> Result<(), EngineError>;

    fn on_resize<S: PresentSurface>(&mut self, _renderer: &mut Renderer<S>, _width: u32, _height: u32) {}
}
