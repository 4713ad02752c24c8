// crates/engine_core/src/lib.rs
//! A real-time forward renderer over an explicit, D3D12-style graphics API:
//! a frame-resource ring, layered draws, a GPU ping-pong wave simulation and
//! a software reference device that executes the whole pipeline on the host.

// Graphics API model + software device
pub mod gpu;

// Renderer core
pub mod config;
pub mod error;
pub mod present;
pub mod renderer;

// Collaborators
pub mod geometry;
pub mod shader;
pub mod texture_loader;

// Platform
pub mod app;
pub mod engine_loop;
pub mod input;
pub mod platform_runner;

pub use app::Application;
pub use config::{RendererConfig, WaveConfig};
pub use error::{EngineError, PlatformError};
pub use platform_runner::PlatformRunner;
pub use renderer::{FrameReport, FrameTime, Renderer};
