// crates/engine_shared/src/lib.rs
//! GPU-visible layouts shared between the renderer and the HLSL side.
//!
//! Everything here is `#[repr(C)]` plain data so it can be cast straight into
//! an upload heap with `bytemuck`. Field order follows the `cbuffer`
//! declarations in `assets/shaders/Common.hlsl`.

pub mod constants;
pub mod vertex;

pub use constants::{Light, MaterialConstants, ObjectConstants, PassConstants, MAX_LIGHTS};
pub use vertex::{TreeSpriteVertex, Vertex};
