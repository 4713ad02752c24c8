// crates/engine_shared/src/vertex.rs
use bytemuck::{Pod, Zeroable};

/// Position / normal / texcoord vertex used by every lit mesh.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub tex_c: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], normal: [f32; 3], tex_c: [f32; 2]) -> Self {
        Self { pos, normal, tex_c }
    }
}

/// Point-list vertex expanded into a billboard by the tree-sprite geometry shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TreeSpriteVertex {
    pub pos: [f32; 3],
    pub size: [f32; 2],
}
