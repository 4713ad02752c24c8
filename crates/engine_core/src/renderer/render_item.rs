// crates/engine_core/src/renderer/render_item.rs

use glam::{Mat4, Vec2};
use serde::{Deserialize, Serialize};

use engine_shared::ObjectConstants;

use super::catalog::{GeometryId, MaterialId, SubmeshGeometry};
use crate::error::CatalogError;
use crate::gpu::PrimitiveTopology;

/// Draw buckets. Declaration order is the draw order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderLayer {
    Opaque,
    Tesselation,
    AlphaTested,
    TreeSprites,
    Icosahedron,
    Transparent,
    Waves,
}

impl RenderLayer {
    pub const ALL: [RenderLayer; 7] = [
        RenderLayer::Opaque,
        RenderLayer::Tesselation,
        RenderLayer::AlphaTested,
        RenderLayer::TreeSprites,
        RenderLayer::Icosahedron,
        RenderLayer::Transparent,
        RenderLayer::Waves,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Layers that are only drawn when enabled in the configuration.
    pub fn is_optional(self) -> bool {
        matches!(self, RenderLayer::TreeSprites | RenderLayer::Icosahedron)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Fixed draw order with the enabled optional layers slotted in.
    pub fn draw_order(enabled_optional: &[RenderLayer]) -> Vec<RenderLayer> {
        Self::ALL
            .into_iter()
            .filter(|l| !l.is_optional() || enabled_optional.contains(l))
            .collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderLayer::Opaque => "Opaque",
            RenderLayer::Tesselation => "Tesselation",
            RenderLayer::AlphaTested => "AlphaTested",
            RenderLayer::TreeSprites => "TreeSprites",
            RenderLayer::Icosahedron => "Icosahedron",
            RenderLayer::Transparent => "Transparent",
            RenderLayer::Waves => "Waves",
        }
    }
}

/// Number of ring frames whose copy of a constant buffer is still stale.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DirtyCounter {
    remaining: u32,
    ring_len: u32,
}

impl DirtyCounter {
    /// Starts fully dirty.
    pub fn new(ring_len: usize) -> Self {
        let ring_len = ring_len as u32;
        Self {
            remaining: ring_len,
            ring_len,
        }
    }

    pub fn mark(&mut self) {
        self.remaining = self.ring_len;
    }

    pub fn is_dirty(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Called once per ring frame after its copy was rewritten.
    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub(crate) fn rebase(&mut self, ring_len: usize) {
        *self = Self::new(ring_len);
    }
}

/// Which part of a geometry an item draws.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderItem {
    world: Mat4,
    tex_transform: Mat4,
    displacement_texel_size: Vec2,
    grid_spatial_step: f32,
    dirty: DirtyCounter,

    obj_cb_index: u32,
    material: MaterialId,
    geometry: GeometryId,
    topology: PrimitiveTopology,
    index_count: u32,
    start_index: u32,
    base_vertex: i32,
}

impl RenderItem {
    pub fn new(obj_cb_index: u32, material: MaterialId, geometry: GeometryId, submesh: SubmeshGeometry) -> Self {
        Self {
            world: Mat4::IDENTITY,
            tex_transform: Mat4::IDENTITY,
            displacement_texel_size: Vec2::ONE,
            grid_spatial_step: 1.0,
            dirty: DirtyCounter::new(1),
            obj_cb_index,
            material,
            geometry,
            topology: PrimitiveTopology::TriangleList,
            index_count: submesh.index_count,
            start_index: submesh.start_index,
            base_vertex: submesh.base_vertex,
        }
    }

    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    pub fn with_tex_transform(mut self, tex_transform: Mat4) -> Self {
        self.tex_transform = tex_transform;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_displacement(mut self, texel_size: Vec2, grid_spatial_step: f32) -> Self {
        self.displacement_texel_size = texel_size;
        self.grid_spatial_step = grid_spatial_step;
        self
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    /// Slot in the per-frame object constant buffer. Changed only through
    /// [`LayerRegistry::set_object_slot`], which keeps slots unique.
    pub fn obj_cb_index(&self) -> u32 {
        self.obj_cb_index
    }

    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn geometry(&self) -> GeometryId {
        self.geometry
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    pub fn base_vertex(&self) -> i32 {
        self.base_vertex
    }

    pub fn tex_transform(&self) -> Mat4 {
        self.tex_transform
    }

    pub fn set_world(&mut self, world: Mat4) {
        self.world = world;
        self.dirty.mark();
    }

    pub fn set_tex_transform(&mut self, tex_transform: Mat4) {
        self.tex_transform = tex_transform;
        self.dirty.mark();
    }

    /// Topology is bound per draw, not stored in the object constants.
    pub fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    pub fn set_displacement(&mut self, texel_size: Vec2, grid_spatial_step: f32) {
        self.displacement_texel_size = texel_size;
        self.grid_spatial_step = grid_spatial_step;
        self.dirty.mark();
    }

    pub fn dirty(&self) -> DirtyCounter {
        self.dirty
    }

    pub(crate) fn dirty_mut(&mut self) -> &mut DirtyCounter {
        &mut self.dirty
    }

    pub fn object_constants(&self) -> ObjectConstants {
        ObjectConstants::new(
            self.world,
            self.tex_transform,
            self.displacement_texel_size,
            self.grid_spatial_step,
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RenderItemHandle {
    pub layer: RenderLayer,
    pub index: usize,
}

/// Render items grouped by layer; each bucket keeps insertion order.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    buckets: [Vec<RenderItem>; RenderLayer::COUNT],
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object-CB slots are shared by every layer, so they must be unique
    /// across the whole registry.
    pub fn add(&mut self, layer: RenderLayer, item: RenderItem) -> Result<RenderItemHandle, CatalogError> {
        if self.iter().any(|(_, existing)| existing.obj_cb_index == item.obj_cb_index) {
            return Err(CatalogError::SlotCollision {
                kind: "object",
                slot: item.obj_cb_index,
            });
        }
        let bucket = &mut self.buckets[layer.index()];
        bucket.push(item);
        Ok(RenderItemHandle {
            layer,
            index: bucket.len() - 1,
        })
    }

    /// Moves an item to another object-CB slot. The item is marked dirty so
    /// every ring frame rewrites the new slot.
    pub fn set_object_slot(&mut self, handle: RenderItemHandle, slot: u32) -> Result<(), CatalogError> {
        if self.get(handle).is_none() {
            return Err(CatalogError::Unknown {
                kind: "render item",
                name: format!("{:?}#{}", handle.layer, handle.index),
            });
        }
        let taken = self.iter_handles().any(|(other, item)| other != handle && item.obj_cb_index == slot);
        if taken {
            return Err(CatalogError::SlotCollision { kind: "object", slot });
        }
        if let Some(item) = self.get_mut(handle) {
            item.obj_cb_index = slot;
            item.dirty.mark();
        }
        Ok(())
    }

    fn iter_handles(&self) -> impl Iterator<Item = (RenderItemHandle, &RenderItem)> + '_ {
        RenderLayer::ALL.into_iter().flat_map(move |layer| {
            self.buckets[layer.index()]
                .iter()
                .enumerate()
                .map(move |(index, item)| (RenderItemHandle { layer, index }, item))
        })
    }

    pub fn layer(&self, layer: RenderLayer) -> &[RenderItem] {
        &self.buckets[layer.index()]
    }

    pub fn get(&self, handle: RenderItemHandle) -> Option<&RenderItem> {
        self.buckets[handle.layer.index()].get(handle.index)
    }

    pub fn get_mut(&mut self, handle: RenderItemHandle) -> Option<&mut RenderItem> {
        self.buckets[handle.layer.index()].get_mut(handle.index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RenderLayer, &RenderItem)> + '_ {
        RenderLayer::ALL
            .into_iter()
            .flat_map(move |layer| self.buckets[layer.index()].iter().map(move |item| (layer, item)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RenderItem> + '_ {
        self.buckets.iter_mut().flat_map(|b| b.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the highest object-CB slot in use.
    pub fn object_slot_count(&self) -> u32 {
        self.iter().map(|(_, item)| item.obj_cb_index + 1).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(slot: u32) -> RenderItem {
        RenderItem::new(
            slot,
            MaterialId(0),
            GeometryId(0),
            SubmeshGeometry {
                index_count: 6,
                start_index: 0,
                base_vertex: 0,
            },
        )
    }

    #[test]
    fn draw_order_slots_optional_layers_before_transparent() {
        assert_eq!(
            RenderLayer::draw_order(&[]),
            vec![
                RenderLayer::Opaque,
                RenderLayer::Tesselation,
                RenderLayer::AlphaTested,
                RenderLayer::Transparent,
                RenderLayer::Waves
            ]
        );
        let with_sprites = RenderLayer::draw_order(&[RenderLayer::TreeSprites]);
        assert_eq!(with_sprites[3], RenderLayer::TreeSprites);
        assert_eq!(with_sprites[4], RenderLayer::Transparent);
    }

    #[test]
    fn dirty_counter_counts_down_to_zero() {
        let mut d = DirtyCounter::new(3);
        for expected in [3, 2, 1] {
            assert_eq!(d.remaining(), expected);
            d.consume();
        }
        assert!(!d.is_dirty());
        d.consume();
        assert_eq!(d.remaining(), 0);
        d.mark();
        assert_eq!(d.remaining(), 3);
    }

    #[test]
    fn setters_mark_dirty() {
        let mut it = item(0);
        it.dirty_mut().rebase(3);
        while it.dirty().is_dirty() {
            it.dirty_mut().consume();
        }
        it.set_world(Mat4::from_translation(glam::Vec3::X));
        assert_eq!(it.dirty().remaining(), 3);
    }

    #[test]
    fn object_slots_are_unique_across_layers() {
        let mut reg = LayerRegistry::new();
        reg.add(RenderLayer::Opaque, item(0)).unwrap();
        reg.add(RenderLayer::Waves, item(1)).unwrap();
        let err = reg.add(RenderLayer::Transparent, item(0)).unwrap_err();
        assert_eq!(err, CatalogError::SlotCollision { kind: "object", slot: 0 });
        assert_eq!(reg.object_slot_count(), 2);
    }

    #[test]
    fn iteration_follows_layer_then_insertion_order() {
        let mut reg = LayerRegistry::new();
        reg.add(RenderLayer::Waves, item(5)).unwrap();
        reg.add(RenderLayer::Opaque, item(2)).unwrap();
        reg.add(RenderLayer::Opaque, item(1)).unwrap();
        let slots: Vec<u32> = reg.iter().map(|(_, i)| i.obj_cb_index()).collect();
        assert_eq!(slots, vec![2, 1, 5]);
    }

    #[test]
    fn moving_an_object_slot_checks_collisions_and_marks_dirty() {
        let mut reg = LayerRegistry::new();
        let a = reg.add(RenderLayer::Opaque, item(0)).unwrap();
        reg.add(RenderLayer::Opaque, item(1)).unwrap();

        assert_eq!(
            reg.set_object_slot(a, 1).unwrap_err(),
            CatalogError::SlotCollision { kind: "object", slot: 1 }
        );
        assert_eq!(reg.get(a).unwrap().obj_cb_index(), 0);

        let it = reg.get_mut(a).unwrap();
        it.dirty_mut().rebase(2);
        it.dirty_mut().consume();
        it.dirty_mut().consume();
        assert!(!reg.get(a).unwrap().dirty().is_dirty());

        // Re-assigning its own slot is not a collision.
        reg.set_object_slot(a, 0).unwrap();
        reg.set_object_slot(a, 4).unwrap();
        assert_eq!(reg.get(a).unwrap().obj_cb_index(), 4);
        assert_eq!(reg.get(a).unwrap().dirty().remaining(), 2);
        assert_eq!(reg.object_slot_count(), 5);

        let missing = RenderItemHandle {
            layer: RenderLayer::Waves,
            index: 0,
        };
        assert!(matches!(reg.set_object_slot(missing, 9), Err(CatalogError::Unknown { .. })));
    }
}
