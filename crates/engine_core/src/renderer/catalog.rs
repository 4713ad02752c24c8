// crates/engine_core/src/renderer/catalog.rs
//! Name-keyed registries for materials, meshes and textures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::Pod;
use glam::{Mat4, Vec3, Vec4};
use tracing::{info, warn};

use engine_shared::MaterialConstants;

use super::render_item::DirtyCounter;
use crate::error::{CatalogError, DeviceError, EngineError, TextureError};
use crate::gpu::{
    create_default_buffer, CommandList, Device, IndexBufferView, IndexFormat, ResourceId, Staging, VertexBufferView,
};
use crate::texture_loader::{upload_rgba, TextureLoader};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MaterialId(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct GeometryId(pub usize);

// ---------------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MaterialParams {
    pub diffuse_albedo: Vec4,
    pub fresnel_r0: Vec3,
    pub roughness: f32,
    pub mat_transform: Mat4,
}

impl MaterialParams {
    pub fn new(diffuse_albedo: Vec4, fresnel_r0: Vec3, roughness: f32) -> Self {
        Self {
            diffuse_albedo,
            fresnel_r0,
            roughness,
            mat_transform: Mat4::IDENTITY,
        }
    }
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self::new(Vec4::ONE, Vec3::splat(0.01), 0.25)
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    name: String,
    cb_index: u32,
    diffuse_srv_index: u32,
    params: MaterialParams,
    dirty: DirtyCounter,
}

impl Material {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cb_index(&self) -> u32 {
        self.cb_index
    }

    pub fn diffuse_srv_index(&self) -> u32 {
        self.diffuse_srv_index
    }

    pub fn params(&self) -> &MaterialParams {
        &self.params
    }

    pub fn set_params(&mut self, params: MaterialParams) {
        self.params = params;
        self.dirty.mark();
    }

    pub fn set_diffuse_albedo(&mut self, albedo: Vec4) {
        self.params.diffuse_albedo = albedo;
        self.dirty.mark();
    }

    pub fn set_roughness(&mut self, roughness: f32) {
        self.params.roughness = roughness;
        self.dirty.mark();
    }

    /// Used to scroll texture coordinates (the animated water).
    pub fn set_mat_transform(&mut self, mat_transform: Mat4) {
        self.params.mat_transform = mat_transform;
        self.dirty.mark();
    }

    pub fn dirty(&self) -> DirtyCounter {
        self.dirty
    }

    pub(crate) fn dirty_mut(&mut self) -> &mut DirtyCounter {
        &mut self.dirty
    }

    pub fn constants(&self) -> MaterialConstants {
        MaterialConstants::new(
            self.params.diffuse_albedo,
            self.params.fresnel_r0,
            self.params.roughness,
            self.params.mat_transform,
        )
    }
}

#[derive(Debug)]
pub struct MaterialCatalog {
    materials: Vec<Material>,
    by_name: HashMap<String, MaterialId>,
    ring_len: usize,
}

impl MaterialCatalog {
    pub fn new(ring_len: usize) -> Self {
        Self {
            materials: Vec::new(),
            by_name: HashMap::new(),
            ring_len,
        }
    }

    /// Names and material-CB slots must both be unique.
    pub fn create(
        &mut self,
        name: &str,
        cb_index: u32,
        diffuse_srv_index: u32,
        params: MaterialParams,
    ) -> Result<MaterialId, CatalogError> {
        if self.by_name.contains_key(name) {
            return Err(CatalogError::Duplicate {
                kind: "material",
                name: name.to_string(),
            });
        }
        if self.materials.iter().any(|m| m.cb_index == cb_index) {
            return Err(CatalogError::SlotCollision {
                kind: "material",
                slot: cb_index,
            });
        }
        let id = MaterialId(self.materials.len());
        self.materials.push(Material {
            name: name.to_string(),
            cb_index,
            diffuse_srv_index,
            params,
            dirty: DirtyCounter::new(self.ring_len),
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn get_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Material> {
        let id = self.find(name)?;
        self.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> + '_ {
        self.materials.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Material> + '_ {
        self.materials.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// One past the highest material-CB slot in use.
    pub fn cb_slot_count(&self) -> u32 {
        self.materials.iter().map(|m| m.cb_index + 1).max().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubmeshGeometry {
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
}

pub enum IndexData<'a> {
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl IndexData<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(i) => bytemuck::cast_slice(i),
            IndexData::U32(i) => bytemuck::cast_slice(i),
        }
    }

    fn format(&self) -> IndexFormat {
        match self {
            IndexData::U16(_) => IndexFormat::U16,
            IndexData::U32(_) => IndexFormat::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(i) => i.len(),
            IndexData::U32(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Vertex and index buffers in the default heap plus named draw ranges.
#[derive(Debug)]
pub struct MeshGeometry {
    pub name: String,
    pub vertex_buffer: ResourceId,
    pub index_buffer: ResourceId,
    pub vertex_buffer_view: VertexBufferView,
    pub index_buffer_view: IndexBufferView,
    submeshes: HashMap<String, SubmeshGeometry>,
}

impl MeshGeometry {
    /// Records the uploads into `list`; the staging buffers must outlive its
    /// execution.
    pub fn upload<V: Pod>(
        device: &Arc<dyn Device>,
        list: &mut CommandList,
        name: &str,
        vertices: &[V],
        indices: IndexData<'_>,
    ) -> Result<(Self, [Staging; 2]), DeviceError> {
        let vb_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let (vertex_buffer, vb_staging) = create_default_buffer(device, list, vb_bytes, &format!("{name} VB"))?;
        let (index_buffer, ib_staging) = create_default_buffer(device, list, indices.bytes(), &format!("{name} IB"))?;

        let vertex_buffer_view = VertexBufferView {
            address: device.gpu_address(vertex_buffer)?,
            size_in_bytes: vb_bytes.len() as u32,
            stride: std::mem::size_of::<V>() as u32,
        };
        let index_buffer_view = IndexBufferView {
            address: device.gpu_address(index_buffer)?,
            size_in_bytes: indices.bytes().len() as u32,
            format: indices.format(),
        };

        let mesh = Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            vertex_buffer_view,
            index_buffer_view,
            submeshes: HashMap::new(),
        };
        Ok((mesh, [vb_staging, ib_staging]))
    }

    pub fn with_submesh(mut self, name: &str, submesh: SubmeshGeometry) -> Self {
        self.submeshes.insert(name.to_string(), submesh);
        self
    }

    /// Index range covering the whole buffer.
    pub fn whole(&self) -> SubmeshGeometry {
        SubmeshGeometry {
            index_count: self.index_buffer_view.size_in_bytes / self.index_buffer_view.format.byte_size(),
            start_index: 0,
            base_vertex: 0,
        }
    }

    pub fn submesh(&self, name: &str) -> Option<SubmeshGeometry> {
        self.submeshes.get(name).copied()
    }
}

#[derive(Debug, Default)]
pub struct GeometryCatalog {
    meshes: Vec<MeshGeometry>,
    by_name: HashMap<String, GeometryId>,
}

impl GeometryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mesh: MeshGeometry) -> Result<GeometryId, CatalogError> {
        if self.by_name.contains_key(&mesh.name) {
            return Err(CatalogError::Duplicate {
                kind: "geometry",
                name: mesh.name,
            });
        }
        let id = GeometryId(self.meshes.len());
        self.by_name.insert(mesh.name.clone(), id);
        self.meshes.push(mesh);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<GeometryId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: GeometryId) -> Option<&MeshGeometry> {
        self.meshes.get(id.0)
    }

    pub fn submesh(&self, geometry: &str, submesh: &str) -> Result<(GeometryId, SubmeshGeometry), CatalogError> {
        let id = self.find(geometry).ok_or_else(|| CatalogError::Unknown {
            kind: "geometry",
            name: geometry.to_string(),
        })?;
        self.meshes[id.0]
            .submesh(submesh)
            .map(|s| (id, s))
            .ok_or_else(|| CatalogError::Unknown {
                kind: "submesh",
                name: format!("{geometry}/{submesh}"),
            })
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Textures
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub name: String,
    pub path: PathBuf,
    pub resource: ResourceId,
    /// Position of the texture's SRV in the shader-visible heap.
    pub heap_index: u32,
    /// Set when the file was missing and the white fallback stands in.
    pub fallback: bool,
}

/// Textures in load order; the order fixes their SRV heap slots.
#[derive(Default)]
pub struct TextureCatalog {
    textures: Vec<Texture>,
    by_name: HashMap<String, usize>,
    fallback: Option<ResourceId>,
    staging: Vec<Staging>,
}

impl TextureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path` under `name`. A missing file is not fatal: the shared
    /// 1x1 white texture takes its place and a warning is logged.
    pub fn load(
        &mut self,
        loader: &dyn TextureLoader,
        device: &Arc<dyn Device>,
        list: &mut CommandList,
        name: &str,
        path: &Path,
    ) -> Result<u32, EngineError> {
        if self.by_name.contains_key(name) {
            return Err(CatalogError::Duplicate {
                kind: "texture",
                name: name.to_string(),
            }
            .into());
        }

        let (resource, fallback) = match loader.load(device, list, path) {
            Ok(loaded) => {
                self.staging.push(loaded.upload);
                (loaded.resource, false)
            }
            Err(TextureError::NotFound(missing)) => {
                warn!(target: "assets", texture = name, path = %missing.display(), "texture missing, using white fallback");
                (self.fallback(device, list)?, true)
            }
            Err(err) => return Err(err.into()),
        };

        let heap_index = self.textures.len() as u32;
        self.textures.push(Texture {
            name: name.to_string(),
            path: path.to_path_buf(),
            resource,
            heap_index,
            fallback,
        });
        self.by_name.insert(name.to_string(), self.textures.len() - 1);
        info!(target: "assets", texture = name, heap_index, fallback, "texture registered");
        Ok(heap_index)
    }

    /// Loads every `*.dds` file of `dir` in file-name order, named by stem.
    pub fn load_directory(
        &mut self,
        loader: &dyn TextureLoader,
        device: &Arc<dyn Device>,
        list: &mut CommandList,
        dir: &Path,
    ) -> Result<Vec<String>, EngineError> {
        let entries = std::fs::read_dir(dir).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => TextureError::NotFound(dir.to_path_buf()),
            _ => TextureError::Io {
                path: dir.to_path_buf(),
                err,
            },
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("dds")))
            .collect();
        paths.sort();

        let mut names = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            self.load(loader, device, list, &stem, &path)?;
            names.push(stem);
        }
        Ok(names)
    }

    /// The 1x1 white texture, created on first use.
    pub fn fallback(&mut self, device: &Arc<dyn Device>, list: &mut CommandList) -> Result<ResourceId, DeviceError> {
        if let Some(id) = self.fallback {
            return Ok(id);
        }
        let loaded = upload_rgba(device, list, 1, 1, &[0xff; 4], "white fallback")?;
        self.staging.push(loaded.upload);
        self.fallback = Some(loaded.resource);
        Ok(loaded.resource)
    }

    pub fn get(&self, name: &str) -> Option<&Texture> {
        self.by_name.get(name).map(|&i| &self.textures[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Texture> + '_ {
        self.textures.iter()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Drops the upload heaps once the setup list has executed.
    pub fn release_staging(&mut self) {
        self.staging.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::soft::{SoftDevice, SoftDeviceConfig};
    use crate::gpu::AllocatorId;
    use crate::texture_loader::{encode_dds_rgba, DdsTextureLoader};

    fn device() -> Arc<dyn Device> {
        Arc::new(SoftDevice::new(SoftDeviceConfig::default()).unwrap())
    }

    #[test]
    fn material_names_and_slots_are_unique() {
        let mut cat = MaterialCatalog::new(3);
        let grass = cat.create("grass", 0, 0, MaterialParams::default()).unwrap();
        assert_eq!(cat.find("grass"), Some(grass));
        assert!(matches!(
            cat.create("grass", 1, 0, MaterialParams::default()),
            Err(CatalogError::Duplicate { .. })
        ));
        assert_eq!(
            cat.create("water", 0, 1, MaterialParams::default()),
            Err(CatalogError::SlotCollision { kind: "material", slot: 0 })
        );
        cat.create("wire", 4, 2, MaterialParams::default()).unwrap();
        assert_eq!(cat.cb_slot_count(), 5);
    }

    #[test]
    fn new_materials_are_dirty_for_every_ring_frame() {
        let mut cat = MaterialCatalog::new(3);
        let id = cat.create("m", 0, 0, MaterialParams::default()).unwrap();
        assert_eq!(cat.get(id).unwrap().dirty().remaining(), 3);
        let m = cat.get_mut(id).unwrap();
        m.dirty_mut().consume();
        m.set_roughness(0.5);
        assert_eq!(m.dirty().remaining(), 3);
        assert_eq!(m.constants().roughness, 0.5);
    }

    #[test]
    fn geometry_lookup_reports_unknown_submesh() {
        let device = device();
        let mut list = CommandList::new(AllocatorId(0));
        let verts = [[0.0f32; 3]; 4];
        let (mesh, _staging) =
            MeshGeometry::upload(&device, &mut list, "quad", &verts, IndexData::U16(&[0, 1, 2, 0, 2, 3])).unwrap();
        let mesh = mesh.with_submesh(
            "quad",
            SubmeshGeometry {
                index_count: 6,
                start_index: 0,
                base_vertex: 0,
            },
        );
        assert_eq!(mesh.whole().index_count, 6);
        assert_eq!(mesh.vertex_buffer_view.stride, 12);

        let mut cat = GeometryCatalog::new();
        cat.add(mesh).unwrap();
        assert!(cat.submesh("quad", "quad").is_ok());
        assert!(matches!(cat.submesh("quad", "box"), Err(CatalogError::Unknown { kind: "submesh", .. })));
        assert!(matches!(cat.submesh("land", "grid"), Err(CatalogError::Unknown { kind: "geometry", .. })));
    }

    #[test]
    fn missing_texture_falls_back_to_white() {
        let device = device();
        let mut list = CommandList::new(AllocatorId(0));
        let mut cat = TextureCatalog::new();
        let dir = std::env::temp_dir().join(format!("engine-core-textures-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let grass = dir.join("grass.dds");
        std::fs::write(&grass, encode_dds_rgba(1, 1, &[0, 255, 0, 255])).unwrap();

        let loader = DdsTextureLoader;
        assert_eq!(cat.load(&loader, &device, &mut list, "grass", &grass).unwrap(), 0);
        let missing = dir.join("nope.dds");
        assert_eq!(cat.load(&loader, &device, &mut list, "water", &missing).unwrap(), 1);
        assert_eq!(cat.load(&loader, &device, &mut list, "fence", &missing).unwrap(), 2);

        let water = cat.get("water").unwrap();
        assert!(water.fallback);
        assert_eq!(water.resource, cat.get("fence").unwrap().resource);
        assert!(!cat.get("grass").unwrap().fallback);
        assert!(cat.load(&loader, &device, &mut list, "grass", &grass).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
