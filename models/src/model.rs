//! Static model asset.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use redlilium_core::Guid;
use redlilium_core::math::Vec3;
use redlilium_core::thread::is_main_thread;
use redlilium_graphics::Texture;

use crate::asset::{Asset, AssetEvent, AssetEvents};
use crate::error::{AssetError, AssetResult};
use crate::mesh::{Mesh, MeshAccessor, MeshBufferType, MeshUpdate};
use crate::model_base::{ModelBase, ModelContext, ModelCore, lod_chunk_index};
use crate::sdf::{ModelSdfHeader, SdfData, generate_sdf};
use crate::storage::{AssetKind, AssetStorage, HEADER_CHUNK, PackedAsset, SDF_CHUNK};

/// Resident signed distance field of a model.
#[derive(Debug, Clone)]
pub struct ModelSdf {
    pub header: ModelSdfHeader,
    pub texture: Arc<Texture>,
}

#[derive(Debug)]
struct SdfState {
    sdf: ModelSdf,
    /// CPU mips still waiting for upload (or kept for saving).
    data: Option<Arc<SdfData>>,
}

/// Mesh asset with up to [`MAX_LODS`](crate::MAX_LODS) LODs and an optional SDF.
pub struct Model {
    core: ModelCore<Mesh>,
    sdf: RwLock<Option<SdfState>>,
    self_ref: Weak<Model>,
}

impl Model {
    fn create(core: ModelCore<Mesh>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            core,
            sdf: RwLock::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Runtime model without storage; call [`setup_lods`](Self::setup_lods) next.
    pub fn new_virtual(name: impl Into<String>, ctx: &ModelContext) -> Arc<Self> {
        Self::create(ModelCore::new(Guid::new_unique(), name, AssetKind::Model, ctx, None))
    }

    /// Parse the header of a stored model. No LOD is resident afterwards.
    pub fn load(storage: Arc<AssetStorage>, name: impl Into<String>, ctx: &ModelContext) -> AssetResult<Arc<Self>> {
        if storage.kind() != AssetKind::Model {
            return Err(AssetError::InvalidData(format!(
                "storage {} holds a {:?}, not a model",
                storage.id(),
                storage.kind()
            )));
        }
        let model = Self::create(ModelCore::new(
            storage.id(),
            name,
            AssetKind::Model,
            ctx,
            Some(storage),
        ));
        model.core.load_header(|_, _| Ok(()))?;
        model.load_sdf_header()?;
        Ok(model)
    }

    /// Weak handle to this model, used by streaming tasks.
    pub fn downgrade(&self) -> Weak<Model> {
        self.self_ref.clone()
    }

    fn load_sdf_header(&self) -> AssetResult<()> {
        let Some(storage) = self.core.storage() else {
            return Ok(());
        };
        if !storage.has_chunk(SDF_CHUNK) {
            *self.sdf.write() = None;
            return Ok(());
        }
        let data = SdfData::decode(&storage.load_chunk(SDF_CHUNK)?)?;
        let texture = self.core.device().create_texture(&data.header.descriptor())?;
        *self.sdf.write() = Some(SdfState {
            sdf: ModelSdf {
                header: data.header,
                texture,
            },
            data: Some(Arc::new(data)),
        });
        Ok(())
    }

    /// Create empty LODs with `meshes_per_lod[i]` meshes each. Virtual models only.
    pub fn setup_lods(&self, meshes_per_lod: &[usize]) -> AssetResult<()> {
        self.core.setup_lods(meshes_per_lod)
    }

    /// Replace the geometry of one mesh.
    pub fn update_mesh(&self, lod_index: usize, mesh_index: usize, update: &MeshUpdate<'_>) -> AssetResult<()> {
        let accessor = update.to_accessor(false)?;
        let keep_cpu = self.core.is_virtual() || self.core.settings().keep_cpu_mesh_data;
        let mut data = self.core.write();
        let mesh = data.mesh_mut(lod_index, mesh_index).ok_or_else(|| {
            AssetError::InvalidOperation(format!("mesh {mesh_index} of LOD {lod_index} does not exist"))
        })?;
        accessor.update_mesh(mesh, self.core.device(), true, keep_cpu)
    }

    /// Upload prepared accessor buffers into one mesh.
    pub fn update_mesh_from_accessor(
        &self,
        lod_index: usize,
        mesh_index: usize,
        accessor: &MeshAccessor,
        recompute_bounds: bool,
    ) -> AssetResult<()> {
        let keep_cpu = self.core.is_virtual() || self.core.settings().keep_cpu_mesh_data;
        let mut data = self.core.write();
        let mesh = data.mesh_mut(lod_index, mesh_index).ok_or_else(|| {
            AssetError::InvalidOperation(format!("mesh {mesh_index} of LOD {lod_index} does not exist"))
        })?;
        accessor.update_mesh(mesh, self.core.device(), recompute_bounds, keep_cpu)
    }

    /// Load every LOD that is not resident yet.
    pub fn load_all_lods(&self) -> AssetResult<()> {
        while self.core.read().highest_resident_lod() > 0 {
            self.core.load_next_lod()?;
        }
        Ok(())
    }

    /// Chunks the storage must keep resident: header, SDF and resident LODs.
    pub fn chunks_to_preload(&self) -> u16 {
        let has_sdf = self
            .core
            .storage()
            .is_some_and(|s| s.has_chunk(SDF_CHUNK));
        self.core
            .chunks_to_preload(if has_sdf { 1 << SDF_CHUNK } else { 0 })
    }

    pub fn sdf(&self) -> Option<ModelSdf> {
        self.sdf.read().as_ref().map(|s| s.sdf.clone())
    }

    /// SDF mips that still need uploading.
    pub fn pending_sdf_mips(&self) -> Vec<u32> {
        let state = self.sdf.read();
        let Some(state) = state.as_ref() else {
            return Vec::new();
        };
        if state.data.is_none() {
            return Vec::new();
        }
        let texture = &state.sdf.texture;
        (0..texture.mip_levels())
            .filter(|&mip| !texture.is_mip_uploaded(mip))
            .collect()
    }

    /// Upload one SDF mip from the decoded chunk.
    pub fn upload_sdf_mip(&self, mip: u32) -> AssetResult<()> {
        let state = self.sdf.read();
        let state = state
            .as_ref()
            .ok_or_else(|| AssetError::InvalidOperation("model has no SDF".to_string()))?;
        let data = state
            .data
            .as_ref()
            .ok_or_else(|| AssetError::InvalidOperation("SDF data is not resident".to_string()))?;
        let bytes = data
            .mips
            .get(mip as usize)
            .ok_or_else(|| AssetError::InvalidData(format!("SDF mip {mip} does not exist")))?;
        state.sdf.texture.write_mip(mip, bytes)?;
        log::trace!("Model '{}': uploaded SDF mip {mip}", self.core.name());
        Ok(())
    }

    /// Build the SDF of one LOD from its mesh data. Refused on the main thread.
    pub fn generate_sdf(
        &self,
        resolution_scale: f32,
        lod_index: usize,
        cache_data: bool,
        backfaces_threshold: f32,
    ) -> AssetResult<()> {
        if is_main_thread() {
            log::warn!("Model '{}': cannot generate SDF on the main thread", self.core.name());
            return Err(AssetError::InvalidOperation(
                "SDF generation is not allowed on the main thread".to_string(),
            ));
        }
        let (positions, indices) = {
            let data = self.core.read();
            let lod = data
                .lod(lod_index)
                .filter(|lod| lod.is_initialized())
                .ok_or_else(|| AssetError::InvalidOperation(format!("LOD {lod_index} is not resident")))?;
            let mut positions: Vec<Vec3> = Vec::new();
            let mut indices = Vec::new();
            for mesh in lod.meshes() {
                let mut accessor = MeshAccessor::new();
                accessor.load_mesh(mesh, false, &[MeshBufferType::Vertex0, MeshBufferType::Index])?;
                let base = positions.len() as u32;
                positions.extend(accessor.position().to_vec3());
                indices.extend(accessor.index().to_indices().into_iter().map(|i| i + base));
            }
            (positions, indices)
        };

        let sdf = generate_sdf(&positions, &indices, resolution_scale, backfaces_threshold, lod_index as i32)?;
        let texture = sdf.upload(self.core.device())?;
        if cache_data {
            if let Some(storage) = self.core.storage() {
                storage.set_chunk(SDF_CHUNK, sdf.encode());
            }
        }
        *self.sdf.write() = Some(SdfState {
            sdf: ModelSdf {
                header: sdf.header,
                texture,
            },
            data: cache_data.then(|| Arc::new(sdf)),
        });
        Ok(())
    }

    /// Re-read the header from storage and drop resident LODs.
    pub fn reload(&self) -> AssetResult<()> {
        if !self.core.is_virtual() {
            self.core.load_header(|_, _| Ok(()))?;
            self.load_sdf_header()?;
        }
        self.core.events().emit(self.core.id(), AssetEvent::Reloaded);
        Ok(())
    }

    /// Release GPU data and notify observers.
    pub fn unload(&self) {
        *self.sdf.write() = None;
        self.core.unload();
    }

    /// Encode the whole asset. Meshes are re-encoded from their buffers.
    pub fn save(&self) -> AssetResult<PackedAsset> {
        if is_main_thread() {
            log::warn!("Model '{}': saving requires GPU downloads, refused on the main thread", self.core.name());
            return Err(AssetError::InvalidOperation("cannot save on the main thread".to_string()));
        }
        let mut packed = PackedAsset::new(self.core.id(), AssetKind::Model);
        packed.set_chunk(HEADER_CHUNK, self.core.encode_header(|_, _| {}));
        let lod_count = self.core.read().lod_count();
        for lod_index in 0..lod_count {
            packed.set_chunk(lod_chunk_index(lod_index), self.core.lod_chunk_for_save(lod_index)?);
        }
        if let Some(sdf) = self.sdf_chunk_for_save()? {
            packed.set_chunk(SDF_CHUNK, sdf);
        }
        Ok(packed)
    }

    fn sdf_chunk_for_save(&self) -> AssetResult<Option<Vec<u8>>> {
        if let Some(bytes) = self.core.storage().and_then(|s| s.chunk(SDF_CHUNK)) {
            return Ok(Some(bytes.to_vec()));
        }
        let state = self.sdf.read();
        let Some(state) = state.as_ref() else {
            return Ok(None);
        };
        if let Some(data) = &state.data {
            return Ok(Some(data.encode()));
        }
        let texture = &state.sdf.texture;
        let mips = (0..texture.mip_levels())
            .map(|mip| texture.download_mip(mip))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(
            SdfData {
                header: state.sdf.header,
                mips,
            }
            .encode(),
        ))
    }
}

impl Asset for Model {
    fn id(&self) -> Guid {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> AssetKind {
        AssetKind::Model
    }

    fn is_virtual(&self) -> bool {
        self.core.is_virtual()
    }

    fn events(&self) -> &AssetEvents {
        self.core.events()
    }
}

impl ModelBase for Model {
    type Mesh = Mesh;

    fn core(&self) -> &ModelCore<Mesh> {
        &self.core
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("core", &self.core)
            .field("sdf", &self.sdf.read().is_some())
            .finish()
    }
}
