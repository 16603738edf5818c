//! State and behavior shared by [`Model`](crate::Model) and [`SkinnedModel`](crate::SkinnedModel).
//!
//! Both assets keep their header-derived data in a [`ModelCore`]: LODs with
//! their meshes, the material slot table and the number of resident LODs.
//! LOD `i` lives in storage chunk `i + 1`; residency grows from the lowest
//! detail LOD upwards, so with `n` LODs and `r` resident ones the resident
//! range is `n - r .. n`.

use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use redlilium_core::math::Mat4;
use redlilium_core::{BoundingBox, BoundingSphere, Guid, Ray};
use redlilium_graphics::{GraphicsDevice, Material, RenderContext, RenderView, ShadowsCastingMode};

use crate::asset::{Asset, AssetEvent, AssetEvents, AssetRegistry};
use crate::error::{AssetError, AssetResult};
use crate::lod::ModelLod;
use crate::lod_selection;
use crate::mesh::{MAX_MESHES_PER_LOD, MeshDrawInfo, MeshHit, MeshVariant};
use crate::serialization::{ReadStream, SLOT_NAME_MAX, WriteStream};
use crate::settings::ModelsSettings;
use crate::storage::{AssetKind, AssetStorage, HEADER_CHUNK};

/// Maximum LODs of one model.
pub const MAX_LODS: usize = 6;

const MAX_MATERIAL_SLOTS: usize = 4096;
const HEADER_MAGIC: u32 = u32::from_le_bytes(*b"RLMH");
const HEADER_VERSION: u8 = 1;
const MESH_CHUNK_MAGIC: u32 = u32::from_le_bytes(*b"RLMC");
const MESH_CHUNK_VERSION: u8 = 1;

/// Storage chunk holding the mesh payloads of `lod_index`.
pub fn lod_chunk_index(lod_index: usize) -> usize {
    lod_index + 1
}

/// Named material binding shared by all meshes that reference it.
#[derive(Debug, Clone)]
pub struct MaterialSlot {
    pub name: String,
    /// Persisted reference, resolved through the [`AssetRegistry`].
    pub material_id: Guid,
    pub material: Option<Arc<Material>>,
    pub shadows_mode: ShadowsCastingMode,
}

impl MaterialSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            material_id: Guid::EMPTY,
            material: None,
            shadows_mode: ShadowsCastingMode::ALL,
        }
    }
}

/// Services a model needs: the device it uploads to, settings and asset lookup.
#[derive(Clone)]
pub struct ModelContext {
    pub device: Arc<GraphicsDevice>,
    pub settings: Arc<ModelsSettings>,
    pub registry: Option<Arc<AssetRegistry>>,
}

impl ModelContext {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            device,
            settings: Arc::new(ModelsSettings::default()),
            registry: None,
        }
    }

    pub fn with_settings(mut self, settings: Arc<ModelsSettings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_registry(mut self, registry: Arc<AssetRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// Header-derived data guarded by the asset lock.
#[derive(Debug)]
pub struct ModelData<M> {
    pub(crate) lods: Vec<ModelLod<M>>,
    pub(crate) material_slots: Vec<MaterialSlot>,
    pub(crate) min_screen_size: f32,
    pub(crate) loaded_lods: usize,
}

impl<M: MeshVariant> ModelData<M> {
    fn empty(min_screen_size: f32) -> Self {
        Self {
            lods: Vec::new(),
            material_slots: Vec::new(),
            min_screen_size,
            loaded_lods: 0,
        }
    }

    pub fn lods(&self) -> &[ModelLod<M>] {
        &self.lods
    }

    pub fn lods_mut(&mut self) -> &mut [ModelLod<M>] {
        &mut self.lods
    }

    pub fn lod(&self, index: usize) -> Option<&ModelLod<M>> {
        self.lods.get(index)
    }

    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    pub fn mesh(&self, lod_index: usize, mesh_index: usize) -> Option<&M> {
        self.lods.get(lod_index)?.mesh(mesh_index)
    }

    pub fn mesh_mut(&mut self, lod_index: usize, mesh_index: usize) -> Option<&mut M> {
        self.lods.get_mut(lod_index)?.mesh_mut(mesh_index)
    }

    pub fn material_slots(&self) -> &[MaterialSlot] {
        &self.material_slots
    }

    pub fn material_slots_mut(&mut self) -> &mut Vec<MaterialSlot> {
        &mut self.material_slots
    }

    /// Objects projected smaller than this are culled.
    pub fn min_screen_size(&self) -> f32 {
        self.min_screen_size
    }

    pub fn set_min_screen_size(&mut self, value: f32) {
        self.min_screen_size = value;
    }

    /// LOD screen-size thresholds, finest first.
    pub fn screen_sizes(&self) -> Vec<f32> {
        self.lods.iter().map(|lod| lod.screen_size).collect()
    }

    pub fn set_screen_size(&mut self, lod_index: usize, screen_size: f32) {
        if let Some(lod) = self.lods.get_mut(lod_index) {
            lod.screen_size = screen_size;
        }
    }

    pub fn loaded_lods(&self) -> usize {
        self.loaded_lods
    }

    /// Finest resident LOD; equals the LOD count when nothing is resident.
    pub fn highest_resident_lod(&self) -> usize {
        self.lods.len() - self.loaded_lods.min(self.lods.len())
    }

    /// Clamp a LOD index into the resident range. `None` when nothing is resident.
    pub fn clamp_lod_index(&self, index: i32) -> Option<usize> {
        if self.loaded_lods == 0 || self.lods.is_empty() {
            return None;
        }
        let highest = self.highest_resident_lod() as i32;
        Some(index.clamp(highest, self.lods.len() as i32 - 1) as usize)
    }

    /// Bounds of LOD 0 (or the first LOD with meshes).
    pub fn bounds(&self) -> BoundingBox {
        self.lods
            .first()
            .map_or_else(BoundingBox::default, ModelLod::bounds)
    }

    fn validate_screen_sizes(&self, asset: &str) {
        for pair in self.lods.windows(2) {
            if pair[0].screen_size <= pair[1].screen_size {
                log::warn!(
                    "Model '{asset}': LOD screen sizes are not decreasing ({} <= {})",
                    pair[0].screen_size,
                    pair[1].screen_size
                );
            }
        }
    }

    fn release(&mut self) {
        for lod in &mut self.lods {
            lod.release();
        }
        self.loaded_lods = 0;
    }
}

/// Shared asset state of both model kinds.
pub struct ModelCore<M> {
    id: Guid,
    name: String,
    kind: AssetKind,
    device: Arc<GraphicsDevice>,
    settings: Arc<ModelsSettings>,
    registry: Option<Weak<AssetRegistry>>,
    storage: Option<Arc<AssetStorage>>,
    data: RwLock<ModelData<M>>,
    events: AssetEvents,
}

impl<M: MeshVariant> ModelCore<M> {
    pub(crate) fn new(
        id: Guid,
        name: impl Into<String>,
        kind: AssetKind,
        ctx: &ModelContext,
        storage: Option<Arc<AssetStorage>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            device: Arc::clone(&ctx.device),
            settings: Arc::clone(&ctx.settings),
            registry: ctx.registry.as_ref().map(Arc::downgrade),
            storage,
            data: RwLock::new(ModelData::empty(ctx.settings.default_min_screen_size)),
            events: AssetEvents::new(),
        }
    }

    pub fn id(&self) -> Guid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn settings(&self) -> &Arc<ModelsSettings> {
        &self.settings
    }

    pub fn registry(&self) -> Option<Arc<AssetRegistry>> {
        self.registry.as_ref().and_then(Weak::upgrade)
    }

    pub fn storage(&self) -> Option<&Arc<AssetStorage>> {
        self.storage.as_ref()
    }

    pub fn is_virtual(&self) -> bool {
        self.storage.is_none()
    }

    pub fn events(&self) -> &AssetEvents {
        &self.events
    }

    /// Shared access to the header-derived data.
    pub fn read(&self) -> RwLockReadGuard<'_, ModelData<M>> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ModelData<M>> {
        self.data.write()
    }

    fn require_virtual(&self, operation: &str) -> AssetResult<()> {
        if self.is_virtual() {
            Ok(())
        } else {
            log::warn!("Model '{}': {operation} is only allowed on virtual assets", self.name);
            Err(AssetError::InvalidOperation(format!(
                "{operation} requires a virtual asset"
            )))
        }
    }

    /// Create empty LODs with `meshes_per_lod[i]` meshes each. Virtual assets only.
    pub(crate) fn setup_lods(&self, meshes_per_lod: &[usize]) -> AssetResult<()> {
        self.require_virtual("setup_lods")?;
        if meshes_per_lod.is_empty() || meshes_per_lod.len() > MAX_LODS {
            return Err(AssetError::InvalidData(format!(
                "a model has 1..={MAX_LODS} LODs, got {}",
                meshes_per_lod.len()
            )));
        }
        if let Some(&bad) = meshes_per_lod
            .iter()
            .find(|&&count| count == 0 || count > MAX_MESHES_PER_LOD)
        {
            return Err(AssetError::InvalidData(format!(
                "a LOD has 1..={MAX_MESHES_PER_LOD} meshes, got {bad}"
            )));
        }
        let mut data = self.data.write();
        data.release();
        data.lods = meshes_per_lod
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let mut lod: ModelLod<M> = ModelLod::new(i as u8, count, 1.0 / (1u32 << i) as f32);
                for mesh in lod.meshes_mut() {
                    mesh.base_mut().set_virtual(true);
                }
                lod
            })
            .collect();
        if data.material_slots.is_empty() {
            data.material_slots.push(MaterialSlot::new("Material"));
        }
        data.loaded_lods = data.lods.len();
        log::debug!(
            "Model '{}': set up {} virtual LODs",
            self.name,
            meshes_per_lod.len()
        );
        Ok(())
    }

    /// Parse the common header, then hand the stream to `extra` for the
    /// variant-specific tail.
    pub(crate) fn parse_header(
        &self,
        bytes: &[u8],
        extra: impl FnOnce(&mut ReadStream<'_>, &mut ModelData<M>) -> AssetResult<()>,
    ) -> AssetResult<ModelData<M>> {
        let mut stream = ReadStream::new(bytes);
        let magic = stream.read_u32()?;
        let version = stream.read_u8()?;
        if magic != HEADER_MAGIC || version != HEADER_VERSION {
            return Err(AssetError::InvalidData(format!(
                "unsupported model header {magic:#010x} version {version}"
            )));
        }
        let mut data = ModelData::empty(stream.read_f32()?);

        let slot_count = stream.read_count(MAX_MATERIAL_SLOTS)?;
        let registry = self.registry();
        for _ in 0..slot_count {
            let material_id = stream.read_guid()?;
            let shadows_mode = ShadowsCastingMode::from_bits_truncate(stream.read_u8()?);
            let name = stream.read_string(SLOT_NAME_MAX)?;
            let material = registry.as_ref().and_then(|r| r.material(material_id));
            if material_id.is_valid() && material.is_none() {
                log::debug!("Model '{}': material {material_id} of slot '{name}' is not registered", self.name);
            }
            data.material_slots.push(MaterialSlot {
                name,
                material_id,
                material,
                shadows_mode,
            });
        }

        let lod_count = stream.read_u8()? as usize;
        if lod_count == 0 || lod_count > MAX_LODS {
            return Err(AssetError::InvalidData(format!(
                "LOD count {lod_count} is out of range 1..={MAX_LODS}"
            )));
        }
        for lod_index in 0..lod_count {
            let screen_size = stream.read_f32()?;
            let mesh_count = stream.read_u16()? as usize;
            if mesh_count == 0 || mesh_count > MAX_MESHES_PER_LOD {
                return Err(AssetError::InvalidData(format!(
                    "LOD {lod_index} has {mesh_count} meshes"
                )));
            }
            let mut lod = ModelLod::<M>::new(lod_index as u8, mesh_count, screen_size);
            for mesh in lod.meshes_mut() {
                let slot_index = stream.read_i32()?;
                if slot_index < 0 || slot_index as usize >= slot_count {
                    return Err(AssetError::InvalidData(format!(
                        "material slot {slot_index} is out of range (slots: {slot_count})"
                    )));
                }
                let bounds = stream.read_box()?;
                let sphere = stream.read_sphere()?;
                let lightmap_uvs = stream.read_u8()? as i8;
                let base = mesh.base_mut();
                base.set_material_slot_index(slot_index);
                base.set_bounds(bounds, sphere);
                base.set_lightmap_uvs_index(lightmap_uvs as i32);
            }
            data.lods.push(lod);
        }
        extra(&mut stream, &mut data)?;
        data.validate_screen_sizes(&self.name);
        Ok(data)
    }

    /// Encode the common header, then let `extra` append the variant-specific tail.
    pub(crate) fn encode_header(
        &self,
        extra: impl FnOnce(&mut WriteStream, &ModelData<M>),
    ) -> Vec<u8> {
        let data = self.data.read();
        let mut stream = WriteStream::new();
        stream.write_u32(HEADER_MAGIC);
        stream.write_u8(HEADER_VERSION);
        stream.write_f32(data.min_screen_size);
        stream.write_i32(data.material_slots.len() as i32);
        for slot in &data.material_slots {
            stream.write_guid(&slot.material_id);
            stream.write_u8(slot.shadows_mode.bits());
            stream.write_string(&slot.name, SLOT_NAME_MAX);
        }
        stream.write_u8(data.lods.len() as u8);
        for lod in &data.lods {
            stream.write_f32(lod.screen_size);
            stream.write_u16(lod.meshes.len() as u16);
            for mesh in &lod.meshes {
                let base = mesh.base();
                stream.write_i32(base.material_slot_index());
                stream.write_box(base.bounds());
                stream.write_sphere(base.sphere());
                stream.write_u8(base.lightmap_uvs_index() as i8 as u8);
            }
        }
        extra(&mut stream, &data);
        stream.into_bytes()
    }

    /// Read chunk 0 from storage and replace the header-derived data.
    pub(crate) fn load_header(
        &self,
        extra: impl FnOnce(&mut ReadStream<'_>, &mut ModelData<M>) -> AssetResult<()>,
    ) -> AssetResult<()> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| AssetError::InvalidOperation("virtual assets have no storage".to_string()))?;
        let header = storage.load_chunk(HEADER_CHUNK)?;
        let data = self.parse_header(&header, extra).inspect_err(|e| {
            log::error!("Model '{}': cannot load header: {e}", self.name);
        })?;
        let mut current = self.data.write();
        current.release();
        *current = data;
        log::debug!(
            "Model '{}': loaded header with {} LODs",
            self.name,
            current.lods.len()
        );
        Ok(())
    }

    /// Chunks that must be resident: the header, every resident LOD and `extra_mask`.
    pub fn chunks_to_preload(&self, extra_mask: u16) -> u16 {
        let data = self.data.read();
        let lods = data.lods.len();
        let mut mask = 1u16 << HEADER_CHUNK | extra_mask;
        for lod in data.highest_resident_lod()..lods {
            mask |= 1 << lod_chunk_index(lod);
        }
        mask
    }

    /// Decode one LOD chunk into the LOD's meshes.
    pub(crate) fn decode_lod_chunk(&self, lod_index: usize, bytes: &[u8]) -> AssetResult<()> {
        let keep_cpu_data = self.settings.keep_cpu_mesh_data;
        let mut data = self.data.write();
        let lod = data
            .lods
            .get_mut(lod_index)
            .ok_or_else(|| AssetError::InvalidData(format!("LOD {lod_index} does not exist")))?;
        let mut stream = ReadStream::new(bytes);
        let magic = stream.read_u32()?;
        let version = stream.read_u8()?;
        if magic != MESH_CHUNK_MAGIC || version != MESH_CHUNK_VERSION {
            return Err(AssetError::InvalidData(format!(
                "unsupported mesh chunk {magic:#010x} version {version}"
            )));
        }
        let result = lod
            .meshes_mut()
            .iter_mut()
            .try_for_each(|mesh| mesh.read_payload(&mut stream, &self.device, keep_cpu_data));
        if result.is_err() {
            lod.release();
        }
        result
    }

    /// Make the next finer LOD resident. Returns the LOD index that was loaded.
    pub fn load_next_lod(&self) -> AssetResult<usize> {
        let lod_index = {
            let data = self.data.read();
            let highest = data.highest_resident_lod();
            if highest == 0 {
                return Err(AssetError::InvalidOperation("all LODs are resident".to_string()));
            }
            highest - 1
        };
        self.load_lod(lod_index)?;
        Ok(lod_index)
    }

    /// Load `lod_index`, which must be the next finer LOD above the resident range.
    pub fn load_lod(&self, lod_index: usize) -> AssetResult<()> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| AssetError::InvalidOperation("virtual assets are always resident".to_string()))?;
        {
            let data = self.data.read();
            if data.highest_resident_lod() != lod_index + 1 {
                return Err(AssetError::InvalidOperation(format!(
                    "LOD {lod_index} is not next to the resident range (highest resident: {})",
                    data.highest_resident_lod()
                )));
            }
        }
        let chunk = storage.load_chunk(lod_chunk_index(lod_index))?;
        self.decode_lod_chunk(lod_index, &chunk).inspect_err(|e| {
            log::error!("Model '{}': cannot load LOD {lod_index}: {e}", self.name);
        })?;
        let mut data = self.data.write();
        data.loaded_lods += 1;
        log::debug!(
            "Model '{}': LOD {lod_index} resident ({} of {})",
            self.name,
            data.loaded_lods,
            data.lods.len()
        );
        Ok(())
    }

    /// Evict the finest resident LOD. Returns its index.
    pub fn unload_lod(&self) -> Option<usize> {
        let mut data = self.data.write();
        if data.loaded_lods == 0 || self.is_virtual() {
            return None;
        }
        let lod_index = data.highest_resident_lod();
        data.lods[lod_index].release();
        data.loaded_lods -= 1;
        drop(data);
        if let Some(storage) = &self.storage {
            storage.unload_chunk(lod_chunk_index(lod_index));
        }
        log::debug!("Model '{}': evicted LOD {lod_index}", self.name);
        Some(lod_index)
    }

    /// Encode the meshes of one LOD as a storage chunk.
    pub(crate) fn encode_lod_chunk(&self, lod_index: usize) -> AssetResult<Vec<u8>> {
        let data = self.data.read();
        let lod = data
            .lods
            .get(lod_index)
            .ok_or_else(|| AssetError::InvalidData(format!("LOD {lod_index} does not exist")))?;
        let mut stream = WriteStream::new();
        stream.write_u32(MESH_CHUNK_MAGIC);
        stream.write_u8(MESH_CHUNK_VERSION);
        for mesh in lod.meshes() {
            mesh.write_payload(&mut stream)?;
        }
        Ok(stream.into_bytes())
    }

    /// LOD chunk bytes for saving: re-encoded when resident, copied from storage otherwise.
    pub(crate) fn lod_chunk_for_save(&self, lod_index: usize) -> AssetResult<Vec<u8>> {
        let resident = self
            .data
            .read()
            .lod(lod_index)
            .is_some_and(ModelLod::is_initialized);
        if resident {
            return self.encode_lod_chunk(lod_index);
        }
        match &self.storage {
            Some(storage) if storage.has_chunk(lod_chunk_index(lod_index)) => {
                Ok(storage.load_chunk(lod_chunk_index(lod_index))?.to_vec())
            }
            _ => Err(AssetError::InvalidOperation(format!(
                "LOD {lod_index} is not resident and has no stored data"
            ))),
        }
    }

    /// Release every LOD and notify observers.
    pub(crate) fn unload(&self) {
        self.data.write().release();
        self.events.emit(self.id, AssetEvent::Unloaded);
        log::debug!("Model '{}': unloaded", self.name);
    }

    /// Look up materials of all slots again.
    pub fn resolve_materials(&self) {
        let Some(registry) = self.registry() else {
            return;
        };
        for slot in &mut self.data.write().material_slots {
            if slot.material.is_none() {
                slot.material = registry.material(slot.material_id);
            }
        }
    }
}

impl<M> std::fmt::Debug for ModelCore<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("virtual", &self.storage.is_none())
            .finish()
    }
}

/// Capability set shared by static and skinned models.
pub trait ModelBase: Asset {
    type Mesh: MeshVariant;

    fn core(&self) -> &ModelCore<Self::Mesh>;

    fn lod_count(&self) -> usize {
        self.core().read().lod_count()
    }

    fn loaded_lods(&self) -> usize {
        self.core().read().loaded_lods()
    }

    fn highest_resident_lod(&self) -> usize {
        self.core().read().highest_resident_lod()
    }

    fn is_initialized(&self) -> bool {
        let data = self.core().read();
        !data.lods.is_empty() && data.loaded_lods > 0
    }

    fn material_slots(&self) -> Vec<MaterialSlot> {
        self.core().read().material_slots.clone()
    }

    /// Local bounds of LOD 0.
    fn bounds(&self) -> BoundingBox {
        self.core().read().bounds()
    }

    fn world_bounds(&self, world: &Mat4) -> BoundingBox {
        self.bounds().transformed(world)
    }

    fn world_sphere(&self, world: &Mat4) -> BoundingSphere {
        BoundingSphere::from_box(&self.bounds()).transformed(world)
    }

    /// LOD index for an object with the given world bounds, `-1` to cull.
    fn compute_lod(&self, sphere: &BoundingSphere, view: &RenderView) -> i32 {
        let data = self.core().read();
        lod_selection::compute_lod(
            &data.screen_sizes(),
            data.min_screen_size,
            &sphere.center,
            sphere.radius,
            view,
        )
    }

    /// Closest hit among the meshes of one LOD.
    fn intersects(&self, ray: &Ray, world: &Mat4, lod_index: usize) -> Option<(MeshHit, usize)> {
        self.core().read().lod(lod_index)?.intersects(ray, world)
    }

    /// Draw every mesh of a LOD. Returns the number of submitted draw calls.
    fn draw_lod(
        &self,
        ctx: &mut RenderContext,
        lod_index: usize,
        info: &mut MeshDrawInfo<'_>,
        lod_dither_factor: f32,
    ) -> usize {
        let data = self.core().read();
        let Some(lod) = data.lod(lod_index) else {
            return 0;
        };
        lod.meshes()
            .iter()
            .filter(|mesh| mesh.draw_with_info(ctx, info, lod_dither_factor))
            .count()
    }
}
