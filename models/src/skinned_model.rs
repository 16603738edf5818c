//! Skinned model asset: a model with a skeleton, retargeting rules and blend shapes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use redlilium_core::Guid;
use redlilium_core::math::{Mat4, Transform};

use crate::asset::{Asset, AssetEvent, AssetEvents, AssetHandle};
use crate::error::{AssetError, AssetResult};
use crate::mesh::{BlendShape, MeshAccessor, MeshUpdate, SkinnedMesh};
use crate::model_base::{ModelBase, ModelContext, ModelCore, ModelData, lod_chunk_index};
use crate::serialization::{ReadStream, WriteStream};
use crate::skeleton::{Skeleton, SkeletonBone, SkeletonMapping, SkeletonNode, SkeletonRetarget};
use crate::storage::{AssetKind, AssetStorage, HEADER_CHUNK, PackedAsset};

const MAX_BLEND_SHAPES: usize = u16::MAX as usize;

struct CachedMapping {
    mapping: SkeletonMapping,
    source: Weak<dyn Asset>,
}

/// Model with a skeleton, skinned meshes and blend shapes.
pub struct SkinnedModel {
    core: ModelCore<SkinnedMesh>,
    skeleton: RwLock<Skeleton>,
    retargets: RwLock<Vec<SkeletonRetarget>>,
    mappings: Mutex<HashMap<Guid, CachedMapping>>,
    self_ref: Weak<SkinnedModel>,
}

fn read_blend_shape_headers(
    stream: &mut ReadStream<'_>,
    data: &mut ModelData<SkinnedMesh>,
) -> AssetResult<()> {
    for lod in data.lods_mut() {
        for mesh in lod.meshes_mut() {
            let count = stream.read_u16()? as usize;
            let headers = (0..count)
                .map(|_| BlendShape::read_header(stream))
                .collect::<AssetResult<Vec<_>>>()?;
            mesh.set_blend_shape_headers(headers);
        }
    }
    Ok(())
}

fn write_blend_shape_headers(stream: &mut WriteStream, data: &ModelData<SkinnedMesh>) {
    for lod in data.lods() {
        for mesh in lod.meshes() {
            let shapes = &mesh.blend_shapes()[..mesh.blend_shapes().len().min(MAX_BLEND_SHAPES)];
            stream.write_u16(shapes.len() as u16);
            for shape in shapes {
                shape.write_header(stream);
            }
        }
    }
}

impl SkinnedModel {
    fn create(core: ModelCore<SkinnedMesh>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            core,
            skeleton: RwLock::new(Skeleton::default()),
            retargets: RwLock::new(Vec::new()),
            mappings: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn new_virtual(name: impl Into<String>, ctx: &ModelContext) -> Arc<Self> {
        Self::create(ModelCore::new(
            Guid::new_unique(),
            name,
            AssetKind::SkinnedModel,
            ctx,
            None,
        ))
    }

    /// Parse the header of a stored skinned model. No LOD is resident afterwards.
    pub fn load(storage: Arc<AssetStorage>, name: impl Into<String>, ctx: &ModelContext) -> AssetResult<Arc<Self>> {
        if storage.kind() != AssetKind::SkinnedModel {
            return Err(AssetError::InvalidData(format!(
                "storage {} holds a {:?}, not a skinned model",
                storage.id(),
                storage.kind()
            )));
        }
        let model = Self::create(ModelCore::new(
            storage.id(),
            name,
            AssetKind::SkinnedModel,
            ctx,
            Some(storage),
        ));
        model.load_header()?;
        Ok(model)
    }

    fn load_header(&self) -> AssetResult<()> {
        let mut skeleton_data = None;
        self.core.load_header(|stream, data| {
            let skeleton = Skeleton::read(stream)?;
            let retargets = SkeletonRetarget::read_all(stream)?;
            read_blend_shape_headers(stream, data)?;
            skeleton_data = Some((skeleton, retargets));
            Ok(())
        })?;
        if let Some((skeleton, retargets)) = skeleton_data {
            *self.skeleton.write() = skeleton;
            *self.retargets.write() = retargets;
        }
        self.clear_skeleton_mapping();
        Ok(())
    }

    pub fn downgrade(&self) -> Weak<SkinnedModel> {
        self.self_ref.clone()
    }

    pub fn setup_lods(&self, meshes_per_lod: &[usize]) -> AssetResult<()> {
        self.core.setup_lods(meshes_per_lod)
    }

    /// Replace the skeleton with `nodes`, one bone per node with computed offsets.
    pub fn setup_skeleton(&self, nodes: Vec<SkeletonNode>) -> AssetResult<()> {
        let bones = (0..nodes.len())
            .map(|i| {
                let mut bone = SkeletonBone::new(i as i32);
                bone.parent_index = nodes[i].parent_index;
                bone.local_transform = nodes[i].local_transform;
                bone
            })
            .collect();
        self.setup_skeleton_with_bones(nodes, bones, true)
    }

    /// Replace nodes and bones. With `auto_offsets` the bone offset matrices are
    /// derived from the node bind pose. Virtual models only.
    pub fn setup_skeleton_with_bones(
        &self,
        nodes: Vec<SkeletonNode>,
        bones: Vec<SkeletonBone>,
        auto_offsets: bool,
    ) -> AssetResult<()> {
        if !self.core.is_virtual() {
            log::warn!("Skinned model '{}': setup_skeleton requires a virtual asset", self.core.name());
            return Err(AssetError::InvalidOperation(
                "setup_skeleton requires a virtual asset".to_string(),
            ));
        }
        let mut skeleton = Skeleton { nodes, bones };
        skeleton.validate()?;
        if auto_offsets {
            skeleton.compute_offset_matrices();
        }
        *self.skeleton.write() = skeleton;
        self.clear_skeleton_mapping();
        Ok(())
    }

    pub fn skeleton(&self) -> RwLockReadGuard<'_, Skeleton> {
        self.skeleton.read()
    }

    pub fn node_transform(&self, index: usize) -> Mat4 {
        self.skeleton.read().node_transform(index)
    }

    /// Move a node so its model-space matrix becomes `world`.
    pub fn set_node_transform(&self, index: usize, world: &Mat4) {
        self.skeleton.write().set_node_transform(index, world);
    }

    pub fn find_node(&self, name: &str) -> i32 {
        self.skeleton.read().find_node(name)
    }

    pub fn find_bone(&self, node_index: i32) -> i32 {
        self.skeleton.read().find_bone(node_index)
    }

    pub fn retargets(&self) -> Vec<SkeletonRetarget> {
        self.retargets.read().clone()
    }

    /// Replace the retargeting rules and drop cached mappings.
    pub fn set_retargets(&self, retargets: Vec<SkeletonRetarget>) {
        *self.retargets.write() = retargets;
        self.clear_skeleton_mapping();
    }

    /// Replace the geometry of one skinned mesh.
    pub fn update_mesh(&self, lod_index: usize, mesh_index: usize, update: &MeshUpdate<'_>) -> AssetResult<()> {
        self.update_mesh_from_accessor(lod_index, mesh_index, &update.to_accessor(true)?, true)
    }

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
        mesh.update(accessor, self.core.device(), recompute_bounds, keep_cpu)
    }

    pub fn set_blend_shapes(&self, lod_index: usize, mesh_index: usize, shapes: Vec<BlendShape>) -> AssetResult<()> {
        let mut data = self.core.write();
        let mesh = data.mesh_mut(lod_index, mesh_index).ok_or_else(|| {
            AssetError::InvalidOperation(format!("mesh {mesh_index} of LOD {lod_index} does not exist"))
        })?;
        mesh.set_blend_shapes(shapes)
    }

    /// Names of all blend shapes across LODs, deduplicated and sorted.
    pub fn blend_shape_names(&self) -> Vec<String> {
        let data = self.core.read();
        let mut names: Vec<String> = data
            .lods()
            .iter()
            .flat_map(|lod| lod.meshes())
            .flat_map(|mesh| mesh.blend_shapes().iter().map(|s| s.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn load_all_lods(&self) -> AssetResult<()> {
        while self.core.read().highest_resident_lod() > 0 {
            self.core.load_next_lod()?;
        }
        Ok(())
    }

    pub fn chunks_to_preload(&self) -> u16 {
        self.core.chunks_to_preload(0)
    }

    /// Node mapping from this skeleton into `source` (a skinned model or an animation).
    ///
    /// Manual rules win. Otherwise, with `auto_retarget`, nodes are matched by
    /// name ignoring case. Results are cached until the source is unloaded or reloaded.
    pub fn get_skeleton_mapping(&self, source: &AssetHandle, auto_retarget: bool) -> SkeletonMapping {
        let source_id = source.id();
        if let Some(cached) = self.mappings.lock().get(&source_id) {
            return cached.mapping.clone();
        }

        let rule = self
            .retargets
            .read()
            .iter()
            .find(|r| r.source_asset == source_id)
            .cloned();
        let mapping = match &rule {
            Some(rule) => self.mapping_from_rule(rule, source),
            None if auto_retarget => Some(self.auto_mapping(source)),
            None => None,
        };
        let Some(mapping) = mapping else {
            return SkeletonMapping::empty(self.core.id(), source_id);
        };

        let owner = self.core.id();
        let weak = self.self_ref.clone();
        source.as_asset().events().subscribe(owner, move |asset, event| {
            if matches!(event, AssetEvent::Unloaded | AssetEvent::Reloaded) {
                if let Some(model) = weak.upgrade() {
                    model.on_source_changed(asset);
                }
            }
        });
        let source_ref: Arc<dyn Asset> = match source {
            AssetHandle::Model(m) => m.clone(),
            AssetHandle::SkinnedModel(m) => m.clone(),
            AssetHandle::Animation(a) => a.clone(),
        };
        self.mappings.lock().insert(
            source_id,
            CachedMapping {
                mapping: mapping.clone(),
                source: Arc::downgrade(&source_ref),
            },
        );
        mapping
    }

    fn on_source_changed(&self, source: Guid) {
        let removed = self.mappings.lock().remove(&source);
        if let Some(entry) = removed {
            if let Some(asset) = entry.source.upgrade() {
                asset.events().unsubscribe(self.core.id());
            }
            log::debug!(
                "Skinned model '{}': dropped skeleton mapping of {source}",
                self.core.name()
            );
        }
    }

    /// Drop all cached mappings and their observers.
    pub fn clear_skeleton_mapping(&self) {
        let entries: Vec<CachedMapping> = self.mappings.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            if let Some(asset) = entry.source.upgrade() {
                asset.events().unsubscribe(self.core.id());
            }
        }
    }

    pub fn cached_mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }

    /// Names a source exposes for mapping: its nodes or animation channels.
    fn source_names(source: &AssetHandle) -> Vec<String> {
        match source {
            AssetHandle::SkinnedModel(m) => m.skeleton().nodes.iter().map(|n| n.name.clone()).collect(),
            AssetHandle::Animation(a) => a.channels(),
            AssetHandle::Model(_) => Vec::new(),
        }
    }

    fn auto_mapping(&self, source: &AssetHandle) -> SkeletonMapping {
        let names = Self::source_names(source);
        let find = |name: &str| {
            names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .map_or(-1, |i| i as i32)
        };
        let node_mapping: Vec<i32> = self.skeleton.read().nodes.iter().map(|n| find(&n.name)).collect();
        SkeletonMapping {
            target_skeleton: self.core.id(),
            source: source.id(),
            node_mapping: node_mapping.into(),
        }
    }

    fn mapping_from_rule(&self, rule: &SkeletonRetarget, source: &AssetHandle) -> Option<SkeletonMapping> {
        let skeleton = self.skeleton.read().clone();
        let node_mapping: Vec<i32> = if rule.reference_skeleton.is_valid() {
            let reference = self
                .core
                .registry()
                .and_then(|r| r.skinned_model(rule.reference_skeleton));
            let Some(reference) = reference else {
                log::error!(
                    "Skinned model '{}': missing reference skeleton {} for retargeting {}",
                    self.core.name(),
                    rule.reference_skeleton,
                    rule.source_asset
                );
                return None;
            };
            let reference_mapping = reference.get_skeleton_mapping(source, true);
            let reference_skeleton = reference.skeleton().clone();
            skeleton
                .nodes
                .iter()
                .map(|node| {
                    rule.mapped_name(&node.name)
                        .and_then(|name| usize::try_from(reference_skeleton.find_node(name)).ok())
                        .and_then(|i| reference_mapping.node_mapping.get(i).copied())
                        .unwrap_or(-1)
                })
                .collect()
        } else {
            let names = Self::source_names(source);
            skeleton
                .nodes
                .iter()
                .map(|node| {
                    rule.mapped_name(&node.name)
                        .and_then(|mapped| names.iter().position(|n| n.eq_ignore_ascii_case(mapped)))
                        .map_or(-1, |i| i as i32)
                })
                .collect()
        };
        Some(SkeletonMapping {
            target_skeleton: self.core.id(),
            source: source.id(),
            node_mapping: node_mapping.into(),
        })
    }

    /// Local transforms of the bind pose, ready to feed an animated pose.
    pub fn bind_pose_transforms(&self) -> Vec<Transform> {
        self.skeleton
            .read()
            .nodes
            .iter()
            .map(|n| n.local_transform)
            .collect()
    }

    pub fn reload(&self) -> AssetResult<()> {
        if !self.core.is_virtual() {
            self.load_header()?;
        }
        self.core.events().emit(self.core.id(), AssetEvent::Reloaded);
        Ok(())
    }

    pub fn unload(&self) {
        self.clear_skeleton_mapping();
        self.core.unload();
    }

    pub fn save(&self) -> AssetResult<PackedAsset> {
        if redlilium_core::thread::is_main_thread() {
            log::warn!("Skinned model '{}': saving is refused on the main thread", self.core.name());
            return Err(AssetError::InvalidOperation("cannot save on the main thread".to_string()));
        }
        let skeleton = self.skeleton.read().clone();
        let retargets = self.retargets.read().clone();
        let header = self.core.encode_header(|stream, data| {
            skeleton.write(stream);
            SkeletonRetarget::write_all(&retargets, stream);
            write_blend_shape_headers(stream, data);
        });
        let mut packed = PackedAsset::new(self.core.id(), AssetKind::SkinnedModel);
        packed.set_chunk(HEADER_CHUNK, header);
        let lod_count = self.core.read().lod_count();
        for lod_index in 0..lod_count {
            packed.set_chunk(lod_chunk_index(lod_index), self.core.lod_chunk_for_save(lod_index)?);
        }
        Ok(packed)
    }
}

impl Asset for SkinnedModel {
    fn id(&self) -> Guid {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> AssetKind {
        AssetKind::SkinnedModel
    }

    fn is_virtual(&self) -> bool {
        self.core.is_virtual()
    }

    fn events(&self) -> &AssetEvents {
        self.core.events()
    }
}

impl ModelBase for SkinnedModel {
    type Mesh = SkinnedMesh;

    fn core(&self) -> &ModelCore<SkinnedMesh> {
        &self.core
    }
}

impl Drop for SkinnedModel {
    fn drop(&mut self) {
        self.clear_skeleton_mapping();
    }
}

impl std::fmt::Debug for SkinnedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkinnedModel")
            .field("core", &self.core)
            .field("nodes", &self.skeleton.read().nodes.len())
            .field("retargets", &self.retargets.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::Animation;
    use crate::asset::AssetRegistry;
    use crate::mesh::BlendShapeVertex;
    use redlilium_core::math::{Vec3, Vec4};
    use redlilium_graphics::GraphicsDevice;

    fn nodes(names: &[&str]) -> Vec<SkeletonNode> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                SkeletonNode::new(*name, i as i32 - 1, Transform::from_translation(Vec3::new(0.0, 1.0, 0.0)))
            })
            .collect()
    }

    fn skinned(ctx: &ModelContext, names: &[&str]) -> Arc<SkinnedModel> {
        let model = SkinnedModel::new_virtual("skinned", ctx);
        model.setup_lods(&[1]).unwrap();
        model.setup_skeleton(nodes(names)).unwrap();
        let positions = [Vec3::zeros(), Vec3::x(), Vec3::y()];
        let bones = [[0, 0, 0, 0]; 3];
        let weights = [Vec4::new(1.0, 0.0, 0.0, 0.0); 3];
        model
            .update_mesh(
                0,
                0,
                &MeshUpdate::new(&positions, &[0, 1, 2]).with_skinning(&bones, &weights),
            )
            .unwrap();
        model
    }

    #[test]
    fn auto_mapping_ignores_case() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let a = skinned(&ctx, &["Hips", "Spine", "Head"]);
        let b = skinned(&ctx, &["head", "hips", "tail"]);
        let mapping = a.get_skeleton_mapping(&AssetHandle::SkinnedModel(b.clone()), true);
        assert_eq!(&*mapping.node_mapping, &[1, -1, 0]);
        assert_eq!(a.find_node("hips"), -1);
        assert!(a.get_skeleton_mapping(&AssetHandle::SkinnedModel(b), false).node_mapping.len() == 3);
    }

    #[test]
    fn disabled_auto_retarget_without_rule_is_empty() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let a = skinned(&ctx, &["Hips"]);
        let b = skinned(&ctx, &["Hips"]);
        let mapping = a.get_skeleton_mapping(&AssetHandle::SkinnedModel(b), false);
        assert!(mapping.is_empty());
        assert_eq!(a.cached_mapping_count(), 0);
    }

    #[test]
    fn manual_rule_maps_by_name() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let a = skinned(&ctx, &["Hips", "Spine", "Arm_L"]);
        let b = skinned(&ctx, &["pelvis", "left_arm", "other"]);
        a.set_retargets(vec![SkeletonRetarget::new(b.id(), Guid::EMPTY)
            .with_mapping("Hips", "pelvis")
            .with_mapping("Arm_L", "left_arm")]);
        let mapping = a.get_skeleton_mapping(&AssetHandle::SkinnedModel(b), true);
        assert_eq!(&*mapping.node_mapping, &[0, -1, 1]);
    }

    #[test]
    fn reference_skeleton_chains_mappings() {
        let registry = AssetRegistry::new();
        let ctx = ModelContext::new(GraphicsDevice::new("test")).with_registry(Arc::clone(&registry));
        let a = skinned(&ctx, &["A_Root", "A_Arm"]);
        let reference = skinned(&ctx, &["root", "arm"]);
        registry.register(AssetHandle::SkinnedModel(reference.clone()));
        let anim = Animation::new(Guid::new_unique(), "wave", vec!["ARM".into(), "ROOT".into()]);
        a.set_retargets(vec![SkeletonRetarget::new(anim.id(), reference.id())
            .with_mapping("A_Root", "root")
            .with_mapping("A_Arm", "arm")]);
        let mapping = a.get_skeleton_mapping(&AssetHandle::Animation(anim), true);
        assert_eq!(&*mapping.node_mapping, &[1, 0]);
    }

    #[test]
    fn missing_reference_skeleton_gives_empty_mapping() {
        let ctx = ModelContext::new(GraphicsDevice::new("test")).with_registry(AssetRegistry::new());
        let a = skinned(&ctx, &["Hips"]);
        let anim = Animation::new(Guid::new_unique(), "run", vec!["Hips".into()]);
        a.set_retargets(vec![SkeletonRetarget::new(anim.id(), Guid::new_unique())]);
        assert!(a.get_skeleton_mapping(&AssetHandle::Animation(anim), true).is_empty());
    }

    #[test]
    fn source_reload_drops_cached_mapping() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let a = skinned(&ctx, &["Hips"]);
        let anim = Animation::new(Guid::new_unique(), "run", vec!["hips".into()]);
        let handle = AssetHandle::Animation(anim.clone());
        assert_eq!(&*a.get_skeleton_mapping(&handle, true).node_mapping, &[0]);
        assert_eq!(a.cached_mapping_count(), 1);
        assert!(anim.events().is_subscribed(a.id()));

        anim.set_channels(vec!["Other".into(), "Hips".into()]).unwrap();
        assert_eq!(a.cached_mapping_count(), 0);
        assert!(!anim.events().is_subscribed(a.id()));
        assert_eq!(&*a.get_skeleton_mapping(&handle, true).node_mapping, &[1]);
    }

    #[test]
    fn header_roundtrip_keeps_skeleton_and_blend_shapes() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let a = skinned(&ctx, &["Hips", "Spine"]);
        a.set_retargets(vec![SkeletonRetarget::new(Guid::from_u128(77), Guid::EMPTY).with_mapping("Hips", "pelvis")]);
        a.set_blend_shapes(0, 0, vec![BlendShape::new("Smile", vec![BlendShapeVertex::new(1, Vec3::y())])])
            .unwrap();

        let loaded = SkinnedModel::load(AssetStorage::from_packed(a.save().unwrap()), "loaded", &ctx).unwrap();
        assert_eq!(*loaded.skeleton(), *a.skeleton());
        assert_eq!(loaded.retargets(), a.retargets());
        assert_eq!(loaded.blend_shape_names(), vec!["Smile".to_string()]);
        assert!(loaded.setup_skeleton(nodes(&["X"])).is_err());

        loaded.load_all_lods().unwrap();
        let data = loaded.core().read();
        let mesh = data.mesh(0, 0).unwrap();
        assert_eq!(mesh.blend_shapes(), a.core().read().mesh(0, 0).unwrap().blend_shapes());
        assert!(mesh.mesh().is_initialized());
    }
}
