//! Per-instance state of a placed model and its draw path.

use std::sync::Arc;

use redlilium_core::math::{Mat4, Vec3};
use redlilium_core::{BoundingBox, BoundingSphere, Ray, Transform};
use redlilium_graphics::{
    DrawPass, LightmapInfo, Material, RenderContext, ShadowsCastingMode, StaticFlags,
};

use crate::asset::Asset;
use crate::blend_shapes::BlendShapesInstance;
use crate::cloth::{ClothActor, ClothBackend};
use crate::deformation::MeshDeformation;
use crate::error::ClothError;
use crate::lod_selection::{LodTransitionState, apply_lod_bias};
use crate::mesh::{MeshDrawInfo, MeshHit};
use crate::model::Model;
use crate::model_base::ModelBase;
use crate::skinned_model::SkinnedModel;

/// Per-instance override of one material slot.
#[derive(Debug, Clone)]
pub struct ModelInstanceEntry {
    /// Replaces the slot material when set.
    pub material: Option<Arc<Material>>,
    /// Intersected with the slot's own mode.
    pub shadows_mode: ShadowsCastingMode,
    pub visible: bool,
}

impl Default for ModelInstanceEntry {
    fn default() -> Self {
        Self {
            material: None,
            shadows_mode: ShadowsCastingMode::ALL,
            visible: true,
        }
    }
}

/// Asset drawn by a [`ModelInstance`].
#[derive(Clone)]
pub enum InstanceModel {
    Static(Arc<Model>),
    Skinned(Arc<SkinnedModel>),
}

impl From<Arc<Model>> for InstanceModel {
    fn from(model: Arc<Model>) -> Self {
        Self::Static(model)
    }
}

impl From<Arc<SkinnedModel>> for InstanceModel {
    fn from(model: Arc<SkinnedModel>) -> Self {
        Self::Skinned(model)
    }
}

macro_rules! with_model {
    ($model:expr, $m:ident => $body:expr) => {
        match $model {
            InstanceModel::Static($m) => $body,
            InstanceModel::Skinned($m) => $body,
        }
    };
}

impl std::fmt::Debug for InstanceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(m) => f.debug_tuple("Static").field(&m.name()).finish(),
            Self::Skinned(m) => f.debug_tuple("Skinned").field(&m.name()).finish(),
        }
    }
}

/// A model placed in the world.
///
/// Owns everything that varies per placement: the transform, material
/// overrides, the LOD transition history, deformers, blend-shape weights,
/// the skinning pose and attached cloth.
pub struct ModelInstance {
    model: InstanceModel,
    transform: Transform,
    prev_world: Option<Mat4>,
    entries: Vec<ModelInstanceEntry>,
    lod_state: LodTransitionState,
    /// Added to the view bias after LOD selection.
    pub lod_bias: i32,
    /// Draw this LOD regardless of screen size; `-1` selects automatically.
    pub forced_lod: i32,
    pub draw_modes: DrawPass,
    pub static_flags: StaticFlags,
    pub receive_decals: bool,
    pub per_instance_random: f32,
    pub sort_order: i16,
    pub lightmap: Option<LightmapInfo>,
    deformation: MeshDeformation,
    blend_shapes: BlendShapesInstance,
    pose: Vec<Mat4>,
    palette: Option<Arc<[Mat4]>>,
    cloths: Vec<ClothActor>,
}

impl ModelInstance {
    pub fn new(model: impl Into<InstanceModel>) -> Self {
        let model = model.into();
        let entries = with_model!(&model, m => vec![ModelInstanceEntry::default(); m.material_slots().len()]);
        let mut instance = Self {
            model,
            transform: Transform::identity(),
            prev_world: None,
            entries,
            lod_state: LodTransitionState::new(),
            lod_bias: 0,
            forced_lod: -1,
            draw_modes: DrawPass::DEFAULT,
            static_flags: StaticFlags::empty(),
            receive_decals: true,
            per_instance_random: 0.0,
            sort_order: 0,
            lightmap: None,
            deformation: MeshDeformation::new(),
            blend_shapes: BlendShapesInstance::new(),
            pose: Vec::new(),
            palette: None,
            cloths: Vec::new(),
        };
        instance.reset_pose();
        instance
    }

    pub fn model(&self) -> &InstanceModel {
        &self.model
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn world(&self) -> Mat4 {
        self.transform.to_matrix()
    }

    /// World matrix of the last drawn frame.
    pub fn prev_world(&self) -> Option<Mat4> {
        self.prev_world
    }

    /// Move the instance. Cloth particles keep their world positions.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        for cloth in &mut self.cloths {
            cloth.set_transform(transform, false);
        }
    }

    /// Move the instance without motion: cloth follows rigidly and motion
    /// vectors restart from the new position.
    pub fn teleport(&mut self, transform: Transform) {
        self.transform = transform;
        self.prev_world = None;
        for cloth in &mut self.cloths {
            cloth.set_transform(transform, true);
        }
    }

    pub fn entries(&self) -> &[ModelInstanceEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<ModelInstanceEntry> {
        &mut self.entries
    }

    /// Resize the entries to the model's material slots, keeping existing overrides.
    pub fn sync_entries(&mut self) {
        let count = with_model!(&self.model, m => m.material_slots().len());
        self.entries.resize_with(count, ModelInstanceEntry::default);
    }

    pub fn lod_state(&self) -> &LodTransitionState {
        &self.lod_state
    }

    pub fn deformation(&self) -> &MeshDeformation {
        &self.deformation
    }

    pub fn deformation_mut(&mut self) -> &mut MeshDeformation {
        &mut self.deformation
    }

    pub fn blend_shapes(&self) -> &BlendShapesInstance {
        &self.blend_shapes
    }

    pub fn set_blend_shape_weight(&mut self, name: impl Into<String>, weight: f32) {
        self.blend_shapes.set_weight(name, weight);
    }

    pub fn reset_blend_shape_weight(&mut self, name: &str) {
        self.blend_shapes.reset_weight(name);
    }

    /// Node matrices in model space.
    pub fn pose(&self) -> &[Mat4] {
        &self.pose
    }

    /// Bone matrices sent with every draw of a skinned model.
    pub fn skinning_palette(&self) -> Option<&Arc<[Mat4]>> {
        self.palette.as_ref()
    }

    /// Set the model-space node matrices and rebuild the skinning palette.
    /// Ignored for static models.
    pub fn set_pose(&mut self, node_pose: Vec<Mat4>) {
        let InstanceModel::Skinned(model) = &self.model else {
            return;
        };
        let palette = model.skeleton().skinning_palette(&node_pose);
        self.palette = Some(palette.into());
        self.pose = node_pose;
    }

    /// Return to the skeleton's bind pose.
    pub fn reset_pose(&mut self) {
        let InstanceModel::Skinned(model) = &self.model else {
            return;
        };
        let pose = model.skeleton().bind_pose();
        self.set_pose(pose);
    }

    /// Attach a cloth to mesh `(lod_index, mesh_index)`.
    ///
    /// A cloth that fails to build stays attached but dormant and the mesh
    /// renders undeformed.
    pub fn add_cloth(
        &mut self,
        lod_index: u8,
        mesh_index: u16,
        backend: Arc<dyn ClothBackend>,
    ) -> Result<&mut ClothActor, ClothError> {
        let settings = with_model!(&self.model, m => m.core().settings().cloth.clone());
        let mut actor = ClothActor::new(lod_index, mesh_index, backend, &settings);
        actor.set_transform(self.transform, true);
        let result = with_model!(&self.model, m => actor.build(&**m, &mut self.deformation));
        if let Err(e) = &result {
            log::warn!(
                "Cloth on mesh {mesh_index} of LOD {lod_index} of '{}' is dormant: {e}",
                with_model!(&self.model, m => m.name())
            );
        }
        self.cloths.push(actor);
        result?;
        let index = self.cloths.len() - 1;
        Ok(&mut self.cloths[index])
    }

    /// Repaint cloth `index` and rebuild it so the fixed set follows the paint.
    pub fn set_cloth_paint(&mut self, index: usize, paint: Vec<f32>) -> Result<(), ClothError> {
        let Some(cloth) = self.cloths.get_mut(index) else {
            return Err(ClothError::Backend(format!("no cloth at index {index}")));
        };
        cloth.set_paint(paint)?;
        with_model!(&self.model, m => cloth.build(&**m, &mut self.deformation))
    }

    /// Rebuild every cloth, e.g. after the paint or the mesh changed.
    pub fn rebuild_cloths(&mut self) {
        for cloth in &mut self.cloths {
            let result = with_model!(&self.model, m => cloth.build(&**m, &mut self.deformation));
            if let Err(e) = result {
                log::warn!("Cloth rebuild failed: {e}");
            }
        }
    }

    pub fn remove_cloths(&mut self) {
        for mut cloth in self.cloths.drain(..) {
            cloth.destroy(&mut self.deformation);
        }
    }

    pub fn cloths(&self) -> &[ClothActor] {
        &self.cloths
    }

    pub fn cloths_mut(&mut self) -> &mut [ClothActor] {
        &mut self.cloths
    }

    /// Prepare the cloths for a physics step. Returns how many simulate.
    pub fn pre_physics(&mut self, view_positions: &[Vec3]) -> usize {
        let palette = self.palette.clone();
        let mut simulating = 0;
        for cloth in &mut self.cloths {
            cloth.update_view_distance(view_positions);
            if cloth.pre_update(palette.as_deref()) {
                simulating += 1;
            }
        }
        simulating
    }

    /// Feed the simulated cloths back into the deformed buffers.
    pub fn post_physics(&mut self) {
        for cloth in &mut self.cloths {
            cloth.post_update(&mut self.deformation);
        }
    }

    /// Model bounds grown by deformed vertices, in model space.
    pub fn local_bounds(&self) -> BoundingBox {
        with_model!(&self.model, m => self.local_bounds_of(&**m))
    }

    fn local_bounds_of<T: ModelBase + ?Sized>(&self, model: &T) -> BoundingBox {
        (0..model.lod_count())
            .filter_map(|lod| self.deformation.bounds(lod as u8))
            .fold(model.bounds(), |acc, b| acc.merge(&b))
    }

    pub fn world_bounds(&self) -> BoundingBox {
        self.cloths
            .iter()
            .map(ClothActor::world_bounds)
            .filter(|b| !b.is_empty())
            .fold(self.local_bounds().transformed(&self.world()), |acc, b| acc.merge(&b))
    }

    /// Closest hit against the last drawn LOD and the attached cloths.
    pub fn intersects(&self, ray: &Ray) -> Option<MeshHit> {
        let world = self.world();
        let lod = match usize::try_from(self.lod_state.prev_lod) {
            Ok(lod) => lod,
            Err(_) => with_model!(&self.model, m => m.highest_resident_lod()),
        };
        let model_hit = with_model!(&self.model, m => m.intersects(ray, &world, lod)).map(|(hit, _)| hit);
        self.cloths
            .iter()
            .filter_map(|c| c.intersects(ray))
            .map(|(distance, normal)| MeshHit { distance, normal })
            .chain(model_hit)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Select the LOD, advance the transition and submit the draw calls.
    /// Returns the number of draw calls added to `ctx`.
    pub fn draw(&mut self, ctx: &mut RenderContext) -> usize {
        let model = self.model.clone();
        if let InstanceModel::Skinned(skinned) = &model {
            self.blend_shapes.update(&**skinned, &mut self.deformation);
        }
        with_model!(&model, m => self.draw_model(&**m, ctx))
    }

    fn draw_model<T: ModelBase + ?Sized>(&mut self, model: &T, ctx: &mut RenderContext) -> usize {
        if !model.is_initialized() {
            return 0;
        }
        let world = self.world();
        let prev_world = self.prev_world.unwrap_or(world);

        let lod_count = model.lod_count();
        let highest_resident = model.highest_resident_lod();
        let lod = if self.forced_lod >= 0 {
            apply_lod_bias(self.forced_lod, 0, lod_count, highest_resident)
        } else {
            let sphere = BoundingSphere::from_box(&self.world_bounds());
            let lod = model.compute_lod(&sphere, &ctx.view);
            apply_lod_bias(lod, ctx.view.model_lod_bias + self.lod_bias, lod_count, highest_resident)
        };

        let single_frame = ctx.view.is_single_frame;
        let increment = model.core().settings().lod_transition_increment;
        let submission = self.lod_state.update(lod, ctx.frame, single_frame, increment);

        let device = Arc::clone(model.core().device());
        let material_slots = model.material_slots();
        let mut submitted = 0;
        for draw in submission.draws() {
            let mut info = MeshDrawInfo::new(&device, world);
            info.prev_world = prev_world;
            info.material_slots = &material_slots;
            info.entries = &self.entries;
            info.deformation = Some(&mut self.deformation);
            info.lightmap = self.lightmap;
            info.skinning_palette = self.palette.clone();
            info.draw_modes = self.draw_modes;
            info.static_flags = self.static_flags;
            info.receive_decals = self.receive_decals;
            info.per_instance_random = self.per_instance_random;
            info.sort_order = self.sort_order;
            submitted += model.draw_lod(ctx, draw.lod, &mut info, draw.dither);
        }

        if !single_frame {
            self.prev_world = Some(world);
        }
        submitted
    }
}

impl Drop for ModelInstance {
    fn drop(&mut self) {
        self.remove_cloths();
    }
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("model", &self.model)
            .field("transform", &self.transform)
            .field("lod_state", &self.lod_state)
            .field("entries", &self.entries.len())
            .field("cloths", &self.cloths.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloth::SimpleClothBackend;
    use crate::mesh::{BlendShape, BlendShapeVertex, MeshUpdate};
    use crate::model_base::ModelContext;
    use crate::skeleton::SkeletonNode;
    use redlilium_core::math::Vec4;
    use redlilium_graphics::{GraphicsDevice, RenderView};

    fn ctx() -> ModelContext {
        ModelContext::new(GraphicsDevice::new("test"))
    }

    fn view() -> RenderView {
        let mut projection = Mat4::identity();
        projection[(3, 2)] = -1.0;
        projection[(3, 3)] = 0.0;
        RenderView::new(Vec3::zeros(), Mat4::identity(), projection)
    }

    fn two_lod_model(ctx: &ModelContext) -> Arc<Model> {
        let model = Model::new_virtual("quad", ctx);
        model.setup_lods(&[1, 1]).unwrap();
        let positions = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        for lod in 0..2 {
            model
                .update_mesh(lod, 0, &MeshUpdate::new(&positions, &[0, 1, 2, 0, 2, 3]))
                .unwrap();
        }
        {
            let mut data = model.core().write();
            data.set_screen_size(0, 0.5);
            data.set_screen_size(1, 0.1);
        }
        model
    }

    fn at_distance(distance: f32) -> Transform {
        Transform::from_translation(Vec3::new(0.0, 0.0, -distance))
    }

    #[test]
    fn near_instance_draws_lod0_without_dither() {
        let ctx = ctx();
        let mut instance = ModelInstance::new(two_lod_model(&ctx));
        instance.set_transform(at_distance(1.0));
        let mut render = RenderContext::new(view(), 0);
        assert_eq!(instance.draw(&mut render), 1);
        let call = &render.list.draw_calls[0];
        assert_eq!(call.lod_index, 0);
        assert_eq!(call.surface.lod_dither_factor, 0.0);
        assert_eq!(instance.prev_world(), Some(instance.world()));
    }

    #[test]
    fn moving_away_crossfades_between_lods() {
        let ctx = ctx();
        let mut instance = ModelInstance::new(two_lod_model(&ctx));
        instance.set_transform(at_distance(1.0));
        instance.draw(&mut RenderContext::new(view(), 0));

        instance.set_transform(at_distance(20.0));
        let mut render = RenderContext::new(view(), 1);
        assert_eq!(instance.draw(&mut render), 2);
        let lods: Vec<_> = render.list.draw_calls.iter().map(|c| c.lod_index).collect();
        assert_eq!(lods, vec![0, 1]);
        let sum: f32 = render
            .list
            .draw_calls
            .iter()
            .map(|c| c.surface.lod_dither_factor.abs())
            .sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(render.list.draw_calls[1].surface.prev_world, at_distance(1.0).to_matrix());
    }

    #[test]
    fn forced_lod_and_hidden_entries() {
        let ctx = ctx();
        let mut instance = ModelInstance::new(two_lod_model(&ctx));
        instance.set_transform(at_distance(1.0));
        instance.forced_lod = 1;
        let mut render = RenderContext::new(view(), 0);
        assert_eq!(instance.draw(&mut render), 1);
        assert_eq!(render.list.draw_calls[0].lod_index, 1);

        instance.entries_mut()[0].visible = false;
        let mut render = RenderContext::new(view(), 1);
        assert_eq!(instance.draw(&mut render), 0);
    }

    #[test]
    fn tiny_instance_is_culled() {
        let ctx = ctx();
        let model = two_lod_model(&ctx);
        model.core().write().set_min_screen_size(0.2);
        let mut instance = ModelInstance::new(model);
        instance.set_transform(at_distance(100.0));
        let mut render = RenderContext::new(view(), 0);
        assert_eq!(instance.draw(&mut render), 0);
        assert_eq!(instance.lod_state().prev_lod, -1);
    }

    #[test]
    fn single_frame_view_keeps_history() {
        let ctx = ctx();
        let mut instance = ModelInstance::new(two_lod_model(&ctx));
        let mut probe = view();
        probe.is_single_frame = true;
        let mut render = RenderContext::new(probe, 0);
        assert_eq!(instance.draw(&mut render), 1);
        assert_eq!(instance.prev_world(), None);
        assert_eq!(*instance.lod_state(), LodTransitionState::new());
    }

    fn skinned(ctx: &ModelContext) -> Arc<SkinnedModel> {
        let model = SkinnedModel::new_virtual("skinned", ctx);
        model.setup_lods(&[1]).unwrap();
        model
            .setup_skeleton(vec![
                SkeletonNode::new("Root", -1, Transform::identity()),
                SkeletonNode::new("Arm", 0, Transform::from_translation(Vec3::x())),
            ])
            .unwrap();
        let positions: Vec<Vec3> = (0..6).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        let bones = [[0u32, 0, 0, 0]; 6];
        let weights = [Vec4::new(1.0, 0.0, 0.0, 0.0); 6];
        model
            .update_mesh(
                0,
                0,
                &MeshUpdate::new(&positions, &[0, 1, 2, 3, 4, 5]).with_skinning(&bones, &weights),
            )
            .unwrap();
        model
            .set_blend_shapes(
                0,
                0,
                vec![BlendShape::new(
                    "Smile",
                    vec![BlendShapeVertex::new(5, Vec3::new(0.0, 0.1, 0.0))],
                )],
            )
            .unwrap();
        model
    }

    #[test]
    fn skinned_instance_carries_palette_and_blend_shapes() {
        let ctx = ctx();
        let model = skinned(&ctx);
        let mut instance = ModelInstance::new(model.clone());
        assert_eq!(instance.skinning_palette().map(|p| p.len()), Some(2));

        instance.set_blend_shape_weight("Smile", 1.0);
        instance.set_transform(at_distance(1.0));
        let mut render = RenderContext::new(view(), 0);
        assert_eq!(instance.draw(&mut render), 1);
        let call = &render.list.draw_calls[0];
        assert_eq!(call.surface.skinning_palette.as_ref().map(|p| p.len()), Some(2));
        assert_eq!(instance.blend_shapes().bound_mesh_count(), 1);
        let original = model.core().read().mesh(0, 0).unwrap().mesh().vertex_buffer(0).cloned();
        assert!(!Arc::ptr_eq(call.vertex_buffers[0].as_ref().unwrap(), original.as_ref().unwrap()));

        let moved = vec![Mat4::new_translation(&Vec3::y()); 2];
        instance.set_pose(moved);
        let palette = instance.skinning_palette().unwrap();
        assert!((palette[0][(1, 3)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cloth_is_released_with_the_instance() {
        let ctx = ctx();
        let model = two_lod_model(&ctx);
        let backend = Arc::new(SimpleClothBackend::new());
        {
            let mut instance = ModelInstance::new(model.clone());
            let cloth = instance.add_cloth(0, 0, backend.clone()).unwrap();
            cloth.set_paint(vec![1.0; 4]).unwrap();
            assert_eq!(backend.cloth_count(), 1);
            assert!(instance.intersects(&Ray::new(Vec3::new(0.25, 0.25, 2.0), -Vec3::z())).is_some());
        }
        assert_eq!(backend.cloth_count(), 0);
    }
}
