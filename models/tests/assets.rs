mod common;

use std::sync::Arc;

use redlilium_core::math::{Mat4, Vec3};
use redlilium_core::{Guid, Ray};
use redlilium_graphics::{
    MaterialDescriptor, MaterialDomain, PixelFormat, VertexAttribute, VertexAttributeSemantic,
    VertexLayout,
};
use redlilium_models::{
    Asset, AssetHandle, AssetRegistry, AssetStorage, MaterialSlot, MeshUpdate, Model, ModelBase, ModelContext,
    SkeletonRetarget, SkinnedModel,
};
use rstest::rstest;

use common::{context, grid, lod_model, skinned_model};

#[test]
fn virtual_model_bounds_and_raycast() {
    let ctx = context();
    let model = Model::new_virtual("triangle", &ctx);
    model.setup_lods(&[1]).unwrap();
    let positions = [Vec3::zeros(), Vec3::x(), Vec3::y()];
    model
        .update_mesh(0, 0, &MeshUpdate::new(&positions, &[0, 1, 2]))
        .unwrap();

    let bounds = model.bounds();
    assert_eq!(bounds.min, Vec3::zeros());
    assert_eq!(bounds.max, Vec3::new(1.0, 1.0, 0.0));

    let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::new(0.0, 0.0, -1.0));
    let (hit, mesh) = model.intersects(&ray, &Mat4::identity(), 0).unwrap();
    assert_eq!(mesh, 0);
    assert!((hit.distance - 1.0).abs() < 1e-6);
}

fn reload_model(ctx: &ModelContext, model: &Model) -> Arc<Model> {
    let storage = AssetStorage::from_packed(model.save().unwrap());
    Model::load(storage, "reloaded", ctx).unwrap()
}

#[test]
fn model_header_roundtrip() {
    let ctx = context();
    let model = lod_model(&ctx, &[0.7, 0.3, 0.05]);
    {
        let mut data = model.core().write();
        data.material_slots_mut().push(MaterialSlot::new("Trim"));
        data.mesh_mut(2, 0).unwrap().set_material_slot_index(1);
        data.set_min_screen_size(0.01);
    }
    let loaded = reload_model(&ctx, &model);

    let (a, b) = (model.core().read(), loaded.core().read());
    assert_eq!(a.lod_count(), b.lod_count());
    for (x, y) in a.screen_sizes().iter().zip(b.screen_sizes()) {
        assert!((x - y).abs() <= f32::EPSILON * x.abs());
    }
    assert_eq!(a.min_screen_size(), b.min_screen_size());
    let slots: Vec<_> = b.material_slots().iter().map(|s| s.name.clone()).collect();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[1], "Trim");
    for lod in 0..a.lod_count() {
        let (ma, mb) = (a.mesh(lod, 0).unwrap(), b.mesh(lod, 0).unwrap());
        assert_eq!(ma.material_slot_index(), mb.material_slot_index());
        assert_eq!(ma.bounds(), mb.bounds());
        assert_eq!(ma.sphere(), mb.sphere());
        assert!(!mb.is_initialized());
    }
}

#[test]
fn skinned_header_roundtrip() {
    let ctx = context();
    let (positions, indices) = grid(3, 1.0);
    let model = skinned_model(&ctx, &["Hips", "Spine", "Head"], 2, &positions, &indices);
    model.set_retargets(vec![SkeletonRetarget::new(Guid::new_unique(), Guid::EMPTY)
        .with_mapping("Hips", "pelvis")
        .with_mapping("Head", "head_end")]);

    let storage = AssetStorage::from_packed(model.save().unwrap());
    let loaded = SkinnedModel::load(storage, "reloaded", &ctx).unwrap();

    assert_eq!(*loaded.skeleton(), *model.skeleton());
    assert_eq!(loaded.retargets(), model.retargets());
    assert_eq!(loaded.lod_count(), 2);
    let (a, b) = (model.core().read(), loaded.core().read());
    for lod in 0..2 {
        let (ma, mb) = (a.mesh(lod, 0).unwrap().mesh(), b.mesh(lod, 0).unwrap().mesh());
        assert_eq!(ma.bounds(), mb.bounds());
        assert_eq!(ma.sphere(), mb.sphere());
    }
}

#[test]
fn stored_model_streams_mesh_data() {
    let ctx = context();
    let loaded = reload_model(&ctx, &lod_model(&ctx, &[0.5, 0.1]));
    assert_eq!(loaded.loaded_lods(), 0);
    assert!(!loaded.is_initialized());
    loaded.load_all_lods().unwrap();
    assert_eq!(loaded.loaded_lods(), 2);
    assert_eq!(loaded.highest_resident_lod(), 0);
    let data = loaded.core().read();
    assert_eq!(data.mesh(1, 0).unwrap().triangle_count(), 12);
}

#[test]
fn manual_retarget_rule() {
    let ctx = context();
    let (positions, indices) = grid(2, 1.0);
    let a = skinned_model(&ctx, &["Hips", "Spine", "Arm_L"], 1, &positions, &indices);
    let b = skinned_model(&ctx, &["pelvis", "left_arm", "other"], 1, &positions, &indices);
    a.set_retargets(vec![SkeletonRetarget::new(b.id(), Guid::EMPTY)
        .with_mapping("Hips", "pelvis")
        .with_mapping("Arm_L", "left_arm")]);

    let mapping = a.get_skeleton_mapping(&AssetHandle::SkinnedModel(b), true);
    assert_eq!(&*mapping.node_mapping, &[0, -1, 1]);
}

#[rstest]
#[case::identical(&["Root", "Arm"], &["Root", "Arm"], &[0, 1])]
#[case::case_differs(&["Root", "Arm"], &["ARM", "root"], &[1, 0])]
#[case::partial(&["Root", "Arm", "Leg"], &["leg", "tail"], &[-1, -1, 0])]
#[case::disjoint(&["Root"], &["Other"], &[-1])]
fn auto_retarget_matches_names_ignoring_case(
    #[case] target: &[&str],
    #[case] source: &[&str],
    #[case] expected: &[i32],
) {
    let ctx = context();
    let (positions, indices) = grid(2, 1.0);
    let a = skinned_model(&ctx, target, 1, &positions, &indices);
    let b = skinned_model(&ctx, source, 1, &positions, &indices);
    let mapping = a.get_skeleton_mapping(&AssetHandle::SkinnedModel(b.clone()), true);
    assert_eq!(&*mapping.node_mapping, expected);
    for (i, &j) in expected.iter().enumerate() {
        if j >= 0 {
            assert!(target[i].eq_ignore_ascii_case(source[j as usize]));
        }
    }
    // Lookup by name stays case-sensitive.
    assert_eq!(a.find_node(target[0]), 0);
    assert_eq!(a.find_node(&target[0].to_lowercase()), -1);
}

#[test]
fn vertex_layouts_are_interned() {
    let position = VertexAttribute::new(VertexAttributeSemantic::Position, PixelFormat::R32G32B32Float);
    let normal = VertexAttribute::new(VertexAttributeSemantic::Normal, PixelFormat::R10G10B10A2UNorm);

    let a = VertexLayout::get(&[position, normal], false).unwrap();
    let b = VertexLayout::get(&[position, normal], false).unwrap();
    let reordered = VertexLayout::get(&[normal, position], false).unwrap();
    let other = VertexLayout::get(&[position], false).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &reordered));
    assert!(!Arc::ptr_eq(&a, &other));
}

#[test]
fn material_slots_resolve_through_the_registry() {
    let registry = AssetRegistry::new();
    let ctx = context().with_registry(registry.clone());
    let body_id = Guid::new_unique();
    let trim_id = Guid::new_unique();
    let body = ctx
        .device
        .create_material(&MaterialDescriptor::new(MaterialDomain::Surface).with_label("Body"));
    registry.register_material(body_id, body.clone());

    let model = lod_model(&ctx, &[0.5]);
    {
        let mut data = model.core().write();
        data.material_slots_mut()[0].material_id = body_id;
        let mut trim = MaterialSlot::new("Trim");
        trim.material_id = trim_id;
        data.material_slots_mut().push(trim);
    }
    let storage = AssetStorage::from_packed(model.save().unwrap());
    let loaded = Model::load(storage, "slots", &ctx).unwrap();

    let slots = loaded.material_slots();
    assert!(Arc::ptr_eq(slots[0].material.as_ref().unwrap(), &body));
    assert!(slots[1].material.is_none());

    let trim = ctx.device.default_material();
    registry.register_material(trim_id, trim.clone());
    loaded.core().resolve_materials();
    assert!(Arc::ptr_eq(loaded.material_slots()[1].material.as_ref().unwrap(), &trim));
}
