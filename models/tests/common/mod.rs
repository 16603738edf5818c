//! Fixtures shared by the model integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_core::math::{Mat4, Vec3, Vec4};
use redlilium_core::Transform;
use redlilium_graphics::{GraphicsDevice, RenderView};
use redlilium_models::{MeshUpdate, Model, ModelBase, ModelContext, SkeletonNode, SkinnedModel};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context() -> ModelContext {
    init_logging();
    ModelContext::new(GraphicsDevice::new("integration"))
}

/// Perspective-like view at the origin: a unit sphere at distance `d`
/// has screen size `1 / d`.
pub fn view() -> RenderView {
    let mut projection = Mat4::identity();
    projection[(3, 2)] = -1.0;
    projection[(3, 3)] = 0.0;
    RenderView::new(Vec3::zeros(), Mat4::identity(), projection)
}

/// Placement of an object whose bounds circumscribe a unit sphere so that it
/// projects to `screen_size`.
pub fn placed_for_screen_size(screen_size: f32) -> Transform {
    Transform::from_translation(Vec3::new(0.0, 0.0, -1.0 / screen_size))
}

/// Cube whose circumscribed sphere has radius 1.
pub fn unit_sphere_cube() -> (Vec<Vec3>, Vec<u32>) {
    let a = 1.0 / 3.0f32.sqrt();
    let positions = vec![
        Vec3::new(-a, -a, -a),
        Vec3::new(a, -a, -a),
        Vec3::new(a, a, -a),
        Vec3::new(-a, a, -a),
        Vec3::new(-a, -a, a),
        Vec3::new(a, -a, a),
        Vec3::new(a, a, a),
        Vec3::new(-a, a, a),
    ];
    let indices = vec![
        0, 2, 1, 0, 3, 2, 4, 5, 6, 4, 6, 7, 0, 1, 5, 0, 5, 4, 3, 7, 6, 3, 6, 2, 0, 4, 7, 0, 7, 3,
        1, 2, 6, 1, 6, 5,
    ];
    (positions, indices)
}

/// Virtual model with one cube mesh per LOD and the given screen sizes.
pub fn lod_model(ctx: &ModelContext, screen_sizes: &[f32]) -> Arc<Model> {
    let model = Model::new_virtual("lods", ctx);
    model.setup_lods(&vec![1; screen_sizes.len()]).unwrap();
    let (positions, indices) = unit_sphere_cube();
    for lod in 0..screen_sizes.len() {
        model
            .update_mesh(lod, 0, &MeshUpdate::new(&positions, &indices))
            .unwrap();
    }
    let mut data = model.core().write();
    for (lod, size) in screen_sizes.iter().enumerate() {
        data.set_screen_size(lod, *size);
    }
    drop(data);
    model
}

/// `n x n` vertices in the XZ plane, row `r` at `z = r * spacing`.
pub fn grid(n: usize, spacing: f32) -> (Vec<Vec3>, Vec<u32>) {
    let positions = (0..n)
        .flat_map(|row| (0..n).map(move |col| Vec3::new(col as f32 * spacing, 0.0, row as f32 * spacing)))
        .collect();
    let mut indices = Vec::new();
    for row in 0..n - 1 {
        for col in 0..n - 1 {
            let i = (row * n + col) as u32;
            let n = n as u32;
            indices.extend_from_slice(&[i, i + n, i + 1, i + 1, i + n, i + n + 1]);
        }
    }
    (positions, indices)
}

pub fn nodes(names: &[&str]) -> Vec<SkeletonNode> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let parent = if i == 0 { -1 } else { 0 };
            SkeletonNode::new(*name, parent, Transform::from_translation(Vec3::new(0.0, i as f32, 0.0)))
        })
        .collect()
}

/// Virtual skinned model: every LOD holds the given mesh fully weighted to bone 0.
pub fn skinned_model(
    ctx: &ModelContext,
    names: &[&str],
    lods: usize,
    positions: &[Vec3],
    indices: &[u32],
) -> Arc<SkinnedModel> {
    let model = SkinnedModel::new_virtual("skinned", ctx);
    model.setup_lods(&vec![1; lods]).unwrap();
    model.setup_skeleton(nodes(names)).unwrap();
    let bones = vec![[0u32; 4]; positions.len()];
    let weights = vec![Vec4::new(1.0, 0.0, 0.0, 0.0); positions.len()];
    let normals = vec![Vec3::y(); positions.len()];
    for lod in 0..lods {
        model
            .update_mesh(
                lod,
                0,
                &MeshUpdate::new(positions, indices)
                    .with_normals(&normals)
                    .with_skinning(&bones, &weights),
            )
            .unwrap();
    }
    model
}
