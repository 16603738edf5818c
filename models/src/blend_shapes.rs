//! Per-instance blend-shape weights and the CPU deformer that applies them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use redlilium_core::math::{Vec3, Vec4};
use redlilium_graphics::VertexAttributeSemantic;

use crate::deformation::{DeformedMesh, MeshDeformation, MeshDeformationData, MeshDeformer};
use crate::mesh::vertex::{
    orthogonalize_tangent, pack_direction, pack_tangent_sign, tangent_sign, unpack_direction,
};
use crate::mesh::{BlendShape, MeshBufferType, MeshVariant, SkinnedMesh};
use crate::model_base::ModelBase;

type Weights = Arc<RwLock<HashMap<String, f32>>>;

/// Applies the active blend shapes of one instance to a skinned vertex buffer.
pub struct BlendShapeDeformer {
    weights: Weights,
}

impl BlendShapeDeformer {
    /// Active `(shape, effective weight)` pairs of a mesh.
    fn active<'a>(&self, shapes: &'a [BlendShape]) -> Vec<(&'a BlendShape, f32)> {
        let weights = self.weights.read();
        shapes
            .iter()
            .filter_map(|shape| {
                let w = weights.get(&shape.name).copied()? * shape.weight;
                (w != 0.0 && !shape.vertices.is_empty()).then_some((shape, w))
            })
            .collect()
    }
}

impl MeshDeformer for BlendShapeDeformer {
    fn deform(&self, mesh: &DeformedMesh<'_>, data: &mut MeshDeformationData) {
        let active = self.active(mesh.blend_shapes);
        if active.is_empty() {
            data.bounds = *mesh.mesh.bounds();
            return;
        }
        let vertex_count = data.vertex_buffer.vertex_count();
        let min = active.iter().map(|(s, _)| s.min_vertex_index).min().unwrap_or(0);
        let max = active
            .iter()
            .map(|(s, _)| s.max_vertex_index)
            .max()
            .unwrap_or(0)
            .min(vertex_count.saturating_sub(1));
        if vertex_count == 0 || min > max {
            return;
        }
        let use_normals = active.iter().any(|(s, _)| s.use_normals);

        let mut bounds = *mesh.mesh.bounds();
        {
            let mut positions = data.stream_mut(VertexAttributeSemantic::Position);
            for (shape, weight) in &active {
                let touched = shape.vertices.iter();
                for v in touched.filter(|v| (min..=max).contains(&v.vertex_index)) {
                    let p = positions.get_float3(v.vertex_index) + v.position_delta * *weight;
                    positions.set_float3(v.vertex_index, p);
                }
            }
            for i in min..=max {
                bounds.add_point(&positions.get_float3(i));
            }
        }

        if use_normals {
            let normals_stream = data.stream(VertexAttributeSemantic::Normal);
            if normals_stream.is_valid() {
                let format = normals_stream.format();
                let mut normals: Vec<Vec3> = (min..=max)
                    .map(|i| unpack_direction(format, normals_stream.get_float4(i)).xyz())
                    .collect();
                for (shape, weight) in active.iter().filter(|(s, _)| s.use_normals) {
                    let touched = shape.vertices.iter();
                    for v in touched.filter(|v| (min..=max).contains(&v.vertex_index)) {
                        normals[(v.vertex_index - min) as usize] += v.normal_delta * *weight;
                    }
                }
                for n in &mut normals {
                    *n = n.try_normalize(1e-8).unwrap_or_else(Vec3::z);
                }

                let mut out = data.stream_mut(VertexAttributeSemantic::Normal);
                for (i, n) in (min..=max).zip(&normals) {
                    let w = out.get_float4(i).w;
                    out.set_float4(i, pack_direction(format, Vec4::new(n.x, n.y, n.z, w)));
                }

                let mut tangents = data.stream_mut(VertexAttributeSemantic::Tangent);
                if tangents.is_valid() {
                    let format = tangents.format();
                    for (i, n) in (min..=max).zip(&normals) {
                        let raw = tangents.get_float4(i);
                        let sign = tangent_sign(format, raw.w);
                        let t = orthogonalize_tangent(n, &unpack_direction(format, raw).xyz());
                        let packed = pack_direction(format, Vec4::new(t.x, t.y, t.z, 0.0));
                        tangents.set_float4(
                            i,
                            Vec4::new(packed.x, packed.y, packed.z, pack_tangent_sign(format, sign)),
                        );
                    }
                }
            }
        }

        data.mark_dirty_range(min, max);
        data.bounds = bounds;
    }
}

/// Blend-shape weights of one skinned model instance.
///
/// [`update`](Self::update) keeps one shared [`BlendShapeDeformer`] bound to
/// every mesh that has a shape named in the weight table.
pub struct BlendShapesInstance {
    weights: Weights,
    deformer: Arc<BlendShapeDeformer>,
    bound: HashSet<(u8, u16)>,
    changed: bool,
}

impl Default for BlendShapesInstance {
    fn default() -> Self {
        let weights: Weights = Arc::default();
        Self {
            deformer: Arc::new(BlendShapeDeformer {
                weights: Arc::clone(&weights),
            }),
            weights,
            bound: HashSet::new(),
            changed: false,
        }
    }
}

impl BlendShapesInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance weight of every shape called `name`. Clamped to `[-1, 1]`.
    pub fn set_weight(&mut self, name: impl Into<String>, weight: f32) {
        let weight = weight.clamp(-1.0, 1.0);
        let previous = self.weights.write().insert(name.into(), weight);
        if previous != Some(weight) {
            self.changed = true;
        }
    }

    pub fn weight(&self, name: &str) -> f32 {
        self.weights.read().get(name).copied().unwrap_or(0.0)
    }

    /// Forget the weight of `name`; meshes only using it get their pristine buffers back.
    pub fn reset_weight(&mut self, name: &str) {
        if self.weights.write().remove(name).is_some() {
            self.changed = true;
        }
    }

    pub fn clear(&mut self) {
        let mut weights = self.weights.write();
        if !weights.is_empty() {
            weights.clear();
            self.changed = true;
        }
    }

    pub fn weights(&self) -> Vec<(String, f32)> {
        let mut out: Vec<_> = self
            .weights
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.weights.read().is_empty()
    }

    /// Bind the deformer to meshes with referenced shapes and unbind it from the rest.
    pub fn update<T>(&mut self, model: &T, deformation: &mut MeshDeformation)
    where
        T: ModelBase<Mesh = SkinnedMesh> + ?Sized,
    {
        let data = model.core().read();
        let mut used = HashSet::new();
        {
            let weights = self.weights.read();
            for lod in data.lods() {
                for mesh in lod.meshes() {
                    if !mesh.blend_shapes().iter().any(|s| weights.contains_key(&s.name)) {
                        continue;
                    }
                    let base = mesh.base();
                    used.insert((base.lod_index(), base.index()));
                }
            }
        }

        let target: Arc<dyn MeshDeformer> = self.deformer.clone();
        for &(lod, mesh) in &used {
            if self.bound.contains(&(lod, mesh)) {
                if self.changed {
                    deformation.dirty(lod, mesh, MeshBufferType::Vertex0);
                }
            } else {
                deformation.add_deformer(lod, mesh, MeshBufferType::Vertex0, Arc::clone(&target));
            }
        }
        for &(lod, mesh) in self.bound.difference(&used) {
            deformation.remove_deformer(lod, mesh, MeshBufferType::Vertex0, &target);
        }
        self.bound = used;
        self.changed = false;
    }

    /// Number of meshes the deformer is bound to.
    pub fn bound_mesh_count(&self) -> usize {
        self.bound.len()
    }
}

impl std::fmt::Debug for BlendShapesInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlendShapesInstance")
            .field("weights", &self.weights())
            .field("bound", &self.bound.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{BlendShapeVertex, MeshUpdate};
    use redlilium_graphics::GraphicsDevice;

    fn skinned_mesh(device: &Arc<GraphicsDevice>) -> SkinnedMesh {
        let positions: Vec<Vec3> = (0..8).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        let triangles = [0, 1, 2, 2, 3, 4, 4, 5, 6, 6, 7, 0];
        let normals = vec![Vec3::z(); 8];
        let indices = vec![[0u32; 4]; 8];
        let weights = vec![Vec4::new(1.0, 0.0, 0.0, 0.0); 8];
        let accessor = MeshUpdate::new(&positions, &triangles)
            .with_normals(&normals)
            .with_skinning(&indices, &weights)
            .to_accessor(true)
            .unwrap();
        let mut mesh = SkinnedMesh::new(0, 0);
        mesh.update(&accessor, device, true, true).unwrap();
        mesh
    }

    fn deform(mesh: &SkinnedMesh, deformation: &mut MeshDeformation) {
        let device = GraphicsDevice::new("deform");
        let target = DeformedMesh {
            mesh: mesh.mesh(),
            blend_shapes: mesh.blend_shapes(),
        };
        let mut vb = mesh.mesh().vertex_buffer(0).cloned();
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
    }

    fn bind(instance: &BlendShapesInstance, deformation: &mut MeshDeformation) {
        deformation.add_deformer(0, 0, MeshBufferType::Vertex0, instance.deformer.clone());
    }

    #[test]
    fn smile_moves_only_its_vertex() {
        let device = GraphicsDevice::new("test");
        let mut mesh = skinned_mesh(&device);
        mesh.set_blend_shapes(vec![BlendShape::new(
            "Smile",
            vec![BlendShapeVertex::new(5, Vec3::new(0.0, 0.1, 0.0))],
        )])
        .unwrap();
        let mut instance = BlendShapesInstance::new();
        instance.set_weight("Smile", 1.0);
        let mut deformation = MeshDeformation::new();
        bind(&instance, &mut deformation);
        deform(&mesh, &mut deformation);

        let entry = deformation.entry(0, 0, MeshBufferType::Vertex0).unwrap();
        assert_eq!((entry.dirty_min, entry.dirty_max), (5, 5));
        let positions = entry.stream(VertexAttributeSemantic::Position);
        for i in 0..8 {
            let expected = if i == 5 {
                Vec3::new(5.0, 0.1, 0.0)
            } else {
                Vec3::new(i as f32, 0.0, 0.0)
            };
            assert!((positions.get_float3(i) - expected).norm() < 1e-6, "vertex {i}");
        }
    }

    #[test]
    fn zero_weights_keep_pristine_bytes() {
        let device = GraphicsDevice::new("test");
        let mut mesh = skinned_mesh(&device);
        mesh.set_blend_shapes(vec![BlendShape::new(
            "Blink",
            vec![
                BlendShapeVertex::new(1, Vec3::y()).with_normal_delta(Vec3::x()),
                BlendShapeVertex::new(2, Vec3::y()),
            ],
        )])
        .unwrap();
        let mut instance = BlendShapesInstance::new();
        instance.set_weight("Blink", 1.0);
        let mut deformation = MeshDeformation::new();
        bind(&instance, &mut deformation);
        deform(&mesh, &mut deformation);

        instance.set_weight("Blink", 0.0);
        deformation.dirty(0, 0, MeshBufferType::Vertex0);
        deform(&mesh, &mut deformation);

        let entry = deformation.entry(0, 0, MeshBufferType::Vertex0).unwrap();
        let pristine = mesh.mesh().cpu_data(MeshBufferType::Vertex0).unwrap();
        assert_eq!(entry.vertex_buffer.data.as_slice(), &pristine[..]);
        assert!(!entry.has_dirty_range());
    }

    #[test]
    fn normal_deltas_are_renormalized() {
        let device = GraphicsDevice::new("test");
        let mut mesh = skinned_mesh(&device);
        mesh.set_blend_shapes(vec![BlendShape::new(
            "Bend",
            vec![BlendShapeVertex::new(3, Vec3::zeros()).with_normal_delta(Vec3::new(1.0, 0.0, -1.0))],
        )])
        .unwrap();
        let mut instance = BlendShapesInstance::new();
        instance.set_weight("Bend", 1.0);
        let mut deformation = MeshDeformation::new();
        bind(&instance, &mut deformation);
        deform(&mesh, &mut deformation);

        let entry = deformation.entry(0, 0, MeshBufferType::Vertex0).unwrap();
        let stream = entry.stream(VertexAttributeSemantic::Normal);
        let n = unpack_direction(stream.format(), stream.get_float4(3)).xyz();
        assert!((n - Vec3::x()).norm() < 0.01);
        let tangents = entry.stream(VertexAttributeSemantic::Tangent);
        let t = unpack_direction(tangents.format(), tangents.get_float4(3)).xyz();
        assert!(t.dot(&n).abs() < 0.01);
    }

    #[test]
    fn deltas_outside_the_shape_range_are_skipped() {
        let device = GraphicsDevice::new("test");
        let mesh = skinned_mesh(&device);
        let mut shape = BlendShape::new(
            "Corrupt",
            vec![
                BlendShapeVertex::new(2, Vec3::y()).with_normal_delta(Vec3::x()),
                BlendShapeVertex::new(5, Vec3::y()).with_normal_delta(Vec3::x()),
            ],
        );
        shape.min_vertex_index = 4;
        shape.max_vertex_index = 6;
        assert!(shape.validate(8).is_err());
        let shapes = [shape];

        let mut instance = BlendShapesInstance::new();
        instance.set_weight("Corrupt", 1.0);
        let mut deformation = MeshDeformation::new();
        bind(&instance, &mut deformation);
        let target = DeformedMesh {
            mesh: mesh.mesh(),
            blend_shapes: &shapes,
        };
        let mut vb = mesh.mesh().vertex_buffer(0).cloned();
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();

        let entry = deformation.entry(0, 0, MeshBufferType::Vertex0).unwrap();
        let positions = entry.stream(VertexAttributeSemantic::Position);
        assert!((positions.get_float3(2) - Vec3::new(2.0, 0.0, 0.0)).norm() < 1e-6);
        assert!((positions.get_float3(5) - Vec3::new(5.0, 1.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn weights_are_clamped_and_sorted() {
        let mut instance = BlendShapesInstance::new();
        instance.set_weight("b", 3.0);
        instance.set_weight("a", -0.5);
        assert_eq!(
            instance.weights(),
            vec![("a".to_string(), -0.5), ("b".to_string(), 1.0)]
        );
        instance.reset_weight("a");
        assert_eq!(instance.weight("a"), 0.0);
        instance.clear();
        assert!(instance.is_empty());
    }
}
