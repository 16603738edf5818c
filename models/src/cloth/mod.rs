//! Cloth simulated on one mesh of a model instance.
//!
//! A [`ClothActor`] builds a cloth from the CPU data of `(lod, mesh)`, hands
//! it to a [`ClothBackend`] and registers a deformer that writes the
//! simulated particles into the instance's dynamic vertex buffers. Vertices
//! painted below the fixed threshold are pinned; on skinned meshes they follow
//! the current pose.

mod backend;
mod simple;

use std::sync::Arc;

use parking_lot::RwLock;
use redlilium_core::bounds::{ray_triangle, triangle_area, triangle_normal};
use redlilium_core::math::{Mat4, Vec3, Vec4, transform_point, transform_vector};
use redlilium_core::{BoundingBox, Ray, Transform};
use redlilium_graphics::VertexAttributeSemantic;

pub use backend::{
    ClothBackend, ClothCollisionSettings, ClothDescriptor, ClothFabricSettings, ClothForceSettings, ClothHandle,
    ClothSceneId, ClothSettingsBlocks, ClothSimulationSettings,
};
pub use simple::SimpleClothBackend;

use crate::deformation::{DeformedMesh, MeshDeformation, MeshDeformationData, MeshDeformer};
use crate::error::ClothError;
use crate::mesh::vertex::{orthogonalize_tangent, pack_direction, pack_tangent_sign, tangent_sign, unpack_direction};
use crate::mesh::{MeshAccessor, MeshBufferType, MeshVariant};
use crate::model_base::ModelBase;
use crate::settings::ClothSettings;

/// Per-vertex mass from incident triangle area. Fixed vertices get inverse
/// mass `0`; kinetic masses are scaled so they sum to the area of the
/// triangles touching a kinetic vertex.
pub fn compute_inverse_masses(positions: &[Vec3], indices: &[u32], fixed: &[bool]) -> Result<Vec<f32>, ClothError> {
    let kinetic_count = fixed.iter().filter(|f| !**f).count();
    if kinetic_count == 0 {
        return Err(ClothError::AllFixed);
    }
    let mut masses = vec![0.0f32; positions.len()];
    let mut kinetic_area = 0.0;
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let area = triangle_area(&positions[a], &positions[b], &positions[c]);
        for v in [a, b, c] {
            masses[v] += area / 3.0;
        }
        if !(fixed[a] && fixed[b] && fixed[c]) {
            kinetic_area += area;
        }
    }
    if kinetic_area <= f32::EPSILON {
        return Err(ClothError::DegenerateMesh);
    }

    let mean = kinetic_area / kinetic_count as f32;
    let mut sum = 0.0;
    for (mass, _) in masses.iter_mut().zip(fixed).filter(|(_, f)| !**f) {
        if *mass <= f32::EPSILON {
            *mass = mean;
        }
        sum += *mass;
    }
    let scale = kinetic_area / sum;
    Ok(masses
        .iter()
        .zip(fixed)
        .map(|(mass, fixed)| if *fixed { 0.0 } else { 1.0 / (mass * scale) })
        .collect())
}

/// Bone influences of a skinned cloth mesh.
struct ClothSkinning {
    indices: Vec<[u32; 4]>,
    weights: Vec<Vec4>,
}

impl ClothSkinning {
    fn matrix(&self, vertex: usize, palette: &[Mat4]) -> Mat4 {
        let mut m = Mat4::zeros();
        let mut total = 0.0;
        for (bone, weight) in self.indices[vertex].iter().zip(self.weights[vertex].iter()) {
            if *weight > 0.0 {
                if let Some(bone) = palette.get(*bone as usize) {
                    m += bone * *weight;
                    total += weight;
                }
            }
        }
        if total > 0.0 { m / total } else { Mat4::identity() }
    }
}

/// State shared between the actor and its deformer.
struct ClothShared {
    backend: Arc<dyn ClothBackend>,
    handle: ClothHandle,
    indices: Vec<u32>,
    bind_positions: Vec<Vec3>,
    fixed: Vec<bool>,
    skinning: Option<ClothSkinning>,
    palette: RwLock<Vec<Mat4>>,
    compute_normals: bool,
}

impl ClothShared {
    fn particle_positions(&self) -> Option<Vec<Vec3>> {
        self.backend
            .particles(self.handle)
            .ok()
            .map(|p| p.iter().map(|p| p.xyz()).collect())
    }

    fn skin_matrix(&self, vertex: usize, palette: &[Mat4]) -> Option<Mat4> {
        let skinning = self.skinning.as_ref()?;
        (!palette.is_empty()).then(|| skinning.matrix(vertex, palette))
    }

    /// Write particles into the bound buffer so that the vertex shader's
    /// skinning lands each vertex on its particle.
    fn deform(&self, data: &mut MeshDeformationData) {
        let Some(particles) = self.particle_positions() else {
            return;
        };
        let count = particles.len().min(data.vertex_buffer.vertex_count() as usize);
        let palette = self.palette.read();
        let inverse_skin: Vec<Option<Mat4>> = (0..count)
            .map(|i| {
                if self.fixed[i] {
                    return None;
                }
                self.skin_matrix(i, &palette).and_then(|m| m.try_inverse())
            })
            .collect();

        let mut positions = data.stream_mut(VertexAttributeSemantic::Position);
        if positions.is_valid() {
            for (i, p) in particles.iter().enumerate().take(count) {
                if self.fixed[i] && self.skinning.is_some() {
                    continue;
                }
                let local = inverse_skin[i].map_or(*p, |inv| transform_point(&inv, p));
                positions.set_float3(i as u32, local);
            }
        }

        if self.compute_normals && data.stream(VertexAttributeSemantic::Normal).is_valid() {
            let mut normals = vec![Vec3::zeros(); count];
            for tri in self.indices.chunks_exact(3) {
                let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
                if a >= count || b >= count || c >= count {
                    continue;
                }
                let n = (particles[b] - particles[a]).cross(&(particles[c] - particles[a]));
                normals[a] += n;
                normals[b] += n;
                normals[c] += n;
            }
            for (i, n) in normals.iter_mut().enumerate() {
                let world = n.try_normalize(1e-12).unwrap_or_else(Vec3::y);
                *n = inverse_skin[i]
                    .and_then(|inv| transform_vector(&inv, &world).try_normalize(1e-12))
                    .unwrap_or(world);
            }

            let mut out = data.stream_mut(VertexAttributeSemantic::Normal);
            let format = out.format();
            for (i, n) in normals.iter().enumerate() {
                let w = out.get_float4(i as u32).w;
                out.set_float4(i as u32, pack_direction(format, Vec4::new(n.x, n.y, n.z, w)));
            }
            let mut tangents = data.stream_mut(VertexAttributeSemantic::Tangent);
            if tangents.is_valid() {
                let format = tangents.format();
                for (i, n) in normals.iter().enumerate() {
                    let raw = tangents.get_float4(i as u32);
                    let sign = tangent_sign(format, raw.w);
                    let t = orthogonalize_tangent(n, &unpack_direction(format, raw).xyz());
                    let packed = pack_direction(format, Vec4::new(t.x, t.y, t.z, 0.0));
                    tangents.set_float4(
                        i as u32,
                        Vec4::new(packed.x, packed.y, packed.z, pack_tangent_sign(format, sign)),
                    );
                }
            }
        }

        data.mark_all_dirty();
        data.bounds = BoundingBox::from_points(particles.iter().take(count));
    }
}

struct ClothDeformer(Arc<ClothShared>);

impl MeshDeformer for ClothDeformer {
    fn deform(&self, _mesh: &DeformedMesh<'_>, data: &mut MeshDeformationData) {
        self.0.deform(data);
    }
}

/// Cloth bound to mesh `(lod_index, mesh_index)` of one model instance.
///
/// The cloth frame is the instance frame, so particle positions are in
/// mesh-local space.
pub struct ClothActor {
    lod_index: u8,
    mesh_index: u16,
    settings: ClothSettingsBlocks,
    paint: Vec<f32>,
    fixed_paint_threshold: f32,
    backend: Arc<dyn ClothBackend>,
    scene: Option<ClothSceneId>,
    transform: Transform,
    shared: Option<Arc<ClothShared>>,
    deformers: Vec<(MeshBufferType, Arc<dyn MeshDeformer>)>,
    frame: u32,
    min_view_distance_sq: f32,
    simulated: bool,
    world_bounds: BoundingBox,
    enabled: bool,
}

impl ClothActor {
    pub fn new(lod_index: u8, mesh_index: u16, backend: Arc<dyn ClothBackend>, defaults: &ClothSettings) -> Self {
        let mut settings = ClothSettingsBlocks::default();
        settings.simulation.max_particle_distance = defaults.max_particle_distance;
        Self {
            lod_index,
            mesh_index,
            settings,
            paint: Vec::new(),
            fixed_paint_threshold: defaults.fixed_paint_threshold,
            backend,
            scene: None,
            transform: Transform::identity(),
            shared: None,
            deformers: Vec::new(),
            frame: 0,
            min_view_distance_sq: 0.0,
            simulated: false,
            world_bounds: BoundingBox::empty(),
            enabled: true,
        }
    }

    pub fn lod_index(&self) -> u8 {
        self.lod_index
    }

    pub fn mesh_index(&self) -> u16 {
        self.mesh_index
    }

    pub fn handle(&self) -> Option<ClothHandle> {
        self.shared.as_ref().map(|s| s.handle)
    }

    pub fn is_built(&self) -> bool {
        self.shared.is_some()
    }

    pub fn settings(&self) -> &ClothSettingsBlocks {
        &self.settings
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_force_settings(&mut self, settings: ClothForceSettings) {
        if let Some(handle) = self.handle() {
            self.backend.set_force_settings(handle, &settings);
        }
        self.settings.force = settings;
    }

    pub fn set_collision_settings(&mut self, settings: ClothCollisionSettings) {
        if let Some(handle) = self.handle() {
            self.backend.set_collision_settings(handle, &settings);
        }
        self.settings.collision = settings;
    }

    /// Changing `compute_normals` takes effect on the next [`build`](Self::build).
    pub fn set_simulation_settings(&mut self, settings: ClothSimulationSettings) {
        if let Some(handle) = self.handle() {
            self.backend.set_simulation_settings(handle, &settings);
        }
        self.settings.simulation = settings;
    }

    pub fn set_fabric_settings(&mut self, settings: ClothFabricSettings) {
        if let Some(handle) = self.handle() {
            self.backend.set_fabric_settings(handle, &settings);
        }
        self.settings.fabric = settings;
    }

    pub fn paint(&self) -> &[f32] {
        &self.paint
    }

    /// Per-vertex paint in `[0, 1]`; empty means no vertex is fixed.
    pub fn set_paint(&mut self, paint: Vec<f32>) -> Result<(), ClothError> {
        if let Some(handle) = self.handle() {
            self.backend.set_paint(handle, &paint)?;
        }
        self.paint = paint;
        Ok(())
    }

    /// Move the cloth into another physics scene.
    pub fn set_scene(&mut self, scene: Option<ClothSceneId>) {
        if let Some(handle) = self.handle() {
            if let Some(old) = self.scene {
                self.backend.remove_cloth(old, handle);
            }
            if let Some(new) = scene {
                self.backend.add_cloth(new, handle);
            }
        }
        self.scene = scene;
    }

    pub fn set_transform(&mut self, transform: Transform, teleport: bool) {
        if let Some(handle) = self.handle() {
            self.backend.set_transform(handle, &transform, teleport);
        }
        self.transform = transform;
    }

    pub fn clear_inertia(&self) {
        if let Some(handle) = self.handle() {
            self.backend.clear_inertia(handle);
        }
    }

    /// Create the cloth from the mesh data and register its deformers.
    ///
    /// On failure the actor stays dormant and the mesh renders undeformed.
    pub fn build<T: ModelBase + ?Sized>(
        &mut self,
        model: &T,
        deformation: &mut MeshDeformation,
    ) -> Result<(), ClothError> {
        self.destroy(deformation);
        let invalid = ClothError::InvalidMesh {
            lod_index: self.lod_index,
            mesh_index: self.mesh_index,
        };

        let data = model.core().read();
        let mesh = data
            .mesh(self.lod_index as usize, self.mesh_index as usize)
            .ok_or(invalid.clone())?
            .base();
        if !mesh.is_initialized() {
            return Err(ClothError::MissingMeshData);
        }
        let has_vertex1 = mesh.vertex_layout(1).is_some();
        let mut accessor = MeshAccessor::new();
        accessor
            .load_mesh(mesh, false, &[MeshBufferType::Vertex0, MeshBufferType::Index])
            .map_err(|e| {
                log::warn!("Cloth on mesh {} of LOD {}: {e}", self.mesh_index, self.lod_index);
                ClothError::MissingMeshData
            })?;
        drop(data);

        let positions = accessor.position().to_vec3();
        let indices = accessor.index().to_indices();
        if positions.is_empty() || indices.len() < 3 {
            return Err(ClothError::MissingMeshData);
        }
        if !self.paint.is_empty() && self.paint.len() != positions.len() {
            log::warn!(
                "Cloth paint has {} values for {} vertices",
                self.paint.len(),
                positions.len()
            );
            return Err(invalid);
        }
        let fixed: Vec<bool> = (0..positions.len())
            .map(|i| self.paint.get(i).is_some_and(|p| *p < self.fixed_paint_threshold))
            .collect();
        let inv_masses = compute_inverse_masses(&positions, &indices, &fixed)?;

        let skinning = {
            let bones = accessor.blend_indices();
            let weights = accessor.blend_weights();
            (bones.is_valid() && weights.is_valid()).then(|| ClothSkinning {
                indices: (0..bones.count())
                    .map(|i| {
                        let b = bones.get_float4(i);
                        [b.x as u32, b.y as u32, b.z as u32, b.w as u32]
                    })
                    .collect(),
                weights: (0..weights.count()).map(|i| weights.get_float4(i)).collect(),
            })
        };

        let handle = self.backend.create_cloth(&ClothDescriptor {
            positions: &positions,
            indices: &indices,
            inv_masses: &inv_masses,
            paint: &self.paint,
            transform: self.transform,
            settings: &self.settings,
        })?;
        if let Some(scene) = self.scene {
            self.backend.add_cloth(scene, handle);
        }

        let compute_normals = self.settings.simulation.compute_normals;
        let shared = Arc::new(ClothShared {
            backend: Arc::clone(&self.backend),
            handle,
            indices,
            bind_positions: positions,
            fixed,
            skinning,
            palette: RwLock::new(Vec::new()),
            compute_normals,
        });
        let deformer: Arc<dyn MeshDeformer> = Arc::new(ClothDeformer(Arc::clone(&shared)));
        let mut buffers = vec![MeshBufferType::Vertex0];
        if compute_normals && has_vertex1 {
            buffers.push(MeshBufferType::Vertex1);
        }
        for buffer in buffers {
            deformation.add_deformer(self.lod_index, self.mesh_index, buffer, Arc::clone(&deformer));
            self.deformers.push((buffer, Arc::clone(&deformer)));
        }
        self.world_bounds = BoundingBox::from_points(&shared.bind_positions).transformed(&self.transform.to_matrix());
        self.shared = Some(shared);
        log::debug!(
            "Built cloth on mesh {} of LOD {} ({} vertices)",
            self.mesh_index,
            self.lod_index,
            inv_masses.len()
        );
        Ok(())
    }

    /// Unregister the deformers and release the back-end cloth.
    pub fn destroy(&mut self, deformation: &mut MeshDeformation) {
        for (buffer, deformer) in self.deformers.drain(..) {
            deformation.remove_deformer(self.lod_index, self.mesh_index, buffer, &deformer);
        }
        self.release_backend();
    }

    fn release_backend(&mut self) {
        if let Some(shared) = self.shared.take() {
            if let Some(scene) = self.scene {
                self.backend.remove_cloth(scene, shared.handle);
            }
            self.backend.destroy_cloth(shared.handle);
        }
    }

    /// Track the closest view for distance culling.
    pub fn update_view_distance(&mut self, view_positions: &[Vec3]) {
        let center = self.world_bounds.center();
        self.min_view_distance_sq = view_positions
            .iter()
            .map(|p| (p - center).norm_squared())
            .fold(f32::INFINITY, f32::min);
        if view_positions.is_empty() {
            self.min_view_distance_sq = 0.0;
        }
    }

    /// Whether the frame counter lets the cloth simulate at its view distance.
    fn passes_distance_culling(&self) -> bool {
        let cull = self.settings.simulation.cull_distance;
        if cull <= 0.0 {
            return true;
        }
        let d2 = self.min_view_distance_sq;
        if d2 >= cull * cull {
            false
        } else if d2 >= (0.8 * cull) * (0.8 * cull) {
            self.frame % 4 == 0
        } else if d2 >= (0.5 * cull) * (0.5 * cull) {
            self.frame % 2 == 0
        } else {
            true
        }
    }

    /// Prepare one physics step. `palette` is the current skinning palette
    /// when the parent is skinned. Returns whether the cloth simulates.
    pub fn pre_update(&mut self, palette: Option<&[Mat4]>) -> bool {
        self.simulated = false;
        let Some(shared) = self.shared.clone() else {
            return false;
        };
        if !self.enabled {
            return false;
        }
        self.frame = self.frame.wrapping_add(1);
        if !self.passes_distance_culling() {
            return false;
        }

        if let (Some(palette), Some(skinning)) = (palette, shared.skinning.as_ref()) {
            *shared.palette.write() = palette.to_vec();
            if !self.paint.is_empty() {
                let targets: Vec<(usize, Vec3)> = shared
                    .fixed
                    .iter()
                    .enumerate()
                    .filter(|(_, fixed)| **fixed)
                    .map(|(i, _)| (i, transform_point(&skinning.matrix(i, palette), &shared.bind_positions[i])))
                    .collect();
                let result = self.backend.with_particles(shared.handle, &mut |particles| {
                    for (i, target) in &targets {
                        if let Some(p) = particles.get_mut(*i) {
                            *p = Vec4::new(target.x, target.y, target.z, 0.0);
                        }
                    }
                });
                if let Err(e) = result {
                    log::warn!("Cloth fixed-vertex drive failed: {e}");
                }
            }
        }
        self.simulated = true;
        true
    }

    /// After a simulated step: dirty the deformed buffers with the particle bounds.
    /// Returns the new world bounds.
    pub fn post_update(&mut self, deformation: &mut MeshDeformation) -> Option<BoundingBox> {
        if !self.simulated {
            return None;
        }
        let shared = self.shared.as_ref()?;
        let particles = shared.particle_positions()?;
        let local = BoundingBox::from_points(&particles);
        for (buffer, _) in &self.deformers {
            deformation.dirty_with_bounds(self.lod_index, self.mesh_index, *buffer, local);
        }
        self.world_bounds = local.transformed(&self.transform.to_matrix());
        Some(self.world_bounds)
    }

    pub fn world_bounds(&self) -> BoundingBox {
        self.world_bounds
    }

    /// Simulated particles in cloth-local space.
    pub fn particles(&self) -> Option<Vec<Vec3>> {
        self.shared.as_ref()?.particle_positions()
    }

    /// Two-sided ray test against the simulated surface; bounds only when not built.
    /// Returns `(distance, normal)` in world space.
    pub fn intersects(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        let Some(shared) = self.shared.as_ref() else {
            return self.world_bounds.intersects_ray(ray);
        };
        let Some(particles) = shared.particle_positions() else {
            return self.world_bounds.intersects_ray(ray);
        };
        let world: Vec<Vec3> = particles.iter().map(|p| self.transform.transform_point(p)).collect();
        let mut best: Option<(f32, Vec3)> = None;
        for tri in shared.indices.chunks_exact(3) {
            let [a, b, c] = [&world[tri[0] as usize], &world[tri[1] as usize], &world[tri[2] as usize]];
            let Some(distance) = ray_triangle(ray, a, b, c) else {
                continue;
            };
            if best.is_some_and(|(d, _)| d <= distance) {
                continue;
            }
            let hit = ray.at(distance);
            let mut normal = triangle_normal(a, b, c);
            if (hit + normal - ray.origin).norm() > (hit - ray.origin).norm() {
                normal = -normal;
            }
            best = Some((distance, normal));
        }
        best
    }
}

impl Drop for ClothActor {
    fn drop(&mut self) {
        self.release_backend();
    }
}

impl std::fmt::Debug for ClothActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClothActor")
            .field("lod_index", &self.lod_index)
            .field("mesh_index", &self.mesh_index)
            .field("handle", &self.handle())
            .field("scene", &self.scene)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshUpdate;
    use crate::model::Model;
    use crate::model_base::ModelContext;
    use redlilium_graphics::GraphicsDevice;

    fn grid(n: usize, spacing: f32) -> (Vec<Vec3>, Vec<u32>) {
        let mut positions = Vec::new();
        for row in 0..n {
            for col in 0..n {
                positions.push(Vec3::new(col as f32 * spacing, 0.0, row as f32 * spacing));
            }
        }
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

    #[test]
    fn inverse_masses_sum_to_kinetic_area() {
        let (positions, indices) = grid(4, 0.5);
        let fixed: Vec<bool> = (0..positions.len()).map(|i| i < 4).collect();
        let inv = compute_inverse_masses(&positions, &indices, &fixed).unwrap();
        assert!(inv[..4].iter().all(|w| *w == 0.0));
        let mass: f32 = inv[4..].iter().map(|w| 1.0 / w).sum();
        assert!((mass - 2.25).abs() < 1e-4);
    }

    #[test]
    fn all_fixed_and_degenerate_are_rejected() {
        let (positions, indices) = grid(2, 1.0);
        assert_eq!(
            compute_inverse_masses(&positions, &indices, &[true; 4]),
            Err(ClothError::AllFixed)
        );
        let flat = vec![Vec3::zeros(); 4];
        assert_eq!(
            compute_inverse_masses(&flat, &indices, &[false; 4]),
            Err(ClothError::DegenerateMesh)
        );
    }

    #[test]
    fn build_registers_deformers_and_destroy_removes_them() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let model = Model::new_virtual("cloth", &ctx);
        model.setup_lods(&[1]).unwrap();
        let (positions, indices) = grid(3, 1.0);
        model.update_mesh(0, 0, &MeshUpdate::new(&positions, &indices)).unwrap();

        let backend = Arc::new(SimpleClothBackend::new());
        let mut deformation = MeshDeformation::new();
        let mut cloth = ClothActor::new(0, 0, backend.clone(), &ClothSettings::default());
        cloth.build(model.as_ref(), &mut deformation).unwrap();
        assert_eq!(backend.cloth_count(), 1);
        assert!(deformation.has_deformers(0, 0, MeshBufferType::Vertex0));
        assert!(deformation.has_deformers(0, 0, MeshBufferType::Vertex1));

        cloth.destroy(&mut deformation);
        assert_eq!(deformation.deformer_count(), 0);
        assert_eq!(backend.cloth_count(), 0);
    }

    #[test]
    fn missing_mesh_leaves_actor_dormant() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let model = Model::new_virtual("empty", &ctx);
        model.setup_lods(&[1]).unwrap();
        let mut deformation = MeshDeformation::new();
        let mut cloth = ClothActor::new(0, 3, Arc::new(SimpleClothBackend::new()), &ClothSettings::default());
        assert!(matches!(
            cloth.build(model.as_ref(), &mut deformation),
            Err(ClothError::InvalidMesh { .. })
        ));
        let mut cloth = ClothActor::new(0, 0, Arc::new(SimpleClothBackend::new()), &ClothSettings::default());
        assert_eq!(cloth.build(model.as_ref(), &mut deformation), Err(ClothError::MissingMeshData));
        assert!(!cloth.pre_update(None));
    }

    #[test]
    fn distance_culling_skips_frames() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let model = Model::new_virtual("cloth", &ctx);
        model.setup_lods(&[1]).unwrap();
        let (positions, indices) = grid(2, 1.0);
        model.update_mesh(0, 0, &MeshUpdate::new(&positions, &indices)).unwrap();
        let mut deformation = MeshDeformation::new();
        let mut cloth = ClothActor::new(0, 0, Arc::new(SimpleClothBackend::new()), &ClothSettings::default());
        cloth.set_simulation_settings(ClothSimulationSettings {
            cull_distance: 100.0,
            ..Default::default()
        });
        cloth.build(model.as_ref(), &mut deformation).unwrap();

        let center = cloth.world_bounds().center();
        let simulated = |cloth: &mut ClothActor, distance: f32| {
            cloth.update_view_distance(&[center + Vec3::new(distance, 0.0, 0.0)]);
            (0..8).filter(|_| cloth.pre_update(None)).count()
        };
        assert_eq!(simulated(&mut cloth, 10.0), 8);
        assert_eq!(simulated(&mut cloth, 60.0), 4);
        assert_eq!(simulated(&mut cloth, 90.0), 2);
        assert_eq!(simulated(&mut cloth, 150.0), 0);
    }

    #[test]
    fn raycast_hits_both_sides() {
        let ctx = ModelContext::new(GraphicsDevice::new("test"));
        let model = Model::new_virtual("cloth", &ctx);
        model.setup_lods(&[1]).unwrap();
        let (positions, indices) = grid(2, 1.0);
        model.update_mesh(0, 0, &MeshUpdate::new(&positions, &indices)).unwrap();
        let mut deformation = MeshDeformation::new();
        let mut cloth = ClothActor::new(0, 0, Arc::new(SimpleClothBackend::new()), &ClothSettings::default());
        cloth.build(model.as_ref(), &mut deformation).unwrap();

        let down = Ray::new(Vec3::new(0.25, 2.0, 0.25), Vec3::new(0.0, -1.0, 0.0));
        let (distance, normal) = cloth.intersects(&down).unwrap();
        assert!((distance - 2.0).abs() < 1e-5);
        assert!(normal.y > 0.99);
        let up = Ray::new(Vec3::new(0.25, -3.0, 0.25), Vec3::new(0.0, 1.0, 0.0));
        let (distance, normal) = cloth.intersects(&up).unwrap();
        assert!((distance - 3.0).abs() < 1e-5);
        assert!(normal.y < -0.99);
    }
}
