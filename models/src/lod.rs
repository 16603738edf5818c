//! A single level of detail: an ordered set of meshes and its screen-size threshold.

use redlilium_core::math::Mat4;
use redlilium_core::{BoundingBox, BoundingSphere, Ray};

use crate::mesh::{MeshHit, MeshVariant};

/// Meshes of one LOD.
#[derive(Debug)]
pub struct ModelLod<M> {
    pub(crate) screen_size: f32,
    pub(crate) meshes: Vec<M>,
}

impl<M: MeshVariant> ModelLod<M> {
    pub(crate) fn new(lod_index: u8, mesh_count: usize, screen_size: f32) -> Self {
        Self {
            screen_size,
            meshes: (0..mesh_count)
                .map(|i| M::create(lod_index, i as u16))
                .collect(),
        }
    }

    /// Projected size below which the next LOD is used.
    pub fn screen_size(&self) -> f32 {
        self.screen_size
    }

    pub fn meshes(&self) -> &[M] {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut [M] {
        &mut self.meshes
    }

    pub fn mesh(&self, index: usize) -> Option<&M> {
        self.meshes.get(index)
    }

    pub fn mesh_mut(&mut self, index: usize) -> Option<&mut M> {
        self.meshes.get_mut(index)
    }

    /// Whether every mesh has GPU buffers.
    pub fn is_initialized(&self) -> bool {
        !self.meshes.is_empty() && self.meshes.iter().all(|m| m.base().is_initialized())
    }

    pub fn vertex_count(&self) -> u32 {
        self.meshes.iter().map(|m| m.base().vertex_count()).sum()
    }

    pub fn triangle_count(&self) -> u32 {
        self.meshes.iter().map(|m| m.base().triangle_count()).sum()
    }

    /// Local bounds of all meshes.
    pub fn bounds(&self) -> BoundingBox {
        self.meshes
            .iter()
            .fold(BoundingBox::empty(), |acc, m| acc.merge(m.base().bounds()))
    }

    pub fn sphere(&self) -> BoundingSphere {
        BoundingSphere::from_box(&self.bounds())
    }

    /// Bounds transformed by `world`.
    pub fn world_bounds(&self, world: &Mat4) -> BoundingBox {
        self.bounds().transformed(world)
    }

    /// Closest mesh hit and the index of the mesh that was hit.
    pub fn intersects(&self, ray: &Ray, world: &Mat4) -> Option<(MeshHit, usize)> {
        self.meshes
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.base().intersects(ray, world).map(|hit| (hit, i)))
            .min_by(|a, b| a.0.distance.total_cmp(&b.0.distance))
    }

    pub(crate) fn release(&mut self) {
        for mesh in &mut self.meshes {
            mesh.base_mut().release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Mesh, MeshUpdate};
    use redlilium_core::math::Vec3;
    use redlilium_graphics::GraphicsDevice;

    #[test]
    fn bounds_merge_meshes_and_hits_pick_closest() {
        let device = GraphicsDevice::new("test");
        let mut lod = ModelLod::<Mesh>::new(0, 2, 1.0);
        let near = [Vec3::new(0.0, 0.0, 0.5), Vec3::new(1.0, 0.0, 0.5), Vec3::new(0.0, 1.0, 0.5)];
        let far = [Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        for (mesh, positions) in lod.meshes_mut().iter_mut().zip([far, near]) {
            MeshUpdate::new(&positions, &[0, 1, 2])
                .to_accessor(false)
                .unwrap()
                .update_mesh(mesh, &device, true, true)
                .unwrap();
        }
        assert!(lod.is_initialized());
        assert_eq!(lod.bounds().max, Vec3::new(2.0, 2.0, 0.5));

        let ray = Ray::new(Vec3::new(0.2, 0.2, 1.0), Vec3::new(0.0, 0.0, -1.0));
        let (hit, index) = lod.intersects(&ray, &Mat4::identity()).unwrap();
        assert_eq!(index, 1);
        assert!((hit.distance - 0.5).abs() < 1e-5);

        lod.release();
        assert!(!lod.is_initialized());
    }
}
