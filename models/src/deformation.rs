//! Per-instance mesh deformers writing into dynamic vertex buffers.
//!
//! Deformers are keyed by `(lod, mesh, buffer)`. Before a mesh is drawn the
//! draw path calls [`MeshDeformation::run_deformers`], which restores the
//! pristine vertex bytes over the range touched last time, lets every
//! deformer edit the copy, uploads the changed range and swaps the draw's
//! vertex buffer for the dynamic one.

use std::collections::HashMap;
use std::sync::Arc;

use redlilium_core::BoundingBox;
use redlilium_graphics::{
    Buffer, BufferDescriptor, BufferUsage, GraphicsDevice, VertexAttributeSemantic, VertexLayout,
};

use crate::error::{AssetError, AssetResult};
use crate::mesh::{BlendShape, Mesh, MeshBufferType, Stream, StreamMut, element_stream, element_stream_mut};

/// Compact deformer key: `lod << 24 | mesh << 8 | buffer`.
pub fn deformer_key(lod_index: u8, mesh_index: u16, buffer: MeshBufferType) -> u32 {
    (lod_index as u32) << 24 | (mesh_index as u32) << 8 | buffer as u32
}

/// The mesh a deformer runs on.
#[derive(Clone, Copy)]
pub struct DeformedMesh<'a> {
    pub mesh: &'a Mesh,
    pub blend_shapes: &'a [BlendShape],
}

/// Edits the dynamic copy of one vertex buffer.
pub trait MeshDeformer: Send + Sync {
    fn deform(&self, mesh: &DeformedMesh<'_>, data: &mut MeshDeformationData);
}

impl<F> MeshDeformer for F
where
    F: Fn(&DeformedMesh<'_>, &mut MeshDeformationData) + Send + Sync,
{
    fn deform(&self, mesh: &DeformedMesh<'_>, data: &mut MeshDeformationData) {
        self(mesh, data)
    }
}

/// CPU bytes and GPU buffer of one deformed vertex buffer.
pub struct DynamicVertexBuffer {
    pub data: Vec<u8>,
    pub layout: Arc<VertexLayout>,
    gpu: Arc<Buffer>,
}

impl DynamicVertexBuffer {
    pub fn gpu(&self) -> &Arc<Buffer> {
        &self.gpu
    }

    pub fn stride(&self) -> u32 {
        self.layout.stride()
    }

    pub fn vertex_count(&self) -> u32 {
        match self.layout.stride() {
            0 => 0,
            stride => self.data.len() as u32 / stride,
        }
    }
}

/// Deformation state of one `(lod, mesh, buffer)` key.
pub struct MeshDeformationData {
    pub lod_index: u8,
    pub mesh_index: u16,
    pub buffer_type: MeshBufferType,
    pub dirty: bool,
    /// Vertices touched this run; empty when `dirty_min > dirty_max`.
    pub dirty_min: u32,
    pub dirty_max: u32,
    prev_dirty_min: u32,
    prev_dirty_max: u32,
    /// Local bounds of the deformed vertices.
    pub bounds: BoundingBox,
    pub vertex_buffer: DynamicVertexBuffer,
}

impl MeshDeformationData {
    fn key(&self) -> u32 {
        deformer_key(self.lod_index, self.mesh_index, self.buffer_type)
    }

    pub fn has_dirty_range(&self) -> bool {
        self.dirty_min <= self.dirty_max
    }

    pub fn reset_dirty_range(&mut self) {
        self.dirty_min = u32::MAX;
        self.dirty_max = 0;
    }

    /// Grow the range touched this run.
    pub fn mark_dirty_range(&mut self, min: u32, max: u32) {
        self.dirty_min = self.dirty_min.min(min);
        self.dirty_max = self.dirty_max.max(max);
    }

    pub fn mark_all_dirty(&mut self) {
        let count = self.vertex_buffer.vertex_count();
        if count > 0 {
            self.mark_dirty_range(0, count - 1);
        }
    }

    /// Range restored before the next run.
    pub fn previous_dirty_range(&self) -> Option<(u32, u32)> {
        (self.prev_dirty_min <= self.prev_dirty_max).then_some((self.prev_dirty_min, self.prev_dirty_max))
    }

    pub fn stream(&self, semantic: VertexAttributeSemantic) -> Stream<'_> {
        element_stream(&self.vertex_buffer.data, &self.vertex_buffer.layout, semantic)
    }

    pub fn stream_mut(&mut self, semantic: VertexAttributeSemantic) -> StreamMut<'_> {
        let layout = Arc::clone(&self.vertex_buffer.layout);
        element_stream_mut(&mut self.vertex_buffer.data, &layout, semantic)
    }
}

/// Deformers and their materialized buffers for one model instance.
#[derive(Default)]
pub struct MeshDeformation {
    deformers: HashMap<u32, Vec<Arc<dyn MeshDeformer>>>,
    entries: Vec<MeshDeformationData>,
}

impl MeshDeformation {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mut(&mut self, key: u32) -> Option<&mut MeshDeformationData> {
        self.entries.iter_mut().find(|e| e.key() == key)
    }

    pub fn entry(&self, lod_index: u8, mesh_index: u16, buffer: MeshBufferType) -> Option<&MeshDeformationData> {
        let key = deformer_key(lod_index, mesh_index, buffer);
        self.entries.iter().find(|e| e.key() == key)
    }

    pub fn add_deformer(
        &mut self,
        lod_index: u8,
        mesh_index: u16,
        buffer: MeshBufferType,
        deformer: Arc<dyn MeshDeformer>,
    ) {
        let key = deformer_key(lod_index, mesh_index, buffer);
        self.deformers.entry(key).or_default().push(deformer);
        self.dirty(lod_index, mesh_index, buffer);
    }

    /// Remove a deformer registered earlier; compared by identity.
    pub fn remove_deformer(
        &mut self,
        lod_index: u8,
        mesh_index: u16,
        buffer: MeshBufferType,
        deformer: &Arc<dyn MeshDeformer>,
    ) -> bool {
        let key = deformer_key(lod_index, mesh_index, buffer);
        let Some(list) = self.deformers.get_mut(&key) else {
            return false;
        };
        let before = list.len();
        list.retain(|d| !std::ptr::addr_eq(Arc::as_ptr(d), Arc::as_ptr(deformer)));
        let removed = list.len() != before;
        if list.is_empty() {
            self.deformers.remove(&key);
        }
        if removed {
            self.dirty(lod_index, mesh_index, buffer);
        }
        removed
    }

    pub fn has_deformers(&self, lod_index: u8, mesh_index: u16, buffer: MeshBufferType) -> bool {
        self.deformers
            .contains_key(&deformer_key(lod_index, mesh_index, buffer))
    }

    /// Request a rebuild of the entry on its next run.
    pub fn dirty(&mut self, lod_index: u8, mesh_index: u16, buffer: MeshBufferType) {
        if let Some(entry) = self.entry_mut(deformer_key(lod_index, mesh_index, buffer)) {
            entry.dirty = true;
        }
    }

    pub fn dirty_with_bounds(
        &mut self,
        lod_index: u8,
        mesh_index: u16,
        buffer: MeshBufferType,
        bounds: BoundingBox,
    ) {
        if let Some(entry) = self.entry_mut(deformer_key(lod_index, mesh_index, buffer)) {
            entry.dirty = true;
            entry.bounds = bounds;
        }
    }

    /// Union of the bounds of every entry of `lod_index`.
    pub fn bounds(&self, lod_index: u8) -> Option<BoundingBox> {
        self.entries
            .iter()
            .filter(|e| e.lod_index == lod_index)
            .map(|e| e.bounds)
            .reduce(|a, b| a.merge(&b))
    }

    pub fn clear(&mut self) {
        self.deformers.clear();
        self.entries.clear();
    }

    pub fn deformer_count(&self) -> usize {
        self.deformers.values().map(Vec::len).sum()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Run the deformers of `(mesh, buffer)` and point `vertex_buffer` at the result.
    ///
    /// Without deformers the entry for the key, if any, is dropped and the
    /// buffer is left untouched.
    pub fn run_deformers(
        &mut self,
        device: &Arc<GraphicsDevice>,
        target: &DeformedMesh<'_>,
        buffer_type: MeshBufferType,
        vertex_buffer: &mut Option<Arc<Buffer>>,
    ) -> AssetResult<()> {
        let mesh = target.mesh;
        let key = deformer_key(mesh.lod_index(), mesh.index(), buffer_type);
        let Some(deformers) = self.deformers.get(&key).cloned() else {
            self.entries.retain(|e| e.key() != key);
            return Ok(());
        };
        let Some(slot) = buffer_type.vertex_slot() else {
            return Err(AssetError::InvalidOperation(
                "index buffers cannot be deformed".to_string(),
            ));
        };
        let Some(pristine) = mesh.cpu_data(buffer_type).cloned() else {
            log::warn!(
                "Mesh {} of LOD {} has no CPU data for {buffer_type:?}, skipping deformers",
                mesh.index(),
                mesh.lod_index()
            );
            return Ok(());
        };
        let Some(layout) = mesh.vertex_layout(slot).cloned() else {
            return Ok(());
        };

        if self.entry_mut(key).is_none() {
            let gpu = device.create_buffer_init(
                &BufferDescriptor::typed(
                    mesh.vertex_count(),
                    layout.stride(),
                    BufferUsage::VERTEX | BufferUsage::DYNAMIC | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
                )
                .with_label(format!(
                    "Deformed L{} M{} {buffer_type:?}",
                    mesh.lod_index(),
                    mesh.index()
                )),
                &pristine,
            )?;
            let vertex_count = mesh.vertex_count();
            self.entries.push(MeshDeformationData {
                lod_index: mesh.lod_index(),
                mesh_index: mesh.index(),
                buffer_type,
                dirty: true,
                dirty_min: u32::MAX,
                dirty_max: 0,
                prev_dirty_min: 0,
                prev_dirty_max: vertex_count.saturating_sub(1),
                bounds: *mesh.bounds(),
                vertex_buffer: DynamicVertexBuffer {
                    data: pristine.to_vec(),
                    layout,
                    gpu,
                },
            });
        }
        let Some(entry) = self.entry_mut(key) else {
            return Ok(());
        };

        if entry.dirty {
            let stride = entry.vertex_buffer.stride() as usize;
            if let Some((min, max)) = entry.previous_dirty_range() {
                let start = min as usize * stride;
                let end = ((max as usize + 1) * stride).min(pristine.len());
                if start < end {
                    entry.vertex_buffer.data[start..end].copy_from_slice(&pristine[start..end]);
                }
            }
            entry.reset_dirty_range();
            for deformer in &deformers {
                deformer.deform(target, entry);
            }

            let flush = match (entry.previous_dirty_range(), entry.has_dirty_range()) {
                (Some((pmin, pmax)), true) => Some((pmin.min(entry.dirty_min), pmax.max(entry.dirty_max))),
                (Some(prev), false) => Some(prev),
                (None, true) => Some((entry.dirty_min, entry.dirty_max)),
                (None, false) => None,
            };
            if let Some((min, max)) = flush {
                let start = min as usize * stride;
                let end = ((max as usize + 1) * stride).min(entry.vertex_buffer.data.len());
                if start < end {
                    entry
                        .vertex_buffer
                        .gpu
                        .write(start as u64, &entry.vertex_buffer.data[start..end])?;
                }
            }
            entry.prev_dirty_min = entry.dirty_min;
            entry.prev_dirty_max = entry.dirty_max;
            entry.dirty = false;
        }

        *vertex_buffer = Some(Arc::clone(&entry.vertex_buffer.gpu));
        Ok(())
    }
}

impl std::fmt::Debug for MeshDeformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshDeformation")
            .field("deformers", &self.deformer_count())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshUpdate;
    use redlilium_core::math::Vec3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mesh(device: &Arc<GraphicsDevice>) -> Mesh {
        let positions = [Vec3::zeros(), Vec3::x(), Vec3::y(), Vec3::new(1.0, 1.0, 0.0)];
        let mut mesh = Mesh::new(0, 0);
        MeshUpdate::new(&positions, &[0, 1, 2, 2, 1, 3])
            .to_accessor(false)
            .unwrap()
            .update_mesh(&mut mesh, device, true, true)
            .unwrap();
        mesh
    }

    fn lift(amount: f32) -> Arc<dyn MeshDeformer> {
        Arc::new(move |_: &DeformedMesh<'_>, data: &mut MeshDeformationData| {
            let mut positions = data.stream_mut(VertexAttributeSemantic::Position);
            let p = positions.get_float3(1);
            positions.set_float3(1, p + Vec3::new(0.0, 0.0, amount));
            data.mark_dirty_range(1, 1);
        })
    }

    #[test]
    fn key_packs_lod_mesh_and_buffer() {
        assert_eq!(deformer_key(2, 3, MeshBufferType::Vertex1), 0x0200_0302);
    }

    #[test]
    fn high_mesh_indices_keep_their_own_deformers() {
        assert_ne!(
            deformer_key(0, 256, MeshBufferType::Vertex0),
            deformer_key(0, 0, MeshBufferType::Vertex0)
        );
        assert_ne!(
            deformer_key(1, 0, MeshBufferType::Vertex0),
            deformer_key(0, 256, MeshBufferType::Vertex0)
        );

        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let target = DeformedMesh { mesh: &mesh, blend_shapes: &[] };
        let mut deformation = MeshDeformation::new();
        deformation.add_deformer(0, 256, MeshBufferType::Vertex0, lift(2.0));
        assert!(!deformation.has_deformers(0, 0, MeshBufferType::Vertex0));

        let mut vb = mesh.vertex_buffer(0).cloned();
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        assert!(Arc::ptr_eq(vb.as_ref().unwrap(), mesh.vertex_buffer(0).unwrap()));
        assert!(deformation.entry(0, 0, MeshBufferType::Vertex0).is_none());
    }

    #[test]
    fn deformer_output_replaces_vertex_buffer() {
        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let target = DeformedMesh { mesh: &mesh, blend_shapes: &[] };
        let mut deformation = MeshDeformation::new();
        deformation.add_deformer(0, 0, MeshBufferType::Vertex0, lift(2.0));

        let mut vb = mesh.vertex_buffer(0).cloned();
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        let vb = vb.unwrap();
        assert!(!Arc::ptr_eq(&vb, mesh.vertex_buffer(0).unwrap()));
        let bytes = vb.download().unwrap();
        let z: f32 = bytemuck::pod_read_unaligned(&bytes[12 + 8..12 + 12]);
        assert_eq!(z, 2.0);
        let entry = deformation.entry(0, 0, MeshBufferType::Vertex0).unwrap();
        assert!(!entry.dirty);
        assert_eq!((entry.dirty_min, entry.dirty_max), (1, 1));
    }

    #[test]
    fn clean_entry_skips_deformers() {
        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let target = DeformedMesh { mesh: &mesh, blend_shapes: &[] };
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut deformation = MeshDeformation::new();
        deformation.add_deformer(
            0,
            0,
            MeshBufferType::Vertex0,
            Arc::new(move |_: &DeformedMesh<'_>, _: &mut MeshDeformationData| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );
        let mut vb = None;
        for _ in 0..3 {
            deformation
                .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        deformation.dirty(0, 0, MeshBufferType::Vertex0);
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn previous_range_is_restored() {
        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let target = DeformedMesh { mesh: &mesh, blend_shapes: &[] };
        let mut deformation = MeshDeformation::new();
        let deformer = lift(1.0);
        deformation.add_deformer(0, 0, MeshBufferType::Vertex0, Arc::clone(&deformer));
        let mut vb = None;
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        deformation.dirty(0, 0, MeshBufferType::Vertex0);
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        let entry = deformation.entry(0, 0, MeshBufferType::Vertex0).unwrap();
        assert_eq!(entry.stream(VertexAttributeSemantic::Position).get_float3(1).z, 1.0);
    }

    #[test]
    fn removing_last_deformer_drops_entry() {
        let device = GraphicsDevice::new("test");
        let mesh = mesh(&device);
        let target = DeformedMesh { mesh: &mesh, blend_shapes: &[] };
        let mut deformation = MeshDeformation::new();
        let deformer = lift(1.0);
        deformation.add_deformer(0, 0, MeshBufferType::Vertex0, Arc::clone(&deformer));
        let mut vb = None;
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        assert_eq!(deformation.entry_count(), 1);

        assert!(deformation.remove_deformer(0, 0, MeshBufferType::Vertex0, &deformer));
        assert_eq!(deformation.deformer_count(), 0);
        assert!(!deformation.has_deformers(0, 0, MeshBufferType::Vertex0));

        let mut vb = mesh.vertex_buffer(0).cloned();
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        assert_eq!(deformation.entry_count(), 0);
        assert!(Arc::ptr_eq(vb.as_ref().unwrap(), mesh.vertex_buffer(0).unwrap()));
    }

    #[test]
    fn missing_cpu_data_is_skipped() {
        let device = GraphicsDevice::new("test");
        let mut mesh = mesh(&device);
        mesh.release_cpu_data();
        let target = DeformedMesh { mesh: &mesh, blend_shapes: &[] };
        let mut deformation = MeshDeformation::new();
        deformation.add_deformer(0, 0, MeshBufferType::Vertex0, lift(1.0));
        let mut vb = mesh.vertex_buffer(0).cloned();
        deformation
            .run_deformers(&device, &target, MeshBufferType::Vertex0, &mut vb)
            .unwrap();
        assert_eq!(deformation.entry_count(), 0);
        assert!(Arc::ptr_eq(vb.as_ref().unwrap(), mesh.vertex_buffer(0).unwrap()));
    }
}
