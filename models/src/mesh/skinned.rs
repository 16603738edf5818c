//! Skinned meshes: one interleaved vertex buffer with bone influences, plus blend shapes.

use std::sync::Arc;

use redlilium_graphics::{GraphicsDevice, VertexAttributeSemantic, VertexLayout};

use super::vertex::skinned_vb0_layout;
use super::{
    BlendShape, Mesh, MeshAccessor, MeshBufferType, MeshInitData, MeshVariant, index_uses_16bit,
    write_indices,
};
use crate::error::{AssetError, AssetResult};
use crate::serialization::{ReadStream, WriteStream};

/// Mesh of a [`SkinnedModel`](crate::SkinnedModel).
#[derive(Debug)]
pub struct SkinnedMesh {
    mesh: Mesh,
    blend_shapes: Vec<BlendShape>,
}

impl SkinnedMesh {
    pub fn new(lod_index: u8, index: u16) -> Self {
        Self {
            mesh: Mesh::new(lod_index, index),
            blend_shapes: Vec::new(),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn blend_shapes(&self) -> &[BlendShape] {
        &self.blend_shapes
    }

    pub fn find_blend_shape(&self, name: &str) -> Option<&BlendShape> {
        self.blend_shapes.iter().find(|s| s.name == name)
    }

    /// Replace the blend shapes. Every shape must fit the current vertex count.
    pub fn set_blend_shapes(&mut self, blend_shapes: Vec<BlendShape>) -> AssetResult<()> {
        for shape in &blend_shapes {
            shape.validate(self.mesh.vertex_count())?;
        }
        self.blend_shapes = blend_shapes;
        Ok(())
    }

    /// Header entries read before the mesh payload arrives.
    pub(crate) fn set_blend_shape_headers(&mut self, headers: Vec<BlendShape>) {
        self.blend_shapes = headers;
    }

    /// Upload accessor buffers after checking that they carry skinning data.
    pub fn update(
        &mut self,
        accessor: &MeshAccessor,
        device: &Arc<GraphicsDevice>,
        recompute_bounds: bool,
        keep_cpu_data: bool,
    ) -> AssetResult<()> {
        let layouts = [
            accessor.layout(MeshBufferType::Vertex0).cloned(),
            accessor.layout(MeshBufferType::Vertex1).cloned(),
            accessor.layout(MeshBufferType::Vertex2).cloned(),
        ];
        Self::validate_layouts(&layouts)?;
        accessor.update_mesh(&mut self.mesh, device, recompute_bounds, keep_cpu_data)?;
        let vertices = self.mesh.vertex_count();
        self.blend_shapes.retain(|shape| {
            let ok = shape.validate(vertices).is_ok();
            if !ok {
                log::warn!("Dropping blend shape '{}' that does not fit {vertices} vertices", shape.name);
            }
            ok
        });
        Ok(())
    }
}

impl MeshVariant for SkinnedMesh {
    fn create(lod_index: u8, index: u16) -> Self {
        SkinnedMesh::new(lod_index, index)
    }

    fn base(&self) -> &Mesh {
        &self.mesh
    }

    fn base_mut(&mut self) -> &mut Mesh {
        &mut self.mesh
    }

    fn blend_shapes(&self) -> &[BlendShape] {
        &self.blend_shapes
    }

    fn validate_layouts(layouts: &[Option<Arc<VertexLayout>>; 3]) -> AssetResult<()> {
        let has = |semantic| {
            layouts
                .iter()
                .flatten()
                .any(|layout| layout.has_semantic(semantic))
        };
        if has(VertexAttributeSemantic::BlendIndices) && has(VertexAttributeSemantic::BlendWeights) {
            Ok(())
        } else {
            Err(AssetError::InvalidData(
                "skinned mesh requires BlendIndices and BlendWeights".to_string(),
            ))
        }
    }

    fn read_payload(
        &mut self,
        stream: &mut ReadStream<'_>,
        device: &Arc<GraphicsDevice>,
        keep_cpu_data: bool,
    ) -> AssetResult<()> {
        let vertices = stream.read_u32()?;
        let triangles = stream.read_u32()?;
        if vertices == 0 || triangles == 0 {
            return Err(AssetError::InvalidData(format!(
                "skinned mesh {} of LOD {} is empty",
                self.mesh.index(),
                self.mesh.lod_index()
            )));
        }
        let layout = skinned_vb0_layout()?;
        let vb0 = stream.read_bytes(vertices as usize * layout.stride() as usize)?;
        let use_16bit = index_uses_16bit(triangles);
        let ib = stream.read_bytes(triangles as usize * 3 * if use_16bit { 2 } else { 4 })?;
        for shape in &mut self.blend_shapes {
            shape.read_payload(stream)?;
            shape.validate(vertices)?;
        }
        self.mesh.init(
            device,
            MeshInitData {
                vertices,
                triangles,
                vertex_buffers: [Some(vb0), None, None],
                index_buffer: ib,
                use_16bit_indices: use_16bit,
                layouts: [Some(layout), None, None],
                compute_bounds: false,
                keep_cpu_data,
            },
        )
    }

    fn write_payload(&self, stream: &mut WriteStream) -> AssetResult<()> {
        let mut accessor = MeshAccessor::new();
        accessor.load_mesh(&self.mesh, false, &MeshBufferType::ALL)?;
        let triangles = accessor.index_count() / 3;
        stream.write_u32(accessor.vertex_count());
        stream.write_u32(triangles);
        stream.write_bytes(&accessor.convert_to_layout(&*skinned_vb0_layout()?));
        write_indices(stream, &accessor.index().to_indices(), triangles)?;
        for shape in &self.blend_shapes {
            shape.write_payload(stream);
        }
        Ok(())
    }
}
