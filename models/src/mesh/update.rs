//! Building mesh buffers from plain attribute arrays.

use redlilium_core::math::{Vec2, Vec3, Vec4};
use redlilium_graphics::PixelFormat;

use super::vertex::{
    compute_normals, orthogonalize_tangent, pack_direction, pack_tangent_sign, skinned_vb0_layout,
    static_vb0_layout, static_vb1_layout, static_vb2_layout,
};
use super::{MeshAccessor, MeshBufferType, index_uses_16bit};
use crate::error::{AssetError, AssetResult};

/// Geometry of one mesh update.
///
/// Only positions and triangles are required. Missing normals are computed
/// from faces and missing tangents are derived from the normals.
#[derive(Debug, Clone, Copy)]
pub struct MeshUpdate<'a> {
    pub positions: &'a [Vec3],
    pub triangles: &'a [u32],
    pub normals: Option<&'a [Vec3]>,
    pub tangents: Option<&'a [Vec3]>,
    pub uvs: Option<&'a [Vec2]>,
    pub colors: Option<&'a [Vec4]>,
    pub blend_indices: Option<&'a [[u32; 4]]>,
    pub blend_weights: Option<&'a [Vec4]>,
}

impl<'a> MeshUpdate<'a> {
    pub fn new(positions: &'a [Vec3], triangles: &'a [u32]) -> Self {
        Self {
            positions,
            triangles,
            normals: None,
            tangents: None,
            uvs: None,
            colors: None,
            blend_indices: None,
            blend_weights: None,
        }
    }

    pub fn with_normals(mut self, normals: &'a [Vec3]) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_tangents(mut self, tangents: &'a [Vec3]) -> Self {
        self.tangents = Some(tangents);
        self
    }

    pub fn with_uvs(mut self, uvs: &'a [Vec2]) -> Self {
        self.uvs = Some(uvs);
        self
    }

    pub fn with_colors(mut self, colors: &'a [Vec4]) -> Self {
        self.colors = Some(colors);
        self
    }

    pub fn with_skinning(mut self, indices: &'a [[u32; 4]], weights: &'a [Vec4]) -> Self {
        self.blend_indices = Some(indices);
        self.blend_weights = Some(weights);
        self
    }

    fn validate(&self) -> AssetResult<()> {
        let vertices = self.positions.len();
        if vertices == 0 || self.triangles.is_empty() || self.triangles.len() % 3 != 0 {
            return Err(AssetError::InvalidData(format!(
                "mesh update needs vertices and whole triangles, got {vertices} vertices and {} indices",
                self.triangles.len()
            )));
        }
        if let Some(&bad) = self.triangles.iter().find(|&&i| i as usize >= vertices) {
            return Err(AssetError::InvalidData(format!(
                "index {bad} is out of range for {vertices} vertices"
            )));
        }
        let lengths = [
            ("normals", self.normals.map(<[_]>::len)),
            ("tangents", self.tangents.map(<[_]>::len)),
            ("uvs", self.uvs.map(<[_]>::len)),
            ("colors", self.colors.map(<[_]>::len)),
            ("blend indices", self.blend_indices.map(<[_]>::len)),
            ("blend weights", self.blend_weights.map(<[_]>::len)),
        ];
        for (name, len) in lengths {
            if let Some(len) = len.filter(|&len| len != vertices) {
                return Err(AssetError::InvalidData(format!(
                    "{name} has {len} entries for {vertices} vertices"
                )));
            }
        }
        Ok(())
    }

    /// Encode into the stored vertex layouts.
    ///
    /// `skinned` selects the single interleaved skinned buffer; otherwise the
    /// static three-buffer split is used (colors only when supplied).
    pub fn to_accessor(&self, skinned: bool) -> AssetResult<MeshAccessor> {
        self.validate()?;
        let count = self.positions.len() as u32;
        let mut accessor = MeshAccessor::new();
        if skinned {
            if self.blend_indices.is_none() || self.blend_weights.is_none() {
                return Err(AssetError::InvalidData(
                    "skinned mesh update requires blend indices and weights".to_string(),
                ));
            }
            accessor.allocate_buffer(MeshBufferType::Vertex0, count, skinned_vb0_layout()?)?;
        } else {
            accessor.allocate_buffer(MeshBufferType::Vertex0, count, static_vb0_layout()?)?;
            accessor.allocate_buffer(MeshBufferType::Vertex1, count, static_vb1_layout()?)?;
            if self.colors.is_some() {
                accessor.allocate_buffer(MeshBufferType::Vertex2, count, static_vb2_layout()?)?;
            }
        }

        let use_16bit = index_uses_16bit(self.triangles.len() as u32 / 3);
        accessor.allocate_index_buffer(self.triangles.len() as u32, use_16bit);
        {
            let mut index = accessor.index_mut();
            for (i, &value) in self.triangles.iter().enumerate() {
                index.set_index(i as u32, value);
            }
        }

        {
            let mut position = accessor.position_mut();
            if position.is_linear(PixelFormat::R32G32B32Float) {
                position.set_linear(bytemuck::cast_slice(self.positions));
            } else {
                for (i, p) in self.positions.iter().enumerate() {
                    position.set_float3(i as u32, *p);
                }
            }
        }

        let computed;
        let normals = match self.normals {
            Some(normals) => normals,
            None => {
                computed = compute_normals(self.positions, self.triangles);
                &computed
            }
        };
        {
            let mut normal = accessor.normal_mut();
            let format = normal.format();
            for (i, n) in normals.iter().enumerate() {
                normal.set_float4(i as u32, pack_direction(format, n.push(1.0)));
            }
        }
        {
            let mut tangent = accessor.tangent_mut();
            let format = tangent.format();
            for (i, n) in normals.iter().enumerate() {
                let source = self.tangents.map_or(Vec3::x(), |t| t[i]);
                let t = orthogonalize_tangent(n, &source);
                let sign = pack_tangent_sign(format, 1.0);
                tangent.set_float4(i as u32, pack_direction(format, t.push(sign)));
            }
        }

        if let Some(uvs) = self.uvs {
            for channel in 0..2 {
                let mut texcoord = accessor.texcoord_mut(channel);
                for (i, uv) in uvs.iter().enumerate() {
                    texcoord.set_float2(i as u32, *uv);
                }
            }
        }
        if let Some(colors) = self.colors {
            let mut color = accessor.color_mut();
            for (i, c) in colors.iter().enumerate() {
                color.set_float4(i as u32, *c);
            }
        }
        if let (Some(indices), Some(weights)) = (self.blend_indices, self.blend_weights) {
            let mut stream = accessor.stream_mut(redlilium_graphics::VertexAttributeSemantic::BlendIndices);
            for (i, bones) in indices.iter().enumerate() {
                stream.set_float4(i as u32, Vec4::from(bones.map(|b| b as f32)));
            }
            let mut stream = accessor.stream_mut(redlilium_graphics::VertexAttributeSemantic::BlendWeights);
            for (i, w) in weights.iter().enumerate() {
                stream.set_float4(i as u32, *w);
            }
        }
        Ok(accessor)
    }
}
