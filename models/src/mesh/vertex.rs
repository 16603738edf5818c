//! Standard vertex layouts of stored meshes and packed-normal helpers.

use std::sync::Arc;

use redlilium_core::math::{Vec3, Vec4, any_perpendicular};
use redlilium_graphics::{PixelFormat, VertexAttribute, VertexAttributeSemantic as S, VertexLayout};

use crate::error::{AssetError, AssetResult};

fn layout(attributes: &[VertexAttribute]) -> AssetResult<Arc<VertexLayout>> {
    VertexLayout::get(attributes, false)
        .ok_or_else(|| AssetError::Failed("cannot build standard vertex layout".to_string()))
}

/// Static mesh positions (buffer 0).
pub fn static_vb0_layout() -> AssetResult<Arc<VertexLayout>> {
    layout(&[VertexAttribute::new(S::Position, PixelFormat::R32G32B32Float)])
}

/// Static mesh shading data (buffer 1).
pub fn static_vb1_layout() -> AssetResult<Arc<VertexLayout>> {
    layout(&[
        VertexAttribute::new(S::TexCoord0, PixelFormat::R16G16Float).at_slot(1),
        VertexAttribute::new(S::Normal, PixelFormat::R10G10B10A2UNorm).at_slot(1),
        VertexAttribute::new(S::Tangent, PixelFormat::R10G10B10A2UNorm).at_slot(1),
        VertexAttribute::new(S::TexCoord1, PixelFormat::R16G16Float).at_slot(1),
    ])
}

/// Static mesh vertex colors (buffer 2).
pub fn static_vb2_layout() -> AssetResult<Arc<VertexLayout>> {
    layout(&[VertexAttribute::new(S::Color, PixelFormat::R8G8B8A8UNorm).at_slot(2)])
}

/// Skinned mesh interleaved vertex (buffer 0).
pub fn skinned_vb0_layout() -> AssetResult<Arc<VertexLayout>> {
    layout(&[
        VertexAttribute::new(S::Position, PixelFormat::R32G32B32Float),
        VertexAttribute::new(S::TexCoord0, PixelFormat::R16G16Float),
        VertexAttribute::new(S::Normal, PixelFormat::R10G10B10A2UNorm),
        VertexAttribute::new(S::Tangent, PixelFormat::R10G10B10A2UNorm),
        VertexAttribute::new(S::BlendIndices, PixelFormat::R8G8B8A8UInt),
        VertexAttribute::new(S::BlendWeights, PixelFormat::R16G16B16A16Float),
    ])
}

/// Whether vectors stored in `format` are packed into `[0, 1]`.
pub fn is_unsigned_normalized(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::R10G10B10A2UNorm
            | PixelFormat::R8G8B8A8UNorm
            | PixelFormat::R16G16B16A16UNorm
            | PixelFormat::R16G16UNorm
            | PixelFormat::R16UNorm
            | PixelFormat::R8UNorm
    )
}

/// Decode a normal or tangent read from a stream of `format` into `[-1, 1]`.
pub fn unpack_direction(format: PixelFormat, raw: Vec4) -> Vec4 {
    if is_unsigned_normalized(format) {
        Vec4::new(raw.x * 2.0 - 1.0, raw.y * 2.0 - 1.0, raw.z * 2.0 - 1.0, raw.w)
    } else {
        raw
    }
}

/// Encode a `[-1, 1]` direction for a stream of `format`. `w` passes through.
pub fn pack_direction(format: PixelFormat, v: Vec4) -> Vec4 {
    if is_unsigned_normalized(format) {
        Vec4::new(v.x * 0.5 + 0.5, v.y * 0.5 + 0.5, v.z * 0.5 + 0.5, v.w)
    } else {
        v
    }
}

/// Tangent sign stored in the `w` channel, decoded to `-1` or `1`.
pub fn tangent_sign(format: PixelFormat, raw_w: f32) -> f32 {
    let w = if is_unsigned_normalized(format) {
        raw_w * 2.0 - 1.0
    } else {
        raw_w
    };
    if w < 0.0 { -1.0 } else { 1.0 }
}

/// Encode a tangent sign for the `w` channel of `format`.
pub fn pack_tangent_sign(format: PixelFormat, sign: f32) -> f32 {
    if is_unsigned_normalized(format) {
        if sign < 0.0 { 0.0 } else { 1.0 }
    } else {
        sign
    }
}

/// Gram-Schmidt `tangent` against unit `normal`; a stable perpendicular when degenerate.
pub fn orthogonalize_tangent(normal: &Vec3, tangent: &Vec3) -> Vec3 {
    let t = tangent - normal * normal.dot(tangent);
    let len = t.norm();
    if len > 1e-6 {
        t / len
    } else {
        any_perpendicular(normal)
    }
}

/// Per-vertex normals from triangle faces (area weighted).
pub fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::zeros(); positions.len()];
    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let n = (positions[b] - positions[a]).cross(&(positions[c] - positions[a]));
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    for n in &mut normals {
        let len = n.norm();
        *n = if len > f32::EPSILON { *n / len } else { Vec3::y() };
    }
    normals
}
