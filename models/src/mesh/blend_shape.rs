//! Morph targets of skinned meshes.

use redlilium_core::math::Vec3;

use crate::error::{AssetError, AssetResult};
use crate::serialization::{BLEND_SHAPE_NAME_MAX, ReadStream, WriteStream};

/// One sparse vertex delta of a blend shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendShapeVertex {
    pub position_delta: Vec3,
    pub normal_delta: Vec3,
    pub vertex_index: u32,
}

impl BlendShapeVertex {
    pub fn new(vertex_index: u32, position_delta: Vec3) -> Self {
        Self {
            position_delta,
            normal_delta: Vec3::zeros(),
            vertex_index,
        }
    }

    pub fn with_normal_delta(mut self, normal_delta: Vec3) -> Self {
        self.normal_delta = normal_delta;
        self
    }
}

/// Named morph target.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendShape {
    pub name: String,
    /// Asset-side weight multiplied with the instance weight.
    pub weight: f32,
    pub use_normals: bool,
    /// First vertex touched by the deltas.
    pub min_vertex_index: u32,
    /// Last vertex touched by the deltas.
    pub max_vertex_index: u32,
    /// Deltas sorted by vertex index.
    pub vertices: Vec<BlendShapeVertex>,
}

impl BlendShape {
    /// Shape with weight `1`; the dirty range and normal usage are derived from `vertices`.
    pub fn new(name: impl Into<String>, mut vertices: Vec<BlendShapeVertex>) -> Self {
        vertices.sort_by_key(|v| v.vertex_index);
        let min_vertex_index = vertices.first().map_or(0, |v| v.vertex_index);
        let max_vertex_index = vertices.last().map_or(0, |v| v.vertex_index);
        let use_normals = vertices.iter().any(|v| v.normal_delta != Vec3::zeros());
        Self {
            name: name.into(),
            weight: 1.0,
            use_normals,
            min_vertex_index,
            max_vertex_index,
            vertices,
        }
    }

    /// Named header entry without payload (filled by the mesh chunk).
    pub(crate) fn header(name: String, weight: f32) -> Self {
        Self {
            name,
            weight,
            use_normals: false,
            min_vertex_index: 0,
            max_vertex_index: 0,
            vertices: Vec::new(),
        }
    }

    /// Check index ordering and bounds against the mesh vertex count.
    pub fn validate(&self, vertex_count: u32) -> AssetResult<()> {
        let mut previous = 0;
        for v in &self.vertices {
            if v.vertex_index < previous {
                return Err(AssetError::InvalidData(format!(
                    "blend shape '{}' has unsorted vertex indices",
                    self.name
                )));
            }
            if v.vertex_index >= vertex_count {
                return Err(AssetError::InvalidData(format!(
                    "blend shape '{}' references vertex {} of {vertex_count}",
                    self.name, v.vertex_index
                )));
            }
            if !(self.min_vertex_index..=self.max_vertex_index).contains(&v.vertex_index) {
                return Err(AssetError::InvalidData(format!(
                    "blend shape '{}' vertex {} lies outside its range {}..={}",
                    self.name, v.vertex_index, self.min_vertex_index, self.max_vertex_index
                )));
            }
            previous = v.vertex_index;
        }
        if !self.vertices.is_empty()
            && (self.min_vertex_index > self.max_vertex_index || self.max_vertex_index >= vertex_count)
        {
            return Err(AssetError::InvalidData(format!(
                "blend shape '{}' has an invalid vertex range",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn write_header(&self, stream: &mut WriteStream) {
        stream.write_string(&self.name, BLEND_SHAPE_NAME_MAX);
        stream.write_f32(self.weight);
    }

    pub(crate) fn read_header(stream: &mut ReadStream<'_>) -> AssetResult<Self> {
        let name = stream.read_string(BLEND_SHAPE_NAME_MAX)?;
        let weight = stream.read_f32()?;
        Ok(Self::header(name, weight))
    }

    pub(crate) fn write_payload(&self, stream: &mut WriteStream) {
        stream.write_bool(self.use_normals);
        stream.write_u32(self.min_vertex_index);
        stream.write_u32(self.max_vertex_index);
        stream.write_u32(self.vertices.len() as u32);
        for v in &self.vertices {
            stream.write_vec3(&v.position_delta);
            stream.write_vec3(&v.normal_delta);
            stream.write_u32(v.vertex_index);
        }
    }

    pub(crate) fn read_payload(&mut self, stream: &mut ReadStream<'_>) -> AssetResult<()> {
        self.use_normals = stream.read_bool()?;
        self.min_vertex_index = stream.read_u32()?;
        self.max_vertex_index = stream.read_u32()?;
        let count = stream.read_u32()? as usize;
        if count * 28 > stream.remaining() {
            return Err(AssetError::InvalidData(format!(
                "blend shape '{}' declares {count} vertices past the end of the chunk",
                self.name
            )));
        }
        self.vertices = (0..count)
            .map(|_| {
                let position_delta = stream.read_vec3()?;
                let normal_delta = stream.read_vec3()?;
                let vertex_index = stream.read_u32()?;
                Ok(BlendShapeVertex {
                    position_delta,
                    normal_delta,
                    vertex_index,
                })
            })
            .collect::<AssetResult<_>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_derived_from_deltas() {
        let shape = BlendShape::new(
            "Smile",
            vec![
                BlendShapeVertex::new(9, Vec3::y()),
                BlendShapeVertex::new(5, Vec3::y()),
            ],
        );
        assert_eq!((shape.min_vertex_index, shape.max_vertex_index), (5, 9));
        assert_eq!(shape.vertices[0].vertex_index, 5);
        assert!(!shape.use_normals);
        assert!(shape.validate(10).is_ok());
        assert!(shape.validate(9).is_err());
    }

    #[test]
    fn range_must_cover_every_delta() {
        let mut shape = BlendShape::new(
            "Frown",
            vec![
                BlendShapeVertex::new(2, Vec3::y()).with_normal_delta(Vec3::x()),
                BlendShapeVertex::new(5, Vec3::y()),
            ],
        );
        assert!(shape.validate(8).is_ok());
        shape.min_vertex_index = 4;
        shape.max_vertex_index = 6;
        assert!(matches!(shape.validate(8), Err(AssetError::InvalidData(_))));
        shape.min_vertex_index = 2;
        shape.max_vertex_index = 4;
        assert!(shape.validate(8).is_err());
    }

    #[test]
    fn payload_roundtrip() {
        let shape = BlendShape::new(
            "Blink",
            vec![BlendShapeVertex::new(2, Vec3::x()).with_normal_delta(Vec3::z())],
        );
        let mut w = WriteStream::new();
        shape.write_header(&mut w);
        shape.write_payload(&mut w);
        let bytes = w.into_bytes();
        let mut r = ReadStream::new(&bytes);
        let mut back = BlendShape::read_header(&mut r).unwrap();
        back.read_payload(&mut r).unwrap();
        assert_eq!(back, shape);
        assert!(back.use_normals);
    }
}
