//! Little-endian binary streams used by the model chunk formats.

use redlilium_core::math::{Mat4, Quat, Vec3, quat_from_xyzw, quat_to_array};
use redlilium_core::{BoundingBox, BoundingSphere, Guid, Transform};

use crate::error::{AssetError, AssetResult};

/// Maximum length of a blend shape name.
pub const BLEND_SHAPE_NAME_MAX: usize = 13;
/// Maximum length of a skeleton node name.
pub const NODE_NAME_MAX: usize = 71;
/// Maximum length of a material slot name.
pub const SLOT_NAME_MAX: usize = 63;

/// Cursor over a chunk's bytes.
pub struct ReadStream<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ReadStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> AssetResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(AssetError::InvalidData(format!(
                "unexpected end of data: need {len} bytes at {}, {} left",
                self.position,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> AssetResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> AssetResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> AssetResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> AssetResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> AssetResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> AssetResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> AssetResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Read an `i32` count and reject negative or implausible values.
    pub fn read_count(&mut self, max: usize) -> AssetResult<usize> {
        let count = self.read_i32()?;
        if count < 0 || count as usize > max {
            return Err(AssetError::InvalidData(format!(
                "count {count} out of range (max {max})"
            )));
        }
        Ok(count as usize)
    }

    pub fn read_vec3(&mut self) -> AssetResult<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> AssetResult<Quat> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(quat_from_xyzw(x, y, z, w))
    }

    pub fn read_transform(&mut self) -> AssetResult<Transform> {
        let translation = self.read_vec3()?;
        let orientation = self.read_quat()?;
        let scale = self.read_vec3()?;
        Ok(Transform::new(translation, orientation, scale))
    }

    /// Sixteen floats, row by row.
    pub fn read_matrix(&mut self) -> AssetResult<Mat4> {
        let mut m = Mat4::zeros();
        for r in 0..4 {
            for c in 0..4 {
                m[(r, c)] = self.read_f32()?;
            }
        }
        Ok(m)
    }

    pub fn read_box(&mut self) -> AssetResult<BoundingBox> {
        let min = self.read_vec3()?;
        let max = self.read_vec3()?;
        Ok(BoundingBox::new(min, max))
    }

    pub fn read_sphere(&mut self) -> AssetResult<BoundingSphere> {
        let center = self.read_vec3()?;
        let radius = self.read_f32()?;
        Ok(BoundingSphere::new(center, radius))
    }

    pub fn read_guid(&mut self) -> AssetResult<Guid> {
        Ok(Guid::from_bytes(self.read_array()?))
    }

    /// Length-prefixed UTF-8 string no longer than `max_len` bytes.
    pub fn read_string(&mut self, max_len: usize) -> AssetResult<String> {
        let len = self.read_i32()?;
        if len < 0 || len as usize > max_len {
            return Err(AssetError::InvalidData(format!(
                "string length {len} exceeds limit {max_len}"
            )));
        }
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| AssetError::InvalidData(format!("string is not UTF-8: {e}")))
    }

    /// `[i32 count]` pairs of strings.
    pub fn read_string_pairs(&mut self, max_len: usize) -> AssetResult<Vec<(String, String)>> {
        let count = self.read_count(u16::MAX as usize)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.read_string(max_len)?;
            let value = self.read_string(max_len)?;
            out.push((key, value));
        }
        Ok(out)
    }
}

/// Growable output buffer for chunk writers.
#[derive(Debug, Default)]
pub struct WriteStream {
    data: Vec<u8>,
}

impl WriteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_vec3(&mut self, v: &Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    pub fn write_quat(&mut self, q: &Quat) {
        for v in quat_to_array(*q) {
            self.write_f32(v);
        }
    }

    pub fn write_transform(&mut self, t: &Transform) {
        self.write_vec3(&t.translation);
        self.write_quat(&t.orientation);
        self.write_vec3(&t.scale);
    }

    pub fn write_matrix(&mut self, m: &Mat4) {
        for r in 0..4 {
            for c in 0..4 {
                self.write_f32(m[(r, c)]);
            }
        }
    }

    pub fn write_box(&mut self, b: &BoundingBox) {
        self.write_vec3(&b.min);
        self.write_vec3(&b.max);
    }

    pub fn write_sphere(&mut self, s: &BoundingSphere) {
        self.write_vec3(&s.center);
        self.write_f32(s.radius);
    }

    pub fn write_guid(&mut self, id: &Guid) {
        self.write_bytes(&id.to_bytes());
    }

    /// Write a length-prefixed string, truncated to `max_len` bytes on a char boundary.
    pub fn write_string(&mut self, s: &str, max_len: usize) {
        let mut end = s.len().min(max_len);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        if end < s.len() {
            log::warn!("Truncating name '{s}' to {max_len} bytes");
        }
        self.write_i32(end as i32);
        self.write_bytes(&s.as_bytes()[..end]);
    }

    pub fn write_string_pairs(&mut self, pairs: &[(String, String)], max_len: usize) {
        self.write_i32(pairs.len() as i32);
        for (key, value) in pairs {
            self.write_string(key, max_len);
            self.write_string(value, max_len);
        }
    }
}
