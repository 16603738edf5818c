//! Vertex layout definitions for meshes.
//!
//! A [`VertexLayout`] is an ordered list of [`VertexAttribute`]s. Layouts are
//! interned process-wide: [`VertexLayout::get`] returns the same `Arc` for the
//! same element list, so the renderer can batch by pointer comparison.
//!
//! # Buffer Slots
//!
//! Each vertex buffer is bound to a slot (0, 1, 2, ...). Attributes reference
//! which slot they read from via `slot`. Model meshes keep one layout per
//! vertex buffer, each describing slot 0 of that buffer.
//!
//! # Example
//!
//! ```ignore
//! let layout = VertexLayout::get(
//!     &[
//!         VertexAttribute::new(VertexAttributeSemantic::Position, PixelFormat::R32G32B32Float),
//!         VertexAttribute::new(VertexAttributeSemantic::Normal, PixelFormat::R10G10B10A2UNorm),
//!     ],
//!     false,
//! )
//! .unwrap();
//! assert_eq!(layout.stride(), 16);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::types::PixelFormat;

/// Maximum number of vertex shader input elements in one layout.
pub const MAX_VS_ELEMENTS: usize = 32;

const LAYOUT_MAGIC: u32 = u32::from_le_bytes(*b"RLVL");

/// Semantic meaning of a vertex attribute.
///
/// The discriminant is the wire code used by serialized layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum VertexAttributeSemantic {
    Position = 1,
    Color = 2,
    Normal = 3,
    /// Tangent with handedness in `w`.
    Tangent = 4,
    BlendIndices = 5,
    BlendWeights = 6,
    TexCoord0 = 7,
    TexCoord1 = 8,
    TexCoord2 = 9,
    TexCoord3 = 10,
    TexCoord4 = 11,
    TexCoord5 = 12,
    TexCoord6 = 13,
    TexCoord7 = 14,
    Attribute0 = 15,
    Attribute1 = 16,
    Attribute2 = 17,
    Attribute3 = 18,
    /// Lightmap UVs, aliasing one of the texture coordinate channels.
    Lightmap = 19,
}

impl VertexAttributeSemantic {
    const ALL: [VertexAttributeSemantic; 19] = [
        Self::Position,
        Self::Color,
        Self::Normal,
        Self::Tangent,
        Self::BlendIndices,
        Self::BlendWeights,
        Self::TexCoord0,
        Self::TexCoord1,
        Self::TexCoord2,
        Self::TexCoord3,
        Self::TexCoord4,
        Self::TexCoord5,
        Self::TexCoord6,
        Self::TexCoord7,
        Self::Attribute0,
        Self::Attribute1,
        Self::Attribute2,
        Self::Attribute3,
        Self::Lightmap,
    ];

    /// Get the wire code for this semantic.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.index() == code)
    }

    /// Texture coordinate semantic for `channel` (0..=7).
    pub fn texcoord(channel: u32) -> Option<Self> {
        let code = Self::TexCoord0.index() as u32 + channel;
        if channel < 8 {
            Self::from_index(code as u8)
        } else {
            None
        }
    }

    /// `TexCoord1..=7` and `Lightmap`, which fall back to `TexCoord0` when missing.
    pub fn is_secondary_texcoord(&self) -> bool {
        (Self::TexCoord1.index()..=Self::TexCoord7.index()).contains(&self.index())
            || *self == Self::Lightmap
    }
}

/// A single element of a vertex layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: VertexAttributeSemantic,
    /// Vertex buffer slot the element is read from.
    pub slot: u8,
    /// Byte offset inside the vertex; recomputed unless offsets are explicit.
    pub offset: u8,
    /// Element advances per instance instead of per vertex.
    pub per_instance: bool,
    pub format: PixelFormat,
}

impl VertexAttribute {
    /// Per-vertex element in slot 0 with an automatic offset.
    pub fn new(semantic: VertexAttributeSemantic, format: PixelFormat) -> Self {
        Self {
            semantic,
            slot: 0,
            offset: 0,
            per_instance: false,
            format,
        }
    }

    /// Set the buffer slot.
    pub fn at_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    /// Set an explicit byte offset.
    pub fn at_offset(mut self, offset: u8) -> Self {
        self.offset = offset;
        self
    }

    /// Mark as per-instance data.
    pub fn per_instance(mut self) -> Self {
        self.per_instance = true;
        self
    }

    /// Size of the element in bytes.
    pub fn size(&self) -> u32 {
        self.format.size_in_bytes()
    }
}

/// Interned, immutable vertex layout.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

type Registry = Mutex<HashMap<Vec<VertexAttribute>, Arc<VertexLayout>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl VertexLayout {
    /// Get the shared layout for `attributes`.
    ///
    /// Without `explicit_offsets` the elements are sorted by slot and semantic
    /// and packed tightly per slot, so the input order does not matter.
    /// Returns `None` for more than [`MAX_VS_ELEMENTS`] elements or a repeated semantic.
    pub fn get(attributes: &[VertexAttribute], explicit_offsets: bool) -> Option<Arc<VertexLayout>> {
        if attributes.len() > MAX_VS_ELEMENTS {
            log::warn!(
                "Vertex layout has {} elements, limit is {MAX_VS_ELEMENTS}",
                attributes.len()
            );
            return None;
        }
        for (i, a) in attributes.iter().enumerate() {
            if attributes[..i].iter().any(|b| b.semantic == a.semantic) {
                log::warn!("Vertex layout repeats semantic {:?}", a.semantic);
                return None;
            }
        }

        let mut key = attributes.to_vec();
        if !explicit_offsets {
            key.sort_by_key(|a| (a.slot, a.semantic));
            let mut offsets = [0u32; 256];
            for a in key.iter_mut() {
                let offset = offsets[a.slot as usize];
                if offset > u8::MAX as u32 {
                    log::warn!("Vertex layout slot {} exceeds 255 bytes", a.slot);
                    return None;
                }
                a.offset = offset as u8;
                offsets[a.slot as usize] = offset + a.size();
            }
        }

        let mut cache = registry().lock();
        if let Some(layout) = cache.get(&key) {
            return Some(Arc::clone(layout));
        }
        let stride = key
            .iter()
            .map(|a| a.offset as u32 + a.size())
            .max()
            .unwrap_or(0);
        let layout = Arc::new(VertexLayout {
            attributes: key.clone(),
            stride,
        });
        log::trace!("VertexLayout: interned {:?}", key);
        cache.insert(key, Arc::clone(&layout));
        Some(layout)
    }

    /// Drop every interned layout. Layouts still referenced stay alive,
    /// but later calls to [`VertexLayout::get`] create fresh objects.
    pub fn clear_cache() {
        if let Some(cache) = REGISTRY.get() {
            let mut cache = cache.lock();
            log::debug!("VertexLayout: clearing {} cached layouts", cache.len());
            cache.clear();
        }
    }

    /// Number of interned layouts.
    pub fn cached_count() -> usize {
        REGISTRY.get().map(|c| c.lock().len()).unwrap_or(0)
    }

    /// Get the elements.
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Vertex stride: `max(offset + size)` over all elements.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Stride of the elements read from `slot`.
    pub fn slot_stride(&self, slot: u8) -> u32 {
        self.attributes
            .iter()
            .filter(|a| a.slot == slot)
            .map(|a| a.offset as u32 + a.size())
            .max()
            .unwrap_or(0)
    }

    /// Find the element with the given semantic.
    pub fn find_element(&self, semantic: VertexAttributeSemantic) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.semantic == semantic)
    }

    /// Check if the layout has an element with the given semantic.
    pub fn has_semantic(&self, semantic: VertexAttributeSemantic) -> bool {
        self.find_element(semantic).is_some()
    }

    /// Merge `reference` into `base`.
    ///
    /// Returns `base` itself when nothing changes. Missing texture coordinate
    /// channels alias the existing `TexCoord0` element. Added elements use
    /// `missing_slot_override` as their slot when it is set.
    /// Returns `None` when the result would exceed [`MAX_VS_ELEMENTS`].
    pub fn merge(
        base: &Arc<VertexLayout>,
        reference: &Arc<VertexLayout>,
        remove_unused: bool,
        add_missing: bool,
        missing_slot_override: Option<u8>,
    ) -> Option<Arc<VertexLayout>> {
        if Arc::ptr_eq(base, reference) {
            return Some(Arc::clone(base));
        }
        let mut modified = false;
        let mut elements = base.attributes.clone();
        if remove_unused {
            let before = elements.len();
            elements.retain(|e| reference.has_semantic(e.semantic));
            modified |= elements.len() != before;
        }
        if add_missing {
            for e in &reference.attributes {
                if base.has_semantic(e.semantic) {
                    continue;
                }
                let mut added = VertexAttribute {
                    offset: 0,
                    ..*e
                };
                if e.semantic.is_secondary_texcoord() {
                    if let Some(tex0) = base.find_element(VertexAttributeSemantic::TexCoord0)
                    {
                        added = VertexAttribute {
                            semantic: e.semantic,
                            ..*tex0
                        };
                    }
                }
                if let Some(slot) = missing_slot_override {
                    added.slot = slot;
                }
                elements.push(added);
                modified = true;
            }
        }
        if !modified {
            return Some(Arc::clone(base));
        }
        Self::get(&elements, true)
    }

    /// Serialize to the wire form:
    /// `[u32 magic][u8 count] count x {u8 type, u8 slot, u8 offset, u8 perInstance, u32 format}`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.attributes.len() * 8);
        out.extend_from_slice(&LAYOUT_MAGIC.to_le_bytes());
        out.push(self.attributes.len() as u8);
        for a in &self.attributes {
            out.extend_from_slice(&[a.semantic.index(), a.slot, a.offset, a.per_instance as u8]);
            out.extend_from_slice(&a.format.code().to_le_bytes());
        }
        out
    }

    /// Parse the wire form. Also accepts the legacy form
    /// `[u8 count] count x {u8 type, u8 slot, u8 offset, u8 perInstance, u8 format}`.
    ///
    /// Returns the layout and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Arc<VertexLayout>, usize), String> {
        let modern = data.len() >= 4 && data[..4] == LAYOUT_MAGIC.to_le_bytes();
        let (mut pos, record_size) = if modern { (4, 8) } else { (0, 5) };
        let count = *data.get(pos).ok_or("missing element count")? as usize;
        pos += 1;
        if count > MAX_VS_ELEMENTS {
            return Err(format!("too many vertex elements: {count}"));
        }
        let end = pos + count * record_size;
        if data.len() < end {
            return Err("truncated vertex layout".to_string());
        }
        let mut elements = Vec::with_capacity(count);
        for record in data[pos..end].chunks_exact(record_size) {
            let semantic = VertexAttributeSemantic::from_index(record[0])
                .ok_or_else(|| format!("unknown vertex element type {}", record[0]))?;
            let code = if modern {
                u32::from_le_bytes([record[4], record[5], record[6], record[7]])
            } else {
                record[4] as u32
            };
            let format = PixelFormat::from_code(code)
                .ok_or_else(|| format!("unknown pixel format {code}"))?;
            elements.push(VertexAttribute {
                semantic,
                slot: record[1],
                offset: record[2],
                per_instance: record[3] != 0,
                format,
            });
        }
        let layout = Self::get(&elements, true).ok_or("invalid vertex layout")?;
        Ok((layout, end))
    }
}

static_assertions::assert_impl_all!(VertexLayout: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use VertexAttributeSemantic as S;

    fn pos() -> VertexAttribute {
        VertexAttribute::new(S::Position, PixelFormat::R32G32B32Float)
    }

    fn normal() -> VertexAttribute {
        VertexAttribute::new(S::Normal, PixelFormat::R10G10B10A2UNorm)
    }

    fn uv() -> VertexAttribute {
        VertexAttribute::new(S::TexCoord0, PixelFormat::R16G16Float)
    }

    #[test]
    fn equal_inputs_are_reference_equal() {
        let a = VertexLayout::get(&[pos(), normal()], false).unwrap();
        let b = VertexLayout::get(&[pos(), normal()], false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn order_is_canonicalized_without_explicit_offsets() {
        let a = VertexLayout::get(&[pos(), uv(), normal()], false).unwrap();
        let b = VertexLayout::get(&[normal(), pos(), uv()], false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.stride(), 20);
        assert_eq!(a.find_element(S::Normal).unwrap().offset, 12);
        assert_eq!(a.find_element(S::TexCoord0).unwrap().offset, 16);
    }

    #[test]
    fn explicit_offsets_keep_order_and_differ() {
        let a = VertexLayout::get(&[pos(), normal().at_offset(12)], true).unwrap();
        let b = VertexLayout::get(&[normal(), pos().at_offset(4)], true).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.attributes()[0].semantic, S::Normal);
        assert_eq!(b.stride(), 16);
    }

    #[test]
    fn duplicate_semantic_is_rejected() {
        assert!(VertexLayout::get(&[pos(), pos().at_slot(1)], false).is_none());
    }

    #[test]
    fn merge_returns_base_when_satisfied() {
        let base = VertexLayout::get(&[pos(), normal(), uv()], false).unwrap();
        let reference = VertexLayout::get(&[pos(), normal()], false).unwrap();
        let merged = VertexLayout::merge(&base, &reference, false, true, None).unwrap();
        assert!(Arc::ptr_eq(&merged, &base));
    }

    #[test]
    fn merge_adds_missing_with_slot_override() {
        let base = VertexLayout::get(&[pos()], false).unwrap();
        let reference = VertexLayout::get(&[pos(), normal()], false).unwrap();
        let merged = VertexLayout::merge(&base, &reference, false, true, Some(3)).unwrap();
        let n = merged.find_element(S::Normal).unwrap();
        assert_eq!(n.slot, 3);
        assert_eq!(n.offset, 0);
    }

    #[test]
    fn merge_aliases_missing_texcoords() {
        let base = VertexLayout::get(&[pos(), uv()], false).unwrap();
        let tex1 = VertexAttribute::new(S::TexCoord1, PixelFormat::R32G32Float);
        let reference = VertexLayout::get(&[pos(), tex1], false).unwrap();
        let merged = VertexLayout::merge(&base, &reference, true, true, None).unwrap();
        let t1 = merged.find_element(S::TexCoord1).unwrap();
        assert_eq!(t1.format, PixelFormat::R16G16Float);
        assert_eq!(t1.offset, 12);
        assert!(!merged.has_semantic(S::TexCoord0));
    }

    #[test]
    fn get_rejects_above_element_limit() {
        let too_many: Vec<_> = (0..MAX_VS_ELEMENTS + 1)
            .map(|i| pos().at_slot(i as u8))
            .collect();
        assert!(VertexLayout::get(&too_many, true).is_none());
    }

    #[test]
    fn wire_forms_decode() {
        let layout = VertexLayout::get(&[pos(), normal()], false).unwrap();
        let bytes = layout.encode();
        let (decoded, used) = VertexLayout::decode(&bytes).unwrap();
        assert!(Arc::ptr_eq(&decoded, &layout));
        assert_eq!(used, bytes.len());

        let legacy = [1u8, S::Position.index(), 0, 0, 0, PixelFormat::R32G32B32Float.code() as u8];
        let (decoded, used) = VertexLayout::decode(&legacy).unwrap();
        assert_eq!(used, 6);
        assert_eq!(decoded.stride(), 12);
        assert!(VertexLayout::decode(&[2u8, 1, 0]).is_err());
    }
}
