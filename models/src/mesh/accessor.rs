//! Typed read/write access to mesh vertex and index buffers.
//!
//! A [`MeshAccessor`] holds up to four buffers (index plus three vertex
//! buffers) together with their layouts. [`Stream`] and [`StreamMut`] expose
//! one vertex element as a column that converts through the element's
//! [`PixelFormatSampler`].

use std::sync::Arc;

use redlilium_core::math::{Vec2, Vec3, Vec4};
use redlilium_graphics::{
    GraphicsDevice, PixelFormat, PixelFormatSampler, VertexAttributeSemantic, VertexLayout,
};

use super::vertex::{pack_direction, unpack_direction};
use super::{Mesh, MeshBufferType, MeshInitData};
use crate::error::{AssetError, AssetResult};

/// Read-only column over one vertex element (or the index buffer).
#[derive(Clone, Copy)]
pub struct Stream<'a> {
    data: &'a [u8],
    count: u32,
    stride: u32,
    format: PixelFormat,
    sampler: Option<PixelFormatSampler>,
}

impl<'a> Stream<'a> {
    /// Column starting at the first element's bytes.
    pub fn new(data: &'a [u8], count: u32, stride: u32, format: PixelFormat) -> Self {
        Self {
            data,
            count,
            stride,
            format,
            sampler: PixelFormatSampler::get(format),
        }
    }

    /// Stream that reports `is_valid() == false`.
    pub fn invalid() -> Self {
        Self {
            data: &[],
            count: 0,
            stride: 0,
            format: PixelFormat::Unknown,
            sampler: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.sampler.is_some() && self.count > 0
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Dense array of `format` with no gaps between elements.
    pub fn is_linear(&self, format: PixelFormat) -> bool {
        self.is_valid() && self.format == format && self.stride == format.size_in_bytes()
    }

    /// The raw bytes when the stream is linear.
    pub fn linear_bytes(&self) -> Option<&'a [u8]> {
        self.is_linear(self.format)
            .then(|| &self.data[..(self.count * self.stride) as usize])
    }

    fn element(&self, i: u32) -> &'a [u8] {
        let start = (i * self.stride) as usize;
        &self.data[start..start + self.format.size_in_bytes() as usize]
    }

    pub fn get_float4(&self, i: u32) -> Vec4 {
        match &self.sampler {
            Some(sampler) => sampler.read(self.element(i)),
            None => Vec4::zeros(),
        }
    }

    pub fn get_float3(&self, i: u32) -> Vec3 {
        self.get_float4(i).xyz()
    }

    pub fn get_float2(&self, i: u32) -> Vec2 {
        self.get_float4(i).xy()
    }

    pub fn get_float1(&self, i: u32) -> f32 {
        self.get_float4(i).x
    }

    /// Index value for index streams.
    pub fn get_index(&self, i: u32) -> u32 {
        let e = self.element(i);
        match self.format {
            PixelFormat::R16UInt => u16::from_le_bytes([e[0], e[1]]) as u32,
            PixelFormat::R32UInt => u32::from_le_bytes([e[0], e[1], e[2], e[3]]),
            _ => self.get_float1(i) as u32,
        }
    }

    /// All elements as `Vec3`.
    pub fn to_vec3(&self) -> Vec<Vec3> {
        (0..self.count).map(|i| self.get_float3(i)).collect()
    }

    /// All indices widened to `u32`.
    pub fn to_indices(&self) -> Vec<u32> {
        (0..self.count).map(|i| self.get_index(i)).collect()
    }
}

/// Mutable column over one vertex element.
pub struct StreamMut<'a> {
    data: &'a mut [u8],
    count: u32,
    stride: u32,
    format: PixelFormat,
    sampler: Option<PixelFormatSampler>,
}

impl<'a> StreamMut<'a> {
    pub fn new(data: &'a mut [u8], count: u32, stride: u32, format: PixelFormat) -> Self {
        Self {
            data,
            count,
            stride,
            format,
            sampler: PixelFormatSampler::get(format),
        }
    }

    pub fn invalid() -> Self {
        Self {
            data: &mut [],
            count: 0,
            stride: 0,
            format: PixelFormat::Unknown,
            sampler: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.sampler.is_some() && self.count > 0
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_linear(&self, format: PixelFormat) -> bool {
        self.is_valid() && self.format == format && self.stride == format.size_in_bytes()
    }

    /// Read-only view of the same column.
    pub fn as_stream(&self) -> Stream<'_> {
        Stream {
            data: &*self.data,
            count: self.count,
            stride: self.stride,
            format: self.format,
            sampler: self.sampler,
        }
    }

    fn range(&self, i: u32) -> std::ops::Range<usize> {
        let start = (i * self.stride) as usize;
        start..start + self.format.size_in_bytes() as usize
    }

    pub fn get_float4(&self, i: u32) -> Vec4 {
        self.as_stream().get_float4(i)
    }

    pub fn get_float3(&self, i: u32) -> Vec3 {
        self.get_float4(i).xyz()
    }

    pub fn set_float4(&mut self, i: u32, v: Vec4) {
        let range = self.range(i);
        if let Some(sampler) = &self.sampler {
            sampler.write(&mut self.data[range], &v);
        }
    }

    /// Write xyz and keep the stored `w`.
    pub fn set_float3(&mut self, i: u32, v: Vec3) {
        let w = self.get_float4(i).w;
        self.set_float4(i, Vec4::new(v.x, v.y, v.z, w));
    }

    pub fn set_float2(&mut self, i: u32, v: Vec2) {
        let old = self.get_float4(i);
        self.set_float4(i, Vec4::new(v.x, v.y, old.z, old.w));
    }

    pub fn set_float1(&mut self, i: u32, v: f32) {
        let old = self.get_float4(i);
        self.set_float4(i, Vec4::new(v, old.y, old.z, old.w));
    }

    /// Write an index into an index stream without going through floats.
    pub fn set_index(&mut self, i: u32, value: u32) {
        let range = self.range(i);
        match self.format {
            PixelFormat::R16UInt => self.data[range].copy_from_slice(&(value as u16).to_le_bytes()),
            PixelFormat::R32UInt => self.data[range].copy_from_slice(&value.to_le_bytes()),
            _ => self.set_float1(i, value as f32),
        }
    }

    /// Copy a dense array of this stream's format into the column.
    pub fn set_linear(&mut self, src: &[u8]) {
        let size = self.format.size_in_bytes() as usize;
        if size == 0 {
            return;
        }
        if self.stride as usize == size {
            let len = src.len().min((self.count as usize) * size);
            self.data[..len].copy_from_slice(&src[..len]);
            return;
        }
        for (i, element) in src.chunks_exact(size).take(self.count as usize).enumerate() {
            let range = self.range(i as u32);
            self.data[range].copy_from_slice(element);
        }
    }
}

/// Column over `semantic` inside one vertex buffer's bytes.
pub(crate) fn element_stream<'a>(
    data: &'a [u8],
    layout: &VertexLayout,
    semantic: VertexAttributeSemantic,
) -> Stream<'a> {
    let (Some(element), stride) = (layout.find_element(semantic), layout.stride()) else {
        return Stream::invalid();
    };
    if stride == 0 {
        return Stream::invalid();
    }
    let count = data.len() as u32 / stride;
    let offset = element.offset as usize;
    if offset > data.len() {
        return Stream::invalid();
    }
    Stream::new(&data[offset..], count, stride, element.format)
}

pub(crate) fn element_stream_mut<'a>(
    data: &'a mut [u8],
    layout: &VertexLayout,
    semantic: VertexAttributeSemantic,
) -> StreamMut<'a> {
    let (Some(element), stride) = (layout.find_element(semantic), layout.stride()) else {
        return StreamMut::invalid();
    };
    if stride == 0 {
        return StreamMut::invalid();
    }
    let count = data.len() as u32 / stride;
    let offset = element.offset as usize;
    if offset > data.len() {
        return StreamMut::invalid();
    }
    StreamMut::new(&mut data[offset..], count, stride, element.format)
}

#[derive(Default)]
enum BufferData {
    #[default]
    Empty,
    /// Borrowed CPU cache of a mesh; copied on first write.
    Shared(Arc<[u8]>),
    Owned(Vec<u8>),
}

impl BufferData {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Shared(data) => data,
            Self::Owned(data) => data,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        if let Self::Shared(data) = self {
            *self = Self::Owned(data.to_vec());
        }
        match self {
            Self::Owned(data) => data,
            _ => &mut [],
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

#[derive(Default)]
struct AccessorBuffer {
    data: BufferData,
    layout: Option<Arc<VertexLayout>>,
    index_16bit: bool,
}

/// Loads, allocates and edits the buffers of one mesh.
#[derive(Default)]
pub struct MeshAccessor {
    buffers: [AccessorBuffer; 4],
}

impl MeshAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull buffers out of `mesh`.
    ///
    /// The mesh's CPU cache is borrowed when present, unless `force_gpu` is set
    /// or the mesh belongs to a virtual model; otherwise the GPU buffer is
    /// downloaded, which is refused on the main thread.
    pub fn load_mesh(
        &mut self,
        mesh: &Mesh,
        force_gpu: bool,
        buffers: &[MeshBufferType],
    ) -> AssetResult<()> {
        for &ty in buffers {
            let cached = (!force_gpu && !mesh.is_virtual())
                .then(|| mesh.cpu_data(ty).cloned())
                .flatten();
            let data = match cached {
                Some(data) => BufferData::Shared(data),
                None => {
                    let gpu = match ty {
                        MeshBufferType::Index => mesh.index_buffer(),
                        _ => mesh.vertex_buffer(ty.vertex_slot().unwrap_or(0)),
                    };
                    match gpu {
                        Some(buffer) => BufferData::Owned(buffer.download().map_err(|e| {
                            AssetError::InvalidOperation(format!("mesh download failed: {e}"))
                        })?),
                        // Optional vertex buffers may be absent.
                        None if ty != MeshBufferType::Index && ty != MeshBufferType::Vertex0 => {
                            continue;
                        }
                        None => {
                            return Err(AssetError::InvalidOperation(format!(
                                "mesh has no {ty:?} buffer"
                            )));
                        }
                    }
                }
            };
            let slot = &mut self.buffers[ty as usize];
            slot.data = data;
            slot.index_16bit = mesh.use_16bit_index_buffer();
            slot.layout = ty.vertex_slot().and_then(|i| mesh.vertex_layout(i).cloned());
        }
        Ok(())
    }

    /// Take ownership of raw vertex bytes described by `layout`.
    pub fn load_buffer(
        &mut self,
        ty: MeshBufferType,
        bytes: Vec<u8>,
        layout: Arc<VertexLayout>,
    ) -> AssetResult<()> {
        if ty == MeshBufferType::Index {
            return Err(AssetError::InvalidOperation(
                "use load_index_buffer for index data".to_string(),
            ));
        }
        let stride = layout.stride() as usize;
        if stride == 0 || bytes.len() % stride != 0 {
            return Err(AssetError::InvalidData(format!(
                "{} bytes is not a multiple of the vertex stride {stride}",
                bytes.len()
            )));
        }
        self.buffers[ty as usize] = AccessorBuffer {
            data: BufferData::Owned(bytes),
            layout: Some(layout),
            index_16bit: false,
        };
        Ok(())
    }

    pub fn load_index_buffer(&mut self, bytes: Vec<u8>, use_16bit: bool) -> AssetResult<()> {
        let stride = if use_16bit { 2 } else { 4 };
        if bytes.len() % stride != 0 {
            return Err(AssetError::InvalidData(format!(
                "{} bytes is not a multiple of the index stride {stride}",
                bytes.len()
            )));
        }
        self.buffers[MeshBufferType::Index as usize] = AccessorBuffer {
            data: BufferData::Owned(bytes),
            layout: None,
            index_16bit: use_16bit,
        };
        Ok(())
    }

    /// Allocate a zeroed vertex buffer of `count` elements.
    pub fn allocate_buffer(
        &mut self,
        ty: MeshBufferType,
        count: u32,
        layout: Arc<VertexLayout>,
    ) -> AssetResult<()> {
        let size = count as usize * layout.stride() as usize;
        self.load_buffer(ty, vec![0; size], layout)
    }

    pub fn allocate_index_buffer(&mut self, count: u32, use_16bit: bool) {
        let stride = if use_16bit { 2 } else { 4 };
        self.buffers[MeshBufferType::Index as usize] = AccessorBuffer {
            data: BufferData::Owned(vec![0; count as usize * stride]),
            layout: None,
            index_16bit: use_16bit,
        };
    }

    pub fn has_buffer(&self, ty: MeshBufferType) -> bool {
        !self.buffers[ty as usize].data.is_empty()
    }

    pub fn layout(&self, ty: MeshBufferType) -> Option<&Arc<VertexLayout>> {
        self.buffers[ty as usize].layout.as_ref()
    }

    pub fn buffer_bytes(&self, ty: MeshBufferType) -> Option<&[u8]> {
        let buffer = &self.buffers[ty as usize];
        (!buffer.data.is_empty()).then(|| buffer.data.bytes())
    }

    pub fn uses_16bit_indices(&self) -> bool {
        self.buffers[MeshBufferType::Index as usize].index_16bit
    }

    /// Vertices in the first vertex buffer.
    pub fn vertex_count(&self) -> u32 {
        let buffer = &self.buffers[MeshBufferType::Vertex0 as usize];
        match &buffer.layout {
            Some(layout) if layout.stride() > 0 => {
                buffer.data.bytes().len() as u32 / layout.stride()
            }
            _ => 0,
        }
    }

    pub fn index_count(&self) -> u32 {
        let stride = if self.uses_16bit_indices() { 2 } else { 4 };
        self.buffers[MeshBufferType::Index as usize].data.bytes().len() as u32 / stride
    }

    fn buffer_with(&self, semantic: VertexAttributeSemantic) -> Option<usize> {
        (MeshBufferType::Vertex0 as usize..=MeshBufferType::Vertex2 as usize).find(|&i| {
            let buffer = &self.buffers[i];
            !buffer.data.is_empty()
                && buffer
                    .layout
                    .as_ref()
                    .is_some_and(|layout| layout.has_semantic(semantic))
        })
    }

    /// Column for `semantic` from whichever vertex buffer carries it.
    pub fn stream(&self, semantic: VertexAttributeSemantic) -> Stream<'_> {
        let Some(i) = self.buffer_with(semantic) else {
            return Stream::invalid();
        };
        let buffer = &self.buffers[i];
        match &buffer.layout {
            Some(layout) => element_stream(buffer.data.bytes(), layout, semantic),
            None => Stream::invalid(),
        }
    }

    pub fn stream_mut(&mut self, semantic: VertexAttributeSemantic) -> StreamMut<'_> {
        let Some(i) = self.buffer_with(semantic) else {
            return StreamMut::invalid();
        };
        let buffer = &mut self.buffers[i];
        match buffer.layout.clone() {
            Some(layout) => element_stream_mut(buffer.data.bytes_mut(), &layout, semantic),
            None => StreamMut::invalid(),
        }
    }

    pub fn index(&self) -> Stream<'_> {
        let buffer = &self.buffers[MeshBufferType::Index as usize];
        if buffer.data.is_empty() {
            return Stream::invalid();
        }
        let (stride, format) = if buffer.index_16bit {
            (2, PixelFormat::R16UInt)
        } else {
            (4, PixelFormat::R32UInt)
        };
        let data = buffer.data.bytes();
        Stream::new(data, data.len() as u32 / stride, stride, format)
    }

    pub fn index_mut(&mut self) -> StreamMut<'_> {
        let buffer = &mut self.buffers[MeshBufferType::Index as usize];
        if buffer.data.is_empty() {
            return StreamMut::invalid();
        }
        let (stride, format) = if buffer.index_16bit {
            (2, PixelFormat::R16UInt)
        } else {
            (4, PixelFormat::R32UInt)
        };
        let data = buffer.data.bytes_mut();
        let count = data.len() as u32 / stride;
        StreamMut::new(data, count, stride, format)
    }

    pub fn position(&self) -> Stream<'_> {
        self.stream(VertexAttributeSemantic::Position)
    }

    pub fn normal(&self) -> Stream<'_> {
        self.stream(VertexAttributeSemantic::Normal)
    }

    pub fn tangent(&self) -> Stream<'_> {
        self.stream(VertexAttributeSemantic::Tangent)
    }

    pub fn color(&self) -> Stream<'_> {
        self.stream(VertexAttributeSemantic::Color)
    }

    pub fn blend_indices(&self) -> Stream<'_> {
        self.stream(VertexAttributeSemantic::BlendIndices)
    }

    pub fn blend_weights(&self) -> Stream<'_> {
        self.stream(VertexAttributeSemantic::BlendWeights)
    }

    pub fn texcoord(&self, channel: u32) -> Stream<'_> {
        match VertexAttributeSemantic::texcoord(channel) {
            Some(semantic) => self.stream(semantic),
            None => Stream::invalid(),
        }
    }

    pub fn position_mut(&mut self) -> StreamMut<'_> {
        self.stream_mut(VertexAttributeSemantic::Position)
    }

    pub fn normal_mut(&mut self) -> StreamMut<'_> {
        self.stream_mut(VertexAttributeSemantic::Normal)
    }

    pub fn tangent_mut(&mut self) -> StreamMut<'_> {
        self.stream_mut(VertexAttributeSemantic::Tangent)
    }

    pub fn color_mut(&mut self) -> StreamMut<'_> {
        self.stream_mut(VertexAttributeSemantic::Color)
    }

    pub fn texcoord_mut(&mut self, channel: u32) -> StreamMut<'_> {
        match VertexAttributeSemantic::texcoord(channel) {
            Some(semantic) => self.stream_mut(semantic),
            None => StreamMut::invalid(),
        }
    }

    /// Re-encode every vertex into `layout`.
    ///
    /// Elements missing from the accessor get a default value; secondary
    /// texture coordinates fall back to `TexCoord0`.
    pub fn convert_to_layout(&self, layout: &VertexLayout) -> Vec<u8> {
        let count = self.vertex_count();
        let mut out = vec![0u8; count as usize * layout.stride() as usize];
        for element in layout.attributes() {
            let semantic = element.semantic;
            let mut source = self.stream(semantic);
            if !source.is_valid() && semantic.is_secondary_texcoord() {
                source = self.stream(VertexAttributeSemantic::TexCoord0);
            }
            let mut target = element_stream_mut(&mut out, layout, semantic);
            let is_direction = matches!(
                semantic,
                VertexAttributeSemantic::Normal | VertexAttributeSemantic::Tangent
            );
            for i in 0..count.min(target.count()) {
                let value = if source.is_valid() && i < source.count() {
                    let raw = source.get_float4(i);
                    if is_direction {
                        pack_direction(
                            target.format(),
                            unpack_direction(source.format(), raw),
                        )
                    } else {
                        raw
                    }
                } else {
                    default_element_value(semantic, target.format())
                };
                target.set_float4(i, value);
            }
        }
        out
    }

    /// Upload the accessor's buffers into `mesh`, replacing its contents.
    ///
    /// Without `recompute_bounds` the mesh keeps its current bounds.
    pub fn update_mesh(
        &self,
        mesh: &mut Mesh,
        device: &Arc<GraphicsDevice>,
        recompute_bounds: bool,
        keep_cpu_data: bool,
    ) -> AssetResult<()> {
        let vertices = self.vertex_count();
        let indices = self.index_count();
        if vertices == 0 || indices == 0 || indices % 3 != 0 {
            return Err(AssetError::InvalidData(format!(
                "cannot update mesh with {vertices} vertices and {indices} indices"
            )));
        }
        let vertex_data = |ty: MeshBufferType| self.buffer_bytes(ty);
        let layouts = [
            self.layout(MeshBufferType::Vertex0).cloned(),
            self.layout(MeshBufferType::Vertex1).cloned(),
            self.layout(MeshBufferType::Vertex2).cloned(),
        ];
        mesh.init(
            device,
            MeshInitData {
                vertices,
                triangles: indices / 3,
                vertex_buffers: [
                    vertex_data(MeshBufferType::Vertex0),
                    vertex_data(MeshBufferType::Vertex1),
                    vertex_data(MeshBufferType::Vertex2),
                ],
                index_buffer: self.buffer_bytes(MeshBufferType::Index).unwrap_or(&[]),
                use_16bit_indices: self.uses_16bit_indices(),
                layouts,
                compute_bounds: recompute_bounds,
                keep_cpu_data,
            },
        )
    }
}

fn default_element_value(semantic: VertexAttributeSemantic, format: PixelFormat) -> Vec4 {
    match semantic {
        VertexAttributeSemantic::Normal => pack_direction(format, Vec4::new(0.0, 0.0, 1.0, 1.0)),
        VertexAttributeSemantic::Tangent => pack_direction(format, Vec4::new(1.0, 0.0, 0.0, 1.0)),
        VertexAttributeSemantic::Color => Vec4::repeat(1.0),
        VertexAttributeSemantic::BlendWeights => Vec4::new(1.0, 0.0, 0.0, 0.0),
        _ => Vec4::zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::vertex::{static_vb0_layout, static_vb1_layout};
    use rstest::rstest;

    #[test]
    fn allocate_and_write_positions() {
        let mut accessor = MeshAccessor::new();
        accessor
            .allocate_buffer(MeshBufferType::Vertex0, 3, static_vb0_layout().unwrap())
            .unwrap();
        assert_eq!(accessor.vertex_count(), 3);
        {
            let mut positions = accessor.position_mut();
            assert!(positions.is_linear(PixelFormat::R32G32B32Float));
            positions.set_float3(1, Vec3::new(1.0, 2.0, 3.0));
        }
        assert_eq!(accessor.position().get_float3(1), Vec3::new(1.0, 2.0, 3.0));
        assert!(!accessor.normal().is_valid());
    }

    #[test]
    fn interleaved_stream_is_not_linear() {
        let mut accessor = MeshAccessor::new();
        accessor
            .allocate_buffer(MeshBufferType::Vertex1, 2, static_vb1_layout().unwrap())
            .unwrap();
        let mut uv = accessor.texcoord_mut(0);
        assert!(!uv.is_linear(PixelFormat::R16G16Float));
        uv.set_float2(1, Vec2::new(0.5, 0.25));
        assert_eq!(accessor.texcoord(0).get_float2(1), Vec2::new(0.5, 0.25));
    }

    #[test]
    fn set_linear_copies_strided() {
        let mut accessor = MeshAccessor::new();
        accessor
            .allocate_buffer(MeshBufferType::Vertex1, 2, static_vb1_layout().unwrap())
            .unwrap();
        let src: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_bits().to_le_bytes())
            .collect();
        accessor.texcoord_mut(0).set_linear(&src);
        assert_eq!(accessor.texcoord(0).get_float2(1), Vec2::new(3.0, 4.0));
    }

    #[rstest]
    #[case::bit16(true, 2)]
    #[case::bit32(false, 4)]
    fn index_stream_width(#[case] use_16bit: bool, #[case] stride: u32) {
        let mut accessor = MeshAccessor::new();
        accessor.allocate_index_buffer(3, use_16bit);
        {
            let mut index = accessor.index_mut();
            index.set_float1(2, 7.0);
        }
        let index = accessor.index();
        assert_eq!(index.stride(), stride);
        assert_eq!(index.to_indices(), vec![0, 0, 7]);
    }

    #[test]
    fn misaligned_buffer_is_rejected() {
        let mut accessor = MeshAccessor::new();
        let err = accessor
            .load_buffer(MeshBufferType::Vertex0, vec![0; 13], static_vb0_layout().unwrap())
            .unwrap_err();
        assert!(matches!(err, AssetError::InvalidData(_)));
    }
}
