//! Meshes: per-LOD geometry with GPU buffers, optional CPU caches and bounds.

mod accessor;
mod blend_shape;
mod draw;
mod skinned;
mod update;
pub mod vertex;

use std::sync::Arc;

pub use accessor::{MeshAccessor, Stream, StreamMut};
pub(crate) use accessor::{element_stream, element_stream_mut};
pub use blend_shape::{BlendShape, BlendShapeVertex};
pub use draw::MeshDrawInfo;
pub use skinned::SkinnedMesh;
pub use update::MeshUpdate;

use redlilium_core::bounds::{ray_triangle, triangle_normal};
use redlilium_core::math::{Mat4, Vec3, transform_point};
use redlilium_core::{BoundingBox, BoundingSphere, Ray};
use redlilium_graphics::{
    Buffer, BufferDescriptor, BufferUsage, GraphicsDevice, RenderContext, VertexAttribute,
    VertexAttributeSemantic, VertexLayout,
};

use crate::error::{AssetError, AssetResult};
use crate::serialization::{ReadStream, WriteStream};

/// Maximum meshes in one LOD.
pub const MAX_MESHES_PER_LOD: usize = 4096;

/// Buffer slots of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MeshBufferType {
    Index = 0,
    Vertex0 = 1,
    Vertex1 = 2,
    Vertex2 = 3,
}

impl MeshBufferType {
    pub const ALL: [Self; 4] = [Self::Index, Self::Vertex0, Self::Vertex1, Self::Vertex2];
    pub const VERTEX: [Self; 3] = [Self::Vertex0, Self::Vertex1, Self::Vertex2];

    /// Vertex buffer slot, `None` for the index buffer.
    pub fn vertex_slot(self) -> Option<usize> {
        match self {
            Self::Index => None,
            other => Some(other as usize - 1),
        }
    }

    pub fn from_vertex_slot(slot: usize) -> Option<Self> {
        Self::VERTEX.get(slot).copied()
    }
}

/// Input of [`Mesh::init`].
pub struct MeshInitData<'a> {
    pub vertices: u32,
    pub triangles: u32,
    /// Raw vertex bytes per buffer; buffer 0 is required.
    pub vertex_buffers: [Option<&'a [u8]>; 3],
    pub index_buffer: &'a [u8],
    pub use_16bit_indices: bool,
    pub layouts: [Option<Arc<VertexLayout>>; 3],
    /// Derive bounds from positions instead of keeping the header bounds.
    pub compute_bounds: bool,
    pub keep_cpu_data: bool,
}

/// Result of a mesh raycast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshHit {
    /// World-space distance from the ray origin.
    pub distance: f32,
    /// World-space surface normal facing the ray.
    pub normal: Vec3,
}

/// Static mesh: GPU buffers plus metadata of one LOD entry.
pub struct Mesh {
    lod_index: u8,
    index: u16,
    material_slot_index: i32,
    lightmap_uvs_index: i32,
    bounds: BoundingBox,
    sphere: BoundingSphere,
    vertices: u32,
    triangles: u32,
    use_16bit_index_buffer: bool,
    index_buffer: Option<Arc<Buffer>>,
    vertex_buffers: [Option<Arc<Buffer>>; 3],
    vertex_layouts: [Option<Arc<VertexLayout>>; 3],
    cpu_data: [Option<Arc<[u8]>>; 4],
    is_virtual: bool,
}

impl Mesh {
    pub fn new(lod_index: u8, index: u16) -> Self {
        Self {
            lod_index,
            index,
            material_slot_index: 0,
            lightmap_uvs_index: -1,
            bounds: BoundingBox::default(),
            sphere: BoundingSphere::default(),
            vertices: 0,
            triangles: 0,
            use_16bit_index_buffer: false,
            index_buffer: None,
            vertex_buffers: Default::default(),
            vertex_layouts: Default::default(),
            cpu_data: Default::default(),
            is_virtual: false,
        }
    }

    pub fn lod_index(&self) -> u8 {
        self.lod_index
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn material_slot_index(&self) -> i32 {
        self.material_slot_index
    }

    pub fn set_material_slot_index(&mut self, index: i32) {
        self.material_slot_index = index;
    }

    /// Texture coordinate channel used for lightmaps, `-1` when none.
    pub fn lightmap_uvs_index(&self) -> i32 {
        self.lightmap_uvs_index
    }

    pub fn set_lightmap_uvs_index(&mut self, index: i32) {
        self.lightmap_uvs_index = index;
    }

    /// Local-space bounding box.
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn sphere(&self) -> &BoundingSphere {
        &self.sphere
    }

    pub fn set_bounds(&mut self, bounds: BoundingBox, sphere: BoundingSphere) {
        self.bounds = bounds;
        self.sphere = sphere;
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangles
    }

    pub fn use_16bit_index_buffer(&self) -> bool {
        self.use_16bit_index_buffer
    }

    /// Whether GPU buffers exist. Uninitialized meshes are skipped when drawing.
    pub fn is_initialized(&self) -> bool {
        self.index_buffer.is_some()
    }

    pub fn index_buffer(&self) -> Option<&Arc<Buffer>> {
        self.index_buffer.as_ref()
    }

    pub fn vertex_buffer(&self, slot: usize) -> Option<&Arc<Buffer>> {
        self.vertex_buffers.get(slot).and_then(Option::as_ref)
    }

    pub fn vertex_buffers(&self) -> &[Option<Arc<Buffer>>; 3] {
        &self.vertex_buffers
    }

    pub fn vertex_layout(&self, slot: usize) -> Option<&Arc<VertexLayout>> {
        self.vertex_layouts.get(slot).and_then(Option::as_ref)
    }

    /// CPU copy of a buffer when it was kept after upload.
    pub fn cpu_data(&self, ty: MeshBufferType) -> Option<&Arc<[u8]>> {
        self.cpu_data[ty as usize].as_ref()
    }

    /// Drop the CPU copies (deformers and precise raycasts stop working).
    pub fn release_cpu_data(&mut self) {
        self.cpu_data = Default::default();
    }

    pub(crate) fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub(crate) fn set_virtual(&mut self, is_virtual: bool) {
        self.is_virtual = is_virtual;
    }

    /// Buffer and element carrying `semantic`.
    pub fn find_element(
        &self,
        semantic: VertexAttributeSemantic,
    ) -> Option<(MeshBufferType, VertexAttribute)> {
        self.vertex_layouts.iter().enumerate().find_map(|(i, layout)| {
            let element = layout.as_ref()?.find_element(semantic)?;
            Some((MeshBufferType::from_vertex_slot(i)?, *element))
        })
    }

    /// Create GPU buffers from raw data. Any previous buffers are released first.
    pub fn init(&mut self, device: &Arc<GraphicsDevice>, data: MeshInitData<'_>) -> AssetResult<()> {
        self.release();
        if data.vertices == 0 || data.triangles == 0 {
            return Err(AssetError::InvalidData(format!(
                "mesh {} of LOD {} has {} vertices and {} triangles",
                self.index, self.lod_index, data.vertices, data.triangles
            )));
        }
        if data.vertex_buffers[0].is_none() || data.layouts[0].is_none() {
            return Err(AssetError::invalid("vertex buffer 0 is required"));
        }
        let index_stride = if data.use_16bit_indices { 2 } else { 4 };
        let index_size = data.triangles as usize * 3 * index_stride;
        if data.index_buffer.len() != index_size {
            return Err(AssetError::InvalidData(format!(
                "index buffer has {} bytes, expected {index_size}",
                data.index_buffer.len()
            )));
        }

        let mut layouts = data.layouts.clone();
        for (slot, (bytes, layout)) in data.vertex_buffers.iter().zip(layouts.iter_mut()).enumerate() {
            match (bytes, layout.as_ref()) {
                (Some(bytes), Some(l)) => {
                    let expected = data.vertices as usize * l.stride() as usize;
                    if bytes.len() != expected {
                        return Err(AssetError::InvalidData(format!(
                            "vertex buffer {slot} has {} bytes, expected {expected}",
                            bytes.len()
                        )));
                    }
                }
                (Some(_), None) => {
                    return Err(AssetError::InvalidData(format!(
                        "vertex buffer {slot} has no layout"
                    )));
                }
                (None, _) => *layout = None,
            }
        }
        if self.lightmap_uvs_index >= 0 {
            inject_lightmap_element(&mut layouts, self.lightmap_uvs_index as u32);
        }

        let label = |kind: &str| format!("Mesh L{} M{} {kind}", self.lod_index, self.index);
        let failed = |e| AssetError::Failed(format!("cannot create mesh buffer: {e}"));
        let index_buffer = device
            .create_buffer_init(
                &BufferDescriptor::typed(
                    data.triangles * 3,
                    index_stride as u32,
                    BufferUsage::INDEX | BufferUsage::COPY_SRC,
                )
                .with_label(label("IB")),
                data.index_buffer,
            )
            .map_err(failed)?;
        let mut vertex_buffers: [Option<Arc<Buffer>>; 3] = Default::default();
        for (slot, (bytes, layout)) in data.vertex_buffers.iter().zip(&layouts).enumerate() {
            if let (Some(bytes), Some(layout)) = (bytes, layout) {
                let buffer = device
                    .create_buffer_init(
                        &BufferDescriptor::typed(
                            data.vertices,
                            layout.stride(),
                            BufferUsage::VERTEX | BufferUsage::COPY_SRC,
                        )
                        .with_label(label(&format!("VB{slot}"))),
                        bytes,
                    )
                    .map_err(failed)?;
                vertex_buffers[slot] = Some(buffer);
            }
        }

        if data.compute_bounds {
            let positions = data
                .vertex_buffers
                .iter()
                .zip(&layouts)
                .find_map(|(bytes, layout)| {
                    let layout = layout.as_ref()?;
                    layout
                        .has_semantic(VertexAttributeSemantic::Position)
                        .then(|| element_stream(bytes.unwrap_or(&[]), layout, VertexAttributeSemantic::Position).to_vec3())
                })
                .unwrap_or_default();
            self.bounds = BoundingBox::from_points(positions.iter());
            self.sphere = BoundingSphere::from_points(&positions);
        }

        if data.keep_cpu_data {
            self.cpu_data[MeshBufferType::Index as usize] = Some(data.index_buffer.into());
            for (slot, bytes) in data.vertex_buffers.iter().enumerate() {
                self.cpu_data[slot + 1] = bytes.map(Arc::from);
            }
        }

        self.vertices = data.vertices;
        self.triangles = data.triangles;
        self.use_16bit_index_buffer = data.use_16bit_indices;
        self.index_buffer = Some(index_buffer);
        self.vertex_buffers = vertex_buffers;
        self.vertex_layouts = layouts;
        log::trace!(
            "Mesh L{} M{}: initialized {} vertices, {} triangles",
            self.lod_index,
            self.index,
            self.vertices,
            self.triangles
        );
        Ok(())
    }

    /// Drop GPU buffers and CPU caches; metadata stays.
    pub fn release(&mut self) {
        self.index_buffer = None;
        self.vertex_buffers = Default::default();
        self.vertex_layouts = Default::default();
        self.cpu_data = Default::default();
        self.vertices = 0;
        self.triangles = 0;
    }

    /// Raycast in world space.
    ///
    /// Uses the triangles when the CPU cache is resident and the bounding
    /// volumes otherwise.
    pub fn intersects(&self, ray: &Ray, world: &Mat4) -> Option<MeshHit> {
        if let Some(hit) = self.intersects_triangles(ray, world) {
            return hit;
        }
        let sphere = self.sphere.transformed(world);
        sphere.intersects_ray(ray)?;
        let (distance, normal) = self.bounds.transformed(world).intersects_ray(ray)?;
        Some(MeshHit { distance, normal })
    }

    /// `None` when the CPU data needed for a precise test is missing.
    fn intersects_triangles(&self, ray: &Ray, world: &Mat4) -> Option<Option<MeshHit>> {
        let indices = self.cpu_data(MeshBufferType::Index)?;
        let (ty, _) = self.find_element(VertexAttributeSemantic::Position)?;
        let vertices = self.cpu_data(ty)?;
        let layout = self.vertex_layout(ty.vertex_slot()?)?;
        let inverse = world.try_inverse()?;
        let local_ray = ray.transformed(&inverse);
        let positions = element_stream(vertices, layout, VertexAttributeSemantic::Position);
        let index_stream = if self.use_16bit_index_buffer {
            Stream::new(indices, indices.len() as u32 / 2, 2, redlilium_graphics::PixelFormat::R16UInt)
        } else {
            Stream::new(indices, indices.len() as u32 / 4, 4, redlilium_graphics::PixelFormat::R32UInt)
        };

        let mut best: Option<MeshHit> = None;
        for tri in 0..index_stream.count() / 3 {
            let [a, b, c] = [0, 1, 2].map(|k| index_stream.get_index(tri * 3 + k));
            if a >= positions.count() || b >= positions.count() || c >= positions.count() {
                continue;
            }
            let (pa, pb, pc) = (
                positions.get_float3(a),
                positions.get_float3(b),
                positions.get_float3(c),
            );
            let Some(t) = ray_triangle(&local_ray, &pa, &pb, &pc) else {
                continue;
            };
            let world_point = transform_point(world, &local_ray.at(t));
            let distance = (world_point - ray.origin).norm();
            if best.is_some_and(|hit| hit.distance <= distance) {
                continue;
            }
            let local_normal = triangle_normal(&pa, &pb, &pc);
            let mut normal = inverse.transpose().transform_vector(&local_normal);
            let len = normal.norm();
            if len > f32::EPSILON {
                normal /= len;
            }
            if normal.dot(&ray.direction) > 0.0 {
                normal = -normal;
            }
            best = Some(MeshHit { distance, normal });
        }
        Some(best)
    }

    /// Decode a stored static mesh payload and upload it.
    pub(crate) fn read_payload(
        &mut self,
        stream: &mut ReadStream<'_>,
        device: &Arc<GraphicsDevice>,
        keep_cpu_data: bool,
    ) -> AssetResult<()> {
        let vertices = stream.read_u32()?;
        let triangles = stream.read_u32()?;
        if vertices == 0 || triangles == 0 {
            return Err(AssetError::InvalidData(format!(
                "mesh {} of LOD {} is empty",
                self.index, self.lod_index
            )));
        }
        let vb0_layout = vertex::static_vb0_layout()?;
        let vb1_layout = vertex::static_vb1_layout()?;
        let vb0 = stream.read_bytes(vertices as usize * vb0_layout.stride() as usize)?;
        let vb1 = stream.read_bytes(vertices as usize * vb1_layout.stride() as usize)?;
        let has_colors = stream.read_bool()?;
        let (vb2, vb2_layout) = if has_colors {
            let layout = vertex::static_vb2_layout()?;
            (
                Some(stream.read_bytes(vertices as usize * layout.stride() as usize)?),
                Some(layout),
            )
        } else {
            (None, None)
        };
        let use_16bit = index_uses_16bit(triangles);
        let ib = stream.read_bytes(triangles as usize * 3 * if use_16bit { 2 } else { 4 })?;
        self.init(
            device,
            MeshInitData {
                vertices,
                triangles,
                vertex_buffers: [Some(vb0), Some(vb1), vb2],
                index_buffer: ib,
                use_16bit_indices: use_16bit,
                layouts: [Some(vb0_layout), Some(vb1_layout), vb2_layout],
                compute_bounds: false,
                keep_cpu_data,
            },
        )
    }

    /// Encode the mesh in the stored static format.
    pub(crate) fn write_payload(&self, stream: &mut WriteStream) -> AssetResult<()> {
        let mut accessor = MeshAccessor::new();
        accessor.load_mesh(self, false, &MeshBufferType::ALL)?;
        let vertices = accessor.vertex_count();
        let triangles = accessor.index_count() / 3;
        stream.write_u32(vertices);
        stream.write_u32(triangles);
        stream.write_bytes(&accessor.convert_to_layout(&*vertex::static_vb0_layout()?));
        stream.write_bytes(&accessor.convert_to_layout(&*vertex::static_vb1_layout()?));
        let has_colors = accessor.color().is_valid();
        stream.write_bool(has_colors);
        if has_colors {
            stream.write_bytes(&accessor.convert_to_layout(&*vertex::static_vb2_layout()?));
        }
        write_indices(stream, &accessor.index().to_indices(), triangles)
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("lod", &self.lod_index)
            .field("index", &self.index)
            .field("vertices", &self.vertices)
            .field("triangles", &self.triangles)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Stored index buffers use 16-bit indices when `triangles * 3` fits.
pub(crate) fn index_uses_16bit(triangles: u32) -> bool {
    triangles as u64 * 3 <= 0xFFFF
}

pub(crate) fn write_indices(stream: &mut WriteStream, indices: &[u32], triangles: u32) -> AssetResult<()> {
    if index_uses_16bit(triangles) {
        for &i in indices {
            let narrow = u16::try_from(i).map_err(|_| {
                AssetError::InvalidData(format!("index {i} does not fit a 16-bit index buffer"))
            })?;
            stream.write_u16(narrow);
        }
    } else {
        for &i in indices {
            stream.write_u32(i);
        }
    }
    Ok(())
}

/// Alias the lightmap texture coordinate channel as a `Lightmap` element.
fn inject_lightmap_element(layouts: &mut [Option<Arc<VertexLayout>>; 3], channel: u32) {
    let Some(semantic) = VertexAttributeSemantic::texcoord(channel) else {
        log::warn!("Invalid lightmap UV channel {channel}");
        return;
    };
    for layout in layouts.iter_mut().flatten() {
        let Some(element) = layout.find_element(semantic).copied() else {
            continue;
        };
        if layout.has_semantic(VertexAttributeSemantic::Lightmap) {
            return;
        }
        let mut attributes = layout.attributes().to_vec();
        attributes.push(VertexAttribute {
            semantic: VertexAttributeSemantic::Lightmap,
            ..element
        });
        if let Some(with_lightmap) = VertexLayout::get(&attributes, true) {
            *layout = with_lightmap;
        }
        return;
    }
    log::warn!("Mesh has no TexCoord{channel} for lightmap UVs");
}

/// Capability shared by the static and skinned mesh types.
pub trait MeshVariant: Send + Sync + Sized + 'static {
    fn create(lod_index: u8, index: u16) -> Self;
    fn base(&self) -> &Mesh;
    fn base_mut(&mut self) -> &mut Mesh;

    fn blend_shapes(&self) -> &[BlendShape] {
        &[]
    }

    /// Reject layouts this mesh type cannot render.
    fn validate_layouts(_layouts: &[Option<Arc<VertexLayout>>; 3]) -> AssetResult<()> {
        Ok(())
    }

    fn read_payload(
        &mut self,
        stream: &mut ReadStream<'_>,
        device: &Arc<GraphicsDevice>,
        keep_cpu_data: bool,
    ) -> AssetResult<()>;

    fn write_payload(&self, stream: &mut WriteStream) -> AssetResult<()>;

    /// Submit one draw call for this mesh. Returns `false` when nothing was drawn.
    fn draw_with_info(
        &self,
        ctx: &mut RenderContext,
        info: &mut MeshDrawInfo<'_>,
        lod_dither_factor: f32,
    ) -> bool {
        self.base()
            .submit(self.blend_shapes(), ctx, info, lod_dither_factor)
    }
}

impl MeshVariant for Mesh {
    fn create(lod_index: u8, index: u16) -> Self {
        Mesh::new(lod_index, index)
    }

    fn base(&self) -> &Mesh {
        self
    }

    fn base_mut(&mut self) -> &mut Mesh {
        self
    }

    fn read_payload(
        &mut self,
        stream: &mut ReadStream<'_>,
        device: &Arc<GraphicsDevice>,
        keep_cpu_data: bool,
    ) -> AssetResult<()> {
        Mesh::read_payload(self, stream, device, keep_cpu_data)
    }

    fn write_payload(&self, stream: &mut WriteStream) -> AssetResult<()> {
        Mesh::write_payload(self, stream)
    }
}
