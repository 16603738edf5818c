//! Signed distance fields of static models.
//!
//! Voxels store the distance to the closest triangle, normalized by the max
//! distance into `[0, 1]` with `0.5` on the surface. The sign comes from
//! rays cast along the six axes: a voxel whose rays mostly hit back faces is
//! inside the mesh.

use std::sync::Arc;

use redlilium_core::bounds::{closest_point_on_triangle, ray_triangle, triangle_normal};
use redlilium_core::math::{Vec3, Vec4};
use redlilium_core::{BoundingBox, Ray};
use redlilium_graphics::{
    GraphicsDevice, PixelFormat, PixelFormatSampler, Texture, TextureDescriptor, TextureUsage,
};

use crate::error::{AssetError, AssetResult};
use crate::serialization::{ReadStream, WriteStream};

const SDF_CHUNK_VERSION: i32 = 1;
const BASE_RESOLUTION: f32 = 32.0;
const MIN_RESOLUTION: u32 = 4;
const MAX_RESOLUTION: u32 = 256;
const R8_MAX_RESOLUTION: u32 = 64;
const MARGIN_VOXELS: f32 = 1.0;

const SIGN_RAYS: [[f32; 3]; 6] = [
    [1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 0.0, -1.0],
];

/// Description of an SDF volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSdfHeader {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub local_bounds: BoundingBox,
    /// `uvw = local * mul + add`.
    pub local_to_uvw_mul: Vec3,
    pub local_to_uvw_add: Vec3,
    pub world_units_per_voxel: f32,
    pub max_distance: f32,
    pub resolution_scale: f32,
    pub lod: i32,
}

impl ModelSdfHeader {
    pub fn descriptor(&self) -> TextureDescriptor {
        TextureDescriptor::new_3d(
            self.width,
            self.height,
            self.depth,
            self.format,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
        )
        .with_mip_levels(self.mip_levels)
        .with_label("Model SDF")
    }

    fn mip_size(&self, mip: u32) -> usize {
        self.descriptor().mip_size(mip) as usize
    }

    fn write(&self, stream: &mut WriteStream) {
        stream.write_u32(self.format.code());
        stream.write_u32(self.width);
        stream.write_u32(self.height);
        stream.write_u32(self.depth);
        stream.write_u32(self.mip_levels);
        stream.write_box(&self.local_bounds);
        stream.write_vec3(&self.local_to_uvw_mul);
        stream.write_vec3(&self.local_to_uvw_add);
        stream.write_f32(self.world_units_per_voxel);
        stream.write_f32(self.max_distance);
        stream.write_f32(self.resolution_scale);
        stream.write_i32(self.lod);
    }

    fn read(stream: &mut ReadStream<'_>) -> AssetResult<Self> {
        let code = stream.read_u32()?;
        let format = PixelFormat::from_code(code)
            .filter(|f| matches!(f, PixelFormat::R8UNorm | PixelFormat::R16UNorm))
            .ok_or_else(|| AssetError::InvalidData(format!("unsupported SDF format code {code}")))?;
        let header = Self {
            format,
            width: stream.read_u32()?,
            height: stream.read_u32()?,
            depth: stream.read_u32()?,
            mip_levels: stream.read_u32()?,
            local_bounds: stream.read_box()?,
            local_to_uvw_mul: stream.read_vec3()?,
            local_to_uvw_add: stream.read_vec3()?,
            world_units_per_voxel: stream.read_f32()?,
            max_distance: stream.read_f32()?,
            resolution_scale: stream.read_f32()?,
            lod: stream.read_i32()?,
        };
        let dims_ok = [header.width, header.height, header.depth]
            .iter()
            .all(|&d| (1..=MAX_RESOLUTION).contains(&d));
        if !dims_ok || header.mip_levels == 0 || header.mip_levels > header.descriptor().size.max_mips() {
            return Err(AssetError::InvalidData(format!(
                "invalid SDF volume {}x{}x{} with {} mips",
                header.width, header.height, header.depth, header.mip_levels
            )));
        }
        Ok(header)
    }
}

/// CPU copy of an SDF volume with its full mip chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SdfData {
    pub header: ModelSdfHeader,
    pub mips: Vec<Vec<u8>>,
}

impl SdfData {
    /// Encode as the payload of the SDF storage chunk.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = WriteStream::new();
        stream.write_i32(SDF_CHUNK_VERSION);
        self.header.write(&mut stream);
        for (mip, data) in self.mips.iter().enumerate() {
            let descriptor = self.header.descriptor();
            stream.write_u32(mip as u32);
            stream.write_u32(descriptor.row_pitch(mip as u32));
            stream.write_u32(descriptor.slice_pitch(mip as u32));
            stream.write_u32(data.len() as u32);
            stream.write_bytes(data);
        }
        stream.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> AssetResult<Self> {
        let mut stream = ReadStream::new(bytes);
        let version = stream.read_i32()?;
        if version != SDF_CHUNK_VERSION {
            return Err(AssetError::InvalidData(format!("unsupported SDF chunk version {version}")));
        }
        let header = ModelSdfHeader::read(&mut stream)?;
        let mut mips = Vec::with_capacity(header.mip_levels as usize);
        for mip in 0..header.mip_levels {
            let index = stream.read_u32()?;
            let _row_pitch = stream.read_u32()?;
            let _slice_pitch = stream.read_u32()?;
            let len = stream.read_u32()? as usize;
            if index != mip || len != header.mip_size(mip) {
                return Err(AssetError::InvalidData(format!(
                    "SDF mip {mip} has index {index} and {len} bytes"
                )));
            }
            mips.push(stream.read_bytes(len)?.to_vec());
        }
        Ok(Self { header, mips })
    }

    /// Create the volume texture and upload every mip.
    pub fn upload(&self, device: &Arc<GraphicsDevice>) -> AssetResult<Arc<Texture>> {
        let texture = device.create_texture(&self.header.descriptor())?;
        for (mip, data) in self.mips.iter().enumerate() {
            texture.write_mip(mip as u32, data)?;
        }
        Ok(texture)
    }

    /// Signed distance at the voxel of mip 0 containing `local`, `None` outside the volume.
    pub fn sample(&self, local: &Vec3) -> Option<f32> {
        let h = &self.header;
        let uvw = local.component_mul(&h.local_to_uvw_mul) + h.local_to_uvw_add;
        if uvw.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return None;
        }
        let voxel = |c: f32, n: u32| ((c * n as f32) as u32).min(n - 1);
        let (x, y, z) = (voxel(uvw.x, h.width), voxel(uvw.y, h.height), voxel(uvw.z, h.depth));
        let sampler = PixelFormatSampler::get(h.format)?;
        let size = sampler.pixel_size as usize;
        let offset = ((z * h.height + y) * h.width + x) as usize * size;
        let texel = self.mips.first()?.get(offset..offset + size)?;
        Some(decode_distance(sampler.read(texel).x, h.max_distance))
    }
}

fn encode_distance(distance: f32, max_distance: f32) -> f32 {
    (distance / max_distance * 0.5 + 0.5).clamp(0.0, 1.0)
}

fn decode_distance(value: f32, max_distance: f32) -> f32 {
    (value - 0.5) * 2.0 * max_distance
}

/// Build an SDF of a triangle mesh.
///
/// `resolution_scale` scales the voxel count along the longest axis (32 at
/// `1.0`). A voxel is inside when more than `backfaces_threshold` of the
/// axis rays that hit the mesh hit a back face.
pub fn generate_sdf(
    positions: &[Vec3],
    indices: &[u32],
    resolution_scale: f32,
    backfaces_threshold: f32,
    lod: i32,
) -> AssetResult<SdfData> {
    if indices.len() < 3 || positions.is_empty() {
        return Err(AssetError::InvalidData("cannot build an SDF of an empty mesh".to_string()));
    }
    let triangles: Vec<[Vec3; 3]> = indices
        .chunks_exact(3)
        .filter_map(|t| {
            Some([
                *positions.get(t[0] as usize)?,
                *positions.get(t[1] as usize)?,
                *positions.get(t[2] as usize)?,
            ])
        })
        .collect();
    if triangles.is_empty() {
        return Err(AssetError::InvalidData("SDF mesh has no valid triangles".to_string()));
    }

    let mesh_bounds = BoundingBox::from_points(positions);
    let longest_voxels = (BASE_RESOLUTION * resolution_scale.max(0.01))
        .ceil()
        .clamp(MIN_RESOLUTION as f32, MAX_RESOLUTION as f32);
    let extent = mesh_bounds.size().max().max(1e-4);
    let units_per_voxel = extent / (longest_voxels - 2.0 * MARGIN_VOXELS).max(1.0);
    let margin = Vec3::repeat(units_per_voxel * MARGIN_VOXELS);
    let bounds = BoundingBox::new(mesh_bounds.min - margin, mesh_bounds.max + margin);
    let size = bounds.size();
    let dim = |s: f32| ((s / units_per_voxel).ceil() as u32).clamp(1, MAX_RESOLUTION);
    let (width, height, depth) = (dim(size.x), dim(size.y), dim(size.z));
    let volume_size = Vec3::new(
        width as f32 * units_per_voxel,
        height as f32 * units_per_voxel,
        depth as f32 * units_per_voxel,
    );
    let max_distance = volume_size.norm();
    let format = if width.max(height).max(depth) <= R8_MAX_RESOLUTION {
        PixelFormat::R8UNorm
    } else {
        PixelFormat::R16UNorm
    };

    let mut header = ModelSdfHeader {
        format,
        width,
        height,
        depth,
        mip_levels: 1,
        local_bounds: bounds,
        local_to_uvw_mul: volume_size.map(|v| 1.0 / v),
        local_to_uvw_add: -bounds.min.component_div(&volume_size),
        world_units_per_voxel: units_per_voxel,
        max_distance,
        resolution_scale,
        lod,
    };
    header.mip_levels = header.descriptor().size.max_mips();

    let mut distances = Vec::with_capacity((width * height * depth) as usize);
    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                let p = bounds.min
                    + Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5) * units_per_voxel;
                distances.push(signed_distance(&p, &triangles, backfaces_threshold));
            }
        }
    }

    let sampler = PixelFormatSampler::get(format)
        .ok_or_else(|| AssetError::Failed(format!("cannot sample {format:?}")))?;
    let mut mips = Vec::with_capacity(header.mip_levels as usize);
    let mut level = distances;
    let (mut w, mut h, mut d) = (width, height, depth);
    for mip in 0..header.mip_levels {
        if mip > 0 {
            let (nw, nh, nd) = ((w / 2).max(1), (h / 2).max(1), (d / 2).max(1));
            level = downsample(&level, [w, h, d], [nw, nh, nd]);
            (w, h, d) = (nw, nh, nd);
        }
        let mut bytes = vec![0u8; level.len() * sampler.pixel_size as usize];
        for (texel, distance) in bytes
            .chunks_exact_mut(sampler.pixel_size as usize)
            .zip(&level)
        {
            sampler.write(texel, &Vec4::new(encode_distance(*distance, max_distance), 0.0, 0.0, 1.0));
        }
        mips.push(bytes);
    }
    log::debug!(
        "Generated {width}x{height}x{depth} SDF ({format:?}, {} mips) of {} triangles",
        header.mip_levels,
        triangles.len()
    );
    Ok(SdfData { header, mips })
}

fn signed_distance(p: &Vec3, triangles: &[[Vec3; 3]], backfaces_threshold: f32) -> f32 {
    let distance = triangles
        .iter()
        .map(|[a, b, c]| (closest_point_on_triangle(p, a, b, c) - p).norm())
        .fold(f32::MAX, f32::min);

    let mut hits = 0;
    let mut backfaces = 0;
    for dir in SIGN_RAYS {
        let ray = Ray::new(*p, Vec3::from(dir));
        let closest = triangles
            .iter()
            .filter_map(|tri| ray_triangle(&ray, &tri[0], &tri[1], &tri[2]).map(|t| (t, tri)))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        if let Some((_, [a, b, c])) = closest {
            hits += 1;
            if triangle_normal(a, b, c).dot(&ray.direction) > 0.0 {
                backfaces += 1;
            }
        }
    }
    if hits > 0 && backfaces as f32 / hits as f32 > backfaces_threshold {
        -distance
    } else {
        distance
    }
}

fn downsample(src: &[f32], [w, h, d]: [u32; 3], [nw, nh, nd]: [u32; 3]) -> Vec<f32> {
    let at = |x: u32, y: u32, z: u32| src[((z.min(d - 1) * h + y.min(h - 1)) * w + x.min(w - 1)) as usize];
    let mut out = Vec::with_capacity((nw * nh * nd) as usize);
    for z in 0..nd {
        for y in 0..nh {
            for x in 0..nw {
                let mut sum = 0.0;
                for (dx, dy, dz) in (0..8).map(|i| (i & 1, (i >> 1) & 1, (i >> 2) & 1)) {
                    sum += at(x * 2 + dx, y * 2 + dy, z * 2 + dz);
                }
                out.push(sum / 8.0);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> (Vec<Vec3>, Vec<u32>) {
        let p = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
        let positions = vec![
            p(-1.0, -1.0, -1.0),
            p(1.0, -1.0, -1.0),
            p(1.0, 1.0, -1.0),
            p(-1.0, 1.0, -1.0),
            p(-1.0, -1.0, 1.0),
            p(1.0, -1.0, 1.0),
            p(1.0, 1.0, 1.0),
            p(-1.0, 1.0, 1.0),
        ];
        // Outward facing, counter-clockwise.
        let indices = vec![
            0, 2, 1, 0, 3, 2, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 1, 5, 0, 5, 4, // -y
            3, 6, 2, 3, 7, 6, // +y
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
        ];
        (positions, indices)
    }

    #[test]
    fn cube_inside_is_negative() {
        let (positions, indices) = cube();
        let sdf = generate_sdf(&positions, &indices, 0.5, 0.5, 0).unwrap();
        assert_eq!(sdf.header.format, PixelFormat::R8UNorm);
        assert_eq!(sdf.mips.len() as u32, sdf.header.mip_levels);
        let inside = sdf.sample(&Vec3::zeros()).unwrap();
        assert!(inside < -0.5, "center distance {inside}");
        let outside = sdf.sample(&Vec3::new(1.05, 1.05, 1.05)).unwrap();
        assert!(outside > 0.0, "corner distance {outside}");
        assert!(sdf.sample(&Vec3::repeat(10.0)).is_none());
    }

    #[test]
    fn chunk_roundtrip_and_upload() {
        let (positions, indices) = cube();
        let sdf = generate_sdf(&positions, &indices, 0.25, 0.5, 1).unwrap();
        let decoded = SdfData::decode(&sdf.encode()).unwrap();
        assert_eq!(decoded, sdf);
        let device = GraphicsDevice::new("test");
        let texture = decoded.upload(&device).unwrap();
        assert!(texture.is_fully_uploaded());
        assert_eq!(texture.format(), PixelFormat::R8UNorm);
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut stream = WriteStream::new();
        stream.write_i32(9);
        assert!(SdfData::decode(&stream.into_bytes()).is_err());
    }

    #[test]
    fn empty_mesh_is_rejected() {
        assert!(generate_sdf(&[], &[], 1.0, 0.5, 0).is_err());
    }
}
