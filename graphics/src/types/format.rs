//! Pixel formats and per-format samplers.
//!
//! A [`PixelFormatSampler`] converts a single packed element to and from a
//! widened `Vec4`, which is how vertex streams read heterogeneous formats.

use half::f16;
use redlilium_core::math::Vec4;

/// Texel and vertex element formats.
///
/// The discriminant is the stable wire code used by serialized vertex layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u32)]
pub enum PixelFormat {
    #[default]
    Unknown = 0,
    R32G32B32A32Float = 2,
    R32G32B32A32UInt = 3,
    R32G32B32Float = 6,
    R16G16B16A16Float = 10,
    R16G16B16A16UNorm = 11,
    R16G16B16A16UInt = 12,
    R32G32Float = 16,
    R10G10B10A2UNorm = 24,
    R8G8B8A8UNorm = 28,
    R8G8B8A8UInt = 30,
    R8G8B8A8SNorm = 31,
    R16G16Float = 34,
    R16G16UNorm = 35,
    R32Float = 41,
    R32UInt = 42,
    R16Float = 54,
    R16UNorm = 56,
    R16UInt = 57,
    R8UNorm = 61,
    R8UInt = 62,
}

impl PixelFormat {
    const ALL: [PixelFormat; 21] = [
        PixelFormat::Unknown,
        PixelFormat::R32G32B32A32Float,
        PixelFormat::R32G32B32A32UInt,
        PixelFormat::R32G32B32Float,
        PixelFormat::R16G16B16A16Float,
        PixelFormat::R16G16B16A16UNorm,
        PixelFormat::R16G16B16A16UInt,
        PixelFormat::R32G32Float,
        PixelFormat::R10G10B10A2UNorm,
        PixelFormat::R8G8B8A8UNorm,
        PixelFormat::R8G8B8A8UInt,
        PixelFormat::R8G8B8A8SNorm,
        PixelFormat::R16G16Float,
        PixelFormat::R16G16UNorm,
        PixelFormat::R32Float,
        PixelFormat::R32UInt,
        PixelFormat::R16Float,
        PixelFormat::R16UNorm,
        PixelFormat::R16UInt,
        PixelFormat::R8UNorm,
        PixelFormat::R8UInt,
    ];

    /// Wire code of this format.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Format for a wire code, `None` for unknown codes.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }

    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R32G32B32A32Float | Self::R32G32B32A32UInt => 16,
            Self::R32G32B32Float => 12,
            Self::R16G16B16A16Float
            | Self::R16G16B16A16UNorm
            | Self::R16G16B16A16UInt
            | Self::R32G32Float => 8,
            Self::R10G10B10A2UNorm
            | Self::R8G8B8A8UNorm
            | Self::R8G8B8A8UInt
            | Self::R8G8B8A8SNorm
            | Self::R16G16Float
            | Self::R16G16UNorm
            | Self::R32Float
            | Self::R32UInt => 4,
            Self::R16Float | Self::R16UNorm | Self::R16UInt => 2,
            Self::R8UNorm | Self::R8UInt => 1,
        }
    }

    /// Number of channels.
    pub fn components(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R32G32B32A32Float
            | Self::R32G32B32A32UInt
            | Self::R16G16B16A16Float
            | Self::R16G16B16A16UNorm
            | Self::R16G16B16A16UInt
            | Self::R10G10B10A2UNorm
            | Self::R8G8B8A8UNorm
            | Self::R8G8B8A8UInt
            | Self::R8G8B8A8SNorm => 4,
            Self::R32G32B32Float => 3,
            Self::R32G32Float | Self::R16G16Float | Self::R16G16UNorm => 2,
            Self::R32Float
            | Self::R32UInt
            | Self::R16Float
            | Self::R16UNorm
            | Self::R16UInt
            | Self::R8UNorm
            | Self::R8UInt => 1,
        }
    }
}

/// Reads and writes single elements of a [`PixelFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatSampler {
    pub format: PixelFormat,
    pub pixel_size: u32,
}

fn f32_at(data: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
}

fn u32_at(data: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
}

fn u16_at(data: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([data[i * 2], data[i * 2 + 1]])
}

fn put_f32(data: &mut [u8], i: usize, v: f32) {
    data[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(data: &mut [u8], i: usize, v: u32) {
    data[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u16(data: &mut [u8], i: usize, v: u16) {
    data[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
}

fn unorm16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn snorm8(v: f32) -> i8 {
    (v.clamp(-1.0, 1.0) * 127.0).round() as i8
}

impl PixelFormatSampler {
    /// Sampler for `format`, or `None` when the format cannot be sampled.
    pub fn get(format: PixelFormat) -> Option<Self> {
        if format == PixelFormat::Unknown {
            return None;
        }
        Some(Self {
            format,
            pixel_size: format.size_in_bytes(),
        })
    }

    /// Read one element, widening to four floats.
    ///
    /// Missing color channels read as `0`, a missing alpha as `1`.
    /// Integer formats are converted numerically (not normalized).
    pub fn read(&self, data: &[u8]) -> Vec4 {
        let d = data;
        match self.format {
            PixelFormat::Unknown => Vec4::zeros(),
            PixelFormat::R32G32B32A32Float => {
                Vec4::new(f32_at(d, 0), f32_at(d, 1), f32_at(d, 2), f32_at(d, 3))
            }
            PixelFormat::R32G32B32A32UInt => Vec4::new(
                u32_at(d, 0) as f32,
                u32_at(d, 1) as f32,
                u32_at(d, 2) as f32,
                u32_at(d, 3) as f32,
            ),
            PixelFormat::R32G32B32Float => Vec4::new(f32_at(d, 0), f32_at(d, 1), f32_at(d, 2), 1.0),
            PixelFormat::R16G16B16A16Float => Vec4::new(
                f16::from_bits(u16_at(d, 0)).to_f32(),
                f16::from_bits(u16_at(d, 1)).to_f32(),
                f16::from_bits(u16_at(d, 2)).to_f32(),
                f16::from_bits(u16_at(d, 3)).to_f32(),
            ),
            PixelFormat::R16G16B16A16UNorm => Vec4::new(
                u16_at(d, 0) as f32 / 65535.0,
                u16_at(d, 1) as f32 / 65535.0,
                u16_at(d, 2) as f32 / 65535.0,
                u16_at(d, 3) as f32 / 65535.0,
            ),
            PixelFormat::R16G16B16A16UInt => Vec4::new(
                u16_at(d, 0) as f32,
                u16_at(d, 1) as f32,
                u16_at(d, 2) as f32,
                u16_at(d, 3) as f32,
            ),
            PixelFormat::R32G32Float => Vec4::new(f32_at(d, 0), f32_at(d, 1), 0.0, 1.0),
            PixelFormat::R10G10B10A2UNorm => {
                let v = u32_at(d, 0);
                Vec4::new(
                    (v & 0x3ff) as f32 / 1023.0,
                    ((v >> 10) & 0x3ff) as f32 / 1023.0,
                    ((v >> 20) & 0x3ff) as f32 / 1023.0,
                    (v >> 30) as f32 / 3.0,
                )
            }
            PixelFormat::R8G8B8A8UNorm => Vec4::new(
                d[0] as f32 / 255.0,
                d[1] as f32 / 255.0,
                d[2] as f32 / 255.0,
                d[3] as f32 / 255.0,
            ),
            PixelFormat::R8G8B8A8UInt => {
                Vec4::new(d[0] as f32, d[1] as f32, d[2] as f32, d[3] as f32)
            }
            PixelFormat::R8G8B8A8SNorm => {
                let c = |b: u8| ((b as i8) as f32 / 127.0).max(-1.0);
                Vec4::new(c(d[0]), c(d[1]), c(d[2]), c(d[3]))
            }
            PixelFormat::R16G16Float => Vec4::new(
                f16::from_bits(u16_at(d, 0)).to_f32(),
                f16::from_bits(u16_at(d, 1)).to_f32(),
                0.0,
                1.0,
            ),
            PixelFormat::R16G16UNorm => Vec4::new(
                u16_at(d, 0) as f32 / 65535.0,
                u16_at(d, 1) as f32 / 65535.0,
                0.0,
                1.0,
            ),
            PixelFormat::R32Float => Vec4::new(f32_at(d, 0), 0.0, 0.0, 1.0),
            PixelFormat::R32UInt => Vec4::new(u32_at(d, 0) as f32, 0.0, 0.0, 1.0),
            PixelFormat::R16Float => Vec4::new(f16::from_bits(u16_at(d, 0)).to_f32(), 0.0, 0.0, 1.0),
            PixelFormat::R16UNorm => Vec4::new(u16_at(d, 0) as f32 / 65535.0, 0.0, 0.0, 1.0),
            PixelFormat::R16UInt => Vec4::new(u16_at(d, 0) as f32, 0.0, 0.0, 1.0),
            PixelFormat::R8UNorm => Vec4::new(d[0] as f32 / 255.0, 0.0, 0.0, 1.0),
            PixelFormat::R8UInt => Vec4::new(d[0] as f32, 0.0, 0.0, 1.0),
        }
    }

    /// Write one element, narrowing (and clamping) from four floats.
    pub fn write(&self, data: &mut [u8], v: &Vec4) {
        let d = data;
        match self.format {
            PixelFormat::Unknown => {}
            PixelFormat::R32G32B32A32Float => {
                for i in 0..4 {
                    put_f32(d, i, v[i]);
                }
            }
            PixelFormat::R32G32B32A32UInt => {
                for i in 0..4 {
                    put_u32(d, i, v[i].max(0.0) as u32);
                }
            }
            PixelFormat::R32G32B32Float => {
                for i in 0..3 {
                    put_f32(d, i, v[i]);
                }
            }
            PixelFormat::R16G16B16A16Float => {
                for i in 0..4 {
                    put_u16(d, i, f16::from_f32(v[i]).to_bits());
                }
            }
            PixelFormat::R16G16B16A16UNorm => {
                for i in 0..4 {
                    put_u16(d, i, unorm16(v[i]));
                }
            }
            PixelFormat::R16G16B16A16UInt => {
                for i in 0..4 {
                    put_u16(d, i, v[i].clamp(0.0, 65535.0) as u16);
                }
            }
            PixelFormat::R32G32Float => {
                put_f32(d, 0, v.x);
                put_f32(d, 1, v.y);
            }
            PixelFormat::R10G10B10A2UNorm => {
                let c = |x: f32| (x.clamp(0.0, 1.0) * 1023.0).round() as u32;
                let a = (v.w.clamp(0.0, 1.0) * 3.0).round() as u32;
                put_u32(d, 0, c(v.x) | (c(v.y) << 10) | (c(v.z) << 20) | (a << 30));
            }
            PixelFormat::R8G8B8A8UNorm => {
                for i in 0..4 {
                    d[i] = unorm8(v[i]);
                }
            }
            PixelFormat::R8G8B8A8UInt => {
                for i in 0..4 {
                    d[i] = v[i].clamp(0.0, 255.0) as u8;
                }
            }
            PixelFormat::R8G8B8A8SNorm => {
                for i in 0..4 {
                    d[i] = snorm8(v[i]) as u8;
                }
            }
            PixelFormat::R16G16Float => {
                put_u16(d, 0, f16::from_f32(v.x).to_bits());
                put_u16(d, 1, f16::from_f32(v.y).to_bits());
            }
            PixelFormat::R16G16UNorm => {
                put_u16(d, 0, unorm16(v.x));
                put_u16(d, 1, unorm16(v.y));
            }
            PixelFormat::R32Float => put_f32(d, 0, v.x),
            PixelFormat::R32UInt => put_u32(d, 0, v.x.max(0.0) as u32),
            PixelFormat::R16Float => put_u16(d, 0, f16::from_f32(v.x).to_bits()),
            PixelFormat::R16UNorm => put_u16(d, 0, unorm16(v.x)),
            PixelFormat::R16UInt => put_u16(d, 0, v.x.clamp(0.0, 65535.0) as u16),
            PixelFormat::R8UNorm => d[0] = unorm8(v.x),
            PixelFormat::R8UInt => d[0] = v.x.clamp(0.0, 255.0) as u8,
        }
    }
}
