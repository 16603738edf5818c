//! Texture types and descriptors.

use bitflags::bitflags;

use super::{Extent3d, PixelFormat};

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    D2,
    #[default]
    D3,
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in shaders.
        const TEXTURE_BINDING = 1 << 2;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the texture.
    pub size: Extent3d,
    /// Mip level count.
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
    /// Texel format.
    pub format: PixelFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a new volume texture descriptor.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: None,
            size: Extent3d::new_3d(width, height, depth),
            mip_level_count: 1,
            dimension: TextureDimension::D3,
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Bytes of one row of texels at `mip`.
    pub fn row_pitch(&self, mip: u32) -> u32 {
        self.size.mip_level_size(mip).width * self.format.size_in_bytes()
    }

    /// Bytes of one depth slice at `mip`.
    pub fn slice_pitch(&self, mip: u32) -> u32 {
        self.row_pitch(mip) * self.size.mip_level_size(mip).height
    }

    /// Bytes of the whole mip level.
    pub fn mip_size(&self, mip: u32) -> u64 {
        self.slice_pitch(mip) as u64 * self.size.mip_level_size(mip).depth as u64
    }
}
