//! GPU texture resource.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{Extent3d, PixelFormat, TextureDescriptor};

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`]. Each mip level
/// is uploaded independently, which lets streaming tasks upload one mip per task.
pub struct Texture {
    device: Weak<GraphicsDevice>,
    descriptor: TextureDescriptor,
    mips: Vec<RwLock<Option<Vec<u8>>>>,
}

impl Texture {
    /// Create a new texture (called by GraphicsDevice).
    pub(crate) fn new(device: Weak<GraphicsDevice>, descriptor: TextureDescriptor) -> Self {
        let mips = (0..descriptor.mip_level_count)
            .map(|_| RwLock::new(None))
            .collect();
        Self {
            device,
            descriptor,
            mips,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the texture size.
    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    pub fn format(&self) -> PixelFormat {
        self.descriptor.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.descriptor.mip_level_count
    }

    /// Upload one full mip level.
    pub fn write_mip(&self, mip: u32, data: &[u8]) -> Result<(), GraphicsError> {
        let slot = self.mips.get(mip as usize).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "mip {mip} out of range ({} levels)",
                self.descriptor.mip_level_count
            ))
        })?;
        let expected = self.descriptor.mip_size(mip);
        if data.len() as u64 != expected {
            return Err(GraphicsError::OutOfBounds {
                offset: 0,
                size: data.len() as u64,
                capacity: expected,
            });
        }
        *slot.write() = Some(data.to_vec());
        Ok(())
    }

    /// Whether every mip level has been uploaded.
    pub fn is_fully_uploaded(&self) -> bool {
        self.mips.iter().all(|m| m.read().is_some())
    }

    /// Whether mip level `mip` has been uploaded.
    pub fn is_mip_uploaded(&self, mip: u32) -> bool {
        self.mips
            .get(mip as usize)
            .is_some_and(|m| m.read().is_some())
    }

    /// Number of mip levels uploaded so far.
    pub fn uploaded_mips(&self) -> u32 {
        self.mips.iter().filter(|m| m.read().is_some()).count() as u32
    }

    /// Read back one mip level. Refused on the main thread.
    pub fn download_mip(&self, mip: u32) -> Result<Vec<u8>, GraphicsError> {
        if redlilium_core::thread::is_main_thread() {
            return Err(GraphicsError::MainThreadReadback);
        }
        let slot = self.mips.get(mip as usize).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("mip {mip} out of range"))
        })?;
        slot.read()
            .clone()
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("mip {mip} was never uploaded")))
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("mips", &self.descriptor.mip_level_count)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
