//! Graphics device.
//!
//! The [`GraphicsDevice`] is the main interface for creating GPU resources.
//! This is a headless device: resource memory lives on the host so uploads,
//! downloads and draw recording can be exercised without a GPU.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::GraphicsError;
use crate::materials::{Material, MaterialDescriptor, MaterialDomain};
use crate::resources::{Buffer, Texture};
use crate::types::{BufferDescriptor, TextureDescriptor};

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum texture dimension.
    pub max_texture_dimension: u32,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 2048,
            max_buffer_size: 1 << 30, // 1 GB
        }
    }
}

/// A graphics device for creating GPU resources.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and can be safely shared across threads.
/// All resource creation methods use interior mutability where needed.
///
/// # Example
///
/// ```ignore
/// let device = GraphicsDevice::new("headless");
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// let material = device.default_material();
/// ```
pub struct GraphicsDevice {
    name: String,
    capabilities: DeviceCapabilities,
    // Track allocated resources (weak references for cleanup/debugging)
    buffers: RwLock<Vec<Weak<Buffer>>>,
    textures: RwLock<Vec<Weak<Texture>>>,
    materials: RwLock<Vec<Weak<Material>>>,
    default_material: Mutex<Option<Arc<Material>>>,
    fail_allocations: AtomicBool,
}

impl GraphicsDevice {
    /// Create a new headless device.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_capabilities(name, DeviceCapabilities::default())
    }

    /// Create a device with explicit limits.
    pub fn with_capabilities(name: impl Into<String>, capabilities: DeviceCapabilities) -> Arc<Self> {
        let name = name.into();
        log::info!("GraphicsDevice: created headless device '{name}'");
        Arc::new(Self {
            name,
            capabilities,
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
            materials: RwLock::new(Vec::new()),
            default_material: Mutex::new(None),
            fail_allocations: AtomicBool::new(false),
        })
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device capabilities.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Make every following allocation fail, simulating an exhausted device.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Relaxed);
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size exceeds device limits or allocation fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        // Validate
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        if self.fail_allocations.load(Ordering::Relaxed) {
            return Err(GraphicsError::OutOfMemory);
        }

        let buffer = Arc::new(Buffer::new(Arc::downgrade(self), descriptor.clone()));

        // Track it
        {
            let mut buffers = self.buffers.write();
            buffers.retain(|b| b.strong_count() > 0);
            buffers.push(Arc::downgrade(&buffer));
        }

        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );

        Ok(buffer)
    }

    /// Create a GPU buffer and upload its initial contents.
    pub fn create_buffer_init(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> Result<Arc<Buffer>, GraphicsError> {
        let buffer = self.create_buffer(descriptor)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Create a GPU texture.
    ///
    /// # Errors
    ///
    /// Returns an error if the texture dimensions exceed device limits or allocation fails.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        // Validate
        let max_dim = self.capabilities.max_texture_dimension;
        if descriptor.size.width > max_dim
            || descriptor.size.height > max_dim
            || descriptor.size.depth > max_dim
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture dimension exceeds maximum {max_dim}"
            )));
        }

        if descriptor.size.width == 0 || descriptor.size.height == 0 || descriptor.size.depth == 0 {
            return Err(GraphicsError::InvalidParameter(
                "texture dimensions cannot be zero".to_string(),
            ));
        }

        if descriptor.mip_level_count == 0 || descriptor.mip_level_count > descriptor.size.max_mips()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "invalid mip count {}",
                descriptor.mip_level_count
            )));
        }

        if self.fail_allocations.load(Ordering::Relaxed) {
            return Err(GraphicsError::OutOfMemory);
        }

        let texture = Arc::new(Texture::new(Arc::downgrade(self), descriptor.clone()));

        {
            let mut textures = self.textures.write();
            textures.retain(|t| t.strong_count() > 0);
            textures.push(Arc::downgrade(&texture));
        }

        log::trace!(
            "GraphicsDevice: created texture {:?}, size={}x{}x{}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );

        Ok(texture)
    }

    /// Create a material.
    pub fn create_material(self: &Arc<Self>, descriptor: &MaterialDescriptor) -> Arc<Material> {
        let material = Arc::new(Material::new(Arc::downgrade(self), descriptor.clone()));
        {
            let mut materials = self.materials.write();
            materials.retain(|m| m.strong_count() > 0);
            materials.push(Arc::downgrade(&material));
        }
        log::trace!("GraphicsDevice: created material {:?}", descriptor.label);
        material
    }

    /// The fallback surface material, created on first use.
    pub fn default_material(self: &Arc<Self>) -> Arc<Material> {
        let mut slot = self.default_material.lock();
        if let Some(material) = slot.as_ref() {
            return Arc::clone(material);
        }
        let material = self.create_material(
            &MaterialDescriptor::new(MaterialDomain::Surface).with_label("DefaultMaterial"),
        );
        *slot = Some(Arc::clone(&material));
        material
    }

    /// Release the fallback material. Called at engine shutdown.
    pub fn release_default_material(&self) {
        if self.default_material.lock().take().is_some() {
            log::debug!("GraphicsDevice: released default material");
        }
    }

    /// Number of buffers that are still alive.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers
            .read()
            .iter()
            .filter(|b| b.strong_count() > 0)
            .count()
    }

    /// Number of textures that are still alive.
    pub fn live_texture_count(&self) -> usize {
        self.textures
            .read()
            .iter()
            .filter(|t| t.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

// Ensure GraphicsDevice is Send + Sync
static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, PixelFormat, TextureUsage};

    #[test]
    fn test_create_buffer() {
        let device = GraphicsDevice::new("test");
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))
            .unwrap();
        assert_eq!(buffer.size(), 1024);
        assert_eq!(device.live_buffer_count(), 1);
        drop(buffer);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_zero_size_buffer_fails() {
        let device = GraphicsDevice::new("test");
        let result = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
        assert!(result.is_err());
    }

    #[test]
    fn failing_allocations() {
        let device = GraphicsDevice::new("test");
        device.set_fail_allocations(true);
        let result = device.create_buffer(&BufferDescriptor::new(16, BufferUsage::VERTEX));
        assert_eq!(result.unwrap_err(), GraphicsError::OutOfMemory);
    }

    #[test]
    fn test_create_texture_validates_mips() {
        let device = GraphicsDevice::new("test");
        let desc = TextureDescriptor::new_3d(8, 8, 8, PixelFormat::R8UNorm, TextureUsage::COPY_DST);
        assert!(device.create_texture(&desc.clone().with_mip_levels(4)).is_ok());
        assert!(device.create_texture(&desc.with_mip_levels(5)).is_err());
    }

    #[test]
    fn default_material_is_shared_until_released() {
        let device = GraphicsDevice::new("test");
        let a = device.default_material();
        let b = device.default_material();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_surface());
        device.release_default_material();
        let c = device.default_material();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
