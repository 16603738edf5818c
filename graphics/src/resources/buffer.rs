//! GPU buffer resource.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferUsage};

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are reference-counted.
/// They hold a weak reference back to their parent device. The headless device
/// keeps buffer memory on the host, so writes are immediately visible to
/// [`Buffer::download`].
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// buffer.write(0, &bytes)?;
/// ```
pub struct Buffer {
    device: Weak<GraphicsDevice>,
    descriptor: BufferDescriptor,
    memory: RwLock<Vec<u8>>,
}

impl Buffer {
    /// Create a new buffer (called by GraphicsDevice).
    pub(crate) fn new(device: Weak<GraphicsDevice>, descriptor: BufferDescriptor) -> Self {
        let memory = RwLock::new(vec![0u8; descriptor.size as usize]);
        Self {
            device,
            descriptor,
            memory,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Element stride in bytes (0 for untyped buffers).
    pub fn stride(&self) -> u32 {
        self.descriptor.stride
    }

    /// Number of elements for typed buffers.
    pub fn element_count(&self) -> u32 {
        self.descriptor.element_count()
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Upload `data` at byte `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let end = offset + data.len() as u64;
        if end > self.descriptor.size {
            return Err(GraphicsError::OutOfBounds {
                offset,
                size: data.len() as u64,
                capacity: self.descriptor.size,
            });
        }
        let mut memory = self.memory.write();
        memory[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Read the whole buffer back to the CPU.
    ///
    /// Readbacks block on the GPU and are refused on the main thread.
    pub fn download(&self) -> Result<Vec<u8>, GraphicsError> {
        if redlilium_core::thread::is_main_thread() {
            return Err(GraphicsError::MainThreadReadback);
        }
        if !self.descriptor.usage.contains(BufferUsage::COPY_SRC) {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} was not created with COPY_SRC",
                self.descriptor.label
            )));
        }
        Ok(self.memory.read().clone())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_debug() {
        let desc = BufferDescriptor::new(1024, BufferUsage::VERTEX);
        let buffer = Buffer::new(Weak::new(), desc);
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn write_then_download() {
        let desc = BufferDescriptor::new(8, BufferUsage::VERTEX | BufferUsage::COPY_SRC);
        let buffer = Buffer::new(Weak::new(), desc);
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.download().unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn write_out_of_bounds_fails() {
        let buffer = Buffer::new(Weak::new(), BufferDescriptor::new(4, BufferUsage::VERTEX));
        let err = buffer.write(2, &[0; 4]).unwrap_err();
        assert!(matches!(err, GraphicsError::OutOfBounds { capacity: 4, .. }));
    }

    #[test]
    fn download_requires_copy_src() {
        let buffer = Buffer::new(Weak::new(), BufferDescriptor::new(4, BufferUsage::VERTEX));
        assert!(buffer.download().is_err());
    }
}
