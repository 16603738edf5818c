//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be copied from (and downloaded).
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
        /// Buffer is rewritten from the CPU every frame.
        const DYNAMIC = 1 << 9;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Element stride in bytes (0 when the buffer is not an array of elements).
    pub stride: u32,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            stride: 0,
            usage,
        }
    }

    /// Descriptor for `count` elements of `stride` bytes each.
    pub fn typed(count: u32, stride: u32, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size: count as u64 * stride as u64,
            stride,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Number of elements, or 0 for untyped buffers.
    pub fn element_count(&self) -> u32 {
        if self.stride == 0 {
            0
        } else {
            (self.size / self.stride as u64) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_descriptor_size() {
        let desc = BufferDescriptor::typed(10, 12, BufferUsage::VERTEX).with_label("vb0");
        assert_eq!(desc.size, 120);
        assert_eq!(desc.element_count(), 10);
        assert_eq!(desc.label.as_deref(), Some("vb0"));
    }
}
