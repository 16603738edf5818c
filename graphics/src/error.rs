//! Graphics error types.

use std::fmt;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// A read or write touched bytes outside a resource.
    OutOfBounds {
        offset: u64,
        size: u64,
        capacity: u64,
    },
    /// A blocking GPU readback was requested on the main thread.
    MainThreadReadback,
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::OutOfBounds {
                offset,
                size,
                capacity,
            } => write!(
                f,
                "access of {size} bytes at offset {offset} exceeds resource size {capacity}"
            ),
            Self::MainThreadReadback => write!(f, "GPU readback is not allowed on the main thread"),
        }
    }
}

impl std::error::Error for GraphicsError {}
