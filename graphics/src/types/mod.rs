//! Common types and descriptors for graphics resources.
//!
//! This module contains pixel formats, usage flags, and descriptor structs
//! used throughout the graphics system.

mod buffer;
mod common;
mod format;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::Extent3d;
pub use format::{PixelFormat, PixelFormatSampler};
pub use texture::{TextureDescriptor, TextureDimension, TextureUsage};
