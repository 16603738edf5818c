//! # RedLilium Graphics
//!
//! Headless graphics layer used by RedLilium models.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Creates buffers, volume textures and materials
//! - [`PixelFormat`] / [`PixelFormatSampler`] - Element formats with float4 conversion
//! - [`VertexLayout`] - Interned vertex layouts
//! - [`DrawCall`] / [`RenderContext`] - What models hand to the renderer
//! - [`CommandRecorder`] - Direct mesh rendering commands

pub mod command;
pub mod device;
pub mod draw;
pub mod error;
pub mod materials;
pub mod mesh;
pub mod resources;
pub mod types;

// Re-export main types for convenience
pub use command::{CommandRecorder, RecordedCommand, RecordedCommands};
pub use device::{DeviceCapabilities, GraphicsDevice};
pub use draw::{
    DrawCall, DrawPass, LightmapInfo, RenderContext, RenderList, RenderView, ShadowsCastingMode,
    StaticFlags, SurfaceDrawData,
};
pub use error::GraphicsError;
pub use materials::{Material, MaterialDescriptor, MaterialDomain};
pub use mesh::{MAX_VS_ELEMENTS, VertexAttribute, VertexAttributeSemantic, VertexLayout};
pub use resources::{Buffer, Texture};
pub use types::{
    BufferDescriptor, BufferUsage, Extent3d, PixelFormat, PixelFormatSampler, TextureDescriptor,
    TextureDimension, TextureUsage,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
