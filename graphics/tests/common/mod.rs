//! Common utilities for graphics integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_graphics::{
    Buffer, BufferDescriptor, BufferUsage, DeviceCapabilities, GraphicsDevice,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Headless device with default limits.
pub fn device() -> Arc<GraphicsDevice> {
    init_logging();
    GraphicsDevice::new("graphics-tests")
}

/// Headless device with a small texture limit for validation tests.
pub fn small_device() -> Arc<GraphicsDevice> {
    init_logging();
    GraphicsDevice::with_capabilities(
        "graphics-tests-small",
        DeviceCapabilities {
            max_texture_dimension: 16,
            max_buffer_size: 1024,
        },
    )
}

/// Vertex buffer of `count` elements with the given stride, filled with `fill`.
pub fn vertex_buffer(device: &Arc<GraphicsDevice>, count: u32, stride: u32, fill: u8) -> Arc<Buffer> {
    let desc = BufferDescriptor::typed(count, stride, BufferUsage::VERTEX | BufferUsage::COPY_SRC)
        .with_label("test vertices");
    let data = vec![fill; (count * stride) as usize];
    device.create_buffer_init(&desc, &data).unwrap()
}
