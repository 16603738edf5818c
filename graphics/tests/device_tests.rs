//! Integration tests for the headless graphics device.
//!
//! # Test Categories
//!
//! - **Resource Tests**: creation limits, live tracking, uploads and readback
//! - **Layout Tests**: interned vertex layouts shared across threads
//! - **Command Tests**: direct draw recording

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{device, small_device, vertex_buffer};
use redlilium_graphics::{
    BufferDescriptor, BufferUsage, CommandRecorder, GraphicsError, MaterialDomain, PixelFormat,
    RecordedCommand, RecordedCommands, TextureDescriptor, TextureUsage, VertexAttribute,
    VertexAttributeSemantic, VertexLayout,
};

// ============================================================================
// Resource Tests
// ============================================================================

#[test]
fn test_buffer_upload_and_download() {
    let device = device();
    let buffer = vertex_buffer(&device, 4, 12, 0xAB);
    assert_eq!(buffer.element_count(), 4);
    assert_eq!(buffer.stride(), 12);

    buffer.write(12, &[1u8; 12]).unwrap();
    let data = buffer.download().unwrap();
    assert_eq!(data.len(), 48);
    assert!(data[..12].iter().all(|&b| b == 0xAB));
    assert!(data[12..24].iter().all(|&b| b == 1));
}

#[test]
fn test_buffer_write_out_of_bounds() {
    let device = device();
    let buffer = vertex_buffer(&device, 2, 4, 0);
    let err = buffer.write(4, &[0u8; 8]).unwrap_err();
    assert!(matches!(err, GraphicsError::OutOfBounds { .. }));
}

#[rstest]
#[case::zero_size(0)]
#[case::over_limit(4096)]
fn test_buffer_size_validation(#[case] size: u64) {
    let device = small_device();
    let result = device.create_buffer(&BufferDescriptor::new(size, BufferUsage::VERTEX));
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
}

#[test]
fn test_failed_allocations() {
    let device = device();
    device.set_fail_allocations(true);
    let result = device.create_buffer(&BufferDescriptor::new(64, BufferUsage::INDEX));
    assert_eq!(result.unwrap_err(), GraphicsError::OutOfMemory);
    device.set_fail_allocations(false);
    assert!(device.create_buffer(&BufferDescriptor::new(64, BufferUsage::INDEX)).is_ok());
}

#[test]
fn test_live_resource_tracking() {
    let device = device();
    let a = vertex_buffer(&device, 1, 4, 0);
    let b = vertex_buffer(&device, 1, 4, 0);
    assert_eq!(device.live_buffer_count(), 2);
    drop(a);
    assert_eq!(device.live_buffer_count(), 1);
    drop(b);
    assert_eq!(device.live_buffer_count(), 0);
}

#[rstest]
#[case::too_wide(32, 4, 4, 1)]
#[case::no_mips(4, 4, 4, 0)]
#[case::too_many_mips(4, 4, 4, 4)]
fn test_texture_validation(
    #[case] width: u32,
    #[case] height: u32,
    #[case] depth: u32,
    #[case] mips: u32,
) {
    let device = small_device();
    let desc = TextureDescriptor::new_3d(width, height, depth, PixelFormat::R8UNorm, TextureUsage::COPY_DST)
        .with_mip_levels(mips);
    assert!(device.create_texture(&desc).is_err());
}

#[test]
fn test_volume_texture_mip_uploads() {
    let device = device();
    let desc = TextureDescriptor::new_3d(8, 8, 8, PixelFormat::R16Float, TextureUsage::COPY_DST)
        .with_mip_levels(4)
        .with_label("volume");
    let texture = device.create_texture(&desc).unwrap();
    assert_eq!(device.live_texture_count(), 1);

    for mip in (0..4).rev() {
        assert!(!texture.is_mip_uploaded(mip));
        let bytes = vec![mip as u8; desc.mip_size(mip) as usize];
        texture.write_mip(mip, &bytes).unwrap();
        assert!(texture.is_mip_uploaded(mip));
    }
    assert!(texture.is_fully_uploaded());
    assert_eq!(texture.download_mip(3).unwrap(), vec![3u8; 2]);
}

#[test]
fn test_default_material_is_shared() {
    let device = device();
    let a = device.default_material();
    let b = device.default_material();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.domain(), MaterialDomain::Surface);
    device.release_default_material();
    assert!(!Arc::ptr_eq(&a, &device.default_material()));
}

// ============================================================================
// Layout Tests
// ============================================================================

#[test]
fn test_vertex_layout_interned_across_threads() {
    let attributes = [
        VertexAttribute::new(VertexAttributeSemantic::Position, PixelFormat::R32G32B32Float),
        VertexAttribute::new(VertexAttributeSemantic::Normal, PixelFormat::R10G10B10A2UNorm),
    ];
    let layouts: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(move || VertexLayout::get(&attributes, false).unwrap()))
        .map(|handle| handle.join().unwrap())
        .collect();
    assert!(layouts.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(layouts[0].stride(), 16);
}

// ============================================================================
// Command Tests
// ============================================================================

#[test]
fn test_recorded_draw() {
    let device = device();
    let vb = vertex_buffer(&device, 3, 12, 0);
    let ib = device
        .create_buffer_init(&BufferDescriptor::typed(3, 2, BufferUsage::INDEX), &[0, 0, 1, 0, 2, 0])
        .unwrap();

    let mut commands = RecordedCommands::new();
    commands.bind_index_buffer(&ib, true);
    commands.bind_vertex_buffers(&[vb], &[0]);
    commands.draw_indexed(3, 0, 0);

    assert_eq!(commands.commands.len(), 3);
    assert!(matches!(
        commands.commands[2],
        RecordedCommand::DrawIndexed {
            indices_count: 3,
            start_index: 0,
            base_vertex: 0
        }
    ));
}
