//! Device-backed transfer tests
//!
//! These need a Vulkan driver. Run with `cargo test -- --ignored`.

use ash::vk;
use vk_engine::render::scene::QuadScene;
use vk_engine::render::vulkan::buffer::{upload_indices, upload_vertices};
use vk_engine::render::vulkan::image::ImageDesc;
use vk_engine::render::vulkan::{Buffer, Image, ImageData, ResourceAllocator, TransferEngine, VulkanContext};

fn headless() -> (VulkanContext, ResourceAllocator, TransferEngine) {
    let context = VulkanContext::new_headless("vk_engine tests", false).expect("headless context");
    let allocator = ResourceAllocator::new(context.device().clone(), context.physical_device().memory_properties);
    let transfer = TransferEngine::new(
        context.device().clone(),
        context.graphics_queue(),
        context.graphics_queue_family(),
    )
    .expect("transfer engine");
    (context, allocator, transfer)
}

fn host_buffer(allocator: &ResourceAllocator, size: vk::DeviceSize) -> Buffer {
    let mut buffer = Buffer::create(allocator.device().clone(), size, vk::BufferUsageFlags::TRANSFER_DST).unwrap();
    buffer
        .allocate(
            allocator.memory_properties(),
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
    buffer
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn staged_bytes_arrive_unchanged() {
    let (_context, allocator, transfer) = headless();
    let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

    let mut device_local = Buffer::create(
        allocator.device().clone(),
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
    )
    .unwrap();
    device_local
        .allocate(allocator.memory_properties(), vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .unwrap();

    transfer.stage_to_buffer(&allocator, &bytes, &mut device_local, 4).unwrap();
    assert_eq!(device_local.element_count(), 250);

    let readback = host_buffer(&allocator, bytes.len() as vk::DeviceSize);
    transfer
        .copy_buffer(&device_local, &readback, bytes.len() as vk::DeviceSize)
        .unwrap();

    assert_eq!(readback.read_bytes().unwrap(), bytes);
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn scene_geometry_uploads_with_element_counts() {
    let (_context, allocator, transfer) = headless();
    let scene = QuadScene::default();

    let vertices = upload_vertices(&allocator, &transfer, scene.vertex_bytes(), QuadScene::vertex_size()).unwrap();
    let indices = upload_indices(&allocator, &transfer, &scene.indices).unwrap();

    assert_eq!(vertices.element_count(), 8);
    assert_eq!(indices.element_count(), 12);
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn texture_upload_ends_shader_readable() {
    let (context, allocator, transfer) = headless();
    let pixels = ImageData::solid_color(4, 4, [255, 128, 0, 255]).unwrap();

    let texture = transfer
        .upload_texture(&allocator, &pixels, context.physical_device().supports_anisotropy())
        .unwrap();

    assert_eq!(texture.image().layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(texture.image().extent(), vk::Extent2D { width: 4, height: 4 });
    assert!(texture.image().is_allocated());

    // Releases the sampler, then view, memory and handle in that order.
    drop(texture);
    context.wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn image_deallocate_and_reset_rebind_memory() {
    let (_context, allocator, _transfer) = headless();
    let desc = ImageDesc {
        extent: vk::Extent2D { width: 8, height: 8 },
        format: vk::Format::R8G8B8A8_UNORM,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
    };

    let mut image = Image::new(&allocator, desc).unwrap();
    assert!(image.is_allocated());

    image.deallocate();
    assert!(!image.is_allocated());
    assert_eq!(image.view(), vk::ImageView::null());
    assert_ne!(image.handle(), vk::Image::null());

    image.allocate(allocator.memory_properties()).unwrap();
    assert!(image.is_allocated());

    image.reset(allocator.memory_properties()).unwrap();
    assert!(image.is_allocated());
    assert_ne!(image.view(), vk::ImageView::null());
    assert_eq!(image.layout(), vk::ImageLayout::UNDEFINED);

    // Drop releases view, then memory, then the handle.
    drop(image);
}
