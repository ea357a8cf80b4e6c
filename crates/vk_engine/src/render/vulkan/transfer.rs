//! One-shot transfer submissions
//!
//! Every upload goes through a host-visible staging buffer and a single command buffer from a
//! transient pool. Each submission blocks on its own fence before returning, so a completed
//! call means the destination holds the data.

use ash::{vk, Device};

use super::buffer::{Buffer, BufferKind, ResourceAllocator};
use super::commands::{CommandPool, CommandRecorder};
use super::image::{Image, ImageData, ImageDesc, Texture, TEXTURE_FORMAT};
use super::sync::Fence;
use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// Access masks and stages for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Access that must complete before the barrier
    pub src_access: vk::AccessFlags,
    /// Access that waits on the barrier
    pub dst_access: vk::AccessFlags,
    /// Stage producing `src_access`
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming `dst_access`
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the supported layout transitions
pub fn layout_transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        (from, to) => Err(VulkanError::UnsupportedLayoutTransition { from, to }),
    }
}

/// Submits blocking transfer work on the graphics queue
pub struct TransferEngine {
    device: Device,
    queue: vk::Queue,
    pool: CommandPool,
}

impl TransferEngine {
    /// Create a transient command pool on the given queue family
    pub fn new(device: Device, queue: vk::Queue, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = CommandPool::new(device.clone(), queue_family_index, vk::CommandPoolCreateFlags::TRANSIENT)?;
        Ok(Self { device, queue, pool })
    }

    /// Record one command buffer, submit it with a fence and wait for completion
    pub fn one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let command_buffer = self
            .pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No transfer command buffer allocated".to_string()))?;

        let result = self.record_and_submit(command_buffer, record);
        self.pool.free_command_buffers(&[command_buffer]);
        result
    }

    fn record_and_submit<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&mut recorder)?;
        let command_buffer = recorder.end()?;

        let fence = Fence::new(self.device.clone(), false)?;
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], fence.handle())
                .map_err(VulkanError::Api)?;
        }
        fence.wait_forever()
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.one_shot(|recorder| recorder.cmd_copy_buffer(src.handle(), dst.handle(), region))
    }

    /// Upload bytes into a device-local buffer through a temporary staging buffer
    ///
    /// The destination's content metadata is updated once the copy has completed.
    pub fn stage_to_buffer(
        &self,
        allocator: &ResourceAllocator,
        bytes: &[u8],
        dst: &mut Buffer,
        element_stride: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let size = bytes.len() as vk::DeviceSize;
        if size > dst.size() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{size} bytes do not fit in a {} byte buffer", dst.size()),
            });
        }

        let staging = allocator.create_buffer(size, BufferKind::Staging)?;
        staging.write_bytes(bytes)?;
        self.copy_buffer(&staging, dst, size)?;
        dst.set_contents(size, element_stride);

        log::debug!(target: targets::TRANSFER, "Staged {size} bytes into buffer {:?}", dst.handle());
        Ok(())
    }

    /// Record and wait for a layout transition of the whole image
    pub fn transition_image_layout(&self, image: &mut Image, new_layout: vk::ImageLayout) -> VulkanResult<()> {
        let old_layout = image.layout();
        let masks = layout_transition_masks(old_layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.handle())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: image.aspect(),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access)
            .build();

        self.one_shot(|recorder| recorder.cmd_image_barrier(masks.src_stage, masks.dst_stage, barrier))?;
        image.set_layout(new_layout);

        log::trace!(
            target: targets::TRANSFER,
            "Transitioned image {:?} from {old_layout:?} to {new_layout:?}",
            image.handle()
        );
        Ok(())
    }

    /// Copy a tightly packed buffer into an image in `TRANSFER_DST_OPTIMAL`
    pub fn copy_buffer_to_image(&self, src: &Buffer, image: &Image) -> VulkanResult<()> {
        if image.layout() != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Image must be in TRANSFER_DST_OPTIMAL, found {:?}", image.layout()),
            });
        }

        let extent = image.extent();
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: image.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        self.one_shot(|recorder| recorder.cmd_copy_buffer_to_image(src.handle(), image.handle(), region))
    }

    /// Upload pixels into a new sampled image and wrap it as a texture
    pub fn upload_texture(
        &self,
        allocator: &ResourceAllocator,
        data: &ImageData,
        anisotropy: bool,
    ) -> VulkanResult<Texture> {
        let staging = allocator.create_buffer(data.size(), BufferKind::Staging)?;
        staging.write_bytes(data.pixels())?;

        let mut image = Image::new(
            allocator,
            ImageDesc {
                extent: data.extent(),
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        )?;

        self.transition_image_layout(&mut image, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        self.copy_buffer_to_image(&staging, &image)?;
        self.transition_image_layout(&mut image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;

        log::info!(
            target: targets::TRANSFER,
            "Uploaded {}x{} texture",
            data.width(),
            data.height()
        );
        Texture::new(image, anisotropy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let masks =
            layout_transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_shader_read_transition_masks() {
        let masks = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_transition_masks() {
        let masks = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert!(masks.dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_unsupported_transition() {
        let result = layout_transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(matches!(
            result,
            Err(VulkanError::UnsupportedLayoutTransition {
                from: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                to: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            })
        ));
    }
}
