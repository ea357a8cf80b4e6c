//! Window renderer
//!
//! Owns every device object needed to draw a [`QuadScene`] into a window and hands the
//! per-frame work to a [`FrameOrchestrator`]. Resources fall into three lifetimes:
//!
//! - static: context, allocator, transfer engine, command pool, geometry, texture, uniform
//!   buffer and descriptor set; created once, released on drop
//! - pipeline: depth buffer, render pass, pipeline layout, pipeline and framebuffers; rebuilt
//!   whenever the swapchain is
//! - drawing environment: one pre-recorded command buffer per swapchain image plus the
//!   acquire/render semaphores; rebuilt with the pipeline

use std::path::PathBuf;

use ash::vk;

use crate::config::{EngineConfig, FramePacing};
use crate::foundation::logging::targets;
use crate::render::frame::{AcquireOutcome, FrameBackend, FrameOrchestrator, FrameOutcome, PresentOutcome};
use crate::render::scene::{QuadScene, UniformBufferObject, Vertex};
use crate::render::vulkan::buffer::{
    bind_index_buffer, bind_vertex_buffer, create_uniform, upload_indices, upload_vertices, write_uniform,
};
use crate::render::vulkan::image::choose_depth_format;
use crate::render::vulkan::{
    Buffer, CommandPool, CommandRecorder, DepthBuffer, Descriptor, DescriptorPool, DescriptorSet, Fence,
    FileShaderSource, Framebuffer, GraphicsPipeline, ImageData, PipelineLayout, RenderPass, ResourceAllocator,
    Semaphore, ShaderStages, Swapchain, Texture, TransferEngine, VertexLayout, VulkanContext,
    VulkanDescriptorBackend, VulkanError, VulkanResult, Window,
};

const CLEAR_VALUES: [vk::ClearValue; 2] = [
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    },
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
    },
];

/// Check that every swapchain image has exactly one framebuffer and one command buffer
pub fn check_frame_counts(images: usize, framebuffers: usize, command_buffers: usize) -> VulkanResult<()> {
    if images == framebuffers && framebuffers == command_buffers {
        Ok(())
    } else {
        Err(VulkanError::InvalidOperation {
            reason: format!(
                "Frame resources out of step: {images} images, {framebuffers} framebuffers, \
                 {command_buffers} command buffers"
            ),
        })
    }
}

/// Draws a scene into a window
pub struct Renderer {
    orchestrator: FrameOrchestrator,
    resources: FrameResources,
}

impl Renderer {
    /// Initialize the device, upload the scene and build the first swapchain
    pub fn new(window: &mut Window, config: &EngineConfig, scene: &QuadScene) -> VulkanResult<Self> {
        let resources = FrameResources::new(window, config, scene)?;
        log::info!(
            target: targets::FRAME,
            "Renderer ready: {} swapchain images at {}x{}, {:?} pacing",
            resources.swapchain.image_count(),
            resources.swapchain.extent().width,
            resources.swapchain.extent().height,
            config.frame_pacing
        );

        Ok(Self {
            orchestrator: FrameOrchestrator::new(config.frame_pacing),
            resources,
        })
    }

    /// Render and present one frame
    ///
    /// The window must not be minimized.
    pub fn draw(&mut self) -> VulkanResult<FrameOutcome> {
        let extent = self.resources.window_extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot draw into a zero-sized window".to_string(),
            });
        }
        self.orchestrator.draw(&mut self.resources)
    }

    /// Record a new framebuffer size; the next frame rebuilds the swapchain
    pub fn handle_resize(&mut self, extent: vk::Extent2D) {
        log::debug!(
            target: targets::SWAPCHAIN,
            "Window resized to {}x{}",
            extent.width,
            extent.height
        );
        self.resources.window_extent = extent;
        self.orchestrator.request_rebuild();
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.resources.context.wait_idle()
    }

    /// Current swapchain extent
    pub const fn swapchain_extent(&self) -> vk::Extent2D {
        self.resources.swapchain.extent()
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.resources.swapchain.image_count()
    }

    /// Swapchain images, framebuffers and recorded command buffers, in that order
    pub fn frame_resource_counts(&self) -> (usize, usize, usize) {
        let command_buffers = self.resources.drawing.as_ref().map_or(0, |d| d.command_buffers.len());
        (
            self.resources.swapchain.image_count(),
            self.resources.swapchain.framebuffers().len(),
            command_buffers,
        )
    }

    /// Frames presented so far
    pub const fn frame_count(&self) -> u64 {
        self.orchestrator.frame_count()
    }

    /// Swapchain rebuilds so far
    pub const fn rebuild_count(&self) -> u64 {
        self.orchestrator.rebuild_count()
    }

    /// Most recently measured frame rate
    pub const fn fps(&self) -> u32 {
        self.orchestrator.fps()
    }
}

/// Objects rebuilt with the swapchain
struct PipelineBundle {
    pipeline: GraphicsPipeline,
    layout: PipelineLayout,
    render_pass: RenderPass,
    depth: DepthBuffer,
}

/// Pre-recorded command buffers and the semaphores that order one frame
struct DrawingEnvironment {
    command_buffers: Vec<vk::CommandBuffer>,
    acquire_ready: Semaphore,
    render_done: Semaphore,
}

// Fields drop top to bottom; dependents come first.
struct FrameResources {
    drawing: Option<DrawingEnvironment>,
    pipeline: Option<PipelineBundle>,
    frame_fence: Fence,
    swapchain: Swapchain,
    descriptor_set: DescriptorSet,
    uniform_buffer: Buffer,
    texture: Texture,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    command_pool: CommandPool,
    transfer: TransferEngine,
    allocator: ResourceAllocator,
    vertex_layout: VertexLayout,
    depth_format: vk::Format,
    shaders: FileShaderSource,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    window_extent: vk::Extent2D,
    context: VulkanContext,
}

impl FrameResources {
    fn new(window: &mut Window, config: &EngineConfig, scene: &QuadScene) -> VulkanResult<Self> {
        let context = VulkanContext::new(
            window,
            &config.application_name,
            config.packed_version(),
            config.validation_enabled(),
        )?;
        let device = context.device().clone();
        let physical_device = context.physical_device();
        let queue_family = context.graphics_queue_family();

        let window_extent = window.framebuffer_extent();
        let swapchain = Swapchain::new(
            context.instance(),
            device.clone(),
            context.surface_loader().clone(),
            context.surface()?,
            physical_device.device,
            window_extent,
        )?;

        let allocator = ResourceAllocator::new(device.clone(), physical_device.memory_properties);
        let command_pool = CommandPool::new(device.clone(), queue_family, vk::CommandPoolCreateFlags::empty())?;
        let transfer = TransferEngine::new(device.clone(), context.graphics_queue(), queue_family)?;

        let vertex_buffer = upload_vertices(&allocator, &transfer, scene.vertex_bytes(), QuadScene::vertex_size())?;
        let index_buffer = upload_indices(&allocator, &transfer, &scene.indices)?;
        let uniform_buffer = create_uniform(&allocator, &UniformBufferObject::for_extent(swapchain.extent()))?;

        let pixels = ImageData::from_file(&config.texture_path)?;
        let texture = transfer.upload_texture(&allocator, &pixels, physical_device.supports_anisotropy())?;

        let pool = DescriptorPool::new(device.clone(), &DescriptorPool::UNIFORM_AND_SAMPLER, 1)?;
        let descriptor_set = DescriptorSet::new(
            VulkanDescriptorBackend::new(device.clone(), pool),
            vec![
                Descriptor::uniform_buffer(
                    0,
                    vk::ShaderStageFlags::VERTEX,
                    uniform_buffer.handle(),
                    std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize,
                ),
                Descriptor::combined_image_sampler(
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                    texture.view(),
                    texture.sampler(),
                ),
            ],
        )?;

        let instance = context.instance();
        let depth_format = choose_depth_format(|format| unsafe {
            instance.get_physical_device_format_properties(physical_device.device, format)
        })?;

        let frame_fence = Fence::new(device, true)?;

        let mut resources = Self {
            drawing: None,
            pipeline: None,
            frame_fence,
            swapchain,
            descriptor_set,
            uniform_buffer,
            texture,
            index_buffer,
            vertex_buffer,
            command_pool,
            transfer,
            allocator,
            vertex_layout: VertexLayout::derive(&Vertex::ATTRIBUTES)?,
            depth_format,
            shaders: FileShaderSource::default(),
            vertex_shader: PathBuf::from(&config.shaders.vertex_shader_path),
            fragment_shader: PathBuf::from(&config.shaders.fragment_shader_path),
            window_extent,
            context,
        };
        resources.build_pipeline()?;
        resources.build_drawing_environment()?;
        Ok(resources)
    }

    fn pipeline(&self) -> VulkanResult<&PipelineBundle> {
        self.pipeline.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Pipeline has not been built".to_string(),
        })
    }

    fn drawing(&self) -> VulkanResult<&DrawingEnvironment> {
        self.drawing.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Drawing environment has not been built".to_string(),
        })
    }

    /// Depth buffer, render pass, layout, pipeline, then one framebuffer per swapchain image
    fn build_pipeline(&mut self) -> VulkanResult<()> {
        let device = self.context.device();
        let extent = self.swapchain.extent();

        let depth = DepthBuffer::new(&self.allocator, &self.transfer, extent, self.depth_format)?;
        let render_pass = RenderPass::new_forward_pass(device.clone(), self.swapchain.format().format, depth.format())?;
        let layout = PipelineLayout::new(device.clone(), self.descriptor_set.layout())?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle(),
            &layout,
            extent,
            &self.vertex_layout,
            &self.shaders,
            ShaderStages {
                vertex: &self.vertex_shader,
                fragment: &self.fragment_shader,
            },
        )?;

        self.swapchain.create_framebuffers(render_pass.handle(), Some(depth.view()))?;
        self.pipeline = Some(PipelineBundle {
            pipeline,
            layout,
            render_pass,
            depth,
        });
        Ok(())
    }

    fn build_drawing_environment(&mut self) -> VulkanResult<()> {
        let device = self.context.device();
        let acquire_ready = Semaphore::new(device.clone())?;
        let render_done = Semaphore::new(device.clone())?;

        let pipeline = self.pipeline()?;
        let framebuffers: Vec<vk::Framebuffer> = self.swapchain.framebuffers().iter().map(Framebuffer::handle).collect();
        let command_buffers = self.command_pool.allocate_command_buffers(framebuffers.len() as u32)?;

        for (index, (&command_buffer, &framebuffer)) in command_buffers.iter().zip(&framebuffers).enumerate() {
            if let Err(e) = self.record(pipeline, command_buffer, framebuffer) {
                log::error!(target: targets::FRAME, "Failed to record command buffer {index}: {e}");
            }
        }

        let counts = check_frame_counts(self.swapchain.image_count(), framebuffers.len(), command_buffers.len());
        if let Err(e) = counts {
            self.command_pool.free_command_buffers(&command_buffers);
            return Err(e);
        }

        log::debug!(
            target: targets::FRAME,
            "Recorded {} command buffers",
            command_buffers.len()
        );
        self.drawing = Some(DrawingEnvironment {
            command_buffers,
            acquire_ready,
            render_done,
        });
        Ok(())
    }

    fn record(
        &self,
        pipeline: &PipelineBundle,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) -> VulkanResult<()> {
        let mut recorder = CommandRecorder::new(command_buffer, self.context.device().clone());
        recorder.begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent(),
        };
        {
            let mut pass =
                recorder.begin_render_pass(pipeline.render_pass.handle(), framebuffer, render_area, &CLEAR_VALUES)?;
            pass.cmd_bind_pipeline(pipeline.pipeline.handle());
            bind_vertex_buffer(&mut pass, &self.vertex_buffer)?;
            bind_index_buffer(&mut pass, &self.index_buffer)?;
            if self.descriptor_set.handle() != vk::DescriptorSet::null() {
                pass.cmd_bind_descriptor_sets(pipeline.layout.handle(), &[self.descriptor_set.handle()]);
            }
            pass.cmd_draw_indexed(self.index_buffer.element_count() as u32, 1, 0, 0, 0);
        }

        recorder.end()?;
        Ok(())
    }

    fn teardown_drawing(&mut self) {
        if let Some(drawing) = self.drawing.take() {
            self.command_pool.free_command_buffers(&drawing.command_buffers);
        }
    }

    fn teardown_pipeline(&mut self) {
        self.swapchain.destroy_framebuffers();
        self.pipeline = None;
    }
}

impl FrameBackend for FrameResources {
    fn wait_for_previous_frame(&mut self, pacing: FramePacing) -> VulkanResult<()> {
        match pacing {
            FramePacing::QueueIdle => unsafe {
                self.context
                    .device()
                    .queue_wait_idle(self.context.graphics_queue())
                    .map_err(VulkanError::Api)
            },
            FramePacing::Fence => self.frame_fence.wait_forever(),
        }
    }

    fn acquire_next_image(&mut self) -> VulkanResult<AcquireOutcome> {
        let signal = self.drawing()?.acquire_ready.handle();
        match self.swapchain.acquire_next_image(signal) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e),
        }
    }

    fn rebuild(&mut self) -> VulkanResult<()> {
        self.context.wait_idle()?;
        self.teardown_drawing();
        self.teardown_pipeline();

        self.swapchain.recreate(self.window_extent)?;
        write_uniform(
            &mut self.uniform_buffer,
            &UniformBufferObject::for_extent(self.swapchain.extent()),
        )?;
        self.build_pipeline()?;
        self.build_drawing_environment()?;

        let extent = self.swapchain.extent();
        log::info!(
            target: targets::SWAPCHAIN,
            "Rebuilt swapchain: {} images at {}x{}",
            self.swapchain.image_count(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn submit(&mut self, image_index: u32, pacing: FramePacing) -> VulkanResult<()> {
        let (command_buffer, wait, signal) = {
            let drawing = self.drawing()?;
            let command_buffer = *drawing.command_buffers.get(image_index as usize).ok_or_else(|| {
                VulkanError::InvalidOperation {
                    reason: format!("No command buffer for image {image_index}"),
                }
            })?;
            (command_buffer, drawing.acquire_ready.handle(), drawing.render_done.handle())
        };

        let fence = match pacing {
            FramePacing::QueueIdle => vk::Fence::null(),
            FramePacing::Fence => {
                self.frame_fence.reset()?;
                self.frame_fence.handle()
            }
        };

        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let device = self.context.device().clone();
        let result = unsafe {
            device
                .queue_submit(self.context.graphics_queue(), &[submit_info.build()], fence)
                .map_err(VulkanError::Api)
        };

        // A reset fence that was never submitted would block the next wait forever.
        if result.is_err() && pacing == FramePacing::Fence {
            self.frame_fence = Fence::new(device, true)?;
        }
        result
    }

    fn present(&mut self, image_index: u32) -> VulkanResult<PresentOutcome> {
        let wait = self.drawing()?.render_done.handle();
        match self.swapchain.present(self.context.present_queue(), image_index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true)
            | Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR))
            | Err(VulkanError::Api(vk::Result::SUBOPTIMAL_KHR)) => Ok(PresentOutcome::Stale),
            Err(e) => Err(e),
        }
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!(target: targets::FRAME, "Failed to wait for device idle during teardown: {e}");
        }
        self.teardown_drawing();
        self.teardown_pipeline();
        log::debug!(target: targets::FRAME, "Frame resources released");
    }
}
