//! Graphics pipeline construction
//!
//! Fixed-function state is the same for every pipeline built here: triangle lists, back-face
//! culling with counter-clockwise front faces, depth test and write with `LESS`, no blending,
//! one sample. Only the shaders, vertex layout, render pass and extent vary.

use std::ffi::CStr;
use std::path::Path;

use ash::{vk, Device};

use super::shader::{ShaderModule, ShaderSource};
use super::vertex_layout::VertexLayout;
use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

const ENTRY_POINT: &[u8] = b"main\0";

/// Pipeline layout with one descriptor set layout
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout over the given set layout
    ///
    /// A null set layout (no descriptors) gives a layout with no sets.
    pub fn new(device: Device, set_layout: vk::DescriptorSetLayout) -> VulkanResult<Self> {
        let set_layouts: Vec<vk::DescriptorSetLayout> = if set_layout == vk::DescriptorSetLayout::null() {
            Vec::new()
        } else {
            vec![set_layout]
        };
        let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

        let layout = unsafe { device.create_pipeline_layout(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, layout })
    }

    /// Get layout handle
    pub const fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Paths of the two shader stages
#[derive(Debug, Clone, Copy)]
pub struct ShaderStages<'a> {
    /// Vertex shader blob
    pub vertex: &'a Path,
    /// Fragment shader blob
    pub fragment: &'a Path,
}

/// Graphics pipeline together with the shader modules it was built from
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    shader_modules: Vec<ShaderModule>,
}

impl GraphicsPipeline {
    /// Compile a pipeline for `render_pass` and `layout` at a fixed extent
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        layout: &PipelineLayout,
        extent: vk::Extent2D,
        vertex_layout: &VertexLayout,
        shaders: &dyn ShaderSource,
        stages: ShaderStages<'_>,
    ) -> VulkanResult<Self> {
        let vertex_module = ShaderModule::load(device.clone(), shaders, stages.vertex)?;
        let fragment_module = ShaderModule::load(device.clone(), shaders, stages.fragment)?;

        let entry = CStr::from_bytes_with_nul(ENTRY_POINT)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid entry point: {e}")))?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.handle())
                .name(entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.handle())
                .name(entry)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_layout.bindings)
            .vertex_attribute_descriptions(&vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No pipeline returned".to_string()))?;

        log::info!(
            target: targets::PIPELINE,
            "Created graphics pipeline for {}x{}",
            extent.width,
            extent.height
        );

        Ok(Self {
            device,
            pipeline,
            shader_modules: vec![vertex_module, fragment_module],
        })
    }

    /// Get pipeline handle
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
        // Modules are released after the pipeline that references them.
        self.shader_modules.clear();
    }
}
