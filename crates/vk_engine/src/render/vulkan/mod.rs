//! Vulkan backend
//!
//! Owned wrappers over device objects. Every wrapper holds a clone of the logical device and
//! releases its handle in `Drop`; owners declare fields so that dependents drop first.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod extensions;
pub mod framebuffer;
pub mod image;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;
pub mod vertex_layout;
pub mod window;

pub use buffer::{Buffer, BufferKind, ResourceAllocator};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use descriptor::{Descriptor, DescriptorBackend, DescriptorPool, DescriptorSet, DescriptorState, VulkanDescriptorBackend};
pub use framebuffer::Framebuffer;
pub use image::{DepthBuffer, Image, ImageData, Texture};
pub use pipeline::{GraphicsPipeline, PipelineLayout, ShaderStages};
pub use render_pass::RenderPass;
pub use shader::{FileShaderSource, ShaderModule, ShaderSource};
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};
pub use transfer::TransferEngine;
pub use vertex_layout::{VertexAttribute, VertexLayout};
pub use window::{Window, WindowError, WindowResult};
