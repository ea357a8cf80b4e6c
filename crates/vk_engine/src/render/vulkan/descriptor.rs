//! Descriptor set lifecycle
//!
//! A [`DescriptorSet`] walks `NoInit -> LayoutMade -> Allocated -> Configured` when built from a
//! non-empty descriptor list, and falls back to `Empty` otherwise. Changing a descriptor marks the
//! set `Modified`; the next [`DescriptorSet::update`] rebuilds the layout and set from scratch.
//!
//! Device calls go through [`DescriptorBackend`] so the state machine can be exercised without a
//! GPU.

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// Resource bound at one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// Uniform buffer bound from offset 0
    UniformBuffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Bytes visible to the shader
        range: vk::DeviceSize,
    },
    /// Image view sampled in `SHADER_READ_ONLY_OPTIMAL`
    CombinedImageSampler {
        /// Image view
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
    },
}

impl DescriptorResource {
    /// Vulkan descriptor type
    pub const fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One shader-visible resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Binding number in the set
    pub binding: u32,
    /// Stages that read the resource
    pub stage: vk::ShaderStageFlags,
    /// Bound resource
    pub resource: DescriptorResource,
}

impl Descriptor {
    /// Uniform buffer descriptor
    pub const fn uniform_buffer(binding: u32, stage: vk::ShaderStageFlags, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        Self {
            binding,
            stage,
            resource: DescriptorResource::UniformBuffer { buffer, range },
        }
    }

    /// Combined image sampler descriptor
    pub const fn combined_image_sampler(
        binding: u32,
        stage: vk::ShaderStageFlags,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        Self {
            binding,
            stage,
            resource: DescriptorResource::CombinedImageSampler { view, sampler },
        }
    }

    /// Layout binding for this descriptor
    pub fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.resource.descriptor_type())
            .descriptor_count(1)
            .stage_flags(self.stage)
            .build()
    }
}

/// Lifecycle state of a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// Nothing built yet
    NoInit,
    /// Built from an empty descriptor list; nothing to bind
    Empty,
    /// Layout exists, no set yet
    LayoutMade,
    /// Set allocated but not written
    Allocated,
    /// Set written and ready to bind
    Configured,
    /// A descriptor changed since the last write
    Modified,
}

/// Device operations needed by [`DescriptorSet`]
pub trait DescriptorBackend {
    /// Create a set layout from bindings
    fn create_layout(&mut self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a set layout
    fn destroy_layout(&mut self, layout: vk::DescriptorSetLayout);

    /// Return every set to the pool
    fn reset_pool(&mut self) -> VulkanResult<()>;

    /// Allocate `count` sets with the given layout
    fn allocate_sets(&mut self, layout: vk::DescriptorSetLayout, count: u32) -> VulkanResult<Vec<vk::DescriptorSet>>;

    /// Write resources into a set
    fn write(&mut self, set: vk::DescriptorSet, descriptors: &[Descriptor]);
}

/// Descriptor pool wrapper with RAII cleanup
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Pool sizes for one uniform buffer and one combined image sampler
    pub const UNIFORM_AND_SAMPLER: [vk::DescriptorPoolSize; 2] = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        },
    ];

    /// Create a pool; sets are never freed individually
    pub fn new(device: Device, pool_sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> VulkanResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(max_sets);

        let pool = unsafe {
            device
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, pool })
    }

    /// Get the pool handle
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// [`DescriptorBackend`] issuing real device calls against one pool
pub struct VulkanDescriptorBackend {
    device: Device,
    pool: DescriptorPool,
}

impl VulkanDescriptorBackend {
    /// Backend allocating from `pool`
    pub const fn new(device: Device, pool: DescriptorPool) -> Self {
        Self { device, pool }
    }
}

impl DescriptorBackend for VulkanDescriptorBackend {
    fn create_layout(&mut self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_layout(&mut self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn reset_pool(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool.handle(), vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn allocate_sets(&mut self, layout: vk::DescriptorSetLayout, count: u32) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool.handle())
            .set_layouts(&layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info).map_err(VulkanError::Api) }
    }

    fn write(&mut self, set: vk::DescriptorSet, descriptors: &[Descriptor]) {
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = descriptors
            .iter()
            .map(|d| match d.resource {
                DescriptorResource::UniformBuffer { buffer, range } => [vk::DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range,
                }],
                DescriptorResource::CombinedImageSampler { .. } => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = descriptors
            .iter()
            .map(|d| match d.resource {
                DescriptorResource::CombinedImageSampler { view, sampler } => [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }],
                DescriptorResource::UniformBuffer { .. } => [vk::DescriptorImageInfo::default()],
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(d.binding)
                    .dst_array_element(0)
                    .descriptor_type(d.resource.descriptor_type());
                match d.resource {
                    DescriptorResource::UniformBuffer { .. } => write.buffer_info(&buffer_infos[i]).build(),
                    DescriptorResource::CombinedImageSampler { .. } => write.image_info(&image_infos[i]).build(),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }
}

/// A single descriptor set and its layout
pub struct DescriptorSet<B: DescriptorBackend = VulkanDescriptorBackend> {
    backend: B,
    descriptors: Vec<Descriptor>,
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    state: DescriptorState,
}

impl<B: DescriptorBackend> DescriptorSet<B> {
    /// Build the layout, allocate one set and write the descriptors
    pub fn new(backend: B, descriptors: Vec<Descriptor>) -> VulkanResult<Self> {
        let mut set = Self {
            backend,
            descriptors,
            layout: vk::DescriptorSetLayout::null(),
            set: vk::DescriptorSet::null(),
            state: DescriptorState::NoInit,
        };
        set.build()?;
        Ok(set)
    }

    fn build(&mut self) -> VulkanResult<()> {
        if self.descriptors.is_empty() {
            self.state = DescriptorState::Empty;
            log::debug!(target: targets::DESCRIPTOR, "Descriptor set has no descriptors");
            return Ok(());
        }

        self.create_layout()?;
        self.allocate()?;
        self.configure()
    }

    fn create_layout(&mut self) -> VulkanResult<()> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> =
            self.descriptors.iter().map(Descriptor::layout_binding).collect();
        self.layout = self.backend.create_layout(&bindings)?;
        self.state = DescriptorState::LayoutMade;
        Ok(())
    }

    fn allocate(&mut self) -> VulkanResult<()> {
        let sets = self.backend.allocate_sets(self.layout, 1)?;
        match sets.as_slice() {
            [set] => self.set = *set,
            other => {
                return Err(VulkanError::DescriptorAllocation {
                    expected: 1,
                    actual: other.len(),
                })
            }
        }
        self.state = DescriptorState::Allocated;
        Ok(())
    }

    /// Write the descriptors into the allocated set
    pub fn configure(&mut self) -> VulkanResult<()> {
        if self.state != DescriptorState::Allocated {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Cannot configure descriptor set in state {:?}", self.state),
            });
        }
        self.backend.write(self.set, &self.descriptors);
        self.state = DescriptorState::Configured;
        log::debug!(
            target: targets::DESCRIPTOR,
            "Configured descriptor set with {} bindings",
            self.descriptors.len()
        );
        Ok(())
    }

    /// Replace the descriptor at the same binding, or add it
    ///
    /// Takes effect on the next [`update`](Self::update).
    pub fn set_descriptor(&mut self, descriptor: Descriptor) {
        match self.descriptors.iter_mut().find(|d| d.binding == descriptor.binding) {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
        self.state = DescriptorState::Modified;
    }

    /// Rebuild after a modification; returns whether anything was rebuilt
    ///
    /// The caller must ensure no pending command buffer still uses the old set.
    pub fn update(&mut self) -> VulkanResult<bool> {
        if self.state != DescriptorState::Modified {
            return Ok(false);
        }

        self.deallocate();
        self.destroy_layout();
        self.backend.reset_pool()?;
        self.build()?;
        Ok(true)
    }

    // Sets are not returned to the pool individually.
    fn deallocate(&mut self) {
        self.set = vk::DescriptorSet::null();
    }

    fn destroy_layout(&mut self) {
        if self.layout != vk::DescriptorSetLayout::null() {
            self.backend.destroy_layout(self.layout);
            self.layout = vk::DescriptorSetLayout::null();
        }
    }

    /// Layout handle; null when the set is empty
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        if self.state == DescriptorState::Empty {
            log::warn!(target: targets::DESCRIPTOR, "Requested layout of an empty descriptor set");
        }
        self.layout
    }

    /// Set handle
    pub const fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Current lifecycle state
    pub const fn state(&self) -> DescriptorState {
        self.state
    }

    /// Descriptors in binding order of declaration
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }
}

impl<B: DescriptorBackend> Drop for DescriptorSet<B> {
    fn drop(&mut self) {
        self.deallocate();
        self.destroy_layout();
    }
}
