//! Images, depth buffers and sampled textures
//!
//! An [`Image`] owns its handle, memory and view, and remembers the layout it was last
//! transitioned to. Layout changes are recorded by the transfer engine.

use std::path::Path;

use ash::{vk, Device};

use super::buffer::ResourceAllocator;
use super::memory::find_memory_type;
use super::transfer::TransferEngine;
use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Format of sampled textures
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Whether a depth format also carries a stencil component
pub fn has_stencil_component(format: vk::Format) -> bool {
    format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT
}

/// Aspect flags used for views and barriers of `format`
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if DEPTH_FORMAT_CANDIDATES.contains(&format) {
        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        aspect
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Pick the first candidate whose tiling supports `features`
pub fn choose_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> VulkanResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = format_properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| VulkanError::InitializationFailed("Failed to find supported format".to_string()))
}

/// Pick a depth attachment format for optimal tiling
pub fn choose_depth_format(
    format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> VulkanResult<vk::Format> {
    choose_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        format_properties,
    )
}

/// Parameters for a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Pixel format
    pub format: vk::Format,
    /// Tiling mode
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub memory_flags: vk::MemoryPropertyFlags,
}

/// One step of releasing an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    /// Destroy the view
    View,
    /// Free the bound memory
    Memory,
    /// Destroy the image handle
    Handle,
}

/// Release order: memory is always freed before its handle is destroyed
pub const RELEASE_ORDER: [ReleaseStep; 3] = [ReleaseStep::View, ReleaseStep::Memory, ReleaseStep::Handle];

/// Release whichever of `view`, `memory` and `image` are non-null, in [`RELEASE_ORDER`]
fn release(device: &Device, view: vk::ImageView, memory: vk::DeviceMemory, image: vk::Image) {
    for step in RELEASE_ORDER {
        unsafe {
            match step {
                ReleaseStep::View if view != vk::ImageView::null() => device.destroy_image_view(view, None),
                ReleaseStep::Memory if memory != vk::DeviceMemory::null() => device.free_memory(memory, None),
                ReleaseStep::Handle if image != vk::Image::null() => device.destroy_image(image, None),
                _ => {}
            }
        }
    }
}

/// 2D image with bound memory and a view
pub struct Image {
    device: Device,
    view: vk::ImageView,
    image: vk::Image,
    memory: vk::DeviceMemory,
    desc: ImageDesc,
    layout: vk::ImageLayout,
    aspect: vk::ImageAspectFlags,
}

impl Image {
    /// Create the image, allocate and bind device memory, and build a view
    pub fn new(allocator: &ResourceAllocator, desc: ImageDesc) -> VulkanResult<Self> {
        let mut image = Self::create(allocator.device().clone(), desc)?;
        image.allocate(allocator.memory_properties())?;

        log::debug!(
            target: targets::ALLOCATOR,
            "Created {}x{} image with format {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(image)
    }

    /// Create the image handle; no memory is bound and there is no view yet
    pub fn create(device: Device, desc: ImageDesc) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device,
            view: vk::ImageView::null(),
            image,
            memory: vk::DeviceMemory::null(),
            desc,
            layout: vk::ImageLayout::UNDEFINED,
            aspect: aspect_for_format(desc.format),
        })
    }

    /// Allocate and bind memory at offset 0, then build the view
    pub fn allocate(&mut self, memory_properties: &vk::PhysicalDeviceMemoryProperties) -> VulkanResult<()> {
        if self.is_allocated() {
            return Err(VulkanError::InvalidOperation {
                reason: "Image memory is already allocated".to_string(),
            });
        }

        let requirements = unsafe { self.device.get_image_memory_requirements(self.image) };
        let memory_type_index =
            find_memory_type(memory_properties, requirements.memory_type_bits, self.desc.memory_flags)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)? };
        if let Err(e) = unsafe { self.device.bind_image_memory(self.image, memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(VulkanError::Api(e));
        }
        self.memory = memory;

        // On failure the memory stays recorded and is released with the image.
        self.view = create_image_view(&self.device, self.image, self.desc.format, self.aspect)?;
        Ok(())
    }

    /// Destroy the view and free the memory, keeping the handle
    pub fn deallocate(&mut self) {
        release(&self.device, self.view, self.memory, vk::Image::null());
        self.view = vk::ImageView::null();
        self.memory = vk::DeviceMemory::null();
        self.layout = vk::ImageLayout::UNDEFINED;
    }

    /// Release everything: view, memory, then the handle
    pub fn destroy(&mut self) {
        self.deallocate();
        release(&self.device, vk::ImageView::null(), vk::DeviceMemory::null(), self.image);
        self.image = vk::Image::null();
    }

    /// Destroy and recreate with the same description
    ///
    /// Only valid when no queued work references the image. Contents are lost and the layout
    /// returns to `UNDEFINED`.
    pub fn reset(&mut self, memory_properties: &vk::PhysicalDeviceMemoryProperties) -> VulkanResult<()> {
        self.destroy();
        let fresh = Self::create(self.device.clone(), self.desc)?;
        *self = fresh;
        self.allocate(memory_properties)
    }

    /// Whether memory is bound
    pub fn is_allocated(&self) -> bool {
        self.memory != vk::DeviceMemory::null()
    }

    /// Image handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// View covering the single mip level and layer
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format
    pub const fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Size in pixels
    pub const fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Layout after the last recorded transition
    pub const fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Aspect flags derived from the format
    pub const fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub(crate) fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        release(&self.device, self.view, self.memory, self.image);
    }
}

/// Create a 2D view over one mip level and layer
pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
}

/// Depth attachment sized to the swapchain
pub struct DepthBuffer {
    image: Image,
}

impl DepthBuffer {
    /// Create a device-local depth image and move it into the attachment layout
    pub fn new(
        allocator: &ResourceAllocator,
        transfer: &TransferEngine,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> VulkanResult<Self> {
        let mut image = Image::new(
            allocator,
            ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        )?;
        transfer.transition_image_layout(&mut image, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)?;
        Ok(Self { image })
    }

    /// Depth view for framebuffers
    pub const fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Chosen depth format
    pub const fn format(&self) -> vk::Format {
        self.image.format()
    }
}

/// Decoded RGBA8 pixels ready for upload
#[derive(Debug, Clone)]
pub struct ImageData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageData {
    /// Wrap raw RGBA8 pixels; the length must be `width * height * 4`
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> VulkanResult<Self> {
        if width == 0 || height == 0 {
            return Err(VulkanError::Asset(format!("Image has zero extent {width}x{height}")));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::Asset(format!(
                "Expected {expected} bytes of RGBA pixels for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Decode an image file and convert it to RGBA8
    pub fn from_file(path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .map_err(|e| VulkanError::Asset(format!("Failed to load image {}: {e}", path.display())))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();

        log::info!(target: targets::TRANSFER, "Loaded image {width}x{height} from {}", path.display());
        Self::new(width, height, decoded.into_raw())
    }

    /// Single-color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> VulkanResult<Self> {
        let pixels = color.repeat(width as usize * height as usize);
        Self::new(width, height, pixels)
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Extent in pixels
    pub const fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// RGBA8 bytes, row-major
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Byte size of the pixel data
    pub fn size(&self) -> vk::DeviceSize {
        self.pixels.len() as vk::DeviceSize
    }
}

/// Sampler settings for textures
pub fn sampler_create_info(max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo {
    vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(max_anisotropy.is_some())
        .max_anisotropy(max_anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0)
        .build()
}

/// Sampled image with its sampler
pub struct Texture {
    sampler: vk::Sampler,
    image: Image,
}

impl Texture {
    /// Wrap an image already in `SHADER_READ_ONLY_OPTIMAL` and create its sampler
    pub fn new(image: Image, anisotropy: bool) -> VulkanResult<Self> {
        let info = sampler_create_info(anisotropy.then_some(16.0));
        let sampler = unsafe { image.device.create_sampler(&info, None).map_err(VulkanError::Api)? };
        Ok(Self { sampler, image })
    }

    /// Image view for descriptor binding
    pub const fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Sampler for descriptor binding
    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Underlying image
    pub const fn image(&self) -> &Image {
        &self.image
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.image.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_frees_memory_before_destroying_handle() {
        let position = |step| RELEASE_ORDER.iter().position(|&s| s == step).unwrap();
        assert_eq!(RELEASE_ORDER[0], ReleaseStep::View);
        assert!(position(ReleaseStep::Memory) < position(ReleaseStep::Handle));
        assert_eq!(RELEASE_ORDER.len(), 3);
    }

    fn supports(optimal: &[vk::Format]) -> impl FnMut(vk::Format) -> vk::FormatProperties + '_ {
        move |format| vk::FormatProperties {
            optimal_tiling_features: if optimal.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_depth_format_prefers_first_candidate() {
        let all = DEPTH_FORMAT_CANDIDATES;
        assert_eq!(choose_depth_format(supports(&all)).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_depth_format_falls_through() {
        let only_last = [vk::Format::D24_UNORM_S8_UINT];
        assert_eq!(choose_depth_format(supports(&only_last)).unwrap(), vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_depth_format_none_supported() {
        assert!(choose_depth_format(supports(&[])).is_err());
    }

    #[test]
    fn test_linear_tiling_checks_linear_features() {
        let result = choose_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            supports(&[vk::Format::D32_SFLOAT]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_aspects() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(TEXTURE_FORMAT), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_image_data_size() {
        let data = ImageData::solid_color(3, 2, [255, 0, 0, 255]).unwrap();
        assert_eq!(data.size(), 24);
        assert_eq!(&data.pixels()[4..8], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_image_data_rejects_short_pixels() {
        assert!(matches!(ImageData::new(2, 2, vec![0; 15]), Err(VulkanError::Asset(_))));
        assert!(matches!(ImageData::new(0, 2, Vec::new()), Err(VulkanError::Asset(_))));
    }

    #[test]
    fn test_missing_file_is_asset_error() {
        let result = ImageData::from_file("does/not/exist.png");
        assert!(matches!(result, Err(VulkanError::Asset(_))));
    }

    #[test]
    fn test_sampler_anisotropy() {
        let with = sampler_create_info(Some(16.0));
        assert_eq!(with.anisotropy_enable, vk::TRUE);
        assert!((with.max_anisotropy - 16.0).abs() < f32::EPSILON);

        let without = sampler_create_info(None);
        assert_eq!(without.anisotropy_enable, vk::FALSE);
        assert_eq!(without.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(without.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
    }
}
