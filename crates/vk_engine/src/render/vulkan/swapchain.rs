//! Vulkan swapchain management
//!
//! The swapchain owns its image views and the framebuffers built over them, so the three
//! always have the same length. Selection of format, present mode, image count and extent is
//! done by pure functions over the surface's reported capabilities.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

use super::framebuffer::Framebuffer;
use super::image::create_image_view;
use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// Preferred presentable format
pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Pick the surface format
///
/// A lone `UNDEFINED` entry means any format is accepted and is coerced to the preferred one.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(VulkanError::InitializationFailed("Surface reports no formats".to_string())),
        [only] if only.format == vk::Format::UNDEFINED => Ok(vk::SurfaceFormatKHR {
            format: PREFERRED_FORMAT,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }),
        [.., last] => Ok(formats
            .iter()
            .copied()
            .find(|f| f.format == PREFERRED_FORMAT)
            .unwrap_or(*last)),
    }
}

/// Pick the present mode
///
/// MAILBOX wins as soon as it is seen; FIFO and IMMEDIATE replace the running choice.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let Some(&first) = modes.first() else {
        return vk::PresentModeKHR::FIFO;
    };

    let mut chosen = first;
    for &mode in modes {
        match mode {
            vk::PresentModeKHR::MAILBOX => return mode,
            vk::PresentModeKHR::FIFO | vk::PresentModeKHR::IMMEDIATE => chosen = mode,
            _ => {}
        }
    }
    chosen
}

/// Triple buffering when the surface allows it, otherwise double buffering
///
/// The fallback is raised to the surface minimum when that is larger.
pub const fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if (caps.min_image_count < 3 && caps.max_image_count >= 3) || caps.max_image_count == 0 {
        3
    } else if caps.min_image_count > 2 {
        caps.min_image_count
    } else {
        2
    }
}

/// Current surface extent, or the window extent clamped to the surface bounds
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: window_extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else {
        caps.current_extent
    }
}

/// Swapchain with its image views and framebuffers
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<Framebuffer>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the surface and build its image views
    pub fn new(
        instance: &Instance,
        device: Device,
        surface_loader: Surface,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(instance, &device);
        let mut swapchain = Self {
            device,
            loader,
            surface_loader,
            surface,
            physical_device,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: window_extent,
        };
        swapchain.create(window_extent)?;
        Ok(swapchain)
    }

    /// Query the surface, create the swapchain and its image views
    pub fn create(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()> {
        if self.swapchain != vk::SwapchainKHR::null() {
            return Err(VulkanError::InvalidOperation {
                reason: "Swapchain already exists".to_string(),
            });
        }

        let (caps, formats, modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                self.surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
            )
        };

        let format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&modes);
        let image_count = choose_image_count(&caps);
        let extent = choose_extent(&caps, window_extent);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.images = unsafe {
            self.loader
                .get_swapchain_images(self.swapchain)
                .map_err(VulkanError::Api)?
        };
        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;

        self.create_image_views()?;

        log::info!(
            target: targets::SWAPCHAIN,
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            self.images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );
        Ok(())
    }

    /// Create one color view per swapchain image
    pub fn create_image_views(&mut self) -> VulkanResult<()> {
        self.destroy_image_views();
        for &image in &self.images {
            let view = create_image_view(&self.device, image, self.format.format, vk::ImageAspectFlags::COLOR)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Create one framebuffer per image view, with an optional shared depth attachment
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass, depth_view: Option<vk::ImageView>) -> VulkanResult<()> {
        self.destroy_framebuffers();
        for &view in &self.image_views {
            let mut attachments = vec![view];
            attachments.extend(depth_view);
            let framebuffer = Framebuffer::new(self.device.clone(), render_pass, &attachments, self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Destroy all framebuffers
    pub fn destroy_framebuffers(&mut self) {
        self.framebuffers.clear();
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    /// Destroy framebuffers, image views and the swapchain
    pub fn destroy(&mut self) {
        self.destroy_framebuffers();
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }

    /// Destroy and create again for the current surface
    ///
    /// Framebuffers must be rebuilt by the caller afterwards.
    pub fn recreate(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()> {
        log::debug!(target: targets::SWAPCHAIN, "Recreating swapchain");
        self.destroy();
        self.create(window_extent)
    }

    /// Acquire the next image, waiting without a timeout
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> VulkanResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
                .map_err(VulkanError::Api)
        }
    }

    /// Queue an image for presentation; returns whether the swapchain is suboptimal
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info).map_err(VulkanError::Api) }
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image views in image order
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Framebuffers in image order
    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    /// Chosen surface format
    pub const fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Chosen present mode
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_undefined_format_is_coerced() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, PREFERRED_FORMAT);
    }

    #[test]
    fn test_preferred_format_found() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB),
            format(PREFERRED_FORMAT),
            format(vk::Format::R16G16B16A16_SFLOAT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, PREFERRED_FORMAT);
    }

    #[test]
    fn test_last_format_fallback() {
        let formats = [format(vk::Format::R8G8B8A8_SRGB), format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
    }

    #[test]
    fn test_no_formats_is_error() {
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_mailbox_wins_immediately() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_later_acceptable_mode_overwrites() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::IMMEDIATE);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_present_mode_defaults() {
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO_RELAXED]), vk::PresentModeKHR::FIFO_RELAXED);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(2, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(1, 2)), 2);
        assert_eq!(choose_image_count(&caps(3, 8)), 3);
        assert_eq!(choose_image_count(&caps(4, 8)), 4);
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        let extent = choose_extent(&c, vk::Extent2D { width: 1, height: 1 });
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_window_size() {
        let extent = choose_extent(&caps(2, 3), vk::Extent2D { width: 4000, height: 8 });
        assert_eq!((extent.width, extent.height), (1024, 16));
    }
}
