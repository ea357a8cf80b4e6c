//! Vulkan context management
//!
//! Instance creation, physical device and queue family selection, and the logical device.
//! Everything here is created once and read-only afterwards.

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use ash::{Device, Entry, Instance};
use std::ffi::{CStr, CString};
use thiserror::Error;

use super::extensions::{self, AvailableName, RequiredName, RequirementKind};
use super::window::Window;
use crate::foundation::logging::targets;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A required extension or layer is not offered by the driver
    #[error("Missing {kind}: {name}")]
    MissingRequirement {
        /// Extension or layer kind
        kind: String,
        /// Missing name
        name: String,
    },

    /// No queue family offers graphics and present support
    #[error("Failed to find suitable queue(s)")]
    NoSuitableQueueFamily,

    /// Vertex attribute with a component count that has no float format
    #[error("Unsupported vertex attribute format: {components} components")]
    UnsupportedVertexFormat {
        /// Declared component count
        components: u32,
    },

    /// Image layout transition without a barrier recipe
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        /// Current layout
        from: vk::ImageLayout,
        /// Requested layout
        to: vk::ImageLayout,
    },

    /// Descriptor allocation returned an unexpected number of sets
    #[error("Descriptor allocation returned {actual} sets, expected {expected}")]
    DescriptorAllocation {
        /// Sets requested
        expected: usize,
        /// Sets returned
        actual: usize,
    },

    /// Shader or image source could not be read
    #[error("Asset error: {0}")]
    Asset(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the given extensions, verified against the driver
    pub fn new(
        app_name: &str,
        app_version: u32,
        required_extensions: &[RequiredName],
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("Application name contains NUL".to_string()))?;
        let engine_name_cstr = CString::new("vk_engine")
            .map_err(|_| VulkanError::InitializationFailed("Engine name contains NUL".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(app_version)
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        #[allow(unused_mut)]
        let mut wanted_extensions = required_extensions.to_vec();
        #[cfg(debug_assertions)]
        if enable_validation {
            wanted_extensions.push(RequiredName::from_cstr(DebugUtils::name()));
        }

        let available_extensions = AvailableName::from_extensions(
            &entry
                .enumerate_instance_extension_properties(None)
                .map_err(VulkanError::Api)?,
        );
        let extension_names =
            extensions::verify(RequirementKind::InstanceExtension, &wanted_extensions, &available_extensions)?;

        let wanted_layers = if enable_validation {
            vec![RequiredName::any(VALIDATION_LAYER)]
        } else {
            Vec::new()
        };
        let available_layers =
            AvailableName::from_layers(&entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?);
        let layer_names = extensions::verify(RequirementKind::Layer, &wanted_layers, &available_layers)?;

        let extension_ptrs: Vec<*const std::os::raw::c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::os::raw::c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        #[cfg(debug_assertions)]
        let debug_utils = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(target: targets::CONTEXT, "Created instance for {app_name}");

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!(target: targets::VALIDATION, "{:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!(target: targets::VALIDATION, "{:?} - {}", message_type, message);
    } else {
        log::debug!(target: targets::VALIDATION, "{:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// A queue family and the queue slots used from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue family index
    pub family_index: u32,
    /// Queue indices within the family
    pub queue_indices: Vec<u32>,
}

impl QueueInfo {
    fn first_queue(family_index: u32) -> Self {
        Self {
            family_index,
            queue_indices: vec![0],
        }
    }
}

/// Graphics and present queue choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSelection {
    /// Queue used for draws and transfers
    pub graphics: QueueInfo,
    /// Queue used for presentation
    pub present: QueueInfo,
}

impl QueueSelection {
    /// Whether one family serves both roles
    pub const fn is_shared(&self) -> bool {
        self.graphics.family_index == self.present.family_index
    }
}

/// Pick queue families for graphics and presentation
///
/// A single family that can do both is preferred. Otherwise the first graphics-capable
/// family and the first present-capable family are used separately.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> VulkanResult<bool>,
) -> VulkanResult<QueueSelection> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in (0u32..).zip(families) {
        if family.queue_count == 0 {
            continue;
        }
        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = supports_present(index)?;

        if has_graphics && has_present {
            return Ok(QueueSelection {
                graphics: QueueInfo::first_queue(index),
                present: QueueInfo::first_queue(index),
            });
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    match (graphics, present) {
        (Some(graphics), Some(present)) => Ok(QueueSelection {
            graphics: QueueInfo::first_queue(graphics),
            present: QueueInfo::first_queue(present),
        }),
        _ => Err(VulkanError::NoSuitableQueueFamily),
    }
}

/// First discrete or integrated GPU, in enumeration order
pub fn pick_physical_device(
    candidates: &[(vk::PhysicalDevice, vk::PhysicalDeviceType)],
) -> Option<vk::PhysicalDevice> {
    candidates
        .iter()
        .find(|(_, ty)| matches!(*ty, vk::PhysicalDeviceType::DISCRETE_GPU | vk::PhysicalDeviceType::INTEGRATED_GPU))
        .map(|(device, _)| *device)
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Chosen queue families
    pub queues: QueueSelection,
}

impl PhysicalDeviceInfo {
    /// Select the first discrete or integrated GPU and its queue families
    pub fn select(instance: &Instance, surface: Option<(&Surface, vk::SurfaceKHR)>) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };
        let candidates: Vec<_> = devices
            .iter()
            .map(|&device| {
                let properties = unsafe { instance.get_physical_device_properties(device) };
                (device, properties.device_type)
            })
            .collect();

        let device = pick_physical_device(&candidates)
            .ok_or_else(|| VulkanError::InitializationFailed("No discrete or integrated GPU found".to_string()))?;

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        log::info!(target: targets::CONTEXT, "Selected GPU: {name}");

        let queues = match surface {
            Some((loader, surface)) => select_queue_families(&families, |index| unsafe {
                loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)
            })?,
            None => select_queue_families(&families, |_| Ok(true))?,
        };
        log::debug!(
            target: targets::CONTEXT,
            "Graphics family {}, present family {}",
            queues.graphics.family_index,
            queues.present.family_index
        );

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            queues,
        })
    }

    /// Whether anisotropic filtering can be enabled
    pub fn supports_anisotropy(&self) -> bool {
        self.features.sampler_anisotropy == vk::TRUE
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create a logical device with the selected queues and the given extensions
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        required_extensions: &[RequiredName],
    ) -> VulkanResult<Self> {
        let properties = unsafe {
            instance
                .enumerate_device_extension_properties(physical_device.device)
                .map_err(VulkanError::Api)?
        };
        let available = AvailableName::from_extensions(&properties);
        let extension_names = extensions::verify(RequirementKind::DeviceExtension, required_extensions, &available)?;
        let extension_ptrs: Vec<*const std::os::raw::c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();

        let queues = &physical_device.queues;
        let mut families = vec![queues.graphics.family_index];
        if !queues.is_shared() {
            families.push(queues.present.family_index);
        }

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical_device.supports_anisotropy())
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(queues.graphics.family_index, queues.graphics.queue_indices[0]) };
        let present_queue = unsafe { device.get_device_queue(queues.present.family_index, queues.present.queue_indices[0]) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Instance, surface, physical device and logical device
pub struct VulkanContext {
    surface: Option<vk::SurfaceKHR>,
    surface_loader: Surface,
    physical_device: PhysicalDeviceInfo,
    device: LogicalDevice,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a context presenting to the window's surface
    pub fn new(window: &mut Window, app_name: &str, app_version: u32, enable_validation: bool) -> VulkanResult<Self> {
        let instance_extensions: Vec<RequiredName> = window
            .get_required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}")))?
            .into_iter()
            .map(RequiredName::any)
            .collect();

        let instance = VulkanInstance::new(app_name, app_version, &instance_extensions, enable_validation)?;
        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {e}")))?;

        let selected = PhysicalDeviceInfo::select(&instance.instance, Some((&surface_loader, surface)))
            .and_then(|physical_device| {
                let device = LogicalDevice::new(
                    &instance.instance,
                    &physical_device,
                    &[RequiredName::from_cstr(SwapchainLoader::name())],
                )?;
                Ok((physical_device, device))
            });
        let (physical_device, device) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        Ok(Self {
            surface: Some(surface),
            surface_loader,
            physical_device,
            device,
            instance,
        })
    }

    /// Create a context without a surface
    ///
    /// Used for offline uploads and device-backed tests; no swapchain can be built on it.
    pub fn new_headless(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(app_name, vk::make_api_version(0, 1, 0, 0), &[], enable_validation)?;
        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let physical_device = PhysicalDeviceInfo::select(&instance.instance, None)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device, &[])?;

        Ok(Self {
            surface: None,
            surface_loader,
            physical_device,
            device,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Presentation surface
    pub fn surface(&self) -> VulkanResult<vk::SurfaceKHR> {
        self.surface.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Context was created without a surface".to_string(),
        })
    }

    /// Get the surface loader
    pub const fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Get the physical device info
    pub const fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the logical device
    pub const fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the graphics queue
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub const fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the graphics queue family index
    pub const fn graphics_queue_family(&self) -> u32 {
        self.physical_device.queues.graphics.family_index
    }

    /// Block until the device has no outstanding work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            if let Some(surface) = self.surface.take() {
                self.surface_loader.destroy_surface(surface, None);
            }
        }
        log::debug!(target: targets::CONTEXT, "Context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_family_preferred() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
        ];
        // Family 1 has graphics only; family 2 can also present.
        let selection = select_queue_families(&families, |i| Ok(i != 1)).unwrap();

        assert!(selection.is_shared());
        assert_eq!(selection.graphics, QueueInfo { family_index: 2, queue_indices: vec![0] });
    }

    #[test]
    fn test_separate_families_when_none_shared() {
        let families = [family(vk::QueueFlags::GRAPHICS, 2), family(vk::QueueFlags::TRANSFER, 1)];
        let selection = select_queue_families(&families, |i| Ok(i == 1)).unwrap();

        assert!(!selection.is_shared());
        assert_eq!(selection.graphics.family_index, 0);
        assert_eq!(selection.present.family_index, 1);
    }

    #[test]
    fn test_no_graphics_family_is_fatal() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        let err = select_queue_families(&families, |_| Ok(true)).unwrap_err();
        assert!(matches!(err, VulkanError::NoSuitableQueueFamily));
    }

    #[test]
    fn test_empty_family_skipped() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0), family(vk::QueueFlags::GRAPHICS, 1)];
        let selection = select_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(selection.graphics.family_index, 1);
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let err = select_queue_families(&families, |_| Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)))
            .unwrap_err();
        assert!(matches!(err, VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
    }

    #[test]
    fn test_first_discrete_or_integrated_wins() {
        let cpu = vk::PhysicalDevice::from_raw(1);
        let integrated = vk::PhysicalDevice::from_raw(2);
        let discrete = vk::PhysicalDevice::from_raw(3);
        let candidates = [
            (cpu, vk::PhysicalDeviceType::CPU),
            (integrated, vk::PhysicalDeviceType::INTEGRATED_GPU),
            (discrete, vk::PhysicalDeviceType::DISCRETE_GPU),
        ];

        assert_eq!(pick_physical_device(&candidates), Some(integrated));
        assert_eq!(pick_physical_device(&candidates[..1]), None);
    }
}
