// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Window surface creation
// - Physical device selection (see selector.rs)
// - Logical device + graphics/present queue creation

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::error::RenderError;
use super::selector::{self, QueueFamilies, SelectedDevice};
use super::surface::SurfaceSupport;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every candidate GPU must offer
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan device wrapper with automatic cleanup.
///
/// Owns everything that lives for the whole process: instance, debug
/// messenger, surface and logical device. Swapchain-dependent resources
/// hold an `Arc` to this and are torn down first.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Presentation target
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    // Queue handles (may alias when both roles share a family)
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    /// Surface capabilities as seen when the GPU was selected
    pub surface_support: SurfaceSupport,
}

impl VulkanDevice {
    /// Create instance, surface and logical device for `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `window` - Anything exposing raw window/display handles
    pub fn new<W>(app_name: &str, enable_validation: bool, window: &W) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance (+ debug messenger)
        let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query surface instance extensions")?;
        let instance =
            Self::create_instance(&entry, app_name, enable_validation, surface_extensions)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 3: Create surface
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        // Step 4: Pick physical device (GPU)
        let selected = selector::select_device(
            &instance,
            &surface_loader,
            surface,
            REQUIRED_DEVICE_EXTENSIONS,
        )?;

        // Step 5: Create logical device
        let device = Self::create_logical_device(&instance, &selected)?;
        let graphics_queue = unsafe { device.get_device_queue(selected.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(selected.queue_families.present, 0) };

        let properties = unsafe { instance.get_physical_device_properties(selected.handle) };

        log::info!("Selected GPU: {}", selected.name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            selected.queue_families.graphics,
            selected.queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device: selected.handle,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue_families: selected.queue_families,
            graphics_queue,
            present_queue,
            debug_utils,
            surface_support: selected.surface,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut required: Vec<&CStr> = surface_extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        if enable_validation {
            required.push(ash::ext::debug_utils::NAME);
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;
        if let Some(missing) = first_missing(
            &required,
            available.iter().filter_map(|ext| ext.extension_name_as_c_str().ok()),
        ) {
            return Err(
                RenderError::MissingInstanceExtension(missing.to_string_lossy().into_owned())
                    .into(),
            );
        }

        let layer_names = if enable_validation {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .context("Failed to enumerate instance layers")?;
            if let Some(missing) = first_missing(
                &[VALIDATION_LAYER],
                layers.iter().filter_map(|layer| layer.layer_name_as_c_str().ok()),
            ) {
                return Err(RenderError::MissingValidationLayer(
                    missing.to_string_lossy().into_owned(),
                )
                .into());
            }
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let extension_names: Vec<*const c_char> = required.iter().map(|ext| ext.as_ptr()).collect();

        // Chained so instance creation and destruction are also reported
        let mut debug_info = debug_messenger_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);
        if enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&debug_messenger_info(), None) }
                .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        selected: &SelectedDevice,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = selected
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<*const c_char> = selected
            .enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(selected.handle, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// First name in `required` that `available` does not list
fn first_missing<'a, 'b>(
    required: &[&'a CStr],
    available: impl Iterator<Item = &'b CStr>,
) -> Option<&'a CStr> {
    let available: Vec<&[u8]> = available.map(CStr::to_bytes).collect();
    required
        .iter()
        .copied()
        .find(|name| !available.contains(&name.to_bytes()))
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
