// Physical device selection
//
// Walks the GPUs the instance exposes and takes the first one that can both
// draw and present to our surface. First-fit in enumeration order; there is
// deliberately no scoring.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::{CStr, CString};

use super::error::RenderError;
use super::surface::SurfaceSupport;

/// Queue family roles as discovered while scanning a device.
///
/// A role is either unassigned (`None`) or assigned to a family index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.resolve().is_some()
    }

    /// Both roles assigned, or nothing
    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Fully assigned queue family roles of the chosen device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Graphics and present run on the same family
    #[inline]
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_unified() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Records the first graphics-capable family and the first family that can
/// present, which may be the same one. Stops scanning once both are known.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }
        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Everything we learned about one GPU while deciding whether to use it
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<CString>,
    /// Only queried once the extension check passed
    pub surface: Option<SurfaceSupport>,
}

impl PhysicalDeviceCandidate {
    pub fn missing_extensions<'a>(&self, required: &[&'a CStr]) -> Vec<&'a CStr> {
        required
            .iter()
            .copied()
            .filter(|req| !self.extensions.iter().any(|ext| ext.as_c_str() == *req))
            .collect()
    }

    pub fn is_suitable(&self, required: &[&CStr]) -> bool {
        self.queue_families.is_complete()
            && self.missing_extensions(required).is_empty()
            && self.surface.as_ref().is_some_and(SurfaceSupport::is_adequate)
    }
}

/// The winning GPU. Its queue roles and extension list hold for the life of
/// the process.
#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilies,
    /// The required extensions, to be enabled on the logical device
    pub enabled_extensions: Vec<CString>,
    pub surface: SurfaceSupport,
}

/// Take the first suitable candidate, in order.
///
/// Candidates are pulled lazily, so probing stops at the winner. An empty
/// sequence means the driver exposed no GPU at all, which is reported
/// separately from "none of them fit".
pub fn first_suitable<I>(candidates: I, required: &[&CStr]) -> Result<SelectedDevice>
where
    I: IntoIterator<Item = Result<PhysicalDeviceCandidate>>,
{
    let mut seen = 0usize;

    for candidate in candidates {
        let candidate = candidate?;
        seen += 1;

        if !candidate.is_suitable(required) {
            log_rejection(&candidate, required);
            continue;
        }

        let (Some(queue_families), Some(surface)) =
            (candidate.queue_families.resolve(), candidate.surface)
        else {
            continue;
        };

        return Ok(SelectedDevice {
            handle: candidate.handle,
            name: candidate.name,
            queue_families,
            enabled_extensions: required.iter().map(|&ext| ext.to_owned()).collect(),
            surface,
        });
    }

    if seen == 0 {
        Err(RenderError::NoVulkanDevice.into())
    } else {
        Err(RenderError::NoSuitableGpu.into())
    }
}

fn log_rejection(candidate: &PhysicalDeviceCandidate, required: &[&CStr]) {
    let missing = candidate.missing_extensions(required);
    if !candidate.queue_families.is_complete() {
        log::info!(
            "Skipping GPU '{}': missing queue roles {:?}",
            candidate.name,
            candidate.queue_families
        );
    } else if !missing.is_empty() {
        log::info!("Skipping GPU '{}': missing extensions {:?}", candidate.name, missing);
    } else {
        log::info!("Skipping GPU '{}': no usable surface format or present mode", candidate.name);
    }
}

/// Enumerate the instance's GPUs and pick one for `surface`
pub fn select_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    required: &[&CStr],
) -> Result<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    log::debug!("Found {} physical device(s)", devices.len());

    first_suitable(
        devices
            .into_iter()
            .map(|device| probe(instance, surface_loader, surface, device, required)),
        required,
    )
}

fn probe(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
    required: &[&CStr],
) -> Result<PhysicalDeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown Device".to_string());

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = find_queue_families(&families, |index| {
        unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) }
            .context("Failed to query present support")
    })?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
        .context("Failed to enumerate device extensions")?
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    let mut candidate = PhysicalDeviceCandidate {
        handle: device,
        name,
        queue_families,
        extensions,
        surface: None,
    };

    if candidate.missing_extensions(required).is_empty() {
        candidate.surface = Some(SurfaceSupport::query(surface_loader, device, surface)?);
    }

    Ok(candidate)
}
