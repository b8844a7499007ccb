// Backend module - Vulkan objects and the policies that configure them
//
// Each type owns its handles and destroys them on Drop. Selection and
// negotiation logic is kept in plain functions over `vk` structs.

pub mod commands;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
