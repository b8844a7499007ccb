// Backend failure kinds
//
// Everything else travels as anyhow context; these are the setup failures
// a caller or test needs to tell apart.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The instance enumerated zero physical devices
    #[error("No GPU with Vulkan support found")]
    NoVulkanDevice,

    /// Devices exist but none has graphics+present queues, the required
    /// extensions and a usable surface format/present mode
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("Validation layer requested but not available: {0}")]
    MissingValidationLayer(String),

    #[error("Required instance extension not available: {0}")]
    MissingInstanceExtension(String),

    #[error("Selected GPU reports no formats or present modes for this surface")]
    SurfaceUnsupported,
}
