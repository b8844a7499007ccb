// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. Blobs are compiled by build.rs
// and loaded from disk by name at pipeline build time.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Decode a SPIR-V blob into aligned words, checking the magic number
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V bytecode")
}

/// A shader module destroyed when dropped
pub struct ShaderModule<'a> {
    pub handle: vk::ShaderModule,
    device: &'a VulkanDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn load(device: &'a VulkanDevice, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {:?}", path))?;
        Self::from_bytes(device, &bytes).with_context(|| format!("Failed to load shader {:?}", path))
    }

    pub fn from_bytes(device: &'a VulkanDevice, bytes: &[u8]) -> Result<Self> {
        let code = decode_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let handle = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self { handle, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.handle, None) };
    }
}
