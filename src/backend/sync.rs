// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, bundled with the command
// buffer they guard. One bundle per frame in flight.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::VulkanDevice;

/// Frame slot - one per frame in flight
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    /// Signalled by acquire, waited on by the submit
    pub image_available: vk::Semaphore,
    /// Signalled by the submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// CPU-visible completion of this slot's last submit
    pub in_flight_fence: vk::Fence,
}

impl FrameSlot {
    fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on a fresh slot returns at once
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e).context("Failed to create render-finished semaphore");
                }
            };
            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e).context("Failed to create in-flight fence");
                }
            };

            Ok(Self {
                command_buffer,
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// All frame slots plus the pool their command buffers come from.
///
/// Created once after device creation; independent of the swapchain.
pub struct FrameSlots {
    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    device: Arc<VulkanDevice>,
}

impl FrameSlots {
    pub fn new(device: Arc<VulkanDevice>, count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            // RESET: each slot re-records its own buffer every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        // From here on Drop cleans up whatever made it into `slots`
        let mut frame_slots = Self {
            command_pool,
            slots: Vec::with_capacity(count),
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let command_buffers =
            unsafe { frame_slots.device.device.allocate_command_buffers(&alloc_info) }
                .context("Failed to allocate command buffers")?;

        for command_buffer in command_buffers {
            let slot = FrameSlot::new(&frame_slots.device.device, command_buffer)?;
            frame_slots.slots.push(slot);
        }

        log::info!("Created {} frame slots", count);
        Ok(frame_slots)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Block until the slot's last submit has finished.
    ///
    /// Unbounded. With `warn_after` set, a wait that runs past it is logged
    /// and then continued.
    pub fn wait(&self, index: usize, warn_after: Option<Duration>) -> Result<()> {
        let fence = [self.slots[index].in_flight_fence];
        let device = &self.device.device;

        let Some(warn_after) = warn_after else {
            unsafe { device.wait_for_fences(&fence, true, u64::MAX) }
                .context("Failed to wait for in-flight fence")?;
            return Ok(());
        };

        let started = Instant::now();
        let timeout = u64::try_from(warn_after.as_nanos()).unwrap_or(u64::MAX);
        loop {
            match unsafe { device.wait_for_fences(&fence, true, timeout) } {
                Ok(()) => return Ok(()),
                Err(vk::Result::TIMEOUT) => {
                    log::warn!(
                        "Frame slot {} still busy after {:.1?}, waiting on",
                        index,
                        started.elapsed()
                    );
                }
                Err(e) => return Err(e).context("Failed to wait for in-flight fence"),
            }
        }
    }

    /// Unsignal the fence and clear the command buffer for re-recording
    pub fn reset(&self, index: usize) -> Result<()> {
        let slot = &self.slots[index];
        unsafe {
            self.device
                .device
                .reset_fences(&[slot.in_flight_fence])
                .context("Failed to reset in-flight fence")?;
            self.device
                .device
                .reset_command_buffer(slot.command_buffer, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
        }
        Ok(())
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.destroy(&self.device.device);
        }
        // Also frees the command buffers
        unsafe {
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
