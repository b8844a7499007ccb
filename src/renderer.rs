// =============================================================================
// RENDERER - Vulkan side of the frame loop
// =============================================================================
//
// Owns every GPU object the triangle needs and implements `FrameBackend` on
// top of them. The scheduler decides *when* each step runs; this module only
// knows *how*.
//
// OWNERSHIP (dropped top to bottom):
//   frames     - command pool, per-slot semaphores and fences
//   swapchain  - chain, image views, framebuffers
//   pipeline   - render pass, layout, pipeline
//   device     - logical device, surface, instance (shared via Arc)
//   window     - must outlive the surface

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Duration;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::commands::{self, DrawTarget};
use crate::backend::pipeline::TrianglePipeline;
use crate::backend::swapchain::choose_surface_format;
use crate::backend::sync::FrameSlots;
use crate::backend::{AcquireOutcome, PresentOutcome, Swapchain, VulkanDevice};
use crate::config::{Config, TRIANGLE_VERTEX_COUNT};
use crate::frame::{FrameBackend, RebuildOutcome, ResizeLatch};

/// Framebuffer size as a Vulkan extent
pub fn window_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// A zero-area window has nothing to present to
pub fn is_minimized(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub struct Renderer {
    frames: FrameSlots,
    swapchain: Swapchain,
    pipeline: TrianglePipeline,
    device: Arc<VulkanDevice>,
    window: Arc<Window>,
    resize: Arc<ResizeLatch>,
    clear_color: [f32; 4],
    fence_warn: Option<Duration>,
}

impl Renderer {
    pub fn new(config: &Config, window: Arc<Window>, resize: Arc<ResizeLatch>) -> Result<Self> {
        log::info!("Initializing Vulkan renderer...");

        let device = VulkanDevice::new(&config.window.title, config.validation_enabled(), window.as_ref())?;

        // The render pass is fixed to the format the surface offered at selection
        let surface_format = choose_surface_format(&device.surface_support.formats);

        let pipeline = TrianglePipeline::new(
            device.clone(),
            surface_format.format,
            &config.vertex_shader_path(),
            &config.fragment_shader_path(),
        )
        .context("Failed to create triangle pipeline")?;

        let swapchain = Swapchain::new(
            device.clone(),
            pipeline.render_pass,
            pipeline.format,
            window_extent(window.inner_size()),
            config.preferred_present_mode(),
        )?;

        let frames = FrameSlots::new(device.clone(), config.graphics.max_frames_in_flight)?;

        log::info!("Renderer ready");

        Ok(Self {
            frames,
            swapchain,
            pipeline,
            device,
            window,
            resize,
            clear_color: config.graphics.clear_color,
            fence_warn: config.fence_warn_timeout(),
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl FrameBackend for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frames.wait(slot, self.fence_warn)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.frames.get(slot).image_available)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.frames.reset(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let framebuffer = self
            .swapchain
            .state
            .framebuffers
            .get(image_index as usize)
            .copied()
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))?;

        let target = DrawTarget {
            render_pass: self.pipeline.render_pass,
            pipeline: self.pipeline.pipeline,
            framebuffer,
            extent: self.swapchain.extent(),
        };

        commands::record_draw(
            &self.device.device,
            self.frames.get(slot).command_buffer,
            &target,
            self.clear_color,
            TRIANGLE_VERTEX_COUNT,
        )
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.frames.get(slot);

        // Color output waits for the presentation engine to release the image
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                frame.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let wait_semaphores = [self.frames.get(slot).render_finished];
        self.swapchain
            .present(self.device.present_queue, image_index, &wait_semaphores)
    }

    fn rebuild_swapchain(&mut self) -> Result<RebuildOutcome> {
        self.device.wait_idle()?;

        let extent = window_extent(self.window.inner_size());
        if is_minimized(extent) {
            // Keep the request alive until there is something to build for
            log::debug!("Window minimized, deferring swapchain rebuild");
            self.resize.notify();
            return Ok(RebuildOutcome::Deferred);
        }

        self.swapchain.rebuild(extent)?;

        log::info!(
            "Swapchain rebuilt at {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(RebuildOutcome::Rebuilt)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");
        // Nothing below may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to idle device before teardown: {:#}", e);
        }
    }
}
