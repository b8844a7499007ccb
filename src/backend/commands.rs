// Command recording
//
// The whole frame is one render pass and one draw. Recorded fresh every
// frame into the current slot's command buffer.

use anyhow::{Context, Result};
use ash::vk;

/// Everything one recording needs besides the command buffer itself
#[derive(Clone, Copy, Debug)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// Viewport covering the full extent, depth 0..1
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Record clear + triangle into `command_buffer`.
///
/// The buffer must already be reset.
pub fn record_draw(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    target: &DrawTarget,
    clear_color: [f32; 4],
    vertex_count: u32,
) -> Result<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];

    let begin_info = vk::CommandBufferBeginInfo::default();
    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(full_scissor(target.extent))
        .clear_values(&clear_values);

    unsafe {
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .context("Failed to begin recording command buffer")?;

        device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, target.pipeline);

        // Dynamic state, so the pipeline survives swapchain rebuilds
        device.cmd_set_viewport(command_buffer, 0, &[full_viewport(target.extent)]);
        device.cmd_set_scissor(command_buffer, 0, &[full_scissor(target.extent)]);

        device.cmd_draw(command_buffer, vertex_count, 1, 0, 0);

        device.cmd_end_render_pass(command_buffer);

        device
            .end_command_buffer(command_buffer)
            .context("Failed to record command buffer")?;
    }

    Ok(())
}
