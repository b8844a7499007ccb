// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// plus the per-image views and framebuffers that target them.
//
// Everything here is extent-dependent and gets thrown away on rebuild.
// Command buffers and sync objects live in sync.rs and survive rebuilds.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::error::RenderError;
use super::selector::QueueFamilies;
use super::surface::SurfaceSupport;
use super::VulkanDevice;

/// Format we ask for first: 8-bit BGRA, sRGB-encoded
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Prefer BGRA8 sRGB, otherwise whatever the driver lists first.
///
/// Never fails: an empty list (which device selection rules out) yields the
/// preferred format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
        .unwrap_or(PREFERRED_SURFACE_FORMAT)
}

/// Use `preferred` if the surface offers it.
///
/// FIFO (vsync) is guaranteed by every conformant driver, so it is the
/// fallback.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// A fixed `current_extent` wins; `u32::MAX` means the window decides and we
/// clamp its framebuffer size into the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: window_extent.width.max(min.width).min(max.width.max(min.width)),
        height: window_extent.height.max(min.height).min(max.height.max(min.height)),
    }
}

/// One more than the minimum so we never wait on the driver for an image.
/// A `max_image_count` of zero means no upper bound.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

/// How swapchain images are shared between queue families
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    /// Graphics and present live in different families
    Concurrent([u32; 2]),
}

impl ImageSharing {
    pub fn for_families(families: QueueFamilies) -> Self {
        if families.is_unified() {
            Self::Exclusive
        } else {
            Self::Concurrent([families.graphics, families.present])
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(indices) => indices,
        }
    }
}

/// The negotiated parameters of one swapchain build
#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Same format, color space, present mode and extent
    pub fn matches(&self, other: &SwapchainPlan) -> bool {
        self.surface_format.format == other.surface_format.format
            && self.surface_format.color_space == other.surface_format.color_space
            && self.present_mode == other.present_mode
            && self.extent == other.extent
    }

    /// Framebuffers can only be built for the format the render pass targets
    pub fn ensure_format(&self, render_format: vk::Format) -> Result<()> {
        if self.surface_format.format != render_format {
            anyhow::bail!(
                "Surface format changed from {:?} to {:?}",
                render_format,
                self.surface_format.format
            );
        }
        Ok(())
    }

    pub fn negotiate(
        support: &SurfaceSupport,
        families: QueueFamilies,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Self {
        Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(&support.capabilities, window_extent),
            image_count: choose_image_count(&support.capabilities),
            sharing: ImageSharing::for_families(families),
            pre_transform: support.capabilities.current_transform,
        }
    }
}

/// Create one resource per input, all or nothing.
///
/// If any creation fails, everything created so far is handed to `destroy`
/// before the error is returned.
pub fn create_all<T, R>(
    inputs: &[T],
    mut create: impl FnMut(&T) -> Result<R>,
    mut destroy: impl FnMut(R),
) -> Result<Vec<R>> {
    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        match create(input) {
            Ok(resource) => created.push(resource),
            Err(e) => {
                created.into_iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Images with their index-aligned views and framebuffers
#[derive(Debug)]
pub struct ChainTargets<I, V, F> {
    pub images: Vec<I>,
    pub views: Vec<V>,
    pub framebuffers: Vec<F>,
}

impl<I, V, F> ChainTargets<I, V, F> {
    pub fn is_consistent(&self) -> bool {
        self.views.len() == self.images.len() && self.framebuffers.len() == self.images.len()
    }
}

/// Build one view per image, then one framebuffer per view.
///
/// All or nothing: a failed framebuffer destroys the framebuffers made so
/// far and then every view.
pub fn build_targets<I, V, F>(
    images: Vec<I>,
    create_view: impl FnMut(&I) -> Result<V>,
    mut destroy_view: impl FnMut(V),
    create_framebuffer: impl FnMut(&V) -> Result<F>,
    destroy_framebuffer: impl FnMut(F),
) -> Result<ChainTargets<I, V, F>> {
    let views = create_all(&images, create_view, &mut destroy_view)?;

    match create_all(&views, create_framebuffer, destroy_framebuffer) {
        Ok(framebuffers) => Ok(ChainTargets {
            images,
            views,
            framebuffers,
        }),
        Err(e) => {
            views.into_iter().for_each(&mut destroy_view);
            Err(e)
        }
    }
}

/// Application-owned view of the current chain.
///
/// `images`, `image_views` and `framebuffers` are index-aligned and always
/// the same length.
#[derive(Debug, Default)]
pub struct SwapchainState {
    pub plan: Option<SwapchainPlan>,
    /// Owned by the presentation engine, never destroyed directly
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainState {
    pub fn extent(&self) -> vk::Extent2D {
        self.plan.map(|p| p.extent).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.image_views.len() == self.images.len() && self.framebuffers.len() == self.images.len()
    }
}

/// Result of asking the presentation engine for the next image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Usable image; `suboptimal` is advisory only
    Acquired { image_index: u32, suboptimal: bool },
    /// The chain no longer matches the surface and must be rebuilt
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::Presented)
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub state: SwapchainState,
    render_pass: vk::RenderPass,
    render_format: vk::Format,
    preferred_present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Build the chain plus one view and framebuffer per image.
    ///
    /// `render_pass` targets `render_format`; a surface that negotiates any
    /// other format is rejected before the chain is created.
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        render_format: vk::Format,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let (swapchain, state) = Self::build(
            &device,
            &swapchain_loader,
            render_pass,
            render_format,
            window_extent,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            swapchain,
            swapchain_loader,
            state,
            render_pass,
            render_format,
            preferred_present_mode,
            device,
        })
    }

    /// Replace the chain for a new window extent.
    ///
    /// The caller must have idled the device: views and framebuffers are
    /// destroyed immediately.
    pub fn rebuild(&mut self, window_extent: vk::Extent2D) -> Result<()> {
        let previous = self.state.plan;
        self.destroy_targets();

        let old = std::mem::replace(&mut self.swapchain, vk::SwapchainKHR::null());
        let built = Self::build(
            &self.device,
            &self.swapchain_loader,
            self.render_pass,
            self.render_format,
            window_extent,
            self.preferred_present_mode,
            old,
        );

        // Retired either way once its replacement was attempted
        unsafe { self.swapchain_loader.destroy_swapchain(old, None) };

        let (swapchain, state) = built.context("Failed to rebuild swapchain")?;
        if let (Some(before), Some(after)) = (previous, state.plan) {
            if before.matches(&after) {
                log::debug!("Swapchain rebuilt with unchanged parameters");
            }
        }
        self.swapchain = swapchain;
        self.state = state;
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.state.extent()
    }

    fn build(
        device: &VulkanDevice,
        swapchain_loader: &ash::khr::swapchain::Device,
        render_pass: vk::RenderPass,
        render_format: vk::Format,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, SwapchainState)> {
        let support =
            SurfaceSupport::query(&device.surface_loader, device.physical_device, device.surface)?;
        if !support.is_adequate() {
            return Err(RenderError::SurfaceUnsupported.into());
        }

        let plan = SwapchainPlan::negotiate(
            &support,
            device.queue_families,
            window_extent,
            preferred_present_mode,
        );
        plan.ensure_format(render_format)?;

        log::info!(
            "Creating swapchain: {}x{} {:?}/{:?} {:?}, {} images requested",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing.mode())
            .queue_family_indices(plan.sharing.family_indices())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        match Self::create_targets(device, swapchain_loader, swapchain, render_pass, &plan) {
            Ok(state) => {
                debug_assert!(state.is_consistent());
                log::info!("Created swapchain with {} images", state.len());
                Ok((swapchain, state))
            }
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                Err(e)
            }
        }
    }

    fn create_targets(
        device: &VulkanDevice,
        swapchain_loader: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        render_pass: vk::RenderPass,
        plan: &SwapchainPlan,
    ) -> Result<SwapchainState> {
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        let targets = build_targets(
            images,
            |&image| {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(plan.surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&create_info, None) }
                    .context("Failed to create image view")
            },
            |view| unsafe { device.device.destroy_image_view(view, None) },
            |&view| {
                let attachments = [view];
                let create_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(plan.extent.width)
                    .height(plan.extent.height)
                    .layers(1);

                unsafe { device.device.create_framebuffer(&create_info, None) }
                    .context("Failed to create framebuffer")
            },
            |framebuffer| unsafe { device.device.destroy_framebuffer(framebuffer, None) },
        )?;
        debug_assert!(targets.is_consistent());

        Ok(SwapchainState {
            plan: Some(*plan),
            images: targets.images,
            image_views: targets.views,
            framebuffers: targets.framebuffers,
        })
    }

    /// Destroy framebuffers, then views. Images belong to the swapchain.
    fn destroy_targets(&mut self) {
        let state = std::mem::take(&mut self.state);
        unsafe {
            for framebuffer in state.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for view in state.image_views {
                self.device.device.destroy_image_view(view, None);
            }
        }
    }

    /// Acquire next image for rendering, signalling `semaphore` once usable
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen once `wait_semaphores` signal
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_targets();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(
        min_count: u32,
        max_count: u32,
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn support(capabilities: vk::SurfaceCapabilitiesKHR) -> SurfaceSupport {
        SurfaceSupport {
            capabilities,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                PREFERRED_SURFACE_FORMAT,
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    fn is_preferred(format: vk::SurfaceFormatKHR) -> bool {
        format.format == PREFERRED_SURFACE_FORMAT.format
            && format.color_space == PREFERRED_SURFACE_FORMAT.color_space
    }

    const UNIFIED: QueueFamilies = QueueFamilies {
        graphics: 0,
        present: 0,
    };

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
            PREFERRED_SURFACE_FORMAT,
        ];
        assert!(is_preferred(choose_surface_format(&formats)));
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let first = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let second = vk::SurfaceFormatKHR {
            format: vk::Format::A2B10G10R10_UNORM_PACK32,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = choose_surface_format(&[first, second]);
        assert_eq!(chosen.format, first.format);
        assert_eq!(chosen.color_space, first.color_space);
        assert!(is_preferred(choose_surface_format(&[])));
    }

    #[test]
    fn present_mode_prefers_mailbox_when_offered() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_current_extent_is_used_verbatim() {
        let c = caps(2, 0, (1024, 768), (1, 1), (4096, 4096));
        assert_eq!(choose_extent(&c, extent(640, 480)), extent(1024, 768));
    }

    #[test]
    fn window_extent_is_clamped_componentwise() {
        let c = caps(2, 0, (u32::MAX, u32::MAX), (100, 200), (1920, 1080));
        assert_eq!(choose_extent(&c, extent(50, 5000)), extent(100, 1080));
        assert_eq!(choose_extent(&c, extent(4000, 10)), extent(1920, 200));
        assert_eq!(choose_extent(&c, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn chosen_extent_always_within_limits() {
        let limits = [((1, 1), (1, 1)), ((16, 16), (8192, 8192)), ((640, 480), (640, 480))];
        let requests = [0, 1, 15, 480, 640, 800, 8192, u32::MAX - 1];

        for (min, max) in limits {
            let c = caps(2, 0, (u32::MAX, u32::MAX), min, max);
            for &w in &requests {
                for &h in &requests {
                    let e = choose_extent(&c, extent(w, h));
                    assert!(min.0 <= e.width && e.width <= max.0, "{:?} {:?}", c, e);
                    assert!(min.1 <= e.height && e.height <= max.1, "{:?} {:?}", c, e);
                }
            }
        }
    }

    #[test]
    fn image_count_is_min_plus_one_when_unbounded() {
        let c = caps(2, 0, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn image_count_is_clamped_to_max() {
        let c = caps(3, 3, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&c), 3);

        let c = caps(2, 8, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn image_count_saturates_at_u32_max() {
        let c = caps(u32::MAX, 0, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&c), u32::MAX);

        let c = caps(u32::MAX, u32::MAX, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&c), u32::MAX);
    }

    #[test]
    fn sharing_follows_queue_families() {
        assert_eq!(ImageSharing::for_families(UNIFIED), ImageSharing::Exclusive);
        assert_eq!(ImageSharing::Exclusive.mode(), vk::SharingMode::EXCLUSIVE);
        assert!(ImageSharing::Exclusive.family_indices().is_empty());

        let split = ImageSharing::for_families(QueueFamilies {
            graphics: 0,
            present: 1,
        });
        assert_eq!(split.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(split.family_indices(), &[0, 1]);
    }

    #[test]
    fn negotiation_with_same_inputs_is_stable() {
        let s = support(caps(2, 0, (u32::MAX, u32::MAX), (1, 1), (4096, 4096)));
        let first = SwapchainPlan::negotiate(&s, UNIFIED, extent(800, 600), vk::PresentModeKHR::MAILBOX);
        let again = SwapchainPlan::negotiate(&s, UNIFIED, extent(800, 600), vk::PresentModeKHR::MAILBOX);

        assert!(first.matches(&again));
        assert_eq!(first.image_count, again.image_count);
        assert_eq!(first.sharing, again.sharing);
        assert!(is_preferred(first.surface_format));
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(first.extent, extent(800, 600));
        assert_eq!(first.image_count, 3);
    }

    #[test]
    fn plan_must_match_render_pass_format() {
        let s = support(caps(2, 0, (800, 600), (1, 1), (4096, 4096)));
        let plan = SwapchainPlan::negotiate(&s, UNIFIED, extent(800, 600), vk::PresentModeKHR::FIFO);

        assert!(plan.ensure_format(vk::Format::B8G8R8A8_SRGB).is_ok());

        let err = plan.ensure_format(vk::Format::R8G8B8A8_UNORM).unwrap_err();
        assert!(err.to_string().contains("R8G8B8A8_UNORM"));
    }

    #[test]
    fn create_all_keeps_everything_on_success() {
        let mut destroyed = Vec::new();
        let made = create_all(&[1, 2, 3], |&x| Ok(x * 10), |r| destroyed.push(r)).unwrap();
        assert_eq!(made, vec![10, 20, 30]);
        assert!(destroyed.is_empty());
    }

    #[test]
    fn create_all_rolls_back_on_failure() {
        let mut destroyed = Vec::new();
        let result = create_all(
            &[1, 2, 3, 4],
            |&x| {
                if x == 3 {
                    anyhow::bail!("creation {} failed", x)
                }
                Ok(x * 10)
            },
            |r| destroyed.push(r),
        );

        assert!(result.is_err());
        assert_eq!(destroyed, vec![10, 20]);
    }

    #[test]
    fn default_state_is_empty_and_consistent() {
        let state = SwapchainState::default();
        assert!(state.is_consistent());
        assert_eq!(state.len(), 0);
        assert_eq!(state.extent(), extent(0, 0));
    }

    #[test]
    fn targets_are_index_aligned() {
        let targets = build_targets(
            vec![1u64, 2, 3],
            |&image| Ok(image * 10),
            |_| panic!("no view should be destroyed"),
            |&view| Ok(view + 1),
            |_| panic!("no framebuffer should be destroyed"),
        )
        .unwrap();

        assert!(targets.is_consistent());
        assert_eq!(targets.images, vec![1, 2, 3]);
        assert_eq!(targets.views, vec![10, 20, 30]);
        assert_eq!(targets.framebuffers, vec![11, 21, 31]);
    }

    #[test]
    fn framebuffer_failure_destroys_framebuffers_then_views() {
        let mut destroyed_views = Vec::new();
        let mut destroyed_framebuffers = Vec::new();

        let result = build_targets(
            vec![1u64, 2, 3, 4],
            |&image| Ok(image * 10),
            |view| destroyed_views.push(view),
            |&view| {
                if view == 30 {
                    anyhow::bail!("framebuffer for view {} failed", view)
                }
                Ok(view + 1)
            },
            |framebuffer| destroyed_framebuffers.push(framebuffer),
        );

        assert!(result.is_err());
        assert_eq!(destroyed_framebuffers, vec![11, 21]);
        assert_eq!(destroyed_views, vec![10, 20, 30, 40]);
    }

    #[test]
    fn view_failure_destroys_earlier_views_only() {
        let mut destroyed_views = Vec::new();
        let mut framebuffers_made = 0;

        let result = build_targets(
            vec![1u64, 2, 3],
            |&image| {
                if image == 2 {
                    anyhow::bail!("view for image {} failed", image)
                }
                Ok(image * 10)
            },
            |view| destroyed_views.push(view),
            |&view| {
                framebuffers_made += 1;
                Ok(view + 1)
            },
            |_: u64| {},
        );

        assert!(result.is_err());
        assert_eq!(destroyed_views, vec![10]);
        assert_eq!(framebuffers_made, 0);
    }

    #[test]
    fn present_outcome_staleness() {
        assert!(!PresentOutcome::Presented.is_stale());
        assert!(PresentOutcome::Suboptimal.is_stale());
        assert!(PresentOutcome::OutOfDate.is_stale());
    }
}
