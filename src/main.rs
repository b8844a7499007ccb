// =============================================================================
// TRI-PRESENT - Minimal Vulkan render loop
// =============================================================================
//
// Opens a window and draws one hard-coded triangle every frame, with up to
// N frames in flight and swapchain rebuilds on resize.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, window, resize latch)                   │
// │    └── FrameScheduler (which step runs when)                    │
// │          └── Renderer (FrameBackend over Vulkan)                │
// │                ├── VulkanDevice (instance, surface, queues)     │
// │                ├── TrianglePipeline (render pass, pipeline)     │
// │                ├── Swapchain (images, views, framebuffers)      │
// │                └── FrameSlots (command buffers, sync objects)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the slot's fence
// 2. Acquire swapchain image
// 3. Reset and record the slot's command buffer
// 4. Submit to the graphics queue
// 5. Present, rebuilding the swapchain if stale or resized
// 6. Advance to the next slot
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod renderer;

use anyhow::{Context, Result};
use config::Config;
use frame::{FrameScheduler, FrameStats, ResizeLatch};
use renderer::{is_minimized, window_extent, Renderer};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    init_logging();

    // Load configuration from config.toml
    let config = Config::load();

    log::info!("Starting tri-present");
    log::info!(
        "Window: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.graphics.max_frames_in_flight
    );

    run(config)
}

/// Run the event loop until the window closes or a frame fails
fn run(config: Config) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop terminated abnormally")?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            log::info!(
                "Exited cleanly after {} swapchain rebuilds",
                app.scheduler.rebuilds()
            );
            Ok(())
        }
    }
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    // RUST_LOG still overrides the default level
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

pub struct App {
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    /// Dropped before the window, which it also holds
    renderer: Option<Renderer>,
    scheduler: FrameScheduler,
    resize: Arc<ResizeLatch>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATS & ERRORS
    // ─────────────────────────────────────────────────────────────────────────
    stats: FrameStats,
    /// First unrecoverable error; returned from `run`
    fatal: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let resize = Arc::new(ResizeLatch::default());
        Self {
            scheduler: FrameScheduler::new(config.graphics.max_frames_in_flight, resize.clone()),
            resize,
            renderer: None,
            window: None,
            stats: FrameStats::new(Instant::now()),
            fatal: None,
            config,
        }
    }

    fn init_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let renderer = Renderer::new(&self.config, window.clone(), self.resize.clone())
            .context("Failed to initialize Vulkan")?;
        log::info!("Rendering with {} frames in flight", renderer.frames_in_flight());

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Draw one frame unless the window has no area
    fn redraw(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        if is_minimized(window_extent(renderer.window().inner_size())) {
            return Ok(());
        }

        self.scheduler.draw_frame(renderer)?;

        if self.config.debug.show_fps {
            self.update_fps();
        }
        Ok(())
    }

    fn update_fps(&mut self) {
        let Some(report) = self.stats.frame_presented(Instant::now()) else {
            return;
        };

        if let Some(ref window) = self.window {
            window.set_title(&format!(
                "{} | FPS: {:.0} | {:.2}ms",
                self.config.window.title, report.fps, report.frame_time_ms
            ));
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// WINIT EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init_renderer(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resize.notify();
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e.context("Frame failed"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // GPU teardown while the window and its surface still exist
        self.renderer = None;
        self.window = None;
    }
}
