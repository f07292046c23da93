// =============================================================================
// INFERNO - window harness
// =============================================================================
//
// Opens a winit window and drives the Backend:
//
//   acquire -> record clear pass -> submit -> present
//
// Resizes and out-of-date swapchains are handled by the Backend; this file
// only forwards window events to it.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use inferno::{logging, Backend, Config};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

fn main() -> Result<()> {
    let config = Config::load();
    logging::init(&config.debug)?;

    log::info!("Starting Inferno");
    log::info!(
        "Window: {}x{}, vsync: {}",
        config.window.width,
        config.window.height,
        config.graphics.vsync
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Harness state. `backend` is declared before `window` so it drops first.
struct App {
    config: Config,
    backend: Option<Backend>,
    window: Option<Arc<Window>>,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            backend: None,
            window: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_backend(&mut self, window: &Window) -> Result<Backend> {
        let size = window.inner_size();
        let enable_validation = self.config.debug.validation_layers;

        Backend::new(
            &self.config.window.title,
            window.raw_display_handle(),
            window.raw_window_handle(),
            size.width,
            size.height,
            &self.config.graphics,
            enable_validation,
        )
        .context("Failed to initialize Vulkan backend")
    }

    /// Returns false when the frame was skipped
    fn render_frame(&mut self) -> Result<bool> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(false);
        };

        if !backend.acquire_next_swap_chain_image()? {
            return Ok(false);
        }

        let cmd = backend.current_command_buffer().clone();
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record_clear(backend, cmd.handle, self.config.graphics.clear_color)?;
        cmd.end()?;

        backend.submit_graphics(&[cmd.handle])?;
        backend.present()?;

        Ok(true)
    }

    fn update_fps(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        let fps = self.frame_count as f32 / elapsed;
        if let Some(window) = &self.window {
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.config.window.title,
                fps,
                frame_time * 1000.0
            ));
        }

        self.frame_count = 0;
        self.last_fps_update = now;
    }
}

fn record_clear(backend: &Backend, cmd: vk::CommandBuffer, color: [f32; 4]) -> Result<()> {
    let framebuffer = backend
        .swapchain_framebuffer()
        .context("No framebuffer for the acquired image")?;
    let extent = backend.swapchain_extent().context("No swapchain")?;

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let begin_info = vk::RenderPassBeginInfo::builder()
        .render_pass(backend.swapchain_render_pass().handle)
        .framebuffer(framebuffer.handle)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(&clear_values);

    let device = &backend.device().device;
    unsafe {
        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        device.cmd_end_render_pass(cmd);
    }
    Ok(())
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_backend(&window) {
            Ok(backend) => self.backend = Some(backend),
            Err(e) => {
                log::error!("{:#}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.backend = None;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(backend) = self.backend.as_mut() {
                    backend.request_recreate(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:#}", e);
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.backend = None;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
