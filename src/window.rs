//! Window management using winit

use crate::backend::{BackendError, GraphicsDevice, WgpuDevice};
use crate::command::CommandList;
use crate::error::PipelineResult;
use crate::frame::FrameLoop;
use crate::pool::Pool;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Window settings for [`run`]
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Reactive Pipelines".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
        }
    }
}

impl WindowConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, config: &WindowConfig) -> PipelineResult<Self> {
        let window = WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(event_loop)
            .map_err(|e| BackendError::SurfaceCreationFailed(format!("window: {}", e)))?;

        let size = window.inner_size();
        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
        })
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Take the resize flag, clearing it
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Open a window, build a [`FrameLoop`] with `setup` and drive it until the
/// window closes
///
/// Resizes are forwarded to the device before the next frame. Frame errors
/// are logged; a lost surface is reconfigured at the current size.
pub fn run<F>(config: WindowConfig, setup: F) -> PipelineResult<()>
where
    F: FnOnce(Arc<dyn GraphicsDevice>, Arc<Pool<CommandList>>) -> PipelineResult<FrameLoop>,
{
    let event_loop = EventLoop::new()
        .map_err(|e| BackendError::InitializationFailed(format!("event loop: {}", e)))?;
    let mut window = Window::new(&event_loop, &config)?;

    let (width, height) = window.dimensions();
    let device: Arc<dyn GraphicsDevice> =
        Arc::new(WgpuDevice::new(window.window_arc(), width, height, config.vsync)?);
    log::info!("Opened '{}' ({}x{}) on {}", config.title, width, height, device.name());

    let pool = Arc::new(Pool::<CommandList>::for_command_lists(device.clone()));
    let mut frames = setup(device, pool)?;

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    window.handle_event(&event);

                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::RedrawRequested => {
                            if window.take_resized() {
                                let (width, height) = window.dimensions();
                                frames.resize(width, height);
                            }
                            match frames.frame() {
                                Ok(()) => {}
                                Err(crate::PipelineError::Backend(BackendError::SurfaceLost)) => {
                                    log::warn!("Surface lost, reconfiguring");
                                    let (width, height) = window.dimensions();
                                    frames.resize(width, height);
                                }
                                Err(e) => log::error!("Frame {} failed: {}", frames.frame_count(), e),
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    if !window.should_close() {
                        window.request_redraw();
                    }
                }
                Event::LoopExiting => {
                    log::info!("Closing after {} frames", frames.frame_count());
                }
                _ => {}
            }
        })
        .map_err(|e| BackendError::InitializationFailed(format!("event loop: {}", e)))?;

    Ok(())
}
