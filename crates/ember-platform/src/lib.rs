// SPDX-License-Identifier: CEPL-1.0
//! Windowing system glue. The rest of the workspace only sees winit
//! through this crate.

pub use winit;

use ember_render::{PresentTarget, RenderSize};
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use thiserror::Error;
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoop;
use winit::window::Window;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("windowing system failed to initialize: {0}")]
    Init(#[from] winit::error::EventLoopError),
    #[error("window creation failed: {0}")]
    Window(#[from] winit::error::OsError),
}

/// The windowing subsystem. winit allows one event loop per process, so
/// at most one `Platform` can ever be initialized.
pub struct Platform {
    event_loop: EventLoop<()>,
}

impl Platform {
    pub fn init() -> Result<Self, PlatformError> {
        let event_loop = EventLoop::new()?;
        info!("windowing system initialized");
        Ok(Self { event_loop })
    }

    /// Opens a fixed-size window with no client API attached.
    pub fn create_window(
        &self,
        width: u32,
        height: u32,
        title: &str,
    ) -> Result<PlatformWindow, PlatformError> {
        let attributes = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(false);

        // Windows are created up front, before any event loop runs.
        #[allow(deprecated)]
        let window = self.event_loop.create_window(attributes)?;

        info!("window '{}' opened ({}x{})", title, width, height);
        Ok(PlatformWindow { window })
    }

    pub fn terminate(self) {
        drop(self.event_loop);
        info!("windowing system terminated");
    }
}

pub struct PlatformWindow {
    window: Window,
}

impl PlatformWindow {
    pub fn destroy(self) {
        let id = self.window.id();
        drop(self.window);
        debug!("window {:?} destroyed", id);
    }

    pub fn title(&self) -> String {
        self.window.title()
    }
}

impl PresentTarget for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}
