// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use ember_render::{GpuResource, RenderSize};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::context::Context;
use crate::error::{VkError, VkResult};
use crate::handle::HandleSlot;

/// Everything the (adapter, surface) pair supports. Always queried fresh:
/// capabilities change when the window does.
#[derive(Debug, Clone, Default)]
pub struct SwapChainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// BGRA8 + sRGB non-linear when offered, else whatever the driver lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX if offered, otherwise FIFO (always available).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_swap_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    framebuffer: RenderSize,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    // The surface lets the swap chain decide; fit the window into the limits.
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: framebuffer.width.max(min.width).min(max.width),
        height: framebuffer.height.max(min.height).min(max.height),
    }
}

/// The presentation target bound to the context's window.
pub struct PresentationSurface<'a> {
    context: &'a Context,
    loader: surface::Instance,
    surface: HandleSlot<vk::SurfaceKHR>,
}

impl<'a> PresentationSurface<'a> {
    pub fn new(context: &'a Context) -> Self {
        let loader = surface::Instance::new(context.ash_entry(), context.ash_instance());
        Self {
            context,
            loader,
            surface: HandleSlot::empty(),
        }
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface.get()
    }

    fn live(&self) -> VkResult<vk::SurfaceKHR> {
        if self.surface.is_valid() {
            Ok(self.surface.get())
        } else {
            Err(VkError::NotCreated("surface"))
        }
    }

    pub fn supports_present(&self, physical: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        let surface = self.live()?;
        // SAFETY: both handles come from the same live instance.
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical, family, surface)
        }
        .map_err(VkError::query("surface support"))
    }

    pub fn capabilities(&self, adapter: &Adapter<'_>) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let surface = self.live()?;
        // SAFETY: as in supports_present.
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(adapter.handle(), surface)
        }
        .map_err(VkError::query("surface capabilities"))
    }

    pub fn formats(&self, adapter: &Adapter<'_>) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let surface = self.live()?;
        // SAFETY: as in supports_present.
        unsafe {
            self.loader
                .get_physical_device_surface_formats(adapter.handle(), surface)
        }
        .map_err(VkError::query("surface formats"))
    }

    pub fn present_modes(&self, adapter: &Adapter<'_>) -> VkResult<Vec<vk::PresentModeKHR>> {
        let surface = self.live()?;
        // SAFETY: as in supports_present.
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(adapter.handle(), surface)
        }
        .map_err(VkError::query("surface present modes"))
    }

    pub fn swap_chain_support_details(
        &self,
        adapter: &Adapter<'_>,
    ) -> VkResult<SwapChainSupportDetails> {
        Ok(SwapChainSupportDetails {
            capabilities: self.capabilities(adapter)?,
            formats: self.formats(adapter)?,
            present_modes: self.present_modes(adapter)?,
        })
    }

    /// Extent for the context's window under `caps`.
    pub fn choose_swap_extent(&self, caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
        choose_swap_extent(caps, self.context.framebuffer_size())
    }
}

impl GpuResource for PresentationSurface<'_> {
    type Error = VkError;

    fn create(&mut self) -> VkResult<()> {
        if self.surface.is_valid() {
            return Ok(());
        }
        let window = self.context.window()?;
        let display = window
            .display_handle()
            .map_err(|_| VkError::SurfaceCreation(vk::Result::ERROR_INITIALIZATION_FAILED))?;
        let handle = window
            .window_handle()
            .map_err(|_| VkError::SurfaceCreation(vk::Result::ERROR_INITIALIZATION_FAILED))?;

        // SAFETY: the window outlives the surface because both are owned
        // by the context this surface borrows.
        let surface = unsafe {
            ash_window::create_surface(
                self.context.ash_entry(),
                self.context.ash_instance(),
                display.as_raw(),
                handle.as_raw(),
                None,
            )
        }
        .map_err(VkError::SurfaceCreation)?;

        self.surface.set(surface);
        info!("presentation surface created for '{}'", window.title());
        Ok(())
    }

    fn destroy(&mut self) {
        let loader = &self.loader;
        self.surface.release(|surface| {
            // SAFETY: every swap chain on this surface borrows it and is gone.
            unsafe { loader.destroy_surface(surface, None) };
            debug!("presentation surface destroyed");
        });
    }

    fn is_valid(&self) -> bool {
        self.surface.is_valid()
    }
}

impl Drop for PresentationSurface<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn client_decides(min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
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

    #[test]
    fn preferred_format_wins_wherever_it_is_listed() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[1]));
    }

    #[test]
    fn format_falls_back_to_first_listed() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn no_formats_means_none() {
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_is_preferred() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn reported_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_swap_extent(&caps, RenderSize::new(1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn oversized_framebuffer_clamps_to_max() {
        let caps = client_decides((64, 64), (4096, 4096));
        let extent = choose_swap_extent(&caps, RenderSize::new(5000, 5000));
        assert_eq!((extent.width, extent.height), (4096, 4096));
    }

    #[test]
    fn undersized_framebuffer_clamps_to_min() {
        let caps = client_decides((64, 64), (4096, 4096));
        let extent = choose_swap_extent(&caps, RenderSize::new(10, 10));
        assert_eq!((extent.width, extent.height), (64, 64));
    }

    #[test]
    fn clamping_is_componentwise() {
        let caps = client_decides((64, 64), (4096, 4096));
        let extent = choose_swap_extent(&caps, RenderSize::new(10, 5000));
        assert_eq!((extent.width, extent.height), (64, 4096));
    }
}
