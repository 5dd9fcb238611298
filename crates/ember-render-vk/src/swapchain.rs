// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::GpuResource;
use tracing::{debug, info};

use crate::device::LogicalDevice;
use crate::error::{VkError, VkResult};
use crate::handle::HandleSlot;
use crate::surface::{choose_present_mode, choose_surface_format, PresentationSurface};

/// One more than the minimum, capped by the maximum unless it is 0 (unbounded).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// Concurrent across `[graphics, present]` when they differ, exclusive otherwise.
pub fn sharing_mode(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics != present {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

/// The presentable image ring and one color view per image. The images
/// themselves belong to the presentation engine.
pub struct SwapChain<'a> {
    device: &'a LogicalDevice<'a>,
    surface: &'a PresentationSurface<'a>,
    swapchain: HandleSlot<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl<'a> SwapChain<'a> {
    pub fn new(device: &'a LogicalDevice<'a>, surface: &'a PresentationSurface<'a>) -> Self {
        Self {
            device,
            surface,
            swapchain: HandleSlot::empty(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.get()
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// One 2D color view per chain image. Views left over from an earlier
    /// call are released first. On failure the views created so far stay
    /// owned by the chain and go away with `destroy`.
    pub fn create_image_views(&mut self) -> VkResult<()> {
        self.destroy_image_views();
        let device = self.device.ash_device()?;

        for &image in &self.images {
            let ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            // SAFETY: `image` belongs to the live chain created on this device.
            let view = unsafe { device.create_image_view(&ci, None) }
                .map_err(VkError::ImageViewCreation)?;
            self.image_views.push(view);
        }
        debug!("{} swap chain image view(s) created", self.image_views.len());
        Ok(())
    }

    fn destroy_image_views(&mut self) {
        if self.image_views.is_empty() {
            return;
        }
        if let Ok(device) = self.device.ash_device() {
            for view in self.image_views.drain(..) {
                // SAFETY: the view was created on this device and nothing
                // recorded against it can outlive the chain.
                unsafe { device.destroy_image_view(view, None) };
            }
        } else {
            self.image_views.clear();
        }
    }
}

impl GpuResource for SwapChain<'_> {
    type Error = VkError;

    /// (Re)builds the chain from freshly queried surface support. A live
    /// chain is handed over as `old_swapchain` and retired afterwards, along
    /// with its views; call `create_image_views` again after recreation.
    fn create(&mut self) -> VkResult<()> {
        let adapter = self.device.adapter();
        let (graphics, present) = adapter.queue_family_indices()?.resolved()?;
        let loader = self.device.swapchain_loader()?;

        let support = self.surface.swap_chain_support_details(adapter)?;
        let format = choose_surface_format(&support.formats).ok_or(VkError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = self.surface.choose_swap_extent(&support.capabilities);
        let min_image_count = image_count(&support.capabilities);
        let (sharing, families) = sharing_mode(graphics, present);

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface.handle(),
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: support.capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: self.swapchain.get(),
            ..Default::default()
        };

        // SAFETY: surface and device are alive for the borrows held by self.
        let swapchain = unsafe { loader.create_swapchain(&ci, None) }
            .map_err(VkError::SwapChainCreation)?;

        // STRICT ORDER: old views, then the old chain, only once its successor exists.
        self.destroy_image_views();
        self.swapchain.release(|old| {
            // SAFETY: the old chain was retired by the create call above.
            unsafe { loader.destroy_swapchain(old, None) };
            debug!("previous swap chain retired");
        });
        self.swapchain.set(swapchain);
        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;

        // SAFETY: the chain was just created by this loader.
        self.images = unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(VkError::query("swap chain images"))?;

        info!(
            "swap chain created: {}x{} {:?}/{:?} {:?}, {} image(s) ({:?})",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            self.images.len(),
            sharing
        );
        Ok(())
    }

    fn destroy(&mut self) {
        self.destroy_image_views();
        self.images.clear();
        let Ok(loader) = self.device.swapchain_loader() else {
            return;
        };
        self.swapchain.release(|swapchain| {
            // SAFETY: views are gone; images die with the chain.
            unsafe { loader.destroy_swapchain(swapchain, None) };
            debug!("swap chain destroyed");
        });
    }

    fn is_valid(&self) -> bool {
        self.swapchain.is_valid()
    }
}

impl Drop for SwapChain<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn unbounded_max_is_not_a_clamp() {
        assert_eq!(image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn count_is_clamped_to_max() {
        assert_eq!(image_count(&caps(3, 3)), 3);
        assert_eq!(image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn same_family_is_exclusive() {
        let (mode, families) = sharing_mode(1, 1);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());
    }

    #[test]
    fn distinct_families_are_concurrent_in_graphics_present_order() {
        let (mode, families) = sharing_mode(2, 0);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, vec![2, 0]);
    }
}
