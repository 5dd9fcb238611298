// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeSet;
use std::ffi::c_char;

use ash::khr::swapchain;
use ash::vk;
use ember_render::GpuResource;
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::context::Context;
use crate::error::{VkError, VkResult};

const QUEUE_PRIORITY: [f32; 1] = [1.0];

/// One entry per distinct family, ascending.
pub fn unique_queue_families(graphics: u32, present: u32) -> Vec<u32> {
    BTreeSet::from([graphics, present]).into_iter().collect()
}

/// An opened connection to one adapter plus its graphics and present queues.
pub struct LogicalDevice<'a> {
    adapter: &'a Adapter<'a>,
    device: Option<ash::Device>,
    swapchain_loader: Option<swapchain::Device>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl<'a> LogicalDevice<'a> {
    pub fn new(adapter: &'a Adapter<'a>) -> Self {
        Self {
            adapter,
            device: None,
            swapchain_loader: None,
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
        }
    }

    pub fn adapter(&self) -> &'a Adapter<'a> {
        self.adapter
    }

    pub fn context(&self) -> &'a Context {
        self.adapter.context()
    }

    pub fn ash_device(&self) -> VkResult<&ash::Device> {
        self.device.as_ref().ok_or(VkError::NotCreated("logical device"))
    }

    pub(crate) fn swapchain_loader(&self) -> VkResult<&swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or(VkError::NotCreated("logical device"))
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }
}

impl GpuResource for LogicalDevice<'_> {
    type Error = VkError;

    fn create(&mut self) -> VkResult<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let (graphics, present) = self.adapter.queue_family_indices()?.resolved()?;
        let context = self.adapter.context();

        let families = unique_queue_families(graphics, present);
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: QUEUE_PRIORITY.as_ptr(),
                ..Default::default()
            })
            .collect();

        let extension_ptrs: Vec<*const c_char> = context
            .device_extensions()
            .iter()
            .map(|n| n.as_ptr())
            .collect();
        // Device layers are ignored by current loaders but older ones still read them.
        let layer_ptrs: Vec<*const c_char> = if cfg!(debug_assertions) {
            context.enabled_layers().iter().map(|n| n.as_ptr()).collect()
        } else {
            Vec::new()
        };
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: extension_ptrs.len() as u32,
            pp_enabled_extension_names: extension_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let instance = context.ash_instance();
        // SAFETY: the adapter was enumerated from this instance and every
        // pointer in create_info refers to locals that outlive the call.
        let device = unsafe { instance.create_device(self.adapter.handle(), &create_info, None) }
            .map_err(VkError::DeviceCreation)?;

        // SAFETY: both families were requested above with one queue each.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics, 0),
                device.get_device_queue(present, 0),
            )
        };
        if graphics_queue == vk::Queue::null() || present_queue == vk::Queue::null() {
            // SAFETY: nothing has been created from this device yet.
            unsafe { device.destroy_device(None) };
            return Err(VkError::QueueRetrieval {
                graphics_null: graphics_queue == vk::Queue::null(),
                present_null: present_queue == vk::Queue::null(),
            });
        }

        self.swapchain_loader = Some(swapchain::Device::new(instance, &device));
        self.device = Some(device);
        self.graphics_queue = graphics_queue;
        self.present_queue = present_queue;
        info!(
            "logical device created on '{}' (families {:?})",
            self.adapter.name(),
            families
        );
        Ok(())
    }

    fn destroy(&mut self) {
        self.swapchain_loader = None;
        self.graphics_queue = vk::Queue::null();
        self.present_queue = vk::Queue::null();
        if let Some(device) = self.device.take() {
            // SAFETY: swap chains, shaders and pipelines borrow this device,
            // so none of them can still be alive here.
            unsafe { device.destroy_device(None) };
            debug!("logical device destroyed");
        }
    }

    fn is_valid(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for LogicalDevice<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_yields_one_request() {
        assert_eq!(unique_queue_families(0, 0), vec![0]);
    }

    #[test]
    fn distinct_families_yield_two_requests() {
        assert_eq!(unique_queue_families(2, 0), vec![0, 2]);
        assert_eq!(unique_queue_families(1, 3), vec![1, 3]);
    }
}
