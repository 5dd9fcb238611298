// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan context bring-up on ash.
//!
//! Objects borrow what they were built from, so the borrow checker enforces
//! the construction order
//! `Context → PresentationSurface → Adapter → LogicalDevice → SwapChain → Shader → Pipeline`
//! and teardown runs in reverse. Every owning object implements
//! [`ember_render::GpuResource`]; `destroy` is idempotent and also runs on drop.

pub use ash;

mod adapter;
mod context;
mod device;
mod error;
mod handle;
mod pipeline;
mod shader;
mod surface;
mod swapchain;

pub use adapter::{
    best_score_index, missing_extensions, rate_suitability, scan_queue_families, select_adapter,
    Adapter, QueueFamilyIndices,
};
pub use context::{Context, ContextBuilder, MessageSeverity, VALIDATION_LAYER};
pub use device::{unique_queue_families, LogicalDevice};
pub use error::{VkError, VkResult};
pub use pipeline::{scissor_for, viewport_for, Pipeline};
pub use shader::{decode_spirv, Shader, ShaderStage, ENTRY_POINT};
pub use surface::{
    choose_present_mode, choose_surface_format, choose_swap_extent, PresentationSurface,
    SwapChainSupportDetails,
};
pub use swapchain::{image_count, sharing_mode, SwapChain};
