// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline with hard-wired fixed-function state.

use ash::vk;
use ember_render::GpuResource;
use tracing::{debug, info};

use crate::device::LogicalDevice;
use crate::error::{VkError, VkResult};
use crate::handle::HandleSlot;
use crate::shader::Shader;
use crate::surface::{choose_surface_format, PresentationSurface};

pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Owns the pipeline, its (empty) layout and the single-subpass render pass
/// it renders into. Shader stages are borrowed and must outlive it.
pub struct Pipeline<'a> {
    device: &'a LogicalDevice<'a>,
    surface: &'a PresentationSurface<'a>,
    stages: Vec<&'a Shader<'a>>,
    render_pass: HandleSlot<vk::RenderPass>,
    layout: HandleSlot<vk::PipelineLayout>,
    pipeline: HandleSlot<vk::Pipeline>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl<'a> Pipeline<'a> {
    pub fn new(device: &'a LogicalDevice<'a>, surface: &'a PresentationSurface<'a>) -> Self {
        Self {
            device,
            surface,
            stages: Vec::new(),
            render_pass: HandleSlot::empty(),
            layout: HandleSlot::empty(),
            pipeline: HandleSlot::empty(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
        }
    }

    /// Stages are passed to the driver in the order they were added.
    pub fn add_shader_stage(&mut self, shader: &'a Shader<'a>) -> &mut Self {
        self.stages.push(shader);
        self
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.get()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.get()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.get()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// The viewport baked in at creation; also what callers should set
    /// dynamically.
    pub fn viewport(&self) -> vk::Viewport {
        viewport_for(self.extent)
    }

    pub fn scissor(&self) -> vk::Rect2D {
        scissor_for(self.extent)
    }

    fn create_render_pass(device: &ash::Device, format: vk::Format) -> VkResult<vk::RenderPass> {
        let color_attachment = vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            ..Default::default()
        };
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_attachment,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        // SAFETY: all pointers refer to locals alive for the call.
        unsafe { device.create_render_pass(&ci, None) }.map_err(VkError::PipelineCreation)
    }
}

impl GpuResource for Pipeline<'_> {
    type Error = VkError;

    fn create(&mut self) -> VkResult<()> {
        if self.pipeline.is_valid() {
            return Ok(());
        }
        if self.stages.is_empty() {
            return Err(VkError::PipelineCreation(
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ));
        }
        if self.stages.iter().any(|s| !s.is_valid()) {
            return Err(VkError::NotCreated("shader module"));
        }
        let device = self.device.ash_device()?;

        // Same negotiation the swap chain runs, so the pass matches its images.
        let support = self.surface.swap_chain_support_details(self.device.adapter())?;
        let format = choose_surface_format(&support.formats)
            .ok_or(VkError::NoSurfaceFormat)?
            .format;
        let extent = self.surface.choose_swap_extent(&support.capabilities);

        // STRICT ORDER: render pass → layout → pipeline. destroy() reverses it.
        if !self.render_pass.is_valid() {
            self.render_pass
                .set(Self::create_render_pass(device, format)?);
        }
        if !self.layout.is_valid() {
            let layout_ci = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                ..Default::default()
            };
            // SAFETY: empty layout, no pointers.
            let layout = unsafe { device.create_pipeline_layout(&layout_ci, None) }
                .map_err(VkError::PipelineCreation)?;
            self.layout.set(layout);
        }

        let stages: Vec<vk::PipelineShaderStageCreateInfo> =
            self.stages.iter().map(|s| s.stage_create_info()).collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };
        let viewport = viewport_for(extent);
        let scissor = scissor_for(extent);
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_bias_enable: vk::FALSE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: vk::FALSE,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            logic_op: vk::LogicOp::COPY,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            blend_constants: [0.0; 4],
            ..Default::default()
        };
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let ci = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic,
            layout: self.layout.get(),
            render_pass: self.render_pass.get(),
            subpass: 0,
            ..Default::default()
        };

        // SAFETY: every state block above outlives the call; the shader
        // modules are valid (checked) and borrowed for 'a.
        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[ci], None)
        }
        .map_err(|(_, e)| VkError::PipelineCreation(e))?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or(VkError::PipelineCreation(vk::Result::ERROR_UNKNOWN))?;

        self.pipeline.set(pipeline);
        self.format = format;
        self.extent = extent;
        info!(
            "graphics pipeline created: {} stage(s), {:?}, {}x{}",
            stages.len(),
            format,
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn destroy(&mut self) {
        let Ok(device) = self.device.ash_device() else {
            return;
        };
        if !(self.pipeline.is_valid() || self.layout.is_valid() || self.render_pass.is_valid()) {
            return;
        }
        // SAFETY (all three): nothing records against this pipeline, and the
        // handles were created on `device`.
        self.pipeline
            .release(|p| unsafe { device.destroy_pipeline(p, None) });
        self.layout
            .release(|l| unsafe { device.destroy_pipeline_layout(l, None) });
        self.render_pass
            .release(|r| unsafe { device.destroy_render_pass(r, None) });
        debug!("graphics pipeline destroyed");
    }

    fn is_valid(&self) -> bool {
        self.pipeline.is_valid()
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent_with_unit_depth() {
        let vp = viewport_for(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!((vp.x, vp.y), (0.0, 0.0));
        assert_eq!((vp.width, vp.height), (800.0, 600.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
    }

    #[test]
    fn scissor_matches_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let scissor = scissor_for(extent);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, extent);
    }
}
