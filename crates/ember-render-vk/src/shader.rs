// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use ash::vk;
use ember_render::GpuResource;
use tracing::debug;

use crate::device::LogicalDevice;
use crate::error::{VkError, VkResult};
use crate::handle::HandleSlot;

pub const ENTRY_POINT: &CStr = c"main";

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Infers the stage from glslang-style names: `tri.vert`, `tri.frag.spv`, ...
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let mut stem = path;
        let owned;
        if path.extension().is_some_and(|e| e == "spv") {
            owned = path.with_extension("");
            stem = &owned;
        }
        match stem.extension()?.to_str()? {
            "vert" => Some(ShaderStage::Vertex),
            "tesc" => Some(ShaderStage::TessellationControl),
            "tese" => Some(ShaderStage::TessellationEvaluation),
            "geom" => Some(ShaderStage::Geometry),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }
}

/// Reinterprets `bytes` as SPIR-V words, checking length and magic number.
pub fn decode_spirv(bytes: &[u8]) -> VkResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VkError::InvalidBytecode(e.to_string()))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(VkError::InvalidBytecode(format!(
            "bad magic number {other:#010x}"
        ))),
        None => Err(VkError::InvalidBytecode("empty module".to_owned())),
    }
}

/// One compiled shader module.
pub struct Shader<'a> {
    device: &'a LogicalDevice<'a>,
    stage: ShaderStage,
    code: Vec<u32>,
    module: HandleSlot<vk::ShaderModule>,
}

impl<'a> Shader<'a> {
    /// Validates the bytecode. The module itself is built by `create`.
    pub fn new(device: &'a LogicalDevice<'a>, stage: ShaderStage, bytes: &[u8]) -> VkResult<Self> {
        Ok(Self {
            device,
            stage,
            code: decode_spirv(bytes)?,
            module: HandleSlot::empty(),
        })
    }

    pub fn from_file(
        device: &'a LogicalDevice<'a>,
        stage: ShaderStage,
        path: impl AsRef<Path>,
    ) -> VkResult<Self> {
        let bytes = ember_core::read_binary_file(path)?;
        Self::new(device, stage, &bytes)
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module.get()
    }

    /// Borrows the shader, so it cannot be mutated or destroyed while the
    /// returned descriptor is in use.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: self.stage.flags(),
            module: self.module.get(),
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        }
    }
}

impl GpuResource for Shader<'_> {
    type Error = VkError;

    fn create(&mut self) -> VkResult<()> {
        if self.module.is_valid() {
            return Ok(());
        }
        let device = self.device.ash_device()?;
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: self.code.len() * std::mem::size_of::<u32>(),
            p_code: self.code.as_ptr(),
            ..Default::default()
        };
        // SAFETY: `code` is validated SPIR-V and outlives the call.
        let module = unsafe { device.create_shader_module(&ci, None) }
            .map_err(VkError::ShaderCreation)?;
        self.module.set(module);
        debug!("{:?} shader module created ({} words)", self.stage, self.code.len());
        Ok(())
    }

    fn destroy(&mut self) {
        let Ok(device) = self.device.ash_device() else {
            return;
        };
        let stage = self.stage;
        self.module.release(|module| {
            // SAFETY: pipelines borrow their shaders, so none still reference it.
            unsafe { device.destroy_shader_module(module, None) };
            debug!("{:?} shader module destroyed", stage);
        });
    }

    fn is_valid(&self) -> bool {
        self.module.is_valid()
    }
}

impl Drop for Shader<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn stage_from_extension() {
        assert_eq!(ShaderStage::from_path("shaders/tri.vert"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_path("tri.frag.spv"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_path("a/b.geom"), Some(ShaderStage::Geometry));
        assert_eq!(ShaderStage::from_path("x.comp"), Some(ShaderStage::Compute));
        assert_eq!(
            ShaderStage::from_path("x.tesc"),
            Some(ShaderStage::TessellationControl)
        );
        assert_eq!(
            ShaderStage::from_path("x.tese.spv"),
            Some(ShaderStage::TessellationEvaluation)
        );
    }

    #[test]
    fn unknown_stage_is_none() {
        assert_eq!(ShaderStage::from_path("vert.spv"), None);
        assert_eq!(ShaderStage::from_path("shader.glsl"), None);
        assert_eq!(ShaderStage::from_path("noext"), None);
    }

    #[test]
    fn stage_flags_match() {
        assert_eq!(ShaderStage::Vertex.flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.flags(), vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn valid_module_decodes() {
        let bytes = module(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        assert_eq!(decode_spirv(&bytes).unwrap().len(), 5);
    }

    #[test]
    fn odd_length_is_rejected() {
        let mut bytes = module(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();
        assert!(matches!(decode_spirv(&bytes), Err(VkError::InvalidBytecode(_))));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = module(&[0xdead_beef, 0x0001_0000]);
        assert!(matches!(decode_spirv(&bytes), Err(VkError::InvalidBytecode(_))));
    }

    #[test]
    fn empty_module_is_rejected() {
        assert!(matches!(decode_spirv(&[]), Err(VkError::InvalidBytecode(_))));
    }
}
