// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_core::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("context creation failed ({stage}): {reason}")]
    ContextCreation { stage: &'static str, reason: String },

    #[error("no suitable adapter: {0}")]
    DeviceSelection(String),

    #[error("queue family indices are incomplete (graphics={graphics:?}, present={present:?})")]
    IncompleteQueueFamily {
        graphics: Option<u32>,
        present: Option<u32>,
    },

    #[error("logical device creation failed: {0:?}")]
    DeviceCreation(vk::Result),

    #[error("device created but a queue handle came back null (graphics null={graphics_null}, present null={present_null})")]
    QueueRetrieval {
        graphics_null: bool,
        present_null: bool,
    },

    #[error("surface creation failed: {0:?}")]
    SurfaceCreation(vk::Result),

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("swap chain creation failed: {0:?}")]
    SwapChainCreation(vk::Result),

    #[error("image view creation failed: {0:?}")]
    ImageViewCreation(vk::Result),

    #[error("shader module creation failed: {0:?}")]
    ShaderCreation(vk::Result),

    #[error("invalid SPIR-V bytecode: {0}")]
    InvalidBytecode(String),

    #[error("pipeline creation failed: {0:?}")]
    PipelineCreation(vk::Result),

    #[error("{what} query failed: {result:?}")]
    Query {
        what: &'static str,
        result: vk::Result,
    },

    #[error("{0} used before create or after destroy")]
    NotCreated(&'static str),

    #[error(transparent)]
    File(#[from] FileError),
}

impl VkError {
    pub(crate) fn context(stage: &'static str, reason: impl ToString) -> Self {
        VkError::ContextCreation {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn query(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| VkError::Query { what, result }
    }
}

pub type VkResult<T> = Result<T, VkError>;
