//! Vulkan rendering backend
//!
//! Low-level wrappers over the graphics API. Every composite object here is
//! acquired and released through the staged lifecycle protocol in
//! [`crate::core::stage`]; raw API failure codes are translated into the
//! engine error kinds at this boundary.

use ash::vk;
use thiserror::Error;

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod queue;
pub mod swapchain;
pub mod sync;
pub mod uniform;

pub use buffer::{Buffer, BufferKind};
pub use commands::{submit_one_time, CommandPool};
pub use descriptor::{DescriptorLayoutKind, DescriptorSetLayout, DescriptorSets};
pub use device::{RenderDevice, SelectionError};
pub use instance::RenderInstance;
pub use pipeline::{GraphicsPipeline, PipelineLayout};
pub use queue::{capability_count, rank_by_specificity, QueueExhausted, QueueFamily, QueueLease};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSlot, FrameSlots, Semaphore, MAX_FRAMES_IN_FLIGHT};
pub use uniform::{UboModelInstance, UboViewProjection, MAX_MODEL_INSTANCES};

/// Failure on the per-frame submission path. Fatal to the current frame and
/// surfaced to the host; never retried automatically.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A graphics API call failed
    #[error("{what} failed: {code:?}")]
    Api {
        /// The operation that failed
        what: &'static str,
        /// Raw API result code
        code: vk::Result,
    },

    /// A draw group exceeds the fixed per-model instance ceiling
    #[error("draw group holds {count} instances, above the ceiling of {max}")]
    TooManyInstances {
        /// Instances requested this frame
        count: usize,
        /// Size of the per-model transform array
        max: usize,
    },

    /// A draw group references a model handle the engine does not know
    #[error("draw group references an unknown model handle")]
    UnknownModel,

    /// Uniform data does not match the target buffer size
    #[error("uniform data of {data} bytes does not fit a buffer of {buffer} bytes")]
    UniformSize {
        /// Size of the data being written
        data: u64,
        /// Size of the destination buffer
        buffer: u64,
    },

    /// No free queue was available for submission; a contention signal, not
    /// a crash
    #[error(transparent)]
    QueueExhausted(#[from] QueueExhausted),
}
