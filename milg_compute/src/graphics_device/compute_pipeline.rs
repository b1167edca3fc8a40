/// ComputePipeline trait and compute pipeline descriptor

use std::sync::Arc;
use crate::graphics_device::{ResourceId, Shader, DescriptorSetLayout};

/// Largest push-constant block every Vulkan implementation must support
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// Descriptor for creating a compute pipeline
#[derive(Clone)]
pub struct ComputePipelineDesc {
    /// Compute shader module
    pub shader: Arc<dyn Shader>,
    /// The single descriptor-set layout (set 0)
    pub set_layout: Arc<dyn DescriptorSetLayout>,
    /// Push-constant range size in bytes (0 = no range)
    pub push_constant_size: u32,
}

/// Compiled compute pipeline plus its pipeline layout
pub trait ComputePipeline: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;

    /// Push-constant range size declared at creation
    fn push_constant_size(&self) -> u32;
}
