/// Shader trait and shader descriptor

use crate::graphics_device::ResourceId;

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Compute shader
    Compute,
}

/// Descriptor for creating a shader
#[derive(Debug, Clone)]
pub struct ShaderDesc<'a> {
    /// SPIR-V words
    pub code: &'a [u32],
    /// Shader stage
    pub stage: ShaderStage,
    /// Entry point function name
    pub entry_point: String,
}

/// Shader module trait
pub trait Shader: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;

    /// Stage this module was compiled for
    fn stage(&self) -> ShaderStage;
}
