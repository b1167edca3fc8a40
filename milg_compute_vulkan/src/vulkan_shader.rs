/// Shader - Vulkan implementation of the Shader trait

use milg_compute::milg::device::{Shader as DeviceShader, ShaderStage, ResourceId};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan shader module
pub struct Shader {
    pub(crate) id: ResourceId,
    /// Vulkan shader module
    pub(crate) module: vk::ShaderModule,
    /// Entry point name
    pub(crate) entry_point: CString,
    /// Shared GPU context (for cleanup)
    pub(crate) ctx: Arc<GpuContext>,
}

impl DeviceShader for Shader {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn stage(&self) -> ShaderStage {
        ShaderStage::Compute
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.module, None);
        }
    }
}
