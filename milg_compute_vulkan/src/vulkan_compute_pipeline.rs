/// ComputePipeline - Vulkan implementation of the ComputePipeline trait

use milg_compute::milg::device::{
    ComputePipeline as DevicePipeline, DescriptorSetLayout as DeviceSetLayout, Shader as DeviceShader,
    ResourceId,
};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan compute pipeline and its pipeline layout
pub struct ComputePipeline {
    pub(crate) id: ResourceId,
    /// Vulkan compute pipeline
    pub(crate) pipeline: vk::Pipeline,
    /// Pipeline layout (set 0 + optional push-constant range)
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) push_constant_size: u32,
    pub(crate) ctx: Arc<GpuContext>,
    /// Kept alive for the lifetime of the pipeline
    pub(crate) _set_layout: Arc<dyn DeviceSetLayout>,
    pub(crate) _shader: Arc<dyn DeviceShader>,
}

impl DevicePipeline for ComputePipeline {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}
