/// Descriptor pool, set layout and set - Vulkan implementations

use milg_compute::milg::device::{
    DescriptorPool as DevicePool, DescriptorSetLayout as DeviceSetLayout, DescriptorSet as DeviceSet,
    DescriptorPoolDesc, DescriptorBinding, ResourceId,
};
use milg_compute::engine_warn;
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan descriptor pool; destroying it frees every set allocated from it
pub struct DescriptorPool {
    pub(crate) id: ResourceId,
    pub(crate) pool: vk::DescriptorPool,
    pub(crate) desc: DescriptorPoolDesc,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DevicePool for DescriptorPool {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn desc(&self) -> &DescriptorPoolDesc {
        &self.desc
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Vulkan descriptor-set layout (compute stage)
pub struct DescriptorSetLayout {
    pub(crate) id: ResourceId,
    pub(crate) layout: vk::DescriptorSetLayout,
    pub(crate) bindings: Vec<DescriptorBinding>,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DeviceSetLayout for DescriptorSetLayout {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Vulkan descriptor set
///
/// Returned to its pool on drop; keeps the pool alive until then.
pub struct DescriptorSet {
    pub(crate) id: ResourceId,
    pub(crate) set: vk::DescriptorSet,
    pub(crate) bindings: Vec<DescriptorBinding>,
    /// Raw handle of `_pool`, for `vkFreeDescriptorSets`
    pub(crate) pool_handle: vk::DescriptorPool,
    pub(crate) ctx: Arc<GpuContext>,
    pub(crate) _pool: Arc<dyn DevicePool>,
}

impl DeviceSet for DescriptorSet {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // Pools are created with FREE_DESCRIPTOR_SET
        if let Err(e) = unsafe { self.ctx.device.free_descriptor_sets(self.pool_handle, &[self.set]) } {
            engine_warn!("milg::vulkan", "Failed to free descriptor set {}: {:?}", self.id, e);
        }
    }
}
