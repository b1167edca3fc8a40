/// CommandList - Vulkan implementation of the CommandList trait
///
/// Records into a command buffer the application allocated and begun; the
/// application also ends and submits it.

use milg_compute::milg::Result;
use milg_compute::milg::device::{
    CommandList, ComputePipeline as DevicePipeline, DescriptorSet as DeviceSet,
    QueryPool as DeviceQueryPool, Texture as DeviceTexture, ImageLayout, ResourceId,
    validate_transition,
};
use milg_compute::{engine_bail, engine_trace};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_graphics_device::VulkanGraphicsDevice;
use crate::vulkan_compute_pipeline::ComputePipeline;
use crate::vulkan_descriptor::DescriptorSet;
use crate::vulkan_query_pool::QueryPool;
use crate::vulkan_texture::Texture;
use crate::vulkan_format::{image_layout_to_vk, layout_access_mask, layout_stage};

const SOURCE: &str = "milg::vulkan";

/// Vulkan command list
pub struct VulkanCommandList {
    /// Shared GPU context
    ctx: Arc<GpuContext>,
    /// Command buffer currently recorded into
    command_buffer: vk::CommandBuffer,
    /// Bound compute pipeline id and its layout (for sets and push constants)
    bound_pipeline: Option<(ResourceId, vk::PipelineLayout)>,
    /// Bound descriptor set id
    bound_set: Option<ResourceId>,
}

impl VulkanCommandList {
    /// Wrap a command buffer in the recording state
    ///
    /// # Arguments
    ///
    /// * `device` - Device the pipelines were created on
    /// * `command_buffer` - Primary command buffer, already begun
    pub fn new(device: &VulkanGraphicsDevice, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            ctx: Arc::clone(device.gpu_context()),
            command_buffer,
            bound_pipeline: None,
            bound_set: None,
        }
    }

    /// Switch to another command buffer (e.g. the next frame's)
    ///
    /// A fresh command buffer has nothing bound.
    pub fn set_command_buffer(&mut self, command_buffer: vk::CommandBuffer) {
        self.command_buffer = command_buffer;
        self.bound_pipeline = None;
        self.bound_set = None;
    }

    /// Get the Vulkan command buffer handle
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn bound_layout(&self, pipeline: &dyn DevicePipeline) -> Result<vk::PipelineLayout> {
        match self.bound_pipeline {
            Some((id, layout)) if id == pipeline.id() => Ok(layout),
            _ => engine_bail!(SOURCE, "Pipeline {} is not bound on this command list", pipeline.id()),
        }
    }
}

impl CommandList for VulkanCommandList {
    fn bind_compute_pipeline(&mut self, pipeline: &Arc<dyn DevicePipeline>) -> Result<()> {
        let vk_pipeline = unsafe { &*(pipeline.as_ref() as *const dyn DevicePipeline as *const ComputePipeline) };

        unsafe {
            self.ctx.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                vk_pipeline.pipeline,
            );
        }

        if self.bound_pipeline.map(|(id, _)| id) != Some(pipeline.id()) {
            self.bound_set = None;
        }
        self.bound_pipeline = Some((pipeline.id(), vk_pipeline.pipeline_layout));
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        pipeline: &Arc<dyn DevicePipeline>,
        set: &Arc<dyn DeviceSet>,
    ) -> Result<()> {
        let layout = self.bound_layout(pipeline.as_ref())?;
        let vk_set = unsafe { &*(set.as_ref() as *const dyn DeviceSet as *const DescriptorSet) };

        unsafe {
            self.ctx.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[vk_set.set],
                &[],
            );
        }
        self.bound_set = Some(set.id());
        Ok(())
    }

    fn push_constants(&mut self, pipeline: &Arc<dyn DevicePipeline>, offset: u32, data: &[u8]) -> Result<()> {
        if offset as usize + data.len() > pipeline.push_constant_size() as usize {
            engine_bail!(SOURCE, "Push constants [{}, {}) outside the declared {} bytes",
                offset, offset as usize + data.len(), pipeline.push_constant_size());
        }
        let vk_pipeline = unsafe { &*(pipeline.as_ref() as *const dyn DevicePipeline as *const ComputePipeline) };

        unsafe {
            self.ctx.device.cmd_push_constants(
                self.command_buffer,
                vk_pipeline.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                offset,
                data,
            );
        }
        Ok(())
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) -> Result<()> {
        if self.bound_pipeline.is_none() || self.bound_set.is_none() {
            engine_bail!(SOURCE, "Dispatch without bound pipeline and descriptor set");
        }
        unsafe {
            self.ctx.device.cmd_dispatch(self.command_buffer, group_count_x, group_count_y, group_count_z);
        }
        Ok(())
    }

    fn reset_query_pool(&mut self, pool: &Arc<dyn DeviceQueryPool>, first: u32, count: u32) -> Result<()> {
        let vk_pool = unsafe { &*(pool.as_ref() as *const dyn DeviceQueryPool as *const QueryPool) };
        unsafe {
            self.ctx.device.cmd_reset_query_pool(self.command_buffer, vk_pool.pool, first, count);
        }
        Ok(())
    }

    fn write_timestamp(&mut self, pool: &Arc<dyn DeviceQueryPool>, query: u32) -> Result<()> {
        if query >= pool.query_count() {
            engine_bail!(SOURCE, "Timestamp query {} out of range ({} queries)", query, pool.query_count());
        }
        let vk_pool = unsafe { &*(pool.as_ref() as *const dyn DeviceQueryPool as *const QueryPool) };
        unsafe {
            self.ctx.device.cmd_write_timestamp(
                self.command_buffer,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk_pool.pool,
                query,
            );
        }
        Ok(())
    }

    fn transition_texture(&mut self, texture: &dyn DeviceTexture, new_layout: ImageLayout) -> Result<()> {
        validate_transition(texture, new_layout)?;
        let old_layout = texture.layout();
        if old_layout == new_layout {
            return Ok(());
        }
        let vk_texture = unsafe { &*(texture as *const dyn DeviceTexture as *const Texture) };

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(layout_access_mask(old_layout))
            .dst_access_mask(layout_access_mask(new_layout))
            .old_layout(image_layout_to_vk(old_layout))
            .new_layout(image_layout_to_vk(new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_texture.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                self.command_buffer,
                layout_stage(old_layout),
                layout_stage(new_layout),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        engine_trace!(SOURCE, "Texture {} {:?} -> {:?}", texture.id(), old_layout, new_layout);
        texture.set_layout(new_layout);
        Ok(())
    }

    fn bound_compute_pipeline(&self) -> Option<ResourceId> {
        self.bound_pipeline.map(|(id, _)| id)
    }

    fn bound_descriptor_set(&self) -> Option<ResourceId> {
        self.bound_set
    }
}
