/// CommandList trait - for recording compute commands

use std::sync::Arc;
use crate::error::Result;
use crate::graphics_device::{
    ResourceId, ComputePipeline, DescriptorSet, QueryPool, Texture, ImageLayout,
};

/// Command list for recording compute work
///
/// Wraps a command buffer owned by the caller; submission is outside the
/// compute core. Implementations track which pipeline and set are bound so
/// the core can detect state left behind by another pipeline.
pub trait CommandList: Send + Sync {
    /// Bind a compute pipeline
    ///
    /// Binding a different pipeline invalidates the bound descriptor set.
    fn bind_compute_pipeline(&mut self, pipeline: &Arc<dyn ComputePipeline>) -> Result<()>;

    /// Bind a descriptor set at set index 0 of `pipeline`'s layout
    fn bind_descriptor_set(
        &mut self,
        pipeline: &Arc<dyn ComputePipeline>,
        set: &Arc<dyn DescriptorSet>,
    ) -> Result<()>;

    /// Push constants to the pipeline
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline whose layout declares the range
    /// * `offset` - Offset in bytes into push constant range
    /// * `data` - Data to push
    fn push_constants(&mut self, pipeline: &Arc<dyn ComputePipeline>, offset: u32, data: &[u8]) -> Result<()>;

    /// Dispatch compute work groups
    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) -> Result<()>;

    /// Reset `count` queries starting at `first`
    fn reset_query_pool(&mut self, pool: &Arc<dyn QueryPool>, first: u32, count: u32) -> Result<()>;

    /// Write a timestamp into `query` once all previous commands completed
    fn write_timestamp(&mut self, pool: &Arc<dyn QueryPool>, query: u32) -> Result<()>;

    /// Record a layout transition for `texture` and update its layout tag
    ///
    /// Fails with a validation error when the texture's usage does not allow
    /// `new_layout`. Transitioning to the current layout records nothing.
    fn transition_texture(&mut self, texture: &dyn Texture, new_layout: ImageLayout) -> Result<()>;

    /// Id of the currently bound compute pipeline
    fn bound_compute_pipeline(&self) -> Option<ResourceId>;

    /// Id of the currently bound descriptor set
    fn bound_descriptor_set(&self) -> Option<ResourceId>;
}
