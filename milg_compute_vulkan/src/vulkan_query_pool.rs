/// QueryPool - Vulkan timestamp query pool

use milg_compute::milg::device::{QueryPool as DeviceQueryPool, ResourceId};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

pub struct QueryPool {
    pub(crate) id: ResourceId,
    pub(crate) pool: vk::QueryPool,
    pub(crate) query_count: u32,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DeviceQueryPool for QueryPool {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn query_count(&self) -> u32 {
        self.query_count
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_query_pool(self.pool, None);
        }
    }
}

/// Decode `[value, availability]` pairs as returned with `WITH_AVAILABILITY`
///
/// `valid_bits` is the queue family's `timestampValidBits`; bits above it are
/// masked off.
pub(crate) fn decode_results(raw: &[[u64; 2]], valid_bits: u32) -> Vec<Option<u64>> {
    let mask = if valid_bits >= 64 || valid_bits == 0 { u64::MAX } else { (1u64 << valid_bits) - 1 };
    raw.iter()
        .map(|&[value, available]| (available != 0).then_some(value & mask))
        .collect()
}

#[cfg(test)]
#[path = "vulkan_query_pool_tests.rs"]
mod tests;
