/// QueryPool trait - GPU timestamp queries

use crate::graphics_device::ResourceId;

/// Descriptor for creating a timestamp query pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPoolDesc {
    /// Number of timestamp queries
    pub query_count: u32,
}

/// Timestamp query pool trait
pub trait QueryPool: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;

    /// Number of queries in the pool
    fn query_count(&self) -> u32;
}
