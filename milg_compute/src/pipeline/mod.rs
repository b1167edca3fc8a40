/// Pipeline module - compute pipelines, their factory and the per-frame rings

pub mod pipeline;
pub mod pipeline_factory;
pub mod descriptor_ring;
pub mod query_ring;

pub use pipeline::{Pipeline, PipelineOutputDescription, RecordingState};
pub use pipeline_factory::{PipelineFactory, PipelineFactoryConfig, PipelineTiming};
pub use descriptor_ring::{DescriptorSetRing, RingSlot, SetState};
pub use query_ring::{
    QueryRing, QuerySlot, QuerySlotState, FrameTimings,
    FRAME_START_QUERY, FRAME_END_QUERY, query_count, pipeline_queries, ticks_to_ms, resolve_timings,
};
