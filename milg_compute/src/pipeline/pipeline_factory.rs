/// Pipeline factory - named registry of compute pipelines and the frame timing protocol
///
/// The factory owns every `Pipeline`, the shared descriptor pool new
/// pipelines allocate from, and one timestamp query pool per frame in
/// flight. `begin_frame` / `end_frame` bracket all pipeline recording of a
/// frame; results of earlier frames are read back without blocking and
/// turned into each pipeline's `execution_time`.

use std::sync::Arc;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::{
    GraphicsContext, CommandList, DescriptorPool, QueryPool,
    DescriptorPoolDesc, DescriptorSetLayoutDesc, QueryPoolDesc, ShaderDesc, ShaderStage,
    ComputePipelineDesc, TextureDesc, TextureUsage, MAX_PUSH_CONSTANT_SIZE,
};
use crate::pipeline::pipeline::{
    Pipeline, PipelineDeclaration, PipelineOutputDescription, PipelineParts,
    RecordingState, allocate_set_with_fallback, dedicated_pool_desc,
};
use crate::pipeline::query_ring::{
    QueryRing, QuerySlotState, FrameTimings, FRAME_END_QUERY, FRAME_START_QUERY,
    query_count, resolve_timings,
};
use crate::utils::SlotAllocator;
use crate::{engine_debug, engine_error, engine_info, engine_trace, engine_validation, engine_warn};

const SOURCE: &str = "milg::PipelineFactory";

// ============================================================================
// Configuration
// ============================================================================

/// Capacity and timing settings of a `PipelineFactory`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineFactoryConfig {
    /// Frames whose GPU work may overlap; also the number of query pools
    pub frames_in_flight: u32,
    /// Registry size; sizes the shared descriptor pool and the query pools
    pub max_pipelines: u32,
    /// Texture plus buffer inputs a single pipeline may declare
    pub max_bindings_per_pipeline: u32,
    /// Hard cap on a pipeline's descriptor-set ring
    pub max_sets_per_pipeline: u32,
    /// Create query pools and measure `execution_time`
    pub enable_timestamps: bool,
}

impl Default for PipelineFactoryConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_pipelines: 64,
            max_bindings_per_pipeline: 16,
            max_sets_per_pipeline: 8,
            enable_timestamps: true,
        }
    }
}

impl PipelineFactoryConfig {
    /// Default configuration for `frames_in_flight` overlapping frames
    pub fn with_frames_in_flight(frames_in_flight: u32) -> Self {
        Self {
            frames_in_flight,
            max_sets_per_pipeline: frames_in_flight * 4,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InitializationFailed("frames_in_flight must be at least 1".to_string()));
        }
        if self.max_pipelines == 0 {
            return Err(Error::InitializationFailed("max_pipelines must be at least 1".to_string()));
        }
        if self.max_sets_per_pipeline < self.frames_in_flight {
            return Err(Error::InitializationFailed(format!(
                "max_sets_per_pipeline ({}) is below frames_in_flight ({})",
                self.max_sets_per_pipeline, self.frames_in_flight)));
        }
        Ok(())
    }
}

/// One diagnostics row
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTiming {
    pub name: String,
    /// Milliseconds
    pub execution_time: f32,
    pub dispatch_count: u32,
}

// ============================================================================
// PipelineFactory
// ============================================================================

pub struct PipelineFactory {
    context: GraphicsContext,
    config: PipelineFactoryConfig,

    pipelines: FxHashMap<String, Pipeline>,
    global_descriptor_pool: Arc<dyn DescriptorPool>,

    query_ring: Option<QueryRing>,
    timing_slots: SlotAllocator,
    timestamp_period: f32,

    /// Number of the next frame `begin_frame` opens
    next_frame: u64,
    current_frame: Option<u64>,
    writing_slot: Option<usize>,
    completed_through: Option<u64>,
    frame_index: usize,

    pre_execution_time: f32,
    gpu_frame_time: f32,

    /// Removed pipelines the GPU may still reference
    retired: Vec<Pipeline>,
    /// Timing slots released during an open frame
    pending_slot_frees: Vec<u32>,
}

impl PipelineFactory {
    /// Create a factory with the default configuration
    pub fn create(context: &GraphicsContext) -> Result<Self> {
        Self::with_config(context, PipelineFactoryConfig::default())
    }

    /// Create a factory with a custom configuration
    ///
    /// # Errors
    ///
    /// `InitializationFailed` for an invalid configuration or when the shared
    /// descriptor pool or a query pool cannot be created.
    pub fn with_config(context: &GraphicsContext, config: PipelineFactoryConfig) -> Result<Self> {
        config.validate().map_err(|e| {
            engine_error!(SOURCE, "Invalid configuration: {}", e);
            e
        })?;

        let max_sets = config.max_pipelines * config.frames_in_flight;
        let pool_desc = DescriptorPoolDesc {
            max_sets,
            storage_images: max_sets * config.max_bindings_per_pipeline,
            storage_buffers: max_sets * config.max_bindings_per_pipeline,
        };

        let (global_descriptor_pool, query_pools, timestamp_period) = {
            let mut device = context.device()?;

            let pool = device.create_descriptor_pool(pool_desc).map_err(|e| {
                engine_error!(SOURCE, "Failed to create the shared descriptor pool: {}", e);
                Error::InitializationFailed(format!("shared descriptor pool: {}", e))
            })?;

            let mut query_pools: Vec<Arc<dyn QueryPool>> = Vec::new();
            if config.enable_timestamps {
                let desc = QueryPoolDesc { query_count: query_count(config.max_pipelines) };
                for i in 0..config.frames_in_flight {
                    let query_pool = device.create_query_pool(desc).map_err(|e| {
                        engine_error!(SOURCE, "Failed to create timestamp query pool {}: {}", i, e);
                        Error::InitializationFailed(format!("timestamp query pool {}: {}", i, e))
                    })?;
                    query_pools.push(query_pool);
                }
            }

            (pool, query_pools, device.timestamp_period())
        };

        engine_info!(SOURCE,
            "PipelineFactory created ({} frames in flight, {} pipelines max, timestamps {})",
            config.frames_in_flight, config.max_pipelines,
            if config.enable_timestamps { "on" } else { "off" });

        Ok(Self {
            context: context.clone(),
            config,
            pipelines: FxHashMap::default(),
            global_descriptor_pool,
            query_ring: (!query_pools.is_empty()).then(|| QueryRing::new(query_pools)),
            timing_slots: SlotAllocator::with_capacity(config.max_pipelines),
            timestamp_period,
            next_frame: 0,
            current_frame: None,
            writing_slot: None,
            completed_through: None,
            frame_index: 0,
            pre_execution_time: 0.0,
            gpu_frame_time: 0.0,
            retired: Vec::new(),
            pending_slot_frees: Vec::new(),
        })
    }

    // ===== PIPELINE CREATION =====

    /// Create a named compute pipeline, or return the existing one
    ///
    /// The descriptor-set layout has `texture_input_count` storage-image
    /// bindings at `[0, t)` followed by `buffer_input_count` storage-buffer
    /// bindings at `[t, t + b)`. One output texture is created per entry of
    /// `outputs`.
    ///
    /// # Errors
    ///
    /// - `DuplicateName` if `name` exists with a different declaration
    /// - `ValidationError` for an invalid declaration
    /// - `PoolExhausted` when the registry is full
    /// - any device error while creating GPU objects
    pub fn create_compute_pipeline(
        &mut self,
        name: &str,
        shader_id: &str,
        outputs: &[PipelineOutputDescription],
        texture_input_count: u32,
        buffer_input_count: u32,
        push_constant_size: u32,
    ) -> Result<&mut Pipeline> {
        let declaration = PipelineDeclaration {
            shader_id: shader_id.to_string(),
            outputs: outputs.to_vec(),
            texture_input_count,
            buffer_input_count,
            push_constant_size,
        };

        match self.pipelines.get(name).map(|p| p.declaration() == &declaration) {
            Some(true) => {
                engine_debug!(SOURCE, "Pipeline '{}' already exists, reusing it", name);
                return self.pipelines.get_mut(name)
                    .ok_or_else(|| Error::InvalidResource(name.to_string()));
            }
            Some(false) => {
                engine_error!(SOURCE, "Pipeline '{}' already exists with a different declaration", name);
                return Err(Error::DuplicateName(name.to_string()));
            }
            None => {}
        }

        self.validate_declaration(name, &declaration)?;
        if self.pipelines.len() >= self.config.max_pipelines as usize {
            engine_error!(SOURCE, "Cannot create '{}': {} pipelines registered", name, self.pipelines.len());
            return Err(Error::PoolExhausted(format!(
                "pipeline registry holds its maximum of {} pipelines", self.config.max_pipelines)));
        }
        let timing_slot = self.timing_slots.alloc().ok_or_else(|| {
            engine_error!(SOURCE, "Cannot create '{}': all {} of {} timestamp query pairs in use",
                name, self.timing_slots.len(), self.timing_slots.capacity());
            Error::PoolExhausted("no free timestamp query pair".to_string())
        })?;

        let parts = match self.build_parts(name, declaration, timing_slot) {
            Ok(parts) => parts,
            Err(e) => {
                self.timing_slots.free(timing_slot);
                engine_error!(SOURCE, "Failed to create pipeline '{}': {}", name, e);
                return Err(e);
            }
        };

        let mut pipeline = Pipeline::new(parts);
        if let Some(frame) = self.current_frame {
            pipeline.open_frame(frame, self.completed_through, self.writing_pool());
        }
        engine_info!(SOURCE, "Pipeline '{}' created (shader '{}', {} textures, {} buffers, {} outputs)",
            name, shader_id, texture_input_count, buffer_input_count, outputs.len());

        Ok(self.pipelines.entry(name.to_string()).or_insert(pipeline))
    }

    fn validate_declaration(&self, name: &str, declaration: &PipelineDeclaration) -> Result<()> {
        if name.is_empty() {
            return Err(engine_validation!(SOURCE, "Pipeline name must not be empty"));
        }
        let bindings = declaration.texture_input_count + declaration.buffer_input_count;
        if bindings > self.config.max_bindings_per_pipeline {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': {} bindings exceed the limit of {}",
                name, bindings, self.config.max_bindings_per_pipeline));
        }
        if declaration.push_constant_size % 4 != 0 || declaration.push_constant_size > MAX_PUSH_CONSTANT_SIZE {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': push-constant size {} must be a multiple of 4 and at most {}",
                name, declaration.push_constant_size, MAX_PUSH_CONSTANT_SIZE));
        }
        if let Some(i) = declaration.outputs.iter().position(|o| o.width == 0 || o.height == 0) {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': output {} has a zero dimension", name, i));
        }
        Ok(())
    }

    /// Resolve the shader and create every GPU object of a new pipeline
    fn build_parts(&self, name: &str, declaration: PipelineDeclaration, timing_slot: u32) -> Result<PipelineParts> {
        let code = self.context.shaders().resolve(&declaration.shader_id)?;
        let max_sets = self.config.max_sets_per_pipeline as usize;

        let mut device = self.context.device()?;
        let shader = device.create_shader(ShaderDesc {
            code: &code,
            stage: ShaderStage::Compute,
            entry_point: "main".to_string(),
        })?;
        let set_layout = device.create_descriptor_set_layout(DescriptorSetLayoutDesc::compute_inputs(
            declaration.texture_input_count,
            declaration.buffer_input_count,
        ))?;
        let pipeline = device.create_compute_pipeline(ComputePipelineDesc {
            shader,
            set_layout: set_layout.clone(),
            push_constant_size: declaration.push_constant_size,
        })?;

        let mut descriptor_pool = self.global_descriptor_pool.clone();
        let mut dedicated_pool = false;
        let initial_set = allocate_set_with_fallback(
            &mut *device,
            &mut descriptor_pool,
            &mut dedicated_pool,
            &set_layout,
            dedicated_pool_desc(max_sets, declaration.texture_input_count, declaration.buffer_input_count),
            name,
        )?;

        let mut output_buffers = Vec::with_capacity(declaration.outputs.len());
        for (i, output) in declaration.outputs.iter().enumerate() {
            output_buffers.push(device.create_texture(TextureDesc {
                width: output.width,
                height: output.height,
                format: output.format,
                usage: TextureUsage::STORAGE | TextureUsage::SAMPLED | TextureUsage::TRANSFER_SRC,
                name: format!("{}.output{}", name, i),
            })?);
        }

        Ok(PipelineParts {
            name: name.to_string(),
            declaration,
            descriptor_pool,
            dedicated_pool,
            pipeline,
            set_layout,
            initial_set,
            max_sets,
            output_buffers,
            timing_slot,
        })
    }

    // ===== LOOKUP =====

    /// Pipeline by name, `None` when absent
    pub fn get_pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    /// Mutable pipeline by name, for recording
    pub fn get_pipeline_mut(&mut self, name: &str) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(name)
    }

    /// Every registered pipeline
    pub fn get_pipelines(&self) -> &FxHashMap<String, Pipeline> {
        &self.pipelines
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Name-sorted timing rows
    pub fn pipeline_timings(&self) -> Vec<PipelineTiming> {
        let mut rows: Vec<PipelineTiming> = self
            .pipelines
            .values()
            .map(|p| PipelineTiming {
                name: p.name().to_string(),
                execution_time: p.execution_time(),
                dispatch_count: p.dispatch_count(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Remove a pipeline by name
    ///
    /// GPU objects stay alive until every frame that used them is complete.
    /// Returns false if no such pipeline exists.
    pub fn remove_pipeline(&mut self, name: &str) -> bool {
        let Some(mut pipeline) = self.pipelines.remove(name) else {
            return false;
        };
        if pipeline.recording_state() == RecordingState::Recording {
            engine_warn!(SOURCE, "Pipeline '{}' removed while recording", name);
            // The open command list already references its pipeline and sets
            pipeline.abandon_span();
        }

        let slot = pipeline.timing_slot();
        if let Some(ring) = &mut self.query_ring {
            ring.forget(slot);
        }
        // Queries of the open frame may already be written for this slot
        if self.current_frame.is_some() {
            self.pending_slot_frees.push(slot);
        } else {
            self.timing_slots.free(slot);
        }

        if !self.is_complete(pipeline.last_submitted_frame()) {
            self.retired.push(pipeline);
        }
        engine_info!(SOURCE, "Pipeline '{}' removed", name);
        true
    }

    // ===== FRAME PROTOCOL =====

    /// Open the next frame
    ///
    /// Resets the frame's query pool and writes the frame-start timestamp.
    /// Must precede every `Pipeline::begin` of the frame. Opening frame `F`
    /// declares frames up to `F - frames_in_flight` complete on the GPU.
    pub fn begin_frame(&mut self, cmd: &mut dyn CommandList) -> Result<()> {
        if let Some(frame) = self.current_frame {
            return Err(engine_validation!(SOURCE, "begin_frame while frame {} is still open", frame));
        }

        let frame = self.next_frame;
        let frames_in_flight = self.config.frames_in_flight as u64;
        if frame >= frames_in_flight {
            let completed = frame - frames_in_flight;
            self.completed_through = Some(self.completed_through.map_or(completed, |c| c.max(completed)));
        }
        for slot in self.pending_slot_frees.drain(..) {
            self.timing_slots.free(slot);
        }
        self.release_retired();

        let writing_pool = match self.query_ring.as_ref().map(|ring| ring.slot_index(frame)) {
            Some(index) => Some(self.open_query_slot(cmd, frame, index)?),
            None => None,
        };

        for pipeline in self.pipelines.values_mut() {
            pipeline.open_frame(frame, self.completed_through, writing_pool.clone());
        }
        self.current_frame = Some(frame);
        self.next_frame = frame + 1;
        engine_trace!(SOURCE, "Frame {} begun (slot {})", frame, self.frame_index);
        Ok(())
    }

    /// Close the current frame and read back earlier timestamp results
    ///
    /// Writes the frame-end timestamp, then reads every pending query slot
    /// other than the one just written, oldest first. Unavailable results keep
    /// the previous `execution_time`; readback never waits on the GPU.
    pub fn end_frame(&mut self, cmd: &mut dyn CommandList) -> Result<()> {
        let Some(frame) = self.current_frame else {
            return Err(engine_validation!(SOURCE, "end_frame without begin_frame"));
        };
        if let Some(recording) = self.pipelines.values().find(|p| p.recording_state() == RecordingState::Recording) {
            return Err(engine_validation!(SOURCE,
                "end_frame while pipeline '{}' is still recording", recording.name()));
        }

        let mut timed: Vec<u32> = self.pipelines.values_mut().filter_map(Pipeline::close_frame).collect();
        timed.sort_unstable();

        if let (Some(ring), Some(index)) = (self.query_ring.as_mut(), self.writing_slot) {
            let pool = ring.slot(index).pool.clone();
            cmd.write_timestamp(&pool, FRAME_END_QUERY)?;
            ring.finish_write(index, timed)?;
        }

        let pending = self
            .query_ring
            .as_ref()
            .map(|ring| ring.pending(self.writing_slot))
            .unwrap_or_default();
        for index in pending {
            self.harvest(index);
        }

        self.current_frame = None;
        self.writing_slot = None;
        self.frame_index = ((frame + 1) % self.config.frames_in_flight as u64) as usize;
        engine_trace!(SOURCE, "Frame {} ended", frame);
        Ok(())
    }

    /// Declare every begun frame complete on the GPU
    ///
    /// Call after waiting for the device to go idle; every descriptor set and
    /// removed pipeline becomes reclaimable.
    pub fn mark_frames_complete(&mut self) {
        if self.next_frame == 0 {
            return;
        }
        self.completed_through = Some(self.next_frame - 1);
        for pipeline in self.pipelines.values_mut() {
            pipeline.set_completed_through(self.completed_through);
        }
        self.release_retired();
    }

    /// Wait for the device to go idle, then `mark_frames_complete`
    pub fn wait_idle(&mut self) -> Result<()> {
        self.context.device()?.wait_idle()?;
        self.mark_frames_complete();
        Ok(())
    }

    // ===== ACCESSORS =====

    /// GPU time from the frame start to the first pipeline start (ms)
    pub fn pre_execution_time(&self) -> f32 {
        self.pre_execution_time
    }

    /// GPU time from the frame start to the frame end (ms)
    pub fn gpu_frame_time(&self) -> f32 {
        self.gpu_frame_time
    }

    /// Query slot the open (or next) frame writes, `frame_number % frames_in_flight`
    ///
    /// Advanced by `end_frame`.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of frames begun so far
    pub fn frame_number(&self) -> u64 {
        self.next_frame
    }

    /// Frame currently open, if any
    pub fn current_frame(&self) -> Option<u64> {
        self.current_frame
    }

    pub fn config(&self) -> &PipelineFactoryConfig {
        &self.config
    }

    pub fn context(&self) -> &GraphicsContext {
        &self.context
    }

    /// Nanoseconds per timestamp tick
    pub fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }

    pub fn global_descriptor_pool(&self) -> &Arc<dyn DescriptorPool> {
        &self.global_descriptor_pool
    }

    /// State of query slot `index` (None when timestamps are off)
    pub fn query_slot_state(&self, index: usize) -> Option<QuerySlotState> {
        self.query_ring.as_ref().map(|ring| ring.state(index))
    }

    // ===== INTERNALS =====

    fn is_complete(&self, frame: Option<u64>) -> bool {
        match (frame, self.completed_through) {
            (None, _) => true,
            (Some(frame), Some(completed)) => frame <= completed,
            (Some(_), None) => false,
        }
    }

    fn release_retired(&mut self) {
        let completed_through = self.completed_through;
        self.retired.retain(|p| match (p.last_submitted_frame(), completed_through) {
            (Some(frame), Some(completed)) => frame > completed,
            (Some(_), None) => true,
            (None, _) => false,
        });
    }

    fn writing_pool(&self) -> Option<Arc<dyn QueryPool>> {
        let ring = self.query_ring.as_ref()?;
        self.writing_slot.map(|index| ring.slot(index).pool.clone())
    }

    /// Make the slot of `frame` writable, reset it and write the frame start
    fn open_query_slot(&mut self, cmd: &mut dyn CommandList, frame: u64, index: usize) -> Result<Arc<dyn QueryPool>> {
        if self.query_ring.as_ref().map(|ring| ring.state(index)) == Some(QuerySlotState::ReadyToRead)
            && !self.harvest(index)
        {
            if let Some(ring) = self.query_ring.as_mut() {
                engine_trace!(SOURCE, "Dropping unread timestamps of frame {}", ring.slot(index).frame);
                ring.consume(index);
            }
        }

        let ring = self
            .query_ring
            .as_mut()
            .ok_or_else(|| Error::BackendError("query ring missing".to_string()))?;
        ring.begin_write(frame)?;
        let pool = ring.slot(index).pool.clone();
        cmd.reset_query_pool(&pool, 0, pool.query_count())?;
        cmd.write_timestamp(&pool, FRAME_START_QUERY)?;
        self.writing_slot = Some(index);
        Ok(pool)
    }

    /// Read one `ReadyToRead` slot; returns true once its results were applied
    fn harvest(&mut self, index: usize) -> bool {
        let Some(ring) = self.query_ring.as_ref() else {
            return false;
        };
        let slot = ring.slot(index);

        let results = match self.context.device() {
            Ok(device) => device.query_results(slot.pool.as_ref(), 0, slot.pool.query_count()),
            Err(e) => Err(e),
        };
        let results = match results {
            Ok(results) => results,
            Err(e) => {
                engine_warn!(SOURCE, "Timestamp readback of frame {} failed: {}", slot.frame, e);
                return false;
            }
        };

        let Some(timings) = resolve_timings(slot.frame, &results, &slot.timed, self.timestamp_period) else {
            engine_trace!(SOURCE, "Timestamps of frame {} not available yet", slot.frame);
            return false;
        };

        self.apply_timings(&timings);
        if let Some(ring) = self.query_ring.as_mut() {
            ring.consume(index);
        }
        true
    }

    fn apply_timings(&mut self, timings: &FrameTimings) {
        for &(timing_slot, milliseconds) in &timings.pipelines {
            if let Some(pipeline) = self.pipelines.values_mut().find(|p| p.timing_slot() == timing_slot) {
                pipeline.set_execution_time(milliseconds);
            }
        }
        self.pre_execution_time = timings.pre_execution_time.unwrap_or(0.0);
        self.gpu_frame_time = timings.frame_time;
    }
}

impl Drop for PipelineFactory {
    fn drop(&mut self) {
        // Pipelines release GPU objects on drop; the device must be done with them
        match self.context.device() {
            Ok(device) => {
                if let Err(e) = device.wait_idle() {
                    engine_warn!(SOURCE, "wait_idle failed while dropping the factory: {}", e);
                }
            }
            Err(e) => engine_warn!(SOURCE, "Device unavailable while dropping the factory: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_factory_tests.rs"]
mod tests;
