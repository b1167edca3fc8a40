/// Pipeline - one compute program with its descriptor sets, outputs and timing slot
///
/// A pipeline records into a caller-owned command list between `begin` and
/// `end`. Resources bound with `bind_texture` / `bind_buffer` are written into
/// the current descriptor set; the set is bound lazily before the next
/// dispatch. A set the command list already references is never written
/// again: binding after that point rotates to another set from the ring and
/// carries every binding over.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graphics_device::{
    GraphicsContext, GraphicsDevice, CommandList,
    Texture, Buffer, ComputePipeline, DescriptorPool, DescriptorSetLayout, DescriptorSet, QueryPool,
    DescriptorPoolDesc, DescriptorResource, ImageLayout, TextureFormat, ResourceId,
};
use crate::pipeline::descriptor_ring::{DescriptorSetRing, SetState};
use crate::pipeline::query_ring::pipeline_queries;
use crate::{engine_debug, engine_error, engine_info, engine_validation};

const SOURCE: &str = "milg::Pipeline";

// ============================================================================
// Public value types
// ============================================================================

/// Format and size of one output image, consumed at pipeline creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineOutputDescription {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

impl PipelineOutputDescription {
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self { format, width, height }
    }
}

/// Recording state of a pipeline within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Not recorded in the current frame
    Idle,
    /// Between `begin` and `end`
    Recording,
    /// `end` recorded; waits for the next frame
    Submitted,
}

// ============================================================================
// Crate-internal building blocks
// ============================================================================

/// Everything a pipeline was declared with; two declarations are the same
/// pipeline when they compare equal
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PipelineDeclaration {
    pub shader_id: String,
    pub outputs: Vec<PipelineOutputDescription>,
    pub texture_input_count: u32,
    pub buffer_input_count: u32,
    pub push_constant_size: u32,
}

/// GPU objects the factory created for a new pipeline
pub(crate) struct PipelineParts {
    pub name: String,
    pub declaration: PipelineDeclaration,
    pub descriptor_pool: Arc<dyn DescriptorPool>,
    pub dedicated_pool: bool,
    pub pipeline: Arc<dyn ComputePipeline>,
    pub set_layout: Arc<dyn DescriptorSetLayout>,
    pub initial_set: Arc<dyn DescriptorSet>,
    pub max_sets: usize,
    pub output_buffers: Vec<Arc<dyn Texture>>,
    pub timing_slot: u32,
}

/// A resource bound at one binding, kept to re-write it into later sets
#[derive(Clone)]
enum BoundResource {
    Texture(Arc<dyn Texture>),
    Buffer(Arc<dyn Buffer>),
}

impl BoundResource {
    fn id(&self) -> ResourceId {
        match self {
            BoundResource::Texture(texture) => texture.id(),
            BoundResource::Buffer(buffer) => buffer.id(),
        }
    }

    fn as_descriptor(&self) -> DescriptorResource<'_> {
        match self {
            BoundResource::Texture(texture) => DescriptorResource::StorageImage(texture.as_ref()),
            BoundResource::Buffer(buffer) => DescriptorResource::StorageBuffer(buffer.as_ref()),
        }
    }
}

/// Frame bookkeeping pushed in by the factory
#[derive(Debug, Clone, Copy, Default)]
struct FrameSync {
    /// Frame being recorded
    frame: u64,
    /// Every frame up to and including this one has finished on the GPU
    completed_through: Option<u64>,
    /// Between `begin_frame` and `end_frame`
    open: bool,
}

/// Pool capacity for a pipeline that left the shared pool
pub(crate) fn dedicated_pool_desc(max_sets: usize, texture_count: u32, buffer_count: u32) -> DescriptorPoolDesc {
    let max_sets = max_sets as u32;
    DescriptorPoolDesc {
        max_sets,
        storage_images: max_sets * texture_count,
        storage_buffers: max_sets * buffer_count,
    }
}

/// Allocate a set from `pool`, moving to a dedicated pool if the shared one is full
///
/// Exhaustion of an already dedicated pool is returned to the caller.
pub(crate) fn allocate_set_with_fallback(
    device: &mut dyn GraphicsDevice,
    pool: &mut Arc<dyn DescriptorPool>,
    dedicated: &mut bool,
    layout: &Arc<dyn DescriptorSetLayout>,
    dedicated_desc: DescriptorPoolDesc,
    name: &str,
) -> Result<Arc<dyn DescriptorSet>> {
    match device.allocate_descriptor_set(pool, layout) {
        Err(Error::PoolExhausted(_)) if !*dedicated => {
            let new_pool = device.create_descriptor_pool(dedicated_desc)?;
            engine_info!(SOURCE,
                "Pipeline '{}': shared descriptor pool exhausted, using a dedicated pool ({} sets)",
                name, dedicated_desc.max_sets);
            *pool = new_pool;
            *dedicated = true;
            device.allocate_descriptor_set(pool, layout).map_err(|e| {
                engine_error!(SOURCE, "Pipeline '{}': dedicated descriptor pool allocation failed: {}", name, e);
                e
            })
        }
        Err(Error::PoolExhausted(msg)) => {
            engine_error!(SOURCE, "Pipeline '{}': descriptor pool exhausted: {}", name, msg);
            Err(Error::PoolExhausted(msg))
        }
        other => other,
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// One compiled compute pipeline and its per-frame recording state
///
/// Owned by the `PipelineFactory`; obtained through `create_compute_pipeline`
/// or `get_pipeline_mut`.
pub struct Pipeline {
    name: String,
    declaration: PipelineDeclaration,

    descriptor_pool: Arc<dyn DescriptorPool>,
    dedicated_pool: bool,
    pipeline: Arc<dyn ComputePipeline>,
    set_layout: Arc<dyn DescriptorSetLayout>,
    sets: DescriptorSetRing,

    query_pool: Option<Arc<dyn QueryPool>>,
    timing_slot: u32,
    query_index: u32,
    execution_time: f32,
    dispatch_count: u32,

    output_buffers: Vec<Arc<dyn Texture>>,
    bound_resources: Vec<Option<BoundResource>>,
    push_constant_data: Vec<u8>,

    state: RecordingState,
    /// Current set is bound on the command list for this span
    set_bound: bool,
    /// This span writes the start/end timestamps
    timing_span: bool,
    timed_frame: Option<u64>,
    last_submitted_frame: Option<u64>,
    sync: FrameSync,
}

impl Pipeline {
    pub(crate) fn new(parts: PipelineParts) -> Self {
        let binding_count = (parts.declaration.texture_input_count + parts.declaration.buffer_input_count) as usize;
        let (query_index, _) = pipeline_queries(parts.timing_slot);
        Self {
            name: parts.name,
            declaration: parts.declaration,
            descriptor_pool: parts.descriptor_pool,
            dedicated_pool: parts.dedicated_pool,
            pipeline: parts.pipeline,
            set_layout: parts.set_layout,
            sets: DescriptorSetRing::new(parts.initial_set, binding_count, parts.max_sets),
            query_pool: None,
            timing_slot: parts.timing_slot,
            query_index,
            execution_time: 0.0,
            dispatch_count: 0,
            output_buffers: parts.output_buffers,
            bound_resources: vec![None; binding_count],
            push_constant_data: Vec::new(),
            state: RecordingState::Idle,
            set_bound: false,
            timing_span: false,
            timed_frame: None,
            last_submitted_frame: None,
            sync: FrameSync::default(),
        }
    }

    // ===== RECORDING =====

    /// Start recording this pipeline into `cmd`
    ///
    /// Binds the compute pipeline, writes the start timestamp when the frame
    /// is being timed, and optionally uploads push constants. Resets
    /// `dispatch_count`. Must be paired with exactly one `end`.
    pub fn begin(
        &mut self,
        context: &GraphicsContext,
        cmd: &mut dyn CommandList,
        push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if self.state == RecordingState::Recording {
            return Err(engine_validation!(SOURCE, "Pipeline '{}': begin called while already recording", self.name));
        }
        if !self.sync.open {
            return Err(engine_validation!(SOURCE, "Pipeline '{}': begin called outside begin_frame/end_frame", self.name));
        }
        if let Some(data) = push_constants {
            self.check_push_constants(data)?;
        }

        self.acquire_set(context, true)?;
        cmd.bind_compute_pipeline(&self.pipeline)?;
        self.set_bound = false;

        // Queries are written once per frame; later spans in the same frame run untimed
        self.timing_span = self.query_pool.is_some() && self.timed_frame != Some(self.sync.frame);
        if self.timing_span {
            if let Some(pool) = &self.query_pool {
                cmd.write_timestamp(pool, self.query_index)?;
            }
        }

        self.dispatch_count = 0;
        self.state = RecordingState::Recording;
        // A resumed set is already referenced by this frame's commands
        let resumed = self.sets.current().state == SetState::InFlight(self.sync.frame);
        self.sets.current_mut().state = SetState::Recording { bound: resumed };

        if let Some(data) = push_constants {
            cmd.push_constants(&self.pipeline, 0, data)?;
            self.push_constant_data = data.to_vec();
        }
        Ok(())
    }

    /// Bind a texture at `binding` (texture range `[0, texture_input_count)`)
    ///
    /// The texture is transitioned to `General` first if its layout tag differs.
    pub fn bind_texture(
        &mut self,
        context: &GraphicsContext,
        cmd: &mut dyn CommandList,
        binding: u32,
        texture: &Arc<dyn Texture>,
    ) -> Result<()> {
        self.require_recording("bind_texture")?;
        if binding >= self.declaration.texture_input_count {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': texture binding {} out of range [0, {})",
                self.name, binding, self.declaration.texture_input_count));
        }
        if texture.layout() != ImageLayout::General {
            cmd.transition_texture(texture.as_ref(), ImageLayout::General)?;
        }
        self.bind_resource(context, binding, BoundResource::Texture(texture.clone()))
    }

    /// Bind a storage buffer at `binding` (buffer range `[t, t + buffer_input_count)`)
    pub fn bind_buffer(
        &mut self,
        context: &GraphicsContext,
        _cmd: &mut dyn CommandList,
        binding: u32,
        buffer: &Arc<dyn Buffer>,
    ) -> Result<()> {
        self.require_recording("bind_buffer")?;
        let first = self.declaration.texture_input_count;
        let end = first + self.declaration.buffer_input_count;
        if binding < first || binding >= end {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': buffer binding {} out of range [{}, {})",
                self.name, binding, first, end));
        }
        self.bind_resource(context, binding, BoundResource::Buffer(buffer.clone()))
    }

    /// Update the push-constant block
    ///
    /// `data` must be non-empty, a multiple of 4 bytes, and fit the range
    /// declared at creation.
    pub fn set_push_constants(
        &mut self,
        _context: &GraphicsContext,
        cmd: &mut dyn CommandList,
        data: &[u8],
    ) -> Result<()> {
        self.require_recording("set_push_constants")?;
        self.check_push_constants(data)?;
        cmd.push_constants(&self.pipeline, 0, data)?;
        self.push_constant_data = data.to_vec();
        Ok(())
    }

    /// Push a plain-old-data value as the push-constant block
    pub fn set_push_constants_pod<T: bytemuck::Pod>(
        &mut self,
        context: &GraphicsContext,
        cmd: &mut dyn CommandList,
        value: &T,
    ) -> Result<()> {
        self.set_push_constants(context, cmd, bytemuck::bytes_of(value))
    }

    /// Dispatch compute work groups
    ///
    /// Binds the current descriptor set first if it is not bound yet.
    pub fn dispatch(
        &mut self,
        _context: &GraphicsContext,
        cmd: &mut dyn CommandList,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(engine_validation!(SOURCE, "Pipeline '{}': dispatch without begin", self.name));
        }
        if let Some(missing) = self.bound_resources.iter().position(Option::is_none) {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': dispatch with binding {} never set", self.name, missing));
        }
        if cmd.bound_compute_pipeline() != Some(self.pipeline.id()) {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': another pipeline was bound on this command list, call rebind_descriptor_set",
                self.name));
        }
        if !self.set_bound || cmd.bound_descriptor_set() != Some(self.sets.current().set.id()) {
            self.bind_current_set(cmd)?;
        }

        cmd.dispatch(group_count_x, group_count_y, group_count_z)?;
        self.dispatch_count += 1;
        Ok(())
    }

    /// Finish recording
    ///
    /// Writes the end timestamp when this span is timed and marks the current
    /// set as in flight for the current frame. A later span of the same frame
    /// resumes that set as long as its bindings do not change.
    pub fn end(&mut self, _context: &GraphicsContext, cmd: &mut dyn CommandList) -> Result<()> {
        self.require_recording("end")?;
        if self.timing_span {
            if let Some(pool) = &self.query_pool {
                cmd.write_timestamp(pool, self.query_index + 1)?;
                self.timed_frame = Some(self.sync.frame);
            }
        }
        self.timing_span = false;
        self.sets.retire_current(self.sync.frame);
        self.last_submitted_frame = Some(self.sync.frame);
        self.state = RecordingState::Submitted;
        Ok(())
    }

    /// Re-issue the pipeline, push-constant and descriptor-set binds
    ///
    /// Required when another pipeline recorded on the same command list since
    /// this pipeline's last bind.
    pub fn rebind_descriptor_set(&mut self, _context: &GraphicsContext, cmd: &mut dyn CommandList) -> Result<()> {
        self.require_recording("rebind_descriptor_set")?;
        cmd.bind_compute_pipeline(&self.pipeline)?;
        if !self.push_constant_data.is_empty() {
            cmd.push_constants(&self.pipeline, 0, &self.push_constant_data)?;
        }
        self.bind_current_set(cmd)
    }

    /// Grow the ring by one freshly allocated set and make it current
    ///
    /// Fails with `PoolExhausted` when the ring is at capacity or the
    /// pipeline's dedicated pool is full.
    pub fn allocate_new_set(&mut self, context: &GraphicsContext) -> Result<()> {
        if self.sets.is_full() {
            engine_error!(SOURCE, "Pipeline '{}': all {} descriptor sets in flight",
                self.name, self.sets.capacity());
            return Err(Error::PoolExhausted(format!(
                "pipeline '{}' reached its limit of {} descriptor sets", self.name, self.sets.capacity())));
        }

        let set = {
            let mut device = context.device()?;
            allocate_set_with_fallback(
                &mut *device,
                &mut self.descriptor_pool,
                &mut self.dedicated_pool,
                &self.set_layout,
                dedicated_pool_desc(self.sets.capacity(), self.declaration.texture_input_count,
                    self.declaration.buffer_input_count),
                &self.name,
            )?
        };

        let index = self
            .sets
            .push(set, self.bound_resources.len())
            .ok_or_else(|| Error::PoolExhausted(format!("pipeline '{}' descriptor ring full", self.name)))?;
        engine_debug!(SOURCE, "Pipeline '{}': descriptor ring grew to {} sets", self.name, self.sets.len());
        self.switch_to(context, index)
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last measured GPU duration in milliseconds
    pub fn execution_time(&self) -> f32 {
        self.execution_time
    }

    /// Dispatches since the last `begin`
    pub fn dispatch_count(&self) -> u32 {
        self.dispatch_count
    }

    /// Output textures, one per output description, in declaration order
    pub fn output_buffers(&self) -> &[Arc<dyn Texture>] {
        &self.output_buffers
    }

    pub fn output(&self, index: usize) -> Option<&Arc<dyn Texture>> {
        self.output_buffers.get(index)
    }

    pub fn recording_state(&self) -> RecordingState {
        self.state
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn current_set_index(&self) -> usize {
        self.sets.current_index()
    }

    /// State of the descriptor set at `index`
    pub fn set_state(&self, index: usize) -> SetState {
        self.sets.slot(index).state
    }

    pub fn current_set(&self) -> &Arc<dyn DescriptorSet> {
        &self.sets.current().set
    }

    pub fn push_constant_size(&self) -> u32 {
        self.declaration.push_constant_size
    }

    pub fn texture_input_count(&self) -> u32 {
        self.declaration.texture_input_count
    }

    pub fn buffer_input_count(&self) -> u32 {
        self.declaration.buffer_input_count
    }

    pub fn shader_id(&self) -> &str {
        &self.declaration.shader_id
    }

    /// Start query of this pipeline's timestamp pair (end is `query_index + 1`)
    pub fn query_index(&self) -> u32 {
        self.query_index
    }

    /// Query pool written this frame, if the frame is timed
    pub fn query_pool(&self) -> Option<&Arc<dyn QueryPool>> {
        self.query_pool.as_ref()
    }

    pub fn compute_pipeline(&self) -> &Arc<dyn ComputePipeline> {
        &self.pipeline
    }

    pub fn set_layout(&self) -> &Arc<dyn DescriptorSetLayout> {
        &self.set_layout
    }

    pub fn descriptor_pool(&self) -> &Arc<dyn DescriptorPool> {
        &self.descriptor_pool
    }

    /// Whether sets now come from a pool owned by this pipeline
    pub fn uses_dedicated_pool(&self) -> bool {
        self.dedicated_pool
    }

    // ===== FACTORY HOOKS =====

    pub(crate) fn declaration(&self) -> &PipelineDeclaration {
        &self.declaration
    }

    pub(crate) fn timing_slot(&self) -> u32 {
        self.timing_slot
    }

    pub(crate) fn last_submitted_frame(&self) -> Option<u64> {
        self.last_submitted_frame
    }

    pub(crate) fn open_frame(
        &mut self,
        frame: u64,
        completed_through: Option<u64>,
        query_pool: Option<Arc<dyn QueryPool>>,
    ) {
        self.sync = FrameSync { frame, completed_through, open: true };
        self.query_pool = query_pool;
        self.state = RecordingState::Idle;
    }

    /// Close the frame; returns the timing slot if this pipeline wrote its queries
    pub(crate) fn close_frame(&mut self) -> Option<u32> {
        let frame = self.sync.frame;
        self.sync.open = false;
        self.query_pool = None;
        (self.timed_frame == Some(frame)).then_some(self.timing_slot)
    }

    /// Close an open span without recording its end
    ///
    /// Everything the span recorded belongs to the current frame.
    pub(crate) fn abandon_span(&mut self) {
        if self.state != RecordingState::Recording {
            return;
        }
        self.timing_span = false;
        self.sets.retire_current(self.sync.frame);
        self.last_submitted_frame = Some(self.sync.frame);
        self.state = RecordingState::Submitted;
    }

    pub(crate) fn set_completed_through(&mut self, completed_through: Option<u64>) {
        self.sync.completed_through = completed_through;
    }

    pub(crate) fn set_execution_time(&mut self, milliseconds: f32) {
        self.execution_time = milliseconds;
    }

    // ===== INTERNALS =====

    fn require_recording(&self, operation: &str) -> Result<()> {
        if self.state != RecordingState::Recording {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': {} outside begin/end", self.name, operation));
        }
        Ok(())
    }

    fn check_push_constants(&self, data: &[u8]) -> Result<()> {
        let declared = self.declaration.push_constant_size as usize;
        if declared == 0 && !data.is_empty() {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': push constants given but none declared", self.name));
        }
        if data.is_empty() {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': empty push-constant block", self.name));
        }
        if data.len() > declared {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': push constants of {} bytes exceed declared {} bytes",
                self.name, data.len(), declared));
        }
        if data.len() % 4 != 0 {
            return Err(engine_validation!(SOURCE,
                "Pipeline '{}': push-constant size {} is not a multiple of 4", self.name, data.len()));
        }
        Ok(())
    }

    /// Pick a set for the next span, growing the ring if every set is in flight
    ///
    /// With `resume_current`, a current set already referenced by this frame
    /// is kept; it stays read-only for the rest of the frame.
    fn acquire_set(&mut self, context: &GraphicsContext, resume_current: bool) -> Result<()> {
        self.sets.reclaim(self.sync.completed_through);
        if resume_current && self.sets.current().state == SetState::InFlight(self.sync.frame) {
            self.set_bound = false;
            return Ok(());
        }
        match self.sets.find_reusable() {
            Some(index) => self.switch_to(context, index),
            None => self.allocate_new_set(context),
        }
    }

    /// Make `index` current and bring its contents up to date with the bound resources
    fn switch_to(&mut self, context: &GraphicsContext, index: usize) -> Result<()> {
        if index != self.sets.current_index() {
            if let SetState::Recording { .. } = self.sets.current().state {
                self.sets.retire_current(self.sync.frame);
            }
            self.sets.set_current(index);
        }
        self.set_bound = false;
        self.write_carried_bindings(context)?;
        if self.state == RecordingState::Recording {
            self.sets.current_mut().state = SetState::Recording { bound: false };
        }
        Ok(())
    }

    fn write_carried_bindings(&mut self, context: &GraphicsContext) -> Result<()> {
        let slot = self.sets.current_mut();
        let stale: Vec<usize> = self
            .bound_resources
            .iter()
            .enumerate()
            .filter(|(i, bound)| matches!(bound, Some(r) if slot.written[*i] != Some(r.id())))
            .map(|(i, _)| i)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        let mut device = context.device()?;
        for i in stale {
            if let Some(resource) = &self.bound_resources[i] {
                device.write_descriptor(slot.set.as_ref(), i as u32, resource.as_descriptor())?;
                slot.written[i] = Some(resource.id());
            }
        }
        Ok(())
    }

    fn bind_resource(&mut self, context: &GraphicsContext, binding: u32, resource: BoundResource) -> Result<()> {
        let index = binding as usize;
        let resource_id = resource.id();
        self.bound_resources[index] = Some(resource);

        if self.sets.current().written[index] == Some(resource_id) {
            return Ok(());
        }
        if let SetState::Recording { bound: true } = self.sets.current().state {
            // The command list references the current set: move to another one
            self.sets.retire_current(self.sync.frame);
            return self.acquire_set(context, false);
        }
        {
            let slot = self.sets.current_mut();
            let mut device = context.device()?;
            if let Some(bound) = &self.bound_resources[index] {
                device.write_descriptor(slot.set.as_ref(), binding, bound.as_descriptor())?;
            }
            slot.written[index] = Some(resource_id);
        }
        self.set_bound = false;
        Ok(())
    }

    fn bind_current_set(&mut self, cmd: &mut dyn CommandList) -> Result<()> {
        let slot = self.sets.current_mut();
        cmd.bind_descriptor_set(&self.pipeline, &slot.set)?;
        slot.state = SetState::Recording { bound: true };
        self.set_bound = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
