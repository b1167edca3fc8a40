/// Mock graphics device for unit tests (no GPU required)
///
/// Records every created object and every recorded command so the pipeline
/// core can be tested without a real GPU. Timestamp queries are simulated:
/// a `MockCommandList` keeps a tick clock, and `execute()` plays the recorded
/// query resets and writes into the pools the way a GPU would on submit.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::graphics_device::{
    GraphicsDevice, GraphicsContext, InMemoryShaderLibrary, ResourceId, next_resource_id, SPIRV_MAGIC,
    Texture, Buffer, Shader, DescriptorPool, DescriptorSetLayout, DescriptorSet,
    ComputePipeline, QueryPool, CommandList,
    TextureDesc, TextureInfo, TextureFormat, TextureUsage, ImageLayout, LayoutTag,
    BufferDesc, ShaderDesc, ShaderStage, DescriptorPoolDesc, DescriptorSetLayoutDesc,
    DescriptorBinding, DescriptorResource, ComputePipelineDesc, QueryPoolDesc,
    validate_transition,
};
use crate::engine_bail;

// ============================================================================
// Mock Texture
// ============================================================================

#[derive(Debug)]
pub struct MockTexture {
    pub id: ResourceId,
    pub info: TextureInfo,
    pub name: String,
    layout: LayoutTag,
}

impl MockTexture {
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: TextureUsage, name: &str) -> Self {
        Self {
            id: next_resource_id(),
            info: TextureInfo { width, height, format, usage },
            name: name.to_string(),
            layout: LayoutTag::default(),
        }
    }

    /// Storage + sampled RGBA8 texture, the common compute input
    pub fn storage(width: u32, height: u32, name: &str) -> Self {
        Self::new(width, height, TextureFormat::R8G8B8A8_UNORM,
            TextureUsage::STORAGE | TextureUsage::SAMPLED, name)
    }
}

impl Texture for MockTexture {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn layout(&self) -> ImageLayout {
        self.layout.get()
    }

    fn set_layout(&self, layout: ImageLayout) {
        self.layout.set(layout);
    }
}

// ============================================================================
// Mock Buffer
// ============================================================================

#[derive(Debug)]
pub struct MockBuffer {
    pub id: ResourceId,
    pub size: u64,
    pub data: Mutex<Vec<u8>>,
}

impl MockBuffer {
    pub fn new(size: u64) -> Self {
        Self {
            id: next_resource_id(),
            size,
            data: Mutex::new(vec![0; size as usize]),
        }
    }
}

impl Buffer for MockBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.size {
            engine_bail!("milg::mock", "Buffer update out of range ({} > {})", end, self.size);
        }
        let mut bytes = self.data.lock().unwrap();
        bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}

// ============================================================================
// Mock Shader
// ============================================================================

#[derive(Debug)]
pub struct MockShader {
    pub id: ResourceId,
    pub word_count: usize,
    pub entry_point: String,
}

impl Shader for MockShader {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn stage(&self) -> ShaderStage {
        ShaderStage::Compute
    }
}

// ============================================================================
// Mock descriptor objects
// ============================================================================

#[derive(Debug)]
pub struct MockDescriptorPool {
    pub id: ResourceId,
    pub desc: DescriptorPoolDesc,
    pub allocated: AtomicU32,
}

impl DescriptorPool for MockDescriptorPool {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn desc(&self) -> &DescriptorPoolDesc {
        &self.desc
    }
}

#[derive(Debug)]
pub struct MockDescriptorSetLayout {
    pub id: ResourceId,
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout for MockDescriptorSetLayout {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

pub struct MockDescriptorSet {
    pub id: ResourceId,
    pub pool_id: ResourceId,
    pub bindings: Vec<DescriptorBinding>,
    /// Resource id written at each binding
    pub contents: Mutex<Vec<Option<ResourceId>>>,
    pool: Arc<dyn DescriptorPool>,
}

impl DescriptorSet for MockDescriptorSet {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Drop for MockDescriptorSet {
    fn drop(&mut self) {
        // Give the slot back, as a FREE_DESCRIPTOR_SET pool does
        let mock_pool = unsafe { &*(self.pool.as_ref() as *const dyn DescriptorPool as *const MockDescriptorPool) };
        mock_pool.allocated.fetch_sub(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Mock ComputePipeline / QueryPool
// ============================================================================

#[derive(Debug)]
pub struct MockComputePipeline {
    pub id: ResourceId,
    pub shader_id: ResourceId,
    pub set_layout_id: ResourceId,
    pub push_constant_size: u32,
}

impl ComputePipeline for MockComputePipeline {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

/// Query storage shared between a pool and the command lists writing it
pub type MockQueryStorage = Arc<Mutex<Vec<Option<u64>>>>;

#[derive(Debug)]
pub struct MockQueryPool {
    pub id: ResourceId,
    pub query_count: u32,
    pub values: MockQueryStorage,
}

impl QueryPool for MockQueryPool {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn query_count(&self) -> u32 {
        self.query_count
    }
}

fn as_mock_query_pool(pool: &dyn QueryPool) -> &MockQueryPool {
    unsafe { &*(pool as *const dyn QueryPool as *const MockQueryPool) }
}

// ============================================================================
// Mock CommandList
// ============================================================================

/// One recorded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCommand {
    BindComputePipeline(ResourceId),
    BindDescriptorSet { pipeline: ResourceId, set: ResourceId },
    PushConstants { offset: u32, data: Vec<u8> },
    Dispatch(u32, u32, u32),
    ResetQueryPool { pool: ResourceId, first: u32, count: u32 },
    WriteTimestamp { pool: ResourceId, query: u32, ticks: u64 },
    Transition { texture: ResourceId, from: ImageLayout, to: ImageLayout },
}

enum PendingQueryOp {
    Reset { storage: MockQueryStorage, first: u32, count: u32 },
    Write { storage: MockQueryStorage, query: u32, ticks: u64 },
}

pub struct MockCommandList {
    pub commands: Vec<MockCommand>,
    /// Simulated GPU clock, in timestamp ticks
    pub clock: u64,
    bound_pipeline: Option<ResourceId>,
    bound_set: Option<ResourceId>,
    pending: Vec<PendingQueryOp>,
}

impl MockCommandList {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            clock: 0,
            bound_pipeline: None,
            bound_set: None,
            pending: Vec::new(),
        }
    }

    /// Advance the simulated GPU clock
    pub fn advance_clock(&mut self, ticks: u64) {
        self.clock += ticks;
    }

    /// Simulate GPU execution of everything recorded since the last call
    ///
    /// Query resets and timestamp writes land in their pools in recording order.
    pub fn execute(&mut self) {
        for op in self.pending.drain(..) {
            match op {
                PendingQueryOp::Reset { storage, first, count } => {
                    let mut values = storage.lock().unwrap();
                    for v in values.iter_mut().skip(first as usize).take(count as usize) {
                        *v = None;
                    }
                }
                PendingQueryOp::Write { storage, query, ticks } => {
                    storage.lock().unwrap()[query as usize] = Some(ticks);
                }
            }
        }
    }

    /// Begin a fresh command buffer: forget recorded commands and bound state
    ///
    /// Unexecuted query operations are discarded, as for a command buffer
    /// that is never submitted.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.pending.clear();
        self.bound_pipeline = None;
        self.bound_set = None;
    }

    /// Number of recorded dispatches
    pub fn dispatch_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, MockCommand::Dispatch(..))).count()
    }

    /// Position of the first command matching `predicate`
    pub fn position(&self, predicate: impl Fn(&MockCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(predicate)
    }
}

impl Default for MockCommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandList for MockCommandList {
    fn bind_compute_pipeline(&mut self, pipeline: &Arc<dyn ComputePipeline>) -> Result<()> {
        if self.bound_pipeline != Some(pipeline.id()) {
            self.bound_set = None;
        }
        self.bound_pipeline = Some(pipeline.id());
        self.commands.push(MockCommand::BindComputePipeline(pipeline.id()));
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        pipeline: &Arc<dyn ComputePipeline>,
        set: &Arc<dyn DescriptorSet>,
    ) -> Result<()> {
        if self.bound_pipeline != Some(pipeline.id()) {
            engine_bail!("milg::mock", "bind_descriptor_set with pipeline {} not bound", pipeline.id());
        }
        self.bound_set = Some(set.id());
        self.commands.push(MockCommand::BindDescriptorSet { pipeline: pipeline.id(), set: set.id() });
        Ok(())
    }

    fn push_constants(&mut self, pipeline: &Arc<dyn ComputePipeline>, offset: u32, data: &[u8]) -> Result<()> {
        if offset as usize + data.len() > pipeline.push_constant_size() as usize {
            engine_bail!("milg::mock", "push_constants outside the declared range");
        }
        self.commands.push(MockCommand::PushConstants { offset, data: data.to_vec() });
        Ok(())
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) -> Result<()> {
        if self.bound_pipeline.is_none() || self.bound_set.is_none() {
            engine_bail!("milg::mock", "dispatch without bound pipeline and descriptor set");
        }
        self.commands.push(MockCommand::Dispatch(group_count_x, group_count_y, group_count_z));
        Ok(())
    }

    fn reset_query_pool(&mut self, pool: &Arc<dyn QueryPool>, first: u32, count: u32) -> Result<()> {
        let mock_pool = as_mock_query_pool(pool.as_ref());
        self.pending.push(PendingQueryOp::Reset { storage: mock_pool.values.clone(), first, count });
        self.commands.push(MockCommand::ResetQueryPool { pool: pool.id(), first, count });
        Ok(())
    }

    fn write_timestamp(&mut self, pool: &Arc<dyn QueryPool>, query: u32) -> Result<()> {
        if query >= pool.query_count() {
            engine_bail!("milg::mock", "timestamp query {} out of range", query);
        }
        let mock_pool = as_mock_query_pool(pool.as_ref());
        self.pending.push(PendingQueryOp::Write { storage: mock_pool.values.clone(), query, ticks: self.clock });
        self.commands.push(MockCommand::WriteTimestamp { pool: pool.id(), query, ticks: self.clock });
        Ok(())
    }

    fn transition_texture(&mut self, texture: &dyn Texture, new_layout: ImageLayout) -> Result<()> {
        validate_transition(texture, new_layout)?;
        let from = texture.layout();
        if from == new_layout {
            return Ok(());
        }
        self.commands.push(MockCommand::Transition { texture: texture.id(), from, to: new_layout });
        texture.set_layout(new_layout);
        Ok(())
    }

    fn bound_compute_pipeline(&self) -> Option<ResourceId> {
        self.bound_pipeline
    }

    fn bound_descriptor_set(&self) -> Option<ResourceId> {
        self.bound_set
    }
}

// ============================================================================
// Mock GraphicsDevice
// ============================================================================

pub struct MockGraphicsDevice {
    pub textures: Vec<TextureDesc>,
    pub buffers_created: u32,
    pub shaders_created: u32,
    pub descriptor_pools: Vec<DescriptorPoolDesc>,
    pub set_layouts: Vec<Vec<DescriptorBinding>>,
    pub sets_allocated: u32,
    /// (set, binding, resource) for every descriptor write
    pub descriptor_writes: Vec<(ResourceId, u32, ResourceId)>,
    /// Push-constant size of every created compute pipeline
    pub compute_pipelines: Vec<u32>,
    pub query_pools: Vec<u32>,
    /// Nanoseconds per tick reported by `timestamp_period`
    pub period: f32,
    pub fail_texture: bool,
    pub fail_compute_pipeline: bool,
    pub fail_query_pool: bool,
    wait_idle_calls: AtomicU32,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self {
            textures: Vec::new(),
            buffers_created: 0,
            shaders_created: 0,
            descriptor_pools: Vec::new(),
            set_layouts: Vec::new(),
            sets_allocated: 0,
            descriptor_writes: Vec::new(),
            compute_pipelines: Vec::new(),
            query_pools: Vec::new(),
            period: 1.0,
            fail_texture: false,
            fail_compute_pipeline: false,
            fail_query_pool: false,
            wait_idle_calls: AtomicU32::new(0),
        }
    }

    pub fn wait_idle_calls(&self) -> u32 {
        self.wait_idle_calls.load(Ordering::Relaxed)
    }
}

impl Default for MockGraphicsDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn Texture>> {
        if self.fail_texture {
            return Err(Error::OutOfMemory);
        }
        let texture = MockTexture::new(desc.width, desc.height, desc.format, desc.usage, &desc.name);
        self.textures.push(desc);
        Ok(Arc::new(texture))
    }

    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn Buffer>> {
        self.buffers_created += 1;
        Ok(Arc::new(MockBuffer::new(desc.size)))
    }

    fn create_shader(&mut self, desc: ShaderDesc<'_>) -> Result<Arc<dyn Shader>> {
        if desc.code.first() != Some(&SPIRV_MAGIC) {
            engine_bail!("milg::mock", "create_shader: not a SPIR-V module");
        }
        self.shaders_created += 1;
        Ok(Arc::new(MockShader {
            id: next_resource_id(),
            word_count: desc.code.len(),
            entry_point: desc.entry_point,
        }))
    }

    fn create_descriptor_pool(&mut self, desc: DescriptorPoolDesc) -> Result<Arc<dyn DescriptorPool>> {
        self.descriptor_pools.push(desc);
        Ok(Arc::new(MockDescriptorPool {
            id: next_resource_id(),
            desc,
            allocated: AtomicU32::new(0),
        }))
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: DescriptorSetLayoutDesc,
    ) -> Result<Arc<dyn DescriptorSetLayout>> {
        self.set_layouts.push(desc.bindings.clone());
        Ok(Arc::new(MockDescriptorSetLayout {
            id: next_resource_id(),
            bindings: desc.bindings,
        }))
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: &Arc<dyn DescriptorPool>,
        layout: &Arc<dyn DescriptorSetLayout>,
    ) -> Result<Arc<dyn DescriptorSet>> {
        let mock_pool = unsafe { &*(pool.as_ref() as *const dyn DescriptorPool as *const MockDescriptorPool) };
        if mock_pool.allocated.load(Ordering::Relaxed) >= mock_pool.desc.max_sets {
            return Err(Error::PoolExhausted(format!("mock pool {} is full", mock_pool.id)));
        }
        mock_pool.allocated.fetch_add(1, Ordering::Relaxed);
        self.sets_allocated += 1;
        Ok(Arc::new(MockDescriptorSet {
            id: next_resource_id(),
            pool_id: pool.id(),
            bindings: layout.bindings().to_vec(),
            contents: Mutex::new(vec![None; layout.bindings().len()]),
            pool: pool.clone(),
        }))
    }

    fn write_descriptor(
        &mut self,
        set: &dyn DescriptorSet,
        binding: u32,
        resource: DescriptorResource<'_>,
    ) -> Result<()> {
        let mock_set = unsafe { &*(set as *const dyn DescriptorSet as *const MockDescriptorSet) };
        let slot = mock_set.bindings.iter().position(|b| b.binding == binding);
        match slot {
            Some(index) if mock_set.bindings[index].binding_type == resource.binding_type() => {
                mock_set.contents.lock().unwrap()[index] = Some(resource.resource_id());
                self.descriptor_writes.push((set.id(), binding, resource.resource_id()));
                Ok(())
            }
            _ => Err(Error::InvalidResource(format!("binding {} does not accept {:?}", binding, resource.binding_type()))),
        }
    }

    fn create_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> Result<Arc<dyn ComputePipeline>> {
        if self.fail_compute_pipeline {
            engine_bail!("milg::mock", "create_compute_pipeline failed (forced)");
        }
        self.compute_pipelines.push(desc.push_constant_size);
        Ok(Arc::new(MockComputePipeline {
            id: next_resource_id(),
            shader_id: desc.shader.id(),
            set_layout_id: desc.set_layout.id(),
            push_constant_size: desc.push_constant_size,
        }))
    }

    fn create_query_pool(&mut self, desc: QueryPoolDesc) -> Result<Arc<dyn QueryPool>> {
        if self.fail_query_pool {
            engine_bail!("milg::mock", "create_query_pool failed (forced)");
        }
        self.query_pools.push(desc.query_count);
        Ok(Arc::new(MockQueryPool {
            id: next_resource_id(),
            query_count: desc.query_count,
            values: Arc::new(Mutex::new(vec![None; desc.query_count as usize])),
        }))
    }

    fn query_results(&self, pool: &dyn QueryPool, first: u32, count: u32) -> Result<Vec<Option<u64>>> {
        let values = as_mock_query_pool(pool).values.lock().unwrap();
        let end = first as usize + count as usize;
        if end > values.len() {
            engine_bail!("milg::mock", "query range {}..{} out of bounds", first, end);
        }
        Ok(values[first as usize..end].to_vec())
    }

    fn timestamp_period(&self) -> f32 {
        self.period
    }

    fn wait_idle(&self) -> Result<()> {
        self.wait_idle_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// Test helpers
// ============================================================================

/// Minimal valid SPIR-V header for tests
pub fn test_spirv() -> Vec<u32> {
    vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
}

/// Context over a fresh mock device, with `shader_ids` registered
pub fn mock_context(shader_ids: &[&str]) -> (GraphicsContext, Arc<Mutex<MockGraphicsDevice>>) {
    let device = Arc::new(Mutex::new(MockGraphicsDevice::new()));
    let shaders = Arc::new(InMemoryShaderLibrary::new());
    for id in shader_ids {
        shaders.register(id, test_spirv()).unwrap();
    }
    let context = GraphicsContext::new(device.clone(), shaders);
    (context, device)
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
