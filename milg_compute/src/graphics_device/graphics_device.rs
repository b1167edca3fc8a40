/// GraphicsDevice trait - GPU object factory used by the compute core
///
/// Also holds the `GraphicsContext` handed to every pipeline call and the
/// shader library that resolves shader ids to SPIR-V.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::{
    Texture, Buffer, Shader, DescriptorPool, DescriptorSetLayout, DescriptorSet,
    ComputePipeline, QueryPool,
    TextureDesc, BufferDesc, ShaderDesc, DescriptorPoolDesc, DescriptorSetLayoutDesc,
    DescriptorResource, ComputePipelineDesc, QueryPoolDesc,
};
use crate::engine_error;

// ============================================================================
// Resource identity
// ============================================================================

/// Process-unique identifier carried by every GPU object
pub type ResourceId = u64;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out the next resource id (never 0)
pub fn next_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// GraphicsDevice trait
// ============================================================================

/// Main device trait
///
/// This is the factory interface for every GPU object the compute core needs.
/// Implemented by backend-specific devices (e.g., VulkanGraphicsDevice).
pub trait GraphicsDevice: Send + Sync {
    /// Create a texture
    ///
    /// The texture starts in `ImageLayout::Undefined`.
    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn Texture>>;

    /// Create a buffer
    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create a shader module from SPIR-V words
    fn create_shader(&mut self, desc: ShaderDesc<'_>) -> Result<Arc<dyn Shader>>;

    /// Create a descriptor pool
    fn create_descriptor_pool(&mut self, desc: DescriptorPoolDesc) -> Result<Arc<dyn DescriptorPool>>;

    /// Create a descriptor-set layout
    fn create_descriptor_set_layout(
        &mut self,
        desc: DescriptorSetLayoutDesc,
    ) -> Result<Arc<dyn DescriptorSetLayout>>;

    /// Allocate one descriptor set from `pool`
    ///
    /// # Returns
    ///
    /// `Error::PoolExhausted` when the pool has no capacity left. The set keeps
    /// its pool alive.
    fn allocate_descriptor_set(
        &mut self,
        pool: &Arc<dyn DescriptorPool>,
        layout: &Arc<dyn DescriptorSetLayout>,
    ) -> Result<Arc<dyn DescriptorSet>>;

    /// Write one resource into `set` at `binding`
    ///
    /// The set must not be referenced by a command buffer the GPU may still execute.
    fn write_descriptor(
        &mut self,
        set: &dyn DescriptorSet,
        binding: u32,
        resource: DescriptorResource<'_>,
    ) -> Result<()>;

    /// Create a compute pipeline (and its pipeline layout)
    fn create_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> Result<Arc<dyn ComputePipeline>>;

    /// Create a timestamp query pool
    fn create_query_pool(&mut self, desc: QueryPoolDesc) -> Result<Arc<dyn QueryPool>>;

    /// Read `count` timestamp queries starting at `first`, without waiting
    ///
    /// # Returns
    ///
    /// One entry per query; `None` means the value is not available yet.
    fn query_results(&self, pool: &dyn QueryPool, first: u32, count: u32) -> Result<Vec<Option<u64>>>;

    /// Nanoseconds per timestamp tick
    fn timestamp_period(&self) -> f32;

    /// Wait for all GPU operations to complete
    fn wait_idle(&self) -> Result<()>;
}

// ============================================================================
// Shader resolution
// ============================================================================

/// Resolves a shader id to compiled SPIR-V
///
/// Called once per pipeline creation; the returned code is treated as immutable.
pub trait ShaderLibrary: Send + Sync {
    /// SPIR-V words for `shader_id`
    fn resolve(&self, shader_id: &str) -> Result<Arc<[u32]>>;
}

/// SPIR-V magic number (first word of every module)
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader library backed by an in-memory map
#[derive(Default)]
pub struct InMemoryShaderLibrary {
    shaders: RwLock<FxHashMap<String, Arc<[u32]>>>,
}

impl InMemoryShaderLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Register SPIR-V words under `shader_id`, replacing any previous entry
    pub fn register(&self, shader_id: &str, words: Vec<u32>) -> Result<()> {
        if words.first() != Some(&SPIRV_MAGIC) {
            engine_error!("milg::ShaderLibrary", "Shader '{}' is not a SPIR-V module", shader_id);
            return Err(Error::InvalidResource(format!("shader '{}' is not SPIR-V", shader_id)));
        }
        let mut shaders = self.shaders.write()
            .map_err(|_| Error::BackendError("shader library lock poisoned".to_string()))?;
        shaders.insert(shader_id.to_string(), Arc::from(words));
        Ok(())
    }

    /// Register a little-endian SPIR-V byte stream (as read from a `.spv` file)
    pub fn register_bytes(&self, shader_id: &str, bytes: &[u8]) -> Result<()> {
        if bytes.len() % 4 != 0 {
            engine_error!("milg::ShaderLibrary",
                "Shader '{}' code not 4-byte aligned (size: {} bytes)", shader_id, bytes.len());
            return Err(Error::InvalidResource(format!("shader '{}' size is not a multiple of 4", shader_id)));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.register(shader_id, words)
    }

    /// Whether `shader_id` is registered
    pub fn contains(&self, shader_id: &str) -> bool {
        self.shaders.read().map(|s| s.contains_key(shader_id)).unwrap_or(false)
    }
}

impl ShaderLibrary for InMemoryShaderLibrary {
    fn resolve(&self, shader_id: &str) -> Result<Arc<[u32]>> {
        let shaders = self.shaders.read()
            .map_err(|_| Error::BackendError("shader library lock poisoned".to_string()))?;
        shaders.get(shader_id).cloned().ok_or_else(|| {
            engine_error!("milg::ShaderLibrary", "Unknown shader id '{}'", shader_id);
            Error::InvalidResource(format!("unknown shader id '{}'", shader_id))
        })
    }
}

// ============================================================================
// GraphicsContext
// ============================================================================

/// Shared handle bundling the device and the shader library
///
/// Cheap to clone; every clone refers to the same device.
#[derive(Clone)]
pub struct GraphicsContext {
    device: Arc<Mutex<dyn GraphicsDevice>>,
    shaders: Arc<dyn ShaderLibrary>,
}

impl GraphicsContext {
    /// Create a context from a shared device and a shader library
    pub fn new(device: Arc<Mutex<dyn GraphicsDevice>>, shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self { device, shaders }
    }

    /// Lock the device for object creation or descriptor writes
    pub fn device(&self) -> Result<MutexGuard<'_, dyn GraphicsDevice + 'static>> {
        self.device.lock().map_err(|_| {
            engine_error!("milg::GraphicsContext", "Graphics device lock poisoned");
            Error::BackendError("graphics device lock poisoned".to_string())
        })
    }

    /// Shader library used to resolve shader ids
    pub fn shaders(&self) -> &dyn ShaderLibrary {
        self.shaders.as_ref()
    }
}
