/// Descriptor pools, set layouts and sets
///
/// A descriptor set binds concrete textures and buffers to the binding slots
/// a compute pipeline declares. Sets are allocated from a pool against a layout
/// and updated in place with `GraphicsDevice::write_descriptor`.

use crate::graphics_device::{ResourceId, Texture, Buffer};

// ============================================================================
// Binding types and layout description
// ============================================================================

/// Type of resource bound at a given slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Storage image (read/write image access, `General` layout)
    StorageImage,
    /// Storage buffer (read/write for compute shaders)
    StorageBuffer,
}

/// Description of a single binding slot within a set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Binding number (corresponds to `layout(binding = N)` in GLSL)
    pub binding: u32,
    /// Type of resource at this binding
    pub binding_type: BindingType,
}

/// Description of a descriptor-set layout, visible to the compute stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutDesc {
    /// Binding slot descriptions
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    /// Layout with `texture_count` storage images followed by `buffer_count` storage buffers
    ///
    /// Texture bindings occupy `[0, texture_count)`, buffer bindings
    /// `[texture_count, texture_count + buffer_count)`.
    pub fn compute_inputs(texture_count: u32, buffer_count: u32) -> Self {
        let textures = (0..texture_count).map(|binding| DescriptorBinding {
            binding,
            binding_type: BindingType::StorageImage,
        });
        let buffers = (texture_count..texture_count + buffer_count).map(|binding| DescriptorBinding {
            binding,
            binding_type: BindingType::StorageBuffer,
        });
        Self { bindings: textures.chain(buffers).collect() }
    }

    /// Number of bindings of `binding_type`
    pub fn count_of(&self, binding_type: BindingType) -> u32 {
        self.bindings.iter().filter(|b| b.binding_type == binding_type).count() as u32
    }
}

/// Capacity of a descriptor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    /// Maximum number of sets
    pub max_sets: u32,
    /// Total storage-image descriptors across all sets
    pub storage_images: u32,
    /// Total storage-buffer descriptors across all sets
    pub storage_buffers: u32,
}

// ============================================================================
// Binding resources
// ============================================================================

/// A concrete resource written into a descriptor set
pub enum DescriptorResource<'a> {
    /// Storage image binding (texture expected in `General` layout)
    StorageImage(&'a dyn Texture),
    /// Storage buffer binding (whole buffer)
    StorageBuffer(&'a dyn Buffer),
}

impl DescriptorResource<'_> {
    /// Binding type this resource fills
    pub fn binding_type(&self) -> BindingType {
        match self {
            DescriptorResource::StorageImage(_) => BindingType::StorageImage,
            DescriptorResource::StorageBuffer(_) => BindingType::StorageBuffer,
        }
    }

    /// Id of the bound resource
    pub fn resource_id(&self) -> ResourceId {
        match self {
            DescriptorResource::StorageImage(texture) => texture.id(),
            DescriptorResource::StorageBuffer(buffer) => buffer.id(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Descriptor pool trait
pub trait DescriptorPool: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;

    /// Capacity the pool was created with
    fn desc(&self) -> &DescriptorPoolDesc;
}

/// Descriptor-set layout trait
pub trait DescriptorSetLayout: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;

    /// Binding slots, in binding order
    fn bindings(&self) -> &[DescriptorBinding];
}

/// Descriptor set trait
///
/// Keeps its pool alive; the set is released with the pool.
pub trait DescriptorSet: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;
}
