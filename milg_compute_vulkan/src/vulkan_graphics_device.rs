/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Wraps a logical device created by the application. The device creates the
/// GPU memory allocator and every compute object the pipeline core asks for;
/// queues, command pools and submission stay with the application.

use milg_compute::milg::{Result, Error};
use milg_compute::milg::device::{
    GraphicsDevice, Texture as DeviceTexture, Buffer as DeviceBuffer, Shader as DeviceShader,
    DescriptorPool as DevicePool, DescriptorSetLayout as DeviceSetLayout, DescriptorSet as DeviceSet,
    ComputePipeline as DevicePipeline, QueryPool as DeviceQueryPool,
    TextureDesc, TextureInfo, BufferDesc, ShaderDesc, ShaderStage, DescriptorPoolDesc,
    DescriptorSetLayoutDesc, DescriptorResource, ComputePipelineDesc, QueryPoolDesc,
    ImageLayout, LayoutTag, next_resource_id,
};
use milg_compute::{engine_bail, engine_debug, engine_err, engine_info, engine_validation, engine_warn};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use rustc_hash::FxHashMap;
use std::ffi::CString;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_texture::Texture;
use crate::vulkan_buffer::Buffer;
use crate::vulkan_shader::Shader;
use crate::vulkan_descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSet};
use crate::vulkan_compute_pipeline::ComputePipeline;
use crate::vulkan_query_pool::{QueryPool, decode_results};
use crate::vulkan_format::{
    texture_format_to_vk, texture_usage_to_vk, buffer_usage_to_vk, binding_type_to_vk, pool_sizes,
};

const SOURCE: &str = "milg::vulkan";

/// Vulkan graphics device
pub struct VulkanGraphicsDevice {
    /// Shared GPU context (device + allocator)
    ctx: Arc<GpuContext>,
    /// Nanoseconds per timestamp tick (`VkPhysicalDeviceLimits::timestampPeriod`)
    timestamp_period: f32,
    /// Meaningful bits of a timestamp on the compute queue
    timestamp_valid_bits: u32,
    /// Set layouts shared by pipelines declaring the same bindings
    layout_cache: FxHashMap<DescriptorSetLayoutDesc, Arc<dyn DeviceSetLayout>>,
}

impl VulkanGraphicsDevice {
    /// Create a graphics device on top of an existing logical device
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the device was created from
    /// * `physical_device` - Physical device backing `device`
    /// * `device` - Logical device (owned by the caller, must outlive every created object)
    /// * `queue_family_index` - Queue family compute work is submitted to
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let Some(family) = families.get(queue_family_index as usize) else {
            engine_bail!(SOURCE, "Queue family {} does not exist ({} families)",
                queue_family_index, families.len());
        };
        if !family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            engine_bail!(SOURCE, "Queue family {} does not support compute", queue_family_index);
        }
        if family.timestamp_valid_bits == 0 {
            engine_warn!(SOURCE, "Queue family {} has no timestamp support, execution times will stay at 0",
                queue_family_index);
        }
        if properties.limits.timestamp_compute_and_graphics == vk::FALSE {
            engine_warn!(SOURCE, "Device does not guarantee timestamps on all compute queues");
        }

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| engine_err!(SOURCE, "Failed to create GPU allocator: {:?}", e))?;

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unknown>".to_string());
        engine_info!(SOURCE, "Compute device '{}' ready (timestamp period {} ns, {} valid bits)",
            device_name, properties.limits.timestamp_period, family.timestamp_valid_bits);

        Ok(Self {
            ctx: Arc::new(GpuContext::new(device, allocator)),
            timestamp_period: properties.limits.timestamp_period,
            timestamp_valid_bits: family.timestamp_valid_bits,
            layout_cache: FxHashMap::default(),
        })
    }

    /// Shared GPU context (device and allocator)
    pub fn gpu_context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Logical device
    pub fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    /// Number of distinct descriptor-set layouts created so far
    pub fn cached_layout_count(&self) -> usize {
        self.layout_cache.len()
    }

    fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<gpu_allocator::vulkan::Allocation> {
        let mut allocator = self.ctx.allocator.lock()
            .map_err(|_| engine_err!(SOURCE, "GPU allocator lock poisoned"))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                engine_warn!(SOURCE, "Allocation of '{}' ({} bytes) failed: {:?}", name, requirements.size, e);
                Error::OutOfMemory
            })
    }

    fn free_memory(&self, allocation: gpu_allocator::vulkan::Allocation) {
        if let Ok(mut allocator) = self.ctx.allocator.lock() {
            allocator.free(allocation).ok();
        }
    }
}

// ===== Backend downcasts =====
//
// Every object handed to this device was created by it, so the trait objects
// are known to be the Vulkan types.

unsafe fn as_vk_pool(pool: &dyn DevicePool) -> &DescriptorPool {
    &*(pool as *const dyn DevicePool as *const DescriptorPool)
}

unsafe fn as_vk_layout(layout: &dyn DeviceSetLayout) -> &DescriptorSetLayout {
    &*(layout as *const dyn DeviceSetLayout as *const DescriptorSetLayout)
}

unsafe fn as_vk_set(set: &dyn DeviceSet) -> &DescriptorSet {
    &*(set as *const dyn DeviceSet as *const DescriptorSet)
}

unsafe fn as_vk_shader(shader: &dyn DeviceShader) -> &Shader {
    &*(shader as *const dyn DeviceShader as *const Shader)
}

unsafe fn as_vk_texture(texture: &dyn DeviceTexture) -> &Texture {
    &*(texture as *const dyn DeviceTexture as *const Texture)
}

unsafe fn as_vk_buffer(buffer: &dyn DeviceBuffer) -> &Buffer {
    &*(buffer as *const dyn DeviceBuffer as *const Buffer)
}

unsafe fn as_vk_query_pool(pool: &dyn DeviceQueryPool) -> &QueryPool {
    &*(pool as *const dyn DeviceQueryPool as *const QueryPool)
}

impl GraphicsDevice for VulkanGraphicsDevice {
    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn DeviceTexture>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "texture '{}' has zero size ({}x{})", desc.name, desc.width, desc.height)));
        }
        let device = &self.ctx.device;
        let format = texture_format_to_vk(desc.format);

        unsafe {
            // Create image
            let image_create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(texture_usage_to_vk(desc.usage))
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = device.create_image(&image_create_info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create image '{}': {:?}", desc.name, e))?;

            // Allocate and bind memory
            let requirements = device.get_image_memory_requirements(image);
            let allocation = match self.allocate_memory(&desc.name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.destroy_image(image, None);
                    return Err(e);
                }
            };
            if let Err(e) = device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                self.free_memory(allocation);
                device.destroy_image(image, None);
                engine_bail!(SOURCE, "Failed to bind image memory for '{}': {:?}", desc.name, e);
            }

            // Create image view
            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = match device.create_image_view(&view_create_info, None) {
                Ok(view) => view,
                Err(e) => {
                    self.free_memory(allocation);
                    device.destroy_image(image, None);
                    engine_bail!(SOURCE, "Failed to create image view for '{}': {:?}", desc.name, e);
                }
            };

            Ok(Arc::new(Texture {
                id: next_resource_id(),
                image,
                view,
                allocation: Some(allocation),
                ctx: Arc::clone(&self.ctx),
                info: TextureInfo::from_desc(&desc),
                layout: LayoutTag::new(ImageLayout::Undefined),
            }))
        }
    }

    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn DeviceBuffer>> {
        if desc.size == 0 {
            return Err(Error::InvalidResource("buffer size must be non-zero".to_string()));
        }
        let device = &self.ctx.device;

        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(buffer_usage_to_vk(desc.usage) | vk::BufferUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = device.create_buffer(&buffer_create_info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create buffer: {:?}", e))?;

            let requirements = device.get_buffer_memory_requirements(buffer);
            let allocation = match self.allocate_memory("buffer", requirements, MemoryLocation::CpuToGpu, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.free_memory(allocation);
                device.destroy_buffer(buffer, None);
                engine_bail!(SOURCE, "Failed to bind buffer memory: {:?}", e);
            }

            Ok(Arc::new(Buffer::new(Arc::clone(&self.ctx), buffer, allocation, desc.size)))
        }
    }

    fn create_shader(&mut self, desc: ShaderDesc<'_>) -> Result<Arc<dyn DeviceShader>> {
        if desc.stage != ShaderStage::Compute {
            return Err(Error::InvalidResource(format!("unsupported shader stage {:?}", desc.stage)));
        }
        let entry_point = CString::new(desc.entry_point.as_str())
            .map_err(|_| Error::InvalidResource(format!("invalid entry point '{}'", desc.entry_point)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(desc.code);
        let module = unsafe { self.ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create shader module: {:?}", e))?;

        Ok(Arc::new(Shader {
            id: next_resource_id(),
            module,
            entry_point,
            ctx: Arc::clone(&self.ctx),
        }))
    }

    fn create_descriptor_pool(&mut self, desc: DescriptorPoolDesc) -> Result<Arc<dyn DevicePool>> {
        let mut sizes = pool_sizes(&desc);
        if sizes.is_empty() {
            // Pools need at least one size entry even when every layout is empty
            sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            });
        }

        // Sets go back to the pool when their pipeline is removed
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(desc.max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { self.ctx.device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor pool: {:?}", e))?;

        engine_debug!(SOURCE, "Descriptor pool created ({} sets, {} images, {} buffers)",
            desc.max_sets, desc.storage_images, desc.storage_buffers);

        Ok(Arc::new(DescriptorPool {
            id: next_resource_id(),
            pool,
            desc,
            ctx: Arc::clone(&self.ctx),
        }))
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: DescriptorSetLayoutDesc,
    ) -> Result<Arc<dyn DeviceSetLayout>> {
        if let Some(layout) = self.layout_cache.get(&desc) {
            return Ok(Arc::clone(layout));
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc.bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding_type_to_vk(binding.binding_type))
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.ctx.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))?;

        let layout: Arc<dyn DeviceSetLayout> = Arc::new(DescriptorSetLayout {
            id: next_resource_id(),
            layout,
            bindings: desc.bindings.clone(),
            ctx: Arc::clone(&self.ctx),
        });
        self.layout_cache.insert(desc, Arc::clone(&layout));
        Ok(layout)
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: &Arc<dyn DevicePool>,
        layout: &Arc<dyn DeviceSetLayout>,
    ) -> Result<Arc<dyn DeviceSet>> {
        let vk_pool = unsafe { as_vk_pool(pool.as_ref()) };
        let vk_layout = unsafe { as_vk_layout(layout.as_ref()) };

        let set_layouts = [vk_layout.layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk_pool.pool)
            .set_layouts(&set_layouts);

        let sets = match unsafe { self.ctx.device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => sets,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                engine_debug!(SOURCE, "Descriptor pool {} exhausted", pool.id());
                return Err(Error::PoolExhausted(format!("descriptor pool {} has no space left", pool.id())));
            }
            Err(e) => engine_bail!(SOURCE, "Failed to allocate descriptor set: {:?}", e),
        };
        let Some(&set) = sets.first() else {
            engine_bail!(SOURCE, "Descriptor set allocation returned no set");
        };

        Ok(Arc::new(DescriptorSet {
            id: next_resource_id(),
            set,
            bindings: vk_layout.bindings.clone(),
            pool_handle: vk_pool.pool,
            ctx: Arc::clone(&self.ctx),
            _pool: Arc::clone(pool),
        }))
    }

    fn write_descriptor(
        &mut self,
        set: &dyn DeviceSet,
        binding: u32,
        resource: DescriptorResource<'_>,
    ) -> Result<()> {
        let vk_set = unsafe { as_vk_set(set) };

        let declared = vk_set.bindings.iter().find(|b| b.binding == binding);
        match declared {
            Some(b) if b.binding_type == resource.binding_type() => {}
            Some(b) => {
                return Err(engine_validation!(SOURCE,
                    "Binding {} of set {} is {:?}, got {:?}", binding, set.id(), b.binding_type,
                    resource.binding_type()));
            }
            None => {
                return Err(engine_validation!(SOURCE, "Set {} has no binding {}", set.id(), binding));
            }
        }

        let write = vk::WriteDescriptorSet::default()
            .dst_set(vk_set.set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(binding_type_to_vk(resource.binding_type()));

        match resource {
            DescriptorResource::StorageImage(texture) => {
                let vk_texture = unsafe { as_vk_texture(texture) };
                let image_info = [vk::DescriptorImageInfo::default()
                    .image_view(vk_texture.view)
                    .image_layout(vk::ImageLayout::GENERAL)];
                let write = write.image_info(&image_info);
                unsafe { self.ctx.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorResource::StorageBuffer(buffer) => {
                let vk_buffer = unsafe { as_vk_buffer(buffer) };
                let buffer_info = [vk::DescriptorBufferInfo::default()
                    .buffer(vk_buffer.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)];
                let write = write.buffer_info(&buffer_info);
                unsafe { self.ctx.device.update_descriptor_sets(&[write], &[]) };
            }
        }
        Ok(())
    }

    fn create_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> Result<Arc<dyn DevicePipeline>> {
        let device = &self.ctx.device;
        let shader = unsafe { as_vk_shader(desc.shader.as_ref()) };
        let set_layout = unsafe { as_vk_layout(desc.set_layout.as_ref()) };

        // Pipeline layout: set 0 plus an optional push-constant range
        let set_layouts = [set_layout.layout];
        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: desc.push_constant_size,
        }];
        let mut layout_create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if desc.push_constant_size > 0 {
            layout_create_info = layout_create_info.push_constant_ranges(&push_ranges);
        }
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create pipeline layout: {:?}", e))?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.module)
            .name(&shader.entry_point);
        let pipeline_create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline_layout);

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_create_info], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) if !pipelines.is_empty() => pipelines[0],
            Ok(_) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                engine_bail!(SOURCE, "Compute pipeline creation returned no pipeline");
            }
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                engine_bail!(SOURCE, "Failed to create compute pipeline: {:?}", e);
            }
        };

        Ok(Arc::new(ComputePipeline {
            id: next_resource_id(),
            pipeline,
            pipeline_layout,
            push_constant_size: desc.push_constant_size,
            ctx: Arc::clone(&self.ctx),
            _set_layout: desc.set_layout,
            _shader: desc.shader,
        }))
    }

    fn create_query_pool(&mut self, desc: QueryPoolDesc) -> Result<Arc<dyn DeviceQueryPool>> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(desc.query_count);
        let pool = unsafe { self.ctx.device.create_query_pool(&create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create timestamp query pool: {:?}", e))?;

        Ok(Arc::new(QueryPool {
            id: next_resource_id(),
            pool,
            query_count: desc.query_count,
            ctx: Arc::clone(&self.ctx),
        }))
    }

    fn query_results(&self, pool: &dyn DeviceQueryPool, first: u32, count: u32) -> Result<Vec<Option<u64>>> {
        if first.checked_add(count).map_or(true, |end| end > pool.query_count()) {
            return Err(engine_validation!(SOURCE,
                "Query range {}+{} outside pool of {} queries", first, count, pool.query_count()));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let vk_pool = unsafe { as_vk_query_pool(pool) };

        let mut raw = vec![[0u64; 2]; count as usize];
        let result = unsafe {
            self.ctx.device.get_query_pool_results(
                vk_pool.pool,
                first,
                &mut raw,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        };
        match result {
            // NOT_READY still fills every available query
            Ok(()) | Err(vk::Result::NOT_READY) => Ok(decode_results(&raw, self.timestamp_valid_bits)),
            Err(e) => engine_bail!(SOURCE, "Failed to read timestamp queries: {:?}", e),
        }
    }

    fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.ctx.device
                .device_wait_idle()
                .map_err(|e| engine_err!(SOURCE, "Failed to wait idle: {:?}", e))
        }
    }
}
