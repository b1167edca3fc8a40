/*!
# milg compute - Vulkan backend

Vulkan implementation of the milg compute device traits.

This crate provides a `GraphicsDevice` and a `CommandList` on top of a logical
device owned by the application, using the Ash library for Vulkan bindings and
gpu-allocator for memory management.

## Example

```no_run
use std::sync::{Arc, Mutex};
use ash::vk;
use milg_compute::milg::PipelineFactory;
use milg_compute::milg::device::{GraphicsContext, InMemoryShaderLibrary};
use milg_compute_vulkan::{VulkanGraphicsDevice, VulkanCommandList};

# fn run(instance: &ash::Instance, physical_device: vk::PhysicalDevice, device: ash::Device,
#        queue_family: u32, command_buffer: vk::CommandBuffer) -> milg_compute::milg::Result<()> {
let vulkan = VulkanGraphicsDevice::new(instance, physical_device, device, queue_family)?;
let mut cmd = VulkanCommandList::new(&vulkan, command_buffer);

let shaders = Arc::new(InMemoryShaderLibrary::new());
let context = GraphicsContext::new(Arc::new(Mutex::new(vulkan)), shaders);
let mut factory = PipelineFactory::create(&context)?;

factory.begin_frame(&mut cmd)?;
// ... record pipelines ...
factory.end_frame(&mut cmd)?;
# Ok(())
# }
```
*/

// Vulkan implementation modules
mod vulkan_context;
mod vulkan_format;
mod vulkan_texture;
mod vulkan_buffer;
mod vulkan_shader;
mod vulkan_descriptor;
mod vulkan_compute_pipeline;
mod vulkan_query_pool;
mod vulkan_graphics_device;
mod vulkan_command_list;
mod vulkan_debug;

pub use vulkan_context::GpuContext;
pub use vulkan_graphics_device::VulkanGraphicsDevice;
pub use vulkan_command_list::VulkanCommandList;

/// Validation-layer messenger and message statistics
pub mod debug {
    pub use crate::vulkan_debug::{
        ValidationStats, messenger_create_info, validation_stats, reset_validation_stats,
        vulkan_debug_callback,
    };
}
