/// GpuContext - Shared GPU handles for all Vulkan objects
///
/// Contains everything a resource needs to create or destroy itself:
/// - Device for Vulkan API calls
/// - Allocator for memory management

use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Shared GPU context for all Vulkan resources.
///
/// Shared (via `Arc`) by every texture, buffer, pool and pipeline so each one
/// can release its Vulkan objects on drop.
///
/// The logical device itself belongs to the application: it must outlive
/// every `GpuContext` clone and is destroyed by the application afterwards.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop so memory is returned before the device goes away
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl GpuContext {
    /// Create a new GPU context
    ///
    /// # Arguments
    ///
    /// * `device` - Vulkan logical device
    /// * `allocator` - GPU memory allocator created for `device`
    pub fn new(device: ash::Device, allocator: Allocator) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // Last resource gone: free the allocator's memory blocks while the device is alive
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
        }
    }
}
