/// Texture - Vulkan implementation of the Texture trait

use milg_compute::milg::device::{
    Texture as DeviceTexture, TextureInfo, ImageLayout, LayoutTag, ResourceId,
};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan texture implementation (2D, single mip, single layer)
pub struct Texture {
    pub(crate) id: ResourceId,
    /// Vulkan image
    pub(crate) image: vk::Image,
    /// Vulkan image view (used for storage-image descriptors)
    pub(crate) view: vk::ImageView,
    /// GPU memory allocation
    pub(crate) allocation: Option<Allocation>,
    /// Shared GPU context (for cleanup)
    pub(crate) ctx: Arc<GpuContext>,
    /// Read-only texture properties
    pub(crate) info: TextureInfo,
    /// Host-tracked layout
    pub(crate) layout: LayoutTag,
}

impl DeviceTexture for Texture {
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

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            // Destroy image view
            self.ctx.device.destroy_image_view(self.view, None);

            // Free GPU memory
            if let Some(allocation) = self.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }

            // Destroy image
            self.ctx.device.destroy_image(self.image, None);
        }
    }
}
