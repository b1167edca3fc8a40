/// Conversions from milg device types to Vulkan enums and flags
///
/// Pure functions, testable without a GPU.

use milg_compute::milg::device::{
    TextureFormat, TextureUsage, ImageLayout, BufferUsage, BindingType, DescriptorPoolDesc,
};
use ash::vk;

pub(crate) fn texture_format_to_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::R16G16B16A16_SFLOAT => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
        TextureFormat::R32_UINT => vk::Format::R32_UINT,
        TextureFormat::R16_SFLOAT => vk::Format::R16_SFLOAT,
    }
}

pub(crate) fn texture_usage_to_vk(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(crate) fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

pub(crate) fn binding_type_to_vk(binding_type: BindingType) -> vk::DescriptorType {
    match binding_type {
        BindingType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

pub(crate) fn image_layout_to_vk(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    }
}

// ===== Barrier masks =====

/// Accesses a texture in `layout` may be subject to
pub(crate) fn layout_access_mask(layout: ImageLayout) -> vk::AccessFlags {
    match layout {
        ImageLayout::Undefined => vk::AccessFlags::empty(),
        ImageLayout::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ImageLayout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        ImageLayout::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

/// Pipeline stages that use a texture in `layout`
pub(crate) fn layout_stage(layout: ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        ImageLayout::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        ImageLayout::General | ImageLayout::ShaderReadOnly => {
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        }
        ImageLayout::TransferSrc | ImageLayout::TransferDst => vk::PipelineStageFlags::TRANSFER,
    }
}

/// Pool sizes for a descriptor pool; Vulkan rejects zero-sized entries
pub(crate) fn pool_sizes(desc: &DescriptorPoolDesc) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = Vec::with_capacity(2);
    if desc.storage_images > 0 {
        sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: desc.storage_images,
        });
    }
    if desc.storage_buffers > 0 {
        sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: desc.storage_buffers,
        });
    }
    sizes
}

#[cfg(test)]
#[path = "vulkan_format_tests.rs"]
mod tests;
