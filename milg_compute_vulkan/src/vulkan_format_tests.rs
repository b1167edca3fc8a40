//! Unit tests for Vulkan conversion functions
//!
//! Pure mappings between milg device types and Vulkan enums, no GPU required.

use super::*;

// ============================================================================
// TEXTURE FORMAT / USAGE
// ============================================================================

#[test]
fn test_texture_format_to_vk() {
    assert_eq!(texture_format_to_vk(TextureFormat::R8G8B8A8_UNORM), vk::Format::R8G8B8A8_UNORM);
    assert_eq!(texture_format_to_vk(TextureFormat::B8G8R8A8_UNORM), vk::Format::B8G8R8A8_UNORM);
    assert_eq!(texture_format_to_vk(TextureFormat::R16G16B16A16_SFLOAT), vk::Format::R16G16B16A16_SFLOAT);
    assert_eq!(texture_format_to_vk(TextureFormat::R32G32B32A32_SFLOAT), vk::Format::R32G32B32A32_SFLOAT);
    assert_eq!(texture_format_to_vk(TextureFormat::R32_SFLOAT), vk::Format::R32_SFLOAT);
    assert_eq!(texture_format_to_vk(TextureFormat::R32_UINT), vk::Format::R32_UINT);
    assert_eq!(texture_format_to_vk(TextureFormat::R16_SFLOAT), vk::Format::R16_SFLOAT);
}

#[test]
fn test_texture_usage_to_vk() {
    assert_eq!(texture_usage_to_vk(TextureUsage::empty()), vk::ImageUsageFlags::empty());
    assert_eq!(texture_usage_to_vk(TextureUsage::STORAGE), vk::ImageUsageFlags::STORAGE);

    let output = TextureUsage::STORAGE | TextureUsage::SAMPLED | TextureUsage::TRANSFER_SRC;
    assert_eq!(
        texture_usage_to_vk(output),
        vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC
    );
    assert!(texture_usage_to_vk(TextureUsage::all()).contains(vk::ImageUsageFlags::TRANSFER_DST));
}

// ============================================================================
// BUFFERS AND DESCRIPTORS
// ============================================================================

#[test]
fn test_buffer_usage_to_vk() {
    assert_eq!(buffer_usage_to_vk(BufferUsage::Storage), vk::BufferUsageFlags::STORAGE_BUFFER);
    assert_eq!(buffer_usage_to_vk(BufferUsage::Uniform), vk::BufferUsageFlags::UNIFORM_BUFFER);
}

#[test]
fn test_binding_type_to_vk() {
    assert_eq!(binding_type_to_vk(BindingType::StorageImage), vk::DescriptorType::STORAGE_IMAGE);
    assert_eq!(binding_type_to_vk(BindingType::StorageBuffer), vk::DescriptorType::STORAGE_BUFFER);
}

#[test]
fn test_pool_sizes_skip_empty_types() {
    let sizes = pool_sizes(&DescriptorPoolDesc { max_sets: 8, storage_images: 0, storage_buffers: 16 });
    assert_eq!(sizes.len(), 1);
    assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_BUFFER);
    assert_eq!(sizes[0].descriptor_count, 16);

    let sizes = pool_sizes(&DescriptorPoolDesc { max_sets: 8, storage_images: 4, storage_buffers: 4 });
    assert_eq!(sizes.len(), 2);
    assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);

    assert!(pool_sizes(&DescriptorPoolDesc { max_sets: 1, storage_images: 0, storage_buffers: 0 }).is_empty());
}

// ============================================================================
// LAYOUTS AND BARRIERS
// ============================================================================

#[test]
fn test_image_layout_to_vk() {
    assert_eq!(image_layout_to_vk(ImageLayout::Undefined), vk::ImageLayout::UNDEFINED);
    assert_eq!(image_layout_to_vk(ImageLayout::General), vk::ImageLayout::GENERAL);
    assert_eq!(image_layout_to_vk(ImageLayout::ShaderReadOnly), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(image_layout_to_vk(ImageLayout::TransferSrc), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    assert_eq!(image_layout_to_vk(ImageLayout::TransferDst), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
}

#[test]
fn test_general_layout_allows_compute_read_write() {
    let access = layout_access_mask(ImageLayout::General);
    assert!(access.contains(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE));
    assert!(layout_stage(ImageLayout::General).contains(vk::PipelineStageFlags::COMPUTE_SHADER));
}

#[test]
fn test_undefined_layout_has_no_prior_access() {
    assert_eq!(layout_access_mask(ImageLayout::Undefined), vk::AccessFlags::empty());
    assert_eq!(layout_stage(ImageLayout::Undefined), vk::PipelineStageFlags::TOP_OF_PIPE);
}

#[test]
fn test_transfer_layouts_use_transfer_stage() {
    assert_eq!(layout_stage(ImageLayout::TransferSrc), vk::PipelineStageFlags::TRANSFER);
    assert_eq!(layout_access_mask(ImageLayout::TransferDst), vk::AccessFlags::TRANSFER_WRITE);
}
