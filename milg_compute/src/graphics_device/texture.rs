/// Texture trait, texture descriptor, texture info and layout tracking

use std::sync::atomic::{AtomicU8, Ordering};
use bitflags::bitflags;

use crate::error::Result;
use crate::graphics_device::ResourceId;

/// Texture pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TextureFormat {
    R8G8B8A8_UNORM,
    B8G8R8A8_UNORM,
    R16G16B16A16_SFLOAT,
    R32G32B32A32_SFLOAT,
    R32_SFLOAT,
    R32_UINT,
    R16_SFLOAT,
}

impl TextureFormat {
    /// Returns size in bytes of one texel
    pub fn texel_size_bytes(&self) -> u32 {
        match self {
            TextureFormat::R16_SFLOAT => 2,
            TextureFormat::R8G8B8A8_UNORM
            | TextureFormat::B8G8R8A8_UNORM
            | TextureFormat::R32_SFLOAT
            | TextureFormat::R32_UINT => 4,
            TextureFormat::R16G16B16A16_SFLOAT => 8,
            TextureFormat::R32G32B32A32_SFLOAT => 16,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Read/write from compute shaders (storage image)
        const STORAGE = 0x01;
        /// Sampled from shaders
        const SAMPLED = 0x02;
        /// Source of copies and blits
        const TRANSFER_SRC = 0x04;
        /// Destination of copies and uploads
        const TRANSFER_DST = 0x08;
    }
}

/// Layout a texture is currently in, as tracked by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ImageLayout {
    /// Contents undefined (freshly created)
    Undefined = 0,
    /// Storage-image access from compute shaders
    General = 1,
    /// Sampled read access
    ShaderReadOnly = 2,
    /// Copy/blit source
    TransferSrc = 3,
    /// Copy/upload destination
    TransferDst = 4,
}

impl ImageLayout {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ImageLayout::General,
            2 => ImageLayout::ShaderReadOnly,
            3 => ImageLayout::TransferSrc,
            4 => ImageLayout::TransferDst,
            _ => ImageLayout::Undefined,
        }
    }

    /// Usage a texture must have been created with to enter this layout
    pub fn required_usage(&self) -> TextureUsage {
        match self {
            ImageLayout::Undefined => TextureUsage::empty(),
            ImageLayout::General => TextureUsage::STORAGE,
            ImageLayout::ShaderReadOnly => TextureUsage::SAMPLED,
            ImageLayout::TransferSrc => TextureUsage::TRANSFER_SRC,
            ImageLayout::TransferDst => TextureUsage::TRANSFER_DST,
        }
    }
}

// ===== TEXTURE DESC =====

/// Descriptor for creating a texture
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: TextureFormat,
    /// Usage flags
    pub usage: TextureUsage,
    /// Debug name
    pub name: String,
}

// ===== TEXTURE INFO =====

/// Read-only properties of a created texture.
///
/// Returned by `Texture::info()` to query texture properties
/// without exposing backend-specific details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: TextureFormat,
    /// Usage flags
    pub usage: TextureUsage,
}

impl TextureInfo {
    /// Build the info of a texture created from `desc`
    pub fn from_desc(desc: &TextureDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
        }
    }
}

// ===== LAYOUT TAG =====

/// Interior-mutable current-layout tag stored in backend textures
#[derive(Debug)]
pub struct LayoutTag(AtomicU8);

impl LayoutTag {
    pub fn new(layout: ImageLayout) -> Self {
        Self(AtomicU8::new(layout as u8))
    }

    pub fn get(&self) -> ImageLayout {
        ImageLayout::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, layout: ImageLayout) {
        self.0.store(layout as u8, Ordering::Release);
    }
}

impl Default for LayoutTag {
    fn default() -> Self {
        Self::new(ImageLayout::Undefined)
    }
}

// ===== TEXTURE TRAIT =====

/// Texture resource trait
///
/// Implemented by backend-specific texture types (e.g., VulkanTexture).
/// Shared through `Arc`; the texture is destroyed when the last owner drops it.
pub trait Texture: Send + Sync {
    /// Process-unique id
    fn id(&self) -> ResourceId;

    /// Get the read-only properties of this texture
    fn info(&self) -> &TextureInfo;

    /// Layout the texture will be in once previously recorded work executes
    fn layout(&self) -> ImageLayout;

    /// Update the layout tag (called by command lists after recording a barrier)
    fn set_layout(&self, layout: ImageLayout);
}

/// Check that `texture` may move to `new_layout`
///
/// Shared by every command list implementation before recording a barrier.
pub fn validate_transition(texture: &dyn Texture, new_layout: ImageLayout) -> Result<()> {
    if new_layout == ImageLayout::Undefined {
        return Err(crate::engine_validation!("milg::Texture",
            "Texture {} cannot transition to Undefined", texture.id()));
    }
    let required = new_layout.required_usage();
    if !texture.info().usage.contains(required) {
        return Err(crate::engine_validation!("milg::Texture",
            "Texture {} ({:?}) lacks usage {:?} required for layout {:?}",
            texture.id(), texture.info().usage, required, new_layout));
    }
    Ok(())
}
