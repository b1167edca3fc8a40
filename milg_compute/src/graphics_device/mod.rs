/// Graphics device module - the GPU abstraction the compute core records through

// Module declarations
pub mod graphics_device;
pub mod texture;
pub mod buffer;
pub mod shader;
pub mod descriptor;
pub mod compute_pipeline;
pub mod query_pool;
pub mod command_list;

// Re-export everything from graphics_device.rs
pub use graphics_device::*;

// Re-export from other modules
pub use texture::*;
pub use buffer::*;
pub use shader::*;
pub use descriptor::*;
pub use compute_pipeline::*;
pub use query_pool::*;
pub use command_list::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
