/*!
# milg compute

Backend-agnostic core of the milg compute-pipeline manager.

This crate creates, caches and drives GPU compute pipelines through a small
trait-based device abstraction. Backend implementations (Vulkan) provide the
concrete GPU objects; the core only records through the traits.

## Architecture

- **GraphicsDevice**: Factory trait for creating GPU objects
- **CommandList**: Recording trait for compute commands, barriers and timestamps
- **Pipeline**: One compute program with its descriptor-set ring and output textures
- **PipelineFactory**: Named registry, shared descriptor pool and timestamp query ring

Backend implementations provide concrete types that implement these traits.
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod graphics_device;
pub mod pipeline;
pub mod utils;

// Main milg namespace module
pub mod milg {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton
    pub use crate::engine::Engine;

    // Factory and pipeline
    pub use crate::pipeline::{
        Pipeline, PipelineFactory, PipelineFactoryConfig,
        PipelineOutputDescription, PipelineTiming, RecordingState,
    };

    // Graphics device abstraction
    pub use crate::graphics_device::{GraphicsDevice, GraphicsContext, CommandList};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Device sub-module with every abstraction type
    pub mod device {
        pub use crate::graphics_device::*;
    }

    // Pipeline sub-module (rings and state enums)
    pub mod compute {
        pub use crate::pipeline::*;
    }
}
