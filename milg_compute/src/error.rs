//! Error types for the milg compute core
//!
//! This module defines the error types used throughout the crate,
//! covering GPU object creation, validation of recording calls and
//! descriptor/query capacity.

use std::fmt;

/// Result type for milg compute operations
pub type Result<T> = std::result::Result<T, Error>;

/// milg compute errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock device, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, shader, etc.)
    InvalidResource(String),

    /// Initialization failed (factory, pools, pipeline objects)
    InitializationFailed(String),

    /// Recording call violated its contract (programmer error)
    ValidationError(String),

    /// Pipeline name already registered with a different declaration
    DuplicateName(String),

    /// Descriptor pool, query pool or descriptor-set ring is full
    PoolExhausted(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::DuplicateName(name) => write!(f, "Duplicate pipeline name: {}", name),
            Error::PoolExhausted(msg) => write!(f, "Pool exhausted: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether this error belongs to the programmer-error class
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::ValidationError(_) | Error::DuplicateName(_))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
