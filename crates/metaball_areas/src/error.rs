//! Error types for the compositing pipeline and its configuration.

use std::io;
use thiserror::Error;

/// Result alias used across the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures that stop a frame (or the whole configuration) from compositing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A buffer or texture could not be created. Fatal for the current configuration.
    #[error("failed to allocate {label}: {reason}")]
    ResourceAllocation { label: &'static str, reason: String },

    /// A frame was requested while no complete resource set is allocated.
    #[error("pipeline resources are not allocated; reconfigure before rendering")]
    ResourcesUnavailable,

    /// The backend has no entry point for the requested kernel.
    #[error("kernel `{kernel}` is not provided by backend `{backend}`")]
    UnsupportedKernel {
        kernel: &'static str,
        backend: &'static str,
    },

    /// A kernel was dispatched without one of its required parameters.
    #[error("kernel `{kernel}` dispatched without binding `{slot}`")]
    MissingBinding {
        kernel: &'static str,
        slot: &'static str,
    },

    /// A slot was bound to a resource of the wrong kind.
    #[error("kernel `{kernel}` expects {expected} at `{slot}`")]
    BindingMismatch {
        kernel: &'static str,
        slot: &'static str,
        expected: &'static str,
    },

    /// Read and write area bindings refer to the same buffer.
    #[error("kernel `{kernel}` reads and writes the same area buffer")]
    AliasedAreaBuffers { kernel: &'static str },

    /// A handle that was released (or never created by this backend).
    #[error("resource handle {id} is not live")]
    StaleHandle { id: u32 },

    /// Uploaded data does not fit the destination resource.
    #[error("{label}: expected {expected} elements, got {found}")]
    SizeMismatch {
        label: &'static str,
        expected: usize,
        found: usize,
    },

    /// Copying a texture back from the render device failed.
    #[error("texture readback failed: {reason}")]
    Readback { reason: String },
}

impl PipelineError {
    /// Allocation failures and missing resources invalidate the configuration;
    /// everything else only drops the current frame.
    pub fn is_configuration_fatal(&self) -> bool {
        matches!(
            self,
            Self::ResourceAllocation { .. } | Self::ResourcesUnavailable
        )
    }
}

/// Errors raised while loading settings from disk.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
}
