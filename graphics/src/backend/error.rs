//! Backend error types.

use thiserror::Error;

/// Errors that can occur in backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The device was removed or reset.
    #[error("device removed: {reason}")]
    DeviceRemoved { reason: String },
    /// Failed to create an object.
    #[error("object creation failed: {0}")]
    CreationFailed(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// A raw handle does not name a live object.
    #[error("invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    /// A fence wait can never be satisfied.
    #[error("fence {fence} will never reach value {value}")]
    WaitNeverSignaled { fence: u64, value: u64 },
    /// The requested feature is not supported.
    #[error("feature not supported: {0}")]
    Unsupported(String),
}
