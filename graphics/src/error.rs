//! Graphics error types.

use thiserror::Error;

use crate::backend::BackendError;
use crate::types::DescriptorHeapType;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// The GPU device was removed; every later operation is a no-op.
    #[error("GPU device removed")]
    DeviceRemoved,
    /// A shader-visible heap cannot hold a single request even when empty.
    #[error("{heap_type:?} heap cannot hold {requested} descriptors (capacity {capacity})")]
    OutOfDescriptors {
        heap_type: DescriptorHeapType,
        requested: u32,
        capacity: u32,
    },
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The backend reported an error.
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for GraphicsError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceRemoved { .. } => Self::DeviceRemoved,
            other => Self::Backend(other),
        }
    }
}

impl GraphicsError {
    /// Returns true for errors that leave the device unusable.
    pub fn is_device_removed(&self) -> bool {
        matches!(self, Self::DeviceRemoved)
    }
}
