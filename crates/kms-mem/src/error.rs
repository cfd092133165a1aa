use kms_types::KmsError;

use crate::MemPtr;

/// Errors from allocator operations.
///
/// Only [`MemError::OutOfMemory`] is an allocation failure. The other
/// variants are corruption signals raised by `free`: they are reported to the
/// caller but the block has already been returned to the free set.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemError {
    /// No block large enough is available.
    #[error("out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },

    /// A header or footer canary no longer matches its constant.
    #[error("canary mismatch on {ptr:?} ({region})")]
    CanaryMismatch { ptr: MemPtr, region: &'static str },

    /// The pointer was already freed.
    #[error("double free of {0:?}")]
    DoubleFree(MemPtr),

    /// The pointer was never handed out by this allocator.
    #[error("free of unknown pointer {0:?}")]
    UnknownPointer(MemPtr),
}

/// Result alias for allocator operations.
pub type MemResult<T> = Result<T, MemError>;

impl From<MemError> for KmsError {
    fn from(err: MemError) -> Self {
        match err {
            MemError::OutOfMemory { .. } => KmsError::DeviceMemory,
            MemError::CanaryMismatch { .. }
            | MemError::DoubleFree(_)
            | MemError::UnknownPointer(_) => KmsError::DeviceError,
        }
    }
}
