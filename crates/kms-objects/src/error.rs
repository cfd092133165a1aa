use kms_mem::MemError;
use kms_types::{KmsError, ObjectHandle, ObjectRange};

/// Errors from object codec and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The byte stream ends before a complete header or attribute.
    #[error("truncated object at offset {offset}: {reason}")]
    Truncated { offset: usize, reason: String },

    /// The header does not carry the supported ABI version/configuration.
    #[error("unsupported object ABI: version {version:#010x}, configuration {configuration:#010x}")]
    BadAbi { version: u32, configuration: u32 },

    /// A caller-supplied argument is unusable.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Declared sizes disagree with the attribute records.
    #[error("malformed object: {0}")]
    Malformed(String),

    /// The target tier cannot be written.
    #[error("storage tier is read-only")]
    ReadOnly,

    /// No free handle is left in the target range.
    #[error("no free handle in {0}")]
    RangeFull(ObjectRange),

    /// No dynamic range is configured.
    #[error("no dynamic object range is enabled")]
    NoDynamicRange,

    /// The handle does not belong to the range the operation requires.
    #[error("handle {handle} is outside {range}")]
    OutOfRange {
        handle: ObjectHandle,
        range: ObjectRange,
    },

    /// A lock table is full.
    #[error("lock table full ({capacity} entries)")]
    LockTableFull { capacity: usize },

    /// Scratch allocation failed.
    #[error("memory: {0}")]
    Memory(#[from] MemError),

    /// The external token refused the operation.
    #[error("external token: {0}")]
    External(KmsError),

    /// Serialization or deserialization failure of a persisted image.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from a persisted backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;

impl From<ObjectError> for KmsError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::Truncated { .. }
            | ObjectError::BadAbi { .. }
            | ObjectError::Malformed(_) => KmsError::DataInvalid,
            ObjectError::InvalidArguments(_) => KmsError::ArgumentsBad,
            ObjectError::ReadOnly => KmsError::ActionProhibited,
            ObjectError::RangeFull(_) | ObjectError::NoDynamicRange => KmsError::DeviceMemory,
            ObjectError::OutOfRange { .. } => KmsError::ObjectHandleInvalid,
            ObjectError::LockTableFull { .. } => KmsError::CantLock,
            ObjectError::Memory(e) => e.into(),
            ObjectError::External(e) => e,
            ObjectError::Serialization(_) | ObjectError::Io(_) => KmsError::DeviceError,
        }
    }
}
