use kms_mem::MemError;
use kms_objects::ObjectError;
use kms_types::KmsError;

/// Errors that abort a blob import.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The token refused a call made on the pipeline's behalf.
    #[error("token: {0}")]
    Token(#[from] KmsError),

    /// The blob header is shorter than its fixed size.
    #[error("blob header is {len} bytes, expected {expected}")]
    HeaderLength { len: usize, expected: usize },

    /// The header does not start with the blob magic.
    #[error("bad blob magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// A read past the end of the flash image.
    #[error("flash read of {len} bytes at offset {offset} is out of bounds (image is {size} bytes)")]
    FlashRead { offset: usize, len: usize, size: usize },

    /// An object was cut off by the end of the blob.
    #[error("truncated object at blob offset {offset}: {reason}")]
    Truncated { offset: usize, reason: String },

    /// A decrypted object failed validation or could not be stored.
    #[error("object: {0}")]
    Object(#[from] ObjectError),

    #[error("memory: {0}")]
    Memory(#[from] MemError),
}

/// Result alias for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

impl From<ImportError> for KmsError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Token(e) => e,
            ImportError::HeaderLength { .. } | ImportError::BadMagic(_) => KmsError::ArgumentsBad,
            ImportError::FlashRead { .. } => KmsError::DeviceError,
            ImportError::Truncated { .. } => KmsError::DataInvalid,
            ImportError::Object(e) => e.into(),
            ImportError::Memory(e) => e.into(),
        }
    }
}
