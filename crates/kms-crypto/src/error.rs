use kms_types::KmsError;

/// Errors from the cryptographic backend.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The mechanism is not implemented by this backend.
    #[error("unsupported mechanism: {0}")]
    UnsupportedMechanism(String),

    /// Key bytes are unusable (wrong size, not on the curve, ...).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Mechanism parameters are unusable.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Input data is unusable for the operation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Input length is not valid for the mode (e.g. a partial block).
    #[error("data length out of range: {0}")]
    DataLength(String),

    /// AEAD tag check failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Signature check failed.
    #[error("signature invalid")]
    SignatureInvalid,

    /// Signature has the wrong length for the key.
    #[error("signature length {actual}, expected {expected}")]
    SignatureLength { expected: usize, actual: usize },

    /// The operation does not support this call.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Failure inside the underlying library.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Result alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for KmsError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnsupportedMechanism(_) => KmsError::MechanismInvalid,
            CryptoError::InvalidKey(_) | CryptoError::InvalidInput(_) => KmsError::ArgumentsBad,
            CryptoError::InvalidParameter(_) => KmsError::MechanismParamInvalid,
            CryptoError::DataLength(_) => KmsError::DataLenRange,
            CryptoError::AuthenticationFailed | CryptoError::Backend(_) => KmsError::FunctionFailed,
            CryptoError::SignatureInvalid => KmsError::SignatureInvalid,
            CryptoError::SignatureLength { .. } => KmsError::SignatureLenRange,
            CryptoError::Unsupported(_) => KmsError::FunctionNotSupported,
        }
    }
}
