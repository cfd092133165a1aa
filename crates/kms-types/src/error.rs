use thiserror::Error;

/// Standard `CKR_*` return values.
pub mod rv {
    pub const OK: u32 = 0x0000;
    pub const FUNCTION_FAILED: u32 = 0x0006;
    pub const ARGUMENTS_BAD: u32 = 0x0007;
    pub const CANT_LOCK: u32 = 0x000A;
    pub const ATTRIBUTE_SENSITIVE: u32 = 0x0011;
    pub const ATTRIBUTE_TYPE_INVALID: u32 = 0x0012;
    pub const ATTRIBUTE_VALUE_INVALID: u32 = 0x0013;
    pub const ACTION_PROHIBITED: u32 = 0x001B;
    pub const DATA_INVALID: u32 = 0x0020;
    pub const DATA_LEN_RANGE: u32 = 0x0021;
    pub const DEVICE_ERROR: u32 = 0x0030;
    pub const DEVICE_MEMORY: u32 = 0x0031;
    pub const FUNCTION_NOT_SUPPORTED: u32 = 0x0054;
    pub const KEY_HANDLE_INVALID: u32 = 0x0060;
    pub const KEY_SIZE_RANGE: u32 = 0x0062;
    pub const MECHANISM_INVALID: u32 = 0x0070;
    pub const MECHANISM_PARAM_INVALID: u32 = 0x0071;
    pub const OBJECT_HANDLE_INVALID: u32 = 0x0082;
    pub const OPERATION_ACTIVE: u32 = 0x0090;
    pub const OPERATION_NOT_INITIALIZED: u32 = 0x0091;
    pub const SESSION_COUNT: u32 = 0x00B1;
    pub const SESSION_HANDLE_INVALID: u32 = 0x00B3;
    pub const SESSION_PARALLEL_NOT_SUPPORTED: u32 = 0x00B4;
    pub const SIGNATURE_INVALID: u32 = 0x00C0;
    pub const SIGNATURE_LEN_RANGE: u32 = 0x00C1;
    pub const TEMPLATE_INCOMPLETE: u32 = 0x00D0;
    pub const DOMAIN_PARAMS_INVALID: u32 = 0x0130;
    pub const BUFFER_TOO_SMALL: u32 = 0x0150;
    pub const CRYPTOKI_NOT_INITIALIZED: u32 = 0x0190;
    pub const CRYPTOKI_ALREADY_INITIALIZED: u32 = 0x0191;
}

/// Errors returned by token operations.
///
/// Every variant corresponds to exactly one `CKR_*` code (see [`KmsError::rv`]).
/// `BufferTooSmall` is part of the length query/fill protocol rather than a
/// hard failure: it carries the number of bytes the caller must provide.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum KmsError {
    #[error("function failed")]
    FunctionFailed,

    #[error("bad arguments")]
    ArgumentsBad,

    #[error("cannot lock: registry full or locking unavailable")]
    CantLock,

    #[error("attribute is sensitive")]
    AttributeSensitive,

    #[error("attribute type invalid")]
    AttributeTypeInvalid,

    #[error("attribute value invalid")]
    AttributeValueInvalid,

    #[error("action prohibited")]
    ActionProhibited,

    #[error("data invalid")]
    DataInvalid,

    #[error("data length out of range")]
    DataLenRange,

    #[error("device error")]
    DeviceError,

    #[error("device memory exhausted")]
    DeviceMemory,

    #[error("function not supported")]
    FunctionNotSupported,

    #[error("key handle invalid")]
    KeyHandleInvalid,

    #[error("key size out of range")]
    KeySizeRange,

    #[error("mechanism invalid")]
    MechanismInvalid,

    #[error("mechanism parameter invalid")]
    MechanismParamInvalid,

    #[error("object handle invalid")]
    ObjectHandleInvalid,

    #[error("an operation is active")]
    OperationActive,

    #[error("operation not initialized")]
    OperationNotInitialized,

    #[error("too many sessions")]
    SessionCount,

    #[error("session handle invalid")]
    SessionHandleInvalid,

    #[error("parallel sessions not supported")]
    SessionParallelNotSupported,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("signature length out of range")]
    SignatureLenRange,

    #[error("template incomplete")]
    TemplateIncomplete,

    #[error("domain parameters invalid")]
    DomainParamsInvalid,

    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("token not initialized")]
    CryptokiNotInitialized,

    #[error("token already initialized")]
    CryptokiAlreadyInitialized,
}

impl KmsError {
    /// The `CKR_*` value for this error.
    pub fn rv(&self) -> u32 {
        match self {
            Self::FunctionFailed => rv::FUNCTION_FAILED,
            Self::ArgumentsBad => rv::ARGUMENTS_BAD,
            Self::CantLock => rv::CANT_LOCK,
            Self::AttributeSensitive => rv::ATTRIBUTE_SENSITIVE,
            Self::AttributeTypeInvalid => rv::ATTRIBUTE_TYPE_INVALID,
            Self::AttributeValueInvalid => rv::ATTRIBUTE_VALUE_INVALID,
            Self::ActionProhibited => rv::ACTION_PROHIBITED,
            Self::DataInvalid => rv::DATA_INVALID,
            Self::DataLenRange => rv::DATA_LEN_RANGE,
            Self::DeviceError => rv::DEVICE_ERROR,
            Self::DeviceMemory => rv::DEVICE_MEMORY,
            Self::FunctionNotSupported => rv::FUNCTION_NOT_SUPPORTED,
            Self::KeyHandleInvalid => rv::KEY_HANDLE_INVALID,
            Self::KeySizeRange => rv::KEY_SIZE_RANGE,
            Self::MechanismInvalid => rv::MECHANISM_INVALID,
            Self::MechanismParamInvalid => rv::MECHANISM_PARAM_INVALID,
            Self::ObjectHandleInvalid => rv::OBJECT_HANDLE_INVALID,
            Self::OperationActive => rv::OPERATION_ACTIVE,
            Self::OperationNotInitialized => rv::OPERATION_NOT_INITIALIZED,
            Self::SessionCount => rv::SESSION_COUNT,
            Self::SessionHandleInvalid => rv::SESSION_HANDLE_INVALID,
            Self::SessionParallelNotSupported => rv::SESSION_PARALLEL_NOT_SUPPORTED,
            Self::SignatureInvalid => rv::SIGNATURE_INVALID,
            Self::SignatureLenRange => rv::SIGNATURE_LEN_RANGE,
            Self::TemplateIncomplete => rv::TEMPLATE_INCOMPLETE,
            Self::DomainParamsInvalid => rv::DOMAIN_PARAMS_INVALID,
            Self::BufferTooSmall { .. } => rv::BUFFER_TOO_SMALL,
            Self::CryptokiNotInitialized => rv::CRYPTOKI_NOT_INITIALIZED,
            Self::CryptokiAlreadyInitialized => rv::CRYPTOKI_ALREADY_INITIALIZED,
        }
    }
}

/// Result alias for token operations.
pub type KmsResult<T> = Result<T, KmsError>;

/// Collapse a result into its `CKR_*` value.
pub fn to_rv<T>(result: &KmsResult<T>) -> u32 {
    match result {
        Ok(_) => rv::OK,
        Err(e) => e.rv(),
    }
}
