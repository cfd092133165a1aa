//! Session manager and crypto operation dispatcher of the key management
//! token.
//!
//! A [`Token`] bundles the session table, the scratch-memory allocator, the
//! object store and a crypto backend. Callers open a session, run one
//! `Init` / `Update` / `Final` sequence at a time on it, and close it again.
//!
//! # Quick Start
//!
//! ```rust
//! use kms_token::{KmsConfig, Token};
//! use kms_types::{Mechanism, MechanismType, SessionFlags};
//!
//! let mut token = Token::new(KmsConfig::default()).unwrap();
//! token.initialize().unwrap();
//! let session = token.open_session(0, SessionFlags::SERIAL_SESSION, None).unwrap();
//!
//! token.digest_init(session, &Mechanism::new(MechanismType::SHA256)).unwrap();
//! token.digest_update(session, b"abc").unwrap();
//! let mut digest = [0u8; 32];
//! token.digest_final(session, Some(&mut digest)).unwrap();
//! ```
//!
//! # Key Types
//!
//! - [`Token`]: lifecycle, sessions, introspection and every operation family
//! - [`KmsConfig`]: the runtime feature and algorithm matrix, loaded from TOML
//! - [`SessionManager`] / [`Session`]: the fixed-size session table
//! - [`AttributeQuery`]: one query/fill slot of `get_attribute_value`
//!
//! # Design Rules
//!
//! - Output buffers follow the query/fill protocol: `None` asks for the
//!   length, a short buffer returns `BufferTooSmall` and leaves the operation
//!   running.
//! - Any other failure inside `Update`/`Final` ends the operation and frees
//!   its context. Calling `Update`/`Final` in the wrong state changes nothing.
//! - A disabled algorithm is `MechanismInvalid`; a disabled feature is
//!   `FunctionNotSupported`.

pub mod cipher;
pub mod config;
pub mod digest;
pub mod error;
pub mod keymgt;
pub mod locks;
pub mod objects;
pub mod session;
pub mod sign;
pub mod token;

pub use config::{
    AlgorithmConfig, EmbeddedAttribute, EmbeddedObject, FeatureConfig, Function, FunctionSet,
    ImportConfig, KmsConfig, LockConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use objects::AttributeQuery;
pub use session::{Session, SessionManager};
pub use token::{Token, TOKEN_LABEL, TOKEN_MANUFACTURER, TOKEN_MODEL};
