//! Foundation types for the key management service (KMS).
//!
//! This crate provides the handle, attribute, mechanism, and result types
//! shared by every other KMS crate. The API shape follows PKCS#11 (Cryptoki):
//! numeric identifiers keep their standard values so objects and mechanisms
//! can be exchanged with standard tooling.
//!
//! # Key Types
//!
//! - [`ObjectHandle`] / [`SessionHandle`]: opaque integer handles
//! - [`ObjectRange`] / [`HandleRange`]: storage tiers owning handle intervals
//! - [`Attribute`] / [`AttributeType`]: TLV attribute records of a key object
//! - [`Mechanism`] / [`MechanismType`]: algorithm selection plus parameters
//! - [`KmsError`]: the return-code taxonomy, convertible to `CKR_*` values

pub mod attribute;
pub mod error;
pub mod handle;
pub mod info;
pub mod mechanism;

pub use attribute::{find_in_template, Attribute, AttributeType, KeyType, ObjectClass};
pub use error::{rv, to_rv, KmsError, KmsResult};
pub use handle::{HandleRange, ObjectHandle, ObjectRange, SessionHandle};
pub use info::{SessionFlags, SessionInfo, SessionState, TokenInfo};
pub use mechanism::{
    CcmParams, EcdhParams, GcmParams, Mechanism, MechanismFlags, MechanismInfo, MechanismParams,
    MechanismType,
};
