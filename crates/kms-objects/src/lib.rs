//! Key object storage for the key management service.
//!
//! A key object is a small self-describing record: a fixed header carrying
//! two ABI tags, followed by TLV attribute records padded to 4 bytes. Objects
//! live in storage tiers, each owning a disjoint interval of handles:
//! embedded ROM, NVM (static and dynamic), volatile RAM, and an external
//! token.
//!
//! # Key Types
//!
//! - [`KeyObject`] / [`ObjectBuilder`] / [`TlvCursor`]: bounds-checked codec
//! - [`ObjectStorage`]: trait implemented by every tier backend
//! - [`InMemoryStorage`] / [`FileStorage`]: RAM/ROM tables and a persisted NVM image
//! - [`ObjectStore`]: handle resolution, lookup, search, and creation
//! - [`LockRegistry`]: one-way latches on key handles and mechanisms
//! - [`ExternalToken`]: pass-through for the external-token ranges
//!
//! # Design Rules
//!
//! - Every read of an object goes through a validating parser; a
//!   [`KeyObject`] is well formed by construction.
//! - A locked handle is reported exactly like a missing one.
//! - Key material (`VALUE`, `EC_POINT`, RSA components) is stored word-packed
//!   (see [`words`]).

pub mod error;
pub mod ext;
pub mod file;
pub mod lock;
pub mod memory;
pub mod object;
pub mod ranges;
pub mod store;
pub mod traits;
pub mod words;

pub use error::{ObjectError, ObjectResult};
pub use ext::{ExternalToken, NoExternalToken};
pub use file::FileStorage;
pub use lock::LockRegistry;
pub use memory::InMemoryStorage;
pub use object::{
    padded_size, AttributeRef, KeyObject, ObjectBuilder, ObjectHeader, Packing, TlvCursor,
    ABI_CONFIGURATION, ABI_VERSION, HEADER_LEN,
};
pub use ranges::RangeConfig;
pub use store::ObjectStore;
pub use traits::ObjectStorage;
