//! Blob import pipeline of the key management service.
//!
//! A blob is a 320-byte signed header followed by an AES-CBC encrypted image
//! of serialized key objects. Importing one runs a fail-fast pipeline of
//! stages against a [`kms_token::Token`]:
//!
//! 1. header MAC check (ECDSA-P256-SHA256, verified twice),
//! 2. body check (decrypt in working chunks, SHA-256 against the header tag),
//! 3. header MAC check again,
//! 4. install (decrypt again, locate objects, store them in NVM).
//!
//! # Key Types
//!
//! - [`BlobImporter`]: the stage pipeline and its [`ImportReport`]
//! - [`BlobHeader`]: fixed-offset view of the header
//! - [`FlashReader`]: where the encrypted image is read from
//! - [`ImportStage`]: one step; [`HeaderAuthStage`], [`BodyAuthStage`] and
//!   [`InstallStage`] are built in
//!
//! # Design Rules
//!
//! - The pipeline refuses to start while any session is open.
//! - Every stage works through ephemeral token sessions and leaves none
//!   behind.
//! - Objects installed before a failure stay installed.

pub mod error;
pub mod flash;
pub mod header;
pub mod importer;
pub mod stage;
pub mod stages;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ImportError, ImportResult};
pub use flash::FlashReader;
pub use header::{BlobHeader, BLOB_HEADER_LEN, BLOB_MAGIC};
pub use importer::{import_blob, BlobImporter, ImportReport};
pub use stage::{ImportContext, ImportStage, StageDecision, StageResult};
pub use stages::{BodyAuthStage, HeaderAuthStage, InstallStage};
