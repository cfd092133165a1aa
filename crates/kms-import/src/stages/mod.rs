//! The stages of a blob import, in pipeline order: header, body, header
//! again, install.

pub mod body;
pub mod header;
pub mod install;

pub use body::BodyAuthStage;
pub use header::HeaderAuthStage;
pub use install::InstallStage;
