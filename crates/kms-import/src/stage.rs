use std::time::Duration;

use kms_token::Token;
use kms_types::{KmsError, ObjectHandle, SessionFlags, SessionHandle};
use serde::Serialize;
use tracing::debug;

use crate::error::ImportResult;
use crate::flash::FlashReader;
use crate::header::BlobHeader;

// ---------------------------------------------------------------------------
// StageDecision / StageResult
// ---------------------------------------------------------------------------

/// The outcome of one import stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDecision {
    /// Proceed to the next stage.
    Pass,
    /// Abort the import. `error` is the code the import reports.
    Fail { reason: String, error: KmsError },
}

impl StageDecision {
    pub fn fail(error: KmsError, reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
            error,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Recorded result of a completed stage.
#[derive(Clone, Debug, Serialize)]
pub struct StageResult {
    pub stage_name: String,
    pub passed: bool,
    /// Populated on failure.
    pub reason: Option<String>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// ImportContext
// ---------------------------------------------------------------------------

/// Everything a stage can touch while the pipeline runs.
pub struct ImportContext<'a> {
    pub token: &'a mut Token,
    pub header: &'a BlobHeader,
    pub image: &'a dyn FlashReader,
    pub chunk_size: usize,
    /// Public key that checks the header MAC.
    pub verify_key: ObjectHandle,
    /// AES key that decrypts the image.
    pub decrypt_key: ObjectHandle,
    /// Objects installed so far, in blob order.
    pub installed: Vec<ObjectHandle>,
}

impl ImportContext<'_> {
    /// Open an ephemeral serial session on slot 0.
    pub fn open_session(&mut self) -> ImportResult<SessionHandle> {
        Ok(self.token.open_session(0, SessionFlags::SERIAL_SESSION, None)?)
    }

    /// Drop every session the stage opened, including ones stuck mid
    /// operation after an error.
    pub fn close_sessions(&mut self) {
        if let Err(e) = self.token.close_all_sessions(0) {
            debug!(error = %e, "import sessions not closed");
        }
    }
}

// ---------------------------------------------------------------------------
// ImportStage trait
// ---------------------------------------------------------------------------

/// One step of the import pipeline.
///
/// Authentication mismatches are reported as [`StageDecision::Fail`];
/// errors from the token, the flash image or the object codec propagate as
/// `Err` and also abort the import.
pub trait ImportStage {
    fn name(&self) -> &str;

    fn run(&self, ctx: &mut ImportContext<'_>) -> ImportResult<StageDecision>;
}
