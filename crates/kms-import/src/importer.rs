use std::time::{Duration, Instant};

use kms_token::Token;
use kms_types::{KmsError, KmsResult, ObjectHandle};
use tracing::{info, warn};

use crate::error::ImportResult;
use crate::flash::FlashReader;
use crate::header::BlobHeader;
use crate::stage::{ImportContext, ImportStage, StageDecision, StageResult};
use crate::stages::{BodyAuthStage, HeaderAuthStage, InstallStage};

// ---------------------------------------------------------------------------
// ImportReport
// ---------------------------------------------------------------------------

/// The outcome of running a blob through the pipeline.
#[derive(Clone, Debug)]
pub struct ImportReport {
    /// Per-stage results in evaluation order. Stops at the first failure.
    pub stage_results: Vec<StageResult>,
    /// Objects stored before the pipeline finished or stopped. A failed
    /// install does not roll these back.
    pub installed: Vec<ObjectHandle>,
    /// Why the import stopped, if it did.
    pub error: Option<KmsError>,
    pub elapsed: Duration,
}

impl ImportReport {
    pub fn is_installed(&self) -> bool {
        self.error.is_none()
    }

    /// The import as a single return code.
    pub fn into_result(self) -> KmsResult<Vec<ObjectHandle>> {
        match self.error {
            None => Ok(self.installed),
            Some(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// BlobImporter
// ---------------------------------------------------------------------------

/// A fail-fast pipeline of import stages.
pub struct BlobImporter {
    stages: Vec<Box<dyn ImportStage>>,
}

impl BlobImporter {
    /// Start with an empty pipeline.
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// The standard pipeline: header, body, header, install.
    pub fn with_default_stages() -> Self {
        let mut importer = Self::new();
        importer.add_stage(Box::new(HeaderAuthStage));
        importer.add_stage(Box::new(BodyAuthStage));
        importer.add_stage(Box::new(HeaderAuthStage));
        importer.add_stage(Box::new(InstallStage));
        importer
    }

    pub fn add_stage(&mut self, stage: Box<dyn ImportStage>) {
        self.stages.push(stage);
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run the pipeline over `header` and the encrypted `image`.
    ///
    /// Refuses to start while any session is open. `Err` is returned only
    /// when a precondition fails; stage failures land in the report.
    pub fn run(
        &self,
        token: &mut Token,
        header: &[u8],
        image: &dyn FlashReader,
    ) -> ImportResult<ImportReport> {
        let pipeline_start = Instant::now();
        if !token.is_initialized() {
            return Err(KmsError::CryptokiNotInitialized.into());
        }
        if !token.config().features.import_blob {
            return Err(KmsError::FunctionNotSupported.into());
        }
        if token.sessions().active_count() > 0 {
            return Err(KmsError::OperationActive.into());
        }
        let header = BlobHeader::parse(header)?;

        let import = token.config().import;
        let mut ctx = ImportContext {
            token,
            header: &header,
            image,
            chunk_size: import.chunk_size,
            verify_key: ObjectHandle(import.verify_key),
            decrypt_key: ObjectHandle(import.decrypt_key),
            installed: Vec::new(),
        };
        info!(
            blob_version = header.blob_version(),
            blob_size = header.blob_size(),
            chunk_size = ctx.chunk_size,
            "blob import started"
        );

        let mut stage_results = Vec::with_capacity(self.stages.len());
        let mut error = None;
        for stage in &self.stages {
            let stage_start = Instant::now();
            info!(stage = stage.name(), "import stage started");
            let decision = stage.run(&mut ctx).unwrap_or_else(|err| {
                let reason = err.to_string();
                StageDecision::fail(KmsError::from(err), reason)
            });
            ctx.close_sessions();

            let result = match decision {
                StageDecision::Pass => StageResult {
                    stage_name: stage.name().to_string(),
                    passed: true,
                    reason: None,
                    elapsed: stage_start.elapsed(),
                },
                StageDecision::Fail { reason, error: code } => {
                    warn!(stage = stage.name(), %reason, "import stage failed");
                    error = Some(code);
                    StageResult {
                        stage_name: stage.name().to_string(),
                        passed: false,
                        reason: Some(reason),
                        elapsed: stage_start.elapsed(),
                    }
                }
            };
            info!(stage = stage.name(), passed = result.passed, "import stage finished");
            stage_results.push(result);
            if error.is_some() {
                break;
            }
        }

        info!(installed = ctx.installed.len(), ok = error.is_none(), "blob import finished");
        Ok(ImportReport {
            stage_results,
            installed: ctx.installed,
            error,
            elapsed: pipeline_start.elapsed(),
        })
    }
}

impl Default for BlobImporter {
    fn default() -> Self {
        Self::with_default_stages()
    }
}

/// Import a blob with the standard pipeline, reporting a single code.
pub fn import_blob(token: &mut Token, header: &[u8], image: &dyn FlashReader) -> KmsResult<Vec<ObjectHandle>> {
    BlobImporter::with_default_stages()
        .run(token, header, image)
        .map_err(KmsError::from)?
        .into_result()
}
