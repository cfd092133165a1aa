use kms_types::{KmsError, KmsResult, Mechanism, MechanismType};
use tracing::debug;

use crate::error::ImportResult;
use crate::stage::{ImportContext, ImportStage, StageDecision};

/// ECDSA-P256-SHA256 check of the header MAC against the platform verify
/// key.
///
/// The verification runs twice, each time in its own session, and the
/// header is accepted only when the second run agrees with the first.
pub struct HeaderAuthStage;

impl HeaderAuthStage {
    fn verify_once(ctx: &mut ImportContext<'_>) -> ImportResult<KmsResult<()>> {
        let session = ctx.open_session()?;
        let mechanism = Mechanism::new(MechanismType::ECDSA_SHA256);
        let outcome = ctx
            .token
            .verify_init(session, &mechanism, ctx.verify_key)
            .and_then(|()| {
                ctx.token
                    .verify(session, ctx.header.signed_bytes(), ctx.header.mac())
            });
        ctx.token.close_session(session)?;
        Ok(outcome)
    }
}

impl ImportStage for HeaderAuthStage {
    fn name(&self) -> &str {
        "header-auth"
    }

    fn run(&self, ctx: &mut ImportContext<'_>) -> ImportResult<StageDecision> {
        for pass in 1..=2 {
            if let Err(err) = Self::verify_once(ctx)? {
                debug!(pass, error = %err, "header MAC rejected");
                return Ok(StageDecision::fail(
                    KmsError::SignatureInvalid,
                    format!("header MAC rejected on pass {pass}: {err}"),
                ));
            }
        }
        Ok(StageDecision::Pass)
    }
}
