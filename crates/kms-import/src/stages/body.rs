use kms_types::{KmsError, Mechanism, MechanismParams, MechanismType, SessionHandle};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{ImportError, ImportResult};
use crate::header::BLOB_TAG_LEN;
use crate::stage::{ImportContext, ImportStage, StageDecision};

/// Decrypt the whole image chunk by chunk and compare the SHA-256 of the
/// plaintext with the header tag. The plaintext is discarded.
pub struct BodyAuthStage;

impl BodyAuthStage {
    /// Returns whether the computed tag matches the header.
    fn authenticate(
        ctx: &mut ImportContext<'_>,
        aes: SessionHandle,
        digest: SessionHandle,
    ) -> ImportResult<bool> {
        let cbc = Mechanism::with_params(MechanismType::AES_CBC, MechanismParams::Iv(ctx.header.iv().to_vec()));
        ctx.token.decrypt_init(aes, &cbc, ctx.decrypt_key)?;
        ctx.token.digest_init(digest, &Mechanism::new(MechanismType::SHA256))?;

        let total = ctx.header.blob_size();
        let mut encrypted = Zeroizing::new(vec![0u8; ctx.chunk_size]);
        let mut decrypted = Zeroizing::new(vec![0u8; ctx.chunk_size]);
        let mut offset = 0;
        while offset < total {
            let size = ctx.chunk_size.min(total - offset);
            ctx.image.read(offset, &mut encrypted[..size])?;
            let written = ctx
                .token
                .decrypt_update(aes, &encrypted[..size], Some(&mut decrypted[..size]))?;
            if written != size {
                return Err(ImportError::Truncated {
                    offset: offset + written,
                    reason: "image is not a whole number of AES blocks".into(),
                });
            }
            ctx.token.digest_update(digest, &decrypted[..written])?;
            decrypted[..written].fill(0xFF);
            offset += size;
        }

        ctx.token.decrypt_final(aes, Some(&mut []))?;
        let mut tag = [0u8; BLOB_TAG_LEN];
        ctx.token.digest_final(digest, Some(&mut tag))?;
        Ok(bool::from(tag.ct_eq(ctx.header.tag())))
    }
}

impl ImportStage for BodyAuthStage {
    fn name(&self) -> &str {
        "body-auth"
    }

    fn run(&self, ctx: &mut ImportContext<'_>) -> ImportResult<StageDecision> {
        let aes = ctx.open_session()?;
        let digest = match ctx.open_session() {
            Ok(s) => s,
            Err(err) => {
                ctx.close_sessions();
                return Err(err);
            }
        };
        let outcome = Self::authenticate(ctx, aes, digest);
        ctx.close_sessions();

        Ok(match outcome {
            Ok(true) => StageDecision::Pass,
            Ok(false) => StageDecision::fail(KmsError::SignatureInvalid, "payload tag mismatch"),
            Err(err) => StageDecision::fail(
                KmsError::SignatureInvalid,
                format!("body authentication aborted: {err}"),
            ),
        })
    }
}
