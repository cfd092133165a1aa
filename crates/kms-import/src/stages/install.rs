use kms_mem::MemPtr;
use kms_objects::{KeyObject, ObjectHeader, ABI_VERSION, HEADER_LEN};
use kms_types::{KmsError, Mechanism, MechanismParams, MechanismType, ObjectHandle, SessionHandle};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{ImportError, ImportResult};
use crate::stage::{ImportContext, ImportStage, StageDecision};

/// Decrypt the image again and store every object found in it in the
/// NVM-static tier.
///
/// Objects are located by scanning the plaintext word by word for the ABI
/// version tag. A header or attribute area may straddle chunk boundaries.
pub struct InstallStage;

/// Decrypting reader over the image, one working chunk at a time.
struct ChunkSource {
    session: SessionHandle,
    offset: usize,
    encrypted: Zeroizing<Vec<u8>>,
}

impl ChunkSource {
    /// Append the next decrypted chunk to `window`. Returns `false` at the
    /// end of the image.
    fn fill(&mut self, ctx: &mut ImportContext<'_>, window: &mut Vec<u8>) -> ImportResult<bool> {
        let total = ctx.header.blob_size();
        if self.offset >= total {
            return Ok(false);
        }
        let size = ctx.chunk_size.min(total - self.offset);
        ctx.image.read(self.offset, &mut self.encrypted[..size])?;
        let start = window.len();
        window.resize(start + size, 0);
        let written = ctx
            .token
            .decrypt_update(self.session, &self.encrypted[..size], Some(&mut window[start..]))?;
        window.truncate(start + written);
        self.offset += size;
        Ok(true)
    }

    fn truncated(&self, reason: impl Into<String>) -> ImportError {
        ImportError::Truncated {
            offset: self.offset,
            reason: reason.into(),
        }
    }
}

fn word_at(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

impl InstallStage {
    fn install(ctx: &mut ImportContext<'_>, session: SessionHandle) -> ImportResult<()> {
        let cbc = Mechanism::with_params(MechanismType::AES_CBC, MechanismParams::Iv(ctx.header.iv().to_vec()));
        ctx.token.decrypt_init(session, &cbc, ctx.decrypt_key)?;

        let mut source = ChunkSource {
            session,
            offset: 0,
            encrypted: Zeroizing::new(vec![0u8; ctx.chunk_size]),
        };
        let mut window = Zeroizing::new(Vec::with_capacity(ctx.chunk_size));
        let mut pos = 0;

        'scan: loop {
            // Find the next object magic.
            loop {
                if pos + 4 <= window.len() {
                    if word_at(&window, pos) == ABI_VERSION {
                        break;
                    }
                    pos += 4;
                    continue;
                }
                window.drain(..pos);
                pos = 0;
                if !source.fill(ctx, &mut window)? {
                    break 'scan;
                }
            }

            while window.len() - pos < HEADER_LEN {
                if !source.fill(ctx, &mut window)? {
                    return Err(source.truncated("object header cut off by end of blob"));
                }
            }
            let header = ObjectHeader::parse(&window[pos..])?;
            let block = ctx.token.memory_mut().alloc(session, header.object_len())?;
            let stored = Self::collect_object(ctx, &mut source, &mut window, &mut pos, &header, block);
            let freed = ctx.token.memory_mut().free(session, block);
            let handle = stored?;
            freed?;
            ctx.installed.push(handle);
        }

        ctx.token.decrypt_final(session, Some(&mut []))?;
        Ok(())
    }

    /// Copy one object, possibly spanning several chunks, into `block` and
    /// persist it.
    fn collect_object(
        ctx: &mut ImportContext<'_>,
        source: &mut ChunkSource,
        window: &mut Zeroizing<Vec<u8>>,
        pos: &mut usize,
        header: &ObjectHeader,
        block: MemPtr,
    ) -> ImportResult<ObjectHandle> {
        let total = header.object_len();
        let mut copied = 0;
        loop {
            let take = (window.len() - *pos).min(total - copied);
            let staging = ctx.token.memory_mut().bytes_mut(block)?;
            staging[copied..copied + take].copy_from_slice(&window[*pos..*pos + take]);
            copied += take;
            *pos += take;
            if copied == total {
                break;
            }
            window.clear();
            *pos = 0;
            if !source.fill(ctx, window)? {
                return Err(source.truncated(format!(
                    "object {} declares {total} bytes, {copied} present",
                    header.object_id
                )));
            }
        }

        let bytes = ctx.token.memory().bytes(block)?[..total].to_vec();
        let object = KeyObject::from_bytes(bytes)?;
        let handle = ctx.token.store().store_nvm_static(&object)?;
        info!(handle = handle.value(), size = total, "blob object installed");
        Ok(handle)
    }
}

impl ImportStage for InstallStage {
    fn name(&self) -> &str {
        "install"
    }

    fn run(&self, ctx: &mut ImportContext<'_>) -> ImportResult<StageDecision> {
        let session = ctx.open_session()?;
        let outcome = Self::install(ctx, session);
        ctx.close_sessions();

        Ok(match outcome {
            Ok(()) => StageDecision::Pass,
            Err(err) => {
                let reason = err.to_string();
                StageDecision::fail(KmsError::from(err), reason)
            }
        })
    }
}
