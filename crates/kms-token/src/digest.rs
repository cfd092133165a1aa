use kms_crypto::{DigestAlgorithm, DigestOperation};
use kms_types::{KmsError, KmsResult, Mechanism, ObjectHandle, SessionHandle, SessionState};

use crate::config::Function;
use crate::session::Operation;
use crate::token::{output_buffer, Token};

impl Token {
    pub fn digest_init(&mut self, session: SessionHandle, mechanism: &Mechanism) -> KmsResult<()> {
        self.check_idle(session)?;
        self.check_mechanism(mechanism.kind, Function::Digest)?;
        if mechanism.has_params() {
            return Err(KmsError::MechanismParamInvalid);
        }
        let algorithm = DigestAlgorithm::from_mechanism(mechanism.kind)?;
        let op = self.crypto.digest(algorithm);
        let block_len = op.output_len();
        self.begin_operation(
            session,
            SessionState::Digest,
            Some(mechanism.kind),
            ObjectHandle::UNKNOWN,
            block_len,
            &[],
            Operation::Digest(op),
        )
    }

    /// Single-part digest of `data`. A size query leaves the operation
    /// running and consumes no input.
    pub fn digest(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        let len = self.digest_op(session)?.output_len();
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        self.digest_update(session, data)?;
        self.digest_final(session, Some(out))
    }

    pub fn digest_update(&mut self, session: SessionHandle, data: &[u8]) -> KmsResult<()> {
        self.digest_op(session)?.update(data);
        Ok(())
    }

    pub fn digest_final(&mut self, session: SessionHandle, out: Option<&mut [u8]>) -> KmsResult<usize> {
        let op = self.digest_op(session)?;
        let len = op.output_len();
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        let digest = op.finish();
        out[..len].copy_from_slice(&digest);
        self.end_operation(session);
        Ok(len)
    }

    fn digest_op(&mut self, session: SessionHandle) -> KmsResult<&mut dyn DigestOperation> {
        match &mut self.operation_mut(session, SessionState::Digest)?.op {
            Operation::Digest(op) => Ok(op.as_mut()),
            _ => Err(KmsError::OperationNotInitialized),
        }
    }
}
