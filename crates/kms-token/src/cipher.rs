use kms_crypto::{CipherMode, CipherOperation, CryptoError, Direction, BLOCK_LEN};
use kms_types::{
    AttributeType, KmsError, KmsResult, Mechanism, MechanismParams, MechanismType, ObjectHandle,
    SessionHandle, SessionState,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::Function;
use crate::session::{CcmTracker, CipherContext, Operation};
use crate::token::{output_buffer, Token};

const AES_KEY_LENS: [usize; 3] = [16, 24, 32];

fn state_for(direction: Direction) -> SessionState {
    match direction {
        Direction::Encrypt => SessionState::Encrypt,
        Direction::Decrypt => SessionState::Decrypt,
    }
}

/// Map mechanism parameters onto a cipher mode. A missing parameter is
/// `ARGUMENTS_BAD`; a present but unusable one is `MECHANISM_PARAM_INVALID`.
fn cipher_mode(mechanism: &Mechanism) -> KmsResult<CipherMode> {
    match (mechanism.kind, &mechanism.params) {
        (MechanismType::AES_ECB, MechanismParams::None) => Ok(CipherMode::Ecb),
        (MechanismType::AES_ECB, _) => Err(KmsError::MechanismParamInvalid),

        (MechanismType::AES_CBC, MechanismParams::Iv(iv)) => {
            let iv: [u8; BLOCK_LEN] = iv
                .as_slice()
                .try_into()
                .map_err(|_| KmsError::MechanismParamInvalid)?;
            Ok(CipherMode::Cbc { iv })
        }

        (MechanismType::AES_GCM, MechanismParams::Gcm(p)) => {
            if p.tag_bits % 8 != 0 || !(96..=128).contains(&p.tag_bits) {
                return Err(KmsError::MechanismParamInvalid);
            }
            Ok(CipherMode::Gcm {
                iv: p.iv.clone(),
                aad: p.aad.clone(),
                tag_len: (p.tag_bits / 8) as usize,
            })
        }

        (MechanismType::AES_CCM, MechanismParams::Ccm(p)) => Ok(CipherMode::Ccm {
            nonce: p.nonce.clone(),
            aad: p.aad.clone(),
            tag_len: p.mac_len,
            data_len: p.data_len,
        }),

        (MechanismType::AES_CBC | MechanismType::AES_GCM | MechanismType::AES_CCM, MechanismParams::None) => {
            Err(KmsError::ArgumentsBad)
        }
        (MechanismType::AES_CBC | MechanismType::AES_GCM | MechanismType::AES_CCM, _) => {
            Err(KmsError::MechanismParamInvalid)
        }
        _ => Err(KmsError::MechanismInvalid),
    }
}

/// `update` then `finish` into one buffer.
fn run_to_end(op: &mut dyn CipherOperation, input: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
    let n = op.update(input, out)?;
    let m = op.finish(&mut out[n..])?;
    Ok(n + m)
}

impl Token {
    // -----------------------------------------------------------------------
    // Encrypt
    // -----------------------------------------------------------------------

    pub fn encrypt_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> KmsResult<()> {
        self.cipher_init(session, mechanism, key, Direction::Encrypt)
    }

    /// Single-part encryption.
    pub fn encrypt(&mut self, session: SessionHandle, data: &[u8], out: Option<&mut [u8]>) -> KmsResult<usize> {
        self.cipher_single(session, Direction::Encrypt, data, out)
    }

    pub fn encrypt_update(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        self.cipher_update(session, Direction::Encrypt, data, out)
    }

    pub fn encrypt_final(&mut self, session: SessionHandle, out: Option<&mut [u8]>) -> KmsResult<usize> {
        self.cipher_final(session, Direction::Encrypt, out)
    }

    // -----------------------------------------------------------------------
    // Decrypt
    // -----------------------------------------------------------------------

    pub fn decrypt_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> KmsResult<()> {
        self.cipher_init(session, mechanism, key, Direction::Decrypt)
    }

    /// Single-part decryption. For GCM and CCM the tag is the trailing part
    /// of `data`.
    pub fn decrypt(&mut self, session: SessionHandle, data: &[u8], out: Option<&mut [u8]>) -> KmsResult<usize> {
        self.cipher_single(session, Direction::Decrypt, data, out)
    }

    /// Multi-part decryption step.
    ///
    /// For CCM the step that completes the declared payload and tag verifies
    /// the tag and returns the whole plaintext; the following
    /// [`Self::decrypt_final`] returns the tag.
    pub fn decrypt_update(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        if self.is_ccm_decrypt(session)? {
            return self.ccm_decrypt_update(session, data, out);
        }
        self.cipher_update(session, Direction::Decrypt, data, out)
    }

    pub fn decrypt_final(&mut self, session: SessionHandle, out: Option<&mut [u8]>) -> KmsResult<usize> {
        if self.is_ccm_decrypt(session)? {
            return self.ccm_decrypt_final(session, out);
        }
        self.cipher_final(session, Direction::Decrypt, out)
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    fn cipher_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
        direction: Direction,
    ) -> KmsResult<()> {
        self.check_idle(session)?;
        let function = match direction {
            Direction::Encrypt => Function::Encrypt,
            Direction::Decrypt => Function::Decrypt,
        };
        self.check_mechanism(mechanism.kind, function)?;
        if self.store.locks().is_key_locked(key) {
            return Err(KmsError::KeyHandleInvalid);
        }
        let object = self.resolve_key(key)?;
        let material = Zeroizing::new(
            object
                .find_attribute(AttributeType::VALUE)
                .map(|a| a.material())
                .unwrap_or_default(),
        );
        if !AES_KEY_LENS.contains(&material.len()) {
            return Err(KmsError::ArgumentsBad);
        }

        let mode = cipher_mode(mechanism)?;
        let ccm = match (&mode, direction) {
            (CipherMode::Ccm { tag_len, data_len, .. }, Direction::Decrypt) => {
                Some(CcmTracker::new(*data_len, *tag_len))
            }
            _ => None,
        };
        let op = self.crypto.cipher(mode, direction, &material)?;
        debug!(session = session.value(), key = key.value(), ?direction, "cipher key loaded");
        self.begin_operation(
            session,
            state_for(direction),
            Some(mechanism.kind),
            key,
            material.len(),
            &[],
            Operation::Cipher(CipherContext { op, ccm }),
        )
    }

    fn cipher_single(
        &mut self,
        session: SessionHandle,
        direction: Direction,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        let ctx = self.cipher_context(session, direction)?;
        let len = ctx.op.total_len(data.len());
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        let result = run_to_end(ctx.op.as_mut(), data, out);
        self.end_operation(session);
        Ok(result?)
    }

    fn cipher_update(
        &mut self,
        session: SessionHandle,
        direction: Direction,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        let ctx = self.cipher_context(session, direction)?;
        let len = ctx.op.update_len(data.len());
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        let result = ctx.op.update(data, out).map_err(KmsError::from);
        self.settle(session, result)
    }

    fn cipher_final(
        &mut self,
        session: SessionHandle,
        direction: Direction,
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        let ctx = self.cipher_context(session, direction)?;
        let len = ctx.op.final_len();
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        let result = ctx.op.finish(out).map_err(KmsError::from);
        self.end_operation(session);
        result
    }

    fn ccm_decrypt_update(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> KmsResult<usize> {
        let ctx = self.cipher_context(session, Direction::Decrypt)?;
        let Some(tracker) = ctx.ccm.as_mut() else {
            return Err(KmsError::OperationNotInitialized);
        };
        if data.len() > tracker.data_remain || tracker.tag.is_some() {
            let result = Err(KmsError::DataLenRange);
            return self.settle(session, result);
        }
        let completes = data.len() == tracker.data_remain;
        let len = if completes { tracker.data_len } else { 0 };
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };

        let split = data.len().min(tracker.payload_left());
        let (payload, tag_part) = data.split_at(split);
        tracker.partial.extend_from_slice(tag_part);
        tracker.data_remain -= data.len();

        let result = if completes {
            let tag = std::mem::take(&mut tracker.partial);
            let opened = ctx.op.finish_with_tag(payload, &tag, out);
            tracker.tag = Some(tag);
            opened.map_err(KmsError::from)
        } else {
            ctx.op.update(payload, out).map_err(KmsError::from)
        };
        self.settle(session, result)
    }

    fn ccm_decrypt_final(&mut self, session: SessionHandle, out: Option<&mut [u8]>) -> KmsResult<usize> {
        let ctx = self.cipher_context(session, Direction::Decrypt)?;
        let Some(tracker) = ctx.ccm.as_mut() else {
            return Err(KmsError::OperationNotInitialized);
        };
        let Some(tag) = tracker.tag.as_ref() else {
            let result = Err(KmsError::DataLenRange);
            return self.settle(session, result);
        };
        let len = tag.len();
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        out[..len].copy_from_slice(tag);
        self.end_operation(session);
        Ok(len)
    }

    fn cipher_context(&mut self, session: SessionHandle, direction: Direction) -> KmsResult<&mut CipherContext> {
        match &mut self.operation_mut(session, state_for(direction))?.op {
            Operation::Cipher(ctx) => Ok(ctx),
            _ => Err(KmsError::OperationNotInitialized),
        }
    }

    /// Whether a decrypting session runs CCM tag tracking.
    fn is_ccm_decrypt(&mut self, session: SessionHandle) -> KmsResult<bool> {
        Ok(self.cipher_context(session, Direction::Decrypt)?.ccm.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::{make_session, make_token};
    use kms_types::{Attribute, CcmParams, GcmParams, KeyType, ObjectClass, SessionState};

    const KEY: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    ];
    const PLAIN: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
    ];

    fn aes_key(token: &mut Token, session: SessionHandle, key: &[u8]) -> ObjectHandle {
        token
            .create_object(
                session,
                &[
                    Attribute::class(ObjectClass::SECRET_KEY),
                    Attribute::key_type(KeyType::AES),
                    Attribute::bytes(AttributeType::VALUE, key.to_vec()),
                ],
            )
            .unwrap()
    }

    fn state(token: &Token, s: SessionHandle) -> SessionState {
        token.session_info(s).unwrap().state
    }

    #[test]
    fn cipher_context_block_holds_no_key_bytes() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        token.encrypt_init(s, &Mechanism::new(MechanismType::AES_ECB), key).unwrap();

        let live = token.memory().outstanding();
        assert_eq!(live.len(), 1);
        let block = token.memory().bytes(live[0].ptr).unwrap();
        assert!(block.windows(KEY.len()).all(|w| w != KEY));

        let mut out = [0u8; 16];
        token.encrypt(s, &PLAIN, Some(&mut out)).unwrap();
        assert!(token.memory().outstanding().is_empty());
    }

    fn cbc() -> Mechanism {
        Mechanism::with_params(MechanismType::AES_CBC, MechanismParams::Iv(vec![0x24; 16]))
    }

    fn ccm(data_len: usize) -> Mechanism {
        Mechanism::with_params(
            MechanismType::AES_CCM,
            MechanismParams::Ccm(CcmParams {
                data_len,
                nonce: vec![0x10; 12],
                aad: b"header".to_vec(),
                mac_len: 8,
            }),
        )
    }

    #[test]
    fn ecb_single_part_known_answer() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        let ecb = Mechanism::new(MechanismType::AES_ECB);
        token.encrypt_init(s, &ecb, key).unwrap();
        assert_eq!(token.encrypt(s, &PLAIN, None).unwrap(), 16);
        let mut out = [0u8; 16];
        token.encrypt(s, &PLAIN, Some(&mut out)).unwrap();
        assert_eq!(hex::encode(out), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(state(&token, s), SessionState::Idle);
    }

    #[test]
    fn cbc_multi_part_round_trip() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &[7u8; 32]);
        let plain = [0x5au8; 48];

        token.encrypt_init(s, &cbc(), key).unwrap();
        let mut ct = vec![0u8; 48];
        let n = token.encrypt_update(s, &plain[..20], Some(&mut ct)).unwrap();
        assert_eq!(n, 16);
        let m = token.encrypt_update(s, &plain[20..], Some(&mut ct[n..])).unwrap();
        assert_eq!(n + m, 48);
        assert_eq!(token.encrypt_final(s, Some(&mut [])).unwrap(), 0);

        token.decrypt_init(s, &cbc(), key).unwrap();
        let mut pt = vec![0u8; 48];
        assert_eq!(token.decrypt(s, &ct, Some(&mut pt)).unwrap(), 48);
        assert_eq!(pt, plain);
        assert!(token.memory().outstanding().is_empty());
    }

    #[test]
    fn partial_block_fails_and_resets() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        token.encrypt_init(s, &cbc(), key).unwrap();
        token.encrypt_update(s, &[1u8; 7], Some(&mut [])).unwrap();
        assert_eq!(token.encrypt_final(s, Some(&mut [])), Err(KmsError::DataLenRange));
        assert_eq!(state(&token, s), SessionState::Idle);
    }

    #[test]
    fn short_buffer_keeps_operation() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        token.encrypt_init(s, &Mechanism::new(MechanismType::AES_ECB), key).unwrap();
        let mut short = [0u8; 8];
        assert_eq!(
            token.encrypt_update(s, &PLAIN, Some(&mut short)),
            Err(KmsError::BufferTooSmall { required: 16 })
        );
        assert_eq!(state(&token, s), SessionState::Encrypt);
        let mut out = [0u8; 16];
        assert_eq!(token.encrypt_update(s, &PLAIN, Some(&mut out)).unwrap(), 16);
    }

    #[test]
    fn gcm_round_trip_and_tamper() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        let gcm = Mechanism::with_params(
            MechanismType::AES_GCM,
            MechanismParams::Gcm(GcmParams { iv: vec![3u8; 12], aad: b"aad".to_vec(), tag_bits: 128 }),
        );

        token.encrypt_init(s, &gcm, key).unwrap();
        assert_eq!(token.encrypt_update(s, b"hello gcm", Some(&mut [])).unwrap(), 0);
        assert_eq!(token.encrypt_final(s, None).unwrap(), 9 + 16);
        let mut sealed = vec![0u8; 25];
        token.encrypt_final(s, Some(&mut sealed)).unwrap();

        token.decrypt_init(s, &gcm, key).unwrap();
        let mut opened = vec![0u8; 9];
        assert_eq!(token.decrypt(s, &sealed, Some(&mut opened)).unwrap(), 9);
        assert_eq!(&opened, b"hello gcm");

        sealed[0] ^= 1;
        token.decrypt_init(s, &gcm, key).unwrap();
        assert_eq!(token.decrypt(s, &sealed, Some(&mut opened)), Err(KmsError::FunctionFailed));
        assert_eq!(state(&token, s), SessionState::Idle);
    }

    #[test]
    fn ccm_decrypt_returns_tag_on_final() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        let plain = b"twenty bytes of data";

        token.encrypt_init(s, &ccm(plain.len()), key).unwrap();
        let mut sealed = vec![0u8; plain.len() + 8];
        token.encrypt(s, plain, Some(&mut sealed)).unwrap();

        token.decrypt_init(s, &ccm(plain.len()), key).unwrap();
        let mut out = vec![0u8; plain.len()];
        // Second chunk starts inside the tag.
        assert_eq!(token.decrypt_update(s, &sealed[..24], Some(&mut [])).unwrap(), 0);
        assert_eq!(token.decrypt_update(s, &sealed[24..], None).unwrap(), plain.len());
        assert_eq!(token.decrypt_update(s, &sealed[24..], Some(&mut out)).unwrap(), plain.len());
        assert_eq!(&out, plain);

        let mut tag = [0u8; 8];
        assert_eq!(token.decrypt_final(s, Some(&mut tag)).unwrap(), 8);
        assert_eq!(&tag, &sealed[plain.len()..]);
        assert_eq!(state(&token, s), SessionState::Idle);
    }

    #[test]
    fn ccm_bad_tag_fails_mid_stream() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        let plain = [9u8; 16];
        token.encrypt_init(s, &ccm(16), key).unwrap();
        let mut sealed = vec![0u8; 24];
        token.encrypt(s, &plain, Some(&mut sealed)).unwrap();
        sealed[23] ^= 0x80;

        token.decrypt_init(s, &ccm(16), key).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(token.decrypt_update(s, &sealed, Some(&mut out)), Err(KmsError::FunctionFailed));
        assert_eq!(state(&token, s), SessionState::Idle);
    }

    #[test]
    fn parameter_checks() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        assert_eq!(
            token.encrypt_init(s, &Mechanism::new(MechanismType::AES_CBC), key),
            Err(KmsError::ArgumentsBad)
        );
        assert_eq!(
            token.encrypt_init(
                s,
                &Mechanism::with_params(MechanismType::AES_CBC, MechanismParams::Iv(vec![0; 8])),
                key
            ),
            Err(KmsError::MechanismParamInvalid)
        );
        assert_eq!(
            token.encrypt_init(
                s,
                &Mechanism::with_params(MechanismType::AES_ECB, MechanismParams::Iv(vec![0; 16])),
                key
            ),
            Err(KmsError::MechanismParamInvalid)
        );
        let odd_tag = Mechanism::with_params(
            MechanismType::AES_GCM,
            MechanismParams::Gcm(GcmParams { iv: vec![0; 12], aad: vec![], tag_bits: 100 }),
        );
        assert_eq!(token.encrypt_init(s, &odd_tag, key), Err(KmsError::MechanismParamInvalid));
        assert_eq!(state(&token, s), SessionState::Idle);
        assert!(token.memory().outstanding().is_empty());
    }

    #[test]
    fn key_checks() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let short = aes_key(&mut token, s, &[1u8; 10]);
        let ecb = Mechanism::new(MechanismType::AES_ECB);
        assert_eq!(token.encrypt_init(s, &ecb, short), Err(KmsError::ArgumentsBad));
        assert_eq!(
            token.encrypt_init(s, &ecb, ObjectHandle(77)),
            Err(KmsError::ObjectHandleInvalid)
        );

        let key = aes_key(&mut token, s, &KEY);
        token.lock_keys(&[key]).unwrap();
        assert_eq!(token.encrypt_init(s, &ecb, key), Err(KmsError::KeyHandleInvalid));
    }

    #[test]
    fn families_do_not_mix() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = aes_key(&mut token, s, &KEY);
        token.encrypt_init(s, &Mechanism::new(MechanismType::AES_ECB), key).unwrap();
        assert_eq!(
            token.decrypt_update(s, &PLAIN, Some(&mut [0u8; 16])),
            Err(KmsError::OperationNotInitialized)
        );
        assert_eq!(token.digest_update(s, b"x"), Err(KmsError::OperationNotInitialized));
        assert_eq!(state(&token, s), SessionState::Encrypt);
    }
}
