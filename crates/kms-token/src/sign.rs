use kms_crypto::{SignatureOperation, SignatureScheme, SigningKeyMaterial, P256_OID_DER};
use kms_objects::KeyObject;
use kms_types::{AttributeType, KmsError, KmsResult, Mechanism, ObjectHandle, SessionHandle, SessionState};
use zeroize::Zeroizing;

use crate::config::Function;
use crate::session::Operation;
use crate::token::{output_buffer, Token};

/// Unpacked key material of `kind`, or `MECHANISM_PARAM_INVALID`.
fn required(object: &KeyObject, kind: AttributeType) -> KmsResult<Vec<u8>> {
    object
        .find_attribute(kind)
        .map(|a| a.material())
        .ok_or(KmsError::MechanismParamInvalid)
}

fn check_ec_params(object: &KeyObject) -> KmsResult<()> {
    match object.find_attribute(AttributeType::EC_PARAMS) {
        Some(params) if params.value() != P256_OID_DER => Err(KmsError::MechanismParamInvalid),
        _ => Ok(()),
    }
}

/// Pull the key material `scheme` needs out of a key object. Verification
/// prefers the public half and falls back to the private one.
fn key_material(object: &KeyObject, scheme: SignatureScheme, function: Function) -> KmsResult<SigningKeyMaterial> {
    let has = |kind| object.find_attribute(kind).is_some();
    let material = match scheme {
        SignatureScheme::Ecdsa(_) => {
            check_ec_params(object)?;
            if function == Function::Verify && has(AttributeType::EC_POINT) {
                SigningKeyMaterial::EcPublic(required(object, AttributeType::EC_POINT)?)
            } else {
                SigningKeyMaterial::EcPrivate(Zeroizing::new(required(object, AttributeType::VALUE)?))
            }
        }
        SignatureScheme::RsaPkcs1(_) => {
            let modulus = required(object, AttributeType::MODULUS)?;
            let public_exponent = required(object, AttributeType::PUBLIC_EXPONENT)?;
            if function == Function::Verify && !has(AttributeType::PRIVATE_EXPONENT) {
                SigningKeyMaterial::RsaPublic { modulus, public_exponent }
            } else {
                let private_exponent = Zeroizing::new(required(object, AttributeType::PRIVATE_EXPONENT)?);
                let primes = [AttributeType::PRIME_1, AttributeType::PRIME_2]
                    .into_iter()
                    .filter_map(|kind| object.find_attribute(kind))
                    .map(|a| Zeroizing::new(a.material()))
                    .collect();
                SigningKeyMaterial::RsaPrivate { modulus, public_exponent, private_exponent, primes }
            }
        }
        SignatureScheme::AesCmac { .. } => {
            SigningKeyMaterial::Aes(Zeroizing::new(required(object, AttributeType::VALUE)?))
        }
    };
    Ok(material)
}

impl Token {
    pub fn sign_init(&mut self, session: SessionHandle, mechanism: &Mechanism, key: ObjectHandle) -> KmsResult<()> {
        self.signature_init(session, mechanism, key, Function::Sign)
    }

    /// Single-part signature. RSA signatures are as long as the modulus,
    /// ECDSA P-256 signatures are `r || s` (64 bytes).
    pub fn sign(&mut self, session: SessionHandle, data: &[u8], out: Option<&mut [u8]>) -> KmsResult<usize> {
        let op = self.signature_op(session, SessionState::Sign)?;
        let len = op.signature_len();
        let Some(out) = output_buffer(out, len)? else {
            return Ok(len);
        };
        let result = op.sign(data, out);
        self.end_operation(session);
        Ok(result?)
    }

    pub fn verify_init(&mut self, session: SessionHandle, mechanism: &Mechanism, key: ObjectHandle) -> KmsResult<()> {
        self.signature_init(session, mechanism, key, Function::Verify)
    }

    /// Single-part verification. Ends the operation whatever the outcome.
    pub fn verify(&mut self, session: SessionHandle, data: &[u8], signature: &[u8]) -> KmsResult<()> {
        let op = self.signature_op(session, SessionState::Verify)?;
        let result = op.verify(data, signature);
        self.end_operation(session);
        Ok(result?)
    }

    fn signature_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
        function: Function,
    ) -> KmsResult<()> {
        self.check_idle(session)?;
        self.check_mechanism(mechanism.kind, function)?;
        let scheme = SignatureScheme::from_mechanism(mechanism)?;
        let object = self.resolve_key(key)?;
        let material = key_material(&object, scheme, function)?;
        let op = self.crypto.signature(scheme, material)?;
        let state = if function == Function::Sign {
            SessionState::Sign
        } else {
            SessionState::Verify
        };
        let block_len = op.signature_len();
        self.begin_operation(session, state, Some(mechanism.kind), key, block_len, &[], Operation::Signature(op))
    }

    fn signature_op(&mut self, session: SessionHandle, state: SessionState) -> KmsResult<&mut dyn SignatureOperation> {
        match &mut self.operation_mut(session, state)?.op {
            Operation::Signature(op) => Ok(op.as_mut()),
            _ => Err(KmsError::OperationNotInitialized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::{make_session, make_token};
    use kms_types::{Attribute, KeyType, MechanismParams, MechanismType, ObjectClass};

    fn ec_pair(token: &mut Token, s: SessionHandle) -> (ObjectHandle, ObjectHandle) {
        token
            .generate_key_pair(
                s,
                &Mechanism::new(MechanismType::EC_KEY_PAIR_GEN),
                &[Attribute::bytes(AttributeType::EC_PARAMS, P256_OID_DER.to_vec())],
                &[Attribute::bool(AttributeType::SIGN, true)],
            )
            .unwrap()
    }

    fn cmac_key(token: &mut Token, s: SessionHandle) -> ObjectHandle {
        token
            .create_object(
                s,
                &[
                    Attribute::class(ObjectClass::SECRET_KEY),
                    Attribute::key_type(KeyType::AES),
                    Attribute::bytes(
                        AttributeType::VALUE,
                        hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap(),
                    ),
                ],
            )
            .unwrap()
    }

    #[test]
    fn ecdsa_sign_then_verify() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let (public, private) = ec_pair(&mut token, s);
        let mech = Mechanism::new(MechanismType::ECDSA_SHA256);

        token.sign_init(s, &mech, private).unwrap();
        assert_eq!(token.sign(s, b"message", None).unwrap(), 64);
        let mut sig = [0u8; 64];
        assert_eq!(token.sign(s, b"message", Some(&mut sig)).unwrap(), 64);

        token.verify_init(s, &mech, public).unwrap();
        token.verify(s, b"message", &sig).unwrap();

        token.verify_init(s, &mech, public).unwrap();
        assert_eq!(token.verify(s, b"massage", &sig), Err(KmsError::SignatureInvalid));
        token.verify_init(s, &mech, public).unwrap();
        assert_eq!(token.verify(s, b"message", &sig[..63]), Err(KmsError::SignatureLenRange));
        assert!(token.memory().outstanding().is_empty());
    }

    #[test]
    fn raw_ecdsa_needs_a_hash_sized_input() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let (_, private) = ec_pair(&mut token, s);
        let mech = Mechanism::new(MechanismType::ECDSA);
        token.sign_init(s, &mech, private).unwrap();
        let mut sig = [0u8; 64];
        assert_eq!(token.sign(s, &[1u8; 31], Some(&mut sig)), Err(KmsError::ArgumentsBad));
        assert_eq!(token.session_info(s).unwrap().state, SessionState::Idle);

        token.sign_init(s, &mech, private).unwrap();
        assert_eq!(token.sign(s, &[1u8; 32], Some(&mut sig)).unwrap(), 64);
    }

    #[test]
    fn cmac_known_answer() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = cmac_key(&mut token, s);
        let msg = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        token.sign_init(s, &Mechanism::new(MechanismType::AES_CMAC), key).unwrap();
        let mut mac = [0u8; 16];
        token.sign(s, &msg, Some(&mut mac)).unwrap();
        assert_eq!(hex::encode(mac), "070a16b46b4d4144f79bdd9dd04a287c");

        let general = Mechanism::with_params(MechanismType::AES_CMAC_GENERAL, MechanismParams::MacLength(8));
        token.verify_init(s, &general, key).unwrap();
        token.verify(s, &msg, &mac[..8]).unwrap();
    }

    #[test]
    fn cmac_general_needs_length() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = cmac_key(&mut token, s);
        assert_eq!(
            token.sign_init(s, &Mechanism::new(MechanismType::AES_CMAC_GENERAL), key),
            Err(KmsError::MechanismParamInvalid)
        );
    }

    #[test]
    fn missing_key_material_is_a_param_error() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let bare = token
            .create_object(
                s,
                &[Attribute::class(ObjectClass::PRIVATE_KEY), Attribute::key_type(KeyType::RSA)],
            )
            .unwrap();
        assert_eq!(
            token.sign_init(s, &Mechanism::new(MechanismType::SHA256_RSA_PKCS), bare),
            Err(KmsError::MechanismParamInvalid)
        );
        assert_eq!(token.session_info(s).unwrap().state, SessionState::Idle);
    }

    #[test]
    fn foreign_curve_is_rejected() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let key = token
            .create_object(
                s,
                &[
                    Attribute::class(ObjectClass::PRIVATE_KEY),
                    Attribute::key_type(KeyType::EC),
                    Attribute::bytes(AttributeType::EC_PARAMS, vec![0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22]),
                    Attribute::bytes(AttributeType::VALUE, vec![1u8; 32]),
                ],
            )
            .unwrap();
        assert_eq!(
            token.sign_init(s, &Mechanism::new(MechanismType::ECDSA_SHA256), key),
            Err(KmsError::MechanismParamInvalid)
        );
    }

    #[test]
    fn verify_outside_verify_state() {
        let mut token = make_token();
        let s = make_session(&mut token);
        assert_eq!(token.verify(s, b"x", &[0u8; 64]), Err(KmsError::OperationNotInitialized));
        assert_eq!(token.sign(s, b"x", None), Err(KmsError::OperationNotInitialized));
    }
}
