use kms_crypto::{CipherMode, Direction, P256_OID_DER, P256_SCALAR_LEN};
use kms_types::{
    find_in_template, Attribute, AttributeType, EcdhParams, KmsError, KmsResult, Mechanism,
    MechanismParams, MechanismType, ObjectHandle, SessionHandle,
};
use tracing::info;
use zeroize::Zeroizing;

use crate::config::Function;
use crate::token::Token;

const AES_DERIVE_DATA_LENS: [usize; 3] = [16, 24, 32];

impl Token {
    /// Derive a new AES secret key from `base_key`.
    ///
    /// `AES_ECB_ENCRYPT_DATA` encrypts the mechanism data under the base AES
    /// key. `ECDH1_DERIVE` keeps the raw shared x coordinate.
    pub fn derive_key(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism,
        base_key: ObjectHandle,
        template: &[Attribute],
    ) -> KmsResult<ObjectHandle> {
        self.check_session(session)?;
        Self::require_feature(self.config().features.derive)?;
        self.check_mechanism(mechanism.kind, Function::Derive)?;

        let base = self.resolve_key(base_key)?;
        let derive_allowed = base
            .find_attribute(AttributeType::DERIVE)
            .and_then(|a| a.as_bool());
        if derive_allowed == Some(false) {
            return Err(KmsError::ActionProhibited);
        }
        let base_value = Zeroizing::new(
            base.find_attribute(AttributeType::VALUE)
                .map(|a| a.material())
                .unwrap_or_default(),
        );

        let derived = match (mechanism.kind, &mechanism.params) {
            (MechanismType::AES_ECB_ENCRYPT_DATA, MechanismParams::Data(data))
                if AES_DERIVE_DATA_LENS.contains(&data.len()) =>
            {
                self.ecb_encrypt(&base_value, data)?
            }
            (MechanismType::AES_ECB_ENCRYPT_DATA, _) => return Err(KmsError::MechanismParamInvalid),

            (MechanismType::ECDH1_DERIVE, MechanismParams::Ecdh(EcdhParams { kdf, public_data }))
                if *kdf == EcdhParams::KDF_NULL =>
            {
                if let Some(params) = base.find_attribute(AttributeType::EC_PARAMS) {
                    if params.value() != P256_OID_DER {
                        return Err(KmsError::DomainParamsInvalid);
                    }
                }
                if base_value.len() != P256_SCALAR_LEN {
                    return Err(KmsError::KeyHandleInvalid);
                }
                self.crypto.ecdh(&base_value, public_data)?
            }
            (MechanismType::ECDH1_DERIVE, _) => return Err(KmsError::MechanismParamInvalid),
            _ => return Err(KmsError::MechanismInvalid),
        };

        let handle = self.create_and_store_blob_for_aes(session, &derived, template)?;
        info!(
            session = session.value(),
            base = base_key.value(),
            handle = handle.value(),
            mechanism = %mechanism.kind,
            "key derived"
        );
        Ok(handle)
    }

    fn ecb_encrypt(&self, key: &[u8], data: &[u8]) -> KmsResult<Zeroizing<Vec<u8>>> {
        let mut op = self.crypto.cipher(CipherMode::Ecb, Direction::Encrypt, key)?;
        let mut out = Zeroizing::new(vec![0u8; data.len()]);
        let n = op.update(data, &mut out)?;
        op.finish(&mut out[n..])?;
        Ok(out)
    }

    /// Generate a P-256 key pair. The public template must carry the
    /// prime256v1 `EC_PARAMS`. Returns `(public, private)`.
    pub fn generate_key_pair(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> KmsResult<(ObjectHandle, ObjectHandle)> {
        self.check_session(session)?;
        Self::require_feature(self.config().features.generate)?;
        if mechanism.kind != MechanismType::EC_KEY_PAIR_GEN || self.mechanism_flags(mechanism.kind) == 0 {
            return Err(KmsError::MechanismInvalid);
        }
        if self.store.locks().is_service_locked(mechanism.kind) {
            return Err(KmsError::ActionProhibited);
        }
        match find_in_template(public_template, AttributeType::EC_PARAMS) {
            Some(params) if params.value == P256_OID_DER => {}
            _ => return Err(KmsError::DomainParamsInvalid),
        }

        let mut private_template = private_template.to_vec();
        if find_in_template(&private_template, AttributeType::EC_PARAMS).is_none() {
            private_template.push(Attribute::bytes(AttributeType::EC_PARAMS, P256_OID_DER.to_vec()));
        }

        let pair = self.crypto.generate_ec_key_pair()?;
        let handles = self.create_and_store_blob_for_ecc_pair(
            session,
            &pair.public_point,
            &pair.private_scalar,
            public_template,
            &private_template,
        )?;
        info!(
            session = session.value(),
            public = handles.0.value(),
            private = handles.1.value(),
            "EC key pair generated"
        );
        Ok(handles)
    }
}
