use kms_types::{KmsError, KmsResult, MechanismType, ObjectHandle};

use crate::token::Token;

impl Token {
    /// Permanently lock key handles. Entries are inserted in order and the
    /// first failure stops the walk; earlier entries stay locked.
    pub fn lock_keys(&mut self, handles: &[ObjectHandle]) -> KmsResult<()> {
        self.ensure_initialized()?;
        Self::require_feature(self.config().features.lock_keys)?;
        if handles.is_empty() {
            return Err(KmsError::ArgumentsBad);
        }
        for &handle in handles {
            self.store.locks().lock_key(handle)?;
        }
        Ok(())
    }

    /// Permanently lock mechanisms. Same walk as [`Token::lock_keys`].
    pub fn lock_services(&mut self, mechanisms: &[MechanismType]) -> KmsResult<()> {
        self.ensure_initialized()?;
        Self::require_feature(self.config().features.lock_services)?;
        if mechanisms.is_empty() {
            return Err(KmsError::ArgumentsBad);
        }
        for &mechanism in mechanisms {
            self.store.locks().lock_service(mechanism)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::{make_session, make_token};
    use crate::KmsConfig;
    use kms_types::{Attribute, AttributeType, KeyType, Mechanism, ObjectClass};

    fn aes_key(token: &mut Token) -> ObjectHandle {
        let s = make_session(token);
        let key = token
            .create_object(
                s,
                &[
                    Attribute::class(ObjectClass::SECRET_KEY),
                    Attribute::key_type(KeyType::AES),
                    Attribute::bytes(AttributeType::VALUE, vec![7u8; 16]),
                ],
            )
            .unwrap();
        token.close_session(s).unwrap();
        key
    }

    #[test]
    fn locked_key_disappears_from_lookups() {
        let mut token = make_token();
        let key = aes_key(&mut token);
        token.lock_keys(&[key]).unwrap();
        token.lock_keys(&[key]).unwrap();
        assert!(token.store().locks().is_key_locked(key));
        assert!(token.store().get(key).is_none());
        assert_eq!(token.store().locks().locked_keys(), vec![key]);
    }

    #[test]
    fn locked_service_is_prohibited() {
        let mut token = make_token();
        let s = make_session(&mut token);
        token.lock_services(&[MechanismType::SHA_1, MechanismType::SHA256]).unwrap();
        assert_eq!(
            token.digest_init(s, &Mechanism::new(MechanismType::SHA_1)),
            Err(KmsError::ActionProhibited)
        );
        assert!(token.mechanism_list().unwrap().contains(&MechanismType::SHA256));
    }

    #[test]
    fn empty_lists_are_bad_arguments() {
        let mut token = make_token();
        assert_eq!(token.lock_keys(&[]), Err(KmsError::ArgumentsBad));
        assert_eq!(token.lock_services(&[]), Err(KmsError::ArgumentsBad));
    }

    #[test]
    fn full_table_stops_at_first_failure() {
        let mut config = KmsConfig::default();
        config.locks.max_keys = 2;
        let mut token = Token::new(config).unwrap();
        token.initialize().unwrap();
        let handles = [ObjectHandle(50), ObjectHandle(51), ObjectHandle(52), ObjectHandle(53)];
        assert_eq!(token.lock_keys(&handles), Err(KmsError::CantLock));
        assert_eq!(token.store().locks().locked_keys(), handles[..2].to_vec());
        assert!(!token.store().locks().is_key_locked(ObjectHandle(53)));
    }

    #[test]
    fn disabled_features_and_lifecycle() {
        let mut config = KmsConfig::default();
        config.features.lock_services = false;
        let mut token = Token::new(config).unwrap();
        assert_eq!(
            token.lock_keys(&[ObjectHandle(50)]),
            Err(KmsError::CryptokiNotInitialized)
        );
        token.initialize().unwrap();
        assert_eq!(
            token.lock_services(&[MechanismType::SHA256]),
            Err(KmsError::FunctionNotSupported)
        );
        token.lock_keys(&[ObjectHandle(50)]).unwrap();
    }
}
