use std::sync::Arc;

use kms_crypto::{CryptoProvider, SoftCrypto};
use kms_mem::{MemPtr, Memory};
use kms_objects::{ExternalToken, InMemoryStorage, KeyObject, LockRegistry, ObjectStorage, ObjectStore};
use kms_types::{
    KmsError, KmsResult, MechanismFlags, MechanismInfo, MechanismType, ObjectHandle,
    SessionHandle, SessionInfo, SessionState, TokenInfo,
};
use tracing::{debug, info};

use crate::config::{Function, KmsConfig};
use crate::error::ConfigResult;
use crate::session::{Operation, OperationContext, SessionManager};

pub const TOKEN_LABEL: &str = "KMS on STM32";
pub const TOKEN_MANUFACTURER: &str = "ST Microelectronics";
pub const TOKEN_MODEL: &str = "KMS Foundations";

/// Upper bound of the initialization reference count.
const MAX_INIT_COUNT: u32 = 255;

/// The key management token.
///
/// Owns the session table, scratch memory, object store and crypto backend.
/// Every operation takes `&mut self`: callers serialize access, and sessions
/// are the only partitioning of in-flight work.
pub struct Token {
    config: KmsConfig,
    init_count: u32,
    pub(crate) sessions: SessionManager,
    pub(crate) memory: Memory,
    pub(crate) store: ObjectStore,
    pub(crate) crypto: Box<dyn CryptoProvider>,
}

impl Token {
    /// Build a token from a validated configuration, with in-memory NVM and
    /// the software crypto backend.
    pub fn new(config: KmsConfig) -> ConfigResult<Self> {
        config.validate()?;
        let embedded = InMemoryStorage::read_only(config.embedded_objects()?);
        let store = ObjectStore::new(config.ranges.clone())
            .with_embedded(Arc::new(embedded))
            .with_locks(LockRegistry::new(config.locks.max_keys, config.locks.max_services));
        Ok(Self {
            sessions: SessionManager::new(config.max_sessions),
            memory: Memory::new(&config.memory),
            store,
            crypto: Box::new(SoftCrypto),
            init_count: 0,
            config,
        })
    }

    pub fn with_nvm(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.store = self.store.with_nvm(storage);
        self
    }

    pub fn with_vm(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.store = self.store.with_vm(storage);
        self
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalToken>) -> Self {
        self.store = self.store.with_external(external);
        self
    }

    pub fn with_crypto(mut self, crypto: Box<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn config(&self) -> &KmsConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Reference-counted initialization. Only the first call resets the
    /// session table and brings up the collaborators.
    pub fn initialize(&mut self) -> KmsResult<()> {
        if self.init_count >= MAX_INIT_COUNT {
            return Err(KmsError::FunctionFailed);
        }
        self.init_count += 1;
        if self.init_count > 1 {
            return Err(KmsError::CryptokiAlreadyInitialized);
        }

        self.release_sessions();
        self.memory = Memory::new(&self.config.memory);
        if let Err(e) = self.store.external().initialize() {
            self.init_count = 0;
            return Err(e);
        }
        info!(
            sessions = self.sessions.capacity(),
            memory = self.memory.strategy(),
            crypto = self.crypto.name(),
            "token initialized"
        );
        Ok(())
    }

    pub fn finalize(&mut self) -> KmsResult<()> {
        if self.init_count == 0 {
            return Err(KmsError::CryptokiNotInitialized);
        }
        self.init_count -= 1;
        if self.init_count == 0 {
            self.release_sessions();
            self.store.external().finalize()?;
            info!("token finalized");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.init_count > 0
    }

    pub(crate) fn ensure_initialized(&self) -> KmsResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(KmsError::CryptokiNotInitialized)
        }
    }

    fn release_sessions(&mut self) {
        for (owner, block) in self.sessions.reset() {
            if let Err(e) = self.memory.free(owner, block) {
                debug!(session = owner.value(), error = %e, "context release failed on reset");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub fn open_session(
        &mut self,
        slot_id: u32,
        flags: u32,
        application: Option<u64>,
    ) -> KmsResult<SessionHandle> {
        self.ensure_initialized()?;
        self.sessions.open(slot_id, flags, application)
    }

    pub fn close_session(&mut self, session: SessionHandle) -> KmsResult<()> {
        self.ensure_initialized()?;
        self.sessions.close(session)
    }

    /// Close every session of `slot_id`, abandoning any operation in flight
    /// and releasing its context.
    pub fn close_all_sessions(&mut self, slot_id: u32) -> KmsResult<()> {
        self.ensure_initialized()?;
        let open = self.sessions.active_count();
        for (owner, block) in self.sessions.close_slot(slot_id) {
            if let Err(e) = self.memory.free(owner, block) {
                debug!(session = owner.value(), error = %e, "context release failed on close");
            }
        }
        debug!(slot_id, closed = open - self.sessions.active_count(), "sessions closed");
        Ok(())
    }

    pub fn session_info(&self, session: SessionHandle) -> KmsResult<SessionInfo> {
        self.ensure_initialized()?;
        self.sessions.info(session)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn token_info(&self) -> KmsResult<TokenInfo> {
        self.ensure_initialized()?;
        Ok(TokenInfo {
            label: TOKEN_LABEL.into(),
            manufacturer: TOKEN_MANUFACTURER.into(),
            model: TOKEN_MODEL.into(),
            serial_number: String::new(),
            flags: TokenInfo::WRITE_PROTECTED,
            max_session_count: self.sessions.capacity() as u32,
            session_count: self.sessions.active_count() as u32,
        })
    }

    /// Mechanisms enabled by the configuration.
    pub fn mechanism_list(&self) -> KmsResult<Vec<MechanismType>> {
        self.ensure_initialized()?;
        Ok(MechanismType::ALL
            .into_iter()
            .filter(|m| self.mechanism_flags(*m) != 0)
            .collect())
    }

    pub fn mechanism_info(&self, mechanism: MechanismType) -> KmsResult<MechanismInfo> {
        self.ensure_initialized()?;
        let flags = self.mechanism_flags(mechanism);
        if flags == 0 {
            return Err(KmsError::MechanismInvalid);
        }
        let (min_key_size, max_key_size) = match mechanism {
            MechanismType::SHA_1 | MechanismType::SHA256 => (0, 0),
            MechanismType::RSA_PKCS | MechanismType::SHA1_RSA_PKCS | MechanismType::SHA256_RSA_PKCS => {
                (1024, 4096)
            }
            MechanismType::ECDSA
            | MechanismType::ECDSA_SHA1
            | MechanismType::ECDSA_SHA256
            | MechanismType::EC_KEY_PAIR_GEN
            | MechanismType::ECDH1_DERIVE => (256, 256),
            _ => (16, 32),
        };
        Ok(MechanismInfo { min_key_size, max_key_size, flags })
    }

    pub(crate) fn mechanism_flags(&self, mechanism: MechanismType) -> u32 {
        let alg = &self.config.algorithms;
        let features = &self.config.features;
        let Some(set) = alg.for_mechanism(mechanism) else {
            return 0;
        };
        match mechanism {
            MechanismType::AES_ECB_ENCRYPT_DATA | MechanismType::ECDH1_DERIVE => {
                if set.derive && features.derive {
                    MechanismFlags::DERIVE
                } else {
                    0
                }
            }
            MechanismType::EC_KEY_PAIR_GEN => {
                if set.sign && features.generate {
                    MechanismFlags::GENERATE_KEY_PAIR
                } else {
                    0
                }
            }
            _ => [
                (set.encrypt, MechanismFlags::ENCRYPT),
                (set.decrypt, MechanismFlags::DECRYPT),
                (set.sign, MechanismFlags::SIGN),
                (set.verify, MechanismFlags::VERIFY),
                (set.digest, MechanismFlags::DIGEST),
            ]
            .into_iter()
            .filter(|(on, _)| *on)
            .fold(0, |acc, (_, flag)| acc | flag),
        }
    }

    // -----------------------------------------------------------------------
    // Dispatcher plumbing
    // -----------------------------------------------------------------------

    /// Preconditions of every `*Init`: initialized token, open session, idle
    /// state.
    pub(crate) fn check_idle(&self, session: SessionHandle) -> KmsResult<()> {
        self.ensure_initialized()?;
        let s = self.sessions.get(session)?;
        if s.state != SessionState::Idle {
            return Err(KmsError::SessionHandleInvalid);
        }
        Ok(())
    }

    /// The mechanism must be enabled for `function` and not locked.
    pub(crate) fn check_mechanism(&self, mechanism: MechanismType, function: Function) -> KmsResult<()> {
        if !self.config.algorithms.allows(mechanism, function) {
            return Err(KmsError::MechanismInvalid);
        }
        if self.store.locks().is_service_locked(mechanism) {
            return Err(KmsError::ActionProhibited);
        }
        Ok(())
    }

    /// Resolve a key object for an operation. Locked, missing and malformed
    /// keys all look the same here.
    pub(crate) fn resolve_key(&self, key: ObjectHandle) -> KmsResult<KeyObject> {
        self.store.get(key).ok_or(KmsError::ObjectHandleInvalid)
    }

    /// Attach `op` to an idle session, backed by a fresh block of
    /// `block_len` bytes holding `seed` at its start.
    ///
    /// Secrets never go into `seed`; a freed block is only wiped when
    /// `clean_on_free` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn begin_operation(
        &mut self,
        session: SessionHandle,
        state: SessionState,
        mechanism: Option<MechanismType>,
        key: ObjectHandle,
        block_len: usize,
        seed: &[u8],
        op: Operation,
    ) -> KmsResult<()> {
        let block = self.memory.alloc(session, block_len.max(seed.len()).max(1))?;
        if let Err(e) = self.seed_block(block, seed) {
            if let Err(free_err) = self.memory.free(session, block) {
                debug!(session = session.value(), error = %free_err, "context release failed after seeding error");
            }
            return Err(e);
        }
        self.sessions
            .begin(session, state, mechanism, key, OperationContext { block, op })?;
        debug!(session = session.value(), ?state, ?mechanism, "operation started");
        Ok(())
    }

    fn seed_block(&mut self, block: MemPtr, seed: &[u8]) -> KmsResult<()> {
        if !seed.is_empty() {
            self.memory.bytes_mut(block)?[..seed.len()].copy_from_slice(seed);
        }
        Ok(())
    }

    /// Return a session to idle and release its context block.
    pub(crate) fn end_operation(&mut self, session: SessionHandle) {
        if let Some(ctx) = self.sessions.set_idle(session) {
            if let Err(e) = self.memory.free(session, ctx.block) {
                debug!(session = session.value(), error = %e, "context release failed");
            }
            debug!(session = session.value(), "operation ended");
        }
    }

    /// Cleanup policy for `Update`/`Final`: any failure other than a
    /// too-small buffer terminates the operation.
    pub(crate) fn settle<T>(&mut self, session: SessionHandle, result: KmsResult<T>) -> KmsResult<T> {
        if let Err(e) = &result {
            if !matches!(e, KmsError::BufferTooSmall { .. }) {
                self.end_operation(session);
            }
        }
        result
    }

    /// The operation attached to a session in `state`.
    pub(crate) fn operation_mut(
        &mut self,
        session: SessionHandle,
        state: SessionState,
    ) -> KmsResult<&mut OperationContext> {
        self.ensure_initialized()?;
        self.sessions
            .expect_state(session, state)?
            .context
            .as_mut()
            .ok_or(KmsError::OperationNotInitialized)
    }
}

/// Apply the query/fill output convention: `None` means "report the size";
/// a short buffer is [`KmsError::BufferTooSmall`].
pub(crate) fn output_buffer(out: Option<&mut [u8]>, required: usize) -> KmsResult<Option<&mut [u8]>> {
    match out {
        None => Ok(None),
        Some(buf) if buf.len() < required => Err(KmsError::BufferTooSmall { required }),
        Some(buf) => Ok(Some(buf)),
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("init_count", &self.init_count)
            .field("sessions", &self.sessions.active_count())
            .field("memory", &self.memory)
            .field("store", &self.store)
            .field("crypto", &self.crypto.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kms_types::SessionFlags;

    pub(crate) const SERIAL: u32 = SessionFlags::SERIAL_SESSION;

    pub(crate) fn make_token() -> Token {
        let mut token = Token::new(KmsConfig::default()).unwrap();
        token.initialize().unwrap();
        token
    }

    pub(crate) fn make_session(token: &mut Token) -> SessionHandle {
        token.open_session(0, SERIAL, None).unwrap()
    }

    #[test]
    fn initialize_is_reference_counted() {
        let mut token = Token::new(KmsConfig::default()).unwrap();
        assert!(!token.is_initialized());
        token.initialize().unwrap();
        assert_eq!(token.initialize(), Err(KmsError::CryptokiAlreadyInitialized));
        token.finalize().unwrap();
        assert!(token.is_initialized());
        token.finalize().unwrap();
        assert!(!token.is_initialized());
        assert_eq!(token.finalize(), Err(KmsError::CryptokiNotInitialized));
    }

    #[test]
    fn init_count_is_bounded() {
        let mut token = make_token();
        for _ in 1..MAX_INIT_COUNT {
            assert_eq!(token.initialize(), Err(KmsError::CryptokiAlreadyInitialized));
        }
        assert_eq!(token.initialize(), Err(KmsError::FunctionFailed));
    }

    #[test]
    fn uninitialized_token_rejects_sessions() {
        let mut token = Token::new(KmsConfig::default()).unwrap();
        assert_eq!(
            token.open_session(0, SERIAL, None),
            Err(KmsError::CryptokiNotInitialized)
        );
        assert_eq!(token.token_info().unwrap_err(), KmsError::CryptokiNotInitialized);
    }

    #[test]
    fn token_info_counts_sessions() {
        let mut token = make_token();
        make_session(&mut token);
        let info = token.token_info().unwrap();
        assert_eq!(info.label, TOKEN_LABEL);
        assert_eq!(info.flags, TokenInfo::WRITE_PROTECTED);
        assert_eq!(info.max_session_count, 5);
        assert_eq!(info.session_count, 1);
    }

    #[test]
    fn finalize_closes_sessions() {
        let mut token = make_token();
        let s = make_session(&mut token);
        token.finalize().unwrap();
        token.initialize().unwrap();
        assert_eq!(token.session_info(s), Err(KmsError::SessionHandleInvalid));
    }

    #[test]
    fn close_all_sessions_abandons_operations() {
        let mut token = make_token();
        let busy = make_session(&mut token);
        let other_slot = token.open_session(1, SERIAL, None).unwrap();
        token
            .digest_init(busy, &kms_types::Mechanism::new(MechanismType::SHA256))
            .unwrap();
        assert_eq!(token.close_session(busy), Err(KmsError::SessionHandleInvalid));
        assert_eq!(token.memory().outstanding().len(), 1);

        token.close_all_sessions(0).unwrap();
        assert_eq!(token.session_info(busy), Err(KmsError::SessionHandleInvalid));
        assert!(token.session_info(other_slot).is_ok());
        assert!(token.memory().outstanding().is_empty());
    }

    #[test]
    fn mechanism_list_follows_config() {
        let mut config = KmsConfig::default();
        config.algorithms.sha1 = Default::default();
        let mut token = Token::new(config).unwrap();
        token.initialize().unwrap();
        let list = token.mechanism_list().unwrap();
        assert!(!list.contains(&MechanismType::SHA_1));
        assert!(list.contains(&MechanismType::SHA256));
        assert!(list.contains(&MechanismType::EC_KEY_PAIR_GEN));
        assert_eq!(
            token.mechanism_info(MechanismType::SHA_1),
            Err(KmsError::MechanismInvalid)
        );
    }

    #[test]
    fn mechanism_info_sizes_and_flags() {
        let token = make_token();
        let aes = token.mechanism_info(MechanismType::AES_CBC).unwrap();
        assert_eq!((aes.min_key_size, aes.max_key_size), (16, 32));
        assert_eq!(aes.flags, MechanismFlags::ENCRYPT | MechanismFlags::DECRYPT);
        let ec = token.mechanism_info(MechanismType::ECDSA_SHA256).unwrap();
        assert_eq!((ec.min_key_size, ec.max_key_size), (256, 256));
        let rsa = token.mechanism_info(MechanismType::RSA_PKCS).unwrap();
        assert_eq!((rsa.min_key_size, rsa.max_key_size), (1024, 4096));
        let derive = token.mechanism_info(MechanismType::ECDH1_DERIVE).unwrap();
        assert_eq!(derive.flags, MechanismFlags::DERIVE);
        assert_eq!(
            token.mechanism_info(MechanismType::VENDOR_DEFINED),
            Err(KmsError::MechanismInvalid)
        );
    }

    #[test]
    fn file_backed_nvm_survives_token_restart() {
        use kms_objects::FileStorage;
        use kms_types::{Attribute, AttributeType, KeyType, ObjectClass};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvm.bin");
        let key = [0x5Au8; 32];

        let handle = {
            let storage = Arc::new(FileStorage::open(&path).unwrap());
            let mut token = Token::new(KmsConfig::default()).unwrap().with_nvm(storage);
            token.initialize().unwrap();
            let s = make_session(&mut token);
            let handle = token
                .create_object(
                    s,
                    &[
                        Attribute::class(ObjectClass::SECRET_KEY),
                        Attribute::key_type(KeyType::AES),
                        Attribute::bytes(AttributeType::VALUE, key.to_vec()),
                    ],
                )
                .unwrap();
            token.finalize().unwrap();
            handle
        };

        let storage = Arc::new(FileStorage::open(&path).unwrap());
        let mut token = Token::new(KmsConfig::default()).unwrap().with_nvm(storage);
        token.initialize().unwrap();
        let object = token.store().get(handle).unwrap();
        assert_eq!(object.find_attribute(AttributeType::VALUE).unwrap().material(), key.to_vec());
    }
}
