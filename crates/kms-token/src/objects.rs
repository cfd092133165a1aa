use kms_types::{
    find_in_template, Attribute, AttributeType, KmsError, KmsResult, ObjectHandle, ObjectRange,
    SessionHandle, SessionState,
};
use tracing::{debug, info};

use crate::session::{Operation, SearchContext};
use crate::token::Token;

/// Size of one handle in a search context block.
pub(crate) const SEARCH_HANDLE_LEN: usize = 4;

/// One entry of a `GetAttributeValue` request.
///
/// With no buffer the call only reports the length. On return `len` holds
/// the attribute length, or `None` when the value is unavailable.
#[derive(Debug)]
pub struct AttributeQuery<'a> {
    pub kind: AttributeType,
    pub buffer: Option<&'a mut [u8]>,
    pub len: Option<usize>,
}

impl<'a> AttributeQuery<'a> {
    /// Length-only query.
    pub fn size(kind: AttributeType) -> Self {
        Self { kind, buffer: None, len: None }
    }

    pub fn fill(kind: AttributeType, buffer: &'a mut [u8]) -> Self {
        Self { kind, buffer: Some(buffer), len: None }
    }

    /// The filled part of the buffer.
    pub fn value(&self) -> Option<&[u8]> {
        match (&self.buffer, self.len) {
            (Some(buf), Some(len)) => buf.get(..len),
            _ => None,
        }
    }
}

impl Token {
    pub(crate) fn check_session(&self, session: SessionHandle) -> KmsResult<()> {
        self.ensure_initialized()?;
        self.sessions.check_handle(session)
    }

    pub(crate) fn require_feature(enabled: bool) -> KmsResult<()> {
        if enabled {
            Ok(())
        } else {
            Err(KmsError::FunctionNotSupported)
        }
    }

    // -----------------------------------------------------------------------
    // Create / destroy
    // -----------------------------------------------------------------------

    /// Store a new object built from `template` in the dynamic tier. Key
    /// material attributes are word-packed.
    pub fn create_object(&mut self, session: SessionHandle, template: &[Attribute]) -> KmsResult<ObjectHandle> {
        self.check_session(session)?;
        Self::require_feature(self.config().features.objects)?;
        let typed = [
            AttributeType::KEY_TYPE,
            AttributeType::CERTIFICATE_TYPE,
            AttributeType::HW_FEATURE_TYPE,
        ]
        .into_iter()
        .any(|kind| find_in_template(template, kind).is_some());
        if find_in_template(template, AttributeType::CLASS).is_none() || !typed {
            return Err(KmsError::TemplateIncomplete);
        }
        let handle = self
            .store
            .create_and_store_packed(&mut self.memory, session, template, None)?;
        info!(session = session.value(), handle = handle.value(), "object created");
        Ok(handle)
    }

    pub fn destroy_object(&mut self, session: SessionHandle, handle: ObjectHandle) -> KmsResult<()> {
        self.check_session(session)?;
        Self::require_feature(self.config().features.objects)?;
        if self.store.resolve(handle) == ObjectRange::Embedded {
            return Err(KmsError::ActionProhibited);
        }
        let object = self.store.get(handle).ok_or(KmsError::ObjectHandleInvalid)?;
        let destroyable = object
            .find_attribute(AttributeType::DESTROYABLE)
            .and_then(|a| a.as_bool());
        if destroyable == Some(false) {
            return Err(KmsError::ActionProhibited);
        }
        self.store.remove(handle)?;
        info!(session = session.value(), handle = handle.value(), "object destroyed");
        Ok(())
    }

    /// Store an AES secret key in the dynamic tier.
    pub fn create_and_store_blob_for_aes(
        &mut self,
        session: SessionHandle,
        key: &[u8],
        template: &[Attribute],
    ) -> KmsResult<ObjectHandle> {
        self.check_session(session)?;
        Ok(self
            .store
            .create_and_store_for_aes(&mut self.memory, session, key, template)?)
    }

    /// Store an EC key pair. Returns `(public, private)`.
    pub fn create_and_store_blob_for_ecc_pair(
        &mut self,
        session: SessionHandle,
        public_point: &[u8],
        private_value: &[u8],
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> KmsResult<(ObjectHandle, ObjectHandle)> {
        self.check_session(session)?;
        Ok(self.store.create_and_store_for_ecc_pair(
            &mut self.memory,
            session,
            public_point,
            private_value,
            public_template,
            private_template,
        )?)
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    /// Fill `queries` from the object's attributes.
    ///
    /// Every entry is processed; the first failure is returned. A
    /// non-extractable object reports every entry as unavailable.
    pub fn get_attribute_value(
        &mut self,
        session: SessionHandle,
        handle: ObjectHandle,
        queries: &mut [AttributeQuery<'_>],
    ) -> KmsResult<()> {
        self.check_session(session)?;
        Self::require_feature(self.config().features.attributes)?;
        let object = self.store.get(handle).ok_or(KmsError::ObjectHandleInvalid)?;

        let extractable = object
            .find_attribute(AttributeType::EXTRACTABLE)
            .and_then(|a| a.as_bool());
        if extractable == Some(false) {
            for query in queries.iter_mut() {
                query.len = None;
            }
            return Err(KmsError::AttributeSensitive);
        }

        let mut outcome = Ok(());
        for query in queries.iter_mut() {
            let Some(attr) = object.find_attribute(query.kind) else {
                query.len = None;
                outcome = outcome.and(Err(KmsError::AttributeTypeInvalid));
                continue;
            };
            let value = if query.kind.is_word_packed() {
                attr.material()
            } else {
                attr.value().to_vec()
            };
            match query.buffer.as_deref_mut() {
                None => query.len = Some(value.len()),
                Some(buf) if buf.len() < value.len() => {
                    query.len = None;
                    outcome = outcome.and(Err(KmsError::BufferTooSmall { required: value.len() }));
                }
                Some(buf) => {
                    buf[..value.len()].copy_from_slice(&value);
                    query.len = Some(value.len());
                }
            }
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Collect the handles matching `template` into a search context.
    pub fn find_objects_init(&mut self, session: SessionHandle, template: &[Attribute]) -> KmsResult<()> {
        self.check_idle(session)?;
        Self::require_feature(self.config().features.search)?;
        let capacity = self.config().search_max_handles;
        let found = self.store.find_objects(template, capacity);
        let seed: Vec<u8> = found.iter().flat_map(|h| h.value().to_le_bytes()).collect();
        debug!(session = session.value(), count = found.len(), "search started");
        self.begin_operation(
            session,
            SessionState::Search,
            None,
            ObjectHandle::UNKNOWN,
            capacity * SEARCH_HANDLE_LEN,
            &seed,
            Operation::Search(SearchContext { count: found.len(), cursor: 0 }),
        )
    }

    /// Next page of at most `max_count` results.
    pub fn find_objects(&mut self, session: SessionHandle, max_count: usize) -> KmsResult<Vec<ObjectHandle>> {
        let (block, count, cursor) = {
            let ctx = self.operation_mut(session, SessionState::Search)?;
            match &ctx.op {
                Operation::Search(search) => (ctx.block, search.count, search.cursor),
                _ => return Err(KmsError::OperationNotInitialized),
            }
        };
        let end = count.min(cursor.saturating_add(max_count));
        let page = match self.memory.bytes(block) {
            Ok(bytes) => bytes[cursor * SEARCH_HANDLE_LEN..end * SEARCH_HANDLE_LEN]
                .chunks_exact(SEARCH_HANDLE_LEN)
                .map(|c| ObjectHandle(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect::<Vec<_>>(),
            Err(e) => return self.settle(session, Err(e.into())),
        };
        if let Operation::Search(search) = &mut self.operation_mut(session, SessionState::Search)?.op {
            search.cursor = end;
        }
        Ok(page)
    }

    pub fn find_objects_final(&mut self, session: SessionHandle) -> KmsResult<()> {
        self.operation_mut(session, SessionState::Search)?;
        self.end_operation(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::{make_session, make_token};
    use crate::KmsConfig;
    use kms_types::{KeyType, ObjectClass};

    fn aes_template(label: &str) -> Vec<Attribute> {
        vec![
            Attribute::class(ObjectClass::SECRET_KEY),
            Attribute::key_type(KeyType::AES),
            Attribute::label(label),
            Attribute::bytes(AttributeType::VALUE, vec![0x11; 16]),
        ]
    }

    #[test]
    fn create_requires_class_and_type() {
        let mut token = make_token();
        let s = make_session(&mut token);
        assert_eq!(
            token.create_object(s, &[Attribute::class(ObjectClass::DATA)]),
            Err(KmsError::TemplateIncomplete)
        );
        assert_eq!(
            token.create_object(s, &[Attribute::key_type(KeyType::AES)]),
            Err(KmsError::TemplateIncomplete)
        );
        let h = token.create_object(s, &aes_template("k")).unwrap();
        assert_eq!(token.store().resolve(h), ObjectRange::NvmDynamic);
    }

    #[test]
    fn created_attributes_read_back() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let h = token.create_object(s, &aes_template("k1")).unwrap();

        let mut value = [0u8; 16];
        let mut label = [0u8; 2];
        let mut queries = [
            AttributeQuery::size(AttributeType::VALUE),
            AttributeQuery::fill(AttributeType::VALUE, &mut value),
            AttributeQuery::fill(AttributeType::LABEL, &mut label),
        ];
        token.get_attribute_value(s, h, &mut queries).unwrap();
        assert_eq!(queries[0].len, Some(16));
        assert_eq!(queries[1].value(), Some(&[0x11u8; 16][..]));
        assert_eq!(queries[2].value(), Some(&b"k1"[..]));
    }

    #[test]
    fn attribute_errors() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let h = token.create_object(s, &aes_template("key")).unwrap();

        let mut tiny = [0u8; 4];
        let mut queries = [
            AttributeQuery::size(AttributeType::MODULUS),
            AttributeQuery::fill(AttributeType::VALUE, &mut tiny),
            AttributeQuery::size(AttributeType::LABEL),
        ];
        assert_eq!(
            token.get_attribute_value(s, h, &mut queries),
            Err(KmsError::AttributeTypeInvalid)
        );
        assert_eq!(queries[0].len, None);
        assert_eq!(queries[1].len, None);
        assert_eq!(queries[2].len, Some(3));

        let mut sensitive = aes_template("hidden");
        sensitive.push(Attribute::bool(AttributeType::EXTRACTABLE, false));
        let h = token.create_object(s, &sensitive).unwrap();
        let mut queries = [AttributeQuery::size(AttributeType::LABEL)];
        assert_eq!(
            token.get_attribute_value(s, h, &mut queries),
            Err(KmsError::AttributeSensitive)
        );
        assert_eq!(queries[0].len, None);
    }

    #[test]
    fn destroy_rules() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let h = token.create_object(s, &aes_template("gone")).unwrap();
        token.destroy_object(s, h).unwrap();
        assert_eq!(token.destroy_object(s, h), Err(KmsError::ObjectHandleInvalid));

        let mut pinned = aes_template("pinned");
        pinned.push(Attribute::bool(AttributeType::DESTROYABLE, false));
        let h = token.create_object(s, &pinned).unwrap();
        assert_eq!(token.destroy_object(s, h), Err(KmsError::ActionProhibited));
        assert_eq!(token.destroy_object(s, ObjectHandle(1)), Err(KmsError::ActionProhibited));
    }

    #[test]
    fn search_pages_through_results() {
        let mut token = make_token();
        let s = make_session(&mut token);
        let handles: Vec<_> = (0..5)
            .map(|i| token.create_object(s, &aes_template(&format!("k{i}"))).unwrap())
            .collect();

        token.find_objects_init(s, &[Attribute::class(ObjectClass::SECRET_KEY)]).unwrap();
        assert_eq!(token.session_info(s).unwrap().state, SessionState::Search);
        assert_eq!(token.find_objects(s, 3).unwrap(), handles[..3]);
        assert_eq!(token.find_objects(s, 3).unwrap(), handles[3..]);
        assert!(token.find_objects(s, 3).unwrap().is_empty());
        token.find_objects_final(s).unwrap();
        assert_eq!(token.session_info(s).unwrap().state, SessionState::Idle);
        assert_eq!(token.find_objects(s, 1), Err(KmsError::OperationNotInitialized));
        assert!(token.memory().outstanding().is_empty());
    }

    #[test]
    fn search_matches_template() {
        let mut token = make_token();
        let s = make_session(&mut token);
        token.create_object(s, &aes_template("a")).unwrap();
        let b = token.create_object(s, &aes_template("b")).unwrap();
        token.find_objects_init(s, &[Attribute::label("b")]).unwrap();
        assert_eq!(token.find_objects(s, 10).unwrap(), vec![b]);
        token.find_objects_final(s).unwrap();
    }

    #[test]
    fn disabled_features_are_unsupported() {
        let mut config = KmsConfig::default();
        config.features.search = false;
        config.features.attributes = false;
        let mut token = crate::Token::new(config).unwrap();
        token.initialize().unwrap();
        let s = make_session(&mut token);
        assert_eq!(token.find_objects_init(s, &[]), Err(KmsError::FunctionNotSupported));
        let h = token.create_object(s, &aes_template("x")).unwrap();
        assert_eq!(
            token.get_attribute_value(s, h, &mut []),
            Err(KmsError::FunctionNotSupported)
        );
    }
}
