use std::collections::BTreeSet;
use std::sync::Arc;

use kms_mem::{MemPtr, Memory};
use kms_types::{
    Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle, ObjectRange, SessionHandle,
};
use tracing::{debug, warn};

use crate::error::{ObjectError, ObjectResult};
use crate::ext::{ExternalToken, NoExternalToken};
use crate::lock::LockRegistry;
use crate::memory::InMemoryStorage;
use crate::object::{KeyObject, ObjectBuilder, Packing};
use crate::ranges::RangeConfig;
use crate::traits::ObjectStorage;

/// Handle-addressed view over every storage tier.
///
/// Resolution walks the tiers in [`ObjectRange::PRECEDENCE`]. Lookups go
/// through the [`LockRegistry`]: a locked handle is indistinguishable from a
/// missing one.
pub struct ObjectStore {
    ranges: RangeConfig,
    embedded: Arc<dyn ObjectStorage>,
    nvm: Arc<dyn ObjectStorage>,
    vm: Arc<dyn ObjectStorage>,
    external: Arc<dyn ExternalToken>,
    locks: LockRegistry,
}

impl ObjectStore {
    /// Store over empty in-memory tiers and no external token.
    pub fn new(ranges: RangeConfig) -> Self {
        Self {
            ranges,
            embedded: Arc::new(InMemoryStorage::read_only(Vec::new())),
            nvm: Arc::new(InMemoryStorage::new()),
            vm: Arc::new(InMemoryStorage::new()),
            external: Arc::new(NoExternalToken),
            locks: LockRegistry::default(),
        }
    }

    pub fn with_embedded(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.embedded = storage;
        self
    }

    pub fn with_nvm(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.nvm = storage;
        self
    }

    pub fn with_vm(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.vm = storage;
        self
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalToken>) -> Self {
        self.external = external;
        self
    }

    pub fn with_locks(mut self, locks: LockRegistry) -> Self {
        self.locks = locks;
        self
    }

    pub fn ranges(&self) -> &RangeConfig {
        &self.ranges
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn external(&self) -> &dyn ExternalToken {
        self.external.as_ref()
    }

    fn storage_for(&self, range: ObjectRange) -> Option<&dyn ObjectStorage> {
        match range {
            ObjectRange::Embedded => Some(self.embedded.as_ref()),
            ObjectRange::NvmStatic | ObjectRange::NvmDynamic => Some(self.nvm.as_ref()),
            ObjectRange::VmDynamic => Some(self.vm.as_ref()),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The tier owning `handle`.
    pub fn resolve(&self, handle: ObjectHandle) -> ObjectRange {
        self.ranges.resolve(handle)
    }

    /// Fetch an object by handle.
    ///
    /// Returns `None` for unknown, empty, or locked handles. The lock check
    /// runs both before and after range resolution.
    pub fn get(&self, handle: ObjectHandle) -> Option<KeyObject> {
        if self.locks.is_key_locked(handle) {
            return None;
        }
        let range = self.resolve(handle);
        let object = match range {
            ObjectRange::Unknown => None,
            ObjectRange::ExtTokenStatic | ObjectRange::ExtTokenDynamic => {
                self.external.get_object(handle)
            }
            _ => self
                .storage_for(range)
                .and_then(|storage| Self::read_logged(storage, handle)),
        };
        if self.locks.is_key_locked(handle) {
            return None;
        }
        object
    }

    fn read_logged(storage: &dyn ObjectStorage, handle: ObjectHandle) -> Option<KeyObject> {
        match storage.read(handle) {
            Ok(object) => object,
            Err(e) => {
                warn!(handle = handle.value(), error = %e, "object read failed");
                None
            }
        }
    }

    /// Handles of objects matching every attribute of `template` (all
    /// objects for an empty template), at most `max_count`.
    ///
    /// Order: tiers in resolution precedence, ascending handles within a tier.
    pub fn find_objects(&self, template: &[Attribute], max_count: usize) -> Vec<ObjectHandle> {
        let mut found = Vec::new();
        for (range, interval) in self.ranges.enabled() {
            if found.len() >= max_count {
                break;
            }
            if range.is_external() {
                let remaining = max_count - found.len();
                found.extend(
                    self.external
                        .find_objects(template, interval, remaining)
                        .into_iter()
                        .filter(|h| !self.locks.is_key_locked(*h))
                        .take(remaining),
                );
                continue;
            }
            let Some(storage) = self.storage_for(range) else {
                continue;
            };
            let ids = match storage.ids() {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(%range, error = %e, "object enumeration failed");
                    continue;
                }
            };
            for handle in ids.into_iter().filter(|h| interval.contains(*h)) {
                if found.len() >= max_count {
                    break;
                }
                if self.resolve(handle) != range {
                    continue;
                }
                if let Some(object) = self.get(handle) {
                    if object.matches(template) {
                        found.push(handle);
                    }
                }
            }
        }
        found
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Serialize one or two templates byte-for-byte into a new object and
    /// store it in the dynamic tier. Returns the committed handle.
    pub fn create_and_store(
        &self,
        mem: &mut Memory,
        owner: SessionHandle,
        template: &[Attribute],
        extra: Option<&[Attribute]>,
    ) -> ObjectResult<ObjectHandle> {
        self.create_with(mem, owner, template, extra, Packing::Raw)
    }

    /// As [`Self::create_and_store`], with key-material attributes
    /// word-packed.
    pub fn create_and_store_packed(
        &self,
        mem: &mut Memory,
        owner: SessionHandle,
        template: &[Attribute],
        extra: Option<&[Attribute]>,
    ) -> ObjectResult<ObjectHandle> {
        self.create_with(mem, owner, template, extra, Packing::KeyMaterial)
    }

    fn create_with(
        &self,
        mem: &mut Memory,
        owner: SessionHandle,
        template: &[Attribute],
        extra: Option<&[Attribute]>,
        packing: Packing,
    ) -> ObjectResult<ObjectHandle> {
        if template.is_empty() || extra.is_some_and(|t| t.is_empty()) {
            return Err(ObjectError::InvalidArguments("empty template".into()));
        }
        let mut builder = ObjectBuilder::new();
        builder.extend(template, packing);
        if let Some(extra) = extra {
            builder.extend(extra, packing);
        }
        self.allocate_and_store(mem, owner, &builder)
    }

    /// Store a secret AES key. `CLASS`, `KEY_TYPE` and the packed `VALUE`
    /// precede the caller's template.
    pub fn create_and_store_for_aes(
        &self,
        mem: &mut Memory,
        owner: SessionHandle,
        key: &[u8],
        template: &[Attribute],
    ) -> ObjectResult<ObjectHandle> {
        if key.is_empty() {
            return Err(ObjectError::InvalidArguments("empty key".into()));
        }
        let mut builder = ObjectBuilder::new();
        builder
            .push(Attribute::class(ObjectClass::SECRET_KEY), Packing::Raw)
            .push(Attribute::key_type(KeyType::AES), Packing::Raw)
            .push(
                Attribute::bytes(AttributeType::VALUE, key.to_vec()),
                Packing::KeyMaterial,
            )
            .extend(template, Packing::KeyMaterial);
        self.allocate_and_store(mem, owner, &builder)
    }

    /// Store an EC key pair as a public and a private object. Returns
    /// `(public, private)` handles. If the private object cannot be stored
    /// the public one is removed again.
    pub fn create_and_store_for_ecc_pair(
        &self,
        mem: &mut Memory,
        owner: SessionHandle,
        public_point: &[u8],
        private_value: &[u8],
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> ObjectResult<(ObjectHandle, ObjectHandle)> {
        if public_point.is_empty() || private_value.is_empty() {
            return Err(ObjectError::InvalidArguments("empty key pair".into()));
        }
        let mut public = ObjectBuilder::new();
        public
            .push(Attribute::class(ObjectClass::PUBLIC_KEY), Packing::Raw)
            .push(Attribute::key_type(KeyType::EC), Packing::Raw)
            .push(
                Attribute::bytes(AttributeType::EC_POINT, public_point.to_vec()),
                Packing::KeyMaterial,
            )
            .push(Attribute::bool(AttributeType::LOCAL, true), Packing::Raw)
            .extend(public_template, Packing::KeyMaterial);
        let public_handle = self.allocate_and_store(mem, owner, &public)?;

        let mut private = ObjectBuilder::new();
        private
            .push(Attribute::class(ObjectClass::PRIVATE_KEY), Packing::Raw)
            .push(Attribute::key_type(KeyType::EC), Packing::Raw)
            .push(
                Attribute::bytes(AttributeType::VALUE, private_value.to_vec()),
                Packing::KeyMaterial,
            )
            .push(Attribute::bool(AttributeType::LOCAL, true), Packing::Raw)
            .extend(private_template, Packing::KeyMaterial);
        match self.allocate_and_store(mem, owner, &private) {
            Ok(private_handle) => Ok((public_handle, private_handle)),
            Err(e) => {
                if let Err(remove_err) = self.remove(public_handle) {
                    warn!(handle = public_handle.value(), error = %remove_err, "public key rollback failed");
                }
                Err(e)
            }
        }
    }

    fn allocate_and_store(
        &self,
        mem: &mut Memory,
        owner: SessionHandle,
        builder: &ObjectBuilder,
    ) -> ObjectResult<ObjectHandle> {
        let ptr = mem.alloc(owner, builder.encoded_len())?;
        let result = self.encode_and_store(mem, ptr, builder);
        // The object is already persisted at this point.
        if let Err(e) = mem.free(owner, ptr) {
            debug!(session = owner.value(), error = %e, "staging block release failed");
        }
        result
    }

    fn encode_and_store(
        &self,
        mem: &mut Memory,
        ptr: MemPtr,
        builder: &ObjectBuilder,
    ) -> ObjectResult<ObjectHandle> {
        let buf = mem.bytes_mut(ptr)?;
        builder.encode_into(buf, ObjectHandle::UNKNOWN)?;
        let object = KeyObject::from_bytes(buf.to_vec())?;
        self.store_dynamic(object)
    }

    /// Commit an object to the lowest free handle of the dynamic tier.
    pub fn store_dynamic(&self, mut object: KeyObject) -> ObjectResult<ObjectHandle> {
        let (range, interval) = self
            .ranges
            .dynamic_target()
            .ok_or(ObjectError::NoDynamicRange)?;
        let storage = self
            .storage_for(range)
            .ok_or(ObjectError::NoDynamicRange)?;
        let used: BTreeSet<ObjectHandle> = storage.ids()?.into_iter().collect();
        let handle = interval
            .handles()
            .find(|h| !used.contains(h))
            .ok_or(ObjectError::RangeFull(range))?;

        object.set_id(handle);
        storage.write(&object)?;
        debug!(handle = handle.value(), %range, size = object.len(), "object stored");
        Ok(handle)
    }

    /// Store an object in NVM under its own id, which must lie in the
    /// NVM-static range.
    pub fn store_nvm_static(&self, object: &KeyObject) -> ObjectResult<ObjectHandle> {
        let handle = object.id();
        if self.resolve(handle) != ObjectRange::NvmStatic {
            return Err(ObjectError::OutOfRange {
                handle,
                range: ObjectRange::NvmStatic,
            });
        }
        self.nvm.write(object)?;
        debug!(handle = handle.value(), size = object.len(), "static object stored");
        Ok(handle)
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove an object from its tier.
    ///
    /// Embedded objects are read-only. An empty slot or unknown handle is
    /// [`ObjectError::OutOfRange`] for the tier it was looked up in.
    pub fn remove(&self, handle: ObjectHandle) -> ObjectResult<()> {
        let range = self.resolve(handle);
        let removed = match range {
            ObjectRange::Embedded => return Err(ObjectError::ReadOnly),
            ObjectRange::ExtTokenStatic | ObjectRange::ExtTokenDynamic => {
                return self
                    .external
                    .destroy_object(handle)
                    .map_err(ObjectError::External);
            }
            ObjectRange::Unknown => false,
            _ => match self.storage_for(range) {
                Some(storage) => storage.remove(handle)?,
                None => false,
            },
        };
        if !removed {
            return Err(ObjectError::OutOfRange { handle, range });
        }
        debug!(handle = handle.value(), %range, "object removed");
        Ok(())
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("ranges", &self.ranges)
            .field("locks", &self.locks)
            .finish()
    }
}
