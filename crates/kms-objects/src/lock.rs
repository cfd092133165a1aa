use std::sync::RwLock;

use kms_types::{MechanismType, ObjectHandle};
use tracing::info;

use crate::error::{ObjectError, ObjectResult};

/// Default capacity of each lock table.
pub const DEFAULT_LOCK_CAPACITY: usize = 10;

/// Append-only tables of locked key handles and locked mechanisms.
///
/// There is no unlock: an entry stays until the registry is rebuilt on the
/// next full reset. Locking an entry twice is a no-op; locking into a full
/// table fails with [`ObjectError::LockTableFull`].
pub struct LockRegistry {
    keys: RwLock<Vec<ObjectHandle>>,
    services: RwLock<Vec<MechanismType>>,
    max_keys: usize,
    max_services: usize,
}

impl LockRegistry {
    pub fn new(max_keys: usize, max_services: usize) -> Self {
        Self {
            keys: RwLock::new(Vec::with_capacity(max_keys)),
            services: RwLock::new(Vec::with_capacity(max_services)),
            max_keys,
            max_services,
        }
    }

    pub fn lock_key(&self, handle: ObjectHandle) -> ObjectResult<()> {
        let mut keys = self.keys.write().expect("lock poisoned");
        if keys.contains(&handle) {
            return Ok(());
        }
        if keys.len() >= self.max_keys {
            return Err(ObjectError::LockTableFull {
                capacity: self.max_keys,
            });
        }
        keys.push(handle);
        info!(handle = handle.value(), "key locked");
        Ok(())
    }

    pub fn is_key_locked(&self, handle: ObjectHandle) -> bool {
        self.keys.read().expect("lock poisoned").contains(&handle)
    }

    pub fn lock_service(&self, mechanism: MechanismType) -> ObjectResult<()> {
        let mut services = self.services.write().expect("lock poisoned");
        if services.contains(&mechanism) {
            return Ok(());
        }
        if services.len() >= self.max_services {
            return Err(ObjectError::LockTableFull {
                capacity: self.max_services,
            });
        }
        services.push(mechanism);
        info!(%mechanism, "service locked");
        Ok(())
    }

    pub fn is_service_locked(&self, mechanism: MechanismType) -> bool {
        self.services
            .read()
            .expect("lock poisoned")
            .contains(&mechanism)
    }

    pub fn locked_keys(&self) -> Vec<ObjectHandle> {
        self.keys.read().expect("lock poisoned").clone()
    }

    pub fn locked_services(&self) -> Vec<MechanismType> {
        self.services.read().expect("lock poisoned").clone()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_CAPACITY, DEFAULT_LOCK_CAPACITY)
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("keys", &self.locked_keys())
            .field("services", &self.locked_services())
            .finish()
    }
}
