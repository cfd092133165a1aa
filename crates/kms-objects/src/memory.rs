use std::collections::BTreeMap;
use std::sync::RwLock;

use kms_types::ObjectHandle;

use crate::error::{ObjectError, ObjectResult};
use crate::object::KeyObject;
use crate::traits::ObjectStorage;

/// In-memory object table.
///
/// Used for the volatile RAM tier and, in read-only form, for the embedded
/// ROM table. Objects are cloned on read/write.
pub struct InMemoryStorage {
    objects: RwLock<BTreeMap<ObjectHandle, KeyObject>>,
    read_only: bool,
}

impl InMemoryStorage {
    /// Create an empty, writable table.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            read_only: false,
        }
    }

    /// Create a read-only table holding `objects`, keyed by their ids.
    pub fn read_only(objects: impl IntoIterator<Item = KeyObject>) -> Self {
        let objects = objects.into_iter().map(|o| (o.id(), o)).collect();
        Self {
            objects: RwLock::new(objects),
            read_only: true,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Drop every object (device wipe of a volatile tier).
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStorage for InMemoryStorage {
    fn read(&self, id: ObjectHandle) -> ObjectResult<Option<KeyObject>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(&id).cloned())
    }

    fn write(&self, object: &KeyObject) -> ObjectResult<()> {
        if self.read_only {
            return Err(ObjectError::ReadOnly);
        }
        let mut map = self.objects.write().expect("lock poisoned");
        map.insert(object.id(), object.clone());
        Ok(())
    }

    fn remove(&self, id: ObjectHandle) -> ObjectResult<bool> {
        if self.read_only {
            return Err(ObjectError::ReadOnly);
        }
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(&id).is_some())
    }

    fn ids(&self) -> ObjectResult<Vec<ObjectHandle>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.keys().copied().collect())
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("object_count", &self.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectBuilder, Packing};
    use kms_types::Attribute;

    fn make_object(id: u32, label: &str) -> KeyObject {
        ObjectBuilder::new()
            .push(Attribute::label(label), Packing::Raw)
            .build(ObjectHandle(id))
            .unwrap()
    }

    #[test]
    fn write_then_read() {
        let store = InMemoryStorage::new();
        let obj = make_object(50, "a");
        store.write(&obj).unwrap();
        assert_eq!(store.read(ObjectHandle(50)).unwrap(), Some(obj));
        assert!(store.read(ObjectHandle(51)).unwrap().is_none());
    }

    #[test]
    fn write_replaces_slot() {
        let store = InMemoryStorage::new();
        store.write(&make_object(50, "a")).unwrap();
        store.write(&make_object(50, "b")).unwrap();
        assert_eq!(store.len(), 1);
        let got = store.read(ObjectHandle(50)).unwrap().unwrap();
        assert_eq!(got.find_attribute(kms_types::AttributeType::LABEL).unwrap().value(), b"b");
    }

    #[test]
    fn ids_are_sorted() {
        let store = InMemoryStorage::new();
        for id in [60, 52, 55] {
            store.write(&make_object(id, "x")).unwrap();
        }
        assert_eq!(
            store.ids().unwrap(),
            vec![ObjectHandle(52), ObjectHandle(55), ObjectHandle(60)]
        );
    }

    #[test]
    fn remove_reports_existence() {
        let store = InMemoryStorage::new();
        store.write(&make_object(50, "a")).unwrap();
        assert!(store.remove(ObjectHandle(50)).unwrap());
        assert!(!store.remove(ObjectHandle(50)).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn read_only_table_rejects_mutation() {
        let store = InMemoryStorage::read_only([make_object(1, "rom")]);
        assert!(store.contains(ObjectHandle(1)).unwrap());
        assert!(matches!(store.write(&make_object(2, "x")), Err(ObjectError::ReadOnly)));
        assert!(matches!(store.remove(ObjectHandle(1)), Err(ObjectError::ReadOnly)));
    }
}
