use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use kms_types::ObjectHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ObjectError, ObjectResult};
use crate::object::KeyObject;
use crate::traits::ObjectStorage;

/// One persisted NVM slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct NvmSlot {
    id: u32,
    crc32: u32,
    data: Vec<u8>,
}

/// On-disk NVM image.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct NvmImage {
    slots: Vec<NvmSlot>,
}

/// File-persisted NVM tier.
///
/// The whole image is held in memory and rewritten on every mutation:
///
/// ```text
/// bincode(NvmImage { slots: [ { id, crc32(data), data }, ... ] })
/// ```
///
/// On open, a slot whose checksum or object encoding fails validation is
/// dropped with a warning; the remaining slots stay usable.
pub struct FileStorage {
    path: PathBuf,
    objects: RwLock<BTreeMap<ObjectHandle, KeyObject>>,
}

impl FileStorage {
    /// Open the image at `path`, or start empty if the file does not exist.
    pub fn open(path: &Path) -> ObjectResult<Self> {
        let objects = if path.exists() {
            Self::load(path)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), objects = objects.len(), "NVM image opened");
        Ok(Self {
            path: path.to_path_buf(),
            objects: RwLock::new(objects),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(path: &Path) -> ObjectResult<BTreeMap<ObjectHandle, KeyObject>> {
        let raw = fs::read(path)?;
        let image: NvmImage =
            bincode::deserialize(&raw).map_err(|e| ObjectError::Serialization(e.to_string()))?;

        let mut objects = BTreeMap::new();
        for slot in image.slots {
            if crc32fast::hash(&slot.data) != slot.crc32 {
                warn!(id = slot.id, "NVM slot checksum mismatch, slot dropped");
                continue;
            }
            match KeyObject::from_bytes(slot.data) {
                Ok(object) if object.id().value() == slot.id => {
                    objects.insert(object.id(), object);
                }
                Ok(object) => {
                    warn!(id = slot.id, object_id = object.id().value(), "NVM slot id mismatch, slot dropped");
                }
                Err(e) => warn!(id = slot.id, error = %e, "NVM slot malformed, slot dropped"),
            }
        }
        Ok(objects)
    }

    fn flush(&self, objects: &BTreeMap<ObjectHandle, KeyObject>) -> ObjectResult<()> {
        let image = NvmImage {
            slots: objects
                .values()
                .map(|o| NvmSlot {
                    id: o.id().value(),
                    crc32: crc32fast::hash(o.as_bytes()),
                    data: o.as_bytes().to_vec(),
                })
                .collect(),
        };
        let encoded =
            bincode::serialize(&image).map_err(|e| ObjectError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Write-then-rename: the image on disk is always complete.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ObjectStorage for FileStorage {
    fn read(&self, id: ObjectHandle) -> ObjectResult<Option<KeyObject>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(&id).cloned())
    }

    fn write(&self, object: &KeyObject) -> ObjectResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.insert(object.id(), object.clone());
        self.flush(&map)
    }

    fn remove(&self, id: ObjectHandle) -> ObjectResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        let existed = map.remove(&id).is_some();
        if existed {
            self.flush(&map)?;
        }
        Ok(existed)
    }

    fn ids(&self) -> ObjectResult<Vec<ObjectHandle>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.keys().copied().collect())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .field("object_count", &self.len())
            .finish()
    }
}
