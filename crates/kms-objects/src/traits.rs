use kms_types::ObjectHandle;

use crate::error::ObjectResult;
use crate::object::KeyObject;

/// Backing storage of one object tier (ROM table, NVM image, RAM table).
///
/// All implementations must satisfy these invariants:
/// - Objects are keyed by their committed handle; `write` stores under
///   `object.id()` and replaces any object already stored there.
/// - `read` never returns a malformed object.
/// - `ids` lists stored handles in ascending order.
/// - I/O errors are propagated, never silently ignored.
pub trait ObjectStorage: Send + Sync {
    /// Read an object by handle. Returns `Ok(None)` if the slot is empty.
    fn read(&self, id: ObjectHandle) -> ObjectResult<Option<KeyObject>>;

    /// Store an object under its own id.
    fn write(&self, object: &KeyObject) -> ObjectResult<()>;

    /// Remove an object. Returns `true` if it existed.
    fn remove(&self, id: ObjectHandle) -> ObjectResult<bool>;

    /// Stored handles, ascending.
    fn ids(&self) -> ObjectResult<Vec<ObjectHandle>>;

    /// Check whether a slot is occupied.
    fn contains(&self, id: ObjectHandle) -> ObjectResult<bool> {
        Ok(self.read(id)?.is_some())
    }
}
