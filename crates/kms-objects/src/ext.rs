use kms_types::{Attribute, HandleRange, KmsError, KmsResult, ObjectHandle};

use crate::object::KeyObject;

/// Pass-through to an external token owning the external handle ranges.
pub trait ExternalToken: Send + Sync {
    fn initialize(&self) -> KmsResult<()>;

    fn finalize(&self) -> KmsResult<()>;

    /// Look up an object by handle.
    fn get_object(&self, handle: ObjectHandle) -> Option<KeyObject>;

    /// Handles within `range` matching `template`, at most `max_count`.
    fn find_objects(
        &self,
        template: &[Attribute],
        range: HandleRange,
        max_count: usize,
    ) -> Vec<ObjectHandle>;

    fn destroy_object(&self, handle: ObjectHandle) -> KmsResult<()>;
}

/// External token stub: owns no objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExternalToken;

impl ExternalToken for NoExternalToken {
    fn initialize(&self) -> KmsResult<()> {
        Ok(())
    }

    fn finalize(&self) -> KmsResult<()> {
        Ok(())
    }

    fn get_object(&self, _handle: ObjectHandle) -> Option<KeyObject> {
        None
    }

    fn find_objects(
        &self,
        _template: &[Attribute],
        _range: HandleRange,
        _max_count: usize,
    ) -> Vec<ObjectHandle> {
        Vec::new()
    }

    fn destroy_object(&self, _handle: ObjectHandle) -> KmsResult<()> {
        Err(KmsError::ObjectHandleInvalid)
    }
}
