use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle of a key object.
///
/// A handle is only meaningful relative to the [`ObjectRange`] whose
/// [`HandleRange`] contains it. Handle `0` is reserved for "not known".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl ObjectHandle {
    /// The "key not known" handle: objects carry it until they are committed.
    pub const UNKNOWN: Self = Self(0);

    /// Raw handle value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` for the reserved "not known" handle.
    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({})", self.0)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Externally visible session handle (1-based; `0` is invalid).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u32);

impl SessionHandle {
    /// The invalid session handle, also used as "no owner" by the allocator.
    pub const INVALID: Self = Self(0);

    /// Handle for a 0-based table index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// 0-based table index, or `None` for the invalid handle.
    pub fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }

    /// Raw handle value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionHandle({})", self.0)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The storage tier an object handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRange {
    /// Read-only objects compiled into the firmware image.
    Embedded,
    /// NVM objects installed by blob import.
    NvmStatic,
    /// NVM objects created at run time.
    NvmDynamic,
    /// Volatile RAM objects created at run time.
    VmDynamic,
    /// Static objects of an external token.
    ExtTokenStatic,
    /// Dynamic objects of an external token.
    ExtTokenDynamic,
    /// The handle is outside every configured range.
    Unknown,
}

impl ObjectRange {
    /// Resolution precedence: the order ranges are probed and enumerated.
    pub const PRECEDENCE: [ObjectRange; 6] = [
        ObjectRange::Embedded,
        ObjectRange::NvmStatic,
        ObjectRange::NvmDynamic,
        ObjectRange::VmDynamic,
        ObjectRange::ExtTokenStatic,
        ObjectRange::ExtTokenDynamic,
    ];

    /// Returns `true` for tiers whose objects are created at run time.
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            Self::NvmDynamic | Self::VmDynamic | Self::ExtTokenDynamic
        )
    }

    /// Returns `true` for the external-token tiers.
    pub fn is_external(self) -> bool {
        matches!(self, Self::ExtTokenStatic | Self::ExtTokenDynamic)
    }
}

impl fmt::Display for ObjectRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embedded => "embedded",
            Self::NvmStatic => "nvm-static",
            Self::NvmDynamic => "nvm-dynamic",
            Self::VmDynamic => "vm-dynamic",
            Self::ExtTokenStatic => "ext-static",
            Self::ExtTokenDynamic => "ext-dynamic",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Inclusive interval `[min, max]` of object handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRange {
    pub min: u32,
    pub max: u32,
}

impl HandleRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Returns `true` if `handle` lies within the interval.
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        handle.0 >= self.min && handle.0 <= self.max
    }

    /// Returns `true` if the two intervals share at least one handle.
    pub fn overlaps(&self, other: &HandleRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Number of handles in the interval.
    pub fn len(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            (self.max - self.min) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of the interval in ascending order.
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> {
        (self.min..=self.max).map(ObjectHandle)
    }
}
