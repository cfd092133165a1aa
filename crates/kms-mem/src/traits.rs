use std::fmt;
use std::panic::Location;

use kms_types::SessionHandle;

use crate::error::MemResult;

/// Opaque handle to an allocated block.
///
/// The value is allocator specific (pool index or heap block id); callers
/// only pass it back to the allocator that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemPtr(pub(crate) u32);

impl MemPtr {
    /// Raw value, for diagnostics.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for MemPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemPtr({:#x})", self.0)
    }
}

/// Debug record of a live allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    pub ptr: MemPtr,
    pub owner: SessionHandle,
    pub requested: usize,
    pub caller: &'static Location<'static>,
}

/// Scratch-memory allocator.
///
/// Both the pool and the heap strategy implement this trait, so callers never
/// special-case the active strategy. Implementations must satisfy:
/// - `alloc` never hands out a block that is still in use.
/// - `free` always returns the block to the free set when the pointer is
///   known, even when it reports corruption.
/// - The payload of a block is exactly `requested` bytes long.
pub trait Allocator: Send {
    /// Short strategy name for diagnostics.
    fn name(&self) -> &'static str;

    /// Allocate `size` bytes on behalf of `owner`. Returns `None` when no
    /// block can satisfy the request.
    fn alloc(
        &mut self,
        owner: SessionHandle,
        size: usize,
        caller: &'static Location<'static>,
    ) -> Option<MemPtr>;

    /// Release a block.
    fn free(&mut self, owner: SessionHandle, ptr: MemPtr) -> MemResult<()>;

    /// Payload of a live block.
    fn bytes(&self, ptr: MemPtr) -> Option<&[u8]>;

    /// Mutable payload of a live block.
    fn bytes_mut(&mut self, ptr: MemPtr) -> Option<&mut [u8]>;

    /// Live allocations known to the debug tracker. Empty when debug tracking
    /// is disabled.
    fn outstanding(&self) -> Vec<AllocationRecord>;
}
