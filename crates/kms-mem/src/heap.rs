use std::collections::{HashMap, HashSet};
use std::panic::Location;

use kms_types::SessionHandle;
use tracing::warn;

use crate::error::{MemError, MemResult};
use crate::traits::{AllocationRecord, Allocator, MemPtr};

/// Capacity of the heap debug table.
pub const DEBUG_TABLE_SIZE: usize = 10;

struct HeapBlock {
    data: Vec<u8>,
}

/// General-purpose allocator backed by the global heap.
///
/// With debug tracking enabled, a fixed table of [`DEBUG_TABLE_SIZE`] entries
/// records owner, size and call site of each allocation. The table is
/// best-effort: allocations made while it is full are remembered as
/// untracked, left out of [`Allocator::outstanding`], and freed normally.
pub struct HeapAllocator {
    blocks: HashMap<u32, HeapBlock>,
    next_id: u32,
    debug_table: Option<Vec<Option<AllocationRecord>>>,
    /// Live blocks that did not fit in the debug table.
    untracked: HashSet<u32>,
    clean_on_free: bool,
}

impl HeapAllocator {
    pub fn new(debug: bool, clean_on_free: bool) -> Self {
        Self {
            blocks: HashMap::new(),
            next_id: 1,
            debug_table: debug.then(|| vec![None; DEBUG_TABLE_SIZE]),
            untracked: HashSet::new(),
            clean_on_free,
        }
    }

    /// Number of live blocks.
    pub fn live_count(&self) -> usize {
        self.blocks.len()
    }

    fn track(&mut self, record: AllocationRecord) {
        let Some(table) = self.debug_table.as_mut() else {
            return;
        };
        match table.iter_mut().find(|e| e.is_none()) {
            Some(entry) => *entry = Some(record),
            None => {
                warn!(ptr = ?record.ptr, "heap debug table full, allocation untracked");
                self.untracked.insert(record.ptr.0);
            }
        }
    }

    /// Remove `ptr` from the debug table or the untracked set. Returns
    /// `false` when debug tracking is on and the pointer is in neither.
    fn untrack(&mut self, ptr: MemPtr) -> bool {
        let Some(table) = self.debug_table.as_mut() else {
            return true;
        };
        match table
            .iter_mut()
            .find(|e| e.as_ref().is_some_and(|r| r.ptr == ptr))
        {
            Some(entry) => {
                *entry = None;
                true
            }
            None => self.untracked.remove(&ptr.0),
        }
    }
}

impl Allocator for HeapAllocator {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn alloc(
        &mut self,
        owner: SessionHandle,
        size: usize,
        caller: &'static Location<'static>,
    ) -> Option<MemPtr> {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1)?;
        self.blocks.insert(
            id,
            HeapBlock {
                data: vec![0u8; size],
            },
        );
        let ptr = MemPtr(id);
        self.track(AllocationRecord {
            ptr,
            owner,
            requested: size,
            caller,
        });
        Some(ptr)
    }

    fn free(&mut self, _owner: SessionHandle, ptr: MemPtr) -> MemResult<()> {
        let Some(mut block) = self.blocks.remove(&ptr.0) else {
            return if ptr.0 != 0 && ptr.0 < self.next_id {
                Err(MemError::DoubleFree(ptr))
            } else {
                Err(MemError::UnknownPointer(ptr))
            };
        };
        if self.clean_on_free {
            block.data.fill(0);
        }
        if self.untrack(ptr) {
            Ok(())
        } else {
            Err(MemError::UnknownPointer(ptr))
        }
    }

    fn bytes(&self, ptr: MemPtr) -> Option<&[u8]> {
        self.blocks.get(&ptr.0).map(|b| b.data.as_slice())
    }

    fn bytes_mut(&mut self, ptr: MemPtr) -> Option<&mut [u8]> {
        self.blocks.get_mut(&ptr.0).map(|b| b.data.as_mut_slice())
    }

    fn outstanding(&self) -> Vec<AllocationRecord> {
        self.debug_table
            .iter()
            .flatten()
            .flatten()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("live", &self.blocks.len())
            .field("debug", &self.debug_table.is_some())
            .finish()
    }
}
