use std::panic::Location;

use kms_types::SessionHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MemError, MemResult};
use crate::heap::HeapAllocator;
use crate::pool::{PoolAllocator, DEFAULT_POOLS};
use crate::traits::{AllocationRecord, Allocator, MemPtr};

/// Allocation strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorMode {
    #[default]
    Pool,
    Heap,
}

/// Allocator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub mode: AllocatorMode,
    /// Pool sizes in bytes (pool mode only).
    pub pools: Vec<usize>,
    /// Zero payloads on free.
    pub clean_on_free: bool,
    /// Record owner, caller and requested size of every allocation.
    pub debug: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: AllocatorMode::Pool,
            pools: DEFAULT_POOLS.to_vec(),
            clean_on_free: true,
            debug: true,
        }
    }
}

/// The token's scratch memory: one active allocator strategy behind a common
/// front end that raises the reporting events.
pub struct Memory {
    allocator: Box<dyn Allocator>,
}

impl Memory {
    /// Build the allocator selected by `config`.
    pub fn new(config: &MemoryConfig) -> Self {
        let allocator: Box<dyn Allocator> = match config.mode {
            AllocatorMode::Pool => Box::new(PoolAllocator::new(
                &config.pools,
                config.debug,
                config.clean_on_free,
            )),
            AllocatorMode::Heap => Box::new(HeapAllocator::new(config.debug, config.clean_on_free)),
        };
        Self { allocator }
    }

    /// Wrap a custom allocator.
    pub fn with_allocator(allocator: Box<dyn Allocator>) -> Self {
        Self { allocator }
    }

    pub fn strategy(&self) -> &'static str {
        self.allocator.name()
    }

    /// Allocate `size` bytes for `owner`.
    ///
    /// Failure is reported through a `warn!` event and surfaces as
    /// [`MemError::OutOfMemory`]; callers treat it as a hard failure.
    #[track_caller]
    pub fn alloc(&mut self, owner: SessionHandle, size: usize) -> MemResult<MemPtr> {
        let caller = Location::caller();
        match self.allocator.alloc(owner, size, caller) {
            Some(ptr) => {
                debug!(session = owner.value(), size, ?ptr, "alloc");
                Ok(ptr)
            }
            None => {
                warn!(
                    session = owner.value(),
                    size,
                    strategy = self.allocator.name(),
                    %caller,
                    "memory allocation failure"
                );
                Err(MemError::OutOfMemory { requested: size })
            }
        }
    }

    /// Allocate a block holding a copy of `data`.
    #[track_caller]
    pub fn alloc_copy(&mut self, owner: SessionHandle, data: &[u8]) -> MemResult<MemPtr> {
        let ptr = self.alloc(owner, data.len())?;
        if let Some(buf) = self.allocator.bytes_mut(ptr) {
            buf.copy_from_slice(data);
        }
        Ok(ptr)
    }

    /// Release a block. Corruption signals are reported through a `warn!`
    /// event and returned; the block is released regardless.
    pub fn free(&mut self, owner: SessionHandle, ptr: MemPtr) -> MemResult<()> {
        let result = self.allocator.free(owner, ptr);
        match &result {
            Ok(()) => debug!(session = owner.value(), ?ptr, "free"),
            Err(err) => warn!(session = owner.value(), ?ptr, error = %err, "memory corruption reported on free"),
        }
        result
    }

    pub fn bytes(&self, ptr: MemPtr) -> MemResult<&[u8]> {
        self.allocator
            .bytes(ptr)
            .ok_or(MemError::UnknownPointer(ptr))
    }

    pub fn bytes_mut(&mut self, ptr: MemPtr) -> MemResult<&mut [u8]> {
        self.allocator
            .bytes_mut(ptr)
            .ok_or(MemError::UnknownPointer(ptr))
    }

    /// Live allocations known to the debug tracker.
    pub fn outstanding(&self) -> Vec<AllocationRecord> {
        self.allocator.outstanding()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("strategy", &self.allocator.name())
            .finish()
    }
}
