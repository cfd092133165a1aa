//! Scratch-memory allocator for the key management service.
//!
//! Every operation context, search result table, and staging buffer of the
//! token is allocated here on behalf of a session. Two strategies implement
//! the same [`Allocator`] contract:
//!
//! - [`PoolAllocator`]: a fixed table of pools inside one arena. Every block
//!   is framed by header and footer canaries that are re-validated on free.
//! - [`HeapAllocator`]: the global heap, with an optional fixed-size debug
//!   table that detects double frees and frees of unknown pointers.
//!
//! # Design Rules
//!
//! - Allocation failure is a hard failure (`DEVICE_MEMORY` at the API).
//! - Corruption is reported, never fatal: the block is always released.
//! - Blocks are addressed through opaque [`MemPtr`] handles; payload access
//!   is bounds-checked.

pub mod error;
pub mod heap;
pub mod memory;
pub mod pool;
pub mod traits;

pub use error::{MemError, MemResult};
pub use heap::HeapAllocator;
pub use memory::{AllocatorMode, Memory, MemoryConfig};
pub use pool::PoolAllocator;
pub use traits::{AllocationRecord, Allocator, MemPtr};
