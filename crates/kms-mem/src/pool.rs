use std::panic::Location;

use kms_types::SessionHandle;

use crate::error::{MemError, MemResult};
use crate::traits::{AllocationRecord, Allocator, MemPtr};

/// Canary words at the start of every pool block header.
pub const HEADER_CANARIES: [u32; 2] = [0x5476_2FD6, 0x6AEE_F1D2];

/// Canary words of every pool block footer.
pub const FOOTER_CANARIES: [u32; 4] = [0x6AEE_F1D2, 0x8AE1_C029, 0xDCED_746E, 0x5411_254F];

/// Default pool sizes in bytes.
pub const DEFAULT_POOLS: [usize; 4] = [256, 256, 512, 2048];

// Header word indices.
const W_SIZE: usize = 2;
const W_USED: usize = 3;
const W_SESSION: usize = 4;
const W_CALLER: usize = 5;
const W_REQ_SIZE: usize = 6;

const BASE_HEADER_WORDS: usize = 4;
const DEBUG_HEADER_WORDS: usize = 4;
const FOOTER_LEN: usize = FOOTER_CANARIES.len() * 4;

/// Bookkeeping for one pool block. The authoritative `used` flag lives in the
/// arena header next to the canaries.
#[derive(Clone, Debug)]
struct PoolSlot {
    offset: usize,
    size: usize,
    requested: usize,
    owner: SessionHandle,
    caller: Option<&'static Location<'static>>,
}

/// Fixed-pool allocator over a single byte arena.
///
/// Each pool is laid out as:
///
/// ```text
/// [canary0][canary1][size][used]([session][caller][req_size][reserved])
/// [payload: size bytes][pad: 4 - (size & 3) bytes]
/// [footer canary0..3]
/// ```
///
/// All header and footer words are little-endian `u32`. The debug words are
/// present only when debug tracking is enabled.
pub struct PoolAllocator {
    arena: Vec<u8>,
    slots: Vec<PoolSlot>,
    debug: bool,
    clean_on_free: bool,
}

impl PoolAllocator {
    /// Build the arena for the given pool sizes.
    pub fn new(pools: &[usize], debug: bool, clean_on_free: bool) -> Self {
        let header_len = Self::header_len_for(debug);
        let mut arena = Vec::new();
        let mut slots = Vec::with_capacity(pools.len());

        for &size in pools {
            let offset = arena.len();
            let pad = 4 - (size & 3);
            arena.resize(offset + header_len + size + pad + FOOTER_LEN, 0);
            slots.push(PoolSlot {
                offset,
                size,
                requested: 0,
                owner: SessionHandle::INVALID,
                caller: None,
            });
        }

        let mut allocator = Self {
            arena,
            slots,
            debug,
            clean_on_free,
        };
        for index in 0..allocator.slots.len() {
            allocator.write_canaries(index);
        }
        allocator
    }

    /// Number of pools.
    pub fn pool_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of pools currently in use.
    pub fn used_count(&self) -> usize {
        (0..self.slots.len()).filter(|&i| self.is_used(i)).count()
    }

    fn header_len_for(debug: bool) -> usize {
        let words = if debug {
            BASE_HEADER_WORDS + DEBUG_HEADER_WORDS
        } else {
            BASE_HEADER_WORDS
        };
        words * 4
    }

    fn header_len(&self) -> usize {
        Self::header_len_for(self.debug)
    }

    fn payload_offset(&self, index: usize) -> usize {
        self.slots[index].offset + self.header_len()
    }

    fn footer_offset(&self, index: usize) -> usize {
        let size = self.slots[index].size;
        self.payload_offset(index) + size + 4 - (size & 3)
    }

    fn read_word(&self, at: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.arena[at..at + 4]);
        u32::from_le_bytes(word)
    }

    fn write_word(&mut self, at: usize, value: u32) {
        self.arena[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn header_word(&self, index: usize, word: usize) -> u32 {
        self.read_word(self.slots[index].offset + word * 4)
    }

    fn set_header_word(&mut self, index: usize, word: usize, value: u32) {
        let at = self.slots[index].offset + word * 4;
        self.write_word(at, value);
    }

    fn write_canaries(&mut self, index: usize) {
        for (i, canary) in HEADER_CANARIES.iter().enumerate() {
            self.set_header_word(index, i, *canary);
        }
        let size = self.slots[index].size as u32;
        self.set_header_word(index, W_SIZE, size);
        self.set_header_word(index, W_USED, 0);
        let footer = self.footer_offset(index);
        for (i, canary) in FOOTER_CANARIES.iter().enumerate() {
            self.write_word(footer + i * 4, *canary);
        }
    }

    fn is_used(&self, index: usize) -> bool {
        self.header_word(index, W_USED) != 0
    }

    fn header_intact(&self, index: usize) -> bool {
        HEADER_CANARIES
            .iter()
            .enumerate()
            .all(|(i, c)| self.header_word(index, i) == *c)
            && self.header_word(index, W_SIZE) == self.slots[index].size as u32
    }

    fn footer_intact(&self, index: usize) -> bool {
        let footer = self.footer_offset(index);
        FOOTER_CANARIES
            .iter()
            .enumerate()
            .all(|(i, c)| self.read_word(footer + i * 4) == *c)
    }

    /// Smallest free pool that fits `size`; ties go to the lowest index.
    fn best_fit(&self, size: usize) -> Option<usize> {
        (0..self.slots.len())
            .filter(|&i| !self.is_used(i) && self.slots[i].size >= size)
            .min_by_key(|&i| (self.slots[i].size, i))
    }

    fn live_index(&self, ptr: MemPtr) -> Option<usize> {
        let index = ptr.0 as usize;
        (index < self.slots.len() && self.is_used(index)).then_some(index)
    }
}

impl Allocator for PoolAllocator {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn alloc(
        &mut self,
        owner: SessionHandle,
        size: usize,
        caller: &'static Location<'static>,
    ) -> Option<MemPtr> {
        let index = self.best_fit(size)?;
        self.set_header_word(index, W_USED, 1);
        if self.debug {
            self.set_header_word(index, W_SESSION, owner.value());
            self.set_header_word(index, W_CALLER, caller.line());
            self.set_header_word(index, W_REQ_SIZE, size as u32);
        }
        let slot = &mut self.slots[index];
        slot.requested = size;
        slot.owner = owner;
        slot.caller = Some(caller);
        Some(MemPtr(index as u32))
    }

    fn free(&mut self, _owner: SessionHandle, ptr: MemPtr) -> MemResult<()> {
        let index = ptr.0 as usize;
        if index >= self.slots.len() {
            return Err(MemError::UnknownPointer(ptr));
        }
        if !self.is_used(index) {
            return Err(MemError::DoubleFree(ptr));
        }

        let corruption = if !self.header_intact(index) {
            Some("header")
        } else if !self.footer_intact(index) {
            Some("footer")
        } else {
            None
        };

        // The block goes back to the free set whatever the canaries say.
        if self.clean_on_free {
            let start = self.payload_offset(index);
            let end = start + self.slots[index].size;
            self.arena[start..end].fill(0);
        }
        if corruption.is_some() {
            self.write_canaries(index);
        }
        self.set_header_word(index, W_USED, 0);
        if self.debug {
            self.set_header_word(index, W_SESSION, SessionHandle::INVALID.value());
            self.set_header_word(index, W_CALLER, 0);
            self.set_header_word(index, W_REQ_SIZE, 0);
        }
        let slot = &mut self.slots[index];
        slot.requested = 0;
        slot.owner = SessionHandle::INVALID;
        slot.caller = None;

        match corruption {
            Some(region) => Err(MemError::CanaryMismatch { ptr, region }),
            None => Ok(()),
        }
    }

    fn bytes(&self, ptr: MemPtr) -> Option<&[u8]> {
        let index = self.live_index(ptr)?;
        let start = self.payload_offset(index);
        Some(&self.arena[start..start + self.slots[index].requested])
    }

    fn bytes_mut(&mut self, ptr: MemPtr) -> Option<&mut [u8]> {
        let index = self.live_index(ptr)?;
        let start = self.payload_offset(index);
        let len = self.slots[index].requested;
        Some(&mut self.arena[start..start + len])
    }

    fn outstanding(&self) -> Vec<AllocationRecord> {
        if !self.debug {
            return Vec::new();
        }
        (0..self.slots.len())
            .filter(|&i| self.is_used(i))
            .filter_map(|i| {
                let slot = &self.slots[i];
                Some(AllocationRecord {
                    ptr: MemPtr(i as u32),
                    owner: slot.owner,
                    requested: slot.requested,
                    caller: slot.caller?,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("pools", &self.slots.len())
            .field("used", &self.used_count())
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pool() -> PoolAllocator {
        PoolAllocator::new(&DEFAULT_POOLS, true, true)
    }

    fn here() -> &'static Location<'static> {
        Location::caller()
    }

    const S1: SessionHandle = SessionHandle(1);

    #[test]
    fn alloc_picks_smallest_fitting_pool() {
        let mut pool = make_pool();
        let big = pool.alloc(S1, 1000, here()).unwrap();
        assert_eq!(big, MemPtr(3));
        let mid = pool.alloc(S1, 300, here()).unwrap();
        assert_eq!(mid, MemPtr(2));
        let small = pool.alloc(S1, 10, here()).unwrap();
        assert_eq!(small, MemPtr(0));
    }

    #[test]
    fn payload_has_requested_length() {
        let mut pool = make_pool();
        let p = pool.alloc(S1, 13, here()).unwrap();
        assert_eq!(pool.bytes(p).unwrap().len(), 13);
        pool.bytes_mut(p).unwrap().copy_from_slice(&[7u8; 13]);
        assert_eq!(pool.bytes(p).unwrap(), &[7u8; 13]);
    }

    #[test]
    fn overflowing_capacity_returns_none_and_keeps_existing_blocks() {
        let mut pool = make_pool();
        let mut ptrs = Vec::new();
        for i in 0..4u8 {
            let p = pool.alloc(S1, 200, here()).unwrap();
            pool.bytes_mut(p).unwrap().fill(i);
            ptrs.push(p);
        }
        assert!(pool.alloc(S1, 1, here()).is_none());
        for (i, p) in ptrs.iter().enumerate() {
            assert!(pool.bytes(*p).unwrap().iter().all(|b| *b == i as u8));
        }
    }

    #[test]
    fn too_large_request_fails() {
        let mut pool = make_pool();
        assert!(pool.alloc(S1, 4096, here()).is_none());
    }

    #[test]
    fn free_clears_payload_and_releases() {
        let mut pool = make_pool();
        let p = pool.alloc(S1, 16, here()).unwrap();
        pool.bytes_mut(p).unwrap().fill(0xAA);
        pool.free(S1, p).unwrap();
        assert_eq!(pool.used_count(), 0);
        let start = pool.payload_offset(0);
        assert!(pool.arena[start..start + 16].iter().all(|b| *b == 0));
        assert!(pool.bytes(p).is_none());
    }

    #[test]
    fn double_free_is_reported() {
        let mut pool = make_pool();
        let p = pool.alloc(S1, 16, here()).unwrap();
        pool.free(S1, p).unwrap();
        assert_eq!(pool.free(S1, p), Err(MemError::DoubleFree(p)));
    }

    #[test]
    fn unknown_pointer_is_reported() {
        let mut pool = make_pool();
        assert_eq!(
            pool.free(S1, MemPtr(99)),
            Err(MemError::UnknownPointer(MemPtr(99)))
        );
    }

    #[test]
    fn corrupted_footer_is_reported_but_block_is_freed() {
        let mut pool = make_pool();
        let a = pool.alloc(S1, 256, here()).unwrap();
        let b = pool.alloc(S1, 256, here()).unwrap();
        pool.bytes_mut(b).unwrap().fill(0x55);

        // Overrun one word past the payload and pad of block `a`.
        let footer = pool.footer_offset(a.0 as usize);
        pool.arena[footer..footer + 4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let err = pool.free(S1, a).unwrap_err();
        assert!(matches!(err, MemError::CanaryMismatch { region: "footer", .. }));
        assert!(!pool.is_used(a.0 as usize));
        assert!(pool.footer_intact(a.0 as usize));
        assert!(pool.bytes(b).unwrap().iter().all(|x| *x == 0x55));

        // The repaired block is reusable.
        assert_eq!(pool.alloc(S1, 10, here()), Some(a));
    }

    #[test]
    fn corrupted_header_is_reported() {
        let mut pool = make_pool();
        let a = pool.alloc(S1, 8, here()).unwrap();
        let at = pool.slots[0].offset;
        pool.arena[at] ^= 0x01;
        let err = pool.free(S1, a).unwrap_err();
        assert!(matches!(err, MemError::CanaryMismatch { region: "header", .. }));
        assert_eq!(pool.used_count(), 0);
    }

    #[test]
    fn debug_words_record_owner_and_size() {
        let mut pool = make_pool();
        let p = pool.alloc(SessionHandle(3), 42, here()).unwrap();
        let i = p.0 as usize;
        assert_eq!(pool.header_word(i, W_SESSION), 3);
        assert_eq!(pool.header_word(i, W_REQ_SIZE), 42);
        let records = pool.outstanding();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner, SessionHandle(3));
        assert_eq!(records[0].requested, 42);
    }

    #[test]
    fn padding_is_one_to_four_bytes() {
        let pool = PoolAllocator::new(&[4, 5, 7], false, false);
        // size 4 -> pad 4, size 5 -> pad 3, size 7 -> pad 1
        assert_eq!(pool.footer_offset(0) - pool.payload_offset(0), 8);
        assert_eq!(pool.footer_offset(1) - pool.payload_offset(1), 8);
        assert_eq!(pool.footer_offset(2) - pool.payload_offset(2), 8);
        assert!(pool.outstanding().is_empty());
    }
}
