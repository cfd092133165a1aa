//! Word packing of key material.
//!
//! Key values are stored as `u32` words. Full 4-byte groups are packed
//! big-endian. A trailing group of 1, 2 or 3 bytes is right-aligned in the
//! last word:
//!
//! ```text
//! [b0]         -> 0x000000b0
//! [b0 b1]      -> 0x0000b0b1
//! [b0 b1 b2]   -> 0x00b0b1b2
//! ```
//!
//! Inside an object each word is written little-endian.

/// Number of bytes `len` bytes occupy once packed into words.
pub fn packed_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

/// Pack bytes into words.
pub fn pack_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0u32, |word, b| (word << 8) | u32::from(*b)))
        .collect()
}

/// Unpack `len` bytes from words.
///
/// Returns `None` when `words` holds fewer than `len` bytes.
pub fn unpack_words(words: &[u32], len: usize) -> Option<Vec<u8>> {
    if words.len() * 4 < len {
        return None;
    }
    let mut out = Vec::with_capacity(len);
    let full = len / 4;
    for word in &words[..full] {
        out.extend_from_slice(&word.to_be_bytes());
    }
    let tail = len % 4;
    if tail != 0 {
        out.extend_from_slice(&words[full].to_be_bytes()[4 - tail..]);
    }
    Some(out)
}

/// Pack bytes into the stored representation: words written little-endian.
pub fn pack_bytes(bytes: &[u8]) -> Vec<u8> {
    pack_words(bytes)
        .into_iter()
        .flat_map(u32::to_le_bytes)
        .collect()
}

/// Recover `len` raw bytes from the stored representation.
pub fn unpack_bytes(stored: &[u8], len: usize) -> Option<Vec<u8>> {
    if stored.len() < packed_len(len) {
        return None;
    }
    let words: Vec<u32> = stored[..packed_len(len)]
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    unpack_words(&words, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn full_words_are_big_endian() {
        assert_eq!(
            pack_words(&[1, 2, 3, 4, 5, 6, 7, 8]),
            vec![0x0102_0304, 0x0506_0708]
        );
    }

    #[test]
    fn tails_are_right_aligned() {
        assert_eq!(pack_words(&[1, 2, 3, 4, 5]), vec![0x0102_0304, 0x05]);
        assert_eq!(pack_words(&[1, 2, 3, 4, 5, 6]), vec![0x0102_0304, 0x0506]);
        assert_eq!(pack_words(&[1, 2, 3, 4, 5, 6, 7]), vec![0x0102_0304, 0x05_0607]);
    }

    #[test]
    fn stored_words_are_little_endian() {
        assert_eq!(pack_bytes(&[1, 2, 3, 4, 5]), vec![4, 3, 2, 1, 5, 0, 0, 0]);
    }

    #[test]
    fn unpack_rejects_short_input() {
        assert_eq!(unpack_words(&[0x01020304], 5), None);
        assert_eq!(unpack_bytes(&[0, 0, 0], 3), None);
    }

    #[test]
    fn tail_lengths_round_trip() {
        for len in [1usize, 2, 3, 5, 6, 7, 17] {
            let raw: Vec<u8> = (1..=len as u8).collect();
            assert_eq!(unpack_words(&pack_words(&raw), len).unwrap(), raw);
            assert_eq!(unpack_bytes(&pack_bytes(&raw), len).unwrap(), raw);
        }
    }

    proptest! {
        #[test]
        fn pack_unpack_round_trip(raw in proptest::collection::vec(any::<u8>(), 0..128)) {
            let stored = pack_bytes(&raw);
            prop_assert_eq!(stored.len(), packed_len(raw.len()));
            prop_assert_eq!(unpack_bytes(&stored, raw.len()).unwrap(), raw);
        }
    }
}
