use crate::error::{ImportError, ImportResult};

/// Total size of the blob header; the encrypted image follows it.
pub const BLOB_HEADER_LEN: usize = 320;
pub const BLOB_MAGIC: [u8; 4] = *b"KMSB";

pub const BLOB_TAG_LEN: usize = 32;
pub const BLOB_IV_LEN: usize = 16;
pub const BLOB_MAC_LEN: usize = 64;

const PROTOCOL_VERSION_OFFSET: usize = 4;
const BLOB_VERSION_OFFSET: usize = 6;
const BLOB_SIZE_OFFSET: usize = 8;
const TAG_OFFSET: usize = 20;
const IV_OFFSET: usize = 84;
/// The MAC covers every header byte before it.
pub const MAC_OFFSET: usize = 128;

/// Parsed view of a 320-byte blob header.
///
/// The raw bytes are kept: the MAC is checked over them, not over a
/// re-encoding of the parsed fields.
#[derive(Clone)]
pub struct BlobHeader {
    raw: [u8; BLOB_HEADER_LEN],
}

impl BlobHeader {
    /// Parse the header at the start of `bytes`. Only the length and magic
    /// are checked; authenticity is the pipeline's job.
    pub fn parse(bytes: &[u8]) -> ImportResult<Self> {
        let raw: [u8; BLOB_HEADER_LEN] = bytes
            .get(..BLOB_HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(ImportError::HeaderLength {
                len: bytes.len(),
                expected: BLOB_HEADER_LEN,
            })?;
        let header = Self { raw };
        if header.magic() != BLOB_MAGIC {
            return Err(ImportError::BadMagic(header.magic()));
        }
        Ok(header)
    }

    /// Assemble an unsigned header. The MAC field is zero until
    /// [`BlobHeader::set_mac`].
    pub fn new(
        protocol_version: u16,
        blob_version: u16,
        blob_size: u32,
        tag: &[u8; BLOB_TAG_LEN],
        iv: &[u8; BLOB_IV_LEN],
    ) -> Self {
        let mut raw = [0u8; BLOB_HEADER_LEN];
        raw[..4].copy_from_slice(&BLOB_MAGIC);
        raw[PROTOCOL_VERSION_OFFSET..PROTOCOL_VERSION_OFFSET + 2]
            .copy_from_slice(&protocol_version.to_le_bytes());
        raw[BLOB_VERSION_OFFSET..BLOB_VERSION_OFFSET + 2].copy_from_slice(&blob_version.to_le_bytes());
        raw[BLOB_SIZE_OFFSET..BLOB_SIZE_OFFSET + 4].copy_from_slice(&blob_size.to_le_bytes());
        raw[TAG_OFFSET..TAG_OFFSET + BLOB_TAG_LEN].copy_from_slice(tag);
        raw[IV_OFFSET..IV_OFFSET + BLOB_IV_LEN].copy_from_slice(iv);
        Self { raw }
    }

    pub fn set_mac(&mut self, mac: &[u8; BLOB_MAC_LEN]) {
        self.raw[MAC_OFFSET..MAC_OFFSET + BLOB_MAC_LEN].copy_from_slice(mac);
    }

    pub fn magic(&self) -> [u8; 4] {
        [self.raw[0], self.raw[1], self.raw[2], self.raw[3]]
    }

    pub fn protocol_version(&self) -> u16 {
        u16::from_le_bytes([self.raw[PROTOCOL_VERSION_OFFSET], self.raw[PROTOCOL_VERSION_OFFSET + 1]])
    }

    pub fn blob_version(&self) -> u16 {
        u16::from_le_bytes([self.raw[BLOB_VERSION_OFFSET], self.raw[BLOB_VERSION_OFFSET + 1]])
    }

    /// Size of the encrypted image in bytes.
    pub fn blob_size(&self) -> usize {
        let b = &self.raw[BLOB_SIZE_OFFSET..BLOB_SIZE_OFFSET + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
    }

    /// SHA-256 of the decrypted image.
    pub fn tag(&self) -> &[u8] {
        &self.raw[TAG_OFFSET..TAG_OFFSET + BLOB_TAG_LEN]
    }

    pub fn iv(&self) -> &[u8] {
        &self.raw[IV_OFFSET..IV_OFFSET + BLOB_IV_LEN]
    }

    /// Raw `r || s` ECDSA-P256 signature.
    pub fn mac(&self) -> &[u8] {
        &self.raw[MAC_OFFSET..MAC_OFFSET + BLOB_MAC_LEN]
    }

    /// The bytes the MAC signs.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.raw[..MAC_OFFSET]
    }

    pub fn as_bytes(&self) -> &[u8; BLOB_HEADER_LEN] {
        &self.raw
    }
}

impl std::fmt::Debug for BlobHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHeader")
            .field("protocol_version", &self.protocol_version())
            .field("blob_version", &self.blob_version())
            .field("blob_size", &self.blob_size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_land_at_fixed_offsets() {
        let mut header = BlobHeader::new(1, 7, 4096, &[0xAA; BLOB_TAG_LEN], &[0x11; BLOB_IV_LEN]);
        header.set_mac(&[0x5C; BLOB_MAC_LEN]);
        let raw = header.as_bytes();
        assert_eq!(&raw[..4], b"KMSB");
        assert_eq!(raw[20], 0xAA);
        assert_eq!(raw[51], 0xAA);
        assert_eq!(raw[52], 0);
        assert_eq!(raw[84], 0x11);
        assert_eq!(raw[100], 0);
        assert_eq!(raw[128], 0x5C);
        assert_eq!(raw[191], 0x5C);
        assert_eq!(raw[192], 0);

        let parsed = BlobHeader::parse(raw).unwrap();
        assert_eq!(parsed.protocol_version(), 1);
        assert_eq!(parsed.blob_version(), 7);
        assert_eq!(parsed.blob_size(), 4096);
        assert_eq!(parsed.signed_bytes().len(), 128);
    }

    #[test]
    fn short_or_foreign_headers_are_rejected() {
        assert!(matches!(
            BlobHeader::parse(&[0u8; 100]),
            Err(ImportError::HeaderLength { len: 100, .. })
        ));
        let mut raw = [0u8; BLOB_HEADER_LEN];
        raw[..4].copy_from_slice(b"KMSX");
        assert!(matches!(BlobHeader::parse(&raw), Err(ImportError::BadMagic(_))));
    }
}
