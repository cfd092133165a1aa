use crate::error::{ImportError, ImportResult};

/// Source of the encrypted blob image.
pub trait FlashReader {
    /// Size of the image in bytes.
    fn size(&self) -> usize;

    /// Fill `buf` with the bytes at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> ImportResult<()>;
}

impl FlashReader for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> ImportResult<()> {
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| self.get(offset..end))
            .ok_or(ImportError::FlashRead {
                offset,
                len: buf.len(),
                size: self.len(),
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl FlashReader for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> ImportResult<()> {
        self.as_slice().read(offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_reads_are_bounds_checked() {
        let image: &[u8] = &[1, 2, 3, 4, 5];
        let mut buf = [0u8; 2];
        image.read(3, &mut buf).unwrap();
        assert_eq!(buf, [4, 5]);
        assert!(matches!(
            image.read(4, &mut buf),
            Err(ImportError::FlashRead { offset: 4, len: 2, size: 5 })
        ));
        assert!(image.read(usize::MAX, &mut buf).is_err());
    }
}
