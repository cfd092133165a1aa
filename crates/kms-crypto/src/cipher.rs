//! AES in ECB, CBC, GCM and CCM modes.
//!
//! ECB and CBC stream whole blocks through `update` and keep the partial
//! tail buffered. GCM and CCM buffer all input and do the authenticated
//! operation once, in `finish`.

use aes::cipher::consts::{U10, U11, U12, U13, U14, U15, U16, U4, U6, U7, U8, U9};
use aes::cipher::generic_array::{ArrayLength, GenericArray};
use aes::cipher::{
    BlockCipher, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, BlockSizeUser, KeyInit,
    KeyIvInit,
};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::AeadInPlace;
use aes_gcm::AesGcm;
use ccm::Ccm;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// GCM nonce length accepted by the backend.
pub const GCM_IV_LEN: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Cipher mode and its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Ecb,
    Cbc { iv: [u8; BLOCK_LEN] },
    Gcm { iv: Vec<u8>, aad: Vec<u8>, tag_len: usize },
    Ccm { nonce: Vec<u8>, aad: Vec<u8>, tag_len: usize, data_len: usize },
}

impl CipherMode {
    pub fn tag_len(&self) -> usize {
        match self {
            Self::Gcm { tag_len, .. } | Self::Ccm { tag_len, .. } => *tag_len,
            _ => 0,
        }
    }

    fn validate(&self) -> CryptoResult<()> {
        match self {
            Self::Ecb | Self::Cbc { .. } => Ok(()),
            Self::Gcm { iv, tag_len, .. } => {
                if iv.len() != GCM_IV_LEN {
                    return Err(CryptoError::InvalidParameter(format!(
                        "GCM iv must be {GCM_IV_LEN} bytes, got {}",
                        iv.len()
                    )));
                }
                if !(12..=16).contains(tag_len) {
                    return Err(CryptoError::InvalidParameter(format!(
                        "GCM tag length {tag_len} not supported"
                    )));
                }
                Ok(())
            }
            Self::Ccm { nonce, tag_len, .. } => {
                if !(7..=13).contains(&nonce.len()) {
                    return Err(CryptoError::InvalidParameter(format!(
                        "CCM nonce length {} not supported",
                        nonce.len()
                    )));
                }
                if !(4..=16).contains(tag_len) || tag_len % 2 != 0 {
                    return Err(CryptoError::InvalidParameter(format!(
                        "CCM tag length {tag_len} not supported"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A multi-part encryption or decryption.
///
/// Output sizing follows a query-then-fill pattern: callers ask
/// [`update_len`](Self::update_len) / [`final_len`](Self::final_len) for the
/// number of bytes the next call will write, then provide a buffer at least
/// that long.
pub trait CipherOperation: Send {
    fn direction(&self) -> Direction;

    /// Bytes the next `update` with `input_len` bytes of input will write.
    fn update_len(&self, input_len: usize) -> usize;

    fn update(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<usize>;

    /// Bytes `finish` will write.
    fn final_len(&self) -> usize;

    /// Bytes an `update` with `input_len` bytes followed by `finish` writes
    /// in total.
    fn total_len(&self, input_len: usize) -> usize;

    fn finish(&mut self, output: &mut [u8]) -> CryptoResult<usize>;

    /// Finish an authenticated decryption whose tag arrives out of band.
    /// `input` is appended to the buffered ciphertext before the check.
    fn finish_with_tag(
        &mut self,
        _input: &[u8],
        _tag: &[u8],
        _output: &mut [u8],
    ) -> CryptoResult<usize> {
        Err(CryptoError::Unsupported("finish_with_tag"))
    }
}

/// Build a cipher operation for `mode` keyed with an AES key of 16, 24 or 32
/// bytes.
pub fn new_cipher(
    mode: CipherMode,
    direction: Direction,
    key: &[u8],
) -> CryptoResult<Box<dyn CipherOperation>> {
    check_aes_key(key)?;
    mode.validate()?;
    match mode {
        CipherMode::Ecb => Ok(Box::new(BlockStream::new(
            block_processor(BlockMode::Ecb, direction, key)?,
            direction,
        ))),
        CipherMode::Cbc { iv } => Ok(Box::new(BlockStream::new(
            block_processor(BlockMode::Cbc(iv), direction, key)?,
            direction,
        ))),
        CipherMode::Gcm { iv, aad, tag_len } => Ok(Box::new(AeadStream {
            kind: AeadKind::Gcm,
            nonce: iv,
            aad,
            tag_len,
            data_len: None,
            key: Zeroizing::new(key.to_vec()),
            direction,
            buffer: Zeroizing::new(Vec::new()),
        })),
        CipherMode::Ccm { nonce, aad, tag_len, data_len } => Ok(Box::new(AeadStream {
            kind: AeadKind::Ccm,
            nonce,
            aad,
            tag_len,
            data_len: Some(data_len),
            key: Zeroizing::new(key.to_vec()),
            direction,
            buffer: Zeroizing::new(Vec::new()),
        })),
    }
}

pub(crate) fn check_aes_key(key: &[u8]) -> CryptoResult<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(CryptoError::InvalidKey(format!("AES key length {n}"))),
    }
}

fn check_output(output: &[u8], needed: usize) -> CryptoResult<()> {
    if output.len() < needed {
        return Err(CryptoError::InvalidInput(format!(
            "output buffer {} bytes, need {needed}",
            output.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ECB / CBC
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum BlockMode {
    Ecb,
    Cbc([u8; BLOCK_LEN]),
}

/// One block in, one block out, chaining state kept inside.
trait BlockProcessor: Send {
    fn process(&mut self, block: &mut [u8]);
}

struct Encrypting<C>(C);
struct Decrypting<C>(C);

impl<C> BlockProcessor for Encrypting<C>
where
    C: BlockEncryptMut + BlockSizeUser<BlockSize = U16> + Send,
{
    fn process(&mut self, block: &mut [u8]) {
        self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

impl<C> BlockProcessor for Decrypting<C>
where
    C: BlockDecryptMut + BlockSizeUser<BlockSize = U16> + Send,
{
    fn process(&mut self, block: &mut [u8]) {
        self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn block_processor(
    mode: BlockMode,
    direction: Direction,
    key: &[u8],
) -> CryptoResult<Box<dyn BlockProcessor>> {
    match key.len() {
        16 => block_processor_for::<Aes128>(mode, direction, key),
        24 => block_processor_for::<Aes192>(mode, direction, key),
        _ => block_processor_for::<Aes256>(mode, direction, key),
    }
}

fn block_processor_for<A>(
    mode: BlockMode,
    direction: Direction,
    key: &[u8],
) -> CryptoResult<Box<dyn BlockProcessor>>
where
    A: BlockCipher
        + BlockEncryptMut
        + BlockDecryptMut
        + BlockSizeUser<BlockSize = U16>
        + KeyInit
        + Send
        + 'static,
{
    let bad_key = |_| CryptoError::InvalidKey(format!("AES key length {}", key.len()));
    let processor: Box<dyn BlockProcessor> = match (mode, direction) {
        (BlockMode::Ecb, Direction::Encrypt) => Box::new(Encrypting(
            ecb::Encryptor::<A>::new_from_slice(key).map_err(bad_key)?,
        )),
        (BlockMode::Ecb, Direction::Decrypt) => Box::new(Decrypting(
            ecb::Decryptor::<A>::new_from_slice(key).map_err(bad_key)?,
        )),
        (BlockMode::Cbc(iv), Direction::Encrypt) => Box::new(Encrypting(
            cbc::Encryptor::<A>::new_from_slices(key, &iv).map_err(bad_key)?,
        )),
        (BlockMode::Cbc(iv), Direction::Decrypt) => Box::new(Decrypting(
            cbc::Decryptor::<A>::new_from_slices(key, &iv).map_err(bad_key)?,
        )),
    };
    Ok(processor)
}

/// Streams whole blocks; input that does not complete a block waits for the
/// next call.
struct BlockStream {
    processor: Box<dyn BlockProcessor>,
    direction: Direction,
    pending: Zeroizing<Vec<u8>>,
}

impl BlockStream {
    fn new(processor: Box<dyn BlockProcessor>, direction: Direction) -> Self {
        Self {
            processor,
            direction,
            pending: Zeroizing::new(Vec::with_capacity(BLOCK_LEN)),
        }
    }
}

impl CipherOperation for BlockStream {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn update_len(&self, input_len: usize) -> usize {
        (self.pending.len() + input_len) / BLOCK_LEN * BLOCK_LEN
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) -> CryptoResult<usize> {
        let total = self.update_len(input.len());
        check_output(output, total)?;

        self.pending.extend_from_slice(input);
        let out = &mut output[..total];
        out.copy_from_slice(&self.pending[..total]);
        for block in out.chunks_exact_mut(BLOCK_LEN) {
            self.processor.process(block);
        }
        self.pending.drain(..total);
        Ok(total)
    }

    fn final_len(&self) -> usize {
        0
    }

    fn total_len(&self, input_len: usize) -> usize {
        self.update_len(input_len)
    }

    fn finish(&mut self, _output: &mut [u8]) -> CryptoResult<usize> {
        if !self.pending.is_empty() {
            return Err(CryptoError::DataLength(format!(
                "{} trailing bytes do not fill a block",
                self.pending.len()
            )));
        }
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// GCM / CCM
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AeadKind {
    Gcm,
    Ccm,
}

enum AeadOp<'a> {
    Seal,
    Open { tag: &'a [u8] },
}

/// Buffers input; the AEAD runs once in `finish`.
///
/// Encryption output is `ciphertext || tag`. GCM decryption expects the tag
/// as the trailing bytes of the input. CCM decryption also accepts the tag
/// separately through `finish_with_tag`.
struct AeadStream {
    kind: AeadKind,
    nonce: Vec<u8>,
    aad: Vec<u8>,
    tag_len: usize,
    data_len: Option<usize>,
    key: Zeroizing<Vec<u8>>,
    direction: Direction,
    buffer: Zeroizing<Vec<u8>>,
}

impl AeadStream {
    fn check_payload_len(&self, len: usize) -> CryptoResult<()> {
        match self.data_len {
            Some(expected) if expected != len => Err(CryptoError::DataLength(format!(
                "CCM payload is {len} bytes, declared {expected}"
            ))),
            _ => Ok(()),
        }
    }

    fn run(&self, buf: &mut [u8], op: AeadOp<'_>) -> CryptoResult<Option<Vec<u8>>> {
        match self.kind {
            AeadKind::Gcm => gcm(&self.key, &self.nonce, &self.aad, self.tag_len, buf, op),
            AeadKind::Ccm => ccm(&self.key, &self.nonce, &self.aad, self.tag_len, buf, op),
        }
    }

    fn open_into(&self, payload_len: usize, tag: &[u8], output: &mut [u8]) -> CryptoResult<usize> {
        self.check_payload_len(payload_len)?;
        check_output(output, payload_len)?;
        let mut work = Zeroizing::new(self.buffer[..payload_len].to_vec());
        self.run(&mut work, AeadOp::Open { tag })?;
        output[..payload_len].copy_from_slice(&work);
        Ok(payload_len)
    }
}

impl CipherOperation for AeadStream {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn update_len(&self, _input_len: usize) -> usize {
        0
    }

    fn update(&mut self, input: &[u8], _output: &mut [u8]) -> CryptoResult<usize> {
        self.buffer.extend_from_slice(input);
        Ok(0)
    }

    fn final_len(&self) -> usize {
        match self.direction {
            Direction::Encrypt => self.buffer.len() + self.tag_len,
            Direction::Decrypt => self.buffer.len().saturating_sub(self.tag_len),
        }
    }

    fn total_len(&self, input_len: usize) -> usize {
        let buffered = self.buffer.len() + input_len;
        match self.direction {
            Direction::Encrypt => buffered + self.tag_len,
            Direction::Decrypt => buffered.saturating_sub(self.tag_len),
        }
    }

    fn finish(&mut self, output: &mut [u8]) -> CryptoResult<usize> {
        match self.direction {
            Direction::Encrypt => {
                self.check_payload_len(self.buffer.len())?;
                let total = self.final_len();
                check_output(output, total)?;
                let n = self.buffer.len();
                let mut work = Zeroizing::new(self.buffer.to_vec());
                let tag = self
                    .run(&mut work, AeadOp::Seal)?
                    .ok_or(CryptoError::Backend("seal produced no tag".into()))?;
                output[..n].copy_from_slice(&work);
                output[n..total].copy_from_slice(&tag);
                Ok(total)
            }
            Direction::Decrypt => {
                if self.buffer.len() < self.tag_len {
                    return Err(CryptoError::DataLength(format!(
                        "{} bytes cannot hold a {}-byte tag",
                        self.buffer.len(),
                        self.tag_len
                    )));
                }
                let payload_len = self.buffer.len() - self.tag_len;
                let tag = self.buffer[payload_len..].to_vec();
                self.open_into(payload_len, &tag, output)
            }
        }
    }

    fn finish_with_tag(
        &mut self,
        input: &[u8],
        tag: &[u8],
        output: &mut [u8],
    ) -> CryptoResult<usize> {
        if self.direction != Direction::Decrypt {
            return Err(CryptoError::Unsupported("finish_with_tag on encryption"));
        }
        if tag.len() != self.tag_len {
            return Err(CryptoError::DataLength(format!(
                "tag is {} bytes, expected {}",
                tag.len(),
                self.tag_len
            )));
        }
        self.buffer.extend_from_slice(input);
        self.open_into(self.buffer.len(), tag, output)
    }
}

fn aead_run<C>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    op: AeadOp<'_>,
) -> CryptoResult<Option<Vec<u8>>>
where
    C: AeadInPlace + KeyInit,
{
    let cipher = <C as KeyInit>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey(format!("AES key length {}", key.len())))?;
    let nonce = GenericArray::from_slice(nonce);
    match op {
        AeadOp::Seal => {
            let tag = cipher
                .encrypt_in_place_detached(nonce, aad, buf)
                .map_err(|_| CryptoError::Backend("AEAD seal failed".into()))?;
            Ok(Some(tag.to_vec()))
        }
        AeadOp::Open { tag } => {
            cipher
                .decrypt_in_place_detached(nonce, aad, buf, GenericArray::from_slice(tag))
                .map_err(|_| CryptoError::AuthenticationFailed)?;
            Ok(None)
        }
    }
}

fn gcm(
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag_len: usize,
    buf: &mut [u8],
    op: AeadOp<'_>,
) -> CryptoResult<Option<Vec<u8>>> {
    match key.len() {
        16 => gcm_with_key::<Aes128>(key, iv, aad, tag_len, buf, op),
        24 => gcm_with_key::<Aes192>(key, iv, aad, tag_len, buf, op),
        _ => gcm_with_key::<Aes256>(key, iv, aad, tag_len, buf, op),
    }
}

fn gcm_with_key<A>(
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag_len: usize,
    buf: &mut [u8],
    op: AeadOp<'_>,
) -> CryptoResult<Option<Vec<u8>>>
where
    A: BlockCipher + BlockSizeUser<BlockSize = U16> + BlockEncrypt + KeyInit,
{
    match tag_len {
        12 => aead_run::<AesGcm<A, U12, U12>>(key, iv, aad, buf, op),
        13 => aead_run::<AesGcm<A, U12, U13>>(key, iv, aad, buf, op),
        14 => aead_run::<AesGcm<A, U12, U14>>(key, iv, aad, buf, op),
        15 => aead_run::<AesGcm<A, U12, U15>>(key, iv, aad, buf, op),
        16 => aead_run::<AesGcm<A, U12, U16>>(key, iv, aad, buf, op),
        n => Err(CryptoError::InvalidParameter(format!("GCM tag length {n}"))),
    }
}

fn ccm(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    tag_len: usize,
    buf: &mut [u8],
    op: AeadOp<'_>,
) -> CryptoResult<Option<Vec<u8>>> {
    match key.len() {
        16 => ccm_with_key::<Aes128>(key, nonce, aad, tag_len, buf, op),
        24 => ccm_with_key::<Aes192>(key, nonce, aad, tag_len, buf, op),
        _ => ccm_with_key::<Aes256>(key, nonce, aad, tag_len, buf, op),
    }
}

fn ccm_with_key<A>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    tag_len: usize,
    buf: &mut [u8],
    op: AeadOp<'_>,
) -> CryptoResult<Option<Vec<u8>>>
where
    A: BlockCipher + BlockSizeUser<BlockSize = U16> + BlockEncrypt + KeyInit,
{
    match tag_len {
        4 => ccm_with_tag::<A, U4>(key, nonce, aad, buf, op),
        6 => ccm_with_tag::<A, U6>(key, nonce, aad, buf, op),
        8 => ccm_with_tag::<A, U8>(key, nonce, aad, buf, op),
        10 => ccm_with_tag::<A, U10>(key, nonce, aad, buf, op),
        12 => ccm_with_tag::<A, U12>(key, nonce, aad, buf, op),
        14 => ccm_with_tag::<A, U14>(key, nonce, aad, buf, op),
        16 => ccm_with_tag::<A, U16>(key, nonce, aad, buf, op),
        n => Err(CryptoError::InvalidParameter(format!("CCM tag length {n}"))),
    }
}

fn ccm_with_tag<A, M>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    op: AeadOp<'_>,
) -> CryptoResult<Option<Vec<u8>>>
where
    A: BlockCipher + BlockSizeUser<BlockSize = U16> + BlockEncrypt + KeyInit,
    M: ArrayLength<u8> + ccm::TagSize,
{
    match nonce.len() {
        7 => aead_run::<Ccm<A, M, U7>>(key, nonce, aad, buf, op),
        8 => aead_run::<Ccm<A, M, U8>>(key, nonce, aad, buf, op),
        9 => aead_run::<Ccm<A, M, U9>>(key, nonce, aad, buf, op),
        10 => aead_run::<Ccm<A, M, U10>>(key, nonce, aad, buf, op),
        11 => aead_run::<Ccm<A, M, U11>>(key, nonce, aad, buf, op),
        12 => aead_run::<Ccm<A, M, U12>>(key, nonce, aad, buf, op),
        13 => aead_run::<Ccm<A, M, U13>>(key, nonce, aad, buf, op),
        n => Err(CryptoError::InvalidParameter(format!("CCM nonce length {n}"))),
    }
}
