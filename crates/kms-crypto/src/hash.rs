use digest::DynDigest;
use kms_types::MechanismType;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

use crate::error::{CryptoError, CryptoResult};

/// Supported hash functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn from_mechanism(mechanism: MechanismType) -> CryptoResult<Self> {
        match mechanism {
            MechanismType::SHA_1 => Ok(Self::Sha1),
            MechanismType::SHA256 => Ok(Self::Sha256),
            other => Err(CryptoError::UnsupportedMechanism(format!("{other:?}"))),
        }
    }

    /// Deduce the algorithm of a pre-computed hash from its length.
    pub fn from_hash_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// One-shot hash.
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// A running hash computation.
pub trait DigestOperation: Send {
    fn algorithm(&self) -> DigestAlgorithm;

    fn update(&mut self, data: &[u8]);

    fn output_len(&self) -> usize {
        self.algorithm().output_len()
    }

    /// Produce the digest and reset the state.
    fn finish(&mut self) -> Vec<u8>;
}

/// [`DigestOperation`] over any RustCrypto hash.
pub struct SoftDigest {
    algorithm: DigestAlgorithm,
    inner: Box<dyn DynDigest + Send>,
}

impl SoftDigest {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let inner: Box<dyn DynDigest + Send> = match algorithm {
            DigestAlgorithm::Sha1 => Box::new(Sha1::default()),
            DigestAlgorithm::Sha256 => Box::new(Sha256::default()),
        };
        Self { algorithm, inner }
    }
}

impl DigestOperation for SoftDigest {
    fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finish(&mut self) -> Vec<u8> {
        self.inner.finalize_reset().into_vec()
    }
}

impl std::fmt::Debug for SoftDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDigest")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}
