use zeroize::Zeroizing;

use crate::cipher::{new_cipher, CipherMode, CipherOperation, Direction};
use crate::hash::{DigestAlgorithm, DigestOperation, SoftDigest};
use crate::ec::{ecdh_p256, generate_p256, EcKeyPair};
use crate::error::CryptoResult;
use crate::sign::{new_signature, SignatureOperation, SignatureScheme, SigningKeyMaterial};

/// The cryptographic library the token delegates to.
///
/// Implementations must be stateless between calls: all running state lives
/// in the operation objects they return.
pub trait CryptoProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn digest(&self, algorithm: DigestAlgorithm) -> Box<dyn DigestOperation>;

    fn cipher(
        &self,
        mode: CipherMode,
        direction: Direction,
        key: &[u8],
    ) -> CryptoResult<Box<dyn CipherOperation>>;

    fn signature(
        &self,
        scheme: SignatureScheme,
        key: SigningKeyMaterial,
    ) -> CryptoResult<Box<dyn SignatureOperation>>;

    /// Raw ECDH shared secret (null KDF).
    fn ecdh(&self, private_scalar: &[u8], peer_point: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>>;

    fn generate_ec_key_pair(&self) -> CryptoResult<EcKeyPair>;
}

/// Software provider over the RustCrypto crates.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftCrypto;

impl CryptoProvider for SoftCrypto {
    fn name(&self) -> &'static str {
        "soft"
    }

    fn digest(&self, algorithm: DigestAlgorithm) -> Box<dyn DigestOperation> {
        Box::new(SoftDigest::new(algorithm))
    }

    fn cipher(
        &self,
        mode: CipherMode,
        direction: Direction,
        key: &[u8],
    ) -> CryptoResult<Box<dyn CipherOperation>> {
        new_cipher(mode, direction, key)
    }

    fn signature(
        &self,
        scheme: SignatureScheme,
        key: SigningKeyMaterial,
    ) -> CryptoResult<Box<dyn SignatureOperation>> {
        new_signature(scheme, key)
    }

    fn ecdh(&self, private_scalar: &[u8], peer_point: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        ecdh_p256(private_scalar, peer_point)
    }

    fn generate_ec_key_pair(&self) -> CryptoResult<EcKeyPair> {
        Ok(generate_p256())
    }
}
