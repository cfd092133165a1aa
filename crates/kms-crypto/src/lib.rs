//! Cryptographic backend for the key management service.
//!
//! Provides SHA-1/SHA-256 digests, AES in ECB/CBC/GCM/CCM modes, ECDSA over
//! P-256, RSA PKCS#1 v1.5 signatures, AES-CMAC, P-256 ECDH and key-pair
//! generation, behind the [`CryptoProvider`] trait.
//!
//! All crypto operations wrap established libraries; there is no custom
//! cryptography here.

pub mod cipher;
pub mod ec;
pub mod error;
pub mod hash;
pub mod provider;
pub mod sign;

pub use cipher::{CipherMode, CipherOperation, Direction, BLOCK_LEN, GCM_IV_LEN};
pub use ec::{
    ec_point_from_attribute, ec_point_to_der, EcKeyPair, P256_OID_DER, P256_POINT_LEN,
    P256_SCALAR_LEN,
};
pub use error::{CryptoError, CryptoResult};
pub use hash::{DigestAlgorithm, DigestOperation, SoftDigest};
pub use provider::{CryptoProvider, SoftCrypto};
pub use sign::{
    Prehash, SignatureOperation, SignatureScheme, SigningKeyMaterial, CMAC_LEN,
    ECDSA_P256_SIGNATURE_LEN,
};
