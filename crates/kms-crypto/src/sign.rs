//! Sign and verify: ECDSA over P-256, RSA PKCS#1 v1.5, AES-CMAC.

use aes::cipher::KeyInit;
use aes::{Aes128, Aes192, Aes256};
use cmac::{Cmac, Mac};
use kms_types::{Mechanism, MechanismParams, MechanismType};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher::check_aes_key;
use crate::hash::DigestAlgorithm;
use crate::ec::{parse_public_point, parse_secret_scalar};
use crate::error::{CryptoError, CryptoResult};

/// Raw ECDSA P-256 signature length (`r || s`).
pub const ECDSA_P256_SIGNATURE_LEN: usize = 64;

/// Full AES-CMAC length.
pub const CMAC_LEN: usize = 16;

/// How the message is hashed before signing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prehash {
    /// Caller supplies the hash; its length selects the algorithm.
    Supplied,
    Compute(DigestAlgorithm),
}

impl Prehash {
    fn apply(self, data: &[u8]) -> CryptoResult<(DigestAlgorithm, Vec<u8>)> {
        match self {
            Prehash::Compute(alg) => Ok((alg, alg.hash(data))),
            Prehash::Supplied => DigestAlgorithm::from_hash_len(data.len())
                .map(|alg| (alg, data.to_vec()))
                .ok_or_else(|| {
                    CryptoError::InvalidInput(format!(
                        "{}-byte input is neither a SHA-1 nor a SHA-256 hash",
                        data.len()
                    ))
                }),
        }
    }
}

/// Signature scheme selected by a mechanism.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    Ecdsa(Prehash),
    RsaPkcs1(Prehash),
    AesCmac { mac_len: usize },
}

impl SignatureScheme {
    pub fn from_mechanism(mechanism: &Mechanism) -> CryptoResult<Self> {
        let scheme = match mechanism.kind {
            MechanismType::ECDSA => Self::Ecdsa(Prehash::Supplied),
            MechanismType::ECDSA_SHA1 => Self::Ecdsa(Prehash::Compute(DigestAlgorithm::Sha1)),
            MechanismType::ECDSA_SHA256 => Self::Ecdsa(Prehash::Compute(DigestAlgorithm::Sha256)),
            MechanismType::RSA_PKCS => Self::RsaPkcs1(Prehash::Supplied),
            MechanismType::SHA1_RSA_PKCS => Self::RsaPkcs1(Prehash::Compute(DigestAlgorithm::Sha1)),
            MechanismType::SHA256_RSA_PKCS => {
                Self::RsaPkcs1(Prehash::Compute(DigestAlgorithm::Sha256))
            }
            MechanismType::AES_CMAC => Self::AesCmac { mac_len: CMAC_LEN },
            MechanismType::AES_CMAC_GENERAL => match &mechanism.params {
                MechanismParams::MacLength(len) if (1..=CMAC_LEN).contains(len) => {
                    Self::AesCmac { mac_len: *len }
                }
                _ => {
                    return Err(CryptoError::InvalidParameter(
                        "CMAC general needs a MAC length in 1..=16".into(),
                    ))
                }
            },
            other => return Err(CryptoError::UnsupportedMechanism(format!("{other:?}"))),
        };
        Ok(scheme)
    }
}

/// Key material extracted from a key object.
pub enum SigningKeyMaterial {
    Aes(Zeroizing<Vec<u8>>),
    EcPrivate(Zeroizing<Vec<u8>>),
    EcPublic(Vec<u8>),
    RsaPrivate {
        modulus: Vec<u8>,
        public_exponent: Vec<u8>,
        private_exponent: Zeroizing<Vec<u8>>,
        primes: Vec<Zeroizing<Vec<u8>>>,
    },
    RsaPublic {
        modulus: Vec<u8>,
        public_exponent: Vec<u8>,
    },
}

impl std::fmt::Debug for SigningKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Aes(_) => "Aes",
            Self::EcPrivate(_) => "EcPrivate",
            Self::EcPublic(_) => "EcPublic",
            Self::RsaPrivate { .. } => "RsaPrivate",
            Self::RsaPublic { .. } => "RsaPublic",
        };
        write!(f, "SigningKeyMaterial::{kind}([REDACTED])")
    }
}

/// A single-shot sign or verify.
pub trait SignatureOperation: Send {
    /// Length of the signature `sign` produces.
    fn signature_len(&self) -> usize;

    fn sign(&mut self, data: &[u8], signature: &mut [u8]) -> CryptoResult<usize>;

    fn verify(&mut self, data: &[u8], signature: &[u8]) -> CryptoResult<()>;
}

/// Build the operation for `scheme` with `key`.
pub fn new_signature(
    scheme: SignatureScheme,
    key: SigningKeyMaterial,
) -> CryptoResult<Box<dyn SignatureOperation>> {
    match (scheme, key) {
        (SignatureScheme::Ecdsa(prehash), SigningKeyMaterial::EcPrivate(scalar)) => {
            let secret = parse_secret_scalar(&scalar)?;
            let signing = SigningKey::from(secret);
            let verifying = VerifyingKey::from(&signing);
            Ok(Box::new(EcdsaOperation { prehash, signing: Some(signing), verifying }))
        }
        (SignatureScheme::Ecdsa(prehash), SigningKeyMaterial::EcPublic(point)) => {
            let verifying = VerifyingKey::from(parse_public_point(&point)?);
            Ok(Box::new(EcdsaOperation { prehash, signing: None, verifying }))
        }
        (
            SignatureScheme::RsaPkcs1(prehash),
            SigningKeyMaterial::RsaPrivate { modulus, public_exponent, private_exponent, primes },
        ) => {
            let private = RsaPrivateKey::from_components(
                BigUint::from_bytes_be(&modulus),
                BigUint::from_bytes_be(&public_exponent),
                BigUint::from_bytes_be(&private_exponent),
                primes.iter().map(|p| BigUint::from_bytes_be(p)).collect(),
            )
            .map_err(|e| CryptoError::InvalidKey(format!("RSA private key: {e}")))?;
            let public = private.to_public_key();
            Ok(Box::new(RsaOperation { prehash, private: Some(private), public }))
        }
        (SignatureScheme::RsaPkcs1(prehash), SigningKeyMaterial::RsaPublic { modulus, public_exponent }) => {
            let public = RsaPublicKey::new(
                BigUint::from_bytes_be(&modulus),
                BigUint::from_bytes_be(&public_exponent),
            )
            .map_err(|e| CryptoError::InvalidKey(format!("RSA public key: {e}")))?;
            Ok(Box::new(RsaOperation { prehash, private: None, public }))
        }
        (SignatureScheme::AesCmac { mac_len }, SigningKeyMaterial::Aes(key)) => {
            check_aes_key(&key)?;
            Ok(Box::new(CmacOperation { key, mac_len }))
        }
        (scheme, key) => Err(CryptoError::InvalidKey(format!(
            "{key:?} cannot be used with {scheme:?}"
        ))),
    }
}

fn write_signature(out: &mut [u8], sig: &[u8]) -> CryptoResult<usize> {
    if out.len() < sig.len() {
        return Err(CryptoError::InvalidInput(format!(
            "signature buffer {} bytes, need {}",
            out.len(),
            sig.len()
        )));
    }
    out[..sig.len()].copy_from_slice(sig);
    Ok(sig.len())
}

// ---------------------------------------------------------------------------
// ECDSA
// ---------------------------------------------------------------------------

struct EcdsaOperation {
    prehash: Prehash,
    signing: Option<SigningKey>,
    verifying: VerifyingKey,
}

impl SignatureOperation for EcdsaOperation {
    fn signature_len(&self) -> usize {
        ECDSA_P256_SIGNATURE_LEN
    }

    fn sign(&mut self, data: &[u8], signature: &mut [u8]) -> CryptoResult<usize> {
        let signing = self
            .signing
            .as_ref()
            .ok_or(CryptoError::Unsupported("sign with a public key"))?;
        let (_, hash) = self.prehash.apply(data)?;
        let sig: Signature = signing
            .sign_prehash(&hash)
            .map_err(|e| CryptoError::Backend(format!("ECDSA sign: {e}")))?;
        write_signature(signature, &sig.to_bytes())
    }

    fn verify(&mut self, data: &[u8], signature: &[u8]) -> CryptoResult<()> {
        if signature.len() != ECDSA_P256_SIGNATURE_LEN {
            return Err(CryptoError::SignatureLength {
                expected: ECDSA_P256_SIGNATURE_LEN,
                actual: signature.len(),
            });
        }
        let (_, hash) = self.prehash.apply(data)?;
        let sig = Signature::from_slice(signature).map_err(|_| CryptoError::SignatureInvalid)?;
        self.verifying
            .verify_prehash(&hash, &sig)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

// ---------------------------------------------------------------------------
// RSA PKCS#1 v1.5
// ---------------------------------------------------------------------------

struct RsaOperation {
    prehash: Prehash,
    private: Option<RsaPrivateKey>,
    public: RsaPublicKey,
}

fn pkcs1v15(alg: DigestAlgorithm) -> Pkcs1v15Sign {
    match alg {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    }
}

impl SignatureOperation for RsaOperation {
    fn signature_len(&self) -> usize {
        self.public.size()
    }

    fn sign(&mut self, data: &[u8], signature: &mut [u8]) -> CryptoResult<usize> {
        let private = self
            .private
            .as_ref()
            .ok_or(CryptoError::Unsupported("sign with a public key"))?;
        let (alg, hash) = self.prehash.apply(data)?;
        let sig = private
            .sign(pkcs1v15(alg), &hash)
            .map_err(|e| CryptoError::Backend(format!("RSA sign: {e}")))?;
        write_signature(signature, &sig)
    }

    fn verify(&mut self, data: &[u8], signature: &[u8]) -> CryptoResult<()> {
        if signature.len() != self.public.size() {
            return Err(CryptoError::SignatureLength {
                expected: self.public.size(),
                actual: signature.len(),
            });
        }
        let (alg, hash) = self.prehash.apply(data)?;
        self.public
            .verify(pkcs1v15(alg), &hash, signature)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

// ---------------------------------------------------------------------------
// AES-CMAC
// ---------------------------------------------------------------------------

struct CmacOperation {
    key: Zeroizing<Vec<u8>>,
    mac_len: usize,
}

impl CmacOperation {
    fn compute(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        match self.key.len() {
            16 => cmac_with::<Cmac<Aes128>>(&self.key, data),
            24 => cmac_with::<Cmac<Aes192>>(&self.key, data),
            _ => cmac_with::<Cmac<Aes256>>(&self.key, data),
        }
    }
}

fn cmac_with<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey(format!("AES key length {}", key.len())))?;
    Mac::update(&mut mac, data);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl SignatureOperation for CmacOperation {
    fn signature_len(&self) -> usize {
        self.mac_len
    }

    fn sign(&mut self, data: &[u8], signature: &mut [u8]) -> CryptoResult<usize> {
        let tag = self.compute(data)?;
        write_signature(signature, &tag[..self.mac_len])
    }

    fn verify(&mut self, data: &[u8], signature: &[u8]) -> CryptoResult<()> {
        if signature.len() != self.mac_len {
            return Err(CryptoError::SignatureLength {
                expected: self.mac_len,
                actual: signature.len(),
            });
        }
        let tag = self.compute(data)?;
        if bool::from(tag[..self.mac_len].ct_eq(signature)) {
            Ok(())
        } else {
            Err(CryptoError::SignatureInvalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::generate_p256;
    use rsa::traits::PrivateKeyParts;

    fn sign_vec(op: &mut dyn SignatureOperation, data: &[u8]) -> Vec<u8> {
        let mut sig = vec![0u8; op.signature_len()];
        let n = op.sign(data, &mut sig).unwrap();
        sig.truncate(n);
        sig
    }

    #[test]
    fn ecdsa_sign_then_verify_with_public() {
        let pair = generate_p256();
        let scheme = SignatureScheme::Ecdsa(Prehash::Compute(DigestAlgorithm::Sha256));
        let mut signer =
            new_signature(scheme, SigningKeyMaterial::EcPrivate(pair.private_scalar.clone()))
                .unwrap();
        let sig = sign_vec(signer.as_mut(), b"message");
        assert_eq!(sig.len(), ECDSA_P256_SIGNATURE_LEN);

        let mut verifier =
            new_signature(scheme, SigningKeyMaterial::EcPublic(pair.public_point.clone())).unwrap();
        verifier.verify(b"message", &sig).unwrap();
        assert_eq!(verifier.verify(b"massage", &sig).unwrap_err(), CryptoError::SignatureInvalid);
        assert!(matches!(
            verifier.verify(b"message", &sig[..63]),
            Err(CryptoError::SignatureLength { .. })
        ));
    }

    #[test]
    fn ecdsa_prehashed_requires_hash_length() {
        let pair = generate_p256();
        let mut signer = new_signature(
            SignatureScheme::Ecdsa(Prehash::Supplied),
            SigningKeyMaterial::EcPrivate(pair.private_scalar),
        )
        .unwrap();
        let mut sig = [0u8; 64];
        assert!(signer.sign(&[0u8; 32], &mut sig).is_ok());
        assert!(signer.sign(&[0u8; 20], &mut sig).is_ok());
        assert!(matches!(signer.sign(&[0u8; 17], &mut sig), Err(CryptoError::InvalidInput(_))));
    }

    #[test]
    fn public_key_cannot_sign() {
        let pair = generate_p256();
        let mut op = new_signature(
            SignatureScheme::Ecdsa(Prehash::Supplied),
            SigningKeyMaterial::EcPublic(pair.public_point),
        )
        .unwrap();
        assert!(op.sign(&[0u8; 32], &mut [0u8; 64]).is_err());
    }

    // RFC 4493 example 2
    #[test]
    fn cmac_matches_rfc4493() {
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let msg = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let mut op = new_signature(
            SignatureScheme::AesCmac { mac_len: CMAC_LEN },
            SigningKeyMaterial::Aes(Zeroizing::new(key.clone())),
        )
        .unwrap();
        let tag = sign_vec(op.as_mut(), &msg);
        assert_eq!(hex::encode(&tag), "070a16b46b4d4144f79bdd9dd04a287c");
        op.verify(&msg, &tag).unwrap();

        let mut short = new_signature(
            SignatureScheme::AesCmac { mac_len: 8 },
            SigningKeyMaterial::Aes(Zeroizing::new(key)),
        )
        .unwrap();
        let truncated = sign_vec(short.as_mut(), &msg);
        assert_eq!(truncated, tag[..8]);
        let mut flipped = truncated.clone();
        flipped[7] ^= 1;
        assert_eq!(short.verify(&msg, &flipped).unwrap_err(), CryptoError::SignatureInvalid);
    }

    #[test]
    fn scheme_from_mechanism() {
        assert_eq!(
            SignatureScheme::from_mechanism(&Mechanism::new(MechanismType::SHA256_RSA_PKCS)).unwrap(),
            SignatureScheme::RsaPkcs1(Prehash::Compute(DigestAlgorithm::Sha256))
        );
        let general = Mechanism::with_params(
            MechanismType::AES_CMAC_GENERAL,
            MechanismParams::MacLength(4),
        );
        assert_eq!(
            SignatureScheme::from_mechanism(&general).unwrap(),
            SignatureScheme::AesCmac { mac_len: 4 }
        );
        assert!(SignatureScheme::from_mechanism(&Mechanism::new(MechanismType::AES_CMAC_GENERAL))
            .is_err());
        assert!(SignatureScheme::from_mechanism(&Mechanism::new(MechanismType::AES_ECB)).is_err());
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let result = new_signature(
            SignatureScheme::AesCmac { mac_len: 16 },
            SigningKeyMaterial::EcPublic(vec![4u8; 65]),
        );
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn rsa_sign_and_verify() {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let material = SigningKeyMaterial::RsaPrivate {
            modulus: private.n().to_bytes_be(),
            public_exponent: private.e().to_bytes_be(),
            private_exponent: Zeroizing::new(private.d().to_bytes_be()),
            primes: private
                .primes()
                .iter()
                .map(|p| Zeroizing::new(p.to_bytes_be()))
                .collect(),
        };
        let scheme = SignatureScheme::RsaPkcs1(Prehash::Compute(DigestAlgorithm::Sha256));
        let mut signer = new_signature(scheme, material).unwrap();
        let sig = sign_vec(signer.as_mut(), b"payload");
        assert_eq!(sig.len(), 128);

        let mut verifier = new_signature(
            scheme,
            SigningKeyMaterial::RsaPublic {
                modulus: private.n().to_bytes_be(),
                public_exponent: private.e().to_bytes_be(),
            },
        )
        .unwrap();
        verifier.verify(b"payload", &sig).unwrap();
        assert_eq!(verifier.verify(b"paylaod", &sig).unwrap_err(), CryptoError::SignatureInvalid);
    }
}
