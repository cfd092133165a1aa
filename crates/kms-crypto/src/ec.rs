use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// DER encoding of the P-256 curve OID, as stored in `CKA_EC_PARAMS`.
pub const P256_OID_DER: [u8; 10] = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// Uncompressed SEC1 point length for P-256.
pub const P256_POINT_LEN: usize = 65;

/// P-256 scalar length.
pub const P256_SCALAR_LEN: usize = 32;

const DER_OCTET_STRING: u8 = 0x04;

/// A freshly generated EC key pair.
pub struct EcKeyPair {
    /// Uncompressed SEC1 public point, DER OCTET STRING wrapped.
    pub public_point: Vec<u8>,
    /// Big-endian private scalar.
    pub private_scalar: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("public_point", &hex_prefix(&self.public_point))
            .field("private_scalar", &"[REDACTED]")
            .finish()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Wrap a raw point in a DER OCTET STRING (`04 41 04 ...`).
pub fn ec_point_to_der(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 2);
    out.push(DER_OCTET_STRING);
    out.push(raw.len() as u8);
    out.extend_from_slice(raw);
    out
}

/// Accept an `EC_POINT` either DER-wrapped or raw and return the raw SEC1
/// bytes.
pub fn ec_point_from_attribute(value: &[u8]) -> &[u8] {
    if value.len() > 2
        && value[0] == DER_OCTET_STRING
        && value[1] as usize == value.len() - 2
        && value[1] < 0x80
    {
        &value[2..]
    } else {
        value
    }
}

pub fn parse_public_point(value: &[u8]) -> CryptoResult<PublicKey> {
    PublicKey::from_sec1_bytes(ec_point_from_attribute(value))
        .map_err(|_| CryptoError::InvalidKey("EC point is not on P-256".into()))
}

pub fn parse_secret_scalar(value: &[u8]) -> CryptoResult<SecretKey> {
    if value.len() != P256_SCALAR_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "P-256 scalar is {} bytes",
            value.len()
        )));
    }
    SecretKey::from_slice(value).map_err(|_| CryptoError::InvalidKey("P-256 scalar out of range".into()))
}

/// Generate a P-256 key pair from the OS RNG.
pub fn generate_p256() -> EcKeyPair {
    let secret = SecretKey::random(&mut OsRng);
    let point = secret.public_key().to_encoded_point(false);
    EcKeyPair {
        public_point: ec_point_to_der(point.as_bytes()),
        private_scalar: Zeroizing::new(secret.to_bytes().to_vec()),
    }
}

/// ECDH over P-256 with a null KDF: the shared secret is the raw x
/// coordinate.
pub fn ecdh_p256(private_scalar: &[u8], peer_point: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let secret = parse_secret_scalar(private_scalar)?;
    let peer = parse_public_point(peer_point)?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}
