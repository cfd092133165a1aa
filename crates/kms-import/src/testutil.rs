//! Blob sealing and token fixtures shared by the import tests.

use kms_crypto::ec::generate_p256;
use kms_crypto::{
    CipherMode, CryptoProvider, DigestAlgorithm, DigestOperation, Direction, EcKeyPair, Prehash,
    SignatureScheme, SigningKeyMaterial, SoftCrypto, SoftDigest, P256_OID_DER,
};
use kms_objects::{ObjectBuilder, Packing};
use kms_token::{EmbeddedAttribute, EmbeddedObject, KmsConfig, Token};
use kms_types::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};

use crate::header::{BlobHeader, BLOB_IV_LEN, BLOB_MAC_LEN, BLOB_TAG_LEN};

pub(crate) const BLOB_KEY: [u8; 16] = [0x42; 16];
pub(crate) const BLOB_IV: [u8; BLOB_IV_LEN] = [0x24; BLOB_IV_LEN];

fn embedded(id: u32, template: &[Attribute]) -> EmbeddedObject {
    EmbeddedObject {
        id,
        attributes: template
            .iter()
            .map(|a| EmbeddedAttribute {
                kind: a.kind.0,
                hex: hex::encode(&a.value),
                packed: None,
            })
            .collect(),
    }
}

/// A token whose embedded tier holds the blob verify key (handle 1) and the
/// blob decrypt key (handle 2), plus the signing half of the verify key.
pub(crate) fn provisioned_token(config: KmsConfig) -> (Token, EcKeyPair) {
    let signer = generate_p256();
    let mut config = config;
    config.embedded = vec![
        embedded(
            1,
            &[
                Attribute::class(ObjectClass::PUBLIC_KEY),
                Attribute::key_type(KeyType::EC),
                Attribute::bytes(AttributeType::EC_PARAMS, P256_OID_DER.to_vec()),
                Attribute::bytes(AttributeType::EC_POINT, signer.public_point.clone()),
            ],
        ),
        embedded(
            2,
            &[
                Attribute::class(ObjectClass::SECRET_KEY),
                Attribute::key_type(KeyType::AES),
                Attribute::bytes(AttributeType::VALUE, BLOB_KEY.to_vec()),
            ],
        ),
    ];
    let mut token = Token::new(config).unwrap();
    token.initialize().unwrap();
    (token, signer)
}

/// An AES key object stored under `id`, as it appears inside a blob.
pub(crate) fn aes_object(id: u32, value: &[u8], label: &str) -> Vec<u8> {
    ObjectBuilder::new()
        .extend(
            &[
                Attribute::class(ObjectClass::SECRET_KEY),
                Attribute::key_type(KeyType::AES),
                Attribute::bytes(AttributeType::VALUE, value.to_vec()),
                Attribute::label(label),
            ],
            Packing::KeyMaterial,
        )
        .build(ObjectHandle(id))
        .unwrap()
        .into_bytes()
}

/// Encrypt `plaintext` (zero-padded to whole blocks) and produce a signed
/// header for it.
pub(crate) fn seal(signer: &EcKeyPair, plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut padded = plaintext.to_vec();
    padded.resize(plaintext.len().div_ceil(16) * 16, 0);

    let mut digest = SoftDigest::new(DigestAlgorithm::Sha256);
    digest.update(&padded);
    let tag: [u8; BLOB_TAG_LEN] = digest.finish().try_into().unwrap();

    let mut cbc = SoftCrypto
        .cipher(CipherMode::Cbc { iv: BLOB_IV }, Direction::Encrypt, &BLOB_KEY)
        .unwrap();
    let mut image = vec![0u8; padded.len()];
    let n = cbc.update(&padded, &mut image).unwrap();
    cbc.finish(&mut image[n..]).unwrap();

    let mut header = BlobHeader::new(1, 1, image.len() as u32, &tag, &BLOB_IV);
    header.set_mac(&sign_header(signer, &header));
    (header.as_bytes().to_vec(), image)
}

pub(crate) fn sign_header(signer: &EcKeyPair, header: &BlobHeader) -> [u8; BLOB_MAC_LEN] {
    let mut op = SoftCrypto
        .signature(
            SignatureScheme::Ecdsa(Prehash::Compute(DigestAlgorithm::Sha256)),
            SigningKeyMaterial::EcPrivate(signer.private_scalar.clone()),
        )
        .unwrap();
    let mut mac = [0u8; BLOB_MAC_LEN];
    op.sign(header.signed_bytes(), &mut mac).unwrap();
    mac
}
