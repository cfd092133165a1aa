use std::fmt;

use serde::{Deserialize, Serialize};

/// Mechanism identifier (`CKM_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MechanismType(pub u32);

impl MechanismType {
    pub const RSA_PKCS: Self = Self(0x0001);
    pub const SHA1_RSA_PKCS: Self = Self(0x0006);
    pub const SHA256_RSA_PKCS: Self = Self(0x0040);
    pub const SHA_1: Self = Self(0x0220);
    pub const SHA256: Self = Self(0x0250);
    pub const EC_KEY_PAIR_GEN: Self = Self(0x1040);
    pub const ECDSA: Self = Self(0x1041);
    pub const ECDSA_SHA1: Self = Self(0x1042);
    pub const ECDSA_SHA256: Self = Self(0x1044);
    pub const ECDH1_DERIVE: Self = Self(0x1050);
    pub const AES_ECB: Self = Self(0x1081);
    pub const AES_CBC: Self = Self(0x1082);
    pub const AES_GCM: Self = Self(0x1087);
    pub const AES_CCM: Self = Self(0x1088);
    pub const AES_CMAC: Self = Self(0x108A);
    pub const AES_CMAC_GENERAL: Self = Self(0x108B);
    pub const AES_ECB_ENCRYPT_DATA: Self = Self(0x1104);
    pub const VENDOR_DEFINED: Self = Self(0x8000_0000);

    /// Every mechanism this token knows about, in listing order.
    pub const ALL: [MechanismType; 17] = [
        Self::RSA_PKCS,
        Self::SHA1_RSA_PKCS,
        Self::SHA256_RSA_PKCS,
        Self::SHA_1,
        Self::SHA256,
        Self::EC_KEY_PAIR_GEN,
        Self::ECDSA,
        Self::ECDSA_SHA1,
        Self::ECDSA_SHA256,
        Self::ECDH1_DERIVE,
        Self::AES_ECB,
        Self::AES_CBC,
        Self::AES_GCM,
        Self::AES_CCM,
        Self::AES_CMAC,
        Self::AES_CMAC_GENERAL,
        Self::AES_ECB_ENCRYPT_DATA,
    ];

    /// Symbolic name without the `CKM_` prefix.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::RSA_PKCS => "RSA_PKCS",
            Self::SHA1_RSA_PKCS => "SHA1_RSA_PKCS",
            Self::SHA256_RSA_PKCS => "SHA256_RSA_PKCS",
            Self::SHA_1 => "SHA_1",
            Self::SHA256 => "SHA256",
            Self::EC_KEY_PAIR_GEN => "EC_KEY_PAIR_GEN",
            Self::ECDSA => "ECDSA",
            Self::ECDSA_SHA1 => "ECDSA_SHA1",
            Self::ECDSA_SHA256 => "ECDSA_SHA256",
            Self::ECDH1_DERIVE => "ECDH1_DERIVE",
            Self::AES_ECB => "AES_ECB",
            Self::AES_CBC => "AES_CBC",
            Self::AES_GCM => "AES_GCM",
            Self::AES_CCM => "AES_CCM",
            Self::AES_CMAC => "AES_CMAC",
            Self::AES_CMAC_GENERAL => "AES_CMAC_GENERAL",
            Self::AES_ECB_ENCRYPT_DATA => "AES_ECB_ENCRYPT_DATA",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "CKM_{name}"),
            None => write!(f, "CKM({:#x})", self.0),
        }
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// AES-GCM parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcmParams {
    pub iv: Vec<u8>,
    pub aad: Vec<u8>,
    pub tag_bits: u32,
}

/// AES-CCM parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcmParams {
    /// Total payload length (excluding the tag).
    pub data_len: usize,
    pub nonce: Vec<u8>,
    pub aad: Vec<u8>,
    /// Tag length in bytes.
    pub mac_len: usize,
}

/// ECDH1 derivation parameters. Only the null KDF is supported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhParams {
    pub kdf: u32,
    pub public_data: Vec<u8>,
}

impl EcdhParams {
    /// `CKD_NULL`.
    pub const KDF_NULL: u32 = 1;
}

/// Mechanism-specific parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MechanismParams {
    #[default]
    None,
    /// Initialization vector (AES-CBC).
    Iv(Vec<u8>),
    Gcm(GcmParams),
    Ccm(CcmParams),
    /// Output length of `AES_CMAC_GENERAL`.
    MacLength(usize),
    /// Input data of `AES_ECB_ENCRYPT_DATA`.
    Data(Vec<u8>),
    Ecdh(EcdhParams),
}

/// A mechanism selection: algorithm plus parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanism {
    pub kind: MechanismType,
    pub params: MechanismParams,
}

impl Mechanism {
    /// Mechanism without parameters.
    pub fn new(kind: MechanismType) -> Self {
        Self {
            kind,
            params: MechanismParams::None,
        }
    }

    pub fn with_params(kind: MechanismType, params: MechanismParams) -> Self {
        Self { kind, params }
    }

    pub fn has_params(&self) -> bool {
        !matches!(self.params, MechanismParams::None)
    }
}

impl From<MechanismType> for Mechanism {
    fn from(kind: MechanismType) -> Self {
        Self::new(kind)
    }
}

/// Mechanism capability flags (`CKF_*`).
pub struct MechanismFlags;

impl MechanismFlags {
    pub const HW: u32 = 0x0000_0001;
    pub const ENCRYPT: u32 = 0x0000_0100;
    pub const DECRYPT: u32 = 0x0000_0200;
    pub const DIGEST: u32 = 0x0000_0400;
    pub const SIGN: u32 = 0x0000_0800;
    pub const VERIFY: u32 = 0x0000_2000;
    pub const GENERATE_KEY_PAIR: u32 = 0x0001_0000;
    pub const DERIVE: u32 = 0x0008_0000;
}

/// Key-size bounds and supported functions of a mechanism.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismInfo {
    pub min_key_size: u32,
    pub max_key_size: u32,
    pub flags: u32,
}
