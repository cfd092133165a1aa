use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute type identifier (`CKA_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeType(pub u32);

impl AttributeType {
    pub const CLASS: Self = Self(0x0000);
    pub const TOKEN: Self = Self(0x0001);
    pub const PRIVATE: Self = Self(0x0002);
    pub const LABEL: Self = Self(0x0003);
    pub const VALUE: Self = Self(0x0011);
    pub const CERTIFICATE_TYPE: Self = Self(0x0080);
    pub const KEY_TYPE: Self = Self(0x0100);
    pub const ID: Self = Self(0x0102);
    pub const SENSITIVE: Self = Self(0x0103);
    pub const ENCRYPT: Self = Self(0x0104);
    pub const DECRYPT: Self = Self(0x0105);
    pub const SIGN: Self = Self(0x0108);
    pub const VERIFY: Self = Self(0x010A);
    pub const DERIVE: Self = Self(0x010C);
    pub const MODULUS: Self = Self(0x0120);
    pub const MODULUS_BITS: Self = Self(0x0121);
    pub const PUBLIC_EXPONENT: Self = Self(0x0122);
    pub const PRIVATE_EXPONENT: Self = Self(0x0123);
    pub const PRIME_1: Self = Self(0x0124);
    pub const PRIME_2: Self = Self(0x0125);
    pub const EXTRACTABLE: Self = Self(0x0162);
    pub const LOCAL: Self = Self(0x0163);
    pub const DESTROYABLE: Self = Self(0x0172);
    pub const EC_PARAMS: Self = Self(0x0180);
    pub const EC_POINT: Self = Self(0x0181);
    pub const HW_FEATURE_TYPE: Self = Self(0x0300);

    /// Returns `true` for key-material attributes, which objects store as
    /// word-packed `u32` values rather than raw bytes.
    pub fn is_word_packed(self) -> bool {
        matches!(
            self,
            Self::VALUE
                | Self::EC_POINT
                | Self::MODULUS
                | Self::PUBLIC_EXPONENT
                | Self::PRIVATE_EXPONENT
                | Self::PRIME_1
                | Self::PRIME_2
        )
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::CLASS => "CLASS",
            Self::TOKEN => "TOKEN",
            Self::PRIVATE => "PRIVATE",
            Self::LABEL => "LABEL",
            Self::VALUE => "VALUE",
            Self::CERTIFICATE_TYPE => "CERTIFICATE_TYPE",
            Self::KEY_TYPE => "KEY_TYPE",
            Self::ID => "ID",
            Self::SENSITIVE => "SENSITIVE",
            Self::ENCRYPT => "ENCRYPT",
            Self::DECRYPT => "DECRYPT",
            Self::SIGN => "SIGN",
            Self::VERIFY => "VERIFY",
            Self::DERIVE => "DERIVE",
            Self::MODULUS => "MODULUS",
            Self::MODULUS_BITS => "MODULUS_BITS",
            Self::PUBLIC_EXPONENT => "PUBLIC_EXPONENT",
            Self::PRIVATE_EXPONENT => "PRIVATE_EXPONENT",
            Self::PRIME_1 => "PRIME_1",
            Self::PRIME_2 => "PRIME_2",
            Self::EXTRACTABLE => "EXTRACTABLE",
            Self::LOCAL => "LOCAL",
            Self::DESTROYABLE => "DESTROYABLE",
            Self::EC_PARAMS => "EC_PARAMS",
            Self::EC_POINT => "EC_POINT",
            Self::HW_FEATURE_TYPE => "HW_FEATURE_TYPE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "CKA_{name}"),
            None => write!(f, "CKA({:#x})", self.0),
        }
    }
}

/// Object class (`CKO_*`), the value of the `CLASS` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectClass(pub u32);

impl ObjectClass {
    pub const DATA: Self = Self(0);
    pub const CERTIFICATE: Self = Self(1);
    pub const PUBLIC_KEY: Self = Self(2);
    pub const PRIVATE_KEY: Self = Self(3);
    pub const SECRET_KEY: Self = Self(4);
}

/// Key type (`CKK_*`), the value of the `KEY_TYPE` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyType(pub u32);

impl KeyType {
    pub const RSA: Self = Self(0x00);
    pub const EC: Self = Self(0x03);
    pub const AES: Self = Self(0x1F);
}

/// A single attribute of a template or key object.
///
/// Numeric attributes are encoded as little-endian `u32`, booleans as one
/// byte (`0` or `1`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub kind: AttributeType,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Attribute carrying raw bytes.
    pub fn bytes(kind: AttributeType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Attribute carrying a little-endian `u32`.
    pub fn u32(kind: AttributeType, value: u32) -> Self {
        Self::bytes(kind, value.to_le_bytes().to_vec())
    }

    /// Attribute carrying a boolean.
    pub fn bool(kind: AttributeType, value: bool) -> Self {
        Self::bytes(kind, vec![u8::from(value)])
    }

    /// `CLASS` attribute.
    pub fn class(class: ObjectClass) -> Self {
        Self::u32(AttributeType::CLASS, class.0)
    }

    /// `KEY_TYPE` attribute.
    pub fn key_type(key_type: KeyType) -> Self {
        Self::u32(AttributeType::KEY_TYPE, key_type.0)
    }

    /// `LABEL` attribute.
    pub fn label(label: &str) -> Self {
        Self::bytes(AttributeType::LABEL, label.as_bytes().to_vec())
    }

    /// Interpret the value as a little-endian `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Interpret the value as a boolean (first byte non-zero).
    pub fn as_bool(&self) -> Option<bool> {
        self.value.first().map(|b| *b != 0)
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}={}", self.kind, hex::encode(&self.value))
    }
}

/// First attribute of `kind` in a template.
pub fn find_in_template(template: &[Attribute], kind: AttributeType) -> Option<&Attribute> {
    template.iter().find(|a| a.kind == kind)
}
