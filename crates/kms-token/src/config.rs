use std::path::Path;

use kms_mem::{AllocatorMode, MemoryConfig};
use kms_objects::{KeyObject, ObjectBuilder, Packing, RangeConfig};
use kms_types::{Attribute, AttributeType, MechanismType, ObjectHandle, ObjectRange};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::objects::SEARCH_HANDLE_LEN;

/// Which functions of one algorithm are enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionSet {
    pub encrypt: bool,
    pub decrypt: bool,
    pub sign: bool,
    pub verify: bool,
    pub digest: bool,
    pub derive: bool,
}

/// A single function of a [`FunctionSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    Digest,
    Derive,
}

impl FunctionSet {
    pub const NONE: Self = Self {
        encrypt: false,
        decrypt: false,
        sign: false,
        verify: false,
        digest: false,
        derive: false,
    };

    const DIGEST: Self = Self { digest: true, ..Self::NONE };
    const CIPHER: Self = Self { encrypt: true, decrypt: true, ..Self::NONE };
    const SIGNATURE: Self = Self { sign: true, verify: true, ..Self::NONE };
    const DERIVE: Self = Self { derive: true, ..Self::NONE };

    pub fn allows(&self, function: Function) -> bool {
        match function {
            Function::Encrypt => self.encrypt,
            Function::Decrypt => self.decrypt,
            Function::Sign => self.sign,
            Function::Verify => self.verify,
            Function::Digest => self.digest,
            Function::Derive => self.derive,
        }
    }

    pub fn any(&self) -> bool {
        *self != Self::NONE
    }
}

/// Per-algorithm function sets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    pub sha1: FunctionSet,
    pub sha256: FunctionSet,
    pub aes_cbc: FunctionSet,
    pub aes_ccm: FunctionSet,
    pub aes_ecb: FunctionSet,
    pub aes_gcm: FunctionSet,
    pub aes_cmac: FunctionSet,
    pub rsa: FunctionSet,
    pub ecdsa: FunctionSet,
    pub ecdh: FunctionSet,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            sha1: FunctionSet::DIGEST,
            sha256: FunctionSet::DIGEST,
            aes_cbc: FunctionSet::CIPHER,
            aes_ccm: FunctionSet::CIPHER,
            aes_ecb: FunctionSet { derive: true, ..FunctionSet::CIPHER },
            aes_gcm: FunctionSet::CIPHER,
            aes_cmac: FunctionSet::SIGNATURE,
            rsa: FunctionSet::SIGNATURE,
            ecdsa: FunctionSet::SIGNATURE,
            ecdh: FunctionSet::DERIVE,
        }
    }
}

impl AlgorithmConfig {
    /// The function set governing `mechanism`, if it is a known one.
    pub fn for_mechanism(&self, mechanism: MechanismType) -> Option<&FunctionSet> {
        let set = match mechanism {
            MechanismType::SHA_1 => &self.sha1,
            MechanismType::SHA256 => &self.sha256,
            MechanismType::AES_CBC => &self.aes_cbc,
            MechanismType::AES_CCM => &self.aes_ccm,
            MechanismType::AES_ECB | MechanismType::AES_ECB_ENCRYPT_DATA => &self.aes_ecb,
            MechanismType::AES_GCM => &self.aes_gcm,
            MechanismType::AES_CMAC | MechanismType::AES_CMAC_GENERAL => &self.aes_cmac,
            MechanismType::RSA_PKCS | MechanismType::SHA1_RSA_PKCS | MechanismType::SHA256_RSA_PKCS => {
                &self.rsa
            }
            MechanismType::ECDSA
            | MechanismType::ECDSA_SHA1
            | MechanismType::ECDSA_SHA256
            | MechanismType::EC_KEY_PAIR_GEN => &self.ecdsa,
            MechanismType::ECDH1_DERIVE => &self.ecdh,
            _ => return None,
        };
        Some(set)
    }

    pub fn allows(&self, mechanism: MechanismType, function: Function) -> bool {
        self.for_mechanism(mechanism)
            .is_some_and(|set| set.allows(function))
    }
}

/// Optional API families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub objects: bool,
    pub attributes: bool,
    pub search: bool,
    pub derive: bool,
    pub generate: bool,
    pub lock_keys: bool,
    pub lock_services: bool,
    pub import_blob: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            objects: true,
            attributes: true,
            search: true,
            derive: true,
            generate: true,
            lock_keys: true,
            lock_services: true,
            import_blob: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub max_keys: usize,
    pub max_services: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_keys: kms_objects::lock::DEFAULT_LOCK_CAPACITY,
            max_services: kms_objects::lock::DEFAULT_LOCK_CAPACITY,
        }
    }
}

/// Blob import settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Working chunk for streaming the encrypted body.
    pub chunk_size: usize,
    /// Handle of the public key that verifies blob headers.
    pub verify_key: u32,
    /// Handle of the AES key that decrypts blob bodies.
    pub decrypt_key: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            verify_key: 1,
            decrypt_key: 2,
        }
    }
}

/// One attribute of an embedded object, as written in the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedAttribute {
    #[serde(rename = "type")]
    pub kind: u32,
    pub hex: String,
    /// Word-pack the value. Defaults to true for key-material types.
    #[serde(default)]
    pub packed: Option<bool>,
}

/// An object of the embedded (ROM) tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedObject {
    pub id: u32,
    pub attributes: Vec<EmbeddedAttribute>,
}

impl EmbeddedObject {
    /// Encode as a key object stored under `id`.
    pub fn to_object(&self) -> ConfigResult<KeyObject> {
        let fail = |reason: String| ConfigError::EmbeddedObject { id: self.id, reason };
        let mut builder = ObjectBuilder::new();
        for attr in &self.attributes {
            let kind = AttributeType(attr.kind);
            let value = hex::decode(&attr.hex)
                .map_err(|e| fail(format!("attribute {kind:?}: {e}")))?;
            let packing = if attr.packed.unwrap_or_else(|| kind.is_word_packed()) {
                Packing::KeyMaterial
            } else {
                Packing::Raw
            };
            builder.push(Attribute::bytes(kind, value), packing);
        }
        builder
            .build(ObjectHandle(self.id))
            .map_err(|e| fail(e.to_string()))
    }
}

/// Token configuration.
///
/// Replaces a build-time capability matrix: the enabled storage tiers,
/// algorithms and API families are all chosen here, and
/// [`KmsConfig::validate`] enforces their dependencies at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    pub max_sessions: usize,
    /// Capacity of a search context.
    pub search_max_handles: usize,
    pub memory: MemoryConfig,
    pub ranges: RangeConfig,
    pub algorithms: AlgorithmConfig,
    pub features: FeatureConfig,
    pub locks: LockConfig,
    pub import: ImportConfig,
    pub embedded: Vec<EmbeddedObject>,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            search_max_handles: 30,
            memory: MemoryConfig::default(),
            ranges: RangeConfig::default(),
            algorithms: AlgorithmConfig::default(),
            features: FeatureConfig::default(),
            locks: LockConfig::default(),
            import: ImportConfig::default(),
            embedded: Vec::new(),
        }
    }
}

impl KmsConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the dependencies between enabled features, algorithms and
    /// storage tiers.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_sessions == 0 || self.max_sessions >= 255 {
            return Err(ConfigError::InvalidSessionCount(self.max_sessions));
        }
        if self.memory.mode == AllocatorMode::Pool {
            let largest = self.memory.pools.iter().copied().max().ok_or(ConfigError::EmptyPools)?;
            let required = self.search_max_handles * SEARCH_HANDLE_LEN;
            if self.features.search && required > largest {
                return Err(ConfigError::SearchContextTooLarge { required, largest });
            }
        }

        if let Some(range) = self.ranges.invalid_range() {
            return Err(ConfigError::InvalidRange(range));
        }
        if let Some((a, b)) = self.ranges.overlapping_pair() {
            return Err(ConfigError::OverlappingRanges(a, b));
        }
        if self.ranges.nvm_dynamic.is_some() && self.ranges.vm_dynamic.is_some() {
            return Err(ConfigError::ConflictingDynamicRanges);
        }

        let alg = &self.algorithms;
        if self.features.import_blob {
            if self.ranges.nvm_static.is_none() {
                return Err(ConfigError::MissingDependency {
                    feature: "import_blob",
                    requires: "an NVM-static range",
                });
            }
            if !(alg.aes_cbc.decrypt && alg.sha256.digest && alg.ecdsa.verify) {
                return Err(ConfigError::MissingDependency {
                    feature: "import_blob",
                    requires: "aes_cbc.decrypt, sha256.digest and ecdsa.verify",
                });
            }
            if self.import.chunk_size == 0 || self.import.chunk_size % 16 != 0 {
                return Err(ConfigError::InvalidChunkSize(self.import.chunk_size));
            }
        }
        if self.features.derive {
            if !(alg.aes_ecb.derive || alg.ecdh.derive) {
                return Err(ConfigError::MissingDependency {
                    feature: "derive",
                    requires: "aes_ecb.derive or ecdh.derive",
                });
            }
            if self.ranges.dynamic_target().is_none() {
                return Err(ConfigError::MissingDependency {
                    feature: "derive",
                    requires: "a dynamic range",
                });
            }
        }
        if self.features.generate && self.ranges.dynamic_target().is_none() {
            return Err(ConfigError::MissingDependency {
                feature: "generate",
                requires: "a dynamic range",
            });
        }

        for object in &self.embedded {
            if self.ranges.resolve(ObjectHandle(object.id)) != ObjectRange::Embedded {
                return Err(ConfigError::EmbeddedObject {
                    id: object.id,
                    reason: "id outside the embedded range".into(),
                });
            }
            object.to_object()?;
        }
        Ok(())
    }

    /// Encoded objects of the embedded tier.
    pub fn embedded_objects(&self) -> ConfigResult<Vec<KeyObject>> {
        self.embedded.iter().map(EmbeddedObject::to_object).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_types::HandleRange;

    #[test]
    fn default_config_is_valid() {
        let config = KmsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.import.chunk_size, 512);
        assert_eq!(config.memory.pools, vec![256, 256, 512, 2048]);
    }

    #[test]
    fn import_requires_its_algorithms() {
        let mut config = KmsConfig::default();
        config.algorithms.ecdsa.verify = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDependency { feature: "import_blob", .. })
        ));
        config.features.import_blob = false;
        config.validate().unwrap();
    }

    #[test]
    fn derive_requires_a_derive_algorithm() {
        let mut config = KmsConfig::default();
        config.algorithms.aes_ecb.derive = false;
        config.algorithms.ecdh.derive = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDependency { feature: "derive", .. })
        ));
    }

    #[test]
    fn ecb_encrypt_alone_does_not_enable_derive() {
        let mut config = KmsConfig::default();
        config.algorithms.aes_ecb.derive = false;
        config.algorithms.ecdh.derive = false;
        assert!(config.algorithms.aes_ecb.encrypt);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDependency { requires: "aes_ecb.derive or ecdh.derive", .. })
        ));
        config.features.derive = false;
        config.validate().unwrap();
    }

    #[test]
    fn search_context_must_fit_a_pool() {
        let mut config = KmsConfig::default();
        config.memory.pools = vec![64, 128];
        config.search_max_handles = 33;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SearchContextTooLarge { required: 132, largest: 128 })
        ));
        config.search_max_handles = 32;
        config.validate().unwrap();

        config.search_max_handles = 33;
        config.features.search = false;
        config.validate().unwrap();
    }

    #[test]
    fn both_dynamic_ranges_conflict() {
        let mut config = KmsConfig::default();
        config.ranges.vm_dynamic = Some(HandleRange::new(70, 89));
        assert!(matches!(config.validate(), Err(ConfigError::ConflictingDynamicRanges)));
    }

    #[test]
    fn overlapping_ranges_rejected() {
        let mut config = KmsConfig::default();
        config.ranges.nvm_static = Some(HandleRange::new(20, 49));
        assert!(matches!(config.validate(), Err(ConfigError::OverlappingRanges(..))));
    }

    #[test]
    fn bad_chunk_size_rejected() {
        let mut config = KmsConfig::default();
        config.import.chunk_size = 500;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidChunkSize(500))));
    }

    #[test]
    fn session_count_bounds() {
        let mut config = KmsConfig::default();
        config.max_sessions = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSessionCount(0))));
        config.max_sessions = 255;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mechanism_gating() {
        let mut alg = AlgorithmConfig::default();
        assert!(alg.allows(MechanismType::AES_CBC, Function::Decrypt));
        assert!(!alg.allows(MechanismType::SHA256, Function::Encrypt));
        alg.aes_cbc.decrypt = false;
        assert!(!alg.allows(MechanismType::AES_CBC, Function::Decrypt));
        assert!(!alg.allows(MechanismType::VENDOR_DEFINED, Function::Digest));
    }

    #[test]
    fn parses_toml_with_embedded_objects() {
        let text = r#"
            max_sessions = 3

            [memory]
            mode = "heap"

            [ranges]
            embedded = { min = 1, max = 9 }
            nvm_dynamic = { min = 50, max = 69 }

            [features]
            import_blob = false

            [[embedded]]
            id = 2
            attributes = [
                { type = 0x0000, hex = "04000000" },
                { type = 0x0011, hex = "000102030405060708090a0b0c0d0e0f" },
            ]
        "#;
        let config = KmsConfig::from_toml_str(text).unwrap();
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.memory.mode, AllocatorMode::Heap);
        assert_eq!(config.ranges.embedded, Some(HandleRange::new(1, 9)));
        assert_eq!(config.ranges.nvm_dynamic, Some(HandleRange::new(50, 69)));
        assert_eq!(config.ranges.nvm_static, None);
        config.validate().unwrap();

        let objects = config.embedded_objects().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id(), ObjectHandle(2));
        let value = objects[0].find_attribute(AttributeType::VALUE).unwrap();
        assert_eq!(value.material(), (0u8..16).collect::<Vec<_>>());
    }

    #[test]
    fn embedded_object_outside_range_rejected() {
        let mut config = KmsConfig::default();
        config.embedded.push(EmbeddedObject { id: 40, attributes: vec![] });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmbeddedObject { id: 40, .. })
        ));
    }

    #[test]
    fn invalid_hex_reported() {
        let object = EmbeddedObject {
            id: 1,
            attributes: vec![EmbeddedAttribute { kind: 3, hex: "zz".into(), packed: None }],
        };
        assert!(object.to_object().is_err());
    }
}
