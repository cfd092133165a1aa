use kms_types::ObjectRange;

/// Errors from loading or validating a [`KmsConfig`](crate::KmsConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{feature} requires {requires}")]
    MissingDependency {
        feature: &'static str,
        requires: &'static str,
    },

    #[error("range {0} is empty or starts at handle 0")]
    InvalidRange(ObjectRange),

    #[error("ranges {0} and {1} overlap")]
    OverlappingRanges(ObjectRange, ObjectRange),

    #[error("NVM-dynamic and VM-dynamic ranges cannot both be enabled")]
    ConflictingDynamicRanges,

    #[error("max_sessions must be in 1..255, got {0}")]
    InvalidSessionCount(usize),

    #[error("pool allocator configured with no pools")]
    EmptyPools,

    #[error("search context of {required} bytes exceeds the largest pool ({largest} bytes)")]
    SearchContextTooLarge { required: usize, largest: usize },

    #[error("import chunk size must be a non-zero multiple of 16, got {0}")]
    InvalidChunkSize(usize),

    #[error("embedded object {id}: {reason}")]
    EmbeddedObject { id: u32, reason: String },
}

/// Result alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;
