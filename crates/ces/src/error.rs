use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CesError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("compression error: {0}")]
    CompressionError(String),
    #[error("encryption error: {0}")]
    EncryptionError(String),
    #[error("sharding error: {0}")]
    ShardingError(String),

    #[error("insufficient shards: need {needed}, have {have}")]
    InsufficientShards { needed: usize, have: usize },
    #[error("integrity check failed")]
    IntegrityCheckFailed,
    #[error("manifest mac mismatch")]
    ManifestMacMismatch,
    #[error("decryption error")]
    DecryptionError,
    #[error("decompression error: {0}")]
    DecompressionError(String),
}
