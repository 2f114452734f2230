//! Shared error taxonomy (spec §7). Each component-level crate defines its
//! own `thiserror` enum for the kinds it can itself raise; this enum is the
//! union used at crate boundaries that need to talk about "any fabric error"
//! (the façade, the scheduler's failure bookkeeping).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("integrity check failed")]
    IntegrityCheckFailed,
    #[error("decryption failed")]
    DecryptionError,
    #[error("manifest mac mismatch")]
    ManifestMacMismatch,

    #[error("insufficient shards: need {needed}, have {have}")]
    InsufficientShards { needed: usize, have: usize },
    #[error("insufficient peers: need {needed}, have {have}")]
    InsufficientPeers { needed: usize, have: usize },
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("cache full")]
    CacheFull,
    #[error("busy")]
    Busy,

    #[error("cpu limit exceeded")]
    CpuLimitExceeded,
    #[error("memory limit exceeded")]
    MemoryLimitExceeded,
    #[error("wall time exceeded")]
    WallTimeExceeded,
    #[error("io limit exceeded")]
    IoLimitExceeded,

    #[error("module validation failed: {0}")]
    ModuleValidationFailed(String),
    #[error("trap during init: {0}")]
    TrapDuringInit(String),
    #[error("trap during exec: {0}")]
    TrapDuringExec(String),
    #[error("invalid output shape: {0}")]
    InvalidOutputShape(String),

    #[error("merge shape mismatch")]
    MergeShapeMismatch,

    #[error("timeout")]
    Timeout,
}

impl FabricError {
    /// Availability/timeout errors are recoverable locally (retry, fallback
    /// peer, fallback worker) per spec §7's propagation policy; everything
    /// else is terminal for the current operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FabricError::InsufficientPeers { .. }
                | FabricError::PeerUnreachable(_)
                | FabricError::CacheFull
                | FabricError::Busy
                | FabricError::Timeout
        )
    }
}
