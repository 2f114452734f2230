//! The 8 failure modes of a sandboxed chunk execution (spec §4.6). Every
//! way a job can fail inside the executor maps to exactly one of these —
//! callers branch on the kind to decide whether a chunk is retryable on a
//! different worker or poisons the whole job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("module validation failed: {0}")]
    ModuleValidationFailed(String),

    #[error("trap during module init: {0}")]
    TrapDuringInit(String),

    #[error("trap during execution: {0}")]
    TrapDuringExec(String),

    #[error("cpu instruction budget exceeded")]
    CpuLimitExceeded,

    #[error("memory limit exceeded")]
    MemoryLimitExceeded,

    #[error("wall-clock deadline exceeded")]
    WallTimeExceeded,

    #[error("io byte budget exceeded")]
    IoLimitExceeded,

    #[error("output did not match the expected shape: {0}")]
    InvalidOutputShape(String),
}

impl ExecError {
    /// Whether this failure is attributable to the worker (retry elsewhere)
    /// as opposed to the module itself (retrying anywhere is pointless).
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, ExecError::WallTimeExceeded | ExecError::TrapDuringInit(_))
    }
}
