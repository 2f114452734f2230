use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("merge shape mismatch")]
    MergeShapeMismatch,
    #[error("job not found")]
    JobNotFound,
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: neuro_protocol::JobState, to: neuro_protocol::JobState },
    #[error("insufficient peers: need {needed}, have {have}")]
    InsufficientPeers { needed: usize, have: usize },
}
