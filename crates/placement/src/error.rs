use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("insufficient peers: need {needed}, have {have}")]
    InsufficientPeers { needed: usize, have: usize },
}
