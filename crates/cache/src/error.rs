use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache full")]
    CacheFull,
    #[error("not found")]
    NotFound,
}
