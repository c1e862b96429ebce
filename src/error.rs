use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("{0} must be set")]
    MissingConfig(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("discord request {path} failed with status {status}")]
    PlatformStatus { status: u16, path: String },
    #[error("discord rate limit persisted after {retries} retries: {path}")]
    RateLimited { retries: usize, path: String },
    #[error("existing dataset is unreadable, refusing to overwrite: {0}")]
    CorruptDataset(String),
    #[error("output is locked by another run: {0}")]
    OutputLocked(String),
}
