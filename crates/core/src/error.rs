use thiserror::Error;

pub type PacerResult<T> = Result<T, PacerError>;

#[derive(Error, Debug)]
pub enum PacerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence queue full, try again")]
    QueueFull,

    #[error("decision deadline exceeded")]
    DeadlineExceeded,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
