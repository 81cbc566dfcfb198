use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid bucket index record: {0}")]
    InvalidIndex(String),

    #[error("Invalid queue key: {0:?}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
