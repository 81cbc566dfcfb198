mod memory;
mod redis_store;
mod store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::BucketStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Index error: {0}")]
    CoreError(#[from] bucketq_core::CoreError),

    #[error("Key {0} holds a value of the wrong type")]
    WrongType(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
