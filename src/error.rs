use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Stream service error: {0}")]
    Stream(String),

    #[error("Blockchain error: {0}")]
    Blockchain(String),

    #[error("Event producer error: {0}")]
    Event(String),

    #[error("Batch of {count} candidates exceeds Merkle capacity {capacity}")]
    BatchTooLarge { count: usize, capacity: usize },

    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnchorError>;
