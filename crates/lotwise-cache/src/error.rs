use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache connection lock was poisoned")]
    Poisoned,
}
