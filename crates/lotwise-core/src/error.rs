use thiserror::Error;

use crate::grouping::Strategy;

/// All the ways a lot cycle can go wrong
///
/// Stale market data is not in here: a stale snapshot is still served,
/// it just carries `is_stale = true`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Market data unavailable for {key}: {reason}")]
    MarketUnavailable { key: String, reason: String },

    #[error("{strategy} produced an unusable key for item {item_id}: {raw:?}")]
    InvalidGroupingKey {
        item_id: String,
        strategy: Strategy,
        raw: String,
    },

    #[error("Dependency index corrupted: {0}")]
    IndexCorruption(String),

    #[error("Cycle cancelled before completion")]
    Cancelled,

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Item store error: {0}")]
    ItemStore(String),

    #[error("Cache operation failed: {0}")]
    CacheError(#[from] lotwise_cache::CacheError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
