// SQLite-backed snapshot cache
// Keeps marketplace calls down; safe to delete at any time

pub mod cache;
pub mod error;

pub use cache::{CacheManager, CachedEntry};
pub use error::{CacheError, Result};
