// Marketplace comps client: active listings, sold listings, robust medians
pub mod market;
pub mod retry;
pub mod stats;

// Re-export common types
pub use market::{ListingSample, ListingStats, MarketApiError, MarketClient, MarketClientConfig};
pub use retry::RetryConfig;
pub use stats::{robust_median, round_cents, winsorize};
