use async_trait::async_trait;

use crate::{
    models::{LotKey, MarketStats},
    Result,
};

/// Source of market comps for a lot key
///
/// Rate-limited and allowed to fail; callers go through `EnrichmentCache`
/// rather than hitting this directly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketOracle: Send + Sync {
    async fn fetch(&self, key: &LotKey) -> Result<MarketStats>;
}
