// Marketplace oracle - bridges the comps client with the MarketOracle trait
use async_trait::async_trait;
use lotwise_api::{ListingStats, MarketClient, MarketClientConfig};

use crate::{
    grouping::Strategy,
    models::{LotKey, MarketStats},
    oracle::MarketOracle,
    Error, Result,
};

/// Wrapper around MarketClient that implements MarketOracle
pub struct MarketplaceOracle {
    client: MarketClient,
}

impl MarketplaceOracle {
    pub fn new(config: MarketClientConfig) -> Result<Self> {
        let client = MarketClient::new(config).map_err(|e| Error::ApiError(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: MarketClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketOracle for MarketplaceOracle {
    async fn fetch(&self, key: &LotKey) -> Result<MarketStats> {
        let queries = lot_queries(key);
        let stats = self
            .client
            .listing_stats(&queries)
            .await
            .map_err(|e| Error::ApiError(e.to_string()))?;

        Ok(listing_to_stats(stats))
    }
}

/// Search phrases that find whole-lot listings for a key
pub fn lot_queries(key: &LotKey) -> Vec<String> {
    let name = key.group_key.as_str();
    match key.strategy {
        Strategy::BySeries => vec![
            format!("\"{}\" lot set", name),
            format!("\"{}\" lot set books", name),
        ],
        Strategy::ByAuthor => vec![format!("{} lot set", name), format!("{} book lot", name)],
        Strategy::ByTheme => vec![format!("{} lot set books", name)],
    }
}

fn listing_to_stats(stats: ListingStats) -> MarketStats {
    MarketStats {
        active_count: stats.active_count,
        active_median_price: stats.active_median,
        sold_count: stats.sold_count,
        sold_median_price: stats.sold_median,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_queries_are_quoted() {
        let key = LotKey::new(Strategy::BySeries, "wheel of time");
        assert_eq!(
            lot_queries(&key),
            vec![
                "\"wheel of time\" lot set".to_string(),
                "\"wheel of time\" lot set books".to_string(),
            ]
        );
    }

    #[test]
    fn test_author_and_theme_queries() {
        let author = LotKey::new(Strategy::ByAuthor, "lee child");
        assert_eq!(lot_queries(&author).len(), 2);
        assert_eq!(lot_queries(&author)[1], "lee child book lot");

        let theme = LotKey::new(Strategy::ByTheme, "cozy mystery");
        assert_eq!(lot_queries(&theme), vec!["cozy mystery lot set books".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_credentials_surface_as_api_error() {
        let oracle = MarketplaceOracle::new(MarketClientConfig::default()).unwrap();
        let key = LotKey::new(Strategy::ByAuthor, "lee child");

        let err = oracle.fetch(&key).await.unwrap_err();
        assert!(matches!(err, Error::ApiError(_)));
    }
}
