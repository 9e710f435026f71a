use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::retry::{is_retryable_status, with_retry, RetryConfig};
use crate::stats::robust_median;

pub const BROWSE_API_BASE: &str = "https://api.ebay.com";
pub const FINDING_API_BASE: &str = "https://svcs.ebay.com";
const BROWSE_PATH: &str = "/buy/browse/v1/item_summary/search";
const FINDING_PATH: &str = "/services/search/FindingService/v1";

#[derive(Error, Debug)]
pub enum MarketApiError {
    #[error("API request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Marketplace rejected our credentials")]
    AuthRequired,

    #[error("No marketplace credentials configured")]
    MissingCredentials,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl MarketApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            MarketApiError::RateLimitExceeded => true,
            MarketApiError::NetworkError(_) => true,
            MarketApiError::RequestFailed { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketApiError>;

#[derive(Debug, Clone)]
pub struct MarketClientConfig {
    pub browse_base_url: String,
    pub finding_base_url: String,
    /// OAuth bearer token for the browse (active listings) endpoint
    pub bearer_token: Option<String>,
    /// App id for the completed-items (sold listings) endpoint
    pub app_id: Option<String>,
    pub marketplace_id: String,
    /// Marketplace category to search in ("267" is Books)
    pub category_id: String,
    pub page_size: u32,
    pub request_timeout: Duration,
    /// Minimum gap between two outgoing requests
    pub request_spacing: Duration,
    pub retry: RetryConfig,
}

impl Default for MarketClientConfig {
    fn default() -> Self {
        Self {
            browse_base_url: BROWSE_API_BASE.to_string(),
            finding_base_url: FINDING_API_BASE.to_string(),
            bearer_token: None,
            app_id: None,
            marketplace_id: "EBAY_US".to_string(),
            category_id: "267".to_string(),
            page_size: 50,
            request_timeout: Duration::from_secs(15),
            request_spacing: Duration::from_millis(500),
            retry: RetryConfig::default(),
        }
    }
}

/// Median price and listing count for one query
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ListingSample {
    pub median: Option<f64>,
    pub count: u32,
}

/// Aggregated comps across all queries for a lot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ListingStats {
    pub active_count: u32,
    pub active_median: Option<f64>,
    pub sold_count: u32,
    pub sold_median: Option<f64>,
}

pub struct MarketClient {
    client: reqwest::Client,
    config: MarketClientConfig,
    last_request: Mutex<Option<Instant>>,
}

impl MarketClient {
    pub fn new(config: MarketClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("lotwise/0.1.0"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MarketClientConfig {
        &self.config
    }

    /// Run every query against both endpoints and fold the results together
    ///
    /// Counts are summed. Each query yields its own median and the lot's
    /// price is the robust median of those. A side without credentials is
    /// skipped (count 0, no median). A failed query counts as an empty
    /// sample; a side only fails when every one of its queries did.
    pub async fn listing_stats(&self, queries: &[String]) -> Result<ListingStats> {
        if self.config.bearer_token.is_none() && self.config.app_id.is_none() {
            return Err(MarketApiError::MissingCredentials);
        }

        let mut stats = ListingStats::default();

        if self.config.bearer_token.is_some() {
            let mut samples = Vec::with_capacity(queries.len());
            for query in queries {
                samples.push(self.active_listings(query).await);
            }
            let (count, median) = fold_samples("active", queries, samples)?;
            stats.active_count = count;
            stats.active_median = median;
        }

        if self.config.app_id.is_some() {
            let mut samples = Vec::with_capacity(queries.len());
            for query in queries {
                samples.push(self.sold_listings(query).await);
            }
            let (count, median) = fold_samples("sold", queries, samples)?;
            stats.sold_count = count;
            stats.sold_median = median;
        }

        debug!(
            "Listing stats over {} queries: {} active, {} sold",
            queries.len(),
            stats.active_count,
            stats.sold_count
        );
        Ok(stats)
    }

    /// Current listings for a query (browse endpoint)
    pub async fn active_listings(&self, query: &str) -> Result<ListingSample> {
        let token = self
            .config
            .bearer_token
            .as_deref()
            .ok_or(MarketApiError::MissingCredentials)?;
        let url = format!("{}{}", self.config.browse_base_url, BROWSE_PATH);
        let limit = self.config.page_size.to_string();

        with_retry(
            &self.config.retry,
            || async {
                self.throttle().await;
                let response = self
                    .client
                    .get(&url)
                    .query(&[
                        ("q", query),
                        ("category_ids", self.config.category_id.as_str()),
                        ("limit", limit.as_str()),
                    ])
                    .bearer_auth(token)
                    .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .send()
                    .await?;

                let body = check_status(response).await?;
                let payload: BrowseResponse = serde_json::from_str(&body)?;
                let prices: Vec<f64> = payload
                    .item_summaries
                    .iter()
                    .filter_map(|item| item.price.as_ref())
                    .filter_map(|price| price.value.parse::<f64>().ok())
                    .collect();

                Ok::<_, MarketApiError>(ListingSample {
                    median: robust_median(&prices),
                    count: prices.len() as u32,
                })
            },
            MarketApiError::is_retryable,
        )
        .await
    }

    /// Completed, sold listings for a query (finding endpoint)
    pub async fn sold_listings(&self, query: &str) -> Result<ListingSample> {
        let app_id = self
            .config
            .app_id
            .as_deref()
            .ok_or(MarketApiError::MissingCredentials)?;
        let url = format!("{}{}", self.config.finding_base_url, FINDING_PATH);
        let entries = self.config.page_size.to_string();

        with_retry(
            &self.config.retry,
            || async {
                self.throttle().await;
                let response = self
                    .client
                    .get(&url)
                    .query(&[
                        ("OPERATION-NAME", "findCompletedItems"),
                        ("SERVICE-VERSION", "1.13.0"),
                        ("SECURITY-APPNAME", app_id),
                        ("RESPONSE-DATA-FORMAT", "JSON"),
                        ("REST-PAYLOAD", ""),
                        ("keywords", query),
                        ("itemFilter(0).name", "SoldItemsOnly"),
                        ("itemFilter(0).value", "true"),
                        ("categoryId", self.config.category_id.as_str()),
                        ("paginationInput.entriesPerPage", entries.as_str()),
                    ])
                    .send()
                    .await?;

                let body = check_status(response).await?;
                let envelope: FindingEnvelope = serde_json::from_str(&body)?;
                let root = envelope.responses.into_iter().next().ok_or_else(|| {
                    MarketApiError::UnexpectedResponse("empty findCompletedItemsResponse".into())
                })?;

                let ack = root.ack.first().map(String::as_str).unwrap_or("");
                if ack != "Success" && ack != "Warning" {
                    return Err(MarketApiError::UnexpectedResponse(format!(
                        "finding ack was '{}'",
                        ack
                    )));
                }

                let prices: Vec<f64> = root
                    .search_result
                    .iter()
                    .flat_map(|result| result.item.iter())
                    .filter_map(|item| item.selling_status.first())
                    .filter_map(|status| status.current_price.first())
                    .filter_map(|amount| amount.value.parse::<f64>().ok())
                    .collect();

                Ok::<_, MarketApiError>(ListingSample {
                    median: robust_median(&prices),
                    count: prices.len() as u32,
                })
            },
            MarketApiError::is_retryable,
        )
        .await
    }

    async fn throttle(&self) {
        let spacing = self.config.request_spacing;
        if spacing.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Sum counts and take the robust median of per-query medians
fn fold_samples(
    side: &str,
    queries: &[String],
    samples: Vec<Result<ListingSample>>,
) -> Result<(u32, Option<f64>)> {
    let mut count = 0;
    let mut medians = Vec::new();
    let mut last_error = None;
    let mut succeeded = 0;

    for (query, sample) in queries.iter().zip(samples) {
        match sample {
            Ok(sample) => {
                succeeded += 1;
                count += sample.count;
                medians.extend(sample.median);
            }
            Err(e) => {
                warn!("{} listings query '{}' failed: {}", side, query, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok((count, robust_median(&medians))),
    }
}

async fn check_status(response: reqwest::Response) -> Result<String> {
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(MarketApiError::AuthRequired);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(MarketApiError::RateLimitExceeded);
    }

    let body = response.text().await?;
    if !status.is_success() {
        return Err(MarketApiError::RequestFailed {
            status: status.as_u16(),
            body,
        });
    }

    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BrowseResponse {
    #[serde(rename = "itemSummaries", default)]
    item_summaries: Vec<BrowseItem>,
}

#[derive(Debug, Deserialize)]
struct BrowseItem {
    price: Option<BrowsePrice>,
}

#[derive(Debug, Deserialize)]
struct BrowsePrice {
    value: String,
}

// The finding API wraps every field in a single-element array
#[derive(Debug, Deserialize)]
struct FindingEnvelope {
    #[serde(rename = "findCompletedItemsResponse", default)]
    responses: Vec<FindingResponse>,
}

#[derive(Debug, Deserialize)]
struct FindingResponse {
    #[serde(default)]
    ack: Vec<String>,
    #[serde(rename = "searchResult", default)]
    search_result: Vec<FindingSearchResult>,
}

#[derive(Debug, Deserialize)]
struct FindingSearchResult {
    #[serde(default)]
    item: Vec<FindingItem>,
}

#[derive(Debug, Deserialize)]
struct FindingItem {
    #[serde(rename = "sellingStatus", default)]
    selling_status: Vec<SellingStatus>,
}

#[derive(Debug, Deserialize)]
struct SellingStatus {
    #[serde(rename = "currentPrice", default)]
    current_price: Vec<Amount>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    #[serde(rename = "__value__")]
    value: String,
}
