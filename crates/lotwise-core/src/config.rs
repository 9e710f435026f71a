use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::grouping::Strategy;
use lotwise_api::{MarketClientConfig, RetryConfig};

/// Main configuration structure
///
/// Loaded from `<config_dir>/lotwise/config.toml`, then env vars on top.
/// Priority: CLI > Env > File > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl Config {
    /// Load config from default location, or defaults if there's no file yet
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> crate::Result<PathBuf> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// XDG config dir on Linux, Application Support on macOS, AppData on Windows
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("lotwise");

        Ok(config_dir.join("config.toml"))
    }

    /// Credentials usually live in the environment, not the file
    pub fn apply_env(&mut self) {
        if let Ok(app_id) = std::env::var("LOTWISE_EBAY_APP_ID") {
            if !app_id.trim().is_empty() {
                self.market.app_id = Some(app_id);
            }
        }
        if let Ok(token) = std::env::var("LOTWISE_EBAY_TOKEN") {
            if !token.trim().is_empty() {
                self.market.bearer_token = Some(token);
            }
        }
        if let Ok(path) = std::env::var("LOTWISE_CACHE_PATH") {
            if !path.trim().is_empty() {
                self.cache.db_path = Some(PathBuf::from(path));
            }
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        let weights = self.scoring.sold_weight + self.scoring.active_weight;
        if (weights - 1.0).abs() > 1e-6 {
            return Err(crate::Error::ConfigError(format!(
                "scoring weights must sum to 1.0, got {}",
                weights
            )));
        }
        if self.scoring.sold_weight < 0.0 || self.scoring.active_weight < 0.0 {
            return Err(crate::Error::ConfigError(
                "scoring weights can't be negative".into(),
            ));
        }
        for strategy in Strategy::ALL {
            if self.grouping.min_group_size(strategy) == 0 {
                return Err(crate::Error::ConfigError(format!(
                    "minimum group size for {} must be at least 1",
                    strategy
                )));
            }
        }
        if self.scoring.min_sold_for_medium > self.scoring.min_sold_for_high {
            return Err(crate::Error::ConfigError(
                "min_sold_for_medium can't exceed min_sold_for_high".into(),
            ));
        }
        if self.coordinator.max_concurrent_fetches == 0 {
            return Err(crate::Error::ConfigError(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    #[serde(default = "default_strategies")]
    pub strategies: Vec<Strategy>,

    #[serde(default = "default_min_author")]
    pub min_author_group: usize,

    #[serde(default = "default_min_series")]
    pub min_series_group: usize,

    #[serde(default = "default_min_theme")]
    pub min_theme_group: usize,

    /// Credited name -> canonical author, for pen names
    #[serde(default = "default_author_aliases")]
    pub author_aliases: HashMap<String, String>,
}

fn default_strategies() -> Vec<Strategy> {
    Strategy::ALL.to_vec()
}

fn default_min_author() -> usize {
    3
}

fn default_min_series() -> usize {
    2 // two volumes of a series already sell better together
}

fn default_min_theme() -> usize {
    3
}

fn default_author_aliases() -> HashMap<String, String> {
    HashMap::from([("Robert Galbraith".to_string(), "J. K. Rowling".to_string())])
}

impl GroupingConfig {
    pub fn min_group_size(&self, strategy: Strategy) -> usize {
        match strategy {
            Strategy::ByAuthor => self.min_author_group,
            Strategy::BySeries => self.min_series_group,
            Strategy::ByTheme => self.min_theme_group,
        }
    }

    pub fn is_enabled(&self, strategy: Strategy) -> bool {
        self.strategies.contains(&strategy)
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            min_author_group: default_min_author(),
            min_series_group: default_min_series(),
            min_theme_group: default_min_theme(),
            author_aliases: default_author_aliases(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Weight of the sold median, the primary price signal
    #[serde(default = "default_sold_weight")]
    pub sold_weight: f64,

    /// Weight of the active median, the supply side
    #[serde(default = "default_active_weight")]
    pub active_weight: f64,

    #[serde(default = "default_min_sold_high")]
    pub min_sold_for_high: u32,

    #[serde(default = "default_min_sold_medium")]
    pub min_sold_for_medium: u32,
}

fn default_sold_weight() -> f64 {
    0.65
}

fn default_active_weight() -> f64 {
    0.35
}

fn default_min_sold_high() -> u32 {
    5
}

fn default_min_sold_medium() -> u32 {
    1
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            sold_weight: default_sold_weight(),
            active_weight: default_active_weight(),
            min_sold_for_high: default_min_sold_high(),
            min_sold_for_medium: default_min_sold_medium(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Snapshot TTL in hours
    #[serde(default = "default_cache_ttl")]
    pub ttl_hours: u64,

    /// Per-call oracle timeout
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,

    /// Where the snapshot database lives, defaults to the data dir
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_cache_ttl() -> u64 {
    24 // sold comps don't move much within a day
}

fn default_oracle_timeout() -> u64 {
    15
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn resolved_db_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?;
        Ok(data_dir.join("lotwise").join("market_cache.db"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_cache_ttl(),
            oracle_timeout_secs: default_oracle_timeout(),
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_browse_url")]
    pub browse_base_url: String,

    #[serde(default = "default_finding_url")]
    pub finding_base_url: String,

    /// Finding API app id, needed for sold comps
    #[serde(default)]
    pub app_id: Option<String>,

    /// OAuth application token, needed for active listings
    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default = "default_marketplace_id")]
    pub marketplace_id: String,

    /// Books category
    #[serde(default = "default_category_id")]
    pub category_id: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Minimum gap between two marketplace calls
    #[serde(default = "default_spacing")]
    pub request_spacing_ms: u64,
}

fn default_browse_url() -> String {
    "https://api.ebay.com".to_string()
}

fn default_finding_url() -> String {
    "https://svcs.ebay.com".to_string()
}

fn default_marketplace_id() -> String {
    "EBAY_US".to_string()
}

fn default_category_id() -> String {
    "267".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    500
}

fn default_spacing() -> u64 {
    500
}

impl MarketConfig {
    pub fn to_client_config(&self, request_timeout: Duration) -> MarketClientConfig {
        MarketClientConfig {
            browse_base_url: self.browse_base_url.clone(),
            finding_base_url: self.finding_base_url.clone(),
            bearer_token: self.bearer_token.clone(),
            app_id: self.app_id.clone(),
            marketplace_id: self.marketplace_id.clone(),
            category_id: self.category_id.clone(),
            page_size: self.page_size,
            request_timeout,
            request_spacing: Duration::from_millis(self.request_spacing_ms),
            retry: RetryConfig {
                max_retries: self.max_retries,
                initial_delay_ms: self.initial_retry_delay_ms,
                ..RetryConfig::default()
            },
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.app_id.is_some() || self.bearer_token.is_some()
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            browse_base_url: default_browse_url(),
            finding_base_url: default_finding_url(),
            app_id: None,
            bearer_token: None,
            marketplace_id: default_marketplace_id(),
            category_id: default_category_id(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_retry_delay(),
            request_spacing_ms: default_spacing(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Enrichment fetches allowed in flight at once, across different keys
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent(),
        }
    }
}
