use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::grouping::Strategy;

/// Stable external identifier for an item (an ISBN for books)
pub type ItemId = String;

/// Read-only snapshot of one scanned item as the item store last reported it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub title: Option<String>,
    /// Credited authors, first one is the primary credit
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub series_name: Option<String>,
    /// External series identifier, used only when no series name is known
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub series_position: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
    /// Per-item price estimate, the fallback when lot comps are missing
    #[serde(default)]
    pub estimated_price: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub page_count: Option<u32>,
    /// "Hardcover", "Paperback", "Mass Market" and so on
    #[serde(default)]
    pub binding: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, estimated_price: f64) -> Self {
        Self {
            id: id.into(),
            title: None,
            authors: Vec::new(),
            series_name: None,
            series_id: None,
            series_position: None,
            condition: None,
            estimated_price,
            tags: Vec::new(),
            page_count: None,
            binding: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_series(mut self, name: impl Into<String>, position: Option<u32>) -> Self {
        self.series_name = Some(name.into());
        self.series_position = position;
        self
    }

    pub fn with_series_id(mut self, series_id: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_binding(mut self, binding: impl Into<String>, page_count: Option<u32>) -> Self {
        self.binding = Some(binding.into());
        self.page_count = page_count;
        self
    }

    /// Rough packed weight in pounds
    pub fn shipping_lbs(&self) -> f64 {
        let hardcover = self
            .binding
            .as_deref()
            .is_some_and(|b| b.to_ascii_lowercase().contains("hard"));
        if hardcover {
            1.0
        } else if self.page_count.unwrap_or(250) >= 350 {
            0.5
        } else {
            0.35
        }
    }

    /// First credited author that isn't blank
    pub fn primary_author(&self) -> Option<&str> {
        first_non_blank(self.authors.iter().map(String::as_str))
    }

    pub fn primary_tag(&self) -> Option<&str> {
        first_non_blank(self.tags.iter().map(String::as_str))
    }
}

fn first_non_blank<'a>(mut values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    values.find(|v| !v.trim().is_empty()).map(str::trim)
}

/// Identity of a lot: which strategy grouped it, under which key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotKey {
    pub strategy: Strategy,
    pub group_key: String,
}

impl LotKey {
    pub fn new(strategy: Strategy, group_key: impl Into<String>) -> Self {
        Self {
            strategy,
            group_key: group_key.into(),
        }
    }

    /// Key used for the on-disk snapshot cache
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.strategy.slug(), self.group_key)
    }
}

impl fmt::Display for LotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.strategy.slug(), self.group_key)
    }
}

/// A lot's membership without any pricing attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSkeleton {
    pub key: LotKey,
    pub member_item_ids: BTreeSet<ItemId>,
}

impl LotSkeleton {
    pub fn strategy(&self) -> Strategy {
        self.key.strategy
    }

    pub fn group_key(&self) -> &str {
        &self.key.group_key
    }

    pub fn len(&self) -> usize {
        self.member_item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_item_ids.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.member_item_ids.contains(item_id)
    }
}

/// Raw listing statistics as the market oracle reports them
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketStats {
    pub active_count: u32,
    pub active_median_price: Option<f64>,
    pub sold_count: u32,
    pub sold_median_price: Option<f64>,
}

/// Market comps for one lot key at one point in time
///
/// Immutable once fetched; a refresh replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub group_key: LotKey,
    pub active_count: u32,
    pub active_median_price: Option<f64>,
    pub sold_count: u32,
    pub sold_median_price: Option<f64>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub is_stale: bool,
}

impl MarketSnapshot {
    pub fn from_stats(group_key: LotKey, stats: MarketStats, fetched_at: DateTime<Utc>) -> Self {
        Self {
            group_key,
            active_count: stats.active_count,
            active_median_price: stats.active_median_price,
            sold_count: stats.sold_count,
            sold_median_price: stats.sold_median_price,
            fetched_at,
            is_stale: false,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= ttl
    }

    /// Same data, flagged as served past its TTL
    pub fn into_stale(mut self) -> Self {
        self.is_stale = true;
        self
    }
}

/// How much to trust a lot's estimated value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn label(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// A priced, scored lot
///
/// Always derived from a skeleton plus an optional snapshot; never patched
/// in place, recomputed instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub skeleton: LotSkeleton,
    pub snapshot: Option<MarketSnapshot>,
    pub name: String,
    pub estimated_value: f64,
    pub confidence: Confidence,
    pub justification: Vec<String>,
}

impl Lot {
    pub fn key(&self) -> &LotKey {
        &self.skeleton.key
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.is_stale)
    }
}

/// What happened to an item in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Updated => write!(f, "updated"),
        }
    }
}

/// Change notification pushed by the item store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemChange {
    pub item_id: ItemId,
    pub kind: ChangeKind,
}
