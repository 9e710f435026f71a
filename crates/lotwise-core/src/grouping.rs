// Grouping strategies: how a single item maps to a lot key
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::GroupingConfig;
use crate::models::Item;
use crate::{Error, Result};

/// The closed set of ways items get bundled together
///
/// Every variant's key is a function of one item's own attributes. The
/// dependency index relies on that: if a key ever depended on other items,
/// re-deriving keys for only the changed item would under-invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "author")]
    ByAuthor,
    #[serde(rename = "series")]
    BySeries,
    #[serde(rename = "theme")]
    ByTheme,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::ByAuthor, Strategy::BySeries, Strategy::ByTheme];

    pub fn slug(&self) -> &'static str {
        match self {
            Strategy::ByAuthor => "author",
            Strategy::BySeries => "series",
            Strategy::ByTheme => "theme",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::ByAuthor => "ByAuthor",
            Strategy::BySeries => "BySeries",
            Strategy::ByTheme => "ByTheme",
        }
    }

    /// Raw attribute this strategy reads, before normalization
    pub fn raw_value<'a>(&self, item: &'a Item) -> Option<&'a str> {
        match self {
            Strategy::ByAuthor => item.primary_author(),
            Strategy::BySeries => item
                .series_name
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .or_else(|| item.series_id.as_deref().filter(|s| !s.trim().is_empty()))
                .map(str::trim),
            Strategy::ByTheme => item.primary_tag(),
        }
    }

    /// Group key for one item, or None when the item has nothing to group on
    ///
    /// A present but unusable attribute (punctuation only, say) is an
    /// `InvalidGroupingKey` so the caller can log it and move on.
    pub fn key_for(&self, item: &Item, config: &GroupingConfig) -> Result<Option<String>> {
        let Some(raw) = self.raw_value(item) else {
            return Ok(None);
        };

        let key = match self {
            Strategy::ByAuthor => canonical_author(raw, &config.author_aliases),
            Strategy::BySeries | Strategy::ByTheme => normalize_phrase(raw),
        };

        if key.is_empty() {
            return Err(Error::InvalidGroupingKey {
                item_id: item.id.clone(),
                strategy: *self,
                raw: raw.to_string(),
            });
        }
        Ok(Some(key))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lowercase, turn anything that isn't a letter or digit into a space,
/// collapse runs of whitespace
pub fn normalize_phrase(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

const CO_AUTHOR_DELIMITERS: [&str; 4] = [";", "&", " and ", " with "];

/// First credited author, aliased and normalized
///
/// "King, Stephen" is read as last-name-first; anything with more commas is
/// treated as a list and only the first name is kept.
pub fn canonical_author(raw: &str, aliases: &HashMap<String, String>) -> String {
    let lowered = raw.trim().to_lowercase();

    let mut primary = lowered.as_str();
    for delim in CO_AUTHOR_DELIMITERS {
        if let Some((head, _)) = primary.split_once(delim) {
            primary = head;
        }
    }

    let reordered = match primary.matches(',').count() {
        0 => primary.trim().to_string(),
        1 => {
            let (last, first) = primary.split_once(',').unwrap_or((primary, ""));
            format!("{} {}", first.trim(), last.trim())
        }
        _ => primary.split(',').next().unwrap_or("").trim().to_string(),
    };

    let normalized = normalize_phrase(&reordered);
    match lookup_alias(&normalized, aliases) {
        Some(canonical) => normalize_phrase(canonical),
        None => normalized,
    }
}

fn lookup_alias<'a>(normalized: &str, aliases: &'a HashMap<String, String>) -> Option<&'a str> {
    // Alias tables are tiny, a scan beats keeping a second normalized map in sync
    aliases
        .iter()
        .find(|(credited, _)| normalize_phrase(credited) == normalized)
        .map(|(_, canonical)| canonical.as_str())
}
