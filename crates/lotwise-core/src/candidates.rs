// Candidate generation: partition items into lot skeletons, no pricing
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::config::GroupingConfig;
use crate::grouping::Strategy;
use crate::models::{Item, ItemId, LotKey, LotSkeleton};
use crate::Error;

/// Every candidate group, including the ones still below minimum size
pub type GroupMap = BTreeMap<LotKey, BTreeSet<ItemId>>;

/// Turns a set of items into skeletons under each enabled strategy
///
/// Pure and deterministic: the same items in any order give the same
/// skeletons, and nothing here touches the network.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    config: GroupingConfig,
}

impl CandidateGenerator {
    pub fn new(config: GroupingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    pub fn strategies(&self) -> impl Iterator<Item = Strategy> + '_ {
        Strategy::ALL
            .into_iter()
            .filter(|s| self.config.is_enabled(*s))
    }

    pub fn min_group_size(&self, strategy: Strategy) -> usize {
        self.config.min_group_size(strategy)
    }

    pub fn qualifies(&self, strategy: Strategy, members: usize) -> bool {
        members > 0 && members >= self.min_group_size(strategy)
    }

    /// Lot keys a single item would belong to
    ///
    /// Unusable keys are logged and skipped so one bad record never aborts
    /// a cycle.
    pub fn keys_for(&self, item: &Item) -> BTreeSet<LotKey> {
        let mut keys = BTreeSet::new();
        for strategy in self.strategies() {
            match strategy.key_for(item, &self.config) {
                Ok(Some(group_key)) => {
                    keys.insert(LotKey::new(strategy, group_key));
                }
                Ok(None) => {}
                Err(Error::InvalidGroupingKey { item_id, strategy, raw }) => {
                    warn!(
                        "Excluding item {} from {} grouping: unusable key {:?}",
                        item_id, strategy, raw
                    );
                }
                Err(e) => warn!("Failed to derive {} key for {}: {}", strategy, item.id, e),
            }
        }
        keys
    }

    /// Group every item under every key it produces
    pub fn partition<'a>(&self, items: impl IntoIterator<Item = &'a Item>) -> GroupMap {
        let mut groups = GroupMap::new();
        for item in items {
            for key in self.keys_for(item) {
                groups.entry(key).or_default().insert(item.id.clone());
            }
        }
        groups
    }

    /// Skeleton for a group, or None while it's below the strategy minimum
    pub fn skeleton_for(&self, key: &LotKey, members: &BTreeSet<ItemId>) -> Option<LotSkeleton> {
        if !self.qualifies(key.strategy, members.len()) {
            return None;
        }
        Some(LotSkeleton {
            key: key.clone(),
            member_item_ids: members.clone(),
        })
    }

    /// Skeletons for all groups that meet their minimum size
    pub fn skeletons(&self, groups: &GroupMap) -> Vec<LotSkeleton> {
        groups
            .iter()
            .filter_map(|(key, members)| self.skeleton_for(key, members))
            .collect()
    }

    pub fn generate(&self, items: &[Item]) -> Vec<LotSkeleton> {
        self.skeletons(&self.partition(items))
    }
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new(GroupingConfig::default())
    }
}
