use std::collections::{BTreeSet, HashMap};

use crate::candidates::GroupMap;
use crate::models::{ItemId, LotKey, LotSkeleton};
use crate::{Error, Result};

/// Item id -> keys of the skeletons that list it as a member
///
/// Only qualifying skeletons are indexed. A group sitting below its
/// minimum size has no lot, so nothing depends on it yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyIndex {
    by_item: HashMap<ItemId, BTreeSet<LotKey>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invert skeleton member lists
    pub fn build(skeletons: &[LotSkeleton]) -> Self {
        let mut index = Self::new();
        for skeleton in skeletons {
            for item_id in &skeleton.member_item_ids {
                index.link(item_id, &skeleton.key);
            }
        }
        index
    }

    pub fn keys_for(&self, item_id: &str) -> BTreeSet<LotKey> {
        self.by_item.get(item_id).cloned().unwrap_or_default()
    }

    /// Union of every recorded key for the given items
    pub fn affected_keys<'a>(&self, item_ids: impl IntoIterator<Item = &'a ItemId>) -> BTreeSet<LotKey> {
        item_ids
            .into_iter()
            .filter_map(|id| self.by_item.get(id))
            .flat_map(|keys| keys.iter().cloned())
            .collect()
    }

    pub fn link(&mut self, item_id: &str, key: &LotKey) {
        self.by_item
            .entry(item_id.to_string())
            .or_default()
            .insert(key.clone());
    }

    pub fn unlink(&mut self, item_id: &str, key: &LotKey) {
        if let Some(keys) = self.by_item.get_mut(item_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_item.remove(item_id);
            }
        }
    }

    /// Items currently pointing at `key`
    pub fn references(&self, key: &LotKey) -> BTreeSet<ItemId> {
        self.by_item
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn contains_item(&self, item_id: &str) -> bool {
        self.by_item.contains_key(item_id)
    }

    /// Number of indexed items
    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &BTreeSet<LotKey>)> {
        self.by_item.iter()
    }

    /// Check the index against the groups it was built from
    ///
    /// Every entry must point at an existing qualifying group that lists the
    /// item, and every member of a qualifying group must point back at it.
    pub fn verify(&self, groups: &GroupMap, qualifies: impl Fn(&LotKey, usize) -> bool) -> Result<()> {
        for (item_id, keys) in &self.by_item {
            for key in keys {
                let Some(members) = groups.get(key) else {
                    return Err(Error::IndexCorruption(format!(
                        "item {} references missing skeleton {}",
                        item_id, key
                    )));
                };
                if !qualifies(key, members.len()) {
                    return Err(Error::IndexCorruption(format!(
                        "item {} references {} which is below its minimum size",
                        item_id, key
                    )));
                }
                if !members.contains(item_id) {
                    return Err(Error::IndexCorruption(format!(
                        "item {} references {} but is not a member",
                        item_id, key
                    )));
                }
            }
        }

        for (key, members) in groups {
            if !qualifies(key, members.len()) {
                continue;
            }
            for item_id in members {
                let linked = self.by_item.get(item_id).is_some_and(|keys| keys.contains(key));
                if !linked {
                    return Err(Error::IndexCorruption(format!(
                        "member {} of {} is missing from the index",
                        item_id, key
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::Strategy;
    use std::collections::BTreeMap;

    fn skeleton(strategy: Strategy, key: &str, ids: &[&str]) -> LotSkeleton {
        LotSkeleton {
            key: LotKey::new(strategy, key),
            member_item_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_inverts_members() {
        let index = DependencyIndex::build(&[
            skeleton(Strategy::ByAuthor, "ann", &["1", "2", "3"]),
            skeleton(Strategy::BySeries, "saga", &["2", "4"]),
        ]);

        assert_eq!(index.len(), 4);
        assert_eq!(index.keys_for("2").len(), 2);
        assert!(index.keys_for("missing").is_empty());

        let affected = index.affected_keys(&["1".to_string(), "4".to_string()]);
        assert_eq!(affected.len(), 2);
    }

    #[test]
    fn test_unlink_drops_empty_entries() {
        let key = LotKey::new(Strategy::ByTheme, "horror");
        let mut index = DependencyIndex::new();
        index.link("1", &key);
        assert_eq!(index.references(&key).len(), 1);

        index.unlink("1", &key);
        assert!(!index.contains_item("1"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_verify_detects_dangling_reference() {
        let skeletons = vec![skeleton(Strategy::BySeries, "saga", &["1", "2"])];
        let mut index = DependencyIndex::build(&skeletons);
        let groups: GroupMap = skeletons
            .iter()
            .map(|s| (s.key.clone(), s.member_item_ids.clone()))
            .collect();
        let qualifies = |_: &LotKey, n: usize| n >= 2;

        assert!(index.verify(&groups, qualifies).is_ok());

        index.link("1", &LotKey::new(Strategy::ByAuthor, "ghost"));
        assert!(matches!(
            index.verify(&groups, qualifies),
            Err(Error::IndexCorruption(_))
        ));
    }

    #[test]
    fn test_verify_detects_missing_member() {
        let groups: GroupMap = BTreeMap::from([(
            LotKey::new(Strategy::BySeries, "saga"),
            BTreeSet::from(["1".to_string(), "2".to_string()]),
        )]);
        let mut index = DependencyIndex::new();
        index.link("1", &LotKey::new(Strategy::BySeries, "saga"));

        assert!(index.verify(&groups, |_, n| n >= 2).is_err());
    }
}
