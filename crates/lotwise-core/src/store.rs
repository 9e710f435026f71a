// Item store - the narrow read interface the lot engine needs
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::models::{ChangeKind, Item, ItemChange, ItemId};
use crate::{Error, Result};

/// Queued notifications before a slow subscriber starts lagging
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Where items live
///
/// The engine only reads; writes happen elsewhere and come back as
/// `ItemChange` notifications on `subscribe()`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn list_items(&self) -> Result<Vec<Item>>;
    async fn get_item(&self, id: &str) -> Result<Option<Item>>;
    fn subscribe(&self) -> broadcast::Receiver<ItemChange>;
}

/// In-memory store, backs the CLI and the tests
pub struct MemoryItemStore {
    items: RwLock<HashMap<ItemId, Item>>,
    changes: broadcast::Sender<ItemChange>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Seed without emitting notifications
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let map = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        Self {
            items: RwLock::new(map),
            changes,
        }
    }

    /// Load a JSON array of items
    ///
    /// Ids must be non-blank and unique, a later duplicate would silently
    /// shadow the earlier record otherwise.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let items: Vec<Item> = serde_json::from_str(&contents)?;

        let mut seen = HashSet::new();
        for (position, item) in items.iter().enumerate() {
            if item.id.trim().is_empty() {
                return Err(Error::ItemStore(format!(
                    "item #{} in {} has a blank id",
                    position + 1,
                    path.display()
                )));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(Error::ItemStore(format!(
                    "duplicate item id {} in {}",
                    item.id,
                    path.display()
                )));
            }
        }
        info!("Loaded {} items from {}", items.len(), path.display());
        Ok(Self::with_items(items))
    }

    /// Insert or replace an item and notify subscribers
    pub async fn upsert(&self, item: Item) -> ChangeKind {
        let id = item.id.clone();
        let previous = self.items.write().await.insert(id.clone(), item);
        let kind = if previous.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Added
        };
        self.notify(id, kind);
        kind
    }

    /// Returns the removed item, if there was one
    pub async fn remove(&self, id: &str) -> Option<Item> {
        let removed = self.items.write().await.remove(id);
        if removed.is_some() {
            self.notify(id.to_string(), ChangeKind::Removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn notify(&self, item_id: ItemId, kind: ChangeKind) {
        debug!("Item {} {}", item_id, kind);
        // No subscribers is fine, nobody is listening yet
        let _ = self.changes.send(ItemChange { item_id, kind });
    }
}

impl Default for MemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn list_items(&self) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self.items.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ItemChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_upsert_emits_added_then_updated() {
        let store = MemoryItemStore::new();
        let mut rx = store.subscribe();

        assert_eq!(store.upsert(Item::new("1", 3.0)).await, ChangeKind::Added);
        assert_eq!(store.upsert(Item::new("1", 4.0)).await, ChangeKind::Updated);

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Added);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Updated);
        assert_eq!(store.get_item("1").await.unwrap().unwrap().estimated_price, 4.0);
    }

    #[tokio::test]
    async fn test_remove_missing_item_is_silent() {
        let store = MemoryItemStore::with_items(vec![Item::new("1", 3.0)]);
        let mut rx = store.subscribe();

        assert!(store.remove("nope").await.is_none());
        assert!(store.remove("1").await.is_some());

        let change = rx.recv().await.unwrap();
        assert_eq!(change.item_id, "1");
        assert_eq!(change.kind, ChangeKind::Removed);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_json() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{"id":"b","authors":["Ann"],"estimated_price":2.5},{"id":"a"}]"#,
        )
        .unwrap();

        let store = MemoryItemStore::load_json(file.path()).unwrap();
        let items = store.list_items().await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[1].authors, vec!["Ann".to_string()]);
    }

    #[test]
    fn test_load_json_rejects_duplicate_ids() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"[{"id":"a"},{"id":"b"},{"id":"a"}]"#).unwrap();

        let err = MemoryItemStore::load_json(file.path()).err().unwrap();
        assert!(matches!(err, Error::ItemStore(ref msg) if msg.contains("duplicate item id a")));
    }

    #[test]
    fn test_load_json_rejects_blank_id() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"[{"id":"a"},{"id":"  "}]"#).unwrap();

        let err = MemoryItemStore::load_json(file.path()).err().unwrap();
        assert!(matches!(err, Error::ItemStore(ref msg) if msg.contains("#2")));
    }
}
