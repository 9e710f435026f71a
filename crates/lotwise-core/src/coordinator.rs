// Incremental update coordinator - keeps the served lot set in step with the item store
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::candidates::{CandidateGenerator, GroupMap};
use crate::config::Config;
use crate::enrichment::EnrichmentCache;
use crate::index::DependencyIndex;
use crate::models::{Item, ItemChange, ItemId, Lot, LotKey, LotSkeleton, MarketSnapshot};
use crate::scoring::{rank_lots, LotScorer};
use crate::store::ItemStore;
use crate::{Error, Result};

/// Where the current cycle is, for progress display only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CyclePhase {
    Idle,
    SkeletonPhase,
    FilterPhase,
    EnrichPhase,
}

/// What a cycle did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub changed: Vec<ItemId>,
    pub affected: BTreeSet<LotKey>,
    pub rescored: usize,
    pub removed: usize,
    pub full_rebuild: bool,
    pub duration: Duration,
}

/// Lots from the last completed cycle
///
/// Never mutated after publication. A cycle builds the next set and swaps
/// it in whole, so readers never see half an update.
#[derive(Debug, Default)]
pub struct LotSet {
    version: u64,
    lots: BTreeMap<LotKey, Arc<Lot>>,
}

impl LotSet {
    /// Bumped on every publish, 0 before the first cycle
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn get(&self, key: &LotKey) -> Option<&Lot> {
        self.lots.get(key).map(|lot| lot.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &LotKey> {
        self.lots.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lot> {
        self.lots.values().map(|lot| lot.as_ref())
    }

    /// Confidence, then value, then key
    pub fn ranked(&self) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self.iter().cloned().collect();
        rank_lots(&mut lots);
        lots
    }
}

/// Skeleton-side state, single writer
#[derive(Default)]
struct CatalogState {
    items: HashMap<ItemId, Item>,
    /// Every candidate group, qualifying or not
    groups: GroupMap,
    index: DependencyIndex,
    /// Set while skeletons and the served lots may disagree
    dirty: bool,
    initialized: bool,
}

/// Resets the phase to Idle however the cycle ends
struct PhaseGuard<'a> {
    phase: &'a watch::Sender<CyclePhase>,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a watch::Sender<CyclePhase>, next: CyclePhase) -> Self {
        let guard = Self { phase };
        guard.set(next);
        guard
    }

    fn set(&self, next: CyclePhase) {
        debug!("Cycle phase -> {:?}", next);
        self.phase.send_replace(next);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(CyclePhase::Idle);
    }
}

/// Runs full rebuilds and incremental cycles
///
/// Cycles are serialized on the catalog state lock. Within a cycle only the
/// enrich phase does I/O, fanned out across keys up to `max_concurrent`.
pub struct IncrementalUpdateCoordinator {
    store: Arc<dyn ItemStore>,
    generator: CandidateGenerator,
    scorer: LotScorer,
    cache: Arc<EnrichmentCache>,
    max_concurrent: usize,
    state: Mutex<CatalogState>,
    served: RwLock<Arc<LotSet>>,
    phase: watch::Sender<CyclePhase>,
}

impl IncrementalUpdateCoordinator {
    pub fn new(
        store: Arc<dyn ItemStore>,
        generator: CandidateGenerator,
        scorer: LotScorer,
        cache: Arc<EnrichmentCache>,
        max_concurrent: usize,
    ) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            store,
            generator,
            scorer,
            cache,
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(CatalogState::default()),
            served: RwLock::new(Arc::new(LotSet::default())),
            phase,
        }
    }

    pub fn from_config(store: Arc<dyn ItemStore>, cache: Arc<EnrichmentCache>, config: &Config) -> Self {
        Self::new(
            store,
            CandidateGenerator::new(config.grouping.clone()),
            LotScorer::new(config.scoring.clone()),
            cache,
            config.coordinator.max_concurrent_fetches,
        )
    }

    pub fn cache(&self) -> &Arc<EnrichmentCache> {
        &self.cache
    }

    /// The last completed result set
    pub fn lots(&self) -> Arc<LotSet> {
        self.served.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get_all_lots(&self) -> Vec<Lot> {
        self.lots().ranked()
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Current qualifying skeletons
    pub async fn skeletons(&self) -> Vec<LotSkeleton> {
        let state = self.state.lock().await;
        self.generator.skeletons(&state.groups)
    }

    pub async fn dependency_index(&self) -> DependencyIndex {
        self.state.lock().await.index.clone()
    }

    pub async fn trigger_full_rebuild(&self) -> Result<CycleReport> {
        self.full_rebuild_cancellable(&CancellationToken::new()).await
    }

    /// Full rebuild that gives up between keys once `cancel` fires
    ///
    /// A cancelled rebuild returns `Error::Cancelled` and leaves the previous
    /// skeletons, index and served lots exactly as they were.
    pub async fn full_rebuild_cancellable(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut state = self.state.lock().await;
        self.rebuild_locked(&mut state, cancel, Vec::new()).await
    }

    pub async fn notify_item_changed(&self, item_id: &str) -> Result<CycleReport> {
        self.notify_items_changed(&[item_id.to_string()]).await
    }

    /// Re-price only the lots the given items belong to, before or after
    pub async fn notify_items_changed(&self, item_ids: &[ItemId]) -> Result<CycleReport> {
        let mut state = self.state.lock().await;
        let changed: Vec<ItemId> = item_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !state.initialized || state.dirty {
            info!("No consistent lot state yet, running a full rebuild");
            return self
                .rebuild_locked(&mut state, &CancellationToken::new(), changed)
                .await;
        }

        match self.incremental_locked(&mut state, &changed).await {
            Err(Error::IndexCorruption(msg)) => {
                error!("Dependency index corrupted ({}), falling back to full rebuild", msg);
                self.rebuild_locked(&mut state, &CancellationToken::new(), changed)
                    .await
            }
            other => other,
        }
    }

    /// Consume store notifications until the feed closes
    ///
    /// Notifications already queued when a cycle starts are folded into
    /// that cycle. Falling behind the feed means changes were lost, so that
    /// triggers a full rebuild.
    pub async fn run(&self, mut changes: broadcast::Receiver<ItemChange>) {
        use broadcast::error::{RecvError, TryRecvError};

        loop {
            let first = match changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} item notifications, rebuilding all lots", skipped);
                    if let Err(e) = self.trigger_full_rebuild().await {
                        error!("Full rebuild failed: {}", e);
                    }
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("Item change feed closed");
                    break;
                }
            };

            let mut batch = BTreeSet::from([first.item_id]);
            let mut lagged = false;
            let mut closed = false;
            loop {
                match changes.try_recv() {
                    Ok(change) => {
                        batch.insert(change.item_id);
                    }
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Missed {} item notifications, rebuilding all lots", skipped);
                        lagged = true;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        closed = true;
                        break;
                    }
                }
            }

            let result = if lagged {
                self.trigger_full_rebuild().await
            } else {
                let ids: Vec<ItemId> = batch.into_iter().collect();
                self.notify_items_changed(&ids).await
            };
            if let Err(e) = result {
                error!("Lot update cycle failed: {}", e);
            }

            if closed {
                break;
            }
        }
    }

    async fn incremental_locked(&self, state: &mut CatalogState, changed: &[ItemId]) -> Result<CycleReport> {
        let started = Instant::now();

        // Read everything we need before touching any state
        let mut current = Vec::with_capacity(changed.len());
        for id in changed {
            current.push((id.clone(), self.store.get_item(id).await?));
        }

        let phase = PhaseGuard::enter(&self.phase, CyclePhase::SkeletonPhase);
        state.dirty = true;

        let moved: Vec<(ItemId, Option<Item>)> = current
            .into_iter()
            .filter(|(id, new_item)| {
                let unchanged = state.items.get(id) == new_item.as_ref();
                if unchanged {
                    debug!("Item {} unchanged, nothing to re-price", id);
                }
                !unchanged
            })
            .collect();
        let moved_ids: Vec<ItemId> = moved.iter().map(|(id, _)| id.clone()).collect();

        // Lots the items sat in before, plus the ones they sit in after
        let mut affected = state.index.affected_keys(&moved_ids);

        for (id, new_item) in moved {
            let old_indexed = state.index.keys_for(&id);
            let old_candidates = state
                .items
                .get(&id)
                .map(|item| self.generator.keys_for(item))
                .unwrap_or_default();
            self.check_entry(state, &id, &old_indexed, &old_candidates)?;

            let new_candidates = new_item
                .as_ref()
                .map(|item| self.generator.keys_for(item))
                .unwrap_or_default();

            for key in old_candidates.difference(&new_candidates) {
                if let Some(members) = state.groups.get_mut(key) {
                    members.remove(&id);
                }
            }
            for key in new_candidates.difference(&old_candidates) {
                state.groups.entry(key.clone()).or_default().insert(id.clone());
            }
            for key in old_candidates.symmetric_difference(&new_candidates) {
                self.resync_key(state, key, &id);
            }

            match new_item {
                Some(item) => {
                    state.items.insert(id, item);
                }
                None => {
                    state.items.remove(&id);
                }
            }
        }

        affected.extend(state.index.affected_keys(&moved_ids));

        phase.set(CyclePhase::FilterPhase);
        let mut rescore = Vec::new();
        let mut dropped = Vec::new();
        for key in &affected {
            match state
                .groups
                .get(key)
                .and_then(|members| self.generator.skeleton_for(key, members))
            {
                Some(skeleton) => rescore.push(skeleton),
                None => dropped.push(key.clone()),
            }
        }

        phase.set(CyclePhase::EnrichPhase);
        let rescored = rescore.len();
        let lots = self.enrich(&state.items, rescore, None).await?;

        let mut next = self.lots().lots.clone();
        let mut removed = 0;
        for key in &dropped {
            if next.remove(key).is_some() {
                removed += 1;
            }
        }
        for lot in lots {
            next.insert(lot.key().clone(), Arc::new(lot));
        }
        self.publish(next);
        state.dirty = false;
        debug_assert!(
            state
                .index
                .verify(&state.groups, |key, n| self.generator.qualifies(key.strategy, n))
                .is_ok(),
            "dependency index drifted from the groups it was built from"
        );

        let report = CycleReport {
            changed: changed.to_vec(),
            affected,
            rescored,
            removed,
            full_rebuild: false,
            duration: started.elapsed(),
        };
        info!(
            "Lot cycle: {} changed, {} affected, {} rescored, {} removed in {:?}",
            report.changed.len(),
            report.affected.len(),
            report.rescored,
            report.removed,
            report.duration
        );
        Ok(report)
    }

    async fn rebuild_locked(
        &self,
        state: &mut CatalogState,
        cancel: &CancellationToken,
        changed: Vec<ItemId>,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let items = self.store.list_items().await?;

        let phase = PhaseGuard::enter(&self.phase, CyclePhase::SkeletonPhase);
        let groups = self.generator.partition(&items);
        let skeletons = self.generator.skeletons(&groups);
        let index = DependencyIndex::build(&skeletons);

        phase.set(CyclePhase::FilterPhase);
        let affected: BTreeSet<LotKey> = skeletons.iter().map(|s| s.key.clone()).collect();
        let items: HashMap<ItemId, Item> = items.into_iter().map(|i| (i.id.clone(), i)).collect();

        phase.set(CyclePhase::EnrichPhase);
        let rescored = skeletons.len();
        let lots = self.enrich(&items, skeletons, Some(cancel)).await?;

        let next: BTreeMap<LotKey, Arc<Lot>> = lots
            .into_iter()
            .map(|lot| (lot.key().clone(), Arc::new(lot)))
            .collect();
        let removed = self.lots().keys().filter(|k| !next.contains_key(*k)).count();

        *state = CatalogState {
            items,
            groups,
            index,
            dirty: false,
            initialized: true,
        };
        self.publish(next);

        let report = CycleReport {
            changed,
            affected,
            rescored,
            removed,
            full_rebuild: true,
            duration: started.elapsed(),
        };
        info!(
            "Full rebuild: {} items, {} lots, {} removed in {:?}",
            state.items.len(),
            report.rescored,
            report.removed,
            report.duration
        );
        Ok(report)
    }

    /// Every key on file for an item must be a live qualifying group that
    /// lists it, and one its previous attributes produce
    fn check_entry(
        &self,
        state: &CatalogState,
        id: &str,
        indexed: &BTreeSet<LotKey>,
        candidates: &BTreeSet<LotKey>,
    ) -> Result<()> {
        for key in indexed {
            let Some(members) = state.groups.get(key) else {
                return Err(Error::IndexCorruption(format!(
                    "item {} references missing skeleton {}",
                    id, key
                )));
            };
            let consistent = candidates.contains(key)
                && members.contains(id)
                && self.generator.qualifies(key.strategy, members.len());
            if !consistent {
                return Err(Error::IndexCorruption(format!(
                    "item {} references {} which does not hold it",
                    id, key
                )));
            }
        }
        Ok(())
    }

    /// Bring the index in line with one group after its membership moved
    fn resync_key(&self, state: &mut CatalogState, key: &LotKey, moved_id: &str) {
        let members = state.groups.get(key).cloned().unwrap_or_default();
        if !members.contains(moved_id) {
            state.index.unlink(moved_id, key);
        }

        if self.generator.qualifies(key.strategy, members.len()) {
            for member in &members {
                state.index.link(member, key);
            }
        } else {
            for member in &members {
                state.index.unlink(member, key);
            }
        }

        if members.is_empty() {
            state.groups.remove(key);
        }
    }

    async fn enrich(
        &self,
        items: &HashMap<ItemId, Item>,
        skeletons: Vec<LotSkeleton>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Lot>> {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(Error::Cancelled);
        }

        let mut fetches = stream::iter(skeletons.into_iter().map(|skeleton| async move {
            let snapshot = self.snapshot_for(&skeleton.key).await;
            (skeleton, snapshot)
        }))
        .buffer_unordered(self.max_concurrent);

        let mut lots = Vec::new();
        while let Some((skeleton, snapshot)) = fetches.next().await {
            let members: Vec<&Item> = skeleton
                .member_item_ids
                .iter()
                .filter_map(|id| items.get(id))
                .collect();
            lots.push(self.scorer.score(&skeleton, &members, snapshot));

            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!("Rebuild cancelled after {} lots", lots.len());
                return Err(Error::Cancelled);
            }
        }
        Ok(lots)
    }

    /// Per-key failures never abort the cycle, the lot just goes unpriced
    async fn snapshot_for(&self, key: &LotKey) -> Option<MarketSnapshot> {
        match self.cache.get_or_fetch(key).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Scoring {} from per-item estimates: {}", key, e);
                None
            }
        }
    }

    fn publish(&self, lots: BTreeMap<LotKey, Arc<Lot>>) {
        let mut served = self.served.write().unwrap_or_else(|e| e.into_inner());
        let version = served.version + 1;
        *served = Arc::new(LotSet { version, lots });
        debug!("Published lot set v{}", version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::Strategy;
    use crate::models::{ChangeKind, MarketStats};
    use crate::oracle::MockMarketOracle;
    use crate::store::MemoryItemStore;

    fn coordinator(store: Arc<MemoryItemStore>, oracle: MockMarketOracle) -> IncrementalUpdateCoordinator {
        let cache = EnrichmentCache::new(
            Arc::new(oracle),
            chrono::Duration::hours(24),
            Duration::from_secs(1),
        );
        IncrementalUpdateCoordinator::from_config(store, Arc::new(cache), &Config::default())
    }

    fn priced_oracle() -> MockMarketOracle {
        let mut oracle = MockMarketOracle::new();
        oracle.expect_fetch().returning(|_| {
            Ok(MarketStats {
                active_count: 4,
                active_median_price: Some(10.0),
                sold_count: 6,
                sold_median_price: Some(10.0),
            })
        });
        oracle
    }

    fn by_author(id: &str) -> Item {
        Item::new(id, 3.0).with_author("A. Author")
    }

    #[tokio::test]
    async fn test_first_notification_runs_full_rebuild() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
            by_author("3"),
        ]));
        let coordinator = coordinator(store, priced_oracle());

        let report = coordinator.notify_item_changed("1").await.unwrap();

        assert!(report.full_rebuild);
        assert_eq!(coordinator.lots().len(), 1);
        assert_eq!(coordinator.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_unchanged_item_short_circuits() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
            by_author("3"),
        ]));
        let coordinator = coordinator(store, priced_oracle());
        coordinator.trigger_full_rebuild().await.unwrap();
        let before = coordinator.lots().version();

        let report = coordinator.notify_item_changed("2").await.unwrap();

        assert!(!report.full_rebuild);
        assert!(report.affected.is_empty());
        assert_eq!(report.rescored, 0);
        assert_eq!(coordinator.lots().len(), 1);
        assert!(coordinator.lots().version() > before);
    }

    #[tokio::test]
    async fn test_cancelled_rebuild_keeps_previous_state() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
            by_author("3"),
        ]));
        let coordinator = coordinator(store.clone(), priced_oracle());
        coordinator.trigger_full_rebuild().await.unwrap();
        let before = coordinator.lots();

        store.upsert(by_author("4")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = coordinator.full_rebuild_cancellable(&cancel).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(coordinator.lots().version(), before.version());
        let index = coordinator.dependency_index().await;
        assert!(!index.contains_item("4"));
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_corrupted_index_falls_back_to_rebuild() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
            by_author("3"),
        ]));
        let coordinator = coordinator(store.clone(), priced_oracle());
        coordinator.trigger_full_rebuild().await.unwrap();

        {
            let mut state = coordinator.state.lock().await;
            state
                .index
                .link("1", &LotKey::new(Strategy::ByTheme, "ghost"));
        }

        store.upsert(by_author("1").with_condition("Good")).await;
        let report = coordinator.notify_item_changed("1").await.unwrap();

        assert!(report.full_rebuild);
        let index = coordinator.dependency_index().await;
        assert_eq!(index.keys_for("1").len(), 1);
    }

    #[tokio::test]
    async fn test_run_consumes_store_notifications() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
        ]));
        let coordinator = Arc::new(coordinator(store.clone(), priced_oracle()));
        coordinator.trigger_full_rebuild().await.unwrap();
        assert!(coordinator.lots().is_empty());

        let changes = store.subscribe();
        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(changes).await })
        };

        let mut phases = coordinator.watch_phase();
        store.upsert(by_author("3")).await;

        // wait for the cycle to finish publishing
        let mut waited = 0;
        while coordinator.lots().is_empty() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(coordinator.lots().len(), 1);
        assert_eq!(*phases.borrow_and_update(), CyclePhase::Idle);

        runner.abort();
    }

    fn change(id: &str, kind: ChangeKind) -> ItemChange {
        ItemChange {
            item_id: id.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_run_rebuilds_after_falling_behind() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
        ]));
        let coordinator = coordinator(store.clone(), priced_oracle());
        coordinator.trigger_full_rebuild().await.unwrap();
        assert!(coordinator.lots().is_empty());

        // "3" lands in the store but its notification is among the ones lost
        store.upsert(by_author("3")).await;
        let (tx, rx) = broadcast::channel(2);
        for id in ["3", "1", "2", "1"] {
            tx.send(change(id, ChangeKind::Updated)).unwrap();
        }
        drop(tx);

        coordinator.run(rx).await;

        let lots = coordinator.lots();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots.iter().next().unwrap().skeleton.len(), 3);
        assert_eq!(coordinator.dependency_index().await.keys_for("3").len(), 1);
    }

    #[tokio::test]
    async fn test_run_folds_queued_notifications_into_one_cycle() {
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
        ]));
        let coordinator = coordinator(store.clone(), priced_oracle());
        coordinator.trigger_full_rebuild().await.unwrap();
        let before = coordinator.lots().version();

        store.upsert(by_author("3")).await;
        store.upsert(by_author("4")).await;
        let (tx, rx) = broadcast::channel(16);
        tx.send(change("3", ChangeKind::Added)).unwrap();
        tx.send(change("4", ChangeKind::Added)).unwrap();
        drop(tx);

        coordinator.run(rx).await;

        // one publish for both items
        assert_eq!(coordinator.lots().version(), before + 1);
        let lots = coordinator.lots();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots.iter().next().unwrap().skeleton.len(), 4);
    }

    #[tokio::test]
    async fn test_moved_item_affects_old_and_new_lot() {
        let by_b = |id: &str| Item::new(id, 3.0).with_author("B. Writer");
        let store = Arc::new(MemoryItemStore::with_items(vec![
            by_author("1"),
            by_author("2"),
            by_author("3"),
            by_b("4"),
            by_b("5"),
            by_b("6"),
        ]));
        let coordinator = coordinator(store.clone(), priced_oracle());
        coordinator.trigger_full_rebuild().await.unwrap();
        let before = coordinator.dependency_index().await.keys_for("3");

        store.upsert(by_b("3")).await;
        let report = coordinator.notify_item_changed("3").await.unwrap();
        let after = coordinator.dependency_index().await.keys_for("3");

        assert!(!report.full_rebuild);
        assert_eq!(report.affected, before.union(&after).cloned().collect::<BTreeSet<_>>());
        assert_eq!(report.affected.len(), 2);
        assert_eq!(report.rescored, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(coordinator.lots().len(), 1);
    }
}
