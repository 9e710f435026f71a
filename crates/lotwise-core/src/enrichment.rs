// Market snapshot cache - memory in front of SQLite in front of the oracle
use chrono::Utc;
use lotwise_cache::CacheManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::models::{LotKey, MarketSnapshot};
use crate::oracle::MarketOracle;
use crate::{Error, Result};

/// Namespace the snapshots live under in the shared cache database
pub const SNAPSHOT_NAMESPACE: &str = "market_snapshots";

/// Counters for how the cache has been answering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub hits: u64,
    pub misses: u64,
    pub oracle_calls: u64,
    pub stale_served: u64,
    pub unavailable: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    oracle_calls: AtomicU64,
    stale_served: AtomicU64,
    unavailable: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EnrichmentStats {
        EnrichmentStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oracle_calls: self.oracle_calls.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
        }
    }
}

/// How one trip to the oracle ended, shared by everyone who waited on it
#[derive(Debug, Clone)]
enum FetchOutcome {
    Fresh(MarketSnapshot),
    Stale(MarketSnapshot),
    Unavailable(String),
}

type Flight = Arc<OnceCell<FetchOutcome>>;

/// Cache-first access to market comps
///
/// A fresh snapshot is served without touching the oracle. Otherwise the
/// first caller for a key starts a fetch and every concurrent caller for
/// that key joins it and gets the same outcome, success or not. On oracle
/// failure the last known snapshot comes back flagged stale; with nothing
/// on file the caller gets `MarketUnavailable`. Data is never made up.
pub struct EnrichmentCache {
    oracle: Arc<dyn MarketOracle>,
    disk: Option<Arc<CacheManager>>,
    memory: RwLock<HashMap<LotKey, MarketSnapshot>>,
    in_flight: Mutex<HashMap<LotKey, Flight>>,
    ttl: chrono::Duration,
    fetch_timeout: Duration,
    counters: Counters,
}

impl EnrichmentCache {
    pub fn new(oracle: Arc<dyn MarketOracle>, ttl: chrono::Duration, fetch_timeout: Duration) -> Self {
        Self {
            oracle,
            disk: None,
            memory: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            ttl,
            fetch_timeout,
            counters: Counters::default(),
        }
    }

    /// Persist snapshots in the given cache database as well
    pub fn with_disk(mut self, disk: Arc<CacheManager>) -> Self {
        self.disk = Some(disk);
        self
    }

    /// Open the on-disk cache where the config says it lives
    pub fn from_config(oracle: Arc<dyn MarketOracle>, config: &CacheConfig) -> Result<Self> {
        let path = config.resolved_db_path()?;
        let disk = CacheManager::new(&path)?;
        info!("Market snapshot cache at {}", path.display());
        Ok(Self::new(oracle, config.ttl(), config.oracle_timeout()).with_disk(Arc::new(disk)))
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub fn stats(&self) -> EnrichmentStats {
        self.counters.snapshot()
    }

    pub async fn get_or_fetch(&self, key: &LotKey) -> Result<MarketSnapshot> {
        if let Some(snapshot) = self.fresh(key) {
            Counters::bump(&self.counters.hits);
            return Ok(snapshot);
        }

        let flight = self.join_flight(key);
        let outcome = flight.get_or_init(|| self.fetch(key)).await.clone();
        self.land_flight(key, &flight);

        match outcome {
            FetchOutcome::Fresh(snapshot) | FetchOutcome::Stale(snapshot) => Ok(snapshot),
            FetchOutcome::Unavailable(reason) => Err(Error::MarketUnavailable {
                key: key.to_string(),
                reason,
            }),
        }
    }

    /// One oracle round trip, bounded by the fetch timeout
    async fn fetch(&self, key: &LotKey) -> FetchOutcome {
        // A flight that just landed may have stored it
        if let Some(snapshot) = self.fresh(key) {
            Counters::bump(&self.counters.hits);
            return FetchOutcome::Fresh(snapshot);
        }

        Counters::bump(&self.counters.misses);
        Counters::bump(&self.counters.oracle_calls);
        debug!("Fetching market comps for {}", key);

        let outcome = match tokio::time::timeout(self.fetch_timeout, self.oracle.fetch(key)).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.fetch_timeout)),
        };

        match outcome {
            Ok(stats) => {
                let snapshot = MarketSnapshot::from_stats(key.clone(), stats, Utc::now());
                self.store(&snapshot);
                FetchOutcome::Fresh(snapshot)
            }
            Err(reason) => match self.cached(key) {
                Some(previous) => {
                    warn!(
                        "Oracle failed for {} ({}), serving snapshot from {}",
                        key, reason, previous.fetched_at
                    );
                    Counters::bump(&self.counters.stale_served);
                    FetchOutcome::Stale(previous.into_stale())
                }
                None => {
                    warn!("Market data unavailable for {}: {}", key, reason);
                    Counters::bump(&self.counters.unavailable);
                    FetchOutcome::Unavailable(reason)
                }
            },
        }
    }

    /// Last known snapshot for a key regardless of age
    pub fn cached(&self, key: &LotKey) -> Option<MarketSnapshot> {
        if let Some(snapshot) = self.read_memory().get(key) {
            return Some(snapshot.clone());
        }

        let disk = self.disk.as_ref()?;
        match disk.get::<MarketSnapshot>(SNAPSHOT_NAMESPACE, &key.cache_key()) {
            Ok(Some(entry)) => {
                let snapshot = entry.value;
                self.write_memory().insert(key.clone(), snapshot.clone());
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Snapshot cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Seed a snapshot as if it had been fetched at its `fetched_at`
    pub fn insert(&self, mut snapshot: MarketSnapshot) {
        snapshot.is_stale = false;
        self.store(&snapshot);
    }

    /// Forget a key so the next lookup goes to the oracle
    pub fn invalidate(&self, key: &LotKey) {
        self.write_memory().remove(key);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.delete(SNAPSHOT_NAMESPACE, &key.cache_key()) {
                warn!("Failed to drop cached snapshot for {}: {}", key, e);
            }
        }
    }

    fn fresh(&self, key: &LotKey) -> Option<MarketSnapshot> {
        self.cached(key)
            .filter(|s| !s.is_expired(self.ttl, Utc::now()))
    }

    fn store(&self, snapshot: &MarketSnapshot) {
        let key = &snapshot.group_key;
        self.write_memory().insert(key.clone(), snapshot.clone());

        if let Some(disk) = &self.disk {
            let written =
                disk.set_at(SNAPSHOT_NAMESPACE, &key.cache_key(), snapshot, snapshot.fetched_at);
            if let Err(e) = written {
                // Memory still has it, the next process just refetches
                warn!("Failed to persist snapshot for {}: {}", key, e);
            }
        }
    }

    fn join_flight(&self, key: &LotKey) -> Flight {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.entry(key.clone()).or_default().clone()
    }

    /// Retire a resolved flight so the next miss asks the oracle again
    fn land_flight(&self, key: &LotKey, flight: &Flight) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(key).is_some_and(|current| Arc::ptr_eq(current, flight)) {
            in_flight.remove(key);
        }
    }

    fn read_memory(&self) -> std::sync::RwLockReadGuard<'_, HashMap<LotKey, MarketSnapshot>> {
        self.memory.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_memory(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<LotKey, MarketSnapshot>> {
        self.memory.write().unwrap_or_else(|e| e.into_inner())
    }
}
