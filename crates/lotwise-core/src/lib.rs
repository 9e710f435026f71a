// Lot synthesis and incremental re-scoring
pub mod cancel;
pub mod candidates;
pub mod config;
pub mod coordinator;
pub mod enrichment;
pub mod error;
pub mod grouping;
pub mod index;
pub mod models;
pub mod oracle;
pub mod providers;
pub mod scoring;
pub mod store;

pub use cancel::CancellationToken;
pub use candidates::CandidateGenerator;
pub use config::Config;
pub use coordinator::{CyclePhase, CycleReport, IncrementalUpdateCoordinator, LotSet};
pub use enrichment::{EnrichmentCache, EnrichmentStats};
pub use error::Error;
pub use grouping::Strategy;
pub use index::DependencyIndex;
pub use models::{
    ChangeKind, Confidence, Item, ItemChange, ItemId, Lot, LotKey, LotSkeleton, MarketSnapshot,
    MarketStats,
};
pub use oracle::MarketOracle;
pub use providers::MarketplaceOracle;
pub use scoring::LotScorer;
pub use store::{ItemStore, MemoryItemStore};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
