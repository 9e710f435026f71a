// Oracle implementations that talk to real marketplaces
pub mod market;

pub use market::{lot_queries, MarketplaceOracle};
