//! Browser-driven crawler for paginated fragrance listings.
//!
//! The orchestrator in [`crawler`] walks the listing one page at a time, extracts product
//! cards from the rendered DOM, drops products already known by `(name, brand)`, and
//! persists the rest in bounded batches keyed by generated ids.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod error;
pub mod export;
pub mod extract;
pub mod firestore;
pub mod pagination;
pub mod product;
pub mod state;
pub mod store;
pub mod writer;

pub use config::AppSettings;
pub use crawler::{run_crawl, CrawlReport, Crawler};
pub use product::ProductRecord;
