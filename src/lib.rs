pub mod catalog;
pub mod config;
pub mod extraction;
pub mod ledger;
pub mod models;
pub mod queue;
pub mod storage;
pub mod store;
pub mod utils;

pub use catalog::{CatalogError, SiteCatalog, SiteDetail, SiteStats};
pub use config::{Config, ConfigError, EnrichmentMode, VisionProvider};
pub use extraction::{ExtractionPipeline, PipelineError, StepOutcome};
pub use ledger::{CostLedger, CostSummary, PricingTable};
pub use models::*;
pub use queue::{JobHandle, ProcessingQueue, QueueError, QueueStats};
pub use storage::{ImageStore, StorageError, StorageUri, StoredImage};
pub use store::{InMemoryStore, Pagination, SitePage, SiteQuery, SiteStore, StoreError};
