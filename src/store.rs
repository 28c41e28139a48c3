use crate::models::{
    ExtractionRecord, ExtractionStatus, NewStepLog, NewUsageRecord, SiteId, StepLog, UsageRecord,
};
use crate::storage::StoredImage;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const SEARCH_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Site not found: {0}")]
    NotFound(SiteId),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteQuery {
    pub status: Option<ExtractionStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SiteQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SitePage {
    pub sites: Vec<ExtractionRecord>,
    pub pagination: Pagination,
}

/// Persistence contract for extraction records, their audit trail and API usage rows.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Inserts a pending record for `image` under a fresh id.
    async fn create_site(&self, image: &StoredImage) -> Result<ExtractionRecord, StoreError>;

    async fn get_site(&self, id: SiteId) -> Result<Option<ExtractionRecord>, StoreError>;

    async fn update_site(&self, record: &ExtractionRecord) -> Result<(), StoreError>;

    /// Removes the record and its step logs. Usage rows keep their link.
    async fn delete_site(&self, id: SiteId) -> Result<Option<ExtractionRecord>, StoreError>;

    /// Newest first.
    async fn list_sites(&self, query: &SiteQuery) -> Result<SitePage, StoreError>;

    async fn search_sites(&self, term: &str, limit: usize) -> Result<Vec<ExtractionRecord>, StoreError>;

    async fn append_step_log(&self, entry: NewStepLog) -> Result<StepLog, StoreError>;

    /// Oldest first.
    async fn step_logs(&self, site_id: SiteId) -> Result<Vec<StepLog>, StoreError>;

    async fn append_usage(&self, usage: NewUsageRecord) -> Result<UsageRecord, StoreError>;

    async fn usage_records(&self) -> Result<Vec<UsageRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    sites: BTreeMap<SiteId, ExtractionRecord>,
    step_logs: Vec<StepLog>,
    usage: Vec<UsageRecord>,
    last_site_id: SiteId,
    last_log_id: i64,
    last_usage_id: i64,
}

/// In-process [`SiteStore`]. Ids are assigned monotonically and never reused.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_term(record: &ExtractionRecord, needle: &str) -> bool {
    [
        &record.company.company_name,
        &record.company.legal_name,
        &record.company.address,
        &record.raw_text,
    ]
    .into_iter()
    .flatten()
    .any(|value| value.to_lowercase().contains(needle))
}

#[async_trait]
impl SiteStore for InMemoryStore {
    async fn create_site(&self, image: &StoredImage) -> Result<ExtractionRecord, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_site_id += 1;

        let record = ExtractionRecord::new(tables.last_site_id, image);
        tables.sites.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_site(&self, id: SiteId) -> Result<Option<ExtractionRecord>, StoreError> {
        Ok(self.tables.read().await.sites.get(&id).cloned())
    }

    async fn update_site(&self, record: &ExtractionRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .sites
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;

        *slot = record.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_site(&self, id: SiteId) -> Result<Option<ExtractionRecord>, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.sites.remove(&id);
        if removed.is_some() {
            tables.step_logs.retain(|log| log.site_id != id);
        }
        Ok(removed)
    }

    async fn list_sites(&self, query: &SiteQuery) -> Result<SitePage, StoreError> {
        let tables = self.tables.read().await;

        let matching: Vec<&ExtractionRecord> = tables
            .sites
            .values()
            .rev()
            .filter(|record| query.status.map_or(true, |status| record.extraction_status == status))
            .collect();

        let sites = matching
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|record| (*record).clone())
            .collect();

        Ok(SitePage {
            sites,
            pagination: Pagination {
                total: matching.len(),
                limit: query.limit,
                offset: query.offset,
            },
        })
    }

    async fn search_sites(&self, term: &str, limit: usize) -> Result<Vec<ExtractionRecord>, StoreError> {
        let needle = term.to_lowercase();
        let tables = self.tables.read().await;

        Ok(tables
            .sites
            .values()
            .rev()
            .filter(|record| matches_term(record, &needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_step_log(&self, entry: NewStepLog) -> Result<StepLog, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sites.contains_key(&entry.site_id) {
            return Err(StoreError::NotFound(entry.site_id));
        }

        tables.last_log_id += 1;
        let log = StepLog {
            id: tables.last_log_id,
            site_id: entry.site_id,
            step: entry.step,
            status: entry.status,
            message: entry.message,
            data: entry.data,
            duration_ms: entry.duration_ms,
            created_at: Utc::now(),
        };
        tables.step_logs.push(log.clone());
        Ok(log)
    }

    async fn step_logs(&self, site_id: SiteId) -> Result<Vec<StepLog>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .step_logs
            .iter()
            .filter(|log| log.site_id == site_id)
            .cloned()
            .collect())
    }

    async fn append_usage(&self, usage: NewUsageRecord) -> Result<UsageRecord, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_usage_id += 1;

        let record = UsageRecord {
            id: tables.last_usage_id,
            site_id: usage.site_id,
            service: usage.service,
            tokens_input: usage.tokens_input,
            tokens_output: usage.tokens_output,
            cost_usd: usage.cost_usd,
            metadata: usage.metadata,
            request_timestamp: usage.request_timestamp,
        };
        tables.usage.push(record.clone());
        Ok(record)
    }

    async fn usage_records(&self) -> Result<Vec<UsageRecord>, StoreError> {
        Ok(self.tables.read().await.usage.clone())
    }
}
