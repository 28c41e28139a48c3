use crate::models::{ExtractionRecord, ExtractionStatus, SiteId, StepLog};
use crate::storage::ImageStore;
use crate::store::{SitePage, SiteQuery, SiteStore, StoreError, SEARCH_LIMIT};

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Search term must not be empty")]
    EmptySearchTerm,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SiteDetail {
    pub site: ExtractionRecord,
    pub logs: Vec<StepLog>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct SiteStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub enriched: usize,
    pub avg_processing_time_ms: Option<f64>,
}

/// Read side over persisted extractions.
#[derive(Clone)]
pub struct SiteCatalog {
    store: Arc<dyn SiteStore>,
    images: ImageStore,
}

impl SiteCatalog {
    pub fn new(store: Arc<dyn SiteStore>, images: ImageStore) -> Self {
        Self { store, images }
    }

    pub async fn list(
        &self,
        status: Option<ExtractionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<SitePage, CatalogError> {
        let query = SiteQuery {
            status,
            limit,
            offset,
        };
        Ok(self.store.list_sites(&query).await?)
    }

    pub async fn detail(&self, id: SiteId) -> Result<Option<SiteDetail>, CatalogError> {
        let Some(site) = self.store.get_site(id).await? else {
            return Ok(None);
        };
        let logs = self.store.step_logs(id).await?;
        Ok(Some(SiteDetail { site, logs }))
    }

    /// Deletes the record and its image. Unknown ids are a no-op.
    pub async fn delete(&self, id: SiteId) -> Result<bool, CatalogError> {
        let Some(site) = self.store.get_site(id).await? else {
            return Ok(false);
        };

        if let Err(e) = self.images.remove(&site.image_path).await {
            warn!("Could not remove image {} of site {}: {}", site.image_path, id, e);
        }

        self.store.delete_site(id).await?;
        info!("Deleted site {}", id);
        Ok(true)
    }

    pub async fn stats(&self) -> Result<SiteStats, CatalogError> {
        let page = self
            .store
            .list_sites(&SiteQuery {
                status: None,
                limit: usize::MAX,
                offset: 0,
            })
            .await?;

        let mut stats = SiteStats {
            total: page.pagination.total,
            ..Default::default()
        };

        let mut timings = Vec::new();
        for site in &page.sites {
            match site.extraction_status {
                ExtractionStatus::Completed => stats.completed += 1,
                ExtractionStatus::Failed => stats.failed += 1,
                ExtractionStatus::Pending | ExtractionStatus::Processing => {}
            }
            if site.perplexity_enriched {
                stats.enriched += 1;
            }
            if let Some(ms) = site.processing_time_ms {
                timings.push(ms as f64);
            }
        }

        if !timings.is_empty() {
            stats.avg_processing_time_ms = Some(timings.iter().sum::<f64>() / timings.len() as f64);
        }

        Ok(stats)
    }

    pub async fn search(&self, term: &str) -> Result<Vec<ExtractionRecord>, CatalogError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(CatalogError::EmptySearchTerm);
        }
        Ok(self.store.search_sites(term, SEARCH_LIMIT).await?)
    }
}
