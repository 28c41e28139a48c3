//! Cost estimates for every external API call and the queries over them.

use crate::models::{ApiService, ApiUsage, NewUsageRecord, SiteId, UsageRecord};
use crate::store::{SiteStore, StoreError};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub const RECENT_ACTIVITY_LIMIT: usize = 50;

/// Static USD rates per service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingTable {
    pub google_vision_per_image: f64,
    pub gemini_input_per_million: f64,
    pub gemini_output_per_million: f64,
    pub anthropic_input_per_million: f64,
    pub anthropic_output_per_million: f64,
    pub perplexity_per_thousand: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            google_vision_per_image: 0.0015,
            gemini_input_per_million: 0.01875,
            gemini_output_per_million: 0.075,
            anthropic_input_per_million: 3.0,
            anthropic_output_per_million: 15.0,
            perplexity_per_thousand: 0.005,
        }
    }
}

impl PricingTable {
    pub fn estimate(&self, service: ApiService, tokens_input: u64, tokens_output: u64) -> f64 {
        let input = tokens_input as f64;
        let output = tokens_output as f64;

        match service {
            ApiService::GoogleVision => self.google_vision_per_image,
            ApiService::Gemini => {
                input / 1_000_000.0 * self.gemini_input_per_million
                    + output / 1_000_000.0 * self.gemini_output_per_million
            }
            ApiService::Anthropic => {
                input / 1_000_000.0 * self.anthropic_input_per_million
                    + output / 1_000_000.0 * self.anthropic_output_per_million
            }
            ApiService::Perplexity => (input + output) / 1000.0 * self.perplexity_per_thousand,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MonthlyCost {
    /// `YYYY-MM`.
    pub month: String,
    pub total_cost: f64,
    pub total_requests: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ServiceCost {
    pub service: ApiService,
    pub request_count: usize,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub total_cost: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SiteCost {
    pub site_id: SiteId,
    pub total_cost: f64,
    pub total_requests: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ActivityEntry {
    #[serde(flatten)]
    pub usage: UsageRecord,
    pub company_name: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CostSummary {
    pub current_month: MonthlyCost,
    pub by_service: Vec<ServiceCost>,
    pub all_time_cost: f64,
    pub all_time_requests: usize,
}

fn month_key(timestamp: &DateTime<Utc>) -> (i32, u32) {
    (timestamp.year(), timestamp.month())
}

/// Append-only usage ledger over the site store.
#[derive(Clone)]
pub struct CostLedger {
    store: Arc<dyn SiteStore>,
    pricing: PricingTable,
}

impl CostLedger {
    pub fn new(store: Arc<dyn SiteStore>) -> Self {
        Self::with_pricing(store, PricingTable::default())
    }

    pub fn with_pricing(store: Arc<dyn SiteStore>, pricing: PricingTable) -> Self {
        Self { store, pricing }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Prices and stores one call. A failed write is logged and swallowed.
    pub async fn record(&self, site_id: Option<SiteId>, usage: &ApiUsage) -> Option<UsageRecord> {
        let cost_usd = self
            .pricing
            .estimate(usage.service, usage.tokens_input, usage.tokens_output);

        let entry = NewUsageRecord {
            site_id,
            service: usage.service,
            tokens_input: usage.tokens_input,
            tokens_output: usage.tokens_output,
            cost_usd,
            metadata: usage.metadata.clone(),
            request_timestamp: Utc::now(),
        };

        match self.store.append_usage(entry).await {
            Ok(record) => {
                debug!("Recorded {} call costing ${:.6}", usage.service, cost_usd);
                Some(record)
            }
            Err(e) => {
                warn!("Failed to record {} usage: {}", usage.service, e);
                None
            }
        }
    }

    async fn records_in_month(&self, year: i32, month: u32) -> Result<Vec<UsageRecord>, StoreError> {
        Ok(self
            .store
            .usage_records()
            .await?
            .into_iter()
            .filter(|record| month_key(&record.request_timestamp) == (year, month))
            .collect())
    }

    pub async fn month_total(&self, year: i32, month: u32) -> Result<MonthlyCost, StoreError> {
        let records = self.records_in_month(year, month).await?;

        Ok(MonthlyCost {
            month: format!("{year}-{month:02}"),
            total_cost: records.iter().map(|r| r.cost_usd).sum(),
            total_requests: records.len(),
        })
    }

    pub async fn current_month_total(&self) -> Result<MonthlyCost, StoreError> {
        let (year, month) = month_key(&Utc::now());
        self.month_total(year, month).await
    }

    /// Per-service totals for a month, ordered by service.
    pub async fn service_breakdown(&self, year: i32, month: u32) -> Result<Vec<ServiceCost>, StoreError> {
        let mut by_service: BTreeMap<ApiService, ServiceCost> = BTreeMap::new();

        for record in self.records_in_month(year, month).await? {
            let entry = by_service.entry(record.service).or_insert(ServiceCost {
                service: record.service,
                request_count: 0,
                total_tokens_input: 0,
                total_tokens_output: 0,
                total_cost: 0.0,
            });
            entry.request_count += 1;
            entry.total_tokens_input += record.tokens_input;
            entry.total_tokens_output += record.tokens_output;
            entry.total_cost += record.cost_usd;
        }

        Ok(by_service.into_values().collect())
    }

    pub async fn site_cost(&self, site_id: SiteId) -> Result<SiteCost, StoreError> {
        let records: Vec<UsageRecord> = self
            .store
            .usage_records()
            .await?
            .into_iter()
            .filter(|record| record.site_id == Some(site_id))
            .collect();

        Ok(SiteCost {
            site_id,
            total_cost: records.iter().map(|r| r.cost_usd).sum(),
            total_requests: records.len(),
        })
    }

    /// Newest calls first, each with the company name of its site when the site still exists.
    pub async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        let mut records = self.store.usage_records().await?;
        records.sort_by(|a, b| {
            b.request_timestamp
                .cmp(&a.request_timestamp)
                .then(b.id.cmp(&a.id))
        });
        records.truncate(limit);

        let mut names: HashMap<SiteId, Option<String>> = HashMap::new();
        let mut entries = Vec::with_capacity(records.len());

        for usage in records {
            let company_name = match usage.site_id {
                Some(site_id) => {
                    if !names.contains_key(&site_id) {
                        let name = self
                            .store
                            .get_site(site_id)
                            .await?
                            .and_then(|site| site.company.company_name);
                        names.insert(site_id, name);
                    }
                    names.get(&site_id).cloned().flatten()
                }
                None => None,
            };
            entries.push(ActivityEntry {
                usage,
                company_name,
            });
        }

        Ok(entries)
    }

    pub async fn summary(&self) -> Result<CostSummary, StoreError> {
        let (year, month) = month_key(&Utc::now());
        let all = self.store.usage_records().await?;

        Ok(CostSummary {
            current_month: self.month_total(year, month).await?,
            by_service: self.service_breakdown(year, month).await?,
            all_time_cost: all.iter().map(|r| r.cost_usd).sum(),
            all_time_requests: all.len(),
        })
    }
}
