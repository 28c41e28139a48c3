use super::client::ClientError;
use super::enrichment::{CompanyEnricher, CompanyQuery, Enrichment, PerplexityClient};
use super::geocoding::{GeoLocation, GeocodingError, NominatimClient};
use super::metadata::{MetadataExtractor, MetadataSource, PhotoMetadata};
use super::ocr::GoogleOcrClient;
use super::vision::{AnthropicVisionClient, VisionExtraction, VisionExtractor};
use crate::config::{Config, ConfigError, EnrichmentMode, VisionProvider};
use crate::ledger::CostLedger;
use crate::models::{
    EnrichmentFields, ExtractionRecord, NewStepLog, PipelineStep, SiteId, StepStatus,
};
use crate::storage::{ImageStore, StorageError};
use crate::store::{SiteStore, StoreError};
use crate::utils::elapsed_ms;

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed for site {site_id}: {message}")]
    Fatal { site_id: SiteId, message: String },
    #[error("Failed to store image: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to create site record: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Client setup failed: {0}")]
    Client(#[from] ClientError),
    #[error("Geocoder setup failed: {0}")]
    Geocoding(#[from] GeocodingError),
}

impl PipelineError {
    pub fn site_id(&self) -> Option<SiteId> {
        match self {
            PipelineError::Fatal { site_id, .. } => Some(*site_id),
            _ => None,
        }
    }
}

/// Result of a best-effort step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Skipped,
    Warned(String),
    Failed(String),
    Succeeded(T),
}

impl<T> StepOutcome<T> {
    pub fn status(&self) -> Option<StepStatus> {
        match self {
            StepOutcome::Skipped => None,
            StepOutcome::Warned(_) => Some(StepStatus::Warning),
            StepOutcome::Failed(_) => Some(StepStatus::Failed),
            StepOutcome::Succeeded(_) => Some(StepStatus::Success),
        }
    }

    pub fn succeeded(self) -> Option<T> {
        match self {
            StepOutcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }
}

/// Errors that end a run after the record exists.
#[derive(Debug, Error)]
enum Abort {
    #[error(transparent)]
    Vision(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub enrichment_mode: EnrichmentMode,
    pub min_confidence: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enrichment_mode: EnrichmentMode::Validate,
            min_confidence: 0.6,
        }
    }
}

impl PipelineSettings {
    fn enrichment_step(&self) -> PipelineStep {
        match self.enrichment_mode {
            EnrichmentMode::Validate => PipelineStep::PerplexityValidation,
            EnrichmentMode::Enrich => PipelineStep::PerplexityEnrichment,
        }
    }
}

/// Runs one photo through upload, metadata, vision, enrichment and finalize.
#[derive(Clone)]
pub struct ExtractionPipeline {
    images: ImageStore,
    store: Arc<dyn SiteStore>,
    ledger: CostLedger,
    metadata: Arc<dyn MetadataSource>,
    vision: Arc<dyn VisionExtractor>,
    enricher: Option<Arc<dyn CompanyEnricher>>,
    settings: PipelineSettings,
}

impl ExtractionPipeline {
    pub fn new(
        images: ImageStore,
        store: Arc<dyn SiteStore>,
        metadata: Arc<dyn MetadataSource>,
        vision: Arc<dyn VisionExtractor>,
    ) -> Self {
        Self {
            images,
            ledger: CostLedger::new(store.clone()),
            store,
            metadata,
            vision,
            enricher: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn CompanyEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wires the production clients. Enrichment stays off without a Perplexity key.
    pub fn from_config(config: &Config, store: Arc<dyn SiteStore>) -> Result<Self, PipelineError> {
        let timeout = config.request_timeout();
        let images = ImageStore::new(config.get_storage_uri()?);

        let geocoder = NominatimClient::new(
            config.geocoding_url.clone(),
            &config.geocoding_user_agent,
            config.geocoding_language.clone(),
            timeout,
        )?;

        let vision: Arc<dyn VisionExtractor> = match config.vision_provider()? {
            VisionProvider::Anthropic => {
                let key = config.anthropic_key().ok_or_else(|| {
                    ConfigError::Validation("ANTHROPIC_API_KEY is not set".into())
                })?;
                Arc::new(AnthropicVisionClient::new(
                    config.anthropic_api_url.clone(),
                    key.to_string(),
                    config.anthropic_model.clone(),
                    timeout,
                )?)
            }
            VisionProvider::Google => {
                let key = config
                    .google_key()
                    .ok_or_else(|| ConfigError::Validation("GOOGLE_API_KEY is not set".into()))?;
                Arc::new(GoogleOcrClient::new(
                    config.google_vision_url.clone(),
                    config.gemini_url.clone(),
                    key.to_string(),
                    timeout,
                )?)
            }
        };

        let mut pipeline = Self::new(
            images,
            store,
            Arc::new(MetadataExtractor::new(Arc::new(geocoder))),
            vision,
        )
        .with_settings(PipelineSettings {
            enrichment_mode: config.enrichment_mode()?,
            min_confidence: config.validation_min_confidence,
        });

        if let Some(key) = config.perplexity_key() {
            pipeline = pipeline.with_enricher(Arc::new(PerplexityClient::new(
                config.perplexity_api_url.clone(),
                key.to_string(),
                config.perplexity_model.clone(),
                timeout,
            )?));
        } else {
            info!("PERPLEXITY_API_KEY not set, enrichment disabled");
        }

        Ok(pipeline)
    }

    pub fn store(&self) -> &Arc<dyn SiteStore> {
        &self.store
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    /// Processes one photo. Errors only when the image cannot be stored or the vision
    /// step (or the store) fails; the latter carry the record id.
    pub async fn run<P: AsRef<Path>>(&self, image_path: P) -> Result<ExtractionRecord, PipelineError> {
        let started = Instant::now();
        let image = self.images.store(image_path.as_ref()).await?;
        let mut record = self.store.create_site(&image).await?;
        let site_id = record.id;

        info!(
            "Processing site {} ({}, via {})",
            site_id,
            image.filename,
            self.vision.provider()
        );

        match self.process(&mut record, started).await {
            Ok(()) => {
                info!(
                    "Site {} completed in {} ms",
                    site_id,
                    record.processing_time_ms.unwrap_or_default()
                );
                Ok(record)
            }
            Err(abort) => {
                let message = abort.to_string();
                error!("Site {} failed: {}", site_id, message);
                self.mark_failed(&mut record, &message).await;
                Err(PipelineError::Fatal { site_id, message })
            }
        }
    }

    async fn process(&self, record: &mut ExtractionRecord, started: Instant) -> Result<(), Abort> {
        let site_id = record.id;
        let image_path = record.image_path.clone();

        record.start_processing();
        self.store.update_site(record).await?;
        self.store
            .append_step_log(
                NewStepLog::new(site_id, PipelineStep::Upload, StepStatus::Success)
                    .message(format!("Image stored as {}", record.image_filename))
                    .data(json!({
                        "filename": record.image_filename,
                        "size": record.image_size,
                        "mimetype": record.image_mimetype,
                    })),
            )
            .await?;

        let step_start = Instant::now();
        let metadata = self.extract_metadata(Path::new(&image_path)).await;
        self.log_outcome(site_id, PipelineStep::GpsExtraction, &metadata, step_start, |m| {
            ("Photo metadata extracted".to_string(), serde_json::to_value(m).ok())
        })
        .await?;
        let location = metadata.succeeded().map(|metadata| {
            record.photo = metadata.photo_fields();
            metadata.location
        });

        let step_start = Instant::now();
        // A vision failure is logged once, as the error step written by mark_failed.
        let extraction = self.vision.extract(Path::new(&image_path)).await?;
        self.record_vision(record, &extraction, step_start).await?;

        let step = self.settings.enrichment_step();
        let step_start = Instant::now();
        let enrichment = self.enrich(record).await;
        self.log_outcome(site_id, step, &enrichment, step_start, |e| {
            (enrichment_message(step, e), serde_json::to_value(&e.data).ok())
        })
        .await?;

        if let Some(location) = location.flatten() {
            let filled = backfill_from_location(record, &location);
            if !filled.is_empty() {
                debug!("Back-filled {:?} from GPS location", filled);
            }
        }

        record.complete(elapsed_ms(started));
        self.store.update_site(record).await?;
        self.store
            .append_step_log(
                NewStepLog::new(site_id, PipelineStep::Completed, StepStatus::Success)
                    .message("Extraction completed")
                    .duration_ms(record.processing_time_ms.unwrap_or_default()),
            )
            .await?;

        Ok(())
    }

    async fn extract_metadata(&self, image_path: &Path) -> StepOutcome<PhotoMetadata> {
        match self.metadata.extract(image_path).await {
            Ok(metadata) if metadata.has_metadata => StepOutcome::Succeeded(metadata),
            Ok(_) => StepOutcome::Warned("No EXIF metadata found in image".into()),
            Err(e) => {
                warn!("Metadata extraction failed: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    async fn record_vision(
        &self,
        record: &mut ExtractionRecord,
        extraction: &VisionExtraction,
        step_start: Instant,
    ) -> Result<(), Abort> {
        for usage in &extraction.usage {
            self.ledger.record(Some(record.id), usage).await;
        }

        for rejection in &extraction.rejections {
            debug!("Discarded extracted value: {}", rejection);
        }

        record.apply_extraction(&extraction.site);
        self.store.update_site(record).await?;

        let message = match &extraction.site.company.company_name {
            Some(name) => format!("Extracted company {name}"),
            None => "No executing company identified".to_string(),
        };

        self.store
            .append_step_log(
                NewStepLog::new(record.id, PipelineStep::VisionAnalysis, StepStatus::Success)
                    .message(message)
                    .data(json!({
                        "provider": self.vision.provider(),
                        "extracted": extraction.site,
                        "rejected": extraction
                            .rejections
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>(),
                    }))
                    .duration_ms(elapsed_ms(step_start)),
            )
            .await?;

        Ok(())
    }

    /// Looks the company up and merges the answer into `record` according to the mode.
    async fn enrich(&self, record: &mut ExtractionRecord) -> StepOutcome<Enrichment> {
        let Some(enricher) = &self.enricher else {
            debug!("Enrichment disabled, skipping");
            return StepOutcome::Skipped;
        };
        let Some(company_name) = record.company.company_name.clone() else {
            debug!("No company name extracted, skipping enrichment");
            return StepOutcome::Skipped;
        };

        let query = CompanyQuery {
            company_name,
            vat_number: record.company.vat_number.clone(),
            city: record.company.city.clone(),
        };

        let enrichment = match enricher.enrich(&query).await {
            Ok(enrichment) => enrichment,
            Err(e) => {
                warn!("Company lookup failed: {}", e);
                return StepOutcome::Failed(e.to_string());
            }
        };
        self.ledger.record(Some(record.id), &enrichment.usage).await;

        if !enrichment.data.found {
            return StepOutcome::Warned(format!("Company {:?} not found", query.company_name));
        }

        if self.settings.enrichment_mode == EnrichmentMode::Validate {
            let confidence = enrichment.data.confidence_score;
            match confidence {
                Some(score) if score >= self.settings.min_confidence => {
                    if let Some(corrected) = &enrichment.data.corrected_data {
                        record.company.apply_corrections(corrected);
                    }
                    record.confidence_score = Some(score);
                }
                _ => {
                    return StepOutcome::Warned(format!(
                        "Lookup confidence {:?} below minimum {}",
                        confidence, self.settings.min_confidence
                    ));
                }
            }
        }

        record.enrichment = EnrichmentFields::from(&enrichment.data);
        record.perplexity_enriched = true;
        StepOutcome::Succeeded(enrichment)
    }

    async fn log_outcome<T>(
        &self,
        site_id: SiteId,
        step: PipelineStep,
        outcome: &StepOutcome<T>,
        step_start: Instant,
        describe: impl FnOnce(&T) -> (String, Option<serde_json::Value>),
    ) -> Result<(), StoreError> {
        let Some(status) = outcome.status() else {
            return Ok(());
        };

        let mut entry = NewStepLog::new(site_id, step, status).duration_ms(elapsed_ms(step_start));
        entry = match outcome {
            StepOutcome::Succeeded(value) => {
                let (message, data) = describe(value);
                let entry = entry.message(message);
                match data {
                    Some(data) => entry.data(data),
                    None => entry,
                }
            }
            StepOutcome::Warned(reason) | StepOutcome::Failed(reason) => entry.message(reason.clone()),
            StepOutcome::Skipped => entry,
        };

        self.store.append_step_log(entry).await.map(|_| ())
    }

    async fn mark_failed(&self, record: &mut ExtractionRecord, message: &str) {
        record.fail(message);
        if let Err(e) = self.store.update_site(record).await {
            error!("Failed to persist failure of site {}: {}", record.id, e);
        }

        let entry = NewStepLog::new(record.id, PipelineStep::Error, StepStatus::Failed).message(message);
        if let Err(e) = self.store.append_step_log(entry).await {
            error!("Failed to log failure of site {}: {}", record.id, e);
        }
    }
}

fn enrichment_message(step: PipelineStep, enrichment: &Enrichment) -> String {
    match step {
        PipelineStep::PerplexityValidation => format!(
            "Company validated, {} correction(s) made",
            enrichment.data.corrections_made.len()
        ),
        _ => "Company enriched".to_string(),
    }
}

/// Fills empty address fields from the photo's geocoded location.
/// Never overwrites a value; returns the fields it filled.
pub fn backfill_from_location(record: &mut ExtractionRecord, location: &GeoLocation) -> Vec<&'static str> {
    let formatted = Some(location.formatted_address.clone()).filter(|a| !a.is_empty());

    let candidates: [(&'static str, &mut Option<String>, Option<String>); 4] = [
        ("city", &mut record.company.city, location.address.city.clone()),
        ("province", &mut record.company.province, location.address.province.clone()),
        ("address", &mut record.company.address, formatted),
        ("postal_code", &mut record.company.postal_code, location.address.postcode.clone()),
    ];

    let mut filled = Vec::new();
    for (name, slot, value) in candidates {
        if slot.is_none() && value.is_some() {
            *slot = value;
            filled.push(name);
        }
    }
    filled
}
