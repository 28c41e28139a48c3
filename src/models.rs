use crate::storage::StoredImage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type SiteId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed vocabulary of audit-trail steps.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Upload,
    GpsExtraction,
    VisionAnalysis,
    PerplexityValidation,
    PerplexityEnrichment,
    Completed,
    Error,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Upload => "upload",
            PipelineStep::GpsExtraction => "gps_extraction",
            PipelineStep::VisionAnalysis => "vision_analysis",
            PipelineStep::PerplexityValidation => "perplexity_validation",
            PipelineStep::PerplexityEnrichment => "perplexity_enrichment",
            PipelineStep::Completed => "completed",
            PipelineStep::Error => "error",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Success,
    Failed,
    Warning,
}

/// Identity, contact and address fields of the executing company.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CompanyFields {
    pub company_name: Option<String>,
    pub legal_name: Option<String>,
    pub vat_number: Option<String>,
    pub tax_code: Option<String>,
    pub phone_number: Option<String>,
    pub mobile_number: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
}

impl CompanyFields {
    /// Overwrites every field that `corrections` provides, keeping the rest.
    /// Returns the names of the fields whose value changed.
    pub fn apply_corrections(&mut self, corrections: &CompanyFields) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let pairs: [(&'static str, &mut Option<String>, &Option<String>); 12] = [
            ("company_name", &mut self.company_name, &corrections.company_name),
            ("legal_name", &mut self.legal_name, &corrections.legal_name),
            ("vat_number", &mut self.vat_number, &corrections.vat_number),
            ("tax_code", &mut self.tax_code, &corrections.tax_code),
            ("phone_number", &mut self.phone_number, &corrections.phone_number),
            ("mobile_number", &mut self.mobile_number, &corrections.mobile_number),
            ("email", &mut self.email, &corrections.email),
            ("website", &mut self.website, &corrections.website),
            ("address", &mut self.address, &corrections.address),
            ("city", &mut self.city, &corrections.city),
            ("province", &mut self.province, &corrections.province),
            ("postal_code", &mut self.postal_code, &corrections.postal_code),
        ];

        for (name, current, corrected) in pairs {
            if let Some(value) = corrected {
                if current.as_ref() != Some(value) {
                    *current = Some(value.clone());
                    changed.push(name);
                }
            }
        }

        changed
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProjectFields {
    pub construction_type: Option<String>,
    pub construction_description: Option<String>,
    pub project_name: Option<String>,
    pub project_amount: Option<f64>,
}

/// Normalized output of the vision step.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExtractedSite {
    pub raw_text: Option<String>,
    #[serde(flatten)]
    pub company: CompanyFields,
    #[serde(flatten)]
    pub project: ProjectFields,
    pub confidence_score: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompanySize {
    Micro,
    Small,
    Medium,
    Large,
}

impl CompanySize {
    /// Maps the English buckets and their Italian variants; anything else is unknown.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "micro" | "microimpresa" => Some(CompanySize::Micro),
            "small" | "piccola" | "pmi" => Some(CompanySize::Small),
            "medium" | "media" => Some(CompanySize::Medium),
            "large" | "grande" => Some(CompanySize::Large),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContactChannel {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Normalized result of a web-search company lookup.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CompanyEnrichment {
    pub found: bool,
    pub description: Option<String>,
    pub company_size: Option<CompanySize>,
    pub founded_year: Option<i32>,
    pub employees: Option<u32>,
    pub sector: Option<String>,
    pub certifications: Vec<String>,
    pub additional_contacts: Vec<ContactChannel>,
    pub social_media: BTreeMap<String, String>,
    pub corrections_made: Vec<String>,
    pub confidence_score: Option<f64>,
    pub corrected_data: Option<CompanyFields>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct EnrichmentFields {
    pub company_description: Option<String>,
    pub company_size: Option<CompanySize>,
    pub company_founded_year: Option<i32>,
    pub company_employees: Option<u32>,
    pub company_sector: Option<String>,
    pub company_certifications: Vec<String>,
    pub additional_contacts: Vec<ContactChannel>,
    pub social_media: BTreeMap<String, String>,
}

impl From<&CompanyEnrichment> for EnrichmentFields {
    fn from(enrichment: &CompanyEnrichment) -> Self {
        EnrichmentFields {
            company_description: enrichment.description.clone(),
            company_size: enrichment.company_size,
            company_founded_year: enrichment.founded_year,
            company_employees: enrichment.employees,
            company_sector: enrichment.sector.clone(),
            company_certifications: enrichment.certifications.clone(),
            additional_contacts: enrichment.additional_contacts.clone(),
            social_media: enrichment.social_media.clone(),
        }
    }
}

/// Photo metadata persisted alongside the extraction.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PhotoFields {
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
    pub gps_location_address: Option<String>,
    pub gps_location_city: Option<String>,
    pub gps_location_province: Option<String>,
    pub photo_datetime: Option<String>,
    pub photo_device: Option<String>,
}

/// One photograph's lifecycle, from upload to completed or failed extraction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExtractionRecord {
    pub id: SiteId,
    pub image_path: String,
    pub image_filename: String,
    pub image_size: u64,
    pub image_mimetype: String,
    pub extraction_status: ExtractionStatus,
    pub extraction_error: Option<String>,
    pub raw_text: Option<String>,
    #[serde(flatten)]
    pub company: CompanyFields,
    #[serde(flatten)]
    pub project: ProjectFields,
    pub confidence_score: Option<f64>,
    pub perplexity_enriched: bool,
    #[serde(flatten)]
    pub enrichment: EnrichmentFields,
    #[serde(flatten)]
    pub photo: PhotoFields,
    pub processing_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn new(id: SiteId, image: &StoredImage) -> Self {
        let now = Utc::now();
        Self {
            id,
            image_path: image.path.clone(),
            image_filename: image.filename.clone(),
            image_size: image.size,
            image_mimetype: image.mime_type.clone(),
            extraction_status: ExtractionStatus::Pending,
            extraction_error: None,
            raw_text: None,
            company: CompanyFields::default(),
            project: ProjectFields::default(),
            confidence_score: None,
            perplexity_enriched: false,
            enrichment: EnrichmentFields::default(),
            photo: PhotoFields::default(),
            processing_time_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_processing(&mut self) {
        self.extraction_status = ExtractionStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn apply_extraction(&mut self, extracted: &ExtractedSite) {
        self.raw_text = extracted.raw_text.clone();
        self.company = extracted.company.clone();
        self.project = extracted.project.clone();
        self.confidence_score = Some(extracted.confidence_score);
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, processing_time_ms: u64) {
        self.extraction_status = ExtractionStatus::Completed;
        self.extraction_error = None;
        self.processing_time_ms = Some(processing_time_ms);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.extraction_status = ExtractionStatus::Failed;
        self.extraction_error = Some(message.into());
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StepLog {
    pub id: i64,
    pub site_id: SiteId,
    pub step: PipelineStep,
    pub status: StepStatus,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStepLog {
    pub site_id: SiteId,
    pub step: PipelineStep,
    pub status: StepStatus,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
    pub duration_ms: Option<u64>,
}

impl NewStepLog {
    pub fn new(site_id: SiteId, step: PipelineStep, status: StepStatus) -> Self {
        Self {
            site_id,
            step,
            status,
            message: None,
            data: None,
            duration_ms: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// External services whose calls are priced by the cost ledger.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ApiService {
    GoogleVision,
    Gemini,
    Anthropic,
    Perplexity,
}

impl ApiService {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiService::GoogleVision => "google_vision",
            ApiService::Gemini => "gemini",
            ApiService::Anthropic => "anthropic",
            ApiService::Perplexity => "perplexity",
        }
    }
}

impl fmt::Display for ApiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage reported by a client for one external call.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ApiUsage {
    pub service: ApiService,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub metadata: serde_json::Value,
}

impl ApiUsage {
    pub fn new(service: ApiService, tokens_input: u64, tokens_output: u64) -> Self {
        Self {
            service,
            tokens_input,
            tokens_output,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUsageRecord {
    pub site_id: Option<SiteId>,
    pub service: ApiService,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
    pub metadata: serde_json::Value,
    pub request_timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UsageRecord {
    pub id: i64,
    pub site_id: Option<SiteId>,
    pub service: ApiService,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
    pub metadata: serde_json::Value,
    pub request_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_image() -> StoredImage {
        StoredImage {
            path: "/tmp/sites/abc.jpg".to_string(),
            filename: "abc.jpg".to_string(),
            size: 1024,
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[test]
    fn test_record_lifecycle() {
        let mut record = ExtractionRecord::new(1, &stored_image());
        assert_eq!(record.extraction_status, ExtractionStatus::Pending);

        record.start_processing();
        assert_eq!(record.extraction_status, ExtractionStatus::Processing);

        record.fail("boom");
        assert_eq!(record.extraction_status, ExtractionStatus::Failed);
        assert_eq!(record.extraction_error.as_deref(), Some("boom"));

        record.complete(1200);
        assert_eq!(record.extraction_status, ExtractionStatus::Completed);
        assert!(record.extraction_error.is_none());
        assert_eq!(record.processing_time_ms, Some(1200));
    }

    #[test]
    fn test_step_vocabulary_serialization() {
        assert_eq!(
            serde_json::to_string(&PipelineStep::PerplexityValidation).unwrap(),
            "\"perplexity_validation\""
        );
        assert_eq!(
            serde_json::to_string(&PipelineStep::GpsExtraction).unwrap(),
            "\"gps_extraction\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(
            serde_json::to_string(&ExtractionStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(PipelineStep::VisionAnalysis.to_string(), "vision_analysis");
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut record = ExtractionRecord::new(7, &stored_image());
        record.company.company_name = Some("Rossi Costruzioni Srl".to_string());
        record.photo.gps_location_city = Some("Milano".to_string());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["company_name"], "Rossi Costruzioni Srl");
        assert_eq!(json["gps_location_city"], "Milano");
        assert_eq!(json["extraction_status"], "pending");
        assert_eq!(json["perplexity_enriched"], false);
    }

    #[test]
    fn test_company_size_labels() {
        assert_eq!(CompanySize::from_label("Piccola"), Some(CompanySize::Small));
        assert_eq!(CompanySize::from_label("media"), Some(CompanySize::Medium));
        assert_eq!(CompanySize::from_label("GRANDE"), Some(CompanySize::Large));
        assert_eq!(CompanySize::from_label("micro"), Some(CompanySize::Micro));
        assert_eq!(CompanySize::from_label("enorme"), None);
    }

    #[test]
    fn test_apply_corrections_keeps_missing_fields() {
        let mut company = CompanyFields {
            company_name: Some("Rossi Costr.".to_string()),
            city: Some("Vicenza".to_string()),
            ..Default::default()
        };
        let corrections = CompanyFields {
            company_name: Some("Rossi Costruzioni Srl".to_string()),
            vat_number: Some("12345678901".to_string()),
            ..Default::default()
        };

        let changed = company.apply_corrections(&corrections);

        assert_eq!(changed, vec!["company_name", "vat_number"]);
        assert_eq!(company.company_name.as_deref(), Some("Rossi Costruzioni Srl"));
        assert_eq!(company.city.as_deref(), Some("Vicenza"));
    }
}
