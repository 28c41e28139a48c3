use super::client::{build_http_client, ensure_success, read_json, ClientError};
use super::json::extract_json_object;
use super::normalize::{normalize_enrichment, normalize_vat_number, text_field, ValidationError};
use crate::models::{ApiService, ApiUsage, CompanyEnrichment};

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

const ENRICH_MAX_TOKENS: u32 = 2000;
const ENRICH_TEMPERATURE: f64 = 0.2;
const VAT_LOOKUP_MAX_TOKENS: u32 = 1000;
const VAT_LOOKUP_TEMPERATURE: f64 = 0.1;

/// Identifiers used to find the company on the web.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyQuery {
    pub company_name: String,
    pub vat_number: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    pub data: CompanyEnrichment,
    pub rejections: Vec<ValidationError>,
    pub usage: ApiUsage,
}

#[async_trait]
pub trait CompanyEnricher: Send + Sync {
    async fn enrich(&self, query: &CompanyQuery) -> Result<Enrichment, ClientError>;
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VatStatus {
    Active,
    Inactive,
}

/// Registry facts about a partita IVA.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct VatLookup {
    pub found: bool,
    pub vat_number: Option<String>,
    pub legal_name: Option<String>,
    pub legal_address: Option<String>,
    pub status: Option<VatStatus>,
    pub ateco_code: Option<String>,
    pub ateco_description: Option<String>,
    pub start_date: Option<String>,
    pub error: Option<String>,
    #[serde(skip)]
    pub usage: Option<ApiUsage>,
}

impl VatLookup {
    fn not_found(error: Option<String>) -> Self {
        Self {
            error,
            ..Default::default()
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        if !map.get("found").and_then(Value::as_bool).unwrap_or(false) {
            return Self::not_found(None);
        }

        let status = text_field(map, "status").and_then(|status| {
            match status.to_lowercase().as_str() {
                "active" | "attiva" => Some(VatStatus::Active),
                "inactive" | "cessata" | "inattiva" => Some(VatStatus::Inactive),
                _ => None,
            }
        });

        Self {
            found: true,
            vat_number: text_field(map, "vat_number").and_then(|v| normalize_vat_number(&v).ok()),
            legal_name: text_field(map, "legal_name"),
            legal_address: text_field(map, "legal_address"),
            status,
            ateco_code: text_field(map, "ateco_code"),
            ateco_description: text_field(map, "ateco_description"),
            start_date: text_field(map, "start_date"),
            error: None,
            usage: None,
        }
    }
}

/// Web-search-augmented lookups against the Perplexity chat completions API.
#[derive(Debug, Clone)]
pub struct PerplexityClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl PerplexityClient {
    pub fn new(
        api_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_url,
            api_key,
            model,
        })
    }

    async fn complete(&self, request: Value) -> Result<(String, ApiUsage), ClientError> {
        let service = ApiService::Perplexity;

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(ClientError::transport(service))?;

        let body = read_json(service, ensure_success(service, response).await?).await?;
        parse_chat_response(&body, &self.model)
    }

    /// Looks a VAT number up on its own. Failures are reported in the result, never raised.
    pub async fn lookup_vat_number(&self, vat_number: &str) -> VatLookup {
        let request = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": "You research Italian VAT numbers (partita IVA) in public business registries." },
                { "role": "user", "content": vat_lookup_prompt(vat_number) }
            ],
            "max_tokens": VAT_LOOKUP_MAX_TOKENS,
            "temperature": VAT_LOOKUP_TEMPERATURE,
        });

        let (text, usage) = match self.complete(request).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("VAT lookup failed: {}", e);
                return VatLookup::not_found(Some(e.to_string()));
            }
        };

        match extract_json_object(&text) {
            Ok(map) => VatLookup {
                usage: Some(usage),
                ..VatLookup::from_map(&map)
            },
            Err(e) => VatLookup {
                usage: Some(usage),
                ..VatLookup::not_found(Some(e.to_string()))
            },
        }
    }
}

#[async_trait]
impl CompanyEnricher for PerplexityClient {
    async fn enrich(&self, query: &CompanyQuery) -> Result<Enrichment, ClientError> {
        debug!("Looking up company {:?}", query.company_name);

        let request = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": "You research Italian construction companies and answer in JSON only." },
                { "role": "user", "content": enrichment_prompt(query) }
            ],
            "max_tokens": ENRICH_MAX_TOKENS,
            "temperature": ENRICH_TEMPERATURE,
            "top_p": 0.9,
            "search_domain_filter": ["it"],
            "return_images": false,
            "return_related_questions": false,
        });

        let (text, usage) = self.complete(request).await?;
        let map = extract_json_object(&text)
            .map_err(|e| ClientError::parse(ApiService::Perplexity, e))?;
        let normalized = normalize_enrichment(&map, Utc::now().year());

        Ok(Enrichment {
            data: normalized.value,
            rejections: normalized.rejections,
            usage,
        })
    }
}

pub fn enrichment_prompt(query: &CompanyQuery) -> String {
    let mut subject = format!("the construction company \"{}\"", query.company_name);
    if let Some(vat) = &query.vat_number {
        subject.push_str(&format!(" (partita IVA {vat})"));
    }
    if let Some(city) = &query.city {
        subject.push_str(&format!(" based in {city}"));
    }

    format!(
        "Search the web for {subject}.\n\n\
        First verify the identity data read from a site signboard: company name, legal name, VAT number, \
        tax code, phone numbers, email, website and registered address. Correct anything that is wrong or incomplete.\n\
        Then find: a short description of the business, its size (micro, small, medium, large), founding year, \
        estimated employees, specific sector, certifications (SOA, ISO, ...), other contact channels (PEC, extra phones) \
        and social media profiles.\n\n\
        Answer with one JSON object:\n\
        {{\n  \"found\": true,\n  \"description\": \"...\",\n  \"company_size\": \"micro|small|medium|large\",\n  \
        \"founded_year\": 1990,\n  \"employees\": 25,\n  \"sector\": \"...\",\n  \"certifications\": [\"SOA OG1\"],\n  \
        \"additional_contacts\": [{{\"type\": \"pec\", \"value\": \"...\"}}],\n  \
        \"social_media\": {{\"linkedin\": \"url\"}},\n  \"corrections_made\": [\"which fields you corrected\"],\n  \
        \"confidence_score\": 0.9,\n  \"corrected_data\": {{\"company_name\": \"...\", \"legal_name\": \"...\", \
        \"vat_number\": \"...\", \"tax_code\": \"...\", \"phone_number\": \"...\", \"mobile_number\": \"...\", \
        \"email\": \"...\", \"website\": \"...\", \"address\": \"...\", \"city\": \"...\", \"province\": \"...\", \
        \"postal_code\": \"...\"}}\n}}\n\n\
        Use null for anything you cannot confirm. If the company cannot be found answer {{\"found\": false}}."
    )
}

fn vat_lookup_prompt(vat_number: &str) -> String {
    format!(
        "Find registry information for the Italian VAT number {vat_number}: legal name, registered address, \
        whether it is active, ATECO code and description, and the activity start date.\n\n\
        Answer with one JSON object:\n\
        {{\n  \"found\": true,\n  \"vat_number\": \"{vat_number}\",\n  \"legal_name\": \"...\",\n  \
        \"legal_address\": \"...\",\n  \"status\": \"active|inactive\",\n  \"ateco_code\": \"...\",\n  \
        \"ateco_description\": \"...\",\n  \"start_date\": \"YYYY-MM-DD\"\n}}\n\n\
        If nothing is found answer {{\"found\": false}}."
    )
}

fn parse_chat_response(body: &Value, model: &str) -> Result<(String, ApiUsage), ClientError> {
    let service = ApiService::Perplexity;

    let Some(text) = body["choices"][0]["message"]["content"].as_str() else {
        return Err(ClientError::shape(service, "response has no message content"));
    };

    let usage = ApiUsage::new(
        service,
        body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    )
    .with_metadata(json!({ "model": model }));

    Ok((text.to_string(), usage))
}
