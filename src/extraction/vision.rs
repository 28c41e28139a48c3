use super::client::{build_http_client, ensure_success, read_json, ClientError};
use super::image::read_and_encode_image;
use super::json::extract_json_object;
use super::normalize::{normalize_extraction, ValidationError};
use crate::models::{ApiService, ApiUsage, ExtractedSite};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 2048;

/// Signboard labels that name the company actually doing the work.
pub const EXECUTING_COMPANY_LABELS: [&str; 6] = [
    "IMPRESA ESECUTRICE",
    "IMPRESA COSTRUTTRICE",
    "DITTA ESECUTRICE",
    "IMPRESA APPALTATRICE",
    "ESECUTORE DEI LAVORI",
    "IMPRESA AFFIDATARIA",
];

/// Roles that also appear on signboards but must not be mistaken for the executing company.
pub const IGNORED_ROLES: [&str; 4] = [
    "COMMITTENTE",
    "DIRETTORE DEI LAVORI",
    "RESPONSABILE DELLA SICUREZZA",
    "PROGETTISTA",
];

/// The normalized record plus the calls it took to produce it.
#[derive(Debug, Clone)]
pub struct VisionExtraction {
    pub site: ExtractedSite,
    pub rejections: Vec<ValidationError>,
    pub usage: Vec<ApiUsage>,
}

#[async_trait]
pub trait VisionExtractor: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn extract(&self, image_path: &Path) -> Result<VisionExtraction, ClientError>;
}

/// Shared instructions for every back-end: who to look for and the JSON shape to answer with.
pub fn extraction_instructions() -> String {
    let labels = EXECUTING_COMPANY_LABELS
        .iter()
        .map(|label| format!("- \"{label}\""))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are reading an Italian construction-site signboard (cartello di cantiere).\n\n\
        Identify the EXECUTING company only. It is introduced by labels such as:\n{labels}\n\n\
        Ignore the {ignored} and any other party named on the board.\n\n\
        Answer with exactly one JSON object using these keys, null when a value is not visible:\n\
        {{\n  \"raw_text\": \"all text read on the board\",\n  \"company_name\": \"executing company name\",\n  \
        \"legal_name\": \"full legal name if different\",\n  \"vat_number\": \"11-digit partita IVA, digits only\",\n  \
        \"tax_code\": \"codice fiscale\",\n  \"phone_number\": \"landline\",\n  \"mobile_number\": \"mobile\",\n  \
        \"email\": \"email\",\n  \"website\": \"website\",\n  \"address\": \"street address\",\n  \"city\": \"city\",\n  \
        \"province\": \"two-letter province code, e.g. MI\",\n  \"postal_code\": \"CAP\",\n  \
        \"construction_type\": \"kind of works\",\n  \"construction_description\": \"description of the works\",\n  \
        \"project_name\": \"project name\",\n  \"project_amount\": 0,\n  \"confidence_score\": 0.95\n}}\n\n\
        project_amount is a number in euros. confidence_score is between 0 and 1 and reflects legibility.\n\
        Reply with the JSON only.",
        ignored = IGNORED_ROLES.join(", ")
    )
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Value>,
}

/// Reads the signboard directly with a multimodal model.
#[derive(Debug, Clone)]
pub struct AnthropicVisionClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicVisionClient {
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
}

#[async_trait]
impl VisionExtractor for AnthropicVisionClient {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    async fn extract(&self, image_path: &Path) -> Result<VisionExtraction, ClientError> {
        let service = ApiService::Anthropic;
        let image = read_and_encode_image(image_path).await?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            messages: vec![json!({
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": image.base64_data,
                        }
                    },
                    { "type": "text", "text": extraction_instructions() }
                ]
            })],
        };

        debug!(
            "Sending {} byte image to {} ({})",
            image.size, self.api_url, self.model
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(ClientError::transport(service))?;

        let body = read_json(service, ensure_success(service, response).await?).await?;
        let (text, usage) = parse_messages_response(&body)?;
        debug!("Vision response received: {} chars", text.len());

        let map = extract_json_object(&text).map_err(|e| ClientError::parse(service, e))?;
        let normalized = normalize_extraction(&map);

        Ok(VisionExtraction {
            site: normalized.value,
            rejections: normalized.rejections,
            usage: vec![usage],
        })
    }
}

fn parse_messages_response(body: &Value) -> Result<(String, ApiUsage), ClientError> {
    let service = ApiService::Anthropic;

    let text = body["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(ClientError::shape(service, "response has no text content"));
    }

    let usage = ApiUsage::new(
        service,
        body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    )
    .with_metadata(json!({ "model": body["model"] }));

    Ok((text, usage))
}
