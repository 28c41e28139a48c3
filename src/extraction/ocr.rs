use super::client::{build_http_client, ensure_success, read_json, ClientError};
use super::image::read_and_encode_image;
use super::json::extract_json_object;
use super::normalize::normalize_extraction;
use super::vision::{extraction_instructions, VisionExtraction, VisionExtractor};
use crate::models::{ApiService, ApiUsage};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const GEMINI_TEMPERATURE: f64 = 0.1;
const GEMINI_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Two-stage reader: Cloud Vision transcribes the board, Gemini structures the transcript.
#[derive(Debug, Clone)]
pub struct GoogleOcrClient {
    client: Client,
    api_key: String,
    vision_url: String,
    gemini_url: String,
}

impl GoogleOcrClient {
    pub fn new(
        vision_url: String,
        gemini_url: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            vision_url,
            gemini_url,
        })
    }

    async fn detect_text(&self, image_path: &Path) -> Result<(String, ApiUsage), ClientError> {
        let service = ApiService::GoogleVision;
        let image = read_and_encode_image(image_path).await?;

        let request = json!({
            "requests": [{
                "image": { "content": image.base64_data },
                "features": [{ "type": "TEXT_DETECTION", "maxResults": 1 }],
                "imageContext": { "languageHints": ["it", "en"] }
            }]
        });

        let response = self
            .client
            .post(&self.vision_url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(ClientError::transport(service))?;

        let body = read_json(service, ensure_success(service, response).await?).await?;
        parse_annotate_response(&body)
    }

    async fn interpret(&self, ocr_text: &str) -> Result<(String, ApiUsage), ClientError> {
        let service = ApiService::Gemini;
        let prompt = format!(
            "{}\n\nThe board text below was transcribed by OCR and may contain reading errors.\n\n\
            OCR TEXT:\n{ocr_text}",
            extraction_instructions()
        );

        let request = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": GEMINI_TEMPERATURE,
                "maxOutputTokens": GEMINI_MAX_OUTPUT_TOKENS
            }
        });

        let response = self
            .client
            .post(&self.gemini_url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(ClientError::transport(service))?;

        let body = read_json(service, ensure_success(service, response).await?).await?;
        parse_generate_response(&body)
    }
}

#[async_trait]
impl VisionExtractor for GoogleOcrClient {
    fn provider(&self) -> &'static str {
        "google"
    }

    async fn extract(&self, image_path: &Path) -> Result<VisionExtraction, ClientError> {
        let (ocr_text, ocr_usage) = self.detect_text(image_path).await?;
        info!("OCR extracted {} characters", ocr_text.len());

        let (answer, gemini_usage) = self.interpret(&ocr_text).await?;
        debug!("Gemini response received: {} chars", answer.len());

        let map = extract_json_object(&answer).map_err(|e| ClientError::parse(ApiService::Gemini, e))?;
        let mut normalized = normalize_extraction(&map);
        if normalized.value.raw_text.is_none() {
            normalized.value.raw_text = Some(ocr_text);
        }

        Ok(VisionExtraction {
            site: normalized.value,
            rejections: normalized.rejections,
            usage: vec![ocr_usage, gemini_usage],
        })
    }
}

fn parse_annotate_response(body: &Value) -> Result<(String, ApiUsage), ClientError> {
    let service = ApiService::GoogleVision;
    let first = &body["responses"][0];

    if let Some(message) = first["error"]["message"].as_str() {
        return Err(ClientError::Api {
            service,
            status: 200,
            message: message.to_string(),
        });
    }

    let annotations = first["textAnnotations"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let text = annotations
        .first()
        .and_then(|annotation| annotation["description"].as_str())
        .map(str::trim)
        .unwrap_or("");

    if text.is_empty() {
        return Err(ClientError::shape(service, "no text detected in image"));
    }

    let usage = ApiUsage::new(service, 0, 0).with_metadata(json!({
        "text_length": text.len(),
        "annotations_count": annotations.len(),
    }));

    Ok((text.to_string(), usage))
}

fn parse_generate_response(body: &Value) -> Result<(String, ApiUsage), ClientError> {
    let service = ApiService::Gemini;

    let Some(candidate) = body["candidates"].as_array().and_then(|c| c.first()) else {
        return Err(ClientError::shape(service, "response has no candidates"));
    };

    let text = candidate["content"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(ClientError::shape(service, "candidate has no text parts"));
    }

    let metadata = &body["usageMetadata"];
    let usage = ApiUsage::new(
        service,
        metadata["promptTokenCount"].as_u64().unwrap_or(0),
        metadata["candidatesTokenCount"].as_u64().unwrap_or(0),
    )
    .with_metadata(json!({ "finish_reason": candidate["finishReason"] }));

    Ok((text, usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotate_response() {
        let body = json!({
            "responses": [{
                "textAnnotations": [
                    {"description": "IMPRESA ESECUTRICE\nROSSI COSTRUZIONI SRL\n"},
                    {"description": "IMPRESA"}
                ]
            }]
        });

        let (text, usage) = parse_annotate_response(&body).unwrap();
        assert_eq!(text, "IMPRESA ESECUTRICE\nROSSI COSTRUZIONI SRL");
        assert_eq!(usage.service, ApiService::GoogleVision);
        assert_eq!(usage.metadata["annotations_count"], 2);
    }

    #[test]
    fn test_annotate_without_text_is_error() {
        let empty = json!({ "responses": [{}] });
        assert!(matches!(
            parse_annotate_response(&empty),
            Err(ClientError::Parse { .. })
        ));

        let failed = json!({ "responses": [{ "error": { "message": "Bad image data." } }] });
        assert!(matches!(
            parse_annotate_response(&failed),
            Err(ClientError::Api { .. })
        ));
    }

    #[test]
    fn test_parse_generate_response() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{"text": "```json\n{\"company_name\""}, {"text": ": \"Rossi\"}\n```"}] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 812, "candidatesTokenCount": 230 }
        });

        let (text, usage) = parse_generate_response(&body).unwrap();
        assert_eq!(text, "```json\n{\"company_name\": \"Rossi\"}\n```");
        assert_eq!(usage.tokens_input, 812);
        assert_eq!(usage.tokens_output, 230);
    }

    #[test]
    fn test_generate_without_candidates_is_parse_error() {
        assert!(matches!(
            parse_generate_response(&json!({ "candidates": [] })),
            Err(ClientError::Parse { .. })
        ));
        assert!(matches!(
            parse_generate_response(&json!({ "candidates": [{ "content": {} }] })),
            Err(ClientError::Parse { .. })
        ));
    }
}
