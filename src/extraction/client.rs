//! HTTP plumbing shared by the AI service clients.

use super::image::ImageError;
use super::json::ParseError;
use crate::models::ApiService;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("{service} request failed: {source}")]
    Transport {
        service: ApiService,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} API error (HTTP {status}): {message}")]
    Api {
        service: ApiService,
        status: u16,
        message: String,
    },
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("{service} response could not be parsed: {source}")]
    Parse {
        service: ApiService,
        #[source]
        source: ParseError,
    },
}

impl ClientError {
    pub fn transport(service: ApiService) -> impl FnOnce(reqwest::Error) -> ClientError {
        move |source| ClientError::Transport { service, source }
    }

    pub fn parse(service: ApiService, source: impl Into<ParseError>) -> ClientError {
        ClientError::Parse {
            service,
            source: source.into(),
        }
    }

    pub fn shape(service: ApiService, message: impl Into<String>) -> ClientError {
        ClientError::parse(service, ParseError::Shape(message.into()))
    }
}

pub fn build_http_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ClientError::Build)
}

/// Passes a successful response through; anything else becomes [`ClientError::Api`].
pub async fn ensure_success(service: ApiService, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        service,
        status: status.as_u16(),
        message: api_error_message(&body),
    })
}

/// Most AI services wrap failures as `{"error": {"message": ...}}`.
pub fn api_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        match &value["error"] {
            Value::Object(error) => error.get("message").and_then(Value::as_str).map(String::from),
            Value::String(message) => Some(message.clone()),
            _ => None,
        }
    });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "Unknown".to_string(),
        None => body.trim().to_string(),
    }
}

pub async fn read_json(service: ApiService, response: Response) -> Result<Value, ClientError> {
    let text = response.text().await.map_err(ClientError::transport(service))?;
    serde_json::from_str(&text).map_err(|e| ClientError::parse(service, e))
}
