use crate::storage::{StorageError, StorageUri};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Which vision back-end reads the signboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionProvider {
    /// Multimodal model reading the photo directly.
    Anthropic,
    /// OCR first, then a text model structures the transcript.
    Google,
}

impl FromStr for VisionProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(VisionProvider::Anthropic),
            "google" | "gemini" => Ok(VisionProvider::Google),
            other => Err(ConfigError::Validation(format!(
                "Unknown vision provider: {other} (expected anthropic or google)"
            ))),
        }
    }
}

/// How the web-search lookup is merged into the extracted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentMode {
    /// Replace identity fields with confirmed corrections, then attach extras.
    Validate,
    /// Only attach supplementary attributes.
    Enrich,
}

impl FromStr for EnrichmentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "validate" => Ok(EnrichmentMode::Validate),
            "enrich" => Ok(EnrichmentMode::Enrich),
            other => Err(ConfigError::Validation(format!(
                "Unknown enrichment mode: {other} (expected validate or enrich)"
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub image_base_dir: String,

    #[serde(default = "default_vision_provider")]
    pub vision_provider: String,

    pub anthropic_api_key: Option<String>,

    #[serde(default = "default_anthropic_api_url")]
    pub anthropic_api_url: String,

    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,

    pub google_api_key: Option<String>,

    #[serde(default = "default_google_vision_url")]
    pub google_vision_url: String,

    #[serde(default = "default_gemini_url")]
    pub gemini_url: String,

    pub perplexity_api_key: Option<String>,

    #[serde(default = "default_perplexity_api_url")]
    pub perplexity_api_url: String,

    #[serde(default = "default_perplexity_model")]
    pub perplexity_model: String,

    #[serde(default = "default_enrichment_mode")]
    pub enrichment_mode: String,

    #[serde(default = "default_validation_min_confidence")]
    pub validation_min_confidence: f64,

    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,

    #[serde(default = "default_geocoding_user_agent")]
    pub geocoding_user_agent: String,

    #[serde(default = "default_geocoding_language")]
    pub geocoding_language: String,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_max_concurrent_pipelines")]
    pub max_concurrent_pipelines: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config: Config = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(test)]
    fn from_env_no_dotenv() -> Result<Self, ConfigError> {
        let config: Config = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn get_storage_uri(&self) -> Result<StorageUri, StorageError> {
        StorageUri::parse(&self.image_base_dir)
    }

    pub fn vision_provider(&self) -> Result<VisionProvider, ConfigError> {
        self.vision_provider.parse()
    }

    pub fn enrichment_mode(&self) -> Result<EnrichmentMode, ConfigError> {
        self.enrichment_mode.parse()
    }

    /// The enrichment credential, if one is configured. Blank values count as absent.
    pub fn perplexity_key(&self) -> Option<&str> {
        non_blank(&self.perplexity_api_key)
    }

    pub fn anthropic_key(&self) -> Option<&str> {
        non_blank(&self.anthropic_api_key)
    }

    pub fn google_key(&self) -> Option<&str> {
        non_blank(&self.google_api_key)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let storage_uri = self.get_storage_uri()?;
        if !storage_uri.exists() {
            return Err(ConfigError::Validation(format!(
                "Image base directory does not exist: {}",
                self.image_base_dir
            )));
        }

        for (name, url) in [
            ("ANTHROPIC_API_URL", &self.anthropic_api_url),
            ("GOOGLE_VISION_URL", &self.google_vision_url),
            ("GEMINI_URL", &self.gemini_url),
            ("PERPLEXITY_API_URL", &self.perplexity_api_url),
            ("GEOCODING_URL", &self.geocoding_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{name} must start with http:// or https://: {url}"
                )));
            }
        }

        match self.vision_provider()? {
            VisionProvider::Anthropic if self.anthropic_key().is_none() => {
                return Err(ConfigError::Validation(
                    "ANTHROPIC_API_KEY is required for the anthropic vision provider".into(),
                ));
            }
            VisionProvider::Google if self.google_key().is_none() => {
                return Err(ConfigError::Validation(
                    "GOOGLE_API_KEY is required for the google vision provider".into(),
                ));
            }
            _ => {}
        }

        self.enrichment_mode()?;

        if !(0.0..=1.0).contains(&self.validation_min_confidence) {
            return Err(ConfigError::Validation(format!(
                "Validation min confidence must be between 0 and 1, got: {}",
                self.validation_min_confidence
            )));
        }

        if self.geocoding_user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Geocoding user agent must not be empty".into(),
            ));
        }

        if self.queue_size == 0 || self.queue_size > 10000 {
            return Err(ConfigError::Validation(format!(
                "Queue size must be between 1 and 10000, got: {}",
                self.queue_size
            )));
        }

        if self.max_concurrent_pipelines == 0 {
            return Err(ConfigError::Validation(
                "Max concurrent pipelines must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn default_vision_provider() -> String {
    "anthropic".to_string()
}

fn default_anthropic_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20240620".to_string()
}

fn default_google_vision_url() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        .to_string()
}

fn default_perplexity_api_url() -> String {
    "https://api.perplexity.ai/chat/completions".to_string()
}

fn default_perplexity_model() -> String {
    "sonar-pro".to_string()
}

fn default_enrichment_mode() -> String {
    "validate".to_string()
}

fn default_validation_min_confidence() -> f64 {
    0.6
}

fn default_geocoding_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}

fn default_geocoding_user_agent() -> String {
    "ConstructionSiteExtractor/1.0".to_string()
}

fn default_geocoding_language() -> String {
    "it".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_queue_size() -> usize {
    100
}

fn default_max_concurrent_pipelines() -> usize {
    4
}

#[cfg(test)]
pub(crate) fn test_config(image_base_dir: &str) -> Config {
    Config {
        image_base_dir: image_base_dir.to_string(),
        vision_provider: "anthropic".to_string(),
        anthropic_api_key: Some("test-key".to_string()),
        anthropic_api_url: default_anthropic_api_url(),
        anthropic_model: default_anthropic_model(),
        google_api_key: None,
        google_vision_url: default_google_vision_url(),
        gemini_url: default_gemini_url(),
        perplexity_api_key: None,
        perplexity_api_url: default_perplexity_api_url(),
        perplexity_model: default_perplexity_model(),
        enrichment_mode: "validate".to_string(),
        validation_min_confidence: 0.6,
        geocoding_url: default_geocoding_url(),
        geocoding_user_agent: default_geocoding_user_agent(),
        geocoding_language: default_geocoding_language(),
        request_timeout_seconds: 60,
        queue_size: 100,
        max_concurrent_pipelines: 4,
    }
}
