pub mod client;
pub mod enrichment;
pub mod exif;
pub mod geocoding;
pub mod image;
pub mod json;
pub mod metadata;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod vision;

pub use client::ClientError;
pub use enrichment::{CompanyEnricher, CompanyQuery, Enrichment, PerplexityClient, VatLookup, VatStatus};
pub use geocoding::{GeoLocation, GeocodingError, NominatimClient, ReverseGeocoder};
pub use json::ParseError;
pub use metadata::{MetadataError, MetadataExtractor, MetadataSource, PhotoMetadata};
pub use normalize::ValidationError;
pub use ocr::GoogleOcrClient;
pub use pipeline::{backfill_from_location, ExtractionPipeline, PipelineError, PipelineSettings, StepOutcome};
pub use vision::{AnthropicVisionClient, VisionExtraction, VisionExtractor};
