use super::exif::{extract_exif_metadata, ExifError};
use super::geocoding::{GeoLocation, ReverseGeocoder};
use crate::models::PhotoFields;
use crate::utils::{coordinates_string, validate_coordinates};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("EXIF extraction failed: {0}")]
    Exif(#[from] ExifError),
    #[error("Metadata task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub coordinates_string: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PhotoTimestamp {
    /// Raw EXIF text, e.g. "2024:05:17 09:41:05".
    pub original: String,
    pub iso: String,
    pub formatted: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceInfo {
    pub make: Option<String>,
    pub model: Option<String>,
    pub full_name: String,
}

/// Everything the photo itself tells us about where, when and with what it was taken.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub has_metadata: bool,
    pub gps: Option<GpsFix>,
    pub location: Option<GeoLocation>,
    pub datetime: Option<PhotoTimestamp>,
    pub device: Option<DeviceInfo>,
}

impl PhotoMetadata {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn photo_fields(&self) -> PhotoFields {
        PhotoFields {
            gps_latitude: self.gps.as_ref().map(|gps| gps.latitude),
            gps_longitude: self.gps.as_ref().map(|gps| gps.longitude),
            gps_altitude: self.gps.as_ref().and_then(|gps| gps.altitude),
            gps_location_address: self
                .location
                .as_ref()
                .map(|location| location.formatted_address.clone())
                .filter(|address| !address.is_empty()),
            gps_location_city: self
                .location
                .as_ref()
                .and_then(|location| location.address.city.clone()),
            gps_location_province: self
                .location
                .as_ref()
                .and_then(|location| location.address.province.clone()),
            photo_datetime: self.datetime.as_ref().map(|dt| dt.iso.clone()),
            photo_device: self.device.as_ref().map(|device| device.full_name.clone()),
        }
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn extract(&self, image_path: &Path) -> Result<PhotoMetadata, MetadataError>;
}

/// Reads EXIF from the photo and resolves its GPS fix to a postal address.
pub struct MetadataExtractor {
    geocoder: Arc<dyn ReverseGeocoder>,
}

impl MetadataExtractor {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self { geocoder }
    }
}

#[async_trait]
impl MetadataSource for MetadataExtractor {
    async fn extract(&self, image_path: &Path) -> Result<PhotoMetadata, MetadataError> {
        let path = image_path.to_path_buf();
        let exif = tokio::task::spawn_blocking(move || extract_exif_metadata(path)).await??;

        let Some(exif) = exif.filter(|exif| !exif.is_empty()) else {
            debug!("No EXIF metadata in {}", image_path.display());
            return Ok(PhotoMetadata::empty());
        };

        let mut metadata = PhotoMetadata {
            has_metadata: true,
            ..Default::default()
        };

        if let Some(position) = exif.gps {
            let coords = (position.latitude, position.longitude);
            match validate_coordinates(coords) {
                Ok(()) => {
                    let label = coordinates_string(coords);
                    debug!("Found GPS coordinates: {}", label);
                    metadata.gps = Some(GpsFix {
                        latitude: position.latitude,
                        longitude: position.longitude,
                        altitude: position.altitude,
                        coordinates_string: label,
                    });

                    match self
                        .geocoder
                        .reverse_geocode(position.latitude, position.longitude)
                        .await
                    {
                        Ok(location) => metadata.location = Some(location),
                        Err(e) => warn!("Reverse geocoding failed: {}", e),
                    }
                }
                Err(reason) => warn!("Ignoring GPS coordinates: {}", reason),
            }
        }

        metadata.datetime = exif.datetime_original.map(photo_timestamp);
        metadata.device = device_info(exif.make, exif.model);

        Ok(metadata)
    }
}

/// EXIF carries no zone, so the capture time is read as UTC.
pub fn photo_timestamp(naive: NaiveDateTime) -> PhotoTimestamp {
    let utc = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
    PhotoTimestamp {
        original: naive.format("%Y:%m:%d %H:%M:%S").to_string(),
        iso: utc.to_rfc3339(),
        formatted: naive.format("%d/%m/%Y, %H:%M:%S").to_string(),
    }
}

pub fn device_info(make: Option<String>, model: Option<String>) -> Option<DeviceInfo> {
    if make.is_none() && model.is_none() {
        return None;
    }

    let full_name = [make.as_deref(), model.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    Some(DeviceInfo {
        make,
        model,
        full_name,
    })
}
