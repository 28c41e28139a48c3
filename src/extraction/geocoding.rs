use crate::utils::{format_distance, haversine_distance};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeocodingError {
    #[error("Geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Geocoding API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Geocoding returned no address for {0}")]
    NoResult(String),
}

/// Postal address components of a reverse-geocoded point.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AddressParts {
    pub road: Option<String>,
    pub house_number: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GeoLocation {
    pub display_name: Option<String>,
    pub address: AddressParts,
    pub formatted_address: String,
    pub osm_id: Option<i64>,
    pub osm_type: Option<String>,
    /// Distance in meters between the queried point and the matched place.
    pub distance_m: Option<f64>,
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<GeoLocation, GeocodingError>;
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
    #[serde(default)]
    address: NominatimAddress,
    osm_id: Option<i64>,
    osm_type: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    error: Option<String>,
}

impl NominatimResponse {
    fn place_coordinates(&self) -> Option<(f64, f64)> {
        let lat = self.lat.as_deref()?.parse().ok()?;
        let lon = self.lon.as_deref()?.parse().ok()?;
        Some((lat, lon))
    }
}

#[derive(Debug, Deserialize, Default)]
struct NominatimAddress {
    road: Option<String>,
    house_number: Option<String>,
    postcode: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    province: Option<String>,
    county: Option<String>,
    state: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

impl From<NominatimAddress> for AddressParts {
    fn from(addr: NominatimAddress) -> Self {
        AddressParts {
            road: addr.road,
            house_number: addr.house_number,
            postcode: addr.postcode,
            city: addr
                .city
                .or(addr.town)
                .or(addr.village)
                .or(addr.municipality),
            province: addr.province.or(addr.county),
            region: addr.state.or(addr.region),
            country: addr.country,
        }
    }
}

/// Reverse geocoder speaking the Nominatim `/reverse` protocol.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: Client,
    api_url: String,
    language: String,
}

impl NominatimClient {
    /// Nominatim's usage policy requires an identifying user agent on every call.
    pub fn new(
        api_url: String,
        user_agent: &str,
        language: String,
        timeout: Duration,
    ) -> Result<Self, GeocodingError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            api_url,
            language,
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimClient {
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<GeoLocation, GeocodingError> {
        debug!("Reverse geocoding {}, {}", latitude, longitude);

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
                ("zoom", "18".to_string()),
                ("accept-language", self.language.clone()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(GeocodingError::Api { status, message });
        }

        let body: NominatimResponse = response.json().await?;
        if body.error.is_some() {
            return Err(GeocodingError::NoResult(format!("{latitude}, {longitude}")));
        }

        let distance_m = body
            .place_coordinates()
            .map(|place| haversine_distance((latitude, longitude), place));
        if let Some(distance) = distance_m {
            debug!("Matched place is {} from the photo", format_distance(distance));
        }

        let address = AddressParts::from(body.address);
        Ok(GeoLocation {
            display_name: body.display_name,
            formatted_address: format_italian_address(&address),
            address,
            osm_id: body.osm_id,
            osm_type: body.osm_type,
            distance_m,
        })
    }
}

/// Formats an address the Italian way: "Via Roma, 12, 20121 Milano, (MI)".
pub fn format_italian_address(addr: &AddressParts) -> String {
    let mut parts = Vec::new();

    if let Some(road) = &addr.road {
        match &addr.house_number {
            Some(number) => parts.push(format!("{road}, {number}")),
            None => parts.push(road.clone()),
        }
    }

    let locality: Vec<&str> = [addr.postcode.as_deref(), addr.city.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !locality.is_empty() {
        parts.push(locality.join(" "));
    }

    if let Some(province) = &addr.province {
        parts.push(format!("({province})"));
    }

    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_italian_address_full() {
        let addr = AddressParts {
            road: Some("Via Roma".to_string()),
            house_number: Some("12".to_string()),
            postcode: Some("20121".to_string()),
            city: Some("Milano".to_string()),
            province: Some("MI".to_string()),
            ..Default::default()
        };

        assert_eq!(format_italian_address(&addr), "Via Roma, 12, 20121 Milano, (MI)");
    }

    #[test]
    fn test_format_italian_address_partial() {
        let addr = AddressParts {
            city: Some("Vicenza".to_string()),
            province: Some("Vicenza".to_string()),
            ..Default::default()
        };
        assert_eq!(format_italian_address(&addr), "Vicenza, (Vicenza)");

        assert_eq!(format_italian_address(&AddressParts::default()), "");
    }

    #[test]
    fn test_nominatim_address_fallbacks() {
        let raw: NominatimResponse = serde_json::from_str(
            r#"{
                "display_name": "Via Garibaldi, Bassano del Grappa, Vicenza, Veneto, Italia",
                "osm_id": 123456,
                "osm_type": "way",
                "address": {
                    "road": "Via Garibaldi",
                    "town": "Bassano del Grappa",
                    "county": "Vicenza",
                    "state": "Veneto",
                    "postcode": "36061",
                    "country": "Italia"
                }
            }"#,
        )
        .unwrap();

        let address = AddressParts::from(raw.address);
        assert_eq!(address.city.as_deref(), Some("Bassano del Grappa"));
        assert_eq!(address.province.as_deref(), Some("Vicenza"));
        assert_eq!(address.region.as_deref(), Some("Veneto"));
        assert_eq!(
            format_italian_address(&address),
            "Via Garibaldi, 36061 Bassano del Grappa, (Vicenza)"
        );
    }

    #[test]
    fn test_place_coordinates() {
        let raw: NominatimResponse = serde_json::from_str(
            r#"{"lat": "45.4640", "lon": "9.1900", "address": {"city": "Milano"}}"#,
        )
        .unwrap();
        let place = raw.place_coordinates().unwrap();
        let distance = haversine_distance((45.4642, 9.19), place);
        assert!(distance > 20.0 && distance < 25.0, "{distance}");

        let missing: NominatimResponse = serde_json::from_str(r#"{"lat": "n/a"}"#).unwrap();
        assert!(missing.place_coordinates().is_none());
    }
}
