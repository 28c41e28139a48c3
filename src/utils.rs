use std::time::Instant;
use thiserror::Error;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude and longitude in decimal degrees.
pub type Coordinates = (f64, f64);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("latitude {0} is outside -90..=90")]
    Latitude(f64),
    #[error("longitude {0} is outside -180..=180")]
    Longitude(f64),
    #[error("(0, 0) is what cameras write without a fix")]
    NullIsland,
}

/// Great-circle distance in meters.
pub fn haversine_distance(from: Coordinates, to: Coordinates) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());

    let a = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.1}m")
    } else {
        format!("{:.2}km", meters / 1000.0)
    }
}

/// The `"lat, lon"` form stored alongside a GPS fix.
pub fn coordinates_string((lat, lon): Coordinates) -> String {
    format!("{lat}, {lon}")
}

/// Rejects out-of-range points and the (0, 0) placeholder.
pub fn validate_coordinates((lat, lon): Coordinates) -> Result<(), CoordinateError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(CoordinateError::Latitude(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(CoordinateError::Longitude(lon));
    }
    if lat == 0.0 && lon == 0.0 {
        return Err(CoordinateError::NullIsland);
    }
    Ok(())
}

/// Milliseconds elapsed since `start`, saturating.
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
