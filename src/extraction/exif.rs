use chrono::NaiveDateTime;
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("Cannot read photo: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt EXIF block: {0}")]
    Parsing(#[from] exif::Error),
    #[error("Malformed GPS tag: {0}")]
    InvalidGpsFormat(String),
    #[error("DateTimeOriginal {0:?} is not YYYY:MM:DD HH:MM:SS")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// The subset of EXIF tags the metadata step cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifData {
    pub gps: Option<GpsPosition>,
    pub datetime_original: Option<NaiveDateTime>,
    pub make: Option<String>,
    pub model: Option<String>,
}

impl ExifData {
    pub fn is_empty(&self) -> bool {
        self.gps.is_none()
            && self.datetime_original.is_none()
            && self.make.is_none()
            && self.model.is_none()
    }
}

/// Reads EXIF tags from `image_path`.
///
/// Returns `Ok(None)` when the container carries no EXIF block at all. A malformed
/// tag only drops its own field.
pub fn extract_exif_metadata<P: AsRef<Path>>(image_path: P) -> Result<Option<ExifData>, ExifError> {
    let file = File::open(&image_path)?;
    let mut reader = BufReader::new(&file);

    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(ExifData {
        gps: tolerate(extract_gps_position(&exif)),
        datetime_original: tolerate(extract_datetime(&exif, Tag::DateTimeOriginal)),
        make: ascii_field(&exif, Tag::Make),
        model: ascii_field(&exif, Tag::Model),
    }))
}

fn tolerate<T>(field: Result<Option<T>, ExifError>) -> Option<T> {
    field.unwrap_or_else(|e| {
        warn!("Skipping EXIF field: {}", e);
        None
    })
}

fn extract_gps_position(exif: &exif::Exif) -> Result<Option<GpsPosition>, ExifError> {
    let latitude = signed_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?;
    let longitude = signed_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?;

    Ok(latitude.zip(longitude).map(|(latitude, longitude)| GpsPosition {
        latitude,
        longitude,
        altitude: extract_altitude(exif),
    }))
}

/// One GPS axis in signed decimal degrees; `None` when either tag is missing.
fn signed_coordinate(
    exif: &exif::Exif,
    value_tag: Tag,
    ref_tag: Tag,
    negative_ref: &str,
) -> Result<Option<f64>, ExifError> {
    let (Some(value), Some(reference)) = (
        exif.get_field(value_tag, In::PRIMARY),
        exif.get_field(ref_tag, In::PRIMARY),
    ) else {
        return Ok(None);
    };

    let degrees = degrees_from_rationals(&value.value)
        .ok_or_else(|| ExifError::InvalidGpsFormat(format!("{value_tag} is not three rationals")))?;
    let reference = ascii_text(&reference.value)
        .ok_or_else(|| ExifError::InvalidGpsFormat(format!("{ref_tag} is empty")))?;

    Ok(Some(if reference == negative_ref { -degrees } else { degrees }))
}

fn extract_altitude(exif: &exif::Exif) -> Option<f64> {
    let field = exif.get_field(Tag::GPSAltitude, In::PRIMARY)?;
    let meters = match &field.value {
        Value::Rational(rationals) => rationals.first()?.to_f64(),
        _ => return None,
    };

    // Reference byte 1 means below sea level.
    let below_sea_level = matches!(
        exif.get_field(Tag::GPSAltitudeRef, In::PRIMARY).map(|f| &f.value),
        Some(Value::Byte(bytes)) if bytes.first() == Some(&1)
    );

    Some(if below_sea_level { -meters } else { meters })
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|field| ascii_text(&field.value))
}

fn ascii_text(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(ascii_values) => {
            let first = ascii_values.first()?;
            let text = String::from_utf8_lossy(first);
            let text = text.trim_end_matches('\0').trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

/// Degrees, minutes and seconds folded into decimal degrees.
fn degrees_from_rationals(value: &Value) -> Option<f64> {
    match value {
        Value::Rational(parts) if parts.len() == 3 => {
            Some(parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0)
        }
        _ => None,
    }
}

fn extract_datetime(exif: &exif::Exif, tag: Tag) -> Result<Option<NaiveDateTime>, ExifError> {
    let Some(field) = exif.get_field(tag, In::PRIMARY) else {
        return Ok(None);
    };

    match ascii_text(&field.value) {
        Some(datetime_str) => parse_exif_datetime(&datetime_str).map(Some),
        None => Ok(None),
    }
}

/// EXIF datetime format is "YYYY:MM:DD HH:MM:SS"
pub fn parse_exif_datetime(datetime_str: &str) -> Result<NaiveDateTime, ExifError> {
    NaiveDateTime::parse_from_str(datetime_str, "%Y:%m:%d %H:%M:%S")
        .map_err(|_| ExifError::InvalidTimestamp(datetime_str.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_degrees_from_rationals() {
        // 45°27'51.13" N is central Milan
        let dms = Value::Rational(vec![
            exif::Rational { num: 45, denom: 1 },
            exif::Rational { num: 27, denom: 1 },
            exif::Rational { num: 5113, denom: 100 },
        ]);
        let decimal = degrees_from_rationals(&dms).unwrap();
        assert!((decimal - 45.4642028).abs() < 0.000001);

        let short = Value::Rational(vec![exif::Rational { num: 45, denom: 1 }]);
        assert_eq!(degrees_from_rationals(&short), None);
        assert_eq!(degrees_from_rationals(&Value::Byte(vec![1])), None);
    }

    #[test]
    fn test_ascii_text_trims_nul_padding() {
        let value = Value::Ascii(vec![b"Canon\0\0".to_vec()]);
        assert_eq!(ascii_text(&value).as_deref(), Some("Canon"));

        let blank = Value::Ascii(vec![b"\0".to_vec()]);
        assert_eq!(ascii_text(&blank), None);
    }

    #[test]
    fn test_parse_exif_datetime() {
        let parsed = parse_exif_datetime("2024:05:17 09:41:05").unwrap();
        assert_eq!(
            parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-05-17 09:41:05"
        );

        assert!(matches!(
            parse_exif_datetime("17/05/2024"),
            Err(ExifError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_tolerate_drops_only_the_bad_field() {
        assert_eq!(tolerate::<f64>(Ok(Some(1.5))), Some(1.5));
        assert_eq!(
            tolerate::<NaiveDateTime>(Err(ExifError::InvalidTimestamp("0000:00:00 00:00:00".into()))),
            None
        );
    }

    #[test]
    fn test_extract_exif_metadata_missing_file() {
        let result = extract_exif_metadata("nonexistent.jpg");
        assert!(matches!(result.unwrap_err(), ExifError::Io(_)));
    }

    #[test]
    fn test_extract_exif_metadata_without_exif_block() {
        // A bare JPEG SOI/EOI pair carries no APP1 segment.
        let mut file = NamedTempFile::with_suffix(".jpg").unwrap();
        file.write_all(&[0xFF, 0xD8, 0xFF, 0xD9]).unwrap();

        let result = extract_exif_metadata(file.path());
        assert!(matches!(result, Ok(None) | Err(ExifError::Parsing(_))));
    }
}
