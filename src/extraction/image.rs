use crate::storage::mime_type_for_extension;

use base64::{engine::general_purpose, Engine as _};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error reading image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid image format: {0}")]
    InvalidImage(String),
}

/// An image ready to be sent inline to a vision endpoint.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub media_type: &'static str,
    pub base64_data: String,
    pub size: usize,
}

pub async fn read_and_encode_image<P: AsRef<Path>>(image_path: P) -> Result<EncodedImage, ImageError> {
    let path = image_path.as_ref();

    if !path.exists() {
        return Err(ImageError::InvalidImage(format!(
            "Image file not found: {path:?}"
        )));
    }

    let image_bytes = tokio::fs::read(path).await?;
    validate_image_format(path, &image_bytes)?;

    Ok(EncodedImage {
        media_type: media_type_for(path)?,
        base64_data: general_purpose::STANDARD.encode(&image_bytes),
        size: image_bytes.len(),
    })
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Checks the extension against the file's magic bytes.
pub fn validate_image_format<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ImageError> {
    let extension = extension_of(path.as_ref());

    if mime_type_for_extension(&extension).is_none() {
        return Err(ImageError::InvalidImage(format!(
            "Unsupported image extension: {extension}"
        )));
    }

    if bytes.len() < 12 {
        return Err(ImageError::InvalidImage("Image file too small".into()));
    }

    let is_valid = match extension.as_str() {
        "jpg" | "jpeg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "png" => bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
        "gif" => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
        "bmp" => bytes.starts_with(b"BM"),
        "webp" => bytes.starts_with(b"RIFF") && bytes[8..12] == *b"WEBP",
        _ => false,
    };

    if !is_valid {
        return Err(ImageError::InvalidImage(format!(
            "Invalid {extension} file format"
        )));
    }

    Ok(())
}

pub fn media_type_for<P: AsRef<Path>>(path: P) -> Result<&'static str, ImageError> {
    let extension = extension_of(path.as_ref());

    mime_type_for_extension(&extension).ok_or_else(|| {
        ImageError::InvalidImage(format!("Unknown MIME type for extension: {extension}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const JPEG_HEADER: [u8; 12] = [
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01,
    ];

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for("cartello.JPG").unwrap(), "image/jpeg");
        assert_eq!(media_type_for("cartello.png").unwrap(), "image/png");
        assert_eq!(media_type_for("cartello.webp").unwrap(), "image/webp");
        assert!(media_type_for("cartello.txt").is_err());
    }

    #[test]
    fn test_validate_image_format() {
        assert!(validate_image_format("a.jpg", &JPEG_HEADER).is_ok());
        assert!(validate_image_format("a.png", &JPEG_HEADER).is_err());
        assert!(validate_image_format("a.jpg", &[0u8; 12]).is_err());
        assert!(validate_image_format("a.jpg", &[0xFF, 0xD8, 0xFF]).is_err());

        let webp = *b"RIFF\x24\x00\x00\x00WEBPVP8 ";
        assert!(validate_image_format("a.webp", &webp).is_ok());
        assert!(validate_image_format("a.heic", &webp).is_err());
    }

    #[tokio::test]
    async fn test_read_and_encode_image() {
        let mut temp_file = NamedTempFile::with_suffix(".jpg").unwrap();
        temp_file.write_all(&JPEG_HEADER).unwrap();

        let encoded = read_and_encode_image(temp_file.path()).await.unwrap();
        assert_eq!(encoded.media_type, "image/jpeg");
        assert_eq!(encoded.size, 12);
        assert_eq!(
            general_purpose::STANDARD.decode(&encoded.base64_data).unwrap(),
            JPEG_HEADER
        );
    }

    #[tokio::test]
    async fn test_read_missing_image() {
        let result = read_and_encode_image("/nonexistent/cartello.jpg").await;
        assert!(matches!(result, Err(ImageError::InvalidImage(_))));
    }
}
