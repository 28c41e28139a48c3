use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IMAGE_BASE_DIR scheme {0:?} is not supported, use a path or file://")]
    UnsupportedScheme(String),
    #[error("file:// base directory must be absolute: {0}")]
    RelativeFileUri(String),
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Unsupported image type: {0:?}")]
    UnsupportedType(String),
    #[error("Image store IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the image store lives: a plain directory or a `file://` URI.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageUri {
    LocalPath(PathBuf),
    FileUri(PathBuf),
}

impl StorageUri {
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        match uri.split_once("://") {
            Some(("file", path)) if path.starts_with('/') => Ok(StorageUri::FileUri(path.into())),
            Some(("file", _)) => Err(StorageError::RelativeFileUri(uri.to_string())),
            Some((scheme, _)) => Err(StorageError::UnsupportedScheme(scheme.to_string())),
            None => Ok(StorageUri::LocalPath(uri.into())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            StorageUri::LocalPath(path) | StorageUri::FileUri(path) => path,
        }
    }

    pub fn exists(&self) -> bool {
        self.path().is_dir()
    }

    /// Absolute names are kept; anything else lands under the base directory.
    pub fn resolve(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path().join(name)
    }
}

/// A signboard photo written into the image store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredImage {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
}

/// Write-once blob storage for uploaded photos, rooted at the configured base directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: StorageUri,
}

impl ImageStore {
    pub fn new(root: StorageUri) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &StorageUri {
        &self.root
    }

    /// Copies `source` into the store under a freshly generated filename.
    pub async fn store<P: AsRef<Path>>(&self, source: P) -> Result<StoredImage, StorageError> {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(StorageError::ImageNotFound(source.display().to_string()));
        }

        let extension = extension_of(source);
        let mime_type = mime_type_for_extension(&extension)
            .ok_or_else(|| StorageError::UnsupportedType(extension.clone()))?;

        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let destination = self.root.resolve(&filename);

        tokio::fs::create_dir_all(self.root.path()).await?;
        let size = tokio::fs::copy(source, &destination).await?;

        debug!(
            "Stored image {} as {} ({} bytes)",
            source.display(),
            destination.display(),
            size
        );

        Ok(StoredImage {
            path: destination.display().to_string(),
            filename,
            size,
            mime_type: mime_type.to_string(),
        })
    }

    pub async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let resolved = self.root.resolve(path);
        tokio::fs::remove_file(&resolved).await?;
        debug!("Removed stored image {}", resolved.display());
        Ok(())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Photo types accepted end to end. The vision step checks against this same table.
pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
