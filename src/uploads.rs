//! Local storage for uploaded crop photos, served back under `/uploads`.

use std::path::PathBuf;

use crate::clients::ImageUpload;

#[derive(Debug, thiserror::Error)]
#[error("failed to store image {path}: {source}")]
pub struct ImageStoreError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub public_uri: String,
}

#[async_trait::async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, image: &ImageUpload) -> Result<StoredImage, ImageStoreError>;
}

pub struct LocalImageStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ImageStore for LocalImageStore {
    #[tracing::instrument(
        name = "uploads.save",
        skip(self, image),
        fields(upload.bytes = image.bytes.len(), upload.file)
    )]
    async fn save(&self, image: &ImageUpload) -> Result<StoredImage, ImageStoreError> {
        let file_name = match extension_of(&image.file_name) {
            Some(ext) => format!("{}.{ext}", uuid::Uuid::new_v4().simple()),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let path = self.root.join(&file_name);
        tracing::Span::current().record("upload.file", file_name.as_str());

        let io_err = |source| ImageStoreError {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.root).await.map_err(io_err)?;
        tokio::fs::write(&path, &image.bytes).await.map_err(io_err)?;

        Ok(StoredImage {
            public_uri: format!("{}/uploads/{file_name}", self.public_base_url),
            path,
        })
    }
}

/// Lowercased extension of the client's file name, if it is short and
/// alphanumeric. Anything else is dropped so names stay path-safe.
fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
