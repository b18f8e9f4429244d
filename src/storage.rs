//! Binary storage for video files and thumbnails.
//!
//! The catalog only ever holds the opaque reference returned by `store`.
//! Blobs live either under a local directory or in a GCS bucket; which one is
//! decided once at startup from configuration.

use bytes::Bytes;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid storage reference: {0}")]
    InvalidRef(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

pub trait BinaryStorage: Send + Sync {
    /// Persist `data` under `name` and return the reference to keep.
    fn store(&self, data: Bytes, name: &str) -> impl Future<Output = Result<String, StorageError>> + Send;

    fn retrieve(&self, storage_ref: &str) -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    fn delete(&self, storage_ref: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Reject references that could escape the storage root
fn check_ref(storage_ref: &str) -> Result<(), StorageError> {
    if storage_ref.is_empty()
        || storage_ref.contains("..")
        || storage_ref.contains('\0')
        || storage_ref.starts_with('/')
        || storage_ref.contains('\\')
    {
        return Err(StorageError::InvalidRef(storage_ref.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, storage_ref: &str) -> Result<PathBuf, StorageError> {
        check_ref(storage_ref)?;
        Ok(self.root.join(storage_ref))
    }
}

impl BinaryStorage for LocalDiskStorage {
    async fn store(&self, data: Bytes, name: &str) -> Result<String, StorageError> {
        let full_path = self.path_for(name)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &data).await?;
        Ok(name.to_string())
    }

    async fn retrieve(&self, storage_ref: &str) -> Result<Bytes, StorageError> {
        let full_path = self.path_for(storage_ref)?;
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, storage_ref: &str) -> Result<(), StorageError> {
        let full_path = self.path_for(storage_ref)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct GcsStorage {
    client: google_cloud_storage::client::Storage,
    bucket: String,
}

impl GcsStorage {
    /// Uses `GOOGLE_APPLICATION_CREDENTIALS` for auth.
    pub async fn connect(bucket: String) -> Result<Self, StorageError> {
        let client = google_cloud_storage::client::Storage::builder()
            .build()
            .await
            .map_err(|e| StorageError::Backend(e.into()))?;
        Ok(Self { client, bucket })
    }

    fn bucket_path(&self) -> String {
        format!("projects/_/buckets/{}", self.bucket)
    }
}

impl BinaryStorage for GcsStorage {
    async fn store(&self, data: Bytes, name: &str) -> Result<String, StorageError> {
        check_ref(name)?;
        self.client
            .write_object(&self.bucket_path(), name, data)
            .send_buffered()
            .await
            .map_err(|e| StorageError::Backend(e.into()))?;
        Ok(name.to_string())
    }

    async fn retrieve(&self, storage_ref: &str) -> Result<Bytes, StorageError> {
        check_ref(storage_ref)?;
        let mut resp = self
            .client
            .read_object(&self.bucket_path(), storage_ref)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.into()))?;

        let mut data = Vec::new();
        while let Some(chunk) = resp.next().await {
            let chunk = chunk.map_err(|e| StorageError::Backend(e.into()))?;
            data.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(data))
    }

    async fn delete(&self, storage_ref: &str) -> Result<(), StorageError> {
        check_ref(storage_ref)?;
        let client = cloud_storage::Client::default();
        client
            .object()
            .delete(&self.bucket, storage_ref)
            .await
            .map_err(|e| StorageError::Backend(e.into()))
    }
}

/// The configured backend
#[derive(Clone)]
pub enum MediaStore {
    Local(LocalDiskStorage),
    Gcs(GcsStorage),
}

impl BinaryStorage for MediaStore {
    async fn store(&self, data: Bytes, name: &str) -> Result<String, StorageError> {
        match self {
            MediaStore::Local(s) => s.store(data, name).await,
            MediaStore::Gcs(s) => s.store(data, name).await,
        }
    }

    async fn retrieve(&self, storage_ref: &str) -> Result<Bytes, StorageError> {
        match self {
            MediaStore::Local(s) => s.retrieve(storage_ref).await,
            MediaStore::Gcs(s) => s.retrieve(storage_ref).await,
        }
    }

    async fn delete(&self, storage_ref: &str) -> Result<(), StorageError> {
        match self {
            MediaStore::Local(s) => s.delete(storage_ref).await,
            MediaStore::Gcs(s) => s.delete(storage_ref).await,
        }
    }
}

/// Content type served for a stored blob, by extension
pub fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".mp4") {
        "video/mp4"
    } else if lower.ends_with(".webm") {
        "video/webm"
    } else if lower.ends_with(".mov") {
        "video/quicktime"
    } else if lower.ends_with(".mkv") {
        "video/x-matroska"
    } else if lower.ends_with(".avi") {
        "video/x-msvideo"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}
