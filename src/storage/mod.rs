//! Blob storage for ingested pages
//! Uses Apache Arrow object_store crate

use crate::config::{StorageConfig, StorageProvider};
use crate::ingest::codec::{CONTENT_ENCODING, CONTENT_TYPE};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{
    Attribute, Attributes, ObjectStore, PutOptions, PutPayload, path::Path as StoragePath,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend setup failed: {0}")]
    Setup(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
    /// Whether the backend accepts object attributes (content type/encoding)
    attributes: bool,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self {
            store,
            bucket,
            attributes: true,
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "ingestbox-local".to_string())
    }

    /// Build the backend selected by configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Memory => Ok(Self {
                bucket: config.bucket.clone(),
                ..Self::in_memory()
            }),
            StorageProvider::Local => {
                std::fs::create_dir_all(&config.local_root)?;
                let store = LocalFileSystem::new_with_prefix(&config.local_root)?;
                Ok(Self {
                    store: Arc::new(store),
                    bucket: config.bucket.clone(),
                    // LocalFileSystem rejects attributes
                    attributes: false,
                })
            }
            StorageProvider::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let (Some(access_key), Some(secret_key)) =
                    (&config.access_key, &config.secret_key)
                {
                    builder = builder
                        .with_access_key_id(access_key)
                        .with_secret_access_key(secret_key);
                }

                let store = builder
                    .build()
                    .map_err(|e| StorageError::Setup(e.to_string()))?;
                Ok(Self::new(Arc::new(store), config.bucket.clone()))
            }
        }
    }

    /// Write a gzip JSON page, replacing any existing object at `key`
    pub async fn put_page(&self, key: &str, data: Vec<u8>) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let size = data.len();

        let mut options = PutOptions::default();
        if self.attributes {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, CONTENT_TYPE.into());
            attributes.insert(Attribute::ContentEncoding, CONTENT_ENCODING.into());
            options.attributes = attributes;
        }

        let put_result = self
            .store
            .put_opts(&path, PutPayload::from(data), options)
            .await?;

        tracing::info!(key, size, bucket = %self.bucket, "Uploaded to storage");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag,
            size,
        })
    }

    /// Download from storage
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = StoragePath::from(key);

        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => other.into(),
        })?;

        let bytes = result.bytes().await?;

        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");

        Ok(bytes.to_vec())
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of the objects directly under a prefix
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = StoragePath::from(prefix);
        let listing = self.store.list_with_delimiter(Some(&prefix)).await?;

        Ok(listing
            .objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }
}
