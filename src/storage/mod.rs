//! Object storage for collected datasets
//! Uses Apache Arrow object_store crate

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
    ObjectMeta, RetryConfig, path::Path as StoragePath,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};
use crate::error::{PipelineError, UploadErrorClass};
use crate::format::DataFormat;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("Bucket '{bucket}' is not usable: {reason}")]
    BucketUnavailable { bucket: String, reason: String },

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Transient failures are worth retrying; everything else is final
    pub fn class(&self) -> UploadErrorClass {
        match self {
            StorageError::AlreadyExists(_)
            | StorageError::InvalidConfig(_)
            | StorageError::BucketUnavailable { .. } => UploadErrorClass::Permanent,
            StorageError::ObjectStoreError(e) => match e {
                object_store::Error::Generic { .. } | object_store::Error::JoinError { .. } => {
                    UploadErrorClass::Transient
                }
                _ => UploadErrorClass::Permanent,
            },
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::Upload {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Content type plus user metadata attached to an object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub entries: BTreeMap<String, String>,
}

impl ObjectMetadata {
    fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(content_type) = &self.content_type {
            attributes.insert(Attribute::ContentType, AttributeValue::from(content_type.clone()));
        }
        for (key, value) in &self.entries {
            attributes.insert(
                Attribute::Metadata(key.clone().into()),
                AttributeValue::from(value.clone()),
            );
        }
        attributes
    }
}

/// Returned after a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// One object found by [`StorageClient::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
    /// Guessed from the key's extension
    pub format: DataFormat,
}

impl From<ObjectMeta> for StoredObject {
    fn from(meta: ObjectMeta) -> Self {
        let key = meta.location.to_string();
        Self {
            format: DataFormat::from_extension(&key),
            key,
            size: meta.size,
            last_modified: meta.last_modified,
            etag: meta.e_tag,
        }
    }
}

/// S3 error codes that mean the bucket itself is unusable
const BUCKET_ERROR_CODES: [&str; 4] = [
    "NoSuchBucket",
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
];

/// Map a failed access check to a permanent error when the bucket is missing or forbidden
fn access_error(bucket: &str, err: object_store::Error) -> StorageError {
    let reason = match &err {
        object_store::Error::NotFound { .. } => "bucket not found",
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => "access denied",
        object_store::Error::Generic { source, .. } => {
            let text = source.to_string();
            match BUCKET_ERROR_CODES.iter().find(|code| text.contains(*code)) {
                Some(&"NoSuchBucket") => "bucket not found",
                Some(_) => "access denied",
                None => return err.into(),
            }
        }
        _ => return err.into(),
    };

    StorageError::BucketUnavailable {
        bucket: bucket.to_string(),
        reason: format!("{reason} ({err})"),
    }
}

fn list_prefix(prefix: &str) -> Option<StoragePath> {
    let prefix = prefix.trim_matches('/');
    (!prefix.is_empty()).then(|| StoragePath::from(prefix))
}

/// Append-only object store: `put` never replaces an existing key
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, metadata: &ObjectMetadata) -> Result<PutReceipt>;
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self { store, bucket }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            bucket: "gridfetch-local".to_string(),
        }
    }

    /// Build the backend named by `config.provider`
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Memory => Ok(Self::in_memory()),
            StorageProvider::S3 => Self::s3(config),
        }
    }

    /// S3 or S3-compatible store. Retries are left to the persistence layer.
    pub fn s3(config: &StorageConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::InvalidConfig("S3 bucket is required".into()));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig {
                max_retries: 0,
                ..Default::default()
            });

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }

        let store = builder.build()?;
        Ok(Self::new(Arc::new(store), config.bucket.clone()))
    }

    /// Download from storage
    pub async fn download(&self, key: &str) -> Result<(Bytes, ObjectMetadata)> {
        let path = StoragePath::from(key);
        let result = self.store.get(&path).await?;

        let mut metadata = ObjectMetadata::default();
        for (attribute, value) in result.attributes.iter() {
            match attribute {
                Attribute::ContentType => metadata.content_type = Some(value.to_string()),
                Attribute::Metadata(name) => {
                    metadata.entries.insert(name.to_string(), value.to_string());
                }
                _ => {}
            }
        }

        let bytes = result.bytes().await?;
        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");

        Ok((bytes, metadata))
    }

    /// Objects under `prefix`, sorted by key, optionally narrowed to one format
    pub async fn list(
        &self,
        prefix: &str,
        format: Option<DataFormat>,
    ) -> Result<Vec<StoredObject>> {
        let prefix = list_prefix(prefix);
        let metas: Vec<ObjectMeta> = self.store.list(prefix.as_ref()).try_collect().await?;

        let mut objects: Vec<StoredObject> = metas
            .into_iter()
            .map(StoredObject::from)
            .filter(|object| format.is_none_or(|format| object.format == format))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::debug!(bucket = %self.bucket, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    /// Fail fast when the bucket is missing or the credentials cannot read it
    pub async fn verify_access(&self, prefix: &str) -> Result<()> {
        let prefix = list_prefix(prefix);
        self.store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(|e| access_error(&self.bucket, e))?;

        tracing::info!(bucket = %self.bucket, "Storage access verified");
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for StorageClient {
    async fn put(&self, key: &str, bytes: Bytes, metadata: &ObjectMetadata) -> Result<PutReceipt> {
        let path = StoragePath::parse(key)
            .map_err(|e| StorageError::InvalidConfig(format!("malformed key '{key}': {e}")))?;
        let size = bytes.len();

        let options = PutOptions {
            mode: PutMode::Create,
            attributes: metadata.attributes(),
            ..Default::default()
        };

        let put_result = match self.store.put_opts(&path, PutPayload::from(bytes), options).await {
            Ok(result) => result,
            Err(object_store::Error::AlreadyExists { .. }) => {
                return Err(StorageError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(bucket = %self.bucket, key, size, "Uploaded to storage");

        Ok(PutReceipt {
            key: key.to_string(),
            etag: put_result.e_tag,
            size,
        })
    }
}
