//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement,
//! together with the value types that cross its boundary.

use crate::handle::FileHandle;
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Boxed error carried as the `source` of remote failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed for {key}: {source}")]
    UploadFailed {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Download failed for {key}: {source}")]
    DownloadFailed {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Delete failed for {key}: {source}")]
    DeleteFailed {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Usage request failed: {source}")]
    UsageFailed {
        #[source]
        source: BoxError,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn upload(key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::UploadFailed {
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub fn download(key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::DownloadFailed {
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub fn delete(key: &str, source: impl Into<BoxError>) -> Self {
        StorageError::DeleteFailed {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of object bytes returned by [`Storage::get_file_stream`].
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Payload accepted by [`Storage::store`].
pub enum StoreBody {
    Bytes(Bytes),
    Reader(Pin<Box<dyn AsyncRead + Send + Unpin>>),
}

impl StoreBody {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        StoreBody::Reader(Box::pin(reader))
    }

    /// Drain the body completely into memory.
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            StoreBody::Bytes(bytes) => Ok(bytes),
            StoreBody::Reader(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }
}

impl From<Bytes> for StoreBody {
    fn from(bytes: Bytes) -> Self {
        StoreBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for StoreBody {
    fn from(data: Vec<u8>) -> Self {
        StoreBody::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for StoreBody {
    fn from(data: &'static [u8]) -> Self {
        StoreBody::Bytes(Bytes::from_static(data))
    }
}

impl From<String> for StoreBody {
    fn from(data: String) -> Self {
        StoreBody::Bytes(Bytes::from(data))
    }
}

/// Access control requested for a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Acl {
    #[default]
    #[serde(rename = "private")]
    Private,
    #[serde(rename = "public-read")]
    PublicRead,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

/// Anything other than `public-read` is private.
impl FromStr for Acl {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("public-read") {
            Ok(Acl::PublicRead)
        } else {
            Ok(Acl::Private)
        }
    }
}

impl Display for Acl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Inclusive byte range for partial reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// True when the range selects the whole object.
    pub fn is_full(&self) -> bool {
        matches!(self.start, None | Some(0)) && self.end.is_none()
    }

    /// Value for an HTTP `Range` header, or `None` for the whole object.
    pub fn header_value(&self) -> Option<String> {
        if self.start.is_none() && self.end.is_none() {
            return None;
        }
        let start = self.start.unwrap_or(0);
        Some(match self.end {
            Some(end) => format!("bytes={}-{}", start, end),
            None => format!("bytes={}-", start),
        })
    }
}

/// Signed authorization for a direct client upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadAuthorization {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

/// Account usage as reported by backends that expose it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsage {
    pub plan: Option<String>,
    pub credits_used: Option<f64>,
    pub credits_limit: Option<f64>,
    pub storage_bytes: Option<u64>,
    pub bandwidth_bytes: Option<u64>,
    pub resources: Option<u64>,
}

/// Storage abstraction trait
///
/// All storage backends (local filesystem, S3, Cloudinary) implement this trait so
/// the hosting application can work with whichever backend was selected at startup.
///
/// Keys are opaque, caller-chosen, path-like strings. Backends never rewrite them.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a payload under `key` and return the URL of the stored object.
    ///
    /// Streaming bodies are drained completely before the object is written.
    async fn store(
        &self,
        body: StoreBody,
        key: &str,
        content_type: Option<&str>,
        acl: Option<Acl>,
    ) -> StorageResult<String>;

    /// Open a stream over the object, optionally restricted to a byte range.
    ///
    /// Returns `None` when the object cannot be located or the backend call fails;
    /// the failure has already been logged.
    async fn get_file_stream(&self, key: &str, range: Option<ByteRange>) -> Option<ByteStream>;

    /// Materialize the object into a local temporary file.
    ///
    /// The temporary file is removed by [`FileHandle::cleanup`] or, failing that,
    /// when the handle is dropped.
    async fn get_file_handle(&self, key: &str) -> StorageResult<FileHandle> {
        let stream = self
            .get_file_stream(key, None)
            .await
            .ok_or_else(|| StorageError::download(key, "no stream available"))?;

        FileHandle::materialize(key, stream, &self.scratch_dir()).await
    }

    /// Delete the object. Deleting a missing object succeeds.
    async fn delete_file(&self, key: &str) -> StorageResult<()>;

    /// Direct URL for the object. Pure, no network call.
    fn get_url_for_key(&self, key: &str) -> String;

    /// Time-limited signed URL for the object.
    ///
    /// `None` uses the backend's configured default expiry.
    async fn get_signed_url(&self, key: &str, expires_in: Option<Duration>)
        -> StorageResult<String>;

    /// Build a signed authorization letting a client upload `key` directly.
    async fn get_presigned_post(
        &self,
        key: &str,
        acl: Acl,
        max_upload_size: u64,
        content_type: &str,
    ) -> StorageResult<UploadAuthorization>;

    /// Base endpoint for direct uploads.
    fn get_upload_url(&self, server_side: bool) -> String;

    /// Account usage, for backends that report it.
    async fn usage(&self) -> StorageResult<Option<StorageUsage>> {
        Ok(None)
    }

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Directory where temporary files are created.
    fn scratch_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_header_values() {
        assert_eq!(ByteRange::default().header_value(), None);
        assert_eq!(
            ByteRange::new(Some(10), Some(20)).header_value().as_deref(),
            Some("bytes=10-20")
        );
        assert_eq!(
            ByteRange::new(Some(5), None).header_value().as_deref(),
            Some("bytes=5-")
        );
        assert_eq!(
            ByteRange::new(None, Some(99)).header_value().as_deref(),
            Some("bytes=0-99")
        );
    }

    #[test]
    fn byte_range_is_full() {
        assert!(ByteRange::default().is_full());
        assert!(ByteRange::new(Some(0), None).is_full());
        assert!(!ByteRange::new(Some(1), None).is_full());
        assert!(!ByteRange::new(None, Some(3)).is_full());
    }

    #[test]
    fn acl_parsing_defaults_to_private() {
        assert_eq!("public-read".parse::<Acl>().unwrap(), Acl::PublicRead);
        assert_eq!("PUBLIC-READ".parse::<Acl>().unwrap(), Acl::PublicRead);
        assert_eq!("private".parse::<Acl>().unwrap(), Acl::Private);
        assert_eq!("authenticated-read".parse::<Acl>().unwrap(), Acl::Private);
    }

    #[tokio::test]
    async fn store_body_reader_is_drained() {
        let data = b"streamed payload".to_vec();
        let body = StoreBody::from_reader(std::io::Cursor::new(data.clone()));
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from(data));
    }

    #[test]
    fn storage_error_keeps_original_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::upload("a/b.png", io);
        assert!(err.to_string().contains("a/b.png"));
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn upload_authorization_serializes_as_url_and_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("signature".to_string(), "abc".to_string());
        fields.insert("api_key".to_string(), "123".to_string());
        let auth = UploadAuthorization {
            url: "https://example.com/upload".to_string(),
            fields,
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["url"], "https://example.com/upload");
        assert_eq!(json["fields"]["signature"], "abc");
        assert_eq!(json["fields"]["api_key"], "123");
    }
}
