use crate::signing::{expiry_after, hmac_params, unix_timestamp, verify_hmac};
use crate::traits::{
    Acl, ByteRange, ByteStream, Storage, StorageError, StorageResult, StoreBody,
    UploadAuthorization,
};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const DEFAULT_SIGNED_URL_EXPIRES: Duration = Duration::from_secs(60);

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    upload_url: String,
    signing_secret: String,
    signed_url_expires: Duration,
    scratch_dir: PathBuf,
}

impl Debug for LocalStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LocalStorage")
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .field("upload_url", &self.upload_url)
            .finish_non_exhaustive()
    }
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/stowage/files")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:3000/files")
    /// * `signing_secret` - Secret used to sign URLs and upload authorizations
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_secret: String,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        if signing_secret.is_empty() {
            return Err(StorageError::ConfigError(
                "Local storage signing secret must not be empty".to_string(),
            ));
        }

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let upload_url = format!("{}/upload", base_url.trim_end_matches('/'));

        Ok(LocalStorage {
            base_path,
            base_url,
            upload_url,
            signing_secret,
            signed_url_expires: DEFAULT_SIGNED_URL_EXPIRES,
            scratch_dir: std::env::temp_dir(),
        })
    }

    pub fn with_signed_url_expires(mut self, expires: Duration) -> Self {
        self.signed_url_expires = expires;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// This function validates that the storage key doesn't contain path traversal
    /// sequences that could escape the base storage directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty() || storage_key.contains("..") || storage_key.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        // Existing paths may be symlinks; resolve them before checking containment.
        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        } else if path.strip_prefix(&self.base_path).is_err() {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }

        Ok(path)
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `body` beside `path` and move it into place once fully written.
    async fn write_atomically(&self, path: &Path, body: StoreBody) -> std::io::Result<u64> {
        self.ensure_parent_dir(path).await?;
        let parent = path.parent().unwrap_or(&self.base_path);
        let temp_path = tempfile::Builder::new()
            .prefix(".stowage-")
            .suffix(".part")
            .tempfile_in(parent)?
            .into_temp_path();

        let mut file = fs::File::create(&temp_path).await?;
        let size = match body {
            StoreBody::Bytes(bytes) => {
                file.write_all(&bytes).await?;
                bytes.len() as u64
            }
            StoreBody::Reader(mut reader) => tokio::io::copy(&mut reader, &mut file).await?,
        };
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;
        // The temp path no longer exists; stop it from being removed on drop.
        let _ = temp_path.keep();
        Ok(size)
    }

    fn signed_params(&self, key: &str, expires_at: u64) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("expires".to_string(), expires_at.to_string());
        params.insert("key".to_string(), key.to_string());
        params
    }

    /// Check a signature produced by [`Storage::get_signed_url`].
    pub fn verify_signed_url(&self, key: &str, expires_at: u64, signature: &str) -> bool {
        if unix_timestamp() > expires_at {
            return false;
        }
        let params = self.signed_params(key, expires_at);
        verify_hmac(&params, self.signing_secret.as_bytes(), signature)
    }

    /// Check the fields of an authorization produced by [`Storage::get_presigned_post`].
    pub fn verify_presigned_post(&self, fields: &BTreeMap<String, String>) -> bool {
        let Some(signature) = fields.get("signature") else {
            return false;
        };
        let expired = fields
            .get("expires")
            .and_then(|s| s.parse::<u64>().ok())
            .map_or(true, |expires_at| unix_timestamp() > expires_at);
        if expired {
            return false;
        }
        verify_hmac(fields, self.signing_secret.as_bytes(), signature)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(
        &self,
        body: StoreBody,
        key: &str,
        content_type: Option<&str>,
        _acl: Option<Acl>,
    ) -> StorageResult<String> {
        let path = self.key_to_path(key)?;

        let start = std::time::Instant::now();

        let size = self.write_atomically(&path, body).await.map_err(|e| {
            tracing::error!(
                error = %e,
                path = %path.display(),
                key = %key,
                content_type = ?content_type,
                operation = "store",
                "Local storage store failed"
            );
            StorageError::upload(key, e)
        })?;

        let url = self.generate_url(key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage store successful"
        );

        Ok(url)
    }

    async fn get_file_stream(&self, key: &str, range: Option<ByteRange>) -> Option<ByteStream> {
        let path = match self.key_to_path(key) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, operation = "get_file_stream", "Rejected storage key");
                return None;
            }
        };

        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, operation = "get_file_stream", "Local file not found");
                return None;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    key = %key,
                    operation = "get_file_stream",
                    "Failed to open local file"
                );
                return None;
            }
        };

        let reader: std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>> = match range {
            Some(range) if !range.is_full() => {
                let start = range.start.unwrap_or(0);
                if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                    tracing::error!(
                        error = %e,
                        key = %key,
                        operation = "get_file_stream",
                        "Failed to seek local file"
                    );
                    return None;
                }
                match range.end {
                    Some(end) => Box::pin(file.take(end.saturating_sub(start) + 1)),
                    None => Box::pin(file),
                }
            }
            _ => Box::pin(file),
        };

        let key = key.to_string();
        let stream = tokio_util::io::ReaderStream::new(reader).map(move |result| {
            result.map_err(|e| {
                tracing::error!(error = %e, key = %key, "Local storage stream read error");
                StorageError::download(&key, e)
            })
        });

        Some(Box::pin(stream))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "Local file already absent");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    key = %key,
                    operation = "delete_file",
                    "Local storage delete failed"
                );
                return Err(StorageError::delete(key, e));
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    fn get_url_for_key(&self, key: &str) -> String {
        self.generate_url(key)
    }

    async fn get_signed_url(
        &self,
        key: &str,
        expires_in: Option<Duration>,
    ) -> StorageResult<String> {
        self.key_to_path(key)?;
        let expires_in = expires_in.unwrap_or(self.signed_url_expires);
        let expires_at = expiry_after(unix_timestamp(), expires_in).ok_or_else(|| {
            StorageError::ConfigError(format!(
                "Signed URL expiry of {}s is out of range",
                expires_in.as_secs()
            ))
        })?;
        let signature = hmac_params(
            &self.signed_params(key, expires_at),
            self.signing_secret.as_bytes(),
        );

        Ok(format!(
            "{}?expires={}&signature={}",
            self.generate_url(key),
            expires_at,
            signature
        ))
    }

    async fn get_presigned_post(
        &self,
        key: &str,
        acl: Acl,
        max_upload_size: u64,
        content_type: &str,
    ) -> StorageResult<UploadAuthorization> {
        self.key_to_path(key)?;
        let expires_at = expiry_after(unix_timestamp(), self.signed_url_expires).ok_or_else(|| {
            StorageError::ConfigError(format!(
                "Upload authorization expiry of {}s is out of range",
                self.signed_url_expires.as_secs()
            ))
        })?;

        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), key.to_string());
        fields.insert("acl".to_string(), acl.to_string());
        fields.insert("content_type".to_string(), content_type.to_string());
        fields.insert("max_upload_size".to_string(), max_upload_size.to_string());
        fields.insert("expires".to_string(), expires_at.to_string());

        let signature = hmac_params(&fields, self.signing_secret.as_bytes());
        fields.insert("signature".to_string(), signature);

        Ok(UploadAuthorization {
            url: self.get_upload_url(false),
            fields,
        })
    }

    fn get_upload_url(&self, _server_side: bool) -> String {
        self.upload_url.clone()
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }

    fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone()
    }
}
