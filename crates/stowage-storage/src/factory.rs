//! Backend selection.
//!
//! The backend is chosen once at startup from configuration. Optional backends
//! sit behind cargo features; a backend that is compiled out or missing
//! configuration is only fatal when it is the one selected.

#[cfg(feature = "storage-cloudinary")]
use crate::cloudinary::{CloudinaryStorage, Credentials, HttpCloudinaryApi};
#[cfg(feature = "storage-cloudinary")]
use crate::signing::SignatureAlgorithm;
#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use std::sync::{Arc, OnceLock};
#[cfg(any(
    feature = "storage-s3",
    feature = "storage-local",
    feature = "storage-cloudinary"
))]
use std::time::Duration;
use stowage_core::StorageConfig;

static GLOBAL_STORAGE: OnceLock<Arc<dyn Storage>> = OnceLock::new();

/// Picks and constructs exactly one storage backend from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BackendSelector<'a> {
    config: &'a StorageConfig,
}

impl<'a> BackendSelector<'a> {
    pub fn new(config: &'a StorageConfig) -> Self {
        Self { config }
    }

    /// Backend named by configuration, or the default when absent or unknown.
    pub fn resolve(&self) -> StorageBackend {
        match self.config.requested_backend() {
            None => StorageBackend::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    requested = %raw,
                    default = %StorageBackend::default(),
                    "Unknown storage backend, falling back to default"
                );
                StorageBackend::default()
            }),
        }
    }

    /// Whether support for `backend` was compiled in.
    pub fn is_compiled(backend: StorageBackend) -> bool {
        match backend {
            StorageBackend::S3 => cfg!(feature = "storage-s3"),
            StorageBackend::Local => cfg!(feature = "storage-local"),
            StorageBackend::Cloudinary => cfg!(feature = "storage-cloudinary"),
        }
    }

    /// Why `backend` cannot be built, or `None` when it can.
    pub fn unavailable_reason(&self, backend: StorageBackend) -> Option<String> {
        if !Self::is_compiled(backend) {
            return Some(format!(
                "{} storage backend not available (storage-{} feature not enabled)",
                backend, backend
            ));
        }

        let missing = self.config.missing_for(backend);
        if missing.is_empty() {
            None
        } else {
            Some(format!(
                "{} storage backend not configured (missing {})",
                backend,
                missing.join(", ")
            ))
        }
    }

    /// Construct the selected backend.
    ///
    /// Unavailable non-selected backends are logged and skipped. The selected one
    /// must build or this fails with [`StorageError::ConfigError`].
    pub async fn build(&self) -> StorageResult<Arc<dyn Storage>> {
        let selected = self.resolve();

        for backend in StorageBackend::ALL {
            if backend == selected {
                continue;
            }
            if let Some(reason) = self.unavailable_reason(backend) {
                tracing::warn!(backend = %backend, reason = %reason, "Storage backend unavailable");
            }
        }

        if let Some(reason) = self.unavailable_reason(selected) {
            tracing::error!(backend = %selected, reason = %reason, "Selected storage backend unavailable");
            return Err(StorageError::ConfigError(reason));
        }

        let storage = self.construct(selected).await?;

        tracing::info!(backend = %selected, "Storage backend initialized");

        Ok(storage)
    }

    async fn construct(&self, backend: StorageBackend) -> StorageResult<Arc<dyn Storage>> {
        match backend {
            #[cfg(feature = "storage-s3")]
            StorageBackend::S3 => {
                let config = self.config;
                let bucket = config
                    .s3_bucket()
                    .map(String::from)
                    .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
                let region = config
                    .s3_region()
                    .or_else(|| config.aws_region())
                    .map(String::from)
                    .ok_or_else(|| {
                        StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
                    })?;
                let endpoint = config.s3_endpoint().map(String::from);

                let storage = S3Storage::new(bucket, region, endpoint)?
                    .with_signed_url_expires(Duration::from_secs(config.signed_url_expires_secs()))
                    .with_scratch_dir(config.tmp_dir());
                Ok(Arc::new(storage))
            }

            #[cfg(feature = "storage-local")]
            StorageBackend::Local => {
                let config = self.config;
                let base_path = config.local_storage_path().map(String::from).ok_or_else(|| {
                    StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
                })?;
                let base_url = config.local_storage_base_url().map(String::from).ok_or_else(|| {
                    StorageError::ConfigError("LOCAL_STORAGE_BASE_URL not configured".to_string())
                })?;
                let secret = config
                    .local_storage_signing_secret()
                    .map(String::from)
                    .ok_or_else(|| {
                        StorageError::ConfigError(
                            "LOCAL_STORAGE_SIGNING_SECRET not configured".to_string(),
                        )
                    })?;

                let storage = LocalStorage::new(base_path, base_url, secret)
                    .await?
                    .with_signed_url_expires(Duration::from_secs(config.signed_url_expires_secs()))
                    .with_scratch_dir(config.tmp_dir());
                Ok(Arc::new(storage))
            }

            #[cfg(feature = "storage-cloudinary")]
            StorageBackend::Cloudinary => {
                let config = self.config;
                let credential = |value: Option<&str>, name: &str| {
                    value
                        .map(String::from)
                        .ok_or_else(|| StorageError::ConfigError(format!("{} not configured", name)))
                };
                let credentials = Credentials::new(
                    credential(config.cloudinary_cloud_name(), "CLOUDINARY_CLOUD_NAME")?,
                    credential(config.cloudinary_api_key(), "CLOUDINARY_API_KEY")?,
                    credential(config.cloudinary_api_secret(), "CLOUDINARY_API_SECRET")?,
                );
                let algorithm: SignatureAlgorithm = config
                    .cloudinary_signature_algorithm()
                    .parse()
                    .map_err(StorageError::ConfigError)?;

                let api = HttpCloudinaryApi::new(
                    credentials.clone(),
                    config.cloudinary_api_base_url(),
                    Duration::from_secs(config.http_timeout_secs()),
                )
                .map_err(|e| {
                    StorageError::ConfigError(format!("Failed to create Cloudinary client: {}", e))
                })?;

                let storage = CloudinaryStorage::new(credentials, Arc::new(api))
                    .with_api_base_url(config.cloudinary_api_base_url())
                    .with_delivery_base_url(config.cloudinary_delivery_base_url())
                    .with_signature_algorithm(algorithm)
                    .with_signed_url_expires(Duration::from_secs(config.signed_url_expires_secs()))
                    .with_scratch_dir(config.tmp_dir());
                Ok(Arc::new(storage))
            }

            #[allow(unreachable_patterns)]
            other => Err(StorageError::ConfigError(format!(
                "{} storage backend not available",
                other
            ))),
        }
    }
}

/// Create a storage backend based on configuration
pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    BackendSelector::new(config).build().await
}

/// Install the process-wide storage handle. Succeeds at most once.
pub fn install_global(storage: Arc<dyn Storage>) -> StorageResult<()> {
    GLOBAL_STORAGE.set(storage).map_err(|_| {
        StorageError::ConfigError("Global storage backend already installed".to_string())
    })
}

/// The process-wide storage handle, if installed.
pub fn global() -> Option<Arc<dyn Storage>> {
    GLOBAL_STORAGE.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(file_storage: Option<&str>) -> StorageConfig {
        StorageConfig {
            file_storage: file_storage.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn absent_selector_uses_default() {
        let config = config(None);
        assert_eq!(BackendSelector::new(&config).resolve(), StorageBackend::S3);
    }

    #[test]
    fn unknown_selector_falls_back_to_default() {
        let config = config(Some("ftp"));
        assert_eq!(BackendSelector::new(&config).resolve(), StorageBackend::S3);
    }

    #[test]
    fn known_selectors_resolve() {
        let cloudinary = config(Some("Cloudinary"));
        assert_eq!(
            BackendSelector::new(&cloudinary).resolve(),
            StorageBackend::Cloudinary
        );
        let local = config(Some("local"));
        assert_eq!(BackendSelector::new(&local).resolve(), StorageBackend::Local);
    }

    #[tokio::test]
    async fn selected_backend_with_missing_config_fails() {
        let config = config(Some("cloudinary"));
        let result = create_storage(&config).await;
        match result {
            Err(StorageError::ConfigError(message)) => {
                assert!(message.contains("cloudinary"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected configuration error"),
        }
    }

    #[test]
    fn unavailable_reason_names_missing_variables() {
        let config = config(None);
        let reason = BackendSelector::new(&config)
            .unavailable_reason(StorageBackend::S3)
            .unwrap();
        assert!(reason.contains("S3_BUCKET"));
    }

    #[cfg(feature = "storage-local")]
    #[tokio::test]
    async fn builds_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            file_storage: Some("local".to_string()),
            local_storage_path: Some(dir.path().join("files").display().to_string()),
            local_storage_base_url: Some("http://localhost:3000/files".to_string()),
            local_storage_signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
            tmp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Local);
        assert_eq!(storage.scratch_dir(), dir.path());
        assert!(dir.path().join("files").is_dir());
    }

    #[cfg(feature = "storage-local")]
    #[tokio::test]
    async fn short_local_secret_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            file_storage: Some("local".to_string()),
            local_storage_path: Some(dir.path().display().to_string()),
            local_storage_base_url: Some("http://localhost:3000/files".to_string()),
            local_storage_signing_secret: Some("short".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            create_storage(&config).await,
            Err(StorageError::ConfigError(_))
        ));
    }

    #[cfg(feature = "storage-cloudinary")]
    #[tokio::test]
    async fn builds_cloudinary_backend_without_network() {
        let config = StorageConfig {
            file_storage: Some("cloudinary".to_string()),
            cloudinary_cloud_name: Some("demo".to_string()),
            cloudinary_api_key: Some("1234567890".to_string()),
            cloudinary_api_secret: Some("not-a-real-secret".to_string()),
            cloudinary_signature_algorithm: "sha256".to_string(),
            ..Default::default()
        };

        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Cloudinary);
        assert_eq!(
            storage.get_upload_url(false),
            "https://api.cloudinary.com/v1_1/demo/auto/upload"
        );
    }

    #[cfg(feature = "storage-s3")]
    #[tokio::test]
    async fn builds_s3_backend_with_aws_region_fallback() {
        let config = StorageConfig {
            file_storage: Some("s3".to_string()),
            s3_bucket: Some("uploads".to_string()),
            aws_region: Some("us-east-1".to_string()),
            ..Default::default()
        };

        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::S3);
        assert_eq!(
            storage.get_url_for_key("a.png"),
            "https://uploads.s3.us-east-1.amazonaws.com/a.png"
        );
    }

    #[cfg(feature = "storage-local")]
    #[tokio::test]
    async fn global_handle_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(
                dir.path(),
                "http://localhost/files".to_string(),
                "0123456789abcdef0123456789abcdef".to_string(),
            )
            .await
            .unwrap(),
        );

        install_global(storage.clone()).unwrap();
        assert!(global().is_some());
        assert!(matches!(
            install_global(storage),
            Err(StorageError::ConfigError(_))
        ));
    }
}
