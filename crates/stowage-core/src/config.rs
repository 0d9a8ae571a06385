//! Configuration module
//!
//! Storage configuration is read once at process start from the environment
//! (a `.env` file is honoured). Backend credentials are optional at load time;
//! the backend selector decides which of them are actually required.

use std::env;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;

use crate::storage_types::StorageBackend;

const SIGNED_URL_EXPIRES_SECS: u64 = 60;
const HTTP_TIMEOUT_SECS: u64 = 60;
const LOCAL_SIGNING_SECRET_MIN_LEN: usize = 32;

pub const CLOUDINARY_API_BASE_URL: &str = "https://api.cloudinary.com";
pub const CLOUDINARY_DELIVERY_BASE_URL: &str = "https://res.cloudinary.com";

/// File storage configuration
#[derive(Clone)]
pub struct StorageConfig {
    /// Raw backend selector value (`FILE_STORAGE`, falling back to `STORAGE_BACKEND`)
    pub file_storage: Option<String>,
    pub signed_url_expires_secs: u64,
    pub http_timeout_secs: u64,
    pub tmp_dir: Option<PathBuf>,
    // S3
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, etc.)
    pub aws_region: Option<String>,
    // Local filesystem
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub local_storage_signing_secret: Option<String>,
    // Cloudinary
    pub cloudinary_cloud_name: Option<String>,
    pub cloudinary_api_key: Option<String>,
    pub cloudinary_api_secret: Option<String>,
    pub cloudinary_signature_algorithm: String,
    pub cloudinary_api_base_url: String,
    pub cloudinary_delivery_base_url: String,
}

impl Debug for StorageConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        fn redact(secret: &Option<String>) -> &'static str {
            if secret.is_some() {
                "<redacted>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("StorageConfig")
            .field("file_storage", &self.file_storage)
            .field("signed_url_expires_secs", &self.signed_url_expires_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("tmp_dir", &self.tmp_dir)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("aws_region", &self.aws_region)
            .field("local_storage_path", &self.local_storage_path)
            .field("local_storage_base_url", &self.local_storage_base_url)
            .field(
                "local_storage_signing_secret",
                &redact(&self.local_storage_signing_secret),
            )
            .field("cloudinary_cloud_name", &self.cloudinary_cloud_name)
            .field("cloudinary_api_key", &self.cloudinary_api_key)
            .field("cloudinary_api_secret", &redact(&self.cloudinary_api_secret))
            .field(
                "cloudinary_signature_algorithm",
                &self.cloudinary_signature_algorithm,
            )
            .field("cloudinary_api_base_url", &self.cloudinary_api_base_url)
            .field(
                "cloudinary_delivery_base_url",
                &self.cloudinary_delivery_base_url,
            )
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_storage: None,
            signed_url_expires_secs: SIGNED_URL_EXPIRES_SECS,
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            tmp_dir: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            aws_region: None,
            local_storage_path: None,
            local_storage_base_url: None,
            local_storage_signing_secret: None,
            cloudinary_cloud_name: None,
            cloudinary_api_key: None,
            cloudinary_api_secret: None,
            cloudinary_signature_algorithm: "sha1".to_string(),
            cloudinary_api_base_url: CLOUDINARY_API_BASE_URL.to_string(),
            cloudinary_delivery_base_url: CLOUDINARY_DELIVERY_BASE_URL.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// Empty values are treated as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let signed_url_expires_secs = match var("FILE_STORAGE_SIGNED_URL_EXPIRES") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                anyhow::anyhow!("FILE_STORAGE_SIGNED_URL_EXPIRES must be a number of seconds")
            })?,
            None => SIGNED_URL_EXPIRES_SECS,
        };

        let http_timeout_secs = var("FILE_STORAGE_HTTP_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(HTTP_TIMEOUT_SECS);

        let config = StorageConfig {
            file_storage: var("FILE_STORAGE").or_else(|| var("STORAGE_BACKEND")),
            signed_url_expires_secs,
            http_timeout_secs,
            tmp_dir: var("FILE_STORAGE_TMP_DIR").map(PathBuf::from),
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION"),
            s3_endpoint: var("S3_ENDPOINT"),
            aws_region: var("AWS_REGION"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
            local_storage_signing_secret: var("LOCAL_STORAGE_SIGNING_SECRET"),
            cloudinary_cloud_name: var("CLOUDINARY_CLOUD_NAME"),
            cloudinary_api_key: var("CLOUDINARY_API_KEY"),
            cloudinary_api_secret: var("CLOUDINARY_API_SECRET"),
            cloudinary_signature_algorithm: var("CLOUDINARY_SIGNATURE_ALGORITHM")
                .map(|s| s.trim().to_lowercase())
                .unwrap_or_else(|| "sha1".to_string()),
            cloudinary_api_base_url: var("CLOUDINARY_API_BASE_URL")
                .unwrap_or_else(|| CLOUDINARY_API_BASE_URL.to_string()),
            cloudinary_delivery_base_url: var("CLOUDINARY_DELIVERY_BASE_URL")
                .unwrap_or_else(|| CLOUDINARY_DELIVERY_BASE_URL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.signed_url_expires_secs == 0 {
            return Err(anyhow::anyhow!(
                "FILE_STORAGE_SIGNED_URL_EXPIRES must be greater than zero"
            ));
        }

        if self.http_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "FILE_STORAGE_HTTP_TIMEOUT_SECS must be greater than zero"
            ));
        }

        if !matches!(
            self.cloudinary_signature_algorithm.as_str(),
            "sha1" | "sha256"
        ) {
            return Err(anyhow::anyhow!(
                "CLOUDINARY_SIGNATURE_ALGORITHM must be 'sha1' or 'sha256'"
            ));
        }

        Ok(())
    }

    /// Environment variables that must be set before `backend` can be constructed.
    ///
    /// An empty list means the backend's configuration is complete.
    pub fn missing_for(&self, backend: StorageBackend) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    missing.push("S3_BUCKET");
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    missing.push("S3_REGION");
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    missing.push("LOCAL_STORAGE_PATH");
                }
                if self.local_storage_base_url.is_none() {
                    missing.push("LOCAL_STORAGE_BASE_URL");
                }
                match &self.local_storage_signing_secret {
                    Some(secret) if secret.len() >= LOCAL_SIGNING_SECRET_MIN_LEN => {}
                    _ => missing.push("LOCAL_STORAGE_SIGNING_SECRET"),
                }
            }
            StorageBackend::Cloudinary => {
                if self.cloudinary_cloud_name.is_none() {
                    missing.push("CLOUDINARY_CLOUD_NAME");
                }
                if self.cloudinary_api_key.is_none() {
                    missing.push("CLOUDINARY_API_KEY");
                }
                if self.cloudinary_api_secret.is_none() {
                    missing.push("CLOUDINARY_API_SECRET");
                }
            }
        }
        missing
    }

    /// Raw selector value as configured, if any.
    pub fn requested_backend(&self) -> Option<&str> {
        self.file_storage.as_deref()
    }

    pub fn signed_url_expires_secs(&self) -> u64 {
        self.signed_url_expires_secs
    }

    pub fn http_timeout_secs(&self) -> u64 {
        self.http_timeout_secs
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(env::temp_dir)
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.s3_endpoint.as_deref()
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.aws_region.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.local_storage_base_url.as_deref()
    }

    pub fn local_storage_signing_secret(&self) -> Option<&str> {
        self.local_storage_signing_secret.as_deref()
    }

    pub fn cloudinary_cloud_name(&self) -> Option<&str> {
        self.cloudinary_cloud_name.as_deref()
    }

    pub fn cloudinary_api_key(&self) -> Option<&str> {
        self.cloudinary_api_key.as_deref()
    }

    pub fn cloudinary_api_secret(&self) -> Option<&str> {
        self.cloudinary_api_secret.as_deref()
    }

    pub fn cloudinary_signature_algorithm(&self) -> &str {
        &self.cloudinary_signature_algorithm
    }

    pub fn cloudinary_api_base_url(&self) -> &str {
        &self.cloudinary_api_base_url
    }

    pub fn cloudinary_delivery_base_url(&self) -> &str {
        &self.cloudinary_delivery_base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<StorageConfig, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StorageConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.requested_backend(), None);
        assert_eq!(config.signed_url_expires_secs(), 60);
        assert_eq!(config.http_timeout_secs(), 60);
        assert_eq!(config.cloudinary_signature_algorithm(), "sha1");
        assert_eq!(config.cloudinary_api_base_url(), CLOUDINARY_API_BASE_URL);
    }

    #[test]
    fn file_storage_takes_precedence_over_storage_backend() {
        let config = config_from(&[("FILE_STORAGE", "cloudinary"), ("STORAGE_BACKEND", "local")])
            .unwrap();
        assert_eq!(config.requested_backend(), Some("cloudinary"));

        let config = config_from(&[("STORAGE_BACKEND", "local")]).unwrap();
        assert_eq!(config.requested_backend(), Some("local"));
    }

    #[test]
    fn unknown_backend_is_kept_raw() {
        let config = config_from(&[("FILE_STORAGE", "ftp")]).unwrap();
        assert_eq!(config.requested_backend(), Some("ftp"));
    }

    #[test]
    fn invalid_expiry_is_rejected() {
        assert!(config_from(&[("FILE_STORAGE_SIGNED_URL_EXPIRES", "soon")]).is_err());
        assert!(config_from(&[("FILE_STORAGE_SIGNED_URL_EXPIRES", "0")]).is_err());
        let config = config_from(&[("FILE_STORAGE_SIGNED_URL_EXPIRES", "300")]).unwrap();
        assert_eq!(config.signed_url_expires_secs(), 300);
    }

    #[test]
    fn invalid_signature_algorithm_is_rejected() {
        assert!(config_from(&[("CLOUDINARY_SIGNATURE_ALGORITHM", "md5")]).is_err());
        let config = config_from(&[("CLOUDINARY_SIGNATURE_ALGORITHM", "SHA256")]).unwrap();
        assert_eq!(config.cloudinary_signature_algorithm(), "sha256");
    }

    #[test]
    fn missing_for_reports_cloudinary_credentials() {
        let config = config_from(&[("CLOUDINARY_CLOUD_NAME", "demo")]).unwrap();
        assert_eq!(
            config.missing_for(StorageBackend::Cloudinary),
            vec!["CLOUDINARY_API_KEY", "CLOUDINARY_API_SECRET"]
        );
    }

    #[test]
    fn missing_for_local_requires_long_signing_secret() {
        let config = config_from(&[
            ("LOCAL_STORAGE_PATH", "/tmp/files"),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:3000/files"),
            ("LOCAL_STORAGE_SIGNING_SECRET", "short"),
        ])
        .unwrap();
        assert_eq!(
            config.missing_for(StorageBackend::Local),
            vec!["LOCAL_STORAGE_SIGNING_SECRET"]
        );
    }

    #[test]
    fn missing_for_s3_accepts_aws_region() {
        let config = config_from(&[("S3_BUCKET", "uploads"), ("AWS_REGION", "eu-west-1")]).unwrap();
        assert!(config.missing_for(StorageBackend::S3).is_empty());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = config_from(&[
            ("CLOUDINARY_API_SECRET", "super-secret-value"),
            ("LOCAL_STORAGE_SIGNING_SECRET", "another-secret-value-that-is-long"),
        ])
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-value"));
        assert!(!debug.contains("another-secret-value-that-is-long"));
        assert!(debug.contains("<redacted>"));
    }
}
