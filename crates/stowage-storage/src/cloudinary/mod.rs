//! Cloudinary media CDN backend.
//!
//! Keys map to Cloudinary assets through the key codec: the public id is the key
//! without its extension, the resource type comes from the declared content type
//! on upload (the extension when none is declared) and from the extension
//! everywhere else.

mod authorizer;
mod client;

pub use authorizer::UploadAuthorizer;
pub use client::{
    CloudinaryApi, CloudinaryError, Credentials, DestroyResponse, DownloadStream,
    HttpCloudinaryApi, UploadFile, UploadResponse, UsageMetric, UsageResponse,
};

use crate::keys;
use crate::signing::{self, SignatureAlgorithm};
use crate::traits::{
    Acl, ByteRange, ByteStream, Storage, StorageError, StorageResult, StorageUsage, StoreBody,
    UploadAuthorization,
};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::{CLOUDINARY_API_BASE_URL, CLOUDINARY_DELIVERY_BASE_URL};

const DEFAULT_SIGNED_URL_EXPIRES: Duration = Duration::from_secs(60);

/// Cloudinary storage implementation
#[derive(Clone)]
pub struct CloudinaryStorage {
    api: Arc<dyn CloudinaryApi>,
    authorizer: UploadAuthorizer,
    delivery_base: String,
    signed_url_expires: Duration,
    scratch_dir: PathBuf,
}

impl CloudinaryStorage {
    /// Create a backend for the account in `credentials`, talking through `api`.
    pub fn new(credentials: Credentials, api: Arc<dyn CloudinaryApi>) -> Self {
        Self {
            api,
            authorizer: UploadAuthorizer::new(credentials, CLOUDINARY_API_BASE_URL),
            delivery_base: CLOUDINARY_DELIVERY_BASE_URL.to_string(),
            signed_url_expires: DEFAULT_SIGNED_URL_EXPIRES,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_api_base_url(mut self, api_base: &str) -> Self {
        self.authorizer = self.authorizer.with_api_base(api_base);
        self
    }

    pub fn with_delivery_base_url(mut self, delivery_base: &str) -> Self {
        self.delivery_base = delivery_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.authorizer = self.authorizer.with_algorithm(algorithm);
        self
    }

    pub fn with_signed_url_expires(mut self, expires: Duration) -> Self {
        self.signed_url_expires = expires;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn authorizer(&self) -> &UploadAuthorizer {
        &self.authorizer
    }

    fn delivery_url(&self, resource_type: keys::ResourceType, public_id: &str) -> String {
        format!(
            "{}/{}/{}/upload/v1/{}",
            self.delivery_base,
            self.authorizer.cloud_name(),
            resource_type,
            public_id
        )
    }

    fn file_name(key: &str) -> String {
        match key.rfind('/') {
            Some(idx) => key[idx + 1..].to_string(),
            None => key.to_string(),
        }
    }
}

impl Debug for CloudinaryStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CloudinaryStorage")
            .field("authorizer", &self.authorizer)
            .field("delivery_base", &self.delivery_base)
            .field("signed_url_expires", &self.signed_url_expires)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

#[async_trait]
impl Storage for CloudinaryStorage {
    async fn store(
        &self,
        body: StoreBody,
        key: &str,
        content_type: Option<&str>,
        acl: Option<Acl>,
    ) -> StorageResult<String> {
        let start = std::time::Instant::now();

        let data = body.into_bytes().await.map_err(|e| {
            tracing::error!(
                error = %e,
                key = %key,
                content_type = ?content_type,
                operation = "store",
                "Failed to read upload body"
            );
            StorageError::upload(key, e)
        })?;
        let size = data.len() as u64;

        let resource_type = keys::classify_key(key, content_type);
        let access_mode = match acl {
            Some(Acl::PublicRead) => "public",
            _ => "authenticated",
        };

        let mut params = BTreeMap::new();
        params.insert("public_id".to_string(), keys::identifier_of(key).to_string());
        params.insert("folder".to_string(), keys::folder_of(key).to_string());
        params.insert("access_mode".to_string(), access_mode.to_string());
        params.insert("timestamp".to_string(), signing::unix_timestamp().to_string());
        self.authorizer.sign_into(&mut params);

        let file = UploadFile {
            file_name: Self::file_name(key),
            content_type: content_type.map(String::from),
            data,
        };

        let response = self
            .api
            .upload(resource_type, params, file)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    key = %key,
                    content_type = ?content_type,
                    status = ?e.status(),
                    size_bytes = size,
                    operation = "store",
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Cloudinary upload failed"
                );
                StorageError::upload(key, e)
            })?;

        tracing::info!(
            key = %key,
            public_id = %response.public_id,
            resource_type = %resource_type,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Cloudinary upload successful"
        );

        Ok(response.secure_url)
    }

    async fn get_file_stream(&self, key: &str, range: Option<ByteRange>) -> Option<ByteStream> {
        let url = self.get_url_for_key(key);

        let stream = match self.api.download(&url, range).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    key = %key,
                    status = ?e.status(),
                    operation = "get_file_stream",
                    "Cloudinary download failed"
                );
                return None;
            }
        };

        let key = key.to_string();
        let stream = stream.map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(error = %e, key = %key, "Cloudinary stream download error");
                StorageError::download(&key, e)
            })
        });

        Some(Box::pin(stream))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let resource_type = keys::classify_by_extension(key);

        let mut params = BTreeMap::new();
        params.insert("public_id".to_string(), keys::identifier_of(key).to_string());
        params.insert("timestamp".to_string(), signing::unix_timestamp().to_string());
        self.authorizer.sign_into(&mut params);

        let result = match self.api.destroy(resource_type, params).await {
            Ok(response) if response.is_absent() => Ok(response),
            Ok(response) => Err(CloudinaryError::Rejected(response.result)),
            Err(e) => Err(e),
        };

        let response = result.map_err(|e| {
            tracing::error!(
                error = %e,
                key = %key,
                status = ?e.status(),
                operation = "delete_file",
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Cloudinary delete failed"
            );
            StorageError::delete(key, e)
        })?;

        tracing::info!(
            key = %key,
            result = %response.result,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Cloudinary delete successful"
        );

        Ok(())
    }

    fn get_url_for_key(&self, key: &str) -> String {
        self.delivery_url(keys::classify_by_extension(key), keys::identifier_of(key))
    }

    async fn get_signed_url(
        &self,
        key: &str,
        expires_in: Option<Duration>,
    ) -> StorageResult<String> {
        let now = signing::unix_timestamp();
        let expires_in = expires_in.unwrap_or(self.signed_url_expires);
        let expires_at = signing::expiry_after(now, expires_in).ok_or_else(|| {
            StorageError::ConfigError(format!(
                "Signed URL expiry of {}s is out of range",
                expires_in.as_secs()
            ))
        })?;
        let resource_type = keys::classify_by_extension(key);

        let mut params = BTreeMap::new();
        params.insert("timestamp".to_string(), now.to_string());
        params.insert("public_id".to_string(), keys::identifier_of(key).to_string());
        params.insert("expires_at".to_string(), expires_at.to_string());
        if let Some(format) = keys::extension_of(key) {
            params.insert("format".to_string(), format.to_string());
        }
        self.authorizer.sign_into(&mut params);

        let query = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!(
            "{}?{}",
            self.authorizer.endpoint(resource_type.as_str(), "download"),
            query
        ))
    }

    async fn get_presigned_post(
        &self,
        key: &str,
        acl: Acl,
        max_upload_size: u64,
        content_type: &str,
    ) -> StorageResult<UploadAuthorization> {
        tracing::debug!(
            key = %key,
            acl = %acl,
            max_upload_size = max_upload_size,
            "Cloudinary upload authorizations carry no ACL or size limit"
        );

        Ok(self.authorizer.authorize(key, content_type))
    }

    fn get_upload_url(&self, _server_side: bool) -> String {
        self.authorizer.endpoint("auto", "upload")
    }

    async fn usage(&self) -> StorageResult<Option<StorageUsage>> {
        let usage = self.api.usage().await.map_err(|e| {
            tracing::error!(
                error = %e,
                status = ?e.status(),
                operation = "usage",
                "Cloudinary usage request failed"
            );
            StorageError::UsageFailed { source: e.into() }
        })?;

        let credits = usage.credits.unwrap_or_default();

        Ok(Some(StorageUsage {
            plan: usage.plan,
            credits_used: credits.usage,
            credits_limit: credits.limit,
            storage_bytes: usage.storage.and_then(|m| m.usage).map(|v| v as u64),
            bandwidth_bytes: usage.bandwidth.and_then(|m| m.usage).map(|v| v as u64),
            resources: usage.resources,
        }))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Cloudinary
    }

    fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone()
    }
}
