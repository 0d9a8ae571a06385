//! Cloudinary HTTP transport.
//!
//! [`CloudinaryApi`] is the seam between [`CloudinaryStorage`](super::CloudinaryStorage)
//! and the vendor. Requests arrive fully signed; implementations only move bytes.

use crate::keys::ResourceType;
use crate::traits::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;
use thiserror::Error;

/// Account credentials. The secret never leaves this crate.
#[derive(Clone)]
pub struct Credentials {
    pub cloud_name: String,
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        Self {
            cloud_name,
            api_key,
            api_secret,
        }
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Credentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Cloudinary transport errors
#[derive(Debug, Error)]
pub enum CloudinaryError {
    #[error("Cloudinary request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cloudinary returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode Cloudinary response: {0}")]
    Decode(String),

    #[error("Cloudinary rejected the request: {0}")]
    Rejected(String),
}

impl CloudinaryError {
    /// HTTP status code, when the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            CloudinaryError::Http(e) => e.status().map(|s| s.as_u16()),
            CloudinaryError::Status { status, .. } => Some(*status),
            CloudinaryError::Decode(_) | CloudinaryError::Rejected(_) => None,
        }
    }
}

/// File part of an upload request.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub public_id: String,
    pub secure_url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestroyResponse {
    pub result: String,
}

impl DestroyResponse {
    /// `ok` and `not found` both leave the asset absent.
    pub fn is_absent(&self) -> bool {
        matches!(self.result.as_str(), "ok" | "not found")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageMetric {
    #[serde(default)]
    pub usage: Option<f64>,
    #[serde(default)]
    pub limit: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageResponse {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub credits: Option<UsageMetric>,
    #[serde(default)]
    pub storage: Option<UsageMetric>,
    #[serde(default)]
    pub bandwidth: Option<UsageMetric>,
    #[serde(default)]
    pub resources: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

pub type DownloadStream = BoxStream<'static, Result<Bytes, CloudinaryError>>;

/// Vendor operations used by the Cloudinary backend.
#[async_trait]
pub trait CloudinaryApi: Send + Sync {
    /// Upload `file` with the signed form `params`.
    async fn upload(
        &self,
        resource_type: ResourceType,
        params: BTreeMap<String, String>,
        file: UploadFile,
    ) -> Result<UploadResponse, CloudinaryError>;

    /// Destroy an asset with the signed form `params`.
    async fn destroy(
        &self,
        resource_type: ResourceType,
        params: BTreeMap<String, String>,
    ) -> Result<DestroyResponse, CloudinaryError>;

    /// Fetch a delivery URL, optionally restricted to a byte range.
    async fn download(
        &self,
        url: &str,
        range: Option<ByteRange>,
    ) -> Result<DownloadStream, CloudinaryError>;

    /// Account usage report.
    async fn usage(&self) -> Result<UsageResponse, CloudinaryError>;
}

/// [`CloudinaryApi`] over HTTPS with reqwest.
pub struct HttpCloudinaryApi {
    client: Client,
    credentials: Credentials,
    api_base: String,
}

impl HttpCloudinaryApi {
    pub fn new(
        credentials: Credentials,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CloudinaryError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, resource_type: ResourceType, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.api_base, self.credentials.cloud_name, resource_type, action
        )
    }

    async fn check(response: Response) -> Result<Response, CloudinaryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);

        Err(CloudinaryError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, CloudinaryError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| CloudinaryError::Decode(e.to_string()))
    }
}

impl Debug for HttpCloudinaryApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HttpCloudinaryApi")
            .field("credentials", &self.credentials)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[async_trait]
impl CloudinaryApi for HttpCloudinaryApi {
    async fn upload(
        &self,
        resource_type: ResourceType,
        params: BTreeMap<String, String>,
        file: UploadFile,
    ) -> Result<UploadResponse, CloudinaryError> {
        let mut part = reqwest::multipart::Part::bytes(file.data.to_vec()).file_name(file.file_name);
        if let Some(content_type) = file.content_type.as_deref() {
            part = part.mime_str(content_type)?;
        }

        let mut form = reqwest::multipart::Form::new();
        for (name, value) in params {
            form = form.text(name, value);
        }
        form = form.part("file", part);

        let response = self
            .client
            .post(self.endpoint(resource_type, "upload"))
            .multipart(form)
            .send()
            .await?;

        Self::decode(Self::check(response).await?).await
    }

    async fn destroy(
        &self,
        resource_type: ResourceType,
        params: BTreeMap<String, String>,
    ) -> Result<DestroyResponse, CloudinaryError> {
        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&params)
            .send()
            .await?;

        Self::decode(Self::check(response).await?).await
    }

    async fn download(
        &self,
        url: &str,
        range: Option<ByteRange>,
    ) -> Result<DownloadStream, CloudinaryError> {
        let mut request = self.client.get(url);
        if let Some(value) = range.and_then(|r| r.header_value()) {
            request = request.header(RANGE, value);
        }

        let response = Self::check(request.send().await?).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CloudinaryError::from));

        Ok(stream.boxed())
    }

    async fn usage(&self) -> Result<UsageResponse, CloudinaryError> {
        let response = self
            .client
            .get(format!(
                "{}/v1_1/{}/usage",
                self.api_base, self.credentials.cloud_name
            ))
            .basic_auth(&self.credentials.api_key, Some(self.credentials.api_secret()))
            .send()
            .await?;

        Self::decode(Self::check(response).await?).await
    }
}
