use crate::traits::{
    Acl, ByteRange, ByteStream, Storage, StorageError, StorageResult, StoreBody,
    UploadAuthorization,
};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, GetOptions, GetRange, ObjectStore, ObjectStoreExt, PutOptions,
    PutPayload, Result as ObjectResult,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SIGNED_URL_EXPIRES: Duration = Duration::from_secs(60);

/// S3 storage implementation
#[derive(Clone, Debug)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    signed_url_expires: Duration,
    scratch_dir: PathBuf,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// Credentials come from the standard AWS environment. No request is made
    /// until the first storage call.
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO, "https://nyc3.digitaloceanspaces.com" for DigitalOcean Spaces)
    pub fn new(bucket: String, region: String, endpoint_url: Option<String>) -> StorageResult<Self> {
        Self::from_builder(AmazonS3Builder::from_env(), bucket, region, endpoint_url)
    }

    /// Create an S3Storage from a pre-configured builder (explicit credentials, tests).
    pub fn from_builder(
        builder: AmazonS3Builder,
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = builder
            .with_region(region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket,
            region,
            endpoint_url,
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

    /// Base URL of the bucket.
    ///
    /// For AWS S3, uses the virtual-hosted form: https://{bucket}.s3.{region}.amazonaws.com
    /// For S3-compatible providers, uses path-style addressing on the endpoint.
    fn bucket_url(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket)
        } else {
            format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    /// Generate public URL for S3 object
    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), key)
    }

    fn get_range(range: ByteRange) -> Option<GetRange> {
        if range.is_full() {
            return None;
        }
        let start = range.start.unwrap_or(0);
        Some(match range.end {
            Some(end) => GetRange::Bounded(start..end.saturating_add(1)),
            None => GetRange::Offset(start),
        })
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn store(
        &self,
        body: StoreBody,
        key: &str,
        content_type: Option<&str>,
        acl: Option<Acl>,
    ) -> StorageResult<String> {
        let start = std::time::Instant::now();

        // object_store uploads a single payload, so streams are drained first.
        let bytes = body.into_bytes().await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                content_type = ?content_type,
                operation = "store",
                "Failed to read upload body"
            );
            StorageError::upload(key, e)
        })?;
        let size = bytes.len() as u64;

        if let Some(acl) = acl {
            tracing::debug!(key = %key, acl = %acl, "S3 object ACLs follow the bucket policy");
        }

        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        let location = Path::from(key.to_string());
        let result: ObjectResult<_> = self
            .store
            .put_opts(&location, PutPayload::from(bytes), options)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                content_type = ?content_type,
                size_bytes = size,
                operation = "store",
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::upload(key, e)
        })?;

        let url = self.generate_url(key);

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(url)
    }

    async fn get_file_stream(&self, key: &str, range: Option<ByteRange>) -> Option<ByteStream> {
        let start = std::time::Instant::now();
        let location = Path::from(key.to_string());
        let options = GetOptions {
            range: range.and_then(Self::get_range),
            ..Default::default()
        };

        let result = match self.store.get_opts(&location, options).await {
            Ok(result) => result,
            Err(ObjectStoreError::NotFound { .. }) => {
                tracing::debug!(bucket = %self.bucket, key = %key, "S3 object not found");
                return None;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    operation = "get_file_stream",
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                return None;
            }
        };

        let bucket = self.bucket.clone();
        let key = key.to_string();

        let stream = result.into_stream().map(move |res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream download error"
                );
                Err(StorageError::download(&key, e))
            }
        });

        Some(Box::pin(stream))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(_) => {}
            Err(ObjectStoreError::NotFound { .. }) => {
                tracing::debug!(bucket = %self.bucket, key = %key, "S3 object already absent");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    operation = "delete_file",
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::delete(key, e));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
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
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(
                Method::GET,
                &location,
                expires_in.unwrap_or(self.signed_url_expires),
            )
            .await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(url)
    }

    /// S3 uploads are authorized by a presigned PUT URL; the signature travels in
    /// the URL query and the fields list the headers the client must send.
    async fn get_presigned_post(
        &self,
        key: &str,
        acl: Acl,
        max_upload_size: u64,
        content_type: &str,
    ) -> StorageResult<UploadAuthorization> {
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(Method::PUT, &location, self.signed_url_expires)
            .await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), key.to_string());
        fields.insert("acl".to_string(), acl.to_string());
        fields.insert("Content-Type".to_string(), content_type.to_string());
        fields.insert("max_upload_size".to_string(), max_upload_size.to_string());

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            expires_in_secs = self.signed_url_expires.as_secs(),
            "Generated presigned PUT authorization"
        );

        Ok(UploadAuthorization { url, fields })
    }

    fn get_upload_url(&self, _server_side: bool) -> String {
        self.bucket_url()
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }

    fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(endpoint: Option<&str>) -> S3Storage {
        let builder = AmazonS3Builder::new()
            .with_access_key_id("AKIDEXAMPLE")
            .with_secret_access_key("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY");
        S3Storage::from_builder(
            builder,
            "uploads".to_string(),
            "eu-west-1".to_string(),
            endpoint.map(String::from),
        )
        .unwrap()
    }

    #[test]
    fn urls_for_aws() {
        let s3 = storage(None);
        assert_eq!(
            s3.get_url_for_key("a/b.png"),
            "https://uploads.s3.eu-west-1.amazonaws.com/a/b.png"
        );
        assert_eq!(
            s3.get_upload_url(true),
            "https://uploads.s3.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn urls_for_compatible_endpoint() {
        let s3 = storage(Some("http://localhost:9000/"));
        assert_eq!(
            s3.get_url_for_key("a/b.png"),
            "http://localhost:9000/uploads/a/b.png"
        );
    }

    #[test]
    fn byte_ranges_map_to_get_ranges() {
        assert_eq!(S3Storage::get_range(ByteRange::default()), None);
        assert_eq!(
            S3Storage::get_range(ByteRange::new(Some(2), Some(5))),
            Some(GetRange::Bounded(2..6))
        );
        assert_eq!(
            S3Storage::get_range(ByteRange::new(Some(7), None)),
            Some(GetRange::Offset(7))
        );
    }

    #[tokio::test]
    async fn signed_url_is_signed_and_expires() {
        let s3 = storage(None);
        let url = s3
            .get_signed_url("a/b.png", Some(Duration::from_secs(300)))
            .await
            .unwrap();
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=300"));
        assert!(!url.contains("wJalrXUtnFEMI"));
    }

    #[tokio::test]
    async fn presigned_post_uses_put_url() {
        let s3 = storage(None);
        let auth = s3
            .get_presigned_post("a/b.png", Acl::Private, 2048, "image/png")
            .await
            .unwrap();
        assert!(auth.url.starts_with("https://uploads.s3.eu-west-1.amazonaws.com/a/b.png?"));
        assert!(auth.url.contains("X-Amz-Signature="));
        assert_eq!(auth.fields["Content-Type"], "image/png");
        assert_eq!(auth.fields["key"], "a/b.png");
        assert!(!auth.fields.values().any(|v| v.contains("wJalrXUtnFEMI")));
    }
}
