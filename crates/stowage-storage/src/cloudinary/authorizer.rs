//! Request signing and direct-upload authorizations for Cloudinary.

use super::client::Credentials;
use crate::keys;
use crate::signing::{self, SignatureAlgorithm};
use crate::traits::UploadAuthorization;
use std::collections::BTreeMap;

/// Signs Cloudinary requests and builds direct-upload authorizations.
///
/// Holds the account secret; everything it returns is safe to hand to a client.
#[derive(Debug, Clone)]
pub struct UploadAuthorizer {
    credentials: Credentials,
    api_base: String,
    algorithm: SignatureAlgorithm,
}

impl UploadAuthorizer {
    pub fn new(credentials: Credentials, api_base: impl Into<String>) -> Self {
        Self {
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            algorithm: SignatureAlgorithm::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn cloud_name(&self) -> &str {
        &self.credentials.cloud_name
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// `{api_base}/v1_1/{cloud}/{resource_type}/{action}`
    pub fn endpoint(&self, resource: &str, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.api_base, self.credentials.cloud_name, resource, action
        )
    }

    pub fn sign(&self, params: &BTreeMap<String, String>) -> String {
        signing::sign_params(params, self.credentials.api_secret(), self.algorithm)
    }

    /// Add `signature` and `api_key` to a parameter map.
    pub fn sign_into(&self, params: &mut BTreeMap<String, String>) {
        let signature = self.sign(params);
        params.insert("signature".to_string(), signature);
        params.insert("api_key".to_string(), self.credentials.api_key.clone());
    }

    /// Check that `fields` carries a signature made with this account's secret.
    pub fn verify(&self, fields: &BTreeMap<String, String>) -> bool {
        signing::verify_signature(fields, self.credentials.api_secret(), self.algorithm)
    }

    /// Authorization for a direct upload of `key`, stamped with the current time.
    pub fn authorize(&self, key: &str, content_type: &str) -> UploadAuthorization {
        self.authorize_at(key, content_type, signing::unix_timestamp())
    }

    pub fn authorize_at(&self, key: &str, content_type: &str, timestamp: u64) -> UploadAuthorization {
        let resource_type = keys::classify(Some(content_type));

        let mut fields = BTreeMap::new();
        fields.insert("timestamp".to_string(), timestamp.to_string());
        fields.insert("public_id".to_string(), keys::identifier_of(key).to_string());
        fields.insert("resource_type".to_string(), resource_type.to_string());
        fields.insert("folder".to_string(), keys::folder_of(key).to_string());
        if let Some(transformation) = keys::transformation_for(resource_type) {
            fields.insert("transformation".to_string(), transformation.to_string());
        }

        self.sign_into(&mut fields);

        UploadAuthorization {
            url: self.endpoint(resource_type.as_str(), "upload"),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "top-secret-api-secret-value";

    fn authorizer() -> UploadAuthorizer {
        UploadAuthorizer::new(
            Credentials::new("demo".to_string(), "1234567890".to_string(), SECRET.to_string()),
            "https://api.cloudinary.com/",
        )
    }

    #[test]
    fn image_authorization_fields() {
        let auth = authorizer().authorize_at("docs/avatars/me.png", "image/png", 1_700_000_000);

        assert_eq!(auth.url, "https://api.cloudinary.com/v1_1/demo/image/upload");
        assert_eq!(auth.fields["timestamp"], "1700000000");
        assert_eq!(auth.fields["public_id"], "docs/avatars/me");
        assert_eq!(auth.fields["folder"], "docs/avatars");
        assert_eq!(auth.fields["resource_type"], "image");
        assert_eq!(auth.fields["transformation"], "f_auto,q_auto");
        assert_eq!(auth.fields["api_key"], "1234567890");
        assert!(auth.fields.contains_key("signature"));
    }

    #[test]
    fn non_image_has_no_transformation() {
        let auth = authorizer().authorize_at("report.pdf", "application/pdf", 1_700_000_000);

        assert_eq!(auth.url, "https://api.cloudinary.com/v1_1/demo/raw/upload");
        assert_eq!(auth.fields["folder"], "");
        assert_eq!(auth.fields["public_id"], "report");
        assert!(!auth.fields.contains_key("transformation"));
    }

    #[test]
    fn secret_never_in_fields() {
        let auth = authorizer().authorize("a/b/c.mp4", "video/mp4");
        assert!(auth.fields.values().all(|v| !v.contains(SECRET)));
        assert!(!auth.url.contains(SECRET));
        let json = serde_json::to_string(&auth).unwrap();
        assert!(!json.contains(SECRET));
    }

    #[test]
    fn signature_reproducible_from_fields() {
        let authorizer = authorizer();
        let auth = authorizer.authorize_at("a/b/c.png", "image/png", 1_700_000_000);

        let mut params = auth.fields.clone();
        let signature = params.remove("signature").unwrap();
        assert_eq!(authorizer.sign(&params), signature);
        assert!(authorizer.verify(&auth.fields));

        let mut tampered = auth.fields.clone();
        tampered.insert("public_id".to_string(), "a/b/other".to_string());
        assert!(!authorizer.verify(&tampered));
    }

    #[test]
    fn sha256_authorizations() {
        let authorizer = authorizer().with_algorithm(SignatureAlgorithm::Sha256);
        let auth = authorizer.authorize_at("c.png", "image/png", 1);
        assert_eq!(auth.fields["signature"].len(), 64);
        assert!(authorizer.verify(&auth.fields));
    }
}
