use base64::{engine::general_purpose::STANDARD, Engine as _};
use stowage_storage::cloudinary::CloudinaryError;

/// A 1x1 transparent PNG, used for upload round trips.
pub const PROBE_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Decoded bytes of [`PROBE_PNG_BASE64`].
pub fn probe_png() -> anyhow::Result<Vec<u8>> {
    Ok(STANDARD.decode(PROBE_PNG_BASE64)?)
}

/// Replace every character of a secret with `*`.
pub fn mask_secret(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

/// Human-readable size in megabytes with two decimals.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Operator hint for a vendor HTTP status seen during `check`.
pub fn status_hint(status: u16) -> Option<&'static str> {
    match status {
        401 => Some(
            "This usually means invalid API credentials. \
             Double-check CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET.",
        ),
        403 => Some(
            "This usually means insufficient permissions. \
             Check your Cloudinary account settings.",
        ),
        _ => None,
    }
}

/// First vendor HTTP status found in an error chain.
pub fn vendor_status(err: &anyhow::Error) -> Option<u16> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CloudinaryError>())
        .and_then(CloudinaryError::status)
}


/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
