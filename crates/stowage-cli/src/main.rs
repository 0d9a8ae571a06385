//! Stowage CLI: checks and exercises the configured storage backend.
//!
//! Reads the same environment as the hosting application (`FILE_STORAGE`, backend
//! credentials, `.env`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use stowage_cli::{
    format_megabytes, init_tracing, mask_secret, probe_png, status_hint, vendor_status,
};
use stowage_core::{StorageBackend, StorageConfig};
use stowage_storage::{Acl, BackendSelector, Storage, StoreBody};

#[derive(Parser)]
#[command(name = "stowage", about = "Stowage storage backend CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration, report usage and run a store/delete round trip
    Check {
        /// Only validate configuration and credentials
        #[arg(long)]
        skip_upload: bool,
    },
    /// Print the direct URL for a key
    Url {
        /// Object key
        key: String,
    },
    /// Print a time-limited signed URL for a key
    SignedUrl {
        /// Object key
        key: String,
        /// Expiry in seconds (defaults to FILE_STORAGE_SIGNED_URL_EXPIRES)
        #[arg(long)]
        expires: Option<u64>,
    },
    /// Print a direct-upload authorization for a key
    SignUpload {
        /// Object key
        key: String,
        /// Declared content type
        #[arg(long, default_value = "image/png")]
        content_type: String,
        /// private or public-read
        #[arg(long, default_value = "private")]
        acl: String,
        /// Maximum upload size in bytes
        #[arg(long, default_value_t = 10 * 1024 * 1024)]
        max_size: u64,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn print_credentials(config: &StorageConfig, backend: StorageBackend) {
    match backend {
        StorageBackend::Cloudinary => {
            println!(
                "   - CLOUDINARY_CLOUD_NAME: {}",
                config.cloudinary_cloud_name().unwrap_or_default()
            );
            println!(
                "   - CLOUDINARY_API_KEY: {}",
                config.cloudinary_api_key().unwrap_or_default()
            );
            println!(
                "   - CLOUDINARY_API_SECRET: {}",
                mask_secret(config.cloudinary_api_secret().unwrap_or_default())
            );
        }
        StorageBackend::S3 => {
            println!("   - S3_BUCKET: {}", config.s3_bucket().unwrap_or_default());
            println!(
                "   - S3_REGION: {}",
                config
                    .s3_region()
                    .or_else(|| config.aws_region())
                    .unwrap_or_default()
            );
            if let Some(endpoint) = config.s3_endpoint() {
                println!("   - S3_ENDPOINT: {}", endpoint);
            }
        }
        StorageBackend::Local => {
            println!(
                "   - LOCAL_STORAGE_PATH: {}",
                config.local_storage_path().unwrap_or_default()
            );
            println!(
                "   - LOCAL_STORAGE_BASE_URL: {}",
                config.local_storage_base_url().unwrap_or_default()
            );
            println!(
                "   - LOCAL_STORAGE_SIGNING_SECRET: {}",
                mask_secret(config.local_storage_signing_secret().unwrap_or_default())
            );
        }
    }
}

async fn check(config: &StorageConfig, skip_upload: bool) -> anyhow::Result<()> {
    let selector = BackendSelector::new(config);
    let backend = selector.resolve();

    println!("Checking {} storage configuration...", backend);

    let missing = config.missing_for(backend);
    if !missing.is_empty() {
        for name in &missing {
            println!("   - missing {}", name);
        }
        anyhow::bail!("{} storage is not configured", backend);
    }

    println!("All required environment variables found");
    print_credentials(config, backend);

    let storage = selector
        .build()
        .await
        .context("Failed to initialize storage backend")?;

    if let Some(usage) = storage.usage().await.context("Failed to fetch usage")? {
        println!("Connected to {}", backend);
        if let Some(plan) = &usage.plan {
            println!("   - Plan: {}", plan);
        }
        if let (Some(used), Some(limit)) = (usage.credits_used, usage.credits_limit) {
            println!("   - Credits used: {} / {}", used, limit);
        }
        if let Some(bytes) = usage.storage_bytes {
            println!("   - Storage used: {}", format_megabytes(bytes));
        }
        if let Some(bytes) = usage.bandwidth_bytes {
            println!("   - Bandwidth used: {} this month", format_megabytes(bytes));
        }
    }

    if skip_upload {
        return Ok(());
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let key = format!("stowage-check-{}.png", timestamp);
    let png = probe_png()?;

    println!("Uploading {}...", key);
    let url = storage
        .store(
            StoreBody::from(png.clone()),
            &key,
            Some("image/png"),
            Some(Acl::PublicRead),
        )
        .await
        .context("Test upload failed")?;
    println!("   - URL: {}", url);
    println!("   - Size: {} bytes", png.len());

    let readback = read_all(storage.as_ref(), &key).await;
    match readback {
        Some(bytes) => println!("   - Read back {} bytes", bytes.len()),
        None => println!("   - Read back unavailable (object may not be publicly readable)"),
    }

    println!("Cleaning up test file...");
    storage
        .delete_file(&key)
        .await
        .context("Failed to delete test file")?;
    println!("Test file deleted");

    println!("{} storage is ready to use", backend);
    Ok(())
}

async fn read_all(storage: &dyn Storage, key: &str) -> Option<Vec<u8>> {
    let mut stream = storage.get_file_stream(key, None).await?;
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk.ok()?);
    }
    Some(data)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = StorageConfig::from_env().context("Failed to load storage configuration")?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { skip_upload } => {
            if let Err(e) = check(&config, skip_upload).await {
                if let Some(hint) = vendor_status(&e).and_then(status_hint) {
                    eprintln!("{}", hint);
                }
                return Err(e);
            }
        }
        Commands::Url { key } => {
            let storage = BackendSelector::new(&config).build().await?;
            print_json(&serde_json::json!({ "url": storage.get_url_for_key(&key) }))?;
        }
        Commands::SignedUrl { key, expires } => {
            let storage = BackendSelector::new(&config).build().await?;
            let url = storage
                .get_signed_url(&key, expires.map(Duration::from_secs))
                .await?;
            print_json(&serde_json::json!({ "url": url }))?;
        }
        Commands::SignUpload {
            key,
            content_type,
            acl,
            max_size,
        } => {
            let storage = BackendSelector::new(&config).build().await?;
            let acl: Acl = acl.parse().unwrap_or_default();
            let authorization = storage
                .get_presigned_post(&key, acl, max_size, &content_type)
                .await?;
            print_json(&authorization)?;
        }
    }

    Ok(())
}
