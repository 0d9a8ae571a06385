//! Stowage Storage Library
//!
//! Pluggable file storage for web applications. The [`Storage`] trait is the
//! contract every backend implements; [`factory`] picks one backend at startup.
//!
//! # Storage keys
//!
//! Keys are opaque, caller-chosen, path-like strings (`a/b/c.png`). Backends never
//! regenerate them. Media backends derive their own addressing from a key through
//! the [`keys`] module: a resource type, a folder and an identifier without the
//! trailing extension.

#[cfg(feature = "storage-cloudinary")]
pub mod cloudinary;
pub mod factory;
pub mod handle;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod signing;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-cloudinary")]
pub use cloudinary::{CloudinaryApi, CloudinaryStorage, HttpCloudinaryApi, UploadAuthorizer};
pub use factory::{create_storage, global, install_global, BackendSelector};
pub use handle::FileHandle;
pub use keys::ResourceType;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use signing::SignatureAlgorithm;
pub use stowage_core::{StorageBackend, StorageConfig};
pub use traits::{
    Acl, ByteRange, ByteStream, Storage, StorageError, StorageResult, StorageUsage, StoreBody,
    UploadAuthorization,
};
