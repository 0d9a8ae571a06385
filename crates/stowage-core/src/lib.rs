//! Stowage Core Library
//!
//! This crate provides the configuration and backend identifiers shared by the
//! storage crate and the command-line tooling.

pub mod config;
pub mod storage_types;

// Re-export commonly used types
pub use config::StorageConfig;
pub use storage_types::StorageBackend;
