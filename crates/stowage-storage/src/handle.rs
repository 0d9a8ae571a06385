//! Local materialization of remote objects.

use crate::traits::{ByteStream, StorageError, StorageResult};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A temporary local copy of a stored object.
///
/// The file lives in its own temporary directory. Call [`FileHandle::cleanup`] when
/// done; if the handle is dropped instead, the directory is removed on drop.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl FileHandle {
    /// Write `stream` into a fresh temporary file under `scratch_dir`.
    ///
    /// A stream error aborts the write; the partial file and its directory are
    /// removed before the error is returned.
    pub async fn materialize(
        key: &str,
        mut stream: ByteStream,
        scratch_dir: &Path,
    ) -> StorageResult<Self> {
        let start = std::time::Instant::now();

        let dir = tempfile::Builder::new()
            .prefix("stowage-")
            .tempdir_in(scratch_dir)?;
        let path = dir.path().join("tmp");

        let mut file = fs::File::create(&path).await?;
        let mut size: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        key = %key,
                        operation = "get_file_handle",
                        size_bytes = size,
                        "Stream failed while materializing file"
                    );
                    drop(file);
                    return Err(e);
                }
            };
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        tracing::debug!(
            key = %key,
            path = %path.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Materialized file handle"
        );

        Ok(FileHandle {
            path,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the temporary file and its directory.
    pub async fn cleanup(mut self) -> StorageResult<()> {
        if let Some(dir) = self.dir.take() {
            tokio::task::spawn_blocking(move || dir.close())
                .await
                .map_err(|e| StorageError::BackendError(format!("cleanup task failed: {}", e)))??;
        }
        Ok(())
    }
}
