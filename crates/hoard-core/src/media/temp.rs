//! Temporary download files that hash while they are written.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Hash and length of fully written content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256.
    pub hash: String,
    pub size: u64,
}

/// `download-<unix nanos>-<16 hex chars>`
pub fn temp_file_name() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("download-{nanos}-{}", hex::encode(suffix))
}

/// A file under the archive temp directory.
///
/// Bytes pass through a rolling SHA-256 as they are written. The file is
/// removed when the guard drops, whatever happened in between.
#[derive(Debug)]
pub struct TempDownload {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    hasher: Sha256,
    size: u64,
}

impl TempDownload {
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(temp_file_name());
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Some(file),
            hasher: Sha256::new(),
            size: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(crate::Error::Other(format!(
                "temp file {} already finished",
                self.path.display()
            )));
        };
        file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flush and close the file, returning the digest of everything written.
    pub async fn finish(&mut self) -> Result<ContentDigest> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        let hash = hex::encode(self.hasher.finalize_reset());
        Ok(ContentDigest {
            hash,
            size: self.size,
        })
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove temp download");
        }
    }
}
