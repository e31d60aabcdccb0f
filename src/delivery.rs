//! Local artifact delivery
//!
//! Saves the finished recording on the clinician's machine. No network is
//! involved, so delivery does not depend on how segment uploads went.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Delivery errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),
}

/// Where finished artifacts go
#[async_trait]
pub trait ArtifactDelivery: Send + Sync {
    /// Save `artifact` under `file_name` and return where it landed
    async fn deliver(&self, file_name: &str, artifact: &[u8]) -> Result<PathBuf, DeliveryError>;
}

/// Saves artifacts into a downloads directory
#[derive(Debug, Clone)]
pub struct DownloadDirectory {
    dir: PathBuf,
}

impl DownloadDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

/// Make a file name safe to join onto a directory
///
/// Path separators and control characters become `_`; the rest is kept verbatim.
pub fn sanitize_file_name(name: &str) -> Result<String, DeliveryError> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return Err(DeliveryError::InvalidFileName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl ArtifactDelivery for DownloadDirectory {
    async fn deliver(&self, file_name: &str, artifact: &[u8]) -> Result<PathBuf, DeliveryError> {
        let path = self.dir.join(sanitize_file_name(file_name)?);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, artifact).await?;
        tracing::info!("Saved recording ({} bytes) to {:?}", artifact.len(), path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_deliver_writes_file() {
        let dir = tempdir().unwrap();
        let downloads = DownloadDirectory::new(dir.path().join("downloads"));

        let path = downloads
            .deliver("U123_Jane Doe.webm", b"artifact")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("downloads").join("U123_Jane Doe.webm"));
        assert_eq!(std::fs::read(&path).unwrap(), b"artifact");
    }

    #[test]
    fn test_sanitize_keeps_names_inside_directory() {
        assert_eq!(sanitize_file_name("U1_A/B.webm").unwrap(), "U1_A_B.webm");
        assert_eq!(sanitize_file_name("..\\x.webm").unwrap(), ".._x.webm");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name(" ").is_err());
    }
}
