//! Uploaded Asset Store
//!
//! Persists multipart image/avatar uploads under the uploads directory and
//! releases them when their owning record goes away. Filenames follow the
//! `<millis>-<random><ext>` convention the web client already links to.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::warn;

use crate::error::ApiError;

pub const PUBLIC_PREFIX: &str = "/uploads/";

#[derive(Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one uploaded file and return its public path.
    pub async fn store(&self, original_name: &str, bytes: &[u8]) -> Result<String, ApiError> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let unique = format!(
            "{}-{}{}",
            chrono::Utc::now().timestamp_millis(),
            rand::thread_rng().gen_range(0..1_000_000_000u32),
            ext
        );

        tokio::fs::write(self.dir.join(&unique), bytes).await?;
        Ok(format!("{}{}", PUBLIC_PREFIX, unique))
    }

    /// Best-effort release of an asset by its public path. Paths outside the
    /// uploads prefix (seed data, external URLs) are ignored.
    pub async fn remove(&self, public_path: &str) {
        let Some(filename) = public_path.strip_prefix(PUBLIC_PREFIX) else {
            return;
        };
        // Reject anything that could escape the uploads directory
        if filename.contains('/') || filename.contains("..") {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(self.dir.join(filename)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove upload {}: {}", public_path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path().join("uploads")).await.unwrap();

        let path = uploads.store("photo.jpg", b"fake image data").await.unwrap();
        assert!(path.starts_with(PUBLIC_PREFIX));
        assert!(path.ends_with(".jpg"));

        let filename = path.strip_prefix(PUBLIC_PREFIX).unwrap();
        let on_disk = uploads.dir().join(filename);
        assert!(on_disk.exists());

        uploads.remove(&path).await;
        assert!(!on_disk.exists());
    }

    #[tokio::test]
    async fn test_remove_ignores_foreign_paths() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path().join("uploads")).await.unwrap();

        // No panic, no traversal
        uploads.remove("/avatars/default.png").await;
        uploads.remove("/uploads/../secret").await;
    }

    #[tokio::test]
    async fn test_extensionless_upload() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path().join("uploads")).await.unwrap();

        let path = uploads.store("blob", b"data").await.unwrap();
        assert!(!path.ends_with('.'));
    }
}
