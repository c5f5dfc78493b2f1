//! Persistence port for rendered images.
//!
//! The pipeline only needs a key and an access URL back; where the bytes
//! actually live is not its concern.

use std::path::PathBuf;

use uuid::Uuid;

use crate::error::FourcutError;

/// Reference to one stored artifact.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub key: String,
    pub url: String,
}

pub trait ArtifactStore {
    async fn save(
        &self,
        job_id: &str,
        cut_index: u32,
        bytes: &[u8],
    ) -> Result<StoredArtifact, FourcutError>;
}

/// Stores artifacts as PNG files under a local directory and hands back
/// `file://` URLs.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for LocalArtifactStore {
    async fn save(
        &self,
        job_id: &str,
        cut_index: u32,
        bytes: &[u8],
    ) -> Result<StoredArtifact, FourcutError> {
        let file_id = Uuid::new_v4().simple().to_string();
        let key = format!("jobs/{job_id}/cut-{cut_index:02}-{file_id}.png");
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let absolute = std::path::absolute(&path)?;
        Ok(StoredArtifact {
            key,
            url: format!("file://{}", absolute.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_writes_file_and_returns_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let stored = store.save("job-1", 3, b"png-bytes").await.unwrap();

        assert!(stored.key.starts_with("jobs/job-1/cut-03-"));
        assert!(stored.key.ends_with(".png"));
        assert!(stored.url.starts_with("file://"));
        let on_disk = std::fs::read(dir.path().join(&stored.key)).unwrap();
        assert_eq!(on_disk, b"png-bytes");
    }

    #[tokio::test]
    async fn saves_for_the_same_cut_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let first = store.save("job-1", 1, b"one").await.unwrap();
        let second = store.save("job-1", 1, b"two").await.unwrap();

        assert_ne!(first.key, second.key);
        assert_eq!(std::fs::read(dir.path().join(&first.key)).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join(&second.key)).unwrap(), b"two");
    }
}
