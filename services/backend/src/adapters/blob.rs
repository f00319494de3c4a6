//! services/backend/src/adapters/blob.rs
//!
//! A `BlobStore` on the local filesystem. Blobs are written under a root directory
//! and addressed by `file://` URLs relative to it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use notenest_core::ports::{BlobStore, PortError, PortResult};
use tracing::debug;
use uuid::Uuid;

const SCHEME: &str = "file://";

#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Keeps the readable tail of a suggested name and drops anything that could
    /// escape the root.
    fn sanitize(suggested_name: &str) -> String {
        let name: String = suggested_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = name.trim_start_matches('.');
        if name.is_empty() {
            "blob".to_string()
        } else {
            name.to_string()
        }
    }

    fn resolve(&self, url: &str) -> PortResult<PathBuf> {
        let relative = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| PortError::NotFound(format!("Not a local blob URL: {}", url)))?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PortError::NotFound(format!("Not a local blob URL: {}", url)));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(e: std::io::Error, url: &str) -> PortError {
    match e.kind() {
        std::io::ErrorKind::NotFound => PortError::NotFound(url.to_string()),
        _ => PortError::Unexpected(format!("{}: {}", url, e)),
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_blob(&self, data: Bytes, suggested_name: &str) -> PortResult<String> {
        let shard = Uuid::new_v4().simple().to_string();
        let relative = format!("{}/{}", shard, Self::sanitize(suggested_name));
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        debug!(path = %path.display(), bytes = data.len(), "Blob stored");
        Ok(format!("{}{}", SCHEME, relative))
    }

    async fn get_blob(&self, url: &str) -> PortResult<Bytes> {
        let path = self.resolve(url)?;
        let data = tokio::fs::read(&path).await.map_err(|e| io_error(e, url))?;
        Ok(Bytes::from(data))
    }

    /// Deleting a blob that is already gone succeeds.
    async fn delete_blob(&self, url: &str) -> PortResult<()> {
        let path = self.resolve(url)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(e, url)),
        }
        if let Some(dir) = path.parent() {
            // Only succeeds when the shard directory is empty.
            let _ = tokio::fs::remove_dir(dir).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("notenest-blobs-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn stores_reads_and_deletes() {
        let root = temp_root();
        let store = LocalBlobStore::new(&root);
        let url = store
            .put_blob(Bytes::from_static(b"lecture"), "notes/1700000000_week 1.pdf")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("week_1.pdf"));
        assert_eq!(store.get_blob(&url).await.unwrap(), Bytes::from_static(b"lecture"));

        store.delete_blob(&url).await.unwrap();
        assert!(matches!(store.get_blob(&url).await, Err(PortError::NotFound(_))));
        store.delete_blob(&url).await.unwrap();
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn rejects_urls_outside_the_root() {
        let store = LocalBlobStore::new(temp_root());
        assert!(store.get_blob("file://../etc/passwd").await.is_err());
        assert!(store.get_blob("https://example.com/x.pdf").await.is_err());
        assert!(store.delete_blob("file:///etc/passwd").await.is_err());
    }
}
