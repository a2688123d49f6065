//! Deployment content stores

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

use super::ContentRepository;
use crate::protocol::ContentHash;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the content hash of an in-memory byte slice
pub fn content_hash_of(data: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(data).to_vec())
}

/// Stores content on disk under `<root>/<first two hex digits>/<rest>/content`
pub struct FileContentRepository {
    root: PathBuf,
}

impl FileContentRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where content with this hash lives
    pub fn content_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        let (prefix, rest) = hex.split_at(2.min(hex.len()));
        self.root.join(prefix).join(rest).join("content")
    }
}

#[async_trait]
impl ContentRepository for FileContentRepository {
    async fn add_deployment_content(
        &self,
        name: &str,
        runtime_name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> io::Result<ContentHash> {
        fs::create_dir_all(&self.root).await?;
        let staging = self.root.join(format!(".upload-{}", uuid::Uuid::new_v4()));

        let mut hasher = Sha256::new();
        let mut total = 0u64;
        {
            let mut file = fs::File::create(&staging).await?;
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        drop(file);
                        let _ = fs::remove_file(&staging).await;
                        return Err(e);
                    }
                };
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                total += n as u64;
            }
            file.flush().await?;
        }

        let hash = ContentHash(hasher.finalize().to_vec());
        let target = self.content_path(&hash);
        if fs::try_exists(&target).await? {
            fs::remove_file(&staging).await?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&staging, &target).await?;
        }

        tracing::info!(
            "Stored deployment {} ({}): {} bytes, hash {}",
            name,
            runtime_name,
            total,
            hash
        );
        Ok(hash)
    }

    async fn has_content(&self, hash: &ContentHash) -> bool {
        fs::try_exists(self.content_path(hash)).await.unwrap_or(false)
    }
}

/// Keeps content in memory
#[derive(Default)]
pub struct MemoryContentRepository {
    blobs: RwLock<HashMap<Vec<u8>, Bytes>>,
}

impl MemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, hash: &ContentHash) -> Option<Bytes> {
        self.blobs.read().await.get(hash.as_bytes()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl ContentRepository for MemoryContentRepository {
    async fn add_deployment_content(
        &self,
        name: &str,
        _runtime_name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> io::Result<ContentHash> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let hash = content_hash_of(&data);
        tracing::debug!("Stored deployment {} in memory: {} bytes", name, data.len());
        self.blobs
            .write()
            .await
            .insert(hash.as_bytes().to_vec(), Bytes::from(data));
        Ok(hash)
    }

    async fn has_content(&self, hash: &ContentHash) -> bool {
        self.blobs.read().await.contains_key(hash.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash_of(b"hello").to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_file_repository_stores_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileContentRepository::new(dir.path());
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 255) as u8).collect();

        let mut cursor = &data[..];
        let hash = repo
            .add_deployment_content("app.war", "app.war", &mut cursor)
            .await
            .unwrap();
        assert_eq!(hash, content_hash_of(&data));
        assert!(repo.has_content(&hash).await);

        let stored = fs::read(repo.content_path(&hash)).await.unwrap();
        assert!(stored == data);

        // Same bytes again land on the same path
        let mut cursor = &data[..];
        let again = repo
            .add_deployment_content("copy.war", "copy.war", &mut cursor)
            .await
            .unwrap();
        assert_eq!(again, hash);
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryContentRepository::new();
        let mut cursor = &b"abc"[..];
        let hash = repo
            .add_deployment_content("a", "a", &mut cursor)
            .await
            .unwrap();
        assert!(repo.has_content(&hash).await);
        assert_eq!(repo.get(&hash).await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(repo.len().await, 1);
        assert!(!repo.has_content(&content_hash_of(b"other")).await);
    }
}
