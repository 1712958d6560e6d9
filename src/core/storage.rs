//! Local object storage.
//!
//! Objects live under `<root>/<bucket>/<path>` and are published by the web
//! server under `<public_url>/storage/<bucket>/<path>`.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

pub const PHOTO_BUCKET: &str = "youth-photos";
pub const TAG_BUCKET: &str = "tags";
pub const ADMIN_TAG_PREFIX: &str = "admin_tags";

pub struct Storage {
    root: PathBuf,
    public_url: String,
}

/// Location of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub bucket: String,
    pub path: String,
    pub public_url: String,
}

impl Storage {
    pub fn new(root: PathBuf, public_url: &str) -> Self {
        Self {
            root,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if !is_plain || path.is_empty() || bucket.contains(['/', '\\', '.']) {
            return Err(Error::Validation(format!("Invalid storage path {}", path)));
        }

        Ok(self.root.join(bucket).join(relative))
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/{}/{}", self.public_url, bucket, path)
    }

    /// Writes an object, replacing any existing object at the same path.
    pub async fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<StoredObject> {
        let local = self.local_path(bucket, path)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, bytes).await?;

        log::debug!("Stored {}/{} ({} bytes)", bucket, path, bytes.len());

        Ok(StoredObject {
            bucket: bucket.to_string(),
            path: path.to_string(),
            public_url: self.public_url(bucket, path),
        })
    }

    pub async fn remove(&self, bucket: &str, path: &str) -> Result<()> {
        let local = self.local_path(bucket, path)?;
        match tokio::fs::remove_file(&local).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists object names directly under `prefix`, sorted by name.
    pub async fn list(&self, bucket: &str, prefix: &str, limit: usize) -> Result<Vec<StoredObject>> {
        let dir = self.local_path(bucket, prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        names.truncate(limit);

        Ok(names
            .into_iter()
            .map(|name| {
                let path = format!("{}/{}", prefix, name);
                StoredObject {
                    bucket: bucket.to_string(),
                    public_url: self.public_url(bucket, &path),
                    path,
                }
            })
            .collect())
    }

    /// Reads an object back from one of this storage's public links.
    pub async fn read_url(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let prefix = format!("{}/storage/", self.public_url);
        let Some(rest) = url.strip_prefix(&prefix) else {
            return Ok(None);
        };
        let rest = rest.split('?').next().unwrap_or_default();
        let Some((bucket, path)) = rest.split_once('/') else {
            return Ok(None);
        };

        let local = self.local_path(bucket, path)?;
        match tokio::fs::read(&local).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_list_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf(), "http://host:1/");

        let obj = storage
            .put(TAG_BUCKET, "admin_tags/jane_1.png", b"png")
            .await
            .unwrap();
        assert_eq!(obj.public_url, "http://host:1/storage/tags/admin_tags/jane_1.png");

        let listed = storage.list(TAG_BUCKET, ADMIN_TAG_PREFIX, 500).await.unwrap();
        assert_eq!(listed, vec![obj.clone()]);

        let bytes = storage.read_url(&format!("{}?download=1", obj.public_url)).await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"png"[..]));
        assert!(storage.read_url("https://elsewhere/x.png").await.unwrap().is_none());

        storage.remove(TAG_BUCKET, &obj.path).await.unwrap();
        assert!(storage.list(TAG_BUCKET, ADMIN_TAG_PREFIX, 500).await.unwrap().is_empty());
        // Removing twice is fine
        storage.remove(TAG_BUCKET, &obj.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf(), "http://host");

        assert!(storage.put(PHOTO_BUCKET, "../escape.jpg", b"x").await.is_err());
        assert!(storage.put("..", "x.jpg", b"x").await.is_err());
        assert!(storage.put(PHOTO_BUCKET, "/abs.jpg", b"x").await.is_err());
    }
}
