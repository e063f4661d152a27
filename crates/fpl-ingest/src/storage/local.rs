use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{ObjectHandle, ObjectStorage};
use crate::error::Result;

/// Directory-backed storage: key `a/b.csv` lives at `<root>/<bucket>/a/b.csv`
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    bucket: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.bucket_dir(), |path, part| path.join(part))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn handle(&self, key: &str) -> ObjectHandle {
        ObjectHandle {
            key: key.to_string(),
            uri: format!("file://{}", self.path_for(key).display()),
        }
    }

    #[instrument(skip(self, data))]
    async fn write_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<ObjectHandle> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Wrote object");
        Ok(self.handle(key))
    }

    async fn read(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(&handle.key)).await?)
    }

    async fn exists(&self, handle: &ObjectHandle) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(&handle.key)).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHandle>> {
        let base = self.bucket_dir();
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = relative_key(&base, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys.iter().map(|k| self.handle(k)).collect())
    }
}

fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}
