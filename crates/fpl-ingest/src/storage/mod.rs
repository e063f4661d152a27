//! Object storage for staged table files
//!
//! Staged objects are addressed by key inside one bucket. [`S3Storage`]
//! talks to S3-compatible services; [`LocalStorage`] keeps the same layout
//! under a directory for local runs.

use async_trait::async_trait;

use crate::codec::encode_rows;
use crate::config::FileType;
use crate::error::Result;
use crate::table::Table;

pub mod config;
pub mod local;
pub mod s3;

pub use config::{StorageBackend, StorageConfig};
pub use local::LocalStorage;
pub use s3::S3Storage;

/// Reference to one stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub key: String,
    /// Fully qualified location, e.g. `s3://bucket/key`
    pub uri: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Handle for `key` without touching the store
    fn handle(&self, key: &str) -> ObjectHandle;

    async fn write_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<ObjectHandle>;

    /// Encode `table` as `file_type` and store it under `key`
    async fn write(&self, table: &Table, key: &str, file_type: FileType) -> Result<ObjectHandle> {
        let data = encode_rows(table, file_type)?;
        self.write_bytes(key, data, file_type.content_type()).await
    }

    async fn read(&self, handle: &ObjectHandle) -> Result<Vec<u8>>;

    async fn exists(&self, handle: &ObjectHandle) -> Result<bool>;

    /// Objects whose key starts with `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHandle>>;
}
