use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use murmur_types::AttachmentRef;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MurmurError, Result};

/// External store for attachment bytes. Messages only carry the reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<AttachmentRef>;

    async fn get(&self, reference: &str) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<AttachmentRef> {
        let reference = Uuid::new_v4().to_string();
        self.blobs
            .lock()
            .map_err(|_| MurmurError::Blob("blob map poisoned".into()))?
            .insert(reference.clone(), bytes.to_vec());

        Ok(AttachmentRef {
            reference,
            name: name.to_string(),
        })
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .map_err(|_| MurmurError::Blob("blob map poisoned".into()))?
            .get(reference)
            .cloned()
            .ok_or_else(|| MurmurError::Blob(format!("no blob {}", reference)))
    }
}

/// Content-addressed files under one directory, each named by the SHA-256
/// hex of its bytes. Storing the same bytes twice writes once.
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MurmurError::Blob(format!("cannot create {}: {}", dir.display(), e)))?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf> {
        let valid = reference.len() == 64 && reference.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(MurmurError::Blob(format!("malformed blob reference {:?}", reference)));
        }
        Ok(self.dir.join(reference))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<AttachmentRef> {
        let reference = hex::encode(Sha256::digest(bytes));
        let path = self.path_for(&reference)?;

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Blob {} already stored", reference);
        } else {
            // The hash-named file only ever holds complete contents.
            let tmp = self.dir.join(format!("{}.{}.tmp", reference, Uuid::new_v4()));
            fs::write(&tmp, bytes)
                .await
                .map_err(|e| MurmurError::Blob(format!("write failed: {}", e)))?;
            fs::rename(&tmp, &path)
                .await
                .map_err(|e| MurmurError::Blob(format!("rename failed: {}", e)))?;
            debug!("Stored blob {} ({} bytes)", reference, bytes.len());
        }

        Ok(AttachmentRef {
            reference,
            name: name.to_string(),
        })
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.path_for(reference)?;
        fs::read(&path)
            .await
            .map_err(|e| MurmurError::Blob(format!("read {} failed: {}", reference, e)))
    }
}
