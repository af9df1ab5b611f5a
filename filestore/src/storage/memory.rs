use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{drain, ObjectReader, Storage, UploadedFile};
use crate::driver::Driver;
use crate::error::{Result, StorageError};
use crate::file::LocalFile;
use crate::path::{join_object_path, validate_directory_path};

const URL_SCHEME: &str = "mem://";

struct Entry {
    name: String,
    content: Bytes,
}

impl Entry {
    fn new(name: &str, content: Bytes) -> Self {
        Self {
            name: name.to_string(),
            content,
        }
    }
}

/// In-process store. Directories are simulated by path convention only and
/// there is no file descriptor to hand out, so `open` is unsupported.
#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn driver(&self) -> Driver {
        Driver::Memory
    }

    async fn read(&self, path: &str) -> Result<ObjectReader> {
        let files = self.files.read().await;
        let entry = files
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        debug!(name = %entry.name, size = entry.content.len(), "Reading memory object");
        Ok(Box::new(Cursor::new(entry.content.clone())))
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut files = self.files.write().await;
        files.insert(
            path.to_string(),
            Entry::new(path, Bytes::copy_from_slice(contents)),
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut files = self.files.write().await;
        files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.read().await.contains_key(path))
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut files = self.files.write().await;
        let mut entry = files
            .remove(old_path)
            .ok_or_else(|| StorageError::NotFound(old_path.to_string()))?;
        entry.name = new_path.to_string();
        files.insert(new_path.to_string(), entry);
        Ok(())
    }

    async fn copy(&self, source_path: &str, destination_path: &str) -> Result<()> {
        // Exclusive: the map is mutated.
        let mut files = self.files.write().await;
        let content = files
            .get(source_path)
            .map(|entry| entry.content.clone())
            .ok_or_else(|| StorageError::NotFound(source_path.to_string()))?;
        files.insert(
            destination_path.to_string(),
            Entry::new(destination_path, content),
        );
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        validate_directory_path(path)
    }

    async fn get_url(&self, path: &str) -> Result<String> {
        if !self.exists(path).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(format!("{URL_SCHEME}{path}"))
    }

    async fn open(&self, _path: &str) -> Result<LocalFile> {
        Err(StorageError::Unsupported {
            driver: Driver::Memory,
            operation: "open",
        })
    }

    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        file_name: &str,
        dir: &str,
    ) -> Result<UploadedFile> {
        let path = join_object_path(dir, file_name)?;
        let contents = drain(source).await?;
        info!("Uploading {} bytes to memory at path: {}", contents.len(), path);
        self.files
            .write()
            .await
            .insert(path.clone(), Entry::new(&path, Bytes::from(contents)));
        Ok(UploadedFile { path, local: None })
    }
}
