use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::driver::Driver;
use crate::error::{Result, StorageError};
use crate::file::LocalFile;

mod gcs;
mod local;
mod memory;
mod s3;

pub use gcs::GcsStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// Byte stream returned by [`Storage::read`], positioned at the start of the object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Result of [`Storage::upload`].
#[derive(Debug)]
pub struct UploadedFile {
    /// Path the object was stored under.
    pub path: String,
    /// Local handle equivalent to `open(path)`, for backends that can produce one.
    pub local: Option<LocalFile>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    fn driver(&self) -> Driver;

    async fn read(&self, path: &str) -> Result<ObjectReader>;

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Absence is `Ok(false)`; only transport failures are errors.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Not atomic on object stores, see [`StorageError::PartialRename`].
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;

    async fn copy(&self, source_path: &str, destination_path: &str) -> Result<()>;

    /// `path` must end with `/`. Creating an existing directory succeeds.
    async fn create_directory(&self, path: &str) -> Result<()>;

    /// Backend-specific locator. Object stores build it without checking the
    /// object exists or is publicly reachable.
    async fn get_url(&self, path: &str) -> Result<String>;

    async fn open(&self, path: &str) -> Result<LocalFile>;

    /// Stores everything readable from `source` at `dir/file_name`.
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        file_name: &str,
        dir: &str,
    ) -> Result<UploadedFile>;

    async fn read_to_vec(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.read(path).await?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await?;
        Ok(contents)
    }
}

/// Rename for stores without a native move: copy, then delete the source.
///
/// A failed delete is reported as [`StorageError::PartialRename`] and leaves
/// the object under both paths.
pub(crate) async fn rename_by_copy<S>(storage: &S, old_path: &str, new_path: &str) -> Result<()>
where
    S: Storage + ?Sized,
{
    if old_path == new_path {
        return match storage.exists(old_path).await? {
            true => Ok(()),
            false => Err(StorageError::NotFound(old_path.to_string())),
        };
    }
    storage.copy(old_path, new_path).await?;
    if let Err(err) = storage.delete(old_path).await {
        warn!(
            driver = %storage.driver(),
            from = %old_path,
            to = %new_path,
            error = %err,
            "Rename left object at both paths"
        );
        return Err(StorageError::PartialRename {
            from: old_path.to_string(),
            to: new_path.to_string(),
            source: Box::new(err),
        });
    }
    Ok(())
}

const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Feeds `source` to `sender` chunk by chunk until end of stream.
///
/// A read error is forwarded so the receiving request body aborts, then
/// returned. A closed receiver stops the pump without error; the consumer
/// reports its own failure.
pub(crate) async fn pump_chunks(
    source: &mut (dyn AsyncRead + Send + Unpin),
    sender: mpsc::Sender<io::Result<Bytes>>,
) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let mut chunk = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
        match source.read_buf(&mut chunk).await {
            Ok(0) => return Ok(total),
            Ok(read) => {
                total += read as u64;
                if sender.send(Ok(chunk.freeze())).await.is_err() {
                    return Ok(total);
                }
            }
            Err(err) => {
                let forwarded = io::Error::new(err.kind(), err.to_string());
                let _ = sender.send(Err(forwarded)).await;
                return Err(err.into());
            }
        }
    }
}

/// Drains an upload source into memory.
pub(crate) async fn drain(source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<Vec<u8>> {
    let mut contents = Vec::new();
    source.read_to_end(&mut contents).await?;
    Ok(contents)
}

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Upload source that yields `head` and then fails, like a dropped connection.
#[cfg(test)]
pub(crate) struct BrokenSource {
    head: &'static [u8],
    sent: bool,
}

#[cfg(test)]
impl BrokenSource {
    pub(crate) fn new(head: &'static [u8]) -> Self {
        Self { head, sent: false }
    }
}

#[cfg(test)]
impl AsyncRead for BrokenSource {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        if self.sent {
            return std::task::Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "source connection reset",
            )));
        }
        self.sent = true;
        buf.put_slice(self.head);
        std::task::Poll::Ready(Ok(()))
    }
}
