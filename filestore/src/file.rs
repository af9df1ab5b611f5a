use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};

/// A readable local file returned by `open` and `upload`.
///
/// Cloud backends hand out a temporary snapshot of the remote object. The
/// handle owns that temporary file and removes it on drop unless [`keep`] is
/// called. Local-disk backends return the stored file itself.
///
/// [`keep`]: LocalFile::keep
#[derive(Debug)]
pub struct LocalFile {
    file: File,
    path: PathBuf,
    // Declared after `file` so the handle is closed before the path is removed.
    temp: Option<TempPath>,
}

impl LocalFile {
    pub(crate) fn persistent(file: File, path: PathBuf) -> Self {
        Self {
            file,
            path,
            temp: None,
        }
    }

    pub(crate) fn temporary(prefix: &str) -> io::Result<Self> {
        let (file, temp) = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile()?
            .into_parts();
        Ok(Self {
            file: File::from_std(file),
            path: temp.to_path_buf(),
            temp: Some(temp),
        })
    }

    pub(crate) async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await
    }

    pub(crate) async fn rewind(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Detaches the file from automatic cleanup; the caller now owns the path.
    pub fn keep(self) -> io::Result<(File, PathBuf)> {
        let Self { file, path, temp } = self;
        match temp {
            Some(temp) => {
                let kept = temp.keep().map_err(|err| err.error)?;
                Ok((file, kept))
            }
            None => Ok((file, path)),
        }
    }
}

impl AsyncRead for LocalFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn snapshot(contents: &[u8]) -> LocalFile {
        let mut local = LocalFile::temporary("filestore_test_").expect("temporary");
        local.write_chunk(contents).await.expect("write");
        local.rewind().await.expect("rewind");
        local
    }

    #[tokio::test]
    async fn snapshot_is_readable_from_start() {
        let mut local = snapshot(b"snapshot").await;
        assert!(local.is_temporary());
        let mut contents = Vec::new();
        local.read_to_end(&mut contents).await.expect("read");
        assert_eq!(contents, b"snapshot");
    }

    #[tokio::test]
    async fn temporary_file_is_removed_on_drop() {
        let local = snapshot(b"gone").await;
        let path = local.path().to_path_buf();
        assert!(path.exists());
        drop(local);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn kept_file_survives_drop() {
        let local = snapshot(b"kept").await;
        let (file, path) = local.keep().expect("keep");
        drop(file);
        assert_eq!(std::fs::read(&path).expect("read kept"), b"kept");
        std::fs::remove_file(&path).expect("cleanup");
    }
}
