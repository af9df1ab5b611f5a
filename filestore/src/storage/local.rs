use super::{ObjectReader, Storage, UploadedFile};
use crate::driver::Driver;
use crate::error::{Result, StorageError};
use crate::file::LocalFile;
use crate::path::{join_object_path, validate_directory_path};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{self, AsyncRead, AsyncWriteExt};
use tracing::info;

const UPLOAD_TEMP_PREFIX: &str = ".upload_";

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Object paths stay under the root: absolute paths and `..` are rejected.
    fn resolve_path(&self, object: &str) -> Result<PathBuf> {
        let relative = Path::new(object);
        if object.is_empty() {
            return Err(StorageError::invalid_path(object, "path is empty"));
        }
        let escapes_root = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes_root {
            return Err(StorageError::invalid_path(
                object,
                "path must be relative to the storage root",
            ));
        }
        Ok(self.root.join(relative))
    }

    /// Stored objects are regular files. Directories under the root are not objects.
    async fn is_object(resolved: &Path) -> Result<bool> {
        match fs::metadata(resolved).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolves `object` and checks it names a stored file.
    async fn resolve_object(&self, object: &str) -> Result<PathBuf> {
        let resolved = self.resolve_path(object)?;
        if !Self::is_object(&resolved).await? {
            return Err(StorageError::NotFound(object.to_string()));
        }
        Ok(resolved)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn driver(&self) -> Driver {
        Driver::Local
    }

    async fn read(&self, path: &str) -> Result<ObjectReader> {
        let resolved = self.resolve_object(path).await?;
        let file = fs::File::open(resolved)
            .await
            .map_err(|err| StorageError::from_io(path, err))?;
        Ok(Box::new(file))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, contents)))]
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        info!("Writing object to local storage at path: {}", path);
        let resolved = self.resolve_path(path)?;
        Self::ensure_parent(&resolved).await?;
        fs::write(resolved, contents).await?;
        Ok(())
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn delete(&self, path: &str) -> Result<()> {
        info!("Deleting object from local storage at path: {}", path);
        let resolved = self.resolve_object(path).await?;
        fs::remove_file(resolved)
            .await
            .map_err(|err| StorageError::from_io(path, err))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve_path(path)?;
        Self::is_object(&resolved).await
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        info!("Renaming local object {} -> {}", old_path, new_path);
        let from = self.resolve_object(old_path).await?;
        let to = self.resolve_path(new_path)?;
        Self::ensure_parent(&to).await?;
        fs::rename(from, to)
            .await
            .map_err(|err| StorageError::from_io(old_path, err))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn copy(&self, source_path: &str, destination_path: &str) -> Result<()> {
        info!("Copying local object {} -> {}", source_path, destination_path);
        let from = self.resolve_object(source_path).await?;
        let to = self.resolve_path(destination_path)?;
        Self::ensure_parent(&to).await?;
        fs::copy(from, to)
            .await
            .map_err(|err| StorageError::from_io(source_path, err))?;
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        validate_directory_path(path)?;
        let resolved = self.resolve_path(path)?;
        fs::create_dir_all(resolved).await?;
        Ok(())
    }

    async fn get_url(&self, path: &str) -> Result<String> {
        let resolved = self.resolve_object(path).await?;
        let absolute = fs::canonicalize(resolved)
            .await
            .map_err(|err| StorageError::from_io(path, err))?;
        Ok(format!("file://{}", absolute.to_string_lossy()))
    }

    async fn open(&self, path: &str) -> Result<LocalFile> {
        let resolved = self.resolve_object(path).await?;
        let file = fs::File::open(&resolved)
            .await
            .map_err(|err| StorageError::from_io(path, err))?;
        Ok(LocalFile::persistent(file, resolved))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, source)))]
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        file_name: &str,
        dir: &str,
    ) -> Result<UploadedFile> {
        let path = join_object_path(dir, file_name)?;
        let resolved = self.resolve_path(&path)?;
        Self::ensure_parent(&resolved).await?;

        // Staged next to the destination and renamed into place once complete.
        let parent = resolved.parent().unwrap_or(self.root.as_path());
        let (file, staged) = tempfile::Builder::new()
            .prefix(UPLOAD_TEMP_PREFIX)
            .tempfile_in(parent)?
            .into_parts();
        let mut file = fs::File::from_std(file);
        let written = io::copy(source, &mut file).await?;
        file.flush().await?;
        drop(file);
        staged
            .persist(&resolved)
            .map_err(|err| StorageError::Io(err.error))?;
        info!("Uploaded {} bytes to local storage at path: {}", written, path);
        let local = self.open(&path).await?;
        Ok(UploadedFile {
            path,
            local: Some(local),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn make_storage() -> (LocalStorage, TempDir) {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(temp_dir.path().to_path_buf());
        (storage, temp_dir)
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let (storage, temp_dir) = make_storage();
        storage
            .write("a/b/c.txt", b"nested")
            .await
            .expect("write");
        let on_disk = std::fs::read(temp_dir.path().join("a/b/c.txt")).expect("read disk");
        assert_eq!(on_disk, b"nested");
    }

    #[tokio::test]
    async fn paths_cannot_escape_root() {
        let (storage, _temp_dir) = make_storage();
        for path in ["../outside.txt", "a/../../outside.txt", "/etc/passwd", ""] {
            let err = storage.write(path, b"x").await.unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidPath { .. }),
                "{path} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let (storage, temp_dir) = make_storage();
        assert!(matches!(
            storage.create_directory("docs").await.unwrap_err(),
            StorageError::InvalidPath { .. }
        ));
        storage.create_directory("docs/").await.expect("first");
        storage.create_directory("docs/").await.expect("second");
        assert!(temp_dir.path().join("docs").is_dir());
        assert!(!storage.exists("docs/").await.expect("exists"));
    }

    #[tokio::test]
    async fn url_points_at_file_on_disk() {
        let (storage, temp_dir) = make_storage();
        assert!(storage.get_url("a.txt").await.unwrap_err().is_not_found());
        storage.write("a.txt", b"x").await.expect("write");
        let url = storage.get_url("a.txt").await.expect("url");
        let expected = std::fs::canonicalize(temp_dir.path().join("a.txt")).expect("canonical");
        assert_eq!(url, format!("file://{}", expected.to_string_lossy()));
    }

    #[tokio::test]
    async fn open_returns_stored_file() {
        let (storage, temp_dir) = make_storage();
        assert!(storage.open("a.txt").await.unwrap_err().is_not_found());
        storage.write("a.txt", b"opened").await.expect("write");

        let mut local = storage.open("a.txt").await.expect("open");
        assert!(!local.is_temporary());
        assert_eq!(local.path(), temp_dir.path().join("a.txt"));
        let mut contents = Vec::new();
        local.read_to_end(&mut contents).await.expect("read");
        assert_eq!(contents, b"opened");

        drop(local);
        assert!(temp_dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn open_rejects_directories() {
        let (storage, _temp_dir) = make_storage();
        storage.write("docs/a.txt", b"x").await.expect("write");
        assert!(storage.open("docs").await.unwrap_err().is_not_found());
        assert!(storage.open("docs/").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn upload_leaves_no_staging_file() {
        let (storage, temp_dir) = make_storage();
        let mut source: &[u8] = b"uploaded";
        storage
            .upload(&mut source, "a.txt", "incoming")
            .await
            .expect("upload");
        let names: Vec<_> = std::fs::read_dir(temp_dir.path().join("incoming"))
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[tokio::test]
    async fn upload_returns_open_handle() {
        let (storage, _temp_dir) = make_storage();
        let mut source: &[u8] = b"uploaded";
        let uploaded = storage
            .upload(&mut source, "a.txt", "incoming/")
            .await
            .expect("upload");
        assert_eq!(uploaded.path, "incoming/a.txt");

        let mut local = uploaded.local.expect("local handle");
        let mut contents = Vec::new();
        local.read_to_end(&mut contents).await.expect("read");
        assert_eq!(contents, b"uploaded");
    }
}
