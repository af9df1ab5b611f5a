//! S3-compatible storage backend.
//!
//! Works with AWS S3, MinIO and other S3-compatible services. S3 has no
//! native move, so `rename` is copy-then-delete like the GCS backend.

use super::{rename_by_copy, ObjectReader, Storage, UploadedFile};
use crate::driver::Driver;
use crate::error::{Result, StorageError};
use crate::file::LocalFile;
use crate::path::{join_object_path, prefixed_key, validate_directory_path};
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tokio::io::AsyncRead;
use tracing::{debug, info};

const TEMP_FILE_PREFIX: &str = "s3_temp_";

pub struct S3Storage {
    bucket: Box<Bucket>,
    prefix: Option<String>,
}

impl S3Storage {
    /// Connects to `bucket_name` in `region`, or at `endpoint` when given
    /// (path-style addressing, as MinIO and LocalStack expect).
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        prefix: Option<String>,
        credentials: Credentials,
    ) -> Result<Self> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse()
                .map_err(|err| StorageError::Config(format!("invalid s3 region: {err}")))?,
        };

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|err| StorageError::backend(Driver::S3, "creating s3 bucket handle", err))?;
        let bucket = if endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self::with_bucket(bucket, prefix))
    }

    pub fn with_bucket(bucket: Box<Bucket>, prefix: Option<String>) -> Self {
        Self { bucket, prefix }
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(self.prefix.as_deref(), key)
    }

    fn is_not_found(err: &S3Error) -> bool {
        match err {
            S3Error::HttpFailWithBody(code, body) => *code == 404 || body.contains("NoSuchKey"),
            _ => false,
        }
    }

    fn map_error(path: &str, context: &'static str, err: S3Error) -> StorageError {
        if Self::is_not_found(&err) {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::backend(Driver::S3, context, err)
        }
    }

    /// Maps a response status when the client is built without `fail-on-err`.
    fn check_status(path: &str, context: &'static str, status: u16) -> Result<()> {
        match status {
            200..=299 => Ok(()),
            404 => Err(StorageError::NotFound(path.to_string())),
            status => Err(StorageError::backend(
                Driver::S3,
                context,
                anyhow::anyhow!("unexpected status {status}"),
            )),
        }
    }

    /// Streams the object into a fresh temporary file, rewound to the start.
    async fn download(&self, path: &str) -> Result<LocalFile> {
        let mut local = LocalFile::temporary(TEMP_FILE_PREFIX)?;
        let status = self
            .bucket
            .get_object_to_writer(self.full_key(path), local.file_mut())
            .await
            .map_err(|err| Self::map_error(path, "reading s3 object", err))?;
        Self::check_status(path, "reading s3 object", status)?;
        local.rewind().await?;
        Ok(local)
    }

    /// Source read failures surface as I/O errors, like the other backends.
    fn map_upload_error(err: S3Error) -> StorageError {
        match err {
            S3Error::Io(err) => StorageError::Io(err),
            err => StorageError::backend(Driver::S3, "uploading s3 object", err),
        }
    }

    async fn put_bytes(&self, path: &str, contents: &[u8], context: &'static str) -> Result<()> {
        let response = self
            .bucket
            .put_object(self.full_key(path), contents)
            .await
            .map_err(|err| StorageError::backend(Driver::S3, context, err))?;
        Self::check_status(path, context, response.status_code())
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn driver(&self) -> Driver {
        Driver::S3
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn read(&self, path: &str) -> Result<ObjectReader> {
        debug!("Reading object from S3 at path: {}", path);
        Ok(Box::new(self.download(path).await?))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, contents)))]
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        info!("Writing object to S3 at path: {}", path);
        self.put_bytes(path, contents, "writing s3 object").await
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn delete(&self, path: &str) -> Result<()> {
        // S3 deletes succeed on missing keys; HEAD first so absence is reported.
        if !self.exists(path).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        info!("Deleting object from S3 at path: {}", path);
        let response = self
            .bucket
            .delete_object(self.full_key(path))
            .await
            .map_err(|err| Self::map_error(path, "deleting s3 object", err))?;
        Self::check_status(path, "deleting s3 object", response.status_code())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.bucket.head_object(self.full_key(path)).await {
            Ok((_, 404)) => Ok(false),
            Ok((_, status)) => Self::check_status(path, "checking s3 object", status).map(|_| true),
            Err(err) if Self::is_not_found(&err) => Ok(false),
            Err(err) => Err(StorageError::backend(Driver::S3, "checking s3 object", err)),
        }
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        info!("Renaming S3 object {} -> {}", old_path, new_path);
        rename_by_copy(self, old_path, new_path).await
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn copy(&self, source_path: &str, destination_path: &str) -> Result<()> {
        info!("Copying S3 object {} -> {}", source_path, destination_path);
        let status = self
            .bucket
            .copy_object_internal(self.full_key(source_path), self.full_key(destination_path))
            .await
            .map_err(|err| Self::map_error(source_path, "copying s3 object", err))?;
        Self::check_status(source_path, "copying s3 object", status)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        validate_directory_path(path)?;
        // S3 puts overwrite, so an existing marker is rewritten as-is.
        self.put_bytes(path, &[], "writing s3 directory marker").await
    }

    async fn get_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}/{}", self.bucket.url(), self.full_key(path)))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn open(&self, path: &str) -> Result<LocalFile> {
        let local = self.download(path).await?;
        debug!(
            "Materialized S3 object {} at {}",
            path,
            local.path().display()
        );
        Ok(local)
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, source)))]
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        file_name: &str,
        dir: &str,
    ) -> Result<UploadedFile> {
        let path = join_object_path(dir, file_name)?;
        info!("Uploading to S3 at path: {}", path);
        let response = self
            .bucket
            .put_object_stream(source, self.full_key(&path))
            .await
            .map_err(Self::map_upload_error)?;
        Self::check_status(&path, "uploading s3 object", response.status_code())?;
        debug!(
            "Uploaded {} bytes to S3 at path: {}",
            response.uploaded_bytes(),
            path
        );
        let local = self.open(&path).await?;
        Ok(UploadedFile {
            path,
            local: Some(local),
        })
    }
}
