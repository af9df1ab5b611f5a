use super::{pump_chunks, rename_by_copy, ObjectReader, Storage, UploadedFile};
use crate::driver::Driver;
use crate::error::{Result, StorageError};
use crate::file::LocalFile;
use crate::path::{join_object_path, prefixed_key, validate_directory_path};
use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::copy::CopyObjectRequest;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::Error as GcsError;
use std::path::Path;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info};

const PUBLIC_URL_BASE: &str = "https://storage.googleapis.com";
const TEMP_FILE_PREFIX: &str = "gcs_temp_";
const UPLOAD_QUEUE_DEPTH: usize = 4;

pub struct GcsStorage {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl GcsStorage {
    /// Connects to `bucket`, authenticating with the service-account key at
    /// `credentials_file` or, when absent, application-default credentials.
    pub async fn new(
        bucket: String,
        prefix: Option<String>,
        credentials_file: Option<&Path>,
    ) -> Result<Self> {
        let config = match credentials_file {
            Some(path) => {
                let credentials =
                    CredentialsFile::new_from_file(path.to_string_lossy().into_owned())
                        .await
                        .map_err(|err| {
                            StorageError::backend(Driver::Gcs, "loading gcs credentials", err)
                        })?;
                ClientConfig::default()
                    .with_credentials(credentials)
                    .await
                    .map_err(|err| {
                        StorageError::backend(Driver::Gcs, "configuring gcs client", err)
                    })?
            }
            None => ClientConfig::default().with_auth().await.map_err(|err| {
                StorageError::backend(Driver::Gcs, "configuring gcs client", err)
            })?,
        };
        Ok(Self::with_client(Client::new(config), bucket, prefix))
    }

    pub fn with_client(client: Client, bucket: String, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    fn object_path(&self, object: &str) -> String {
        prefixed_key(self.prefix.as_deref(), object)
    }

    fn public_url(&self, object: &str) -> String {
        format!("{PUBLIC_URL_BASE}/{}/{}", self.bucket, self.object_path(object))
    }

    fn get_request(&self, path: &str) -> GetObjectRequest {
        GetObjectRequest {
            bucket: self.bucket.clone(),
            object: self.object_path(path),
            ..Default::default()
        }
    }

    fn status(err: &GcsError) -> Option<u16> {
        match err {
            GcsError::Response(response) => Some(response.code),
            GcsError::HttpClient(http_err) => http_err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    fn is_not_found(err: &GcsError) -> bool {
        Self::status(err) == Some(404)
    }

    fn is_precondition_failed(err: &GcsError) -> bool {
        Self::status(err) == Some(412)
    }

    /// Maps a client error for `path`, surfacing 404 as [`StorageError::NotFound`].
    fn map_error(path: &str, context: &'static str, err: GcsError) -> StorageError {
        if Self::is_not_found(&err) {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::backend(Driver::Gcs, context, err)
        }
    }

    async fn upload_bytes(
        &self,
        path: &str,
        data: Vec<u8>,
        if_generation_match: Option<i64>,
    ) -> std::result::Result<(), GcsError> {
        let object = self.object_path(path);
        let upload_type = UploadType::Simple(Media::new(object));
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            if_generation_match,
            ..Default::default()
        };
        self.client.upload_object(&request, data, &upload_type).await?;
        Ok(())
    }

    /// Streams the object into a fresh temporary file, rewound to the start.
    async fn download(&self, path: &str) -> Result<LocalFile> {
        let stream = self
            .client
            .download_streamed_object(&self.get_request(path), &Range::default())
            .await
            .map_err(|err| Self::map_error(path, "reading gcs object", err))?;
        let mut stream = std::pin::pin!(stream);

        let mut local = LocalFile::temporary(TEMP_FILE_PREFIX)?;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|err| Self::map_error(path, "downloading gcs object", err))?;
            local.write_chunk(&chunk).await?;
        }
        local.rewind().await?;
        Ok(local)
    }
}

#[async_trait]
impl Storage for GcsStorage {
    fn driver(&self) -> Driver {
        Driver::Gcs
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn read(&self, path: &str) -> Result<ObjectReader> {
        debug!("Reading object from GCS at path: {}", path);
        Ok(Box::new(self.download(path).await?))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, contents)))]
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        info!("Writing object to GCS at path: {}", path);
        self.upload_bytes(path, contents.to_vec(), None)
            .await
            .map_err(|err| StorageError::backend(Driver::Gcs, "writing gcs object", err))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn delete(&self, path: &str) -> Result<()> {
        info!("Deleting object from GCS at path: {}", path);
        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            object: self.object_path(path),
            ..Default::default()
        };
        self.client
            .delete_object(&request)
            .await
            .map_err(|err| Self::map_error(path, "deleting gcs object", err))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.client.get_object(&self.get_request(path)).await {
            Ok(_) => Ok(true),
            Err(err) if Self::is_not_found(&err) => Ok(false),
            Err(err) => Err(StorageError::backend(
                Driver::Gcs,
                "checking gcs object",
                err,
            )),
        }
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        info!("Renaming GCS object {} -> {}", old_path, new_path);
        rename_by_copy(self, old_path, new_path).await
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn copy(&self, source_path: &str, destination_path: &str) -> Result<()> {
        info!("Copying GCS object {} -> {}", source_path, destination_path);
        let request = CopyObjectRequest {
            source_bucket: self.bucket.clone(),
            source_object: self.object_path(source_path),
            destination_bucket: self.bucket.clone(),
            destination_object: self.object_path(destination_path),
            ..Default::default()
        };
        self.client
            .copy_object(&request)
            .await
            .map_err(|err| Self::map_error(source_path, "copying gcs object", err))?;
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        validate_directory_path(path)?;
        // ifGenerationMatch=0 only succeeds when no marker exists yet.
        match self.upload_bytes(path, Vec::new(), Some(0)).await {
            Ok(()) => {
                info!("Created GCS directory marker at path: {}", path);
                Ok(())
            }
            Err(err) if Self::is_precondition_failed(&err) => {
                debug!("GCS directory marker already present at path: {}", path);
                Ok(())
            }
            Err(err) => Err(StorageError::backend(
                Driver::Gcs,
                "writing gcs directory marker",
                err,
            )),
        }
    }

    async fn get_url(&self, path: &str) -> Result<String> {
        Ok(self.public_url(path))
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn open(&self, path: &str) -> Result<LocalFile> {
        let local = self.download(path).await?;
        debug!(
            "Materialized GCS object {} at {}",
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
        info!("Uploading to GCS at path: {}", path);

        let (sender, receiver) = mpsc::channel(UPLOAD_QUEUE_DEPTH);
        let body = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        });
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(Media::new(self.object_path(&path)));
        let (pumped, uploaded) = future::join(
            pump_chunks(source, sender),
            self.client.upload_streamed_object(&request, body, &upload_type),
        )
        .await;
        let written = pumped?;
        uploaded
            .map_err(|err| StorageError::backend(Driver::Gcs, "uploading gcs object", err))?;
        debug!("Uploaded {} bytes to GCS at path: {}", written, path);

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
    use crate::storage::BrokenSource;

    fn offline_storage(prefix: Option<&str>) -> GcsStorage {
        let client = Client::new(ClientConfig::default().anonymous());
        GcsStorage::with_client(client, "assets".to_string(), prefix.map(str::to_string))
    }

    /// Client whose requests are refused without leaving the host.
    fn unreachable_storage() -> GcsStorage {
        let config = ClientConfig {
            storage_endpoint: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        GcsStorage::with_client(Client::new(config.anonymous()), "assets".to_string(), None)
    }

    #[tokio::test]
    async fn url_is_built_without_requests() {
        let storage = offline_storage(None);
        assert_eq!(
            storage.get_url("docs/a.txt").await.expect("url"),
            "https://storage.googleapis.com/assets/docs/a.txt"
        );
    }

    #[tokio::test]
    async fn prefix_applies_to_urls_and_requests() {
        let storage = offline_storage(Some("tenant/"));
        assert_eq!(
            storage.get_url("a.txt").await.expect("url"),
            "https://storage.googleapis.com/assets/tenant/a.txt"
        );
        let request = storage.get_request("a.txt");
        assert_eq!(request.bucket, "assets");
        assert_eq!(request.object, "tenant/a.txt");
    }

    #[tokio::test]
    async fn invalid_paths_fail_before_any_request() {
        let storage = offline_storage(None);
        assert!(matches!(
            storage.create_directory("docs").await.unwrap_err(),
            StorageError::InvalidPath { .. }
        ));
        let mut source: &[u8] = b"x";
        assert!(matches!(
            storage.upload(&mut source, "", "dir").await.unwrap_err(),
            StorageError::InvalidPath { .. }
        ));
    }

    #[tokio::test]
    async fn source_read_error_is_reported_as_io() {
        let storage = unreachable_storage();
        let mut source = BrokenSource::new(b"partial");
        let err = storage
            .upload(&mut source, "a.txt", "incoming")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)), "{err:?}");
    }

    #[tokio::test]
    async fn transport_failures_are_backend_errors() {
        let storage = unreachable_storage();
        let err = storage.exists("a.txt").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Backend {
                driver: Driver::Gcs,
                ..
            }
        ));
    }
}
