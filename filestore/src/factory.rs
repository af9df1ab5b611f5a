use std::sync::Arc;

use s3::creds::Credentials;
use tracing::info;

use crate::conf::{S3Conf, StorageConf};
use crate::driver::Driver;
use crate::error::{Result, StorageError};
use crate::storage::{GcsStorage, LocalStorage, MemoryStorage, S3Storage, Storage};

/// Builds the backend selected by `conf.driver`.
pub async fn create_storage(conf: &StorageConf) -> Result<Arc<dyn Storage>> {
    info!("Creating {} storage backend", conf.driver);
    match conf.driver {
        Driver::Memory => Ok(Arc::new(MemoryStorage::new())),
        Driver::Local => {
            let root = Some(conf.local.root.clone())
                .filter(|path| !path.as_os_str().is_empty())
                .ok_or_else(|| config_error("local.root must be set for local driver"))?;
            Ok(Arc::new(LocalStorage::new(root)))
        }
        Driver::Gcs => {
            let bucket = non_empty(conf.gcs.bucket.as_deref())
                .ok_or_else(|| config_error("gcs.bucket must be set for gcs driver"))?;
            let prefix = non_empty(conf.gcs.prefix.as_deref());
            let backend =
                GcsStorage::new(bucket, prefix, conf.gcs.credentials_file.as_deref()).await?;
            Ok(Arc::new(backend))
        }
        Driver::S3 => {
            let bucket = non_empty(conf.s3.bucket.as_deref())
                .ok_or_else(|| config_error("s3.bucket must be set for s3 driver"))?;
            let backend = S3Storage::new(
                &bucket,
                &conf.s3.region,
                non_empty(conf.s3.endpoint.as_deref()).as_deref(),
                non_empty(conf.s3.prefix.as_deref()),
                s3_credentials(&conf.s3)?,
            )?;
            Ok(Arc::new(backend))
        }
    }
}

fn s3_credentials(conf: &S3Conf) -> Result<Credentials> {
    let access_key = non_empty(conf.access_key_id.as_deref());
    let secret_key = non_empty(conf.secret_access_key.as_deref());
    let credentials = match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => Credentials::new(
            Some(access_key.as_str()),
            Some(secret_key.as_str()),
            None,
            None,
            None,
        ),
        (None, None) => Credentials::default(),
        _ => {
            return Err(config_error(
                "s3.access_key_id and s3.secret_access_key must be set together",
            ))
        }
    };
    credentials.map_err(|err| StorageError::backend(Driver::S3, "loading s3 credentials", err))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn config_error(message: &str) -> StorageError {
    StorageError::Config(message.to_string())
}
