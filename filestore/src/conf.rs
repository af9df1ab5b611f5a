use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::driver::Driver;

const DEFAULTS: &str = include_str!("conf_defaults.toml");

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalConf {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcsConf {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    /// Service-account key file. Application-default credentials when unset.
    pub credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Conf {
    pub bucket: Option<String>,
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack...). Enables path-style addressing.
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Backend selection and construction parameters.
///
/// Layered as: built-in defaults, then each config file in order (missing
/// files are skipped), then `FILESTORE__*` environment variables, e.g.
/// `FILESTORE__DRIVER=gcs` or `FILESTORE__GCS__BUCKET=assets`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConf {
    pub driver: Driver,
    #[serde(default)]
    pub local: LocalConf,
    #[serde(default)]
    pub gcs: GcsConf,
    #[serde(default)]
    pub s3: S3Conf,
}

impl StorageConf {
    pub fn new(config_files: Vec<String>) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));
        let builder = config_files.iter().fold(builder, |builder, path| {
            builder.add_source(File::with_name(path).required(false))
        });
        let conf = builder
            .add_source(Environment::with_prefix("FILESTORE").separator("__"))
            .build()
            .context("loading storage configuration")?
            .try_deserialize()
            .context("parsing storage configuration")?;
        Ok(conf)
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            driver: Driver::Memory,
            local: LocalConf::default(),
            gcs: GcsConf::default(),
            s3: S3Conf {
                region: "us-east-1".to_string(),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp conf");
        file.write_all(contents.as_bytes()).expect("write conf");
        file
    }

    #[test]
    fn defaults_select_memory_driver() {
        let conf = StorageConf::new(vec![]).expect("defaults");
        assert_eq!(conf.driver, Driver::Memory);
        assert_eq!(conf.local.root, PathBuf::from("data/filestore"));
        assert_eq!(conf.s3.region, "us-east-1");
        assert!(conf.gcs.bucket.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_conf(
            r#"
driver = "gcs"

[gcs]
bucket = "assets"
prefix = "tenant"
"#,
        );
        let conf = StorageConf::new(vec![file.path().to_string_lossy().into_owned()])
            .expect("conf");
        assert_eq!(conf.driver, Driver::Gcs);
        assert_eq!(conf.gcs.bucket.as_deref(), Some("assets"));
        assert_eq!(conf.gcs.prefix.as_deref(), Some("tenant"));
        assert_eq!(conf.s3.region, "us-east-1");
    }

    #[test]
    fn missing_files_are_skipped() {
        let conf = StorageConf::new(vec!["/nonexistent/filestore.toml".to_string()])
            .expect("conf");
        assert_eq!(conf.driver, Driver::Memory);
    }

    #[test]
    fn driver_names_are_case_insensitive() {
        let file = write_conf("driver = \" S3 \"\n");
        let conf = StorageConf::new(vec![file.path().to_string_lossy().into_owned()])
            .expect("conf");
        assert_eq!(conf.driver, Driver::S3);
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let file = write_conf("driver = \"azure\"\n");
        let err = StorageConf::new(vec![file.path().to_string_lossy().into_owned()]).unwrap_err();
        assert!(format!("{err:#}").contains("parsing storage configuration"));
    }
}
