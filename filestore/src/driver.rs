use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backend kind. The set is closed: configuration naming anything else is rejected.
///
/// Deserialisation goes through [`FromStr`], so `" GCS "` in a config file or
/// environment variable selects the same driver as `"gcs".parse()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Driver {
    Memory,
    Local,
    Gcs,
    S3,
}

impl Driver {
    pub const ALL: [Driver; 4] = [Driver::Memory, Driver::Local, Driver::Gcs, Driver::S3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Memory => "memory",
            Driver::Local => "local",
            Driver::Gcs => "gcs",
            Driver::S3 => "s3",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported storage driver: {0}")]
pub struct UnknownDriver(pub String);

impl FromStr for Driver {
    type Err = UnknownDriver;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Driver::ALL
            .into_iter()
            .find(|driver| driver.as_str() == normalized)
            .ok_or_else(|| UnknownDriver(value.to_string()))
    }
}

impl TryFrom<String> for Driver {
    type Error = UnknownDriver;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
