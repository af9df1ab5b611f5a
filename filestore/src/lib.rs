//! Uniform file storage with interchangeable backends.
//!
//! Every backend implements [`Storage`] with the same observable semantics and
//! the same [`StorageError`] taxonomy, so callers can swap an in-memory store,
//! a local directory, a GCS bucket or an S3 bucket without changing logic.
//!
//! ```no_run
//! use filestore::{create_storage, StorageConf};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let conf = StorageConf::new(vec!["filestore.toml".to_string()])?;
//! let storage = create_storage(&conf).await?;
//! storage.write("docs/a.txt", b"hello").await?;
//! assert_eq!(storage.read_to_vec("docs/a.txt").await?, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod conf;
pub mod driver;
pub mod error;
pub mod factory;
pub mod file;
pub mod path;
pub mod storage;

pub use conf::StorageConf;
pub use driver::Driver;
pub use error::{Result, StorageError};
pub use factory::create_storage;
pub use file::LocalFile;
pub use storage::{
    GcsStorage, LocalStorage, MemoryStorage, ObjectReader, S3Storage, Storage, UploadedFile,
};
