//! The Local Package Manager (§4.3): a storage-plugin contract for
//! per-package manifests and tarballs, plus a filesystem implementation.
//! Every write that can be observed mid-flight goes through a temp-file
//! and an atomic rename; concurrent writers to the same key are
//! serialized by an advisory lock.

mod config;
mod error;
mod fs_backend;
mod fsutil;
mod local;

pub use config::StorageConfig;
pub use error::{Result, StorageError};
pub use fs_backend::FsStorage;
pub use local::{LocalStorage, TarballWriter};
