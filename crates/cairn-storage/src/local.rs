use async_trait::async_trait;
use cairn_common::Manifest;
use futures::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// The Local Package Manager plugin contract (§4.3): per-package manifest
/// storage with locked read-modify-write, and per-tarball blob storage with
/// conflict-safe staged writes. The core ships [`crate::FsStorage`]; any
/// other implementation satisfying this trait is a valid replacement.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn read_package(&self, name: &str) -> Result<Manifest>;

    /// Atomic create-if-absent (§4.3, P2).
    async fn create_package(&self, name: &str, manifest: &Manifest) -> Result<()>;

    /// Unconditional overwrite. Not safe against concurrent writers; callers
    /// that need read-modify-write safety use [`LocalStorage::update_package`].
    async fn save_package(&self, name: &str, manifest: &Manifest) -> Result<()>;

    /// Thread-safe read-modify-write (§4.3, P1): acquires an exclusive lock,
    /// reads and parses the current manifest, applies `transform`, and
    /// persists the result before releasing the lock.
    async fn update_package(
        &self,
        name: &str,
        transform: Box<dyn FnOnce(Manifest) -> Manifest + Send>,
    ) -> Result<Manifest>;

    async fn delete_package(&self, name: &str) -> Result<()>;

    async fn remove_package(&self, name: &str) -> Result<()>;

    async fn has_package(&self, name: &str) -> bool;

    /// Enumerates every package name with a manifest in storage, for
    /// `getLocalDatabase` (§4.1). Ordering is unspecified.
    async fn list_packages(&self) -> Result<Vec<String>>;

    /// Opens a staged write for `filename` under `name`'s storage directory.
    /// Fails with `Conflict` if the file already exists (§4.3, P2).
    async fn write_tarball(&self, name: &str, filename: &str) -> Result<Box<dyn TarballWriter>>;

    async fn read_tarball(&self, name: &str, filename: &str) -> Result<(Box<dyn AsyncRead + Unpin + Send>, u64)>;

    async fn has_tarball(&self, name: &str, filename: &str) -> bool;

    /// Deletes a tarball blob. A no-op (not an error) if it's already gone.
    async fn delete_tarball(&self, name: &str, filename: &str) -> Result<()>;
}

/// A staged tarball write in progress. Dropping without calling
/// [`TarballWriter::commit`] leaves the staging file in place for the
/// pipeline to clean up explicitly via [`TarballWriter::abort`] (§4.3,
/// §5 cancellation semantics, P6).
#[async_trait]
pub trait TarballWriter: AsyncWrite + Unpin + Send {
    /// Renames the staging file onto the final tarball path.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Deletes the staging file without producing a final tarball.
    async fn abort(self: Box<Self>) -> Result<()>;
}
