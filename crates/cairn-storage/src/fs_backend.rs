use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_std::fs;
use async_std::task::spawn_blocking;
use async_trait::async_trait;
use cairn_common::{package_storage_path, sanitize_segment, to_canonical_json, Manifest};
use futures::{AsyncRead, AsyncWrite};
use tempfile::Builder as TempBuilder;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::fsutil;
use crate::local::{LocalStorage, TarballWriter};

const MANIFEST_FILE: &str = "package.json";

/// Filesystem-backed [`LocalStorage`]: one directory per package under
/// `root`, a canonical `package.json`, and tarball blobs alongside it
/// (§6 storage layout).
pub struct FsStorage {
    root: PathBuf,
    lock_retries: u32,
    lock_retry_delay: Duration,
}

impl FsStorage {
    /// Shorthand for [`FsStorage::from_config`] with the default lock-retry
    /// budget (§10.4).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage::from_config(StorageConfig::new(root))
    }

    pub fn from_config(config: StorageConfig) -> Self {
        FsStorage {
            root: config.root,
            lock_retries: config.lock_retries,
            lock_retry_delay: config.lock_retry_delay,
        }
    }

    fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(package_storage_path(name))
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.package_dir(name).join(MANIFEST_FILE)
    }

    fn tarball_path(&self, name: &str, filename: &str) -> PathBuf {
        self.package_dir(name).join(sanitize_segment(filename))
    }
}

fn write_manifest_sync(path: &Path, manifest: &Manifest) -> Result<()> {
    let dir = path.parent().expect("manifest path always has a parent");
    std::fs::create_dir_all(dir)?;
    let bytes = to_canonical_json(manifest)
        .map_err(|source| StorageError::MalformedManifest {
            name: manifest.name.clone(),
            source,
        })?;

    let mut tmp = TempBuilder::new()
        .prefix(&format!("{MANIFEST_FILE}.tmp-"))
        .rand_bytes(6)
        .tempfile_in(dir)?;
    std::io::Write::write_all(&mut tmp, &bytes)?;
    tmp.flush()?;
    let tmp_path = tmp.into_temp_path();
    fsutil::atomic_rename(&tmp_path, path)?;
    // `into_temp_path` already disarms cleanup-on-drop once renamed away.
    let _ = tmp_path.keep();
    Ok(())
}

fn read_manifest_sync(path: &Path, name: &str) -> Result<Manifest> {
    let bytes = std::fs::read(path).map_err(|e| fsutil::map_io_error(name, e))?;
    cairn_common::from_json_slice(&bytes).map_err(|source| StorageError::MalformedManifest {
        name: name.to_string(),
        source,
    })
}

#[async_trait]
impl LocalStorage for FsStorage {
    async fn read_package(&self, name: &str) -> Result<Manifest> {
        let path = self.manifest_path(name);
        let owned_name = name.to_string();
        spawn_blocking(move || read_manifest_sync(&path, &owned_name)).await
    }

    async fn create_package(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(name);
        let manifest = manifest.clone();
        let owned_name = name.to_string();
        let (retries, retry_delay) = (self.lock_retries, self.lock_retry_delay);
        spawn_blocking(move || {
            let _guard = fsutil::lock_exclusive(&path, retries, retry_delay)?;
            if path.exists() {
                return Err(StorageError::Conflict(owned_name));
            }
            write_manifest_sync(&path, &manifest)
        })
        .await
    }

    async fn save_package(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(name);
        let manifest = manifest.clone();
        spawn_blocking(move || write_manifest_sync(&path, &manifest)).await
    }

    async fn update_package(
        &self,
        name: &str,
        transform: Box<dyn FnOnce(Manifest) -> Manifest + Send>,
    ) -> Result<Manifest> {
        let path = self.manifest_path(name);
        let owned_name = name.to_string();
        let (retries, retry_delay) = (self.lock_retries, self.lock_retry_delay);
        spawn_blocking(move || {
            let _guard = fsutil::lock_exclusive(&path, retries, retry_delay)?;
            let current = read_manifest_sync(&path, &owned_name)?;
            let updated = transform(current);
            write_manifest_sync(&path, &updated)?;
            Ok(updated)
        })
        .await
    }

    async fn delete_package(&self, name: &str) -> Result<()> {
        let path = self.manifest_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_package(&self, name: &str) -> Result<()> {
        let dir = self.package_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_package(&self, name: &str) -> bool {
        fs::metadata(self.manifest_path(name)).await.is_ok()
    }

    async fn list_packages(&self) -> Result<Vec<String>> {
        use futures::StreamExt;

        let mut names = Vec::new();
        let mut top = match fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = top.next().await {
            let entry = entry?;
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(scope) = entry_name.strip_prefix('@') {
                let scope = scope.to_string();
                let mut inner = fs::read_dir(entry.path()).await?;
                while let Some(pkg_entry) = inner.next().await {
                    let pkg_entry = pkg_entry?;
                    if pkg_entry.file_type().await?.is_dir() {
                        let pkg_name = pkg_entry.file_name().to_string_lossy().into_owned();
                        names.push(format!("@{scope}/{pkg_name}"));
                    }
                }
            } else if fs::metadata(entry.path().join(MANIFEST_FILE)).await.is_ok() {
                names.push(entry_name);
            }
        }

        Ok(names)
    }

    async fn write_tarball(&self, name: &str, filename: &str) -> Result<Box<dyn TarballWriter>> {
        let dir = self.package_dir(name);
        let final_path = self.tarball_path(name, filename);

        if fs::metadata(&final_path).await.is_ok() {
            return Err(StorageError::Conflict(filename.to_string()));
        }

        let tarball_filename = sanitize_segment(filename);
        let dir_for_blocking = dir.clone();
        let tmp_path = spawn_blocking(move || -> Result<PathBuf> {
            std::fs::create_dir_all(&dir_for_blocking)?;
            let tmp = TempBuilder::new()
                .prefix(&format!("{tarball_filename}.tmp-"))
                .rand_bytes(6)
                .tempfile_in(&dir_for_blocking)?;
            let (_, path) = tmp.keep().map_err(|e| e.error)?;
            Ok(path)
        })
        .await?;

        let file = fs::File::create(&tmp_path).await?;
        Ok(Box::new(FsTarballWriter {
            file,
            tmp_path,
            final_path,
            lock_retries: self.lock_retries,
            lock_retry_delay: self.lock_retry_delay,
        }))
    }

    async fn read_tarball(
        &self,
        name: &str,
        filename: &str,
    ) -> Result<(Box<dyn AsyncRead + Unpin + Send>, u64)> {
        let path = self.tarball_path(name, filename);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| fsutil::map_io_error(filename, e))?;
        let len = file.metadata().await?.len();
        Ok((Box::new(file), len))
    }

    async fn has_tarball(&self, name: &str, filename: &str) -> bool {
        fs::metadata(self.tarball_path(name, filename)).await.is_ok()
    }

    async fn delete_tarball(&self, name: &str, filename: &str) -> Result<()> {
        let path = self.tarball_path(name, filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct FsTarballWriter {
    file: fs::File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    lock_retries: u32,
    lock_retry_delay: Duration,
}

impl AsyncWrite for FsTarballWriter {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_close(cx)
    }
}

#[async_trait]
impl TarballWriter for FsTarballWriter {
    async fn commit(self: Box<Self>) -> Result<()> {
        use futures::AsyncWriteExt;
        let mut file = self.file;
        file.flush().await?;
        file.close().await?;

        let tmp_path = self.tmp_path;
        let final_path = self.final_path;
        let (retries, retry_delay) = (self.lock_retries, self.lock_retry_delay);
        spawn_blocking(move || {
            // Claim the final slot under a lock so two concurrent writers
            // for the same (name, filename) can't both rename in (P2).
            let _guard = fsutil::lock_exclusive(&final_path, retries, retry_delay)?;
            if final_path.exists() {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(StorageError::Conflict(
                    final_path.display().to_string(),
                ));
            }
            std::fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })
        .await
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let _ = fs::remove_file(&self.tmp_path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::{AsyncReadExt, AsyncWriteExt};
    use pretty_assertions::assert_eq;

    use super::*;

    #[async_std::test]
    async fn create_then_read_package_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let manifest = Manifest::empty("left-pad");

        storage.create_package("left-pad", &manifest).await.unwrap();
        let back = storage.read_package("left-pad").await.unwrap();
        assert_eq!(back.name, "left-pad");
    }

    #[async_std::test]
    async fn create_package_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let manifest = Manifest::empty("left-pad");

        storage.create_package("left-pad", &manifest).await.unwrap();
        let err = storage
            .create_package("left-pad", &manifest)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[async_std::test]
    async fn read_missing_package_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let err = storage.read_package("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[async_std::test]
    async fn update_package_applies_transform_under_lock() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage
            .create_package("left-pad", &Manifest::empty("left-pad"))
            .await
            .unwrap();

        let updated = storage
            .update_package(
                "left-pad",
                Box::new(|mut m| {
                    m.description = Some("string padding".into());
                    m
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.description.as_deref(), Some("string padding"));
        let reread = storage.read_package("left-pad").await.unwrap();
        assert_eq!(reread.description.as_deref(), Some("string padding"));
    }

    #[async_std::test]
    async fn list_packages_covers_plain_and_scoped_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage
            .create_package("left-pad", &Manifest::empty("left-pad"))
            .await
            .unwrap();
        storage
            .create_package("@babel/core", &Manifest::empty("@babel/core"))
            .await
            .unwrap();

        let mut names = storage.list_packages().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["@babel/core".to_string(), "left-pad".to_string()]);
    }

    #[async_std::test]
    async fn list_packages_on_empty_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(storage.list_packages().await.unwrap().is_empty());
    }

    #[async_std::test]
    async fn tarball_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let mut writer = storage.write_tarball("left-pad", "left-pad-1.0.0.tgz").await.unwrap();
        writer.write_all(b"tarball-bytes").await.unwrap();
        writer.commit().await.unwrap();

        let (mut reader, len) = storage.read_tarball("left-pad", "left-pad-1.0.0.tgz").await.unwrap();
        assert_eq!(len, 13);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"tarball-bytes");
    }

    #[async_std::test]
    async fn tarball_write_conflicts_if_final_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let mut writer = storage.write_tarball("left-pad", "x.tgz").await.unwrap();
        writer.write_all(b"first").await.unwrap();
        writer.commit().await.unwrap();

        let err = storage.write_tarball("left-pad", "x.tgz").await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[async_std::test]
    async fn delete_tarball_removes_blob_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let mut writer = storage.write_tarball("left-pad", "x.tgz").await.unwrap();
        writer.write_all(b"bytes").await.unwrap();
        writer.commit().await.unwrap();

        storage.delete_tarball("left-pad", "x.tgz").await.unwrap();
        assert!(!storage.has_tarball("left-pad", "x.tgz").await);
        storage.delete_tarball("left-pad", "x.tgz").await.unwrap();
    }

    #[async_std::test]
    async fn from_config_honors_a_custom_lock_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::from_config(
            StorageConfig::new(dir.path()).lock_retries(1).lock_retry_delay(std::time::Duration::from_millis(1)),
        );
        let manifest = Manifest::empty("left-pad");
        storage.create_package("left-pad", &manifest).await.unwrap();
        let back = storage.read_package("left-pad").await.unwrap();
        assert_eq!(back.name, "left-pad");
    }

    #[async_std::test]
    async fn aborted_tarball_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let mut writer = storage.write_tarball("left-pad", "x.tgz").await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        writer.abort().await.unwrap();

        assert!(!storage.has_tarball("left-pad", "x.tgz").await);
        let mut entries = async_std::fs::read_dir(dir.path().join("left-pad")).await.unwrap();
        use futures::StreamExt;
        assert!(entries.next().await.is_none());
    }
}
