use cairn_common::CancelToken;
use cairn_merge::UplinkTable;
use cairn_storage::{LocalStorage, StorageError};
use cairn_uplink::Uplink;
use futures::AsyncRead;
use url::Url;

use crate::error::{Result, TarballError};
use crate::tee::TeeReader;

/// The Tarball Pipeline (§4.5): serves a tarball from local storage, and on
/// a local miss, falls back to the uplink that owns `_distfiles[filename]`,
/// write-through-caching the bytes as they pass through.
pub struct TarballPipeline<'a> {
    storage: &'a dyn LocalStorage,
    uplinks: &'a UplinkTable,
}

impl<'a> TarballPipeline<'a> {
    pub fn new(storage: &'a dyn LocalStorage, uplinks: &'a UplinkTable) -> Self {
        TarballPipeline { storage, uplinks }
    }

    pub async fn get_tarball(
        &self,
        name: &str,
        filename: &str,
        enable_remote: bool,
        cancel: CancelToken,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        match self.storage.read_tarball(name, filename).await {
            Ok((reader, _len)) => return Ok(reader),
            Err(StorageError::NotFound(_)) if enable_remote => {}
            Err(StorageError::NotFound(_)) => return Err(TarballError::NotFound(filename.to_string())),
            Err(e) => return Err(e.into()),
        }

        let manifest = self.storage.read_package(name).await?;
        let distfile = manifest
            .distfiles
            .get(filename)
            .ok_or_else(|| TarballError::NotFound(filename.to_string()))?;

        let url: Url = distfile.url.clone();
        let uplink = self
            .uplinks
            .first_for(name)
            .unwrap_or_else(|| std::sync::Arc::new(Uplink::adhoc(&url)));

        let upstream = uplink.fetch_tarball(&url).await?;

        let writer = if uplink.cache_enabled() {
            match self.storage.write_tarball(name, filename).await {
                Ok(writer) => Some(writer),
                Err(StorageError::Conflict(_)) => {
                    tracing::debug!("tarball `{filename}` appeared concurrently; serving remote without caching");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        Ok(Box::new(TeeReader::new(upstream, writer, cancel)))
    }
}
