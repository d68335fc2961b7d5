use cairn_common::{CancelToken, Manifest, VersionRecord};
use cairn_merge::{merge, MergeOptions};
use cairn_storage::{LocalStorage, StorageError};
use cairn_tarball::TarballPipeline;
use futures::{AsyncRead, StreamExt};
use node_semver::Version;

use crate::config::FacadeOpts;
use crate::error::{CairnError, Result};

/// Parameters for [`Facade::get_package`] (§4.1 `getPackageByOptions`).
pub struct GetPackageOptions<'a> {
    pub name: &'a str,
    /// A literal version or a dist-tag; `None` returns the full manifest.
    pub version: Option<&'a str>,
    /// `false` skips the uplink fan-out entirely (§4.4 step 1).
    pub uplinks_look: bool,
    /// Checked while the uplink fan-out is in flight (§5).
    pub cancel: CancelToken,
}

impl<'a> GetPackageOptions<'a> {
    pub fn new(name: &'a str) -> Self {
        GetPackageOptions {
            name,
            version: None,
            uplinks_look: true,
            cancel: CancelToken::never(),
        }
    }

    pub fn version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }

    pub fn uplinks_look(mut self, uplinks_look: bool) -> Self {
        self.uplinks_look = uplinks_look;
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What `getPackageByOptions` returns: the whole merged document, or one
/// resolved version when the caller asked for a specific version/tag.
pub enum PackageResult {
    Manifest(Manifest),
    Version {
        version: Version,
        record: VersionRecord,
    },
}

/// The Storage Facade (§4.1): the public operations surface exposed to the
/// (out-of-scope) HTTP routing layer, wiring the Merge Engine, the Tarball
/// Pipeline, and a [`LocalStorage`] plugin together.
pub struct Facade {
    storage: Box<dyn LocalStorage>,
    opts: FacadeOpts,
}

impl Facade {
    pub fn new(storage: Box<dyn LocalStorage>, opts: FacadeOpts) -> Self {
        Facade { storage, opts }
    }

    pub async fn get_package(&self, query: GetPackageOptions<'_>) -> Result<PackageResult> {
        let outcome = merge(
            self.storage.as_ref(),
            self.opts.uplinks.all(),
            &self.opts.filters,
            query.name,
            MergeOptions {
                uplinks_look: query.uplinks_look,
                cancel: query.cancel,
            },
        )
        .await?;

        for failure in &outcome.uplink_failures {
            tracing::warn!(
                "uplink `{}` failed while merging `{}`: {}",
                failure.upname,
                query.name,
                failure.message
            );
        }
        for err in &outcome.filter_errors {
            tracing::warn!("filter error while merging `{}`: {err}", query.name);
        }

        let mut manifest = outcome.manifest;
        self.rewrite_tarball_urls(&mut manifest);

        match query.version {
            None => Ok(PackageResult::Manifest(manifest)),
            Some(wanted) => {
                let (version, record) = manifest
                    .resolve_version(Some(wanted))
                    .map(|(v, r)| (v.clone(), r.clone()))
                    .ok_or_else(|| CairnError::VersionNotExist {
                        name: query.name.to_string(),
                        wanted: wanted.to_string(),
                    })?;
                Ok(PackageResult::Version { version, record })
            }
        }
    }

    fn rewrite_tarball_urls(&self, manifest: &mut Manifest) {
        for record in manifest.versions.values_mut() {
            let Some(tarball) = &record.dist.tarball else {
                continue;
            };
            let Some(filename) = tarball.path_segments().and_then(|mut s| s.next_back()) else {
                continue;
            };
            record.dist.tarball = Some(self.opts.tarball_url(&manifest.name, filename));
        }
    }

    pub async fn get_tarball(
        &self,
        name: &str,
        filename: &str,
        enable_remote: bool,
        cancel: CancelToken,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let pipeline = TarballPipeline::new(self.storage.as_ref(), &self.opts.uplinks);
        Ok(pipeline.get_tarball(name, filename, enable_remote, cancel).await?)
    }

    /// Publish-gate (§4.3) plus `createPackage`.
    pub async fn add_package(&self, name: &str, manifest: Manifest) -> Result<Manifest> {
        let candidates = self.opts.uplinks.candidates_for(name);

        let mut any_exists = false;
        let mut any_timeout_error = false;
        let mut any_non_timeout_error = false;

        let checks: Vec<_> = futures::stream::iter(candidates.iter().cloned())
            .map(|uplink| async move {
                let upname = uplink.upname().to_string();
                let result = uplink.get_remote_metadata(name, None).await;
                (upname, result)
            })
            .buffer_unordered(8)
            .collect()
            .await;

        for (upname, result) in checks {
            match result {
                Ok(_) => any_exists = true,
                Err(e) => {
                    tracing::info!("publish-gate check against `{upname}` for `{name}` failed: {e}");
                    if e.is_timeout_class() {
                        any_timeout_error = true;
                    } else {
                        any_non_timeout_error = true;
                    }
                }
            }
        }

        if any_exists || any_non_timeout_error {
            return Err(CairnError::Conflict(name.to_string()));
        }
        if any_timeout_error && !self.opts.offline_publish {
            return Err(CairnError::Conflict(name.to_string()));
        }

        self.storage.create_package(name, &manifest).await?;
        tracing::info!("published `{name}`");
        Ok(manifest)
    }

    /// Delegates to [`LocalStorage::update_package`] with a transform that
    /// inserts the new version (§4.1: "the facade adds no logic beyond
    /// parameter validation").
    pub async fn add_version(&self, name: &str, version: Version, record: VersionRecord) -> Result<Manifest> {
        let transform: Box<dyn FnOnce(Manifest) -> Manifest + Send> = Box::new(move |mut manifest| {
            manifest.versions.insert(version, record);
            manifest
        });
        Ok(self.storage.update_package(name, transform).await?)
    }

    pub async fn change_package(&self, name: &str, manifest: &Manifest) -> Result<()> {
        Ok(self.storage.save_package(name, manifest).await?)
    }

    pub async fn remove_tarball(&self, name: &str, filename: &str) -> Result<()> {
        Ok(self.storage.delete_tarball(name, filename).await?)
    }

    pub async fn remove_package(&self, name: &str) -> Result<()> {
        Ok(self.storage.remove_package(name).await?)
    }

    /// `getLocalDatabase` (§4.1): per-package errors are logged and
    /// skipped, never propagated.
    pub async fn get_local_database(&self) -> Vec<(String, Option<(Version, VersionRecord)>)> {
        let names = match self.storage.list_packages().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("failed to enumerate local packages: {e}");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            match self.storage.read_package(&name).await {
                Ok(manifest) => {
                    let latest = manifest.resolve_version(None).map(|(v, r)| (v.clone(), r.clone()));
                    results.push((name, latest));
                }
                Err(StorageError::NotFound(_)) => {}
                Err(e) => tracing::warn!("skipping `{name}` in local database: {e}"),
            }
        }
        results
    }
}
