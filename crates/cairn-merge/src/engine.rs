use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cairn_common::{CancelToken, DistFileEntry, Manifest, UplinkMeta, LATEST_TAG};
use cairn_storage::LocalStorage;
use cairn_uplink::{MetadataFetch, Uplink};
use futures::future::Either;
use futures::StreamExt;
use node_semver::Version;

use crate::error::{MergeError, Result};
use crate::filter::{Filter, FilterError};

/// How often the cancellation race re-checks the token while the fan-out
/// is in flight (§5).
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Options controlling a single merge call (§4.4 "Input").
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// When `false`, no uplink is consulted and the local manifest (or an
    /// empty template) is returned unchanged (§4.4 step 1).
    pub uplinks_look: bool,
    /// Checked while the uplink fan-out is in flight; on cancellation the
    /// fan-out is dropped (aborting every still-open uplink request) and
    /// `merge` returns [`MergeError::Cancelled`] (§5).
    pub cancel: CancelToken,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            uplinks_look: true,
            cancel: CancelToken::never(),
        }
    }
}

/// One uplink's contribution to a merge, recorded before the manifest lock
/// is taken so the fan-out itself never holds it (§4.4, §5).
enum FetchOutcome {
    FreshSkip,
    NotModified {
        upname: String,
    },
    Fetched {
        upname: String,
        manifest: Manifest,
        etag: Option<String>,
    },
    ValidationFailed {
        upname: String,
        message: String,
    },
    Failed {
        upname: String,
        message: String,
        timeout_class: bool,
    },
}

/// A recorded per-uplink failure surfaced alongside a (possibly partial)
/// merge result (§7: `ValidationFailure` is "recorded per-uplink; other
/// uplinks continue").
#[derive(Debug, Clone)]
pub struct UplinkFailure {
    pub upname: String,
    pub message: String,
    pub timeout_class: bool,
}

/// Result of [`merge`]: the canonical manifest plus everything the facade
/// needs to log without failing the request.
pub struct MergeOutcome {
    pub manifest: Manifest,
    /// Out-of-band `version -> uplink name` map (§9 "hidden per-version
    /// annotation"): never serialized, consumed only by filters and by
    /// callers inspecting provenance.
    pub annotations: HashMap<Version, String>,
    pub uplink_failures: Vec<UplinkFailure>,
    pub filter_errors: Vec<FilterError>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as u64
}

const FETCH_CONCURRENCY: usize = 8;

/// Fuses `storage`'s copy of `name` with responses from every uplink that
/// has proxy access to it (§4.4). Persists the merged result via
/// [`LocalStorage::update_package`], then runs `filters` and normalizes the
/// returned copy.
pub async fn merge(
    storage: &dyn LocalStorage,
    uplinks: &[Arc<Uplink>],
    filters: &[Box<dyn Filter>],
    name: &str,
    opts: MergeOptions,
) -> Result<MergeOutcome> {
    let local_exists = storage.has_package(name).await;
    let local = if local_exists {
        storage.read_package(name).await?
    } else {
        Manifest::empty(name)
    };

    let candidates: Vec<Arc<Uplink>> = if opts.uplinks_look {
        uplinks
            .iter()
            .filter(|u| u.allows_package(name))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let cache_enabled_by_upname: HashMap<String, bool> = candidates
        .iter()
        .map(|u| (u.upname().to_string(), u.cache_enabled()))
        .collect();

    let now = now_ms();
    // Tagged with each uplink's position in `uplinks` so result order can be
    // restored after `buffer_unordered` scrambles it to completion order
    // (spec.md: "when two uplinks supply the same version, the first to
    // merge wins (ordering: uplinks as configured)").
    let fetch_stream = futures::stream::iter(candidates.into_iter().enumerate())
        .map(|(index, uplink)| {
            let name = name.to_string();
            let known = local.uplinks.get(uplink.upname()).copied();
            async move {
                let upname = uplink.upname().to_string();
                let fresh = known
                    .map(|m| now.saturating_sub(m.fetched) < uplink.maxage().as_millis() as u64)
                    .unwrap_or(false);
                if fresh {
                    return (index, FetchOutcome::FreshSkip);
                }

                let etag = known.and_then(|m| m.etag);
                let outcome = match uplink.get_remote_metadata(&name, etag.as_deref()).await {
                    Ok(MetadataFetch::NotModified) => FetchOutcome::NotModified { upname },
                    Ok(MetadataFetch::Fresh { manifest, etag }) => {
                        if manifest.name != name {
                            FetchOutcome::ValidationFailed {
                                upname,
                                message: format!(
                                    "uplink returned manifest for `{}`, expected `{name}`",
                                    manifest.name
                                ),
                            }
                        } else {
                            FetchOutcome::Fetched {
                                upname,
                                manifest,
                                etag,
                            }
                        }
                    }
                    Err(e) => FetchOutcome::Failed {
                        upname,
                        message: e.to_string(),
                        timeout_class: e.is_timeout_class(),
                    },
                };
                (index, outcome)
            }
        })
        .buffer_unordered(FETCH_CONCURRENCY)
        .collect::<Vec<(usize, FetchOutcome)>>();

    let cancel = opts.cancel.clone();
    let watch_cancel = async move {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            async_std::task::sleep(CANCEL_POLL_INTERVAL).await;
        }
    };

    let mut indexed_results: Vec<(usize, FetchOutcome)> =
        match futures::future::select(Box::pin(fetch_stream), Box::pin(watch_cancel)).await {
            Either::Left((results, _)) => results,
            Either::Right((_, _fetch_stream)) => {
                return Err(MergeError::Cancelled(name.to_string()));
            }
        };
    indexed_results.sort_by_key(|(index, _)| *index);
    let fetch_results: Vec<FetchOutcome> = indexed_results.into_iter().map(|(_, outcome)| outcome).collect();

    let any_success = fetch_results
        .iter()
        .any(|r| !matches!(r, FetchOutcome::Failed { .. }));

    if !local_exists && !any_success {
        let all_timeout_class = !fetch_results.is_empty()
            && fetch_results
                .iter()
                .all(|r| matches!(r, FetchOutcome::Failed { timeout_class: true, .. }));
        return Err(if all_timeout_class {
            MergeError::ServiceUnavailable(name.to_string())
        } else {
            MergeError::NotFound(name.to_string())
        });
    }

    let mut uplink_failures = Vec::new();
    for outcome in &fetch_results {
        match outcome {
            FetchOutcome::Failed {
                upname,
                message,
                timeout_class,
            } => uplink_failures.push(UplinkFailure {
                upname: upname.clone(),
                message: message.clone(),
                timeout_class: *timeout_class,
            }),
            FetchOutcome::ValidationFailed { upname, message } => uplink_failures.push(UplinkFailure {
                upname: upname.clone(),
                message: message.clone(),
                timeout_class: false,
            }),
            _ => {}
        }
    }

    let annotations = Arc::new(StdMutex::new(HashMap::new()));
    let transform_annotations = annotations.clone();
    let transform = Box::new(move |mut current: Manifest| {
        for outcome in fetch_results {
            match outcome {
                FetchOutcome::FreshSkip
                | FetchOutcome::ValidationFailed { .. }
                | FetchOutcome::Failed { .. } => {}
                FetchOutcome::NotModified { upname } => {
                    if let Some(meta) = current.uplinks.get_mut(&upname) {
                        meta.fetched = now;
                    }
                }
                FetchOutcome::Fetched {
                    upname,
                    manifest: remote,
                    etag,
                } => {
                    for (key, remote_time) in remote.time {
                        current
                            .time
                            .entry(key)
                            .and_modify(|local_time| {
                                if remote_time > *local_time {
                                    *local_time = remote_time.clone();
                                }
                            })
                            .or_insert(remote_time);
                    }

                    for (version, remote_record) in remote.versions {
                        let local_has_tarball = current
                            .versions
                            .get(&version)
                            .map(|v| v.dist.tarball.is_some())
                            .unwrap_or(false);
                        if !local_has_tarball {
                            if cache_enabled_by_upname.get(&upname).copied().unwrap_or(false) {
                                if let Some(tarball) = &remote_record.dist.tarball {
                                    if let Some(filename) = tarball.path_segments().and_then(|mut s| s.next_back()) {
                                        current.distfiles.insert(
                                            filename.to_string(),
                                            DistFileEntry {
                                                url: tarball.clone(),
                                                sha: remote_record.dist.shasum.clone(),
                                            },
                                        );
                                    }
                                }
                            }
                            current.versions.insert(version.clone(), remote_record);
                            transform_annotations
                                .lock()
                                .expect("annotation mutex is never poisoned")
                                .insert(version, upname.clone());
                        }
                    }

                    for (tag, version) in remote.dist_tags {
                        current.dist_tags.entry(tag).or_insert(version);
                    }

                    current.uplinks.insert(upname, UplinkMeta { etag, fetched: now });
                }
            }
        }
        current
    });

    let mut manifest = storage.update_package(name, transform).await?;

    let annotations = match Arc::try_unwrap(annotations) {
        Ok(mutex) => mutex.into_inner().expect("annotation mutex is never poisoned"),
        Err(shared) => shared
            .lock()
            .expect("annotation mutex is never poisoned")
            .clone(),
    };

    let mut filter_errors = Vec::new();
    for filter in filters {
        if let Err(e) = filter.apply(&mut manifest, &annotations) {
            filter_errors.push(e);
        }
    }

    manifest.normalize();

    Ok(MergeOutcome {
        manifest,
        annotations,
        uplink_failures,
        filter_errors,
    })
}

/// Whether `tag` is the reserved `latest` dist-tag (§3).
pub fn is_latest_tag(tag: &str) -> bool {
    tag == LATEST_TAG
}

#[cfg(test)]
mod tests {
    use cairn_storage::FsStorage;
    use cairn_uplink::UplinkConfig;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[async_std::test]
    async fn cold_miss_single_uplink_hit_populates_distfiles_and_uplinks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "left-pad",
                "versions": {
                    "1.0.0": {"dist": {"tarball": "https://u/left-pad-1.0.0.tgz"}}
                },
                "dist-tags": {"latest": "1.0.0"}
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let uplink = Arc::new(Uplink::new(UplinkConfig::new(
            "npm",
            server.uri().parse().unwrap(),
        )));

        let outcome = merge(&storage, &[uplink], &[], "left-pad", MergeOptions::default())
            .await
            .unwrap();

        let v: Version = "1.0.0".parse().unwrap();
        assert!(outcome.manifest.versions.contains_key(&v));
        assert_eq!(outcome.annotations.get(&v).map(String::as_str), Some("npm"));
        assert!(outcome.manifest.uplinks.contains_key("npm"));
        assert_eq!(
            outcome.manifest.distfiles.get("left-pad-1.0.0.tgz").map(|d| d.url.as_str()),
            Some("https://u/left-pad-1.0.0.tgz")
        );
        assert!(outcome.uplink_failures.is_empty());
    }

    #[async_std::test]
    async fn fresh_uplink_within_maxage_skips_network() {
        let server = MockServer::start().await;
        // No mock registered: a request would fail the test via 404/connection.

        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut local = Manifest::empty("left-pad");
        local.uplinks.insert(
            "npm".into(),
            UplinkMeta {
                etag: None,
                fetched: now_ms(),
            },
        );
        storage.create_package("left-pad", &local).await.unwrap();

        let uplink = Arc::new(Uplink::new(
            UplinkConfig::new("npm", server.uri().parse().unwrap())
                .maxage(std::time::Duration::from_secs(3600)),
        ));

        let outcome = merge(&storage, &[uplink], &[], "left-pad", MergeOptions::default())
            .await
            .unwrap();

        assert!(outcome.uplink_failures.is_empty());
        assert!(outcome.manifest.versions.is_empty());
    }

    #[async_std::test]
    async fn absent_locally_with_all_timeouts_is_service_unavailable() {
        // Port 1 is reserved/unroutable; request fails immediately as a
        // connection error, which `UplinkError::is_timeout_class` treats as
        // timeout-class.
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let uplink = Arc::new(Uplink::new(
            UplinkConfig::new("npm", "http://127.0.0.1:1".parse().unwrap())
                .timeout(std::time::Duration::from_millis(200)),
        ));

        let err = merge(&storage, &[uplink], &[], "left-pad", MergeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MergeError::ServiceUnavailable(_)));
    }

    #[async_std::test]
    async fn no_local_and_no_uplinks_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let err = merge(&storage, &[], &[], "left-pad", MergeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MergeError::NotFound(_)));
    }

    #[async_std::test]
    async fn cancelling_mid_fetch_aborts_the_fan_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "left-pad", "versions": {}}))
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let uplink = Arc::new(Uplink::new(UplinkConfig::new(
            "npm",
            server.uri().parse().unwrap(),
        )));

        let cancel = cairn_common::CancelToken::new();
        let watcher = cancel.clone();
        async_std::task::spawn(async move {
            async_std::task::sleep(std::time::Duration::from_millis(30)).await;
            watcher.cancel();
        });

        let started = std::time::Instant::now();
        let err = merge(
            &storage,
            &[uplink],
            &[],
            "left-pad",
            MergeOptions {
                uplinks_look: true,
                cancel,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MergeError::Cancelled(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[async_std::test]
    async fn duplicate_version_first_configured_uplink_wins_even_if_slower() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        // `first` is configured first but responds slower than `second`, so a
        // naive completion-order merge would let `second` win instead.
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "name": "left-pad",
                        "versions": {"1.0.0": {"dist": {"tarball": "https://first/left-pad-1.0.0.tgz"}}},
                        "dist-tags": {}
                    }))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .mount(&first)
            .await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "left-pad",
                "versions": {"1.0.0": {"dist": {"tarball": "https://second/left-pad-1.0.0.tgz"}}},
                "dist-tags": {}
            })))
            .mount(&second)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let first_uplink = Arc::new(Uplink::new(UplinkConfig::new("first", first.uri().parse().unwrap())));
        let second_uplink = Arc::new(Uplink::new(UplinkConfig::new("second", second.uri().parse().unwrap())));

        let outcome = merge(
            &storage,
            &[first_uplink, second_uplink],
            &[],
            "left-pad",
            MergeOptions::default(),
        )
        .await
        .unwrap();

        let v: Version = "1.0.0".parse().unwrap();
        assert_eq!(
            outcome.manifest.versions.get(&v).and_then(|r| r.dist.tarball.as_ref()).map(|u| u.as_str()),
            Some("https://first/left-pad-1.0.0.tgz")
        );
        assert_eq!(outcome.annotations.get(&v).map(String::as_str), Some("first"));
    }
}
