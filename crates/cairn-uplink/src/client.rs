use std::time::Duration;

use cairn_common::Manifest;
use futures::{AsyncRead, TryStreamExt};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use url::Url;

use crate::config::{Credential, UplinkConfig};
use crate::error::{Result, UplinkError};

/// A tarball byte stream from an uplink (§4.5): boxed so the tarball
/// pipeline can tee it without knowing the concrete transport type.
pub type TarballStream = Box<dyn AsyncRead + Unpin + Send + Sync>;

/// Outcome of a conditional metadata fetch (§4.4 step 2b/2c).
pub enum MetadataFetch {
    /// Upstream responded 304: the cached copy is still good. Carries the
    /// response's `ETag`, if any, in case it changed even though the body
    /// didn't (not expected, but cheap to keep in sync).
    NotModified,
    Fresh { manifest: Manifest, etag: Option<String> },
}

/// One configured client for a single upstream registry (§4.2). Built once
/// per uplink and reused across requests; `adhoc` uplinks are built fresh
/// per tarball fetch and discarded.
#[derive(Clone)]
pub struct Uplink {
    config: UplinkConfig,
    client: ClientWithMiddleware,
}

impl Uplink {
    pub fn new(config: UplinkConfig) -> Self {
        let core = reqwest::ClientBuilder::new()
            .user_agent(concat!("cairn/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .expect("TLS backend and DNS resolver should always initialize");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.fetch_retries);
        let client = ClientBuilder::new(core)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Uplink { config, client }
    }

    pub fn adhoc(url: &Url) -> Self {
        Uplink::new(UplinkConfig::adhoc(url))
    }

    pub fn upname(&self) -> &str {
        &self.config.upname
    }

    pub fn maxage(&self) -> Duration {
        self.config.maxage
    }

    pub fn cache_enabled(&self) -> bool {
        self.config.cache_enabled
    }

    /// Whether this uplink has proxy access to `name` (§4.3, §4.4 step 1).
    pub fn allows_package(&self, name: &str) -> bool {
        self.config.allows_package(name)
    }

    /// Whether this uplink was configured with a restricted proxy-access
    /// pattern, as opposed to being the unconstrained default (§10.6,
    /// `UplinkTable::pick_for_scope`).
    pub fn has_scoped_access(&self) -> bool {
        self.config.proxy_access.is_some()
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.credential {
            Some(Credential::Bearer(token)) => builder.bearer_auth(token),
            Some(Credential::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            None => builder,
        }
    }

    /// Conditional GET for a package's metadata document (§4.4 step 2).
    /// `etag` is the value recorded in `_uplinks[upname].etag`, if any.
    pub async fn get_remote_metadata(
        &self,
        package_name: &str,
        etag: Option<&str>,
    ) -> Result<MetadataFetch> {
        let path = package_name.to_string();
        let url = self.config.base_url.join(&path)?;

        let mut req = self.authed(self.client.get(url)).header("Accept", "application/json");
        if let Some(etag) = etag {
            req = req.header("If-None-Match", etag);
        }

        let res = req.send().await?;

        if res.status() == StatusCode::NOT_MODIFIED {
            return Ok(MetadataFetch::NotModified);
        }

        if !res.status().is_success() {
            return Err(UplinkError::BadStatus {
                upname: self.config.upname.clone(),
                path,
                status: res.status().as_u16(),
            });
        }

        let new_etag = res
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = res.bytes().await.map_err(reqwest_middleware::Error::from)?;
        let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|source| UplinkError::MalformedJson {
            upname: self.config.upname.clone(),
            path,
            source,
        })?;

        Ok(MetadataFetch::Fresh {
            manifest,
            etag: new_etag,
        })
    }

    /// Streams a tarball from `url` (§4.5 step 3), without buffering it in
    /// memory.
    pub async fn fetch_tarball(&self, url: &Url) -> Result<TarballStream> {
        let res = self.authed(self.client.get(url.clone())).send().await?;

        if !res.status().is_success() {
            return Err(UplinkError::BadStatus {
                upname: self.config.upname.clone(),
                path: url.to_string(),
                status: res.status().as_u16(),
            });
        }

        let stream = res
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(stream.into_async_read()))
    }
}
