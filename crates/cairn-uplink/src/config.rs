use std::time::Duration;

use regex::RegexSet;
use url::Url;

/// Credential attached to every outgoing request for an uplink, the way
/// `oro-client`'s `AuthMiddleware` attaches one per-registry credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Basic { username: String, password: String },
}

/// Per-uplink configuration (§4.2): base URL, auth, freshness window,
/// timeout budget, and whether this uplink caches tarballs it serves.
#[derive(Clone)]
pub struct UplinkConfig {
    /// Stable identifier used as the `_uplinks` key (§3) and in tracing.
    pub upname: String,
    pub base_url: Url,
    pub credential: Option<Credential>,
    /// Freshness window: a manifest fetched from this uplink within
    /// `maxage` of now is served without a network call (§4.4 step 2a, P3).
    pub maxage: Duration,
    pub timeout: Duration,
    pub cache_enabled: bool,
    pub fetch_retries: u32,
    /// Package-name patterns this uplink has "proxy access" to (§4.3, §4.4
    /// step 1). `None` means unconstrained (matches everything).
    pub proxy_access: Option<RegexSet>,
}

impl UplinkConfig {
    pub fn new(upname: impl Into<String>, base_url: Url) -> Self {
        UplinkConfig {
            upname: upname.into(),
            base_url,
            credential: None,
            maxage: Duration::from_secs(60 * 60 * 24 * 2),
            timeout: Duration::from_secs(30),
            cache_enabled: true,
            fetch_retries: 2,
            proxy_access: None,
        }
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn maxage(mut self, maxage: Duration) -> Self {
        self.maxage = maxage;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn fetch_retries(mut self, fetch_retries: u32) -> Self {
        self.fetch_retries = fetch_retries;
        self
    }

    pub fn proxy_access(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.proxy_access = RegexSet::new(patterns).ok();
        self
    }

    /// Whether this uplink is configured with proxy access to `name`
    /// (§4.3, §4.4 step 1).
    pub fn allows_package(&self, name: &str) -> bool {
        match &self.proxy_access {
            Some(set) => set.is_match(name),
            None => true,
        }
    }

    /// An ephemeral, caching-enabled uplink for a tarball URL with no
    /// matching configured uplink (§4.5 step 3c, §9 design note). Such
    /// uplinks never participate in future manifest syncs: they're built
    /// fresh per call and never inserted into an `UplinkTable`.
    pub fn adhoc(url: &Url) -> Self {
        let mut base = url.clone();
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);
        UplinkConfig {
            upname: format!("adhoc:{}", url.host_str().unwrap_or("unknown")),
            base_url: base,
            credential: None,
            maxage: Duration::from_secs(0),
            timeout: Duration::from_secs(30),
            cache_enabled: true,
            fetch_retries: 2,
            proxy_access: None,
        }
    }
}
