use std::sync::Arc;

use cairn_uplink::Uplink;

/// The process-wide set of configured uplinks (§9: "treat as an
/// immutable-after-init dependency passed to the facade"). Built once from
/// configuration and shared via `Arc` by every merge/tarball call.
#[derive(Clone, Default)]
pub struct UplinkTable {
    uplinks: Vec<Arc<Uplink>>,
}

impl UplinkTable {
    pub fn new(uplinks: Vec<Arc<Uplink>>) -> Self {
        UplinkTable { uplinks }
    }

    pub fn all(&self) -> &[Arc<Uplink>] {
        &self.uplinks
    }

    /// Uplinks configured with proxy access to `name` (§4.4 step 1).
    pub fn candidates_for(&self, name: &str) -> Vec<Arc<Uplink>> {
        self.uplinks
            .iter()
            .filter(|u| u.allows_package(name))
            .cloned()
            .collect()
    }

    /// The first configured uplink with proxy access to `name`, used to
    /// pick an owner for an already-known tarball URL (§4.5 step 3c).
    pub fn first_for(&self, name: &str) -> Option<Arc<Uplink>> {
        self.uplinks.iter().find(|u| u.allows_package(name)).cloned()
    }

    /// Picks the uplink a scoped package's requests should flow through
    /// (§10.6): the first uplink with a restricted proxy-access pattern
    /// matching `@scope`, falling back to the first unrestricted (default)
    /// uplink if none is scope-specific. Mirrors `NpmFetcher::pick_registry`'s
    /// scope-then-default lookup order.
    pub fn pick_for_scope(&self, scope: &str) -> Option<Arc<Uplink>> {
        let probe = format!("@{scope}/probe");
        self.uplinks
            .iter()
            .find(|u| u.has_scoped_access() && u.allows_package(&probe))
            .or_else(|| self.uplinks.iter().find(|u| !u.has_scoped_access()))
            .cloned()
    }
}
