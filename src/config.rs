use cairn_merge::{Filter, UplinkTable};
use url::Url;

/// Typed, chainable facade configuration (§10.4), the same shape as
/// `NassunOpts`/`OroClientBuilder`: a host application builds one of these
/// from whatever config format it likes, this workspace never reads a file.
pub struct FacadeOpts {
    pub(crate) uplinks: UplinkTable,
    pub(crate) filters: Vec<Box<dyn Filter>>,
    pub(crate) tarball_prefix: Url,
    pub(crate) offline_publish: bool,
}

impl FacadeOpts {
    /// `tarball_prefix` is the base URL every `dist.tarball` in a returned
    /// manifest gets rewritten under (§6): `<prefix>/<name>/-/<filename>`.
    pub fn new(tarball_prefix: Url) -> Self {
        FacadeOpts {
            uplinks: UplinkTable::default(),
            filters: Vec::new(),
            tarball_prefix,
            offline_publish: false,
        }
    }

    pub fn uplinks(mut self, uplinks: UplinkTable) -> Self {
        self.uplinks = uplinks;
        self
    }

    pub fn filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Whether `addPackage` may proceed when every uplink's existence check
    /// timed out (§4.3 publish-gate).
    pub fn offline_publish(mut self, enabled: bool) -> Self {
        self.offline_publish = enabled;
        self
    }

    pub(crate) fn tarball_url(&self, name: &str, filename: &str) -> Url {
        let mut url = self.tarball_prefix.clone();
        let mut path = url.path().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(name);
        path.push_str("/-/");
        path.push_str(filename);
        url.set_path(&path);
        url
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn rewrites_tarball_urls_under_the_configured_prefix() {
        let opts = FacadeOpts::new("https://registry.example.com".parse().unwrap());
        let url = opts.tarball_url("left-pad", "left-pad-1.0.0.tgz");
        assert_eq!(url.as_str(), "https://registry.example.com/left-pad/-/left-pad-1.0.0.tgz");
    }

    #[test]
    fn preserves_scoped_package_path_segments() {
        let opts = FacadeOpts::new("https://registry.example.com/pkgs".parse().unwrap());
        let url = opts.tarball_url("@babel/core", "core-1.0.0.tgz");
        assert_eq!(
            url.as_str(),
            "https://registry.example.com/pkgs/@babel/core/-/core-1.0.0.tgz"
        );
    }
}
