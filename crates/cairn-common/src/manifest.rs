use std::collections::HashMap;

use node_semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// The tag name that `updatePackage` and the merge engine treat specially:
/// it must always resolve to a key of `versions` once normalized (§3, P7).
pub const LATEST_TAG: &str = "latest";

/// The canonical on-disk/wire representation of a package's merged state
/// (§3). `Manifest::empty` produces the "freshly generated empty template"
/// the merge engine starts from when there's no local copy yet (§4.4).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub versions: HashMap<Version, VersionRecord>,

    #[serde(default, rename = "dist-tags")]
    pub dist_tags: HashMap<String, Version>,

    #[serde(default)]
    pub time: HashMap<String, String>,

    #[serde(default, rename = "_distfiles")]
    pub distfiles: HashMap<String, DistFileEntry>,

    #[serde(
        default,
        rename = "_attachments",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub attachments: HashMap<String, Value>,

    #[serde(default, rename = "_uplinks")]
    pub uplinks: HashMap<String, UplinkMeta>,

    #[serde(default, rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    #[serde(default)]
    pub users: HashMap<String, bool>,
}

impl Manifest {
    /// The "freshly generated empty template" the merge engine works from
    /// when no local manifest exists yet (§4.4, step "Input").
    pub fn empty(name: impl Into<String>) -> Self {
        Manifest {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Resolve `latest`, an arbitrary dist-tag, or a literal version string
    /// against this manifest's `versions`/`dist-tags`.
    pub fn resolve_version<'a>(&'a self, wanted: Option<&str>) -> Option<(&'a Version, &'a VersionRecord)> {
        let version = match wanted {
            None => self.dist_tags.get(LATEST_TAG)?,
            Some(tag_or_version) => {
                if let Some(v) = self.dist_tags.get(tag_or_version) {
                    v
                } else {
                    let parsed: Version = tag_or_version.parse().ok()?;
                    return self.versions.get_key_value(&parsed);
                }
            }
        };
        self.versions.get_key_value(version)
    }

    /// Drop any dist-tag whose target is no longer a key of `versions`, and
    /// clear `_attachments` (§4.4 step 6, P7).
    pub fn normalize(&mut self) {
        self.dist_tags.retain(|_, v| self.versions.contains_key(v));
        self.attachments.clear();
    }
}

/// Per-version metadata (§3): arbitrary publisher-supplied fields plus the
/// `dist` sub-record the merge engine and tarball pipeline actually care
/// about.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub dist: Dist,

    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// Distribution info for one version (§3, §6). `tarball` is always
/// rewritten to the configured local prefix before a manifest leaves the
/// facade; `_distfiles` keeps the original upstream URL (§6).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tarball: Option<Url>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// The authoritative locator used to re-fetch a cached tarball's source
/// (§3 invariants).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistFileEntry {
    pub url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// Per-uplink freshness record (§3, §4.4 step 2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Wall-clock time, in milliseconds, of the last successful (incl. 304)
    /// fetch from this uplink.
    #[serde(default)]
    pub fetched: u64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_template_has_no_versions() {
        let m = Manifest::empty("left-pad");
        assert_eq!(m.name, "left-pad");
        assert!(m.versions.is_empty());
        assert!(m.dist_tags.is_empty());
    }

    #[test]
    fn resolve_version_prefers_dist_tag_over_literal_version() {
        let mut m = Manifest::empty("foo");
        let v1: Version = "1.0.0".parse().unwrap();
        m.versions.insert(v1.clone(), VersionRecord::default());
        m.dist_tags.insert(LATEST_TAG.into(), v1.clone());

        let (version, _) = m.resolve_version(None).expect("latest should resolve");
        assert_eq!(version, &v1);

        let (version, _) = m
            .resolve_version(Some("1.0.0"))
            .expect("literal version should resolve");
        assert_eq!(version, &v1);

        assert!(m.resolve_version(Some("9.9.9")).is_none());
    }

    #[test]
    fn normalize_drops_dangling_dist_tags_and_clears_attachments() {
        let mut m = Manifest::empty("foo");
        let v1: Version = "1.0.0".parse().unwrap();
        m.versions.insert(v1.clone(), VersionRecord::default());
        m.dist_tags.insert(LATEST_TAG.into(), v1);
        m.dist_tags
            .insert("missing".into(), "9.9.9".parse().unwrap());
        m.attachments
            .insert("foo-1.0.0.tgz".into(), Value::Bool(true));

        m.normalize();

        assert_eq!(m.dist_tags.len(), 1);
        assert!(m.dist_tags.contains_key(LATEST_TAG));
        assert!(m.attachments.is_empty());
    }

    #[test]
    fn roundtrips_through_json() {
        let mut m = Manifest::empty("foo");
        let v1: Version = "1.0.0".parse().unwrap();
        m.versions.insert(
            v1.clone(),
            VersionRecord {
                dist: Dist {
                    tarball: Some("https://example.com/foo-1.0.0.tgz".parse().unwrap()),
                    shasum: Some("deadbeef".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        m.dist_tags.insert(LATEST_TAG.into(), v1);

        let json = serde_json::to_string(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }
}
