use std::collections::HashMap;

use cairn_common::Manifest;
use node_semver::Version;
use thiserror::Error;

/// A failure raised by a [`Filter`] (§4.4 step 5): recorded alongside the
/// merge result rather than aborting it.
#[derive(Debug, Error)]
#[error("filter `{filter}` failed: {message}")]
pub struct FilterError {
    pub filter: String,
    pub message: String,
}

/// A pluggable post-merge transform (§4.4 step 5, §6). Filters run serially
/// in registration order against the fan-out's hidden per-version
/// annotation (`version -> uplink name`) so they can make decisions based
/// on provenance without that data leaking into the serialized manifest.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn apply(
        &self,
        manifest: &mut Manifest,
        annotations: &HashMap<Version, String>,
    ) -> Result<(), FilterError>;
}
