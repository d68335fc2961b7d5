use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::Manifest;

/// Serializes a manifest to its canonical on-disk form: JSON with tab
/// indentation (§6). All writes to storage use this form; reads accept any
/// well-formed JSON regardless of how it was indented.
pub fn to_canonical_json(manifest: &Manifest) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"\t");
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    manifest.serialize(&mut ser)?;
    Ok(buf)
}

pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Manifest> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn uses_tab_indentation() {
        let m = Manifest::empty("foo");
        let bytes = to_canonical_json(&m).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\n\t\""), "expected tab-indented body: {text}");
    }

    #[test]
    fn roundtrips() {
        let m = Manifest::empty("foo");
        let bytes = to_canonical_json(&m).unwrap();
        let back = from_json_slice(&bytes).unwrap();
        assert_eq!(m, back);
    }
}
