use std::path::PathBuf;

/// Turns a package name into a filesystem-safe relative path under a
/// storage root (§6 storage layout). Scoped names (`@scope/name`) become
/// two path segments, matching how the rest of the npm-registry ecosystem
/// lays out scoped packages on disk; each segment is independently
/// sanitized.
pub fn package_storage_path(name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    if let Some(rest) = name.strip_prefix('@') {
        if let Some((scope, pkg)) = rest.split_once('/') {
            path.push(format!("@{}", sanitize_segment(scope)));
            path.push(sanitize_segment(pkg));
            return path;
        }
    }
    path.push(sanitize_segment(name));
    path
}

/// Strips path separators and null bytes from a single filesystem segment
/// (§4.3: "Filesystem filenames are sanitized to strip path separators and
/// null bytes before being joined with the package's storage root.").
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect()
}
