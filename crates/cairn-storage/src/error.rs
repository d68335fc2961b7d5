use miette::Diagnostic;
use thiserror::Error;

/// Error type returned by [`crate::LocalStorage`] implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("package `{0}` not found")]
    #[diagnostic(code(cairn_storage::not_found))]
    NotFound(String),

    #[error("`{0}` already exists")]
    #[diagnostic(code(cairn_storage::conflict))]
    Conflict(String),

    /// Lock contention beyond the retry budget (§4.3: surfaced to callers
    /// as an internal error, never as its own HTTP status).
    #[error("resource temporarily unavailable: {0}")]
    #[diagnostic(code(cairn_storage::resource_unavailable))]
    ResourceUnavailable(String),

    #[error("malformed manifest for `{name}`: {source}")]
    #[diagnostic(code(cairn_storage::malformed_manifest))]
    MalformedManifest {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("i/o error: {0}")]
    #[diagnostic(code(cairn_storage::io))]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
