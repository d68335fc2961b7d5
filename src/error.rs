use miette::Diagnostic;
use thiserror::Error;

/// The seven-member error taxonomy a routing layer maps to HTTP status
/// (§6, §7), independent of which sub-crate actually raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ResourceUnavailable,
    ServiceUnavailable,
    ValidationFailure,
    FilterError,
    InternalError,
}

/// The facade's unified error type. Wraps every sub-crate's error via
/// `#[from]`; [`CairnError::kind`] flattens all of them to the taxonomy in
/// §7 so callers never need to match on crate-specific variants.
#[derive(Debug, Error, Diagnostic)]
pub enum CairnError {
    #[error("package `{0}` not found")]
    #[diagnostic(code(cairn::not_found))]
    NotFound(String),

    #[error("package `{name}` has no version or tag `{wanted}`")]
    #[diagnostic(code(cairn::version_not_exist))]
    VersionNotExist { name: String, wanted: String },

    #[error("`{0}` already exists")]
    #[diagnostic(code(cairn::conflict))]
    Conflict(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Merge(#[from] cairn_merge::MergeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] cairn_storage::StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tarball(#[from] cairn_tarball::TarballError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Uplink(#[from] cairn_uplink::UplinkError),
}

impl CairnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CairnError::NotFound(_) | CairnError::VersionNotExist { .. } => ErrorKind::NotFound,
            CairnError::Conflict(_) => ErrorKind::Conflict,
            CairnError::Merge(e) => merge_error_kind(e),
            CairnError::Storage(e) => storage_error_kind(e),
            CairnError::Tarball(e) => tarball_error_kind(e),
            CairnError::Uplink(_) => ErrorKind::InternalError,
        }
    }
}

fn merge_error_kind(e: &cairn_merge::MergeError) -> ErrorKind {
    match e {
        cairn_merge::MergeError::NotFound(_) => ErrorKind::NotFound,
        cairn_merge::MergeError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
        cairn_merge::MergeError::Cancelled(_) => ErrorKind::InternalError,
        cairn_merge::MergeError::Storage(inner) => storage_error_kind(inner),
    }
}

fn storage_error_kind(e: &cairn_storage::StorageError) -> ErrorKind {
    match e {
        cairn_storage::StorageError::NotFound(_) => ErrorKind::NotFound,
        cairn_storage::StorageError::Conflict(_) => ErrorKind::Conflict,
        cairn_storage::StorageError::ResourceUnavailable(_) => ErrorKind::InternalError,
        cairn_storage::StorageError::MalformedManifest { .. } => ErrorKind::InternalError,
        cairn_storage::StorageError::Io(_) => ErrorKind::InternalError,
    }
}

fn tarball_error_kind(e: &cairn_tarball::TarballError) -> ErrorKind {
    match e {
        cairn_tarball::TarballError::NotFound(_) => ErrorKind::NotFound,
        cairn_tarball::TarballError::Cancelled => ErrorKind::InternalError,
        cairn_tarball::TarballError::Storage(inner) => storage_error_kind(inner),
        cairn_tarball::TarballError::Uplink(_) => ErrorKind::InternalError,
        cairn_tarball::TarballError::Io(_) => ErrorKind::InternalError,
    }
}

pub type Result<T> = std::result::Result<T, CairnError>;
