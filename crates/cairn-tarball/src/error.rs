use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TarballError {
    #[error("tarball `{0}` not found")]
    #[diagnostic(code(cairn_tarball::not_found))]
    NotFound(String),

    #[error("operation cancelled")]
    #[diagnostic(code(cairn_tarball::cancelled))]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] cairn_storage::StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Uplink(#[from] cairn_uplink::UplinkError),

    #[error("i/o error: {0}")]
    #[diagnostic(code(cairn_tarball::io))]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TarballError>;
