use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("package `{0}` not found")]
    #[diagnostic(code(cairn_merge::not_found))]
    NotFound(String),

    /// §4.4 step 3, P4: the package is absent locally and every configured
    /// uplink errored with a timeout-class failure.
    #[error("package `{0}` is unavailable: all uplinks timed out")]
    #[diagnostic(code(cairn_merge::service_unavailable))]
    ServiceUnavailable(String),

    /// §5: the caller's [`cairn_common::CancelToken`] fired while the
    /// uplink fan-out was still in flight.
    #[error("merge of `{0}` was cancelled")]
    #[diagnostic(code(cairn_merge::cancelled))]
    Cancelled(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] cairn_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, MergeError>;
