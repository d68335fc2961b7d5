//! Shared data model for the cairn registry proxy-cache core: the manifest
//! document shape (§3 of the spec), filesystem-name sanitization, and the
//! canonical tab-indented JSON codec used for everything written to disk.

mod cancel;
mod codec;
mod manifest;
mod sanitize;

pub use cancel::CancelToken;
pub use codec::*;
pub use manifest::*;
pub use sanitize::*;
