//! The Storage Facade (§4.1): the top-level public API of the package
//! registry proxy-cache core, wiring the Merge Engine
//! ([`cairn_merge`]), the Tarball Pipeline ([`cairn_tarball`]), and a
//! [`cairn_storage::LocalStorage`] plugin together behind one surface for
//! the (out-of-scope) HTTP routing layer to call.

mod config;
mod error;
mod facade;

pub use config::FacadeOpts;
pub use error::{CairnError, ErrorKind, Result};
pub use facade::{Facade, GetPackageOptions, PackageResult};

pub use cairn_common::CancelToken;
pub use cairn_merge::{Filter, FilterError, UplinkTable};
pub use cairn_storage::{FsStorage, LocalStorage};
pub use cairn_uplink::{Credential, Uplink, UplinkConfig};
