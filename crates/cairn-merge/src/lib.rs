//! The Merge Engine (§4.4): fuses a package's local manifest with
//! responses from its configured uplinks into one canonical document,
//! applies registered filters, and persists the result.

mod engine;
mod error;
mod filter;
mod uplink_table;

pub use engine::{is_latest_tag, merge, MergeOptions, MergeOutcome, UplinkFailure};
pub use error::{MergeError, Result};
pub use filter::{Filter, FilterError};
pub use uplink_table::UplinkTable;
