pub mod error;
pub(crate) mod url;

pub use error::{Error, Result};

/// Sentinel version meaning "no migration has been applied yet".
///
/// Source versions themselves are non-negative; target versions are signed
/// so a down run can land on the empty database.
pub const NIL_VERSION: i64 = -1;
