//! Error types for flow-direction algebra and stream network processing

use crate::direction::DirScheme;
use thiserror::Error;

/// Error type for flow operations.
///
/// Encoding errors are always local to a cell and recoverable by the caller
/// (skip the cell or substitute nodata); they never abort a whole grid pass
/// unless the caller chooses to.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown D8 direction code {code} for scheme {scheme:?}")]
    UnknownCode { code: i32, scheme: DirScheme },

    #[error("flow angle {0} outside [0, 2\u{3c0})")]
    AngleOutOfRange(f64),

    #[error(transparent)]
    Core(#[from] hydroshed_core::Error),
}

/// Result type alias for flow operations
pub type Result<T> = std::result::Result<T, Error>;
