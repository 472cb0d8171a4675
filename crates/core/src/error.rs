//! Error types for hydroshed-core

use thiserror::Error;

/// Main error type for core raster/vector operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Unsupported raster format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt header in {path}: {reason}")]
    CorruptHeader { path: String, reason: String },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("No data value not set")]
    NoDataNotSet,

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
