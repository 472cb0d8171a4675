//! # Hydroshed Core
//!
//! Core types, traits and I/O for the hydroshed watershed delineation toolkit.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type with nodata semantics
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `CRS`: Coordinate Reference System handling
//! - I/O for GeoTIFF and ESRI ASCII grid rasters
//! - Minimal vector feature types and GeoJSON line output

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
}
