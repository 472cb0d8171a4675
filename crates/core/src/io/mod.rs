//! I/O operations for reading and writing geospatial rasters
//!
//! The delineation workflow moves every intermediate artifact through this
//! module: GeoTIFF for the self-describing format the external hydrology
//! tools exchange, ESRI ASCII grid for simple interchange.

mod asc;
mod geotiff;

pub use asc::{read_asc_grid, write_asc_grid};
pub use geotiff::{read_geotiff, write_geotiff};

use crate::error::{Error, Result};
use crate::raster::{Raster, RasterElement};
use std::path::Path;

/// Supported on-disk raster formats.
///
/// Resolved once from the file suffix at the I/O boundary; everything past
/// this point dispatches on the variant rather than re-inspecting paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    GeoTiff,
    AscGrid,
}

impl RasterFormat {
    /// Resolve the format from a path suffix.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "tif" | "tiff" => Ok(RasterFormat::GeoTiff),
            "asc" => Ok(RasterFormat::AscGrid),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Read a raster grid, dispatching on the path suffix.
pub fn read_grid<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match RasterFormat::from_path(path)? {
        RasterFormat::GeoTiff => read_geotiff(path, None),
        RasterFormat::AscGrid => read_asc_grid(path),
    }
}

/// Write a raster grid in the requested format.
pub fn write_grid<T, P>(path: P, raster: &Raster<T>, format: RasterFormat) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    match format {
        RasterFormat::GeoTiff => write_geotiff(raster, path),
        RasterFormat::AscGrid => write_asc_grid(path, raster),
    }
}
