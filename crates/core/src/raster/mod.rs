//! Raster data structures and operations

mod element;
mod geotransform;
mod grid;

pub use element::{RasterElement, DEFAULT_NODATA};
pub use geotransform::GeoTransform;
pub use grid::{Raster, RasterStatistics};
