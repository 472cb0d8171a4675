//! # Hydroshed Flow
//!
//! Flow-direction algebra and stream network post-processing:
//!
//! - **direction**: D8 direction codes, the three supported integer encodings
//!   (TauDEM, ArcGIS, Whitebox), downstream indexing and cell-length
//!   correction
//! - **dinf**: D-infinity continuous angles, decomposition into weighted D8
//!   pairs, and the quantized on-disk compression
//! - **streamnet**: stream link identification, ordering, tracing, and
//!   subbasin labeling from a stream raster plus a D8 direction grid
//! - **native**: in-process fallbacks for the pit-removal, flow-direction,
//!   accumulation, and stream-threshold stages, for small grids and tests
//!
//! Everything in `direction` and `dinf` is pure and deterministic; nothing
//! here touches the filesystem.

pub mod direction;
pub mod dinf;
pub mod error;
pub mod native;
pub mod streamnet;

pub(crate) mod maybe_rayon;

pub use direction::{D8Direction, DirScheme};
pub use dinf::{CompressedDinf, DinfPair};
pub use error::{Error, Result};
pub use streamnet::{StreamNetwork, StreamSegment};
