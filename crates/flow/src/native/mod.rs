//! In-process hydrology stages
//!
//! The delineation pipeline normally delegates these computations to the
//! external hydrology executables; the implementations here cover small
//! grids, tests, and stand-alone CLI use without the toolset installed.
//! Direction outputs use TauDEM codes throughout, produced and consumed via
//! [`crate::direction`].

mod dinf_accumulation;
mod fill_sinks;
mod flow_accumulation;
mod flow_direction;
mod flow_direction_dinf;
mod stream_threshold;

pub use dinf_accumulation::dinf_accumulation;
pub use fill_sinks::{fill_sinks, FillSinksParams};
pub use flow_accumulation::flow_accumulation;
pub use flow_direction::flow_direction;
pub use flow_direction_dinf::flow_direction_dinf;
pub use stream_threshold::stream_threshold;
