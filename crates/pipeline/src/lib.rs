//! # Hydroshed Pipeline
//!
//! Orchestration of the watershed delineation workflow: a dependency-ordered
//! sequence of hydrological grid-processing stages, each consuming and
//! producing raster or vector artifacts on durable storage, with
//! partial-failure detection and abort semantics.
//!
//! The numerical flow routing itself is external: stages map to executables
//! of a hydrology toolset (or to the in-process [`runner::NativeStageRunner`]
//! for small grids), invoked through the [`runner::StageRunner`] seam. The
//! pipeline checks that declared input artifacts exist before each stage and
//! that declared outputs exist afterwards, stops at the first failure, never
//! retries, and leaves all artifacts on disk for inspection.

pub mod config;
pub mod error;
pub mod files;
pub mod runner;
pub mod stage;
pub mod taudem;
pub mod workflow;

pub use config::{AccumulationSource, DelineationConfig, DistanceMethod};
pub use error::{Error, Result};
pub use files::ArtifactNames;
pub use runner::{NativeStageRunner, ProcessRunner, StageOutput, StageRunner};
pub use stage::{StageArg, StageSpec};
pub use workflow::{delineate, execute_stage, DelineationReport, Pipeline, PipelineState};
