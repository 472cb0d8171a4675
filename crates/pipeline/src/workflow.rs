//! The watershed delineation workflow
//!
//! [`Pipeline`] is the linear stage machine: `Configured -> Running(i) ->
//! Succeeded | Failed`. [`delineate`] composes it into the full workflow:
//! pit removal, then the D8 and D-infinity branches forked as concurrent
//! tasks over the shared filled DEM, then threshold selection, outlet
//! snapping, stream definition, and in-process network post-processing.
//!
//! There is no retry and no resume: a `Failed` pipeline stays failed, its
//! artifacts stay on disk for inspection, and a fresh run must be configured
//! from scratch.

use crate::config::{AccumulationSource, DelineationConfig};
use crate::error::{Error, Result};
use crate::files::ArtifactNames;
use crate::runner::{StageOutput, StageRunner};
use crate::stage::StageSpec;
use crate::taudem;
use hydroshed_core::io::{read_grid, write_grid, RasterFormat};
use hydroshed_core::vector::{write_geojson_features, AttributeValue, Feature};
use hydroshed_core::Raster;
use hydroshed_flow::dinf::compress_dinf;
use hydroshed_flow::streamnet::{build_stream_network, segments_to_features};
use geo_types::{Geometry, Point};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Configured,
    Running(usize),
    Succeeded,
    Failed { stage: usize },
}

/// A fixed sequence of stages executed at most once.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
    working_dir: PathBuf,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(stages: Vec<StageSpec>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            stages,
            working_dir: working_dir.into(),
            state: PipelineState::Configured,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Run every stage in order, stopping at the first failure.
    ///
    /// A pipeline runs at most once; re-running a finished or failed
    /// pipeline is a configuration error.
    pub async fn run(
        &mut self,
        runner: &dyn StageRunner,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.state != PipelineState::Configured {
            return Err(Error::Configuration(
                "pipeline has already run; configure a fresh run".to_string(),
            ));
        }

        for index in 0..self.stages.len() {
            self.state = PipelineState::Running(index);
            let stage = &self.stages[index];

            if cancel.is_cancelled() {
                self.state = PipelineState::Failed { stage: index };
                return Err(Error::Cancelled);
            }

            tracing::info!(stage = %stage.name, index, "running stage");
            if let Err(e) = execute_stage(runner, stage, &self.working_dir, cancel).await {
                self.state = PipelineState::Failed { stage: index };
                return Err(e);
            }
        }

        self.state = PipelineState::Succeeded;
        Ok(())
    }
}

/// Check preconditions, run one stage, check postconditions.
///
/// Inputs must exist and be non-empty beforehand (a zero-byte file is a
/// failed prior stage, not a valid empty result); declared outputs must
/// exist and be non-empty afterwards even when the process reported
/// success.
pub async fn execute_stage(
    runner: &dyn StageRunner,
    stage: &StageSpec,
    working_dir: &Path,
    cancel: &CancellationToken,
) -> Result<StageOutput> {
    for input in &stage.inputs {
        if !is_nonempty_file(input) {
            return Err(Error::PreconditionFailure {
                stage: stage.name.clone(),
                path: input.clone(),
            });
        }
    }

    let output = runner.run(stage, working_dir, cancel).await?;

    if !output.success() {
        return Err(Error::StageExecutionFailure {
            stage: stage.name.clone(),
            code: output.exit_code,
            diagnostics: output.diagnostics(),
        });
    }

    for artifact in &stage.outputs {
        if !is_nonempty_file(artifact) {
            return Err(Error::StageProducedNoOutput {
                stage: stage.name.clone(),
                path: artifact.clone(),
            });
        }
    }

    Ok(output)
}

fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Summary of a completed delineation run.
#[derive(Debug)]
pub struct DelineationReport {
    pub artifacts: ArtifactNames,
    /// Stream threshold actually applied
    pub threshold: f64,
    /// Surviving stream segments after post-processing
    pub segment_count: usize,
    /// Maximum angle error introduced by D-infinity compression
    pub dinf_quantization_error: f64,
}

/// Run the full watershed delineation workflow.
pub async fn delineate(
    config: &DelineationConfig,
    runner: &dyn StageRunner,
    cancel: &CancellationToken,
) -> Result<DelineationReport> {
    config.validate()?;
    std::fs::create_dir_all(&config.working_dir)?;

    let names = ArtifactNames::new(&config.working_dir);
    let np = config.processes;
    let wd = names.workspace.clone();

    // Stage 1: pit removal
    tracing::info!("removing pits from the DEM");
    execute_stage(
        runner,
        &taudem::pitremove(np, &config.dem, &names.filled_dem),
        &wd,
        cancel,
    )
    .await?;

    // Stages 2-5: the D8 and D-infinity branches are independent once the
    // filled DEM exists; fork them as concurrent tasks with disjoint output
    // sets and join before anything that needs both.
    tracing::info!("computing flow directions and accumulation (D8 and D-infinity branches)");
    let mut d8_branch = Pipeline::new(
        vec![
            taudem::d8flowdir(np, &names.filled_dem, &names.d8_flow_dir, &names.d8_slope),
            taudem::aread8(np, &names.d8_flow_dir, &names.d8_acc, None, false),
        ],
        &wd,
    );
    let mut dinf_branch = Pipeline::new(
        vec![
            taudem::dinfflowdir(np, &names.filled_dem, &names.dinf_angle, &names.dinf_slope),
            taudem::areadinf(np, &names.dinf_angle, &names.dinf_acc, None, false),
        ],
        &wd,
    );

    let (d8_result, dinf_result) =
        tokio::join!(d8_branch.run(runner, cancel), dinf_branch.run(runner, cancel));
    d8_result?;
    dinf_result?;

    // Quantize the D-infinity angles for compact storage
    let angles: Raster<f64> = read_grid(&names.dinf_angle)?;
    let compressed = compress_dinf(&angles);
    write_grid(&names.dinf_codes, compressed.codes(), RasterFormat::GeoTiff)?;
    write_grid(&names.dinf_weights, compressed.weights(), RasterFormat::GeoTiff)?;
    let dinf_quantization_error = compressed.max_error();

    // Provisional stream raster from the mean accumulation, used only to
    // snap outlets before the real threshold is known.
    let acc_path = match config.accumulation_source {
        AccumulationSource::D8 => names.d8_acc.clone(),
        AccumulationSource::Dinf => names.dinf_acc.clone(),
    };
    let acc: Raster<f64> = read_grid(&acc_path)?;
    let stats = acc.statistics();
    let mean_acc = stats.mean.ok_or_else(|| {
        Error::Configuration("accumulation grid holds no valid cells".to_string())
    })?;
    let std_acc = stats.std_dev.unwrap_or(0.0);

    tracing::info!(mean_acc, "defining provisional streams");
    execute_stage(
        runner,
        &taudem::threshold(np, &acc_path, &names.stream_provisional, mean_acc),
        &wd,
        cancel,
    )
    .await?;

    // Outlets: user-supplied, or the maximum-accumulation cell by default
    let outlet = match &config.outlet {
        Some(path) => path.clone(),
        None => {
            let (row, col, value) = acc.max_cell().ok_or_else(|| {
                Error::Configuration("accumulation grid holds no valid cells".to_string())
            })?;
            tracing::info!(row, col, accumulation = ?value, "selected default outlet");
            write_default_outlet(&names.outlet_default, &acc, row, col)?;
            names.outlet_default.clone()
        }
    };

    tracing::info!("snapping outlets onto the stream raster");
    execute_stage(
        runner,
        &taudem::moveoutletstostrm(
            np,
            &names.d8_flow_dir,
            &names.stream_provisional,
            &outlet,
            &names.outlet_snapped,
            config.snap_distance,
        ),
        &wd,
        cancel,
    )
    .await?;

    // Optionally restrict accumulation to the snapped outlets
    let mut acc_for_streams = acc_path.clone();
    if config.single_basin {
        tracing::info!("recomputing accumulation restricted to the outlets");
        execute_stage(
            runner,
            &taudem::aread8(
                np,
                &names.d8_flow_dir,
                &names.d8_acc_weighted,
                Some(&names.outlet_snapped),
                false,
            ),
            &wd,
            cancel,
        )
        .await?;
        if config.accumulation_source == AccumulationSource::D8 {
            acc_for_streams = names.d8_acc_weighted.clone();
        }
    }

    // Threshold: explicit, or recommended by drop analysis over the grid
    // that will actually be thresholded
    let threshold = match config.threshold.filter(|&t| t > 0.0) {
        Some(t) => t,
        None => {
            let (mean, std) = if acc_for_streams == acc_path {
                (mean_acc, std_acc)
            } else {
                let weighted: Raster<f64> = read_grid(&acc_for_streams)?;
                let stats = weighted.statistics();
                (stats.mean.unwrap_or(mean_acc), stats.std_dev.unwrap_or(std_acc))
            };
            select_threshold_by_drop_analysis(
                config,
                runner,
                &names,
                &acc_for_streams,
                mean,
                std,
                cancel,
            )
            .await?
        }
    };

    // Final stream raster
    tracing::info!(threshold, "defining streams");
    execute_stage(
        runner,
        &taudem::threshold(np, &acc_for_streams, &names.stream_raster, threshold),
        &wd,
        cancel,
    )
    .await?;

    // Optional distance-to-stream product
    if config.stream_distance {
        tracing::info!(method = ?config.distance_method, "computing distance to stream");
        execute_stage(
            runner,
            &taudem::dinfdistdown(
                np,
                &names.dinf_angle,
                &names.filled_dem,
                &names.dinf_slope,
                &names.stream_raster,
                config.distance_method,
                &names.dist_to_stream,
            ),
            &wd,
            cancel,
        )
        .await?;
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // Stage 9: in-process stream network ordering and vectorization
    tracing::info!("ordering and vectorizing the stream network");
    let streams: Raster<i32> = read_grid(&names.stream_raster)?;
    let flow_dir: Raster<i32> = read_grid(&names.d8_flow_dir)?;
    let network = build_stream_network(&streams, &flow_dir)?;

    write_grid(&names.stream_ids, &network.stream_ids, RasterFormat::GeoTiff)?;
    write_grid(&names.subbasins, &network.subbasins, RasterFormat::GeoTiff)?;
    let features = segments_to_features(&network.segments, &network.stream_ids);
    write_geojson_features(&names.stream_net, &features)?;

    tracing::info!(
        segments = network.segments.len(),
        "watershed delineation finished"
    );

    Ok(DelineationReport {
        artifacts: names,
        threshold,
        segment_count: network.segments.len(),
        dinf_quantization_error,
    })
}

/// Run drop analysis over [mean - std, mean + std] and parse the
/// recommendation; fall back to the interval midpoint when the tool
/// produces no drop file.
async fn select_threshold_by_drop_analysis(
    config: &DelineationConfig,
    runner: &dyn StageRunner,
    names: &ArtifactNames,
    acc_path: &Path,
    mean_acc: f64,
    std_acc: f64,
    cancel: &CancellationToken,
) -> Result<f64> {
    let min_thresh = if mean_acc - std_acc > 0.0 {
        mean_acc - std_acc
    } else {
        mean_acc
    };
    let max_thresh = mean_acc + std_acc;
    let midpoint = 0.5 * (max_thresh - min_thresh) + min_thresh;

    tracing::info!(min_thresh, max_thresh, "running drop analysis");
    let stage = taudem::dropanalysis(
        config.processes,
        &names.filled_dem,
        &names.d8_flow_dir,
        acc_path,
        acc_path,
        &names.outlet_snapped,
        min_thresh,
        max_thresh,
        20,
        true,
        &names.drop_analysis,
    );

    match execute_stage(runner, &stage, &names.workspace, cancel).await {
        Ok(_) => {}
        Err(Error::StageProducedNoOutput { .. }) => {
            tracing::warn!("drop analysis produced no recommendation, using interval midpoint");
            return Ok(midpoint);
        }
        Err(e) => return Err(e),
    }

    let text = std::fs::read_to_string(&names.drop_analysis)?;
    match text.split_whitespace().last().and_then(|t| t.parse::<f64>().ok()) {
        Some(threshold) if threshold > 0.0 => {
            tracing::info!(threshold, "drop analysis selected threshold");
            Ok(threshold)
        }
        _ => {
            tracing::warn!("drop file is not parseable, using interval midpoint");
            Ok(midpoint)
        }
    }
}

/// Write the default outlet (cell of maximum contributing area) as a point
/// feature.
fn write_default_outlet(
    path: &Path,
    acc: &Raster<f64>,
    row: usize,
    col: usize,
) -> Result<()> {
    let (x, y) = acc.pixel_to_geo(col, row);
    let mut feature = Feature::new(Geometry::Point(Point::new(x, y)));
    feature.id = Some(1);
    feature.set_property("ID", AttributeValue::Int(1));
    write_geojson_features(path, &[feature])?;
    Ok(())
}
