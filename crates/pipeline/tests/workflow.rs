//! Pipeline scenario tests against a fake runner, plus a full delineation
//! run against the native in-process runner.

use async_trait::async_trait;
use hydroshed_core::io::{read_grid, write_grid, RasterFormat};
use hydroshed_core::{GeoTransform, Raster};
use hydroshed_pipeline::runner::{StageOutput, StageRunner};
use hydroshed_pipeline::workflow::{delineate, Pipeline, PipelineState};
use hydroshed_pipeline::{DelineationConfig, Error, NativeStageRunner, StageSpec};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Fake runner: records invocations, fails the stages it is told to fail,
/// and writes stub output artifacts for the ones that succeed.
#[derive(Default)]
struct FakeRunner {
    invoked: Mutex<Vec<String>>,
    fail_stage: Option<String>,
    /// Pretend success but skip writing outputs for this stage
    silent_stage: Option<String>,
    /// Park until cancelled when running this stage
    hang_stage: Option<String>,
}

impl FakeRunner {
    fn invocations(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageRunner for FakeRunner {
    async fn run(
        &self,
        stage: &StageSpec,
        _working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, Error> {
        self.invoked.lock().unwrap().push(stage.name.clone());

        if self.hang_stage.as_deref() == Some(stage.name.as_str()) {
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }

        if self.fail_stage.as_deref() == Some(stage.name.as_str()) {
            return Ok(StageOutput {
                exit_code: 2,
                stdout: String::new(),
                stderr: "synthetic tool failure".to_string(),
            });
        }

        if self.silent_stage.as_deref() != Some(stage.name.as_str()) {
            for output in &stage.outputs {
                std::fs::write(output, b"artifact")?;
            }
        }

        Ok(StageOutput::default())
    }
}

fn three_stage_pipeline(dir: &Path) -> Vec<StageSpec> {
    let input = dir.join("input.txt");
    std::fs::write(&input, b"seed").unwrap();
    let a = dir.join("a.out");
    let b = dir.join("b.out");
    let c = dir.join("c.out");
    vec![
        StageSpec::new("stage-a", "tool-a").input("-i", &input).output("-o", &a),
        StageSpec::new("stage-b", "tool-b").input("-i", &a).output("-o", &b),
        StageSpec::new("stage-c", "tool-c").input("-i", &b).output("-o", &c),
    ]
}

#[tokio::test]
async fn failing_stage_aborts_and_keeps_artifacts() {
    let dir = tempdir().unwrap();
    let runner = FakeRunner {
        fail_stage: Some("stage-b".to_string()),
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(three_stage_pipeline(dir.path()), dir.path());
    let cancel = CancellationToken::new();
    let err = pipeline.run(&runner, &cancel).await.unwrap_err();

    assert!(matches!(
        err,
        Error::StageExecutionFailure { ref stage, code: 2, .. } if stage == "stage-b"
    ));
    assert_eq!(pipeline.state(), PipelineState::Failed { stage: 1 });

    // Stage 1 artifacts remain on disk; stage 3 never executed
    assert!(dir.path().join("a.out").exists());
    assert!(!dir.path().join("c.out").exists());
    assert_eq!(runner.invocations(), vec!["stage-a", "stage-b"]);
}

#[tokio::test]
async fn silent_stage_is_distinguished_from_failure() {
    let dir = tempdir().unwrap();
    let runner = FakeRunner {
        silent_stage: Some("stage-b".to_string()),
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(three_stage_pipeline(dir.path()), dir.path());
    let cancel = CancellationToken::new();
    let err = pipeline.run(&runner, &cancel).await.unwrap_err();

    // Zero exit code but missing declared output: a tool/contract mismatch
    assert!(matches!(
        err,
        Error::StageProducedNoOutput { ref stage, .. } if stage == "stage-b"
    ));
    assert_eq!(pipeline.state(), PipelineState::Failed { stage: 1 });
}

#[tokio::test]
async fn missing_input_is_a_precondition_failure() {
    let dir = tempdir().unwrap();
    let stages = vec![StageSpec::new("needs-input", "tool")
        .input("-i", dir.path().join("never-created.txt"))
        .output("-o", dir.path().join("out.txt"))];

    let runner = FakeRunner::default();
    let mut pipeline = Pipeline::new(stages, dir.path());
    let cancel = CancellationToken::new();
    let err = pipeline.run(&runner, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::PreconditionFailure { .. }));
    assert!(runner.invocations().is_empty(), "runner must not be invoked");
}

#[tokio::test]
async fn zero_byte_input_counts_as_missing() {
    let dir = tempdir().unwrap();
    let empty = dir.path().join("empty.tif");
    std::fs::write(&empty, b"").unwrap();

    let stages = vec![StageSpec::new("reads-empty", "tool")
        .input("-i", &empty)
        .output("-o", dir.path().join("out.tif"))];

    let runner = FakeRunner::default();
    let mut pipeline = Pipeline::new(stages, dir.path());
    let cancel = CancellationToken::new();
    let err = pipeline.run(&runner, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::PreconditionFailure { .. }));
}

#[tokio::test]
async fn cancellation_mid_stage_fails_the_run() {
    let dir = tempdir().unwrap();
    let runner = FakeRunner {
        hang_stage: Some("stage-b".to_string()),
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(three_stage_pipeline(dir.path()), dir.path());
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_clone.cancel();
    });

    let err = pipeline.run(&runner, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(pipeline.state(), PipelineState::Failed { stage: 1 });
    // Stage 3 never launched
    assert_eq!(runner.invocations(), vec!["stage-a", "stage-b"]);
}

/// Write a south-sloping DEM with a spurious pit for full-workflow runs.
fn write_test_dem(path: &Path, rows: usize, cols: usize) {
    let mut dem: Raster<f64> = Raster::new(rows, cols);
    dem.set_transform(GeoTransform::new(0.0, rows as f64 * 30.0, 30.0, -30.0));
    dem.set_nodata(Some(-9999.0));
    for row in 0..rows {
        for col in 0..cols {
            dem.set(row, col, (rows - row) as f64 * 10.0).unwrap();
        }
    }
    dem.set(rows / 2, cols / 2, 1.0).unwrap(); // pit
    write_grid(path, &dem, RasterFormat::GeoTiff).unwrap();
}

#[tokio::test]
async fn native_delineation_end_to_end() {
    let dir = tempdir().unwrap();
    let dem_path = dir.path().join("dem.tif");
    write_test_dem(&dem_path, 12, 12);

    let mut config = DelineationConfig::new(&dem_path, dir.path().join("run"));
    config.threshold = Some(5.0);

    let runner = NativeStageRunner::new();
    let cancel = CancellationToken::new();
    let report = delineate(&config, &runner, &cancel).await.unwrap();

    assert_eq!(report.threshold, 5.0);
    assert!(report.segment_count > 0, "streams must be extracted");
    assert!(report.dinf_quantization_error >= 0.0);

    // Both branches' outputs are present and distinctly named
    let names = &report.artifacts;
    for path in [
        &names.filled_dem,
        &names.d8_flow_dir,
        &names.d8_slope,
        &names.d8_acc,
        &names.dinf_angle,
        &names.dinf_slope,
        &names.dinf_acc,
        &names.dinf_codes,
        &names.dinf_weights,
        &names.stream_raster,
        &names.stream_ids,
        &names.subbasins,
        &names.stream_net,
        &names.outlet_snapped,
    ] {
        let meta = std::fs::metadata(path)
            .unwrap_or_else(|_| panic!("missing artifact {}", path.display()));
        assert!(meta.len() > 0, "artifact {} is empty", path.display());
    }
    assert_ne!(names.d8_acc, names.dinf_acc);

    // The filled DEM drains: the pit cell's direction is a valid D8 code
    let filled: Raster<f64> = read_grid(&names.filled_dem).unwrap();
    let fdir: Raster<i32> = read_grid(&names.d8_flow_dir).unwrap();
    assert_eq!(filled.shape(), (12, 12));
    let pit_dir = fdir.get(6, 6).unwrap();
    assert!((1..=8).contains(&pit_dir), "pit must drain, got {}", pit_dir);

    // Stream net is valid GeoJSON with one feature per segment
    let text = std::fs::read_to_string(&names.stream_net).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        parsed["features"].as_array().unwrap().len(),
        report.segment_count
    );
}

#[tokio::test]
async fn native_delineation_with_drop_analysis() {
    let dir = tempdir().unwrap();
    let dem_path = dir.path().join("dem.tif");
    write_test_dem(&dem_path, 12, 12);

    let mut config = DelineationConfig::new(&dem_path, dir.path().join("run"));
    config.threshold = None; // force drop analysis

    let runner = NativeStageRunner::new();
    let cancel = CancellationToken::new();
    let report = delineate(&config, &runner, &cancel).await.unwrap();

    assert!(report.threshold > 0.0);
    assert!(report.artifacts.drop_analysis.exists());

    // The drop file's recommendation is its last whitespace token
    let text = std::fs::read_to_string(&report.artifacts.drop_analysis).unwrap();
    let last: f64 = text.split_whitespace().last().unwrap().parse().unwrap();
    assert_eq!(last, report.threshold);
}

#[tokio::test]
async fn missing_dem_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let config = DelineationConfig::new(dir.path().join("ghost.tif"), dir.path());

    let runner = NativeStageRunner::new();
    let cancel = CancellationToken::new();
    let err = delineate(&config, &runner, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
