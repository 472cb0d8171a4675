//! In-process stage runner
//!
//! Evaluates the known stage templates with the native hydrology
//! implementations instead of launching executables. Intended for grids
//! small enough to process in memory and for environments without the
//! external toolset; the argument templates are interpreted, so pipelines
//! run unchanged against either runner.
//!
//! Simplifications against the external tools: outlet-restricted
//! accumulation (`-o` on aread8/areadinf) ignores the outlet, and the drop
//! analysis uses the constant-drop t-test over segment mean drops.

use crate::error::{Error, Result};
use crate::runner::{StageOutput, StageRunner};
use crate::stage::StageSpec;
use async_trait::async_trait;
use hydroshed_core::io::{read_grid, write_grid, RasterFormat};
use hydroshed_core::vector::{AttributeValue, Feature};
use hydroshed_core::Raster;
use hydroshed_flow::direction::{downstream_index, D8Direction, DirScheme};
use hydroshed_flow::dinf::dinf_to_d8_pair;
use hydroshed_flow::native::{
    dinf_accumulation, fill_sinks, flow_accumulation, flow_direction, flow_direction_dinf,
    stream_threshold, FillSinksParams,
};
use hydroshed_flow::streamnet::build_stream_network;
use geo_types::{Geometry, Point};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Stage runner backed by the native implementations.
#[derive(Debug, Clone, Default)]
pub struct NativeStageRunner;

impl NativeStageRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageRunner for NativeStageRunner {
    async fn run(
        &self,
        stage: &StageSpec,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StageOutput> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let ctx = StageContext { stage, working_dir };
        let result = match stage.executable.as_str() {
            "pitremove" => ctx.pitremove(),
            "d8flowdir" => ctx.d8flowdir(),
            "dinfflowdir" => ctx.dinfflowdir(),
            "aread8" => ctx.aread8(),
            "areadinf" => ctx.areadinf(),
            "threshold" => ctx.threshold(),
            "moveoutletstostrm" => ctx.moveoutletstostrm(),
            "dropanalysis" => ctx.dropanalysis(),
            "dinfdistdown" => ctx.dinfdistdown(),
            other => Err(Error::ExecutableNotFound(other.to_string())),
        };

        match result {
            Ok(()) => Ok(StageOutput {
                exit_code: 0,
                ..Default::default()
            }),
            // Missing dispatch is a launch-level failure, not a stage exit
            Err(e @ Error::ExecutableNotFound(_)) => Err(e),
            Err(e) => Ok(StageOutput {
                exit_code: 1,
                stderr: e.to_string(),
                stdout: String::new(),
            }),
        }
    }
}

struct StageContext<'a> {
    stage: &'a StageSpec,
    working_dir: &'a Path,
}

impl StageContext<'_> {
    fn path(&self, flag: &str) -> Result<PathBuf> {
        let p = self.stage.path_arg(flag).ok_or_else(|| {
            Error::Configuration(format!(
                "stage '{}' template lacks required {}",
                self.stage.name, flag
            ))
        })?;
        Ok(if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        })
    }

    fn value_f64(&self, flag: &str) -> Result<f64> {
        self.stage
            .value_arg(flag)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "stage '{}' template lacks numeric {}",
                    self.stage.name, flag
                ))
            })
    }

    fn write(&self, path: &Path, raster: &Raster<f64>) -> Result<()> {
        let format = RasterFormat::from_path(path).unwrap_or(RasterFormat::GeoTiff);
        write_grid(path, raster, format)?;
        Ok(())
    }

    fn write_i32(&self, path: &Path, raster: &Raster<i32>) -> Result<()> {
        let format = RasterFormat::from_path(path).unwrap_or(RasterFormat::GeoTiff);
        write_grid(path, raster, format)?;
        Ok(())
    }

    fn pitremove(&self) -> Result<()> {
        let dem: Raster<f64> = read_grid(self.path("-z")?)?;
        let filled = fill_sinks(&dem, FillSinksParams::default())?;
        self.write(&self.path("-fel")?, &filled)
    }

    fn d8flowdir(&self) -> Result<()> {
        let filled: Raster<f64> = read_grid(self.path("-fel")?)?;
        let fdir = flow_direction(&filled)?;
        self.write_i32(&self.path("-p")?, &fdir)?;
        let slope = d8_slope(&filled, &fdir);
        self.write(&self.path("-sd8")?, &slope)
    }

    fn dinfflowdir(&self) -> Result<()> {
        let filled: Raster<f64> = read_grid(self.path("-fel")?)?;
        let angles = flow_direction_dinf(&filled)?;
        self.write(&self.path("-ang")?, &angles)?;
        // Slope along the steepest D8 step stands in for the facet slope
        let fdir = flow_direction(&filled)?;
        let slope = d8_slope(&filled, &fdir);
        self.write(&self.path("-slp")?, &slope)
    }

    fn aread8(&self) -> Result<()> {
        if self.stage.path_arg("-o").is_some() {
            tracing::debug!("native aread8 ignores the outlet restriction");
        }
        let fdir: Raster<i32> = read_grid(self.path("-p")?)?;
        let acc = flow_accumulation(&fdir)?;
        self.write(&self.path("-ad8")?, &acc)
    }

    fn areadinf(&self) -> Result<()> {
        if self.stage.path_arg("-o").is_some() {
            tracing::debug!("native areadinf ignores the outlet restriction");
        }
        let angles: Raster<f64> = read_grid(self.path("-ang")?)?;
        let acc = dinf_accumulation(&angles)?;
        self.write(&self.path("-sca")?, &acc)
    }

    fn threshold(&self) -> Result<()> {
        let acc: Raster<f64> = read_grid(self.path("-ssa")?)?;
        let thresh = self.value_f64("-thresh")?;
        let streams = stream_threshold(&acc, thresh)?;
        self.write_i32(&self.path("-src")?, &streams)
    }

    fn moveoutletstostrm(&self) -> Result<()> {
        let streams: Raster<i32> = read_grid(self.path("-src")?)?;
        let outlets = read_outlet_points(&self.path("-o")?)?;
        let max_dist = self
            .stage
            .value_arg("-md")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(50);

        let mut snapped = Vec::new();
        for (x, y) in outlets {
            let (col_f, row_f) = streams.geo_to_pixel(x, y);
            let (row, col) = (row_f.floor() as isize, col_f.floor() as isize);
            match nearest_stream_cell(&streams, row, col, max_dist) {
                Some((r, c)) => {
                    let (sx, sy) = streams.pixel_to_geo(c, r);
                    snapped.push((sx, sy));
                }
                None => {
                    tracing::warn!(x, y, "no stream cell within snap distance, keeping outlet");
                    snapped.push((x, y));
                }
            }
        }

        write_outlet_points(&self.path("-om")?, &snapped)
    }

    fn dropanalysis(&self) -> Result<()> {
        let filled: Raster<f64> = read_grid(self.path("-fel")?)?;
        let fdir: Raster<i32> = read_grid(self.path("-p")?)?;
        let acc: Raster<f64> = read_grid(self.path("-ssa")?)?;

        let par = self.stage.value_arg("-par").unwrap_or("10 500 10 0");
        let parts: Vec<f64> = par
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        let (min_t, max_t, steps, linear) = match parts.as_slice() {
            [a, b, c, d] => (*a, *b, *c as usize, *d != 0.0),
            _ => (10.0, 500.0, 10, false),
        };

        let candidates = threshold_candidates(min_t, max_t, steps.max(2), !linear);
        let mut lines = Vec::new();
        let mut chosen = *candidates.last().expect("at least two candidates");
        let mut found = false;
        for &t in &candidates {
            let streams = stream_threshold(&acc, t)?;
            let stat = drop_statistic(&streams, &fdir, &filled)?;
            lines.push(format!("threshold {:.3} t-statistic {:.3}", t, stat));
            // Constant-drop law: accept the smallest threshold where first-
            // and higher-order mean drops are statistically indistinguishable
            if !found && stat.abs() < 2.0 {
                chosen = t;
                found = true;
            }
        }
        lines.push(format!("Optimum Threshold Value: {}", chosen));

        std::fs::write(self.path("-drp")?, lines.join("\n"))?;
        Ok(())
    }

    fn dinfdistdown(&self) -> Result<()> {
        let angles: Raster<f64> = read_grid(self.path("-ang")?)?;
        let filled: Raster<f64> = read_grid(self.path("-fel")?)?;
        let streams: Raster<i32> = read_grid(self.path("-src")?)?;
        let method = self
            .stage
            .value_arg("-m")
            .and_then(|m| m.split_whitespace().last())
            .unwrap_or("s")
            .to_string();

        let dist = distance_to_stream(&angles, &filled, &streams, &method);
        self.write(&self.path("-dd")?, &dist)
    }
}

/// Slope of the steepest downslope step, per cell.
fn d8_slope(dem: &Raster<f64>, fdir: &Raster<i32>) -> Raster<f64> {
    let (rows, cols) = dem.shape();
    let csx = dem.cell_size_x();
    let csy = dem.cell_size_y();

    let mut slope = dem.like(0.0);
    slope.set_nodata(Some(f64::NAN));
    for row in 0..rows {
        for col in 0..cols {
            let code = unsafe { fdir.get_unchecked(row, col) };
            let value = match D8Direction::from_code(code, DirScheme::TauDem) {
                Ok(dir) => {
                    let (nr, nc) = downstream_index(row, col, dir);
                    if nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols {
                        let z0 = unsafe { dem.get_unchecked(row, col) };
                        let z1 = unsafe { dem.get_unchecked(nr as usize, nc as usize) };
                        (z0 - z1) / dir.cell_length(csx, csy)
                    } else {
                        0.0
                    }
                }
                Err(_) => 0.0,
            };
            unsafe { slope.set_unchecked(row, col, value.max(0.0)) };
        }
    }
    slope
}

/// Breadth-first search for the nearest stream cell within `max_dist` steps.
fn nearest_stream_cell(
    streams: &Raster<i32>,
    row: isize,
    col: isize,
    max_dist: usize,
) -> Option<(usize, usize)> {
    let (rows, cols) = streams.shape();
    let in_bounds = |r: isize, c: isize| {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols
    };
    if !in_bounds(row, col) {
        return None;
    }

    let mut visited = std::collections::HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((row, col, 0usize));
    visited.insert((row, col));

    while let Some((r, c, dist)) = queue.pop_front() {
        let value = unsafe { streams.get_unchecked(r as usize, c as usize) };
        if value > 0 && !streams.is_nodata(value) {
            return Some((r as usize, c as usize));
        }
        if dist >= max_dist {
            continue;
        }
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let (nr, nc) = (r + dr, c + dc);
                if in_bounds(nr, nc) && visited.insert((nr, nc)) {
                    queue.push_back((nr, nc, dist + 1));
                }
            }
        }
    }
    None
}

/// Geometric or linear candidate sequence between the two bounds.
fn threshold_candidates(min_t: f64, max_t: f64, steps: usize, logspace: bool) -> Vec<f64> {
    let min_t = min_t.max(1e-6);
    let max_t = max_t.max(min_t);
    (0..steps)
        .map(|i| {
            let f = i as f64 / (steps - 1) as f64;
            if logspace {
                (min_t.ln() + f * (max_t.ln() - min_t.ln())).exp()
            } else {
                min_t + f * (max_t - min_t)
            }
        })
        .collect()
}

/// Welch t-statistic between mean drops of first-order and higher-order
/// stream segments.
fn drop_statistic(
    streams: &Raster<i32>,
    fdir: &Raster<i32>,
    filled: &Raster<f64>,
) -> Result<f64> {
    let network = build_stream_network(streams, fdir)?;

    let mut first: Vec<f64> = Vec::new();
    let mut higher: Vec<f64> = Vec::new();
    for seg in &network.segments {
        let (r0, c0) = seg.cells[0];
        let (r1, c1) = *seg.cells.last().expect("segments are non-empty");
        let drop = filled.get(r0, c0)? - filled.get(r1, c1)?;
        if seg.order == 1 {
            first.push(drop);
        } else {
            higher.push(drop);
        }
    }

    if first.len() < 2 || higher.len() < 2 {
        return Ok(0.0); // degenerate network, treat as indistinguishable
    }

    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    let var = |v: &[f64], m: f64| {
        v.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (v.len() - 1) as f64
    };
    let (m1, m2) = (mean(&first), mean(&higher));
    let (v1, v2) = (var(&first, m1), var(&higher, m2));
    let se = (v1 / first.len() as f64 + v2 / higher.len() as f64).sqrt();
    if se == 0.0 {
        return Ok(0.0);
    }
    Ok((m1 - m2) / se)
}

/// Distance to the nearest downstream stream cell along the D-infinity
/// major direction, by the selected method.
fn distance_to_stream(
    angles: &Raster<f64>,
    filled: &Raster<f64>,
    streams: &Raster<i32>,
    method: &str,
) -> Raster<f64> {
    let (rows, cols) = angles.shape();
    let csx = angles.cell_size_x();
    let csy = angles.cell_size_y();

    let mut dist = angles.like(f64::NAN);
    dist.set_nodata(Some(f64::NAN));

    for row in 0..rows {
        for col in 0..cols {
            let mut total = 0.0f64;
            let (mut r, mut c) = (row, col);
            let mut steps = 0usize;
            let value = loop {
                let sv = unsafe { streams.get_unchecked(r, c) };
                if sv > 0 && !streams.is_nodata(sv) {
                    break Some(total);
                }
                let angle = unsafe { angles.get_unchecked(r, c) };
                if angles.is_nodata(angle) || angle < 0.0 {
                    break None;
                }
                let Ok(pair) = dinf_to_d8_pair(angle) else {
                    break None;
                };
                let dir = if pair.w1 >= pair.w2 { pair.dir1 } else { pair.dir2 };
                let (nr, nc) = downstream_index(r, c, dir);
                if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
                    break None;
                }

                let h = dir.cell_length(csx, csy);
                let z0 = unsafe { filled.get_unchecked(r, c) };
                let z1 = unsafe { filled.get_unchecked(nr as usize, nc as usize) };
                let v = (z0 - z1).max(0.0);
                total += match method {
                    "h" => h,
                    "v" => v,
                    _ => (h * h + v * v).sqrt(), // p and s
                };

                r = nr as usize;
                c = nc as usize;
                steps += 1;
                if steps > rows * cols {
                    break None; // direction loop, should not happen on a filled DEM
                }
            };
            if let Some(v) = value {
                unsafe { dist.set_unchecked(row, col, v) };
            }
        }
    }
    dist
}

/// Minimal outlet point reader for the GeoJSON the workflow writes.
fn read_outlet_points(path: &Path) -> Result<Vec<(f64, f64)>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::Configuration(format!("outlet file {}: {}", path.display(), e)))?;

    let mut points = Vec::new();
    if let Some(features) = value["features"].as_array() {
        for feature in features {
            let geom = &feature["geometry"];
            if geom["type"] == "Point" {
                if let (Some(x), Some(y)) = (
                    geom["coordinates"][0].as_f64(),
                    geom["coordinates"][1].as_f64(),
                ) {
                    points.push((x, y));
                }
            }
        }
    }
    if points.is_empty() {
        return Err(Error::Configuration(format!(
            "outlet file {} contains no point features",
            path.display()
        )));
    }
    Ok(points)
}

fn write_outlet_points(path: &Path, points: &[(f64, f64)]) -> Result<()> {
    let features: Vec<Feature> = points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let mut f = Feature::new(Geometry::Point(Point::new(x, y)));
            f.id = Some(i as i64 + 1);
            f.set_property("ID", AttributeValue::Int(i as i64 + 1));
            f
        })
        .collect();
    hydroshed_core::vector::write_geojson_features(path, &features)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydroshed_core::GeoTransform;

    #[test]
    fn test_threshold_candidates_monotonic() {
        for logspace in [false, true] {
            let c = threshold_candidates(10.0, 1000.0, 8, logspace);
            assert_eq!(c.len(), 8);
            assert!((c[0] - 10.0).abs() < 1e-9);
            assert!((c[7] - 1000.0).abs() < 1e-6);
            assert!(c.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_nearest_stream_cell_respects_radius() {
        let mut streams: Raster<i32> = Raster::new(9, 9);
        streams.set_nodata(Some(0));
        streams.set(0, 8, 1).unwrap();

        // From the opposite corner: 8 chebyshev steps away
        assert_eq!(nearest_stream_cell(&streams, 8, 0, 8), Some((0, 8)));
        assert_eq!(nearest_stream_cell(&streams, 8, 0, 7), None);
    }

    #[test]
    fn test_d8_slope_east_plane() {
        let mut dem: Raster<f64> = Raster::new(3, 3);
        dem.set_transform(GeoTransform::new(0.0, 3.0, 10.0, -10.0));
        for row in 0..3 {
            for col in 0..3 {
                dem.set(row, col, (3 - col) as f64 * 5.0).unwrap();
            }
        }
        let fdir = flow_direction(&dem).unwrap();
        let slope = d8_slope(&dem, &fdir);
        // 5 m drop over a 10 m step
        assert!((slope.get(1, 1).unwrap() - 0.5).abs() < 1e-12);
    }
}
