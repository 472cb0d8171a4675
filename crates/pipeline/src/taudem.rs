//! Stage builders for the external hydrology toolset
//!
//! Each function maps one executable to its fixed argument template, with
//! the input and output artifacts declared for pre-/postcondition checks.
//! Flag names follow the toolset's conventions (`-z -fel -p -sd8 -ang -slp
//! -ad8 -sca -ssa -thresh -src -o -om -md -par -drp -dd`).

use crate::config::DistanceMethod;
use crate::stage::StageSpec;
use std::path::Path;

/// Pit removal by the flooding approach.
pub fn pitremove(np: usize, dem: &Path, filled: &Path) -> StageSpec {
    StageSpec::new("pitremove", "pitremove")
        .input("-z", dem)
        .output("-fel", filled)
        .processes(np)
}

/// D8 flow direction and slope from the filled DEM.
pub fn d8flowdir(np: usize, filled: &Path, flow_dir: &Path, slope: &Path) -> StageSpec {
    StageSpec::new("d8flowdir", "d8flowdir")
        .input("-fel", filled)
        .output("-p", flow_dir)
        .output("-sd8", slope)
        .processes(np)
}

/// D-infinity flow direction and slope from the filled DEM.
pub fn dinfflowdir(np: usize, filled: &Path, angle: &Path, slope: &Path) -> StageSpec {
    StageSpec::new("dinfflowdir", "dinfflowdir")
        .input("-fel", filled)
        .output("-ang", angle)
        .output("-slp", slope)
        .processes(np)
}

/// D8 contributing area.
///
/// `-nc` switches edge contamination checking off, the workflow default.
pub fn aread8(
    np: usize,
    flow_dir: &Path,
    acc: &Path,
    outlet: Option<&Path>,
    edge_contamination: bool,
) -> StageSpec {
    let mut stage = StageSpec::new("aread8", "aread8")
        .input("-p", flow_dir)
        .output("-ad8", acc)
        .processes(np);
    if let Some(outlet) = outlet {
        stage = stage.input("-o", outlet);
    }
    if !edge_contamination {
        stage = stage.flag("-nc");
    }
    stage
}

/// D-infinity contributing area.
pub fn areadinf(
    np: usize,
    angle: &Path,
    acc: &Path,
    outlet: Option<&Path>,
    edge_contamination: bool,
) -> StageSpec {
    let mut stage = StageSpec::new("areadinf", "areadinf")
        .input("-ang", angle)
        .output("-sca", acc)
        .processes(np);
    if let Some(outlet) = outlet {
        stage = stage.input("-o", outlet);
    }
    if !edge_contamination {
        stage = stage.flag("-nc");
    }
    stage
}

/// Stream definition by accumulation threshold.
pub fn threshold(np: usize, acc: &Path, stream_raster: &Path, thresh: f64) -> StageSpec {
    StageSpec::new("threshold", "threshold")
        .input("-ssa", acc)
        .value("-thresh", thresh)
        .output("-src", stream_raster)
        .processes(np)
}

/// Snap outlet points onto the nearest stream cell within `max_dist` cells.
pub fn moveoutletstostrm(
    np: usize,
    flow_dir: &Path,
    stream_raster: &Path,
    outlet: &Path,
    snapped: &Path,
    max_dist: usize,
) -> StageSpec {
    StageSpec::new("moveoutletstostrm", "moveoutletstostrm")
        .input("-p", flow_dir)
        .input("-src", stream_raster)
        .input("-o", outlet)
        .value("-md", max_dist)
        .output("-om", snapped)
        .processes(np)
}

/// Drop analysis over a range of candidate stream thresholds.
#[allow(clippy::too_many_arguments)]
pub fn dropanalysis(
    np: usize,
    filled: &Path,
    flow_dir: &Path,
    acc: &Path,
    ssa: &Path,
    outlet: &Path,
    min_thresh: f64,
    max_thresh: f64,
    num_thresh: usize,
    logspace: bool,
    drop_file: &Path,
) -> StageSpec {
    StageSpec::new("dropanalysis", "dropanalysis")
        .input("-fel", filled)
        .input("-p", flow_dir)
        .input("-ad8", acc)
        .input("-ssa", ssa)
        .input("-o", outlet)
        .value(
            "-par",
            format!(
                "{} {} {} {}",
                min_thresh,
                max_thresh,
                num_thresh,
                if logspace { 0 } else { 1 }
            ),
        )
        .output("-drp", drop_file)
        .processes(np)
}

/// D-infinity distance down to the stream, by the configured statistics and
/// distance method.
pub fn dinfdistdown(
    np: usize,
    angle: &Path,
    filled: &Path,
    slope: &Path,
    stream_raster: &Path,
    method: DistanceMethod,
    distance: &Path,
) -> StageSpec {
    StageSpec::new("dinfdistdown", "dinfdistdown")
        .input("-ang", angle)
        .input("-fel", filled)
        .input("-slp", slope)
        .input("-src", stream_raster)
        .value("-m", format!("ave {}", method.flag_char()))
        .flag("-nc")
        .output("-dd", distance)
        .processes(np)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_pitremove_template() {
        let stage = pitremove(4, Path::new("dem.tif"), Path::new("fel.tif"));
        assert_eq!(stage.executable, "pitremove");
        assert_eq!(stage.command_args(), vec!["-z", "dem.tif", "-fel", "fel.tif"]);
        assert_eq!(stage.processes, 4);
        assert_eq!(stage.inputs, vec![PathBuf::from("dem.tif")]);
        assert_eq!(stage.outputs, vec![PathBuf::from("fel.tif")]);
    }

    #[test]
    fn test_aread8_optional_outlet() {
        let without = aread8(1, Path::new("p.tif"), Path::new("ad8.tif"), None, false);
        assert!(without.command_args().contains(&"-nc".to_string()));
        assert!(!without.command_args().contains(&"-o".to_string()));

        let with = aread8(
            1,
            Path::new("p.tif"),
            Path::new("ad8.tif"),
            Some(Path::new("outlet.geojson")),
            true,
        );
        assert!(with.command_args().contains(&"-o".to_string()));
        assert!(!with.command_args().contains(&"-nc".to_string()));
        assert_eq!(with.inputs.len(), 2);
    }

    #[test]
    fn test_dropanalysis_parameter_list() {
        let stage = dropanalysis(
            2,
            Path::new("fel.tif"),
            Path::new("p.tif"),
            Path::new("ad8.tif"),
            Path::new("ssa.tif"),
            Path::new("outlet.geojson"),
            10.0,
            500.0,
            20,
            true,
            Path::new("drp.txt"),
        );
        assert_eq!(stage.value_arg("-par"), Some("10 500 20 0"));
        assert_eq!(stage.outputs, vec![PathBuf::from("drp.txt")]);
    }
}
