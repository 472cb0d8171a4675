//! Predefined artifact file names for one delineation run
//!
//! Names are assigned once per run and never reused, so the concurrent D8
//! and D-infinity branches write disjoint sets and every artifact has
//! exactly one writer.

use std::path::{Path, PathBuf};

// Intermediate rasters
const FILLED_DEM: &str = "demFilled.tif";
const D8_FLOW_DIR: &str = "flowDirD8.tif";
const D8_SLOPE: &str = "slopeD8.tif";
const D8_ACC: &str = "accD8.tif";
const D8_ACC_WEIGHTED: &str = "accD8Outlet.tif";
const DINF_ANGLE: &str = "flowDirDinf.tif";
const DINF_SLOPE: &str = "slopeDinf.tif";
const DINF_ACC: &str = "accDinf.tif";
const DINF_CODES: &str = "dirCodeDinf.tif";
const DINF_WEIGHTS: &str = "weightDinf.tif";
const STREAM_PROVISIONAL: &str = "streamRasterPre.tif";
const STREAM_RASTER: &str = "streamRaster.tif";
const STREAM_IDS: &str = "streamLinkId.tif";
const SUBBASINS: &str = "subbasin.tif";
const DIST_TO_STREAM: &str = "dist2StreamDinf.tif";
// Outlets and analysis
const OUTLET_DEFAULT: &str = "outletDefault.geojson";
const OUTLET_SNAPPED: &str = "outletSnapped.geojson";
const DROP_ANALYSIS: &str = "drp.txt";
// Vector output
const STREAM_NET: &str = "streamNet.geojson";

/// Resolved artifact paths for one run's working directory.
#[derive(Debug, Clone)]
pub struct ArtifactNames {
    pub workspace: PathBuf,
    pub filled_dem: PathBuf,
    pub d8_flow_dir: PathBuf,
    pub d8_slope: PathBuf,
    pub d8_acc: PathBuf,
    pub d8_acc_weighted: PathBuf,
    pub dinf_angle: PathBuf,
    pub dinf_slope: PathBuf,
    pub dinf_acc: PathBuf,
    pub dinf_codes: PathBuf,
    pub dinf_weights: PathBuf,
    pub stream_provisional: PathBuf,
    pub stream_raster: PathBuf,
    pub stream_ids: PathBuf,
    pub subbasins: PathBuf,
    pub dist_to_stream: PathBuf,
    pub outlet_default: PathBuf,
    pub outlet_snapped: PathBuf,
    pub drop_analysis: PathBuf,
    pub stream_net: PathBuf,
}

impl ArtifactNames {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        let ws = workspace.as_ref().to_path_buf();
        let p = |name: &str| ws.join(name);
        Self {
            filled_dem: p(FILLED_DEM),
            d8_flow_dir: p(D8_FLOW_DIR),
            d8_slope: p(D8_SLOPE),
            d8_acc: p(D8_ACC),
            d8_acc_weighted: p(D8_ACC_WEIGHTED),
            dinf_angle: p(DINF_ANGLE),
            dinf_slope: p(DINF_SLOPE),
            dinf_acc: p(DINF_ACC),
            dinf_codes: p(DINF_CODES),
            dinf_weights: p(DINF_WEIGHTS),
            stream_provisional: p(STREAM_PROVISIONAL),
            stream_raster: p(STREAM_RASTER),
            stream_ids: p(STREAM_IDS),
            subbasins: p(SUBBASINS),
            dist_to_stream: p(DIST_TO_STREAM),
            outlet_default: p(OUTLET_DEFAULT),
            outlet_snapped: p(OUTLET_SNAPPED),
            drop_analysis: p(DROP_ANALYSIS),
            stream_net: p(STREAM_NET),
            workspace: ws,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_distinct() {
        let names = ArtifactNames::new("/tmp/run");
        let all = [
            &names.filled_dem,
            &names.d8_flow_dir,
            &names.d8_slope,
            &names.d8_acc,
            &names.d8_acc_weighted,
            &names.dinf_angle,
            &names.dinf_slope,
            &names.dinf_acc,
            &names.dinf_codes,
            &names.dinf_weights,
            &names.stream_provisional,
            &names.stream_raster,
            &names.stream_ids,
            &names.subbasins,
            &names.dist_to_stream,
            &names.outlet_default,
            &names.outlet_snapped,
            &names.drop_analysis,
            &names.stream_net,
        ];
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all.iter().all(|p| p.starts_with("/tmp/run")));
    }
}
