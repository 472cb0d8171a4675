//! D-infinity flow direction from a conditioned DEM
//!
//! Fits eight triangular facets to the 3x3 neighborhood of each cell and
//! takes the steepest downslope facet angle, so flow direction is continuous
//! rather than restricted to 8 directions.
//!
//! Reference:
//! Tarboton, D.G. (1997). A new method for the determination of flow
//! directions and upslope areas in grid digital elevation models.
//! *Water Resources Research*, 33(2), 309-319.

use crate::direction::{downstream_index, ALL_DIRECTIONS};
use crate::error::Result;
use hydroshed_core::raster::Raster;
use ndarray::Array2;
use std::f64::consts::FRAC_PI_4;

/// Compute D-infinity flow direction angles.
///
/// Returns angles in radians (0 = East, counter-clockwise); -1.0 marks
/// pit/flat cells with no downslope facet, NaN marks nodata.
pub fn flow_direction_dinf(dem: &Raster<f64>) -> Result<Raster<f64>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let csx = dem.cell_size_x();
    let csy = dem.cell_size_y();

    let distances: Vec<f64> = ALL_DIRECTIONS
        .iter()
        .map(|d| d.cell_length(csx, csy))
        .collect();

    let mut angles = Array2::<f64>::from_elem((rows, cols), f64::NAN);

    for row in 0..rows {
        for col in 0..cols {
            let z0 = unsafe { dem.get_unchecked(row, col) };
            if z0.is_nan() || nodata.map_or(false, |nd| (z0 - nd).abs() < f64::EPSILON) {
                continue;
            }

            // Gather the 8 neighbor elevations
            let mut zn = [f64::NAN; 8];
            for (idx, dir) in ALL_DIRECTIONS.iter().enumerate() {
                let (nr, nc) = downstream_index(row, col, *dir);
                if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
                    continue;
                }
                let nval = unsafe { dem.get_unchecked(nr as usize, nc as usize) };
                if nval.is_nan() || nodata.map_or(false, |nd| (nval - nd).abs() < f64::EPSILON) {
                    continue;
                }
                zn[idx] = nval;
            }

            // Facet k spans neighbors k and k+1 (CCW); its base angle is
            // k * pi/4.
            let mut best_slope = 0.0_f64;
            let mut best_angle = -1.0_f64;

            for facet in 0..8 {
                let a_idx = facet;
                let b_idx = (facet + 1) % 8;

                if zn[a_idx].is_nan() || zn[b_idx].is_nan() {
                    continue;
                }

                // e1: slope along the edge toward neighbor a
                // e2: slope across the facet from a toward b
                let d1 = distances[a_idx];
                let d2 = csx.min(csy);

                let e1 = (z0 - zn[a_idx]) / d1;
                let e2 = (zn[a_idx] - zn[b_idx]) / d2;

                if e1 == 0.0 && e2 == 0.0 {
                    continue; // flat facet
                }

                let mut theta: f64;
                let slope: f64;

                if e2 == 0.0 {
                    theta = 0.0;
                    slope = e1;
                } else {
                    theta = (e2 / e1).atan();
                    if theta < 0.0 {
                        theta = 0.0;
                        slope = e1;
                    } else if theta > FRAC_PI_4 {
                        theta = FRAC_PI_4;
                        slope = (z0 - zn[b_idx]) / distances[b_idx];
                    } else {
                        slope = (e1 * e1 + e2 * e2).sqrt();
                    }
                }

                if slope > best_slope {
                    best_slope = slope;
                    best_angle = facet as f64 * FRAC_PI_4 + theta;
                }
            }

            // Isolated cells at the grid edge may lack complete facets;
            // fall back to the steepest single direction.
            if best_angle < 0.0 {
                for (idx, _) in ALL_DIRECTIONS.iter().enumerate() {
                    if zn[idx].is_nan() {
                        continue;
                    }
                    let slope = (z0 - zn[idx]) / distances[idx];
                    if slope > best_slope {
                        best_slope = slope;
                        best_angle = idx as f64 * FRAC_PI_4;
                    }
                }
            }

            // Facet 7 with theta at the full 45 degrees lands exactly on
            // the period; keep angles in [0, 2pi)
            let two_pi = 2.0 * std::f64::consts::PI;
            if best_angle >= two_pi {
                best_angle -= two_pi;
            }
            angles[(row, col)] = best_angle;
        }
    }

    let mut output = dem.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = angles;

    Ok(output)
}
