//! Pit removal for hydrological conditioning
//!
//! Implements the Planchon-Darboux (2001) algorithm for filling
//! depressions in a DEM so every cell has a downslope path to the edge.
//!
//! Reference:
//! Planchon, O., Darboux, F. (2001). A fast, simple and versatile algorithm
//! to fill the depressions of digital elevation models.
//! Catena, 46(2-3), 159-176.

use crate::direction::ALL_DIRECTIONS;
use crate::error::Result;
use hydroshed_core::raster::Raster;
use ndarray::Array2;

/// Parameters for pit removal
#[derive(Debug, Clone)]
pub struct FillSinksParams {
    /// Minimum slope to enforce between cells (prevents flat areas).
    /// Set to 0.0 to allow flat areas after filling.
    pub min_slope: f64,
}

impl Default for FillSinksParams {
    fn default() -> Self {
        Self { min_slope: 0.01 }
    }
}

/// Fill depressions in a DEM.
///
/// The enforced inter-cell drop scales with the true ground distance of each
/// step, so diagonal and anisotropic moves stay consistent with the
/// direction codec's `cell_length`.
pub fn fill_sinks(dem: &Raster<f64>, params: FillSinksParams) -> Result<Raster<f64>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let csx = dem.cell_size_x();
    let csy = dem.cell_size_y();

    // Per-direction minimum drop
    let eps: Vec<f64> = ALL_DIRECTIONS
        .iter()
        .map(|d| params.min_slope * d.cell_length(csx, csy))
        .collect();

    // Step 1: W = DEM on the border, a very large value in the interior
    let big_value = f64::MAX / 2.0;
    let mut w = Array2::from_elem((rows, cols), big_value);

    for row in 0..rows {
        for col in 0..cols {
            let val = unsafe { dem.get_unchecked(row, col) };

            let is_nodata = match nodata {
                Some(nd) => val.is_nan() || (val - nd).abs() < f64::EPSILON,
                None => val.is_nan(),
            };

            if is_nodata {
                w[(row, col)] = val;
                continue;
            }

            if row == 0 || row == rows - 1 || col == 0 || col == cols - 1 {
                w[(row, col)] = val;
            }
        }
    }

    // Step 2: iteratively lower W until stable. A cell can be lowered toward
    // max(DEM(c), W(n) + eps_d) whenever a neighbor offers a lower surface.
    let mut changed = true;
    while changed {
        changed = false;

        // Forward pass: top-left to bottom-right
        for row in 1..rows - 1 {
            for col in 1..cols - 1 {
                changed |= relax_cell(dem, &mut w, row, col, nodata, &eps, big_value);
            }
        }

        // Backward pass: bottom-right to top-left
        for row in (1..rows - 1).rev() {
            for col in (1..cols - 1).rev() {
                changed |= relax_cell(dem, &mut w, row, col, nodata, &eps, big_value);
            }
        }
    }

    let mut output = dem.like(0.0);
    *output.data_mut() = w;

    Ok(output)
}

fn relax_cell(
    dem: &Raster<f64>,
    w: &mut Array2<f64>,
    row: usize,
    col: usize,
    nodata: Option<f64>,
    eps: &[f64],
    big_value: f64,
) -> bool {
    let dem_val = unsafe { dem.get_unchecked(row, col) };

    if dem_val.is_nan() {
        return false;
    }
    if let Some(nd) = nodata {
        if (dem_val - nd).abs() < f64::EPSILON {
            return false;
        }
    }

    if w[(row, col)] <= dem_val {
        return false;
    }

    let mut changed = false;
    for (idx, dir) in ALL_DIRECTIONS.iter().enumerate() {
        let (dr, dc) = dir.delta();
        let nr = (row as isize + dr) as usize;
        let nc = (col as isize + dc) as usize;

        let wn = w[(nr, nc)];
        if wn.is_nan() || wn >= big_value {
            continue;
        }

        let new_val = wn + eps[idx];
        if dem_val >= new_val {
            w[(row, col)] = dem_val;
            changed = true;
            break;
        }
        if w[(row, col)] > new_val {
            w[(row, col)] = new_val;
            changed = true;
        }
    }
    changed
}
