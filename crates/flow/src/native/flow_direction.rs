//! D8 flow direction from a conditioned DEM
//!
//! Routes each cell toward its steepest downslope neighbor and emits TauDEM
//! direction codes (1..8 counter-clockwise from East). 0 marks pits and
//! flats with no downslope neighbor.

use crate::direction::{downstream_index, DirScheme, ALL_DIRECTIONS};
use crate::error::{Error, Result};
use crate::maybe_rayon::*;
use hydroshed_core::raster::Raster;
use ndarray::Array2;

/// Calculate D8 flow direction from a DEM.
///
/// The input should be hydrologically conditioned (pits removed) for
/// meaningful results. Drops are normalized by the true ground distance of
/// each step, so anisotropic cells bias neither axis.
pub fn flow_direction(dem: &Raster<f64>) -> Result<Raster<i32>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let csx = dem.cell_size_x();
    let csy = dem.cell_size_y();

    let distances: Vec<f64> = ALL_DIRECTIONS
        .iter()
        .map(|d| d.cell_length(csx, csy))
        .collect();

    let output_data: Vec<i32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0i32; cols];

            for col in 0..cols {
                let center = unsafe { dem.get_unchecked(row, col) };

                if center.is_nan() {
                    continue;
                }
                if let Some(nd) = nodata {
                    if (center - nd).abs() < f64::EPSILON {
                        continue;
                    }
                }

                let mut max_drop = 0.0_f64;
                let mut best = 0i32;

                for (idx, dir) in ALL_DIRECTIONS.iter().enumerate() {
                    let (nr, nc) = downstream_index(row, col, *dir);
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }

                    let neighbor = unsafe { dem.get_unchecked(nr as usize, nc as usize) };

                    if neighbor.is_nan() {
                        continue;
                    }
                    if let Some(nd) = nodata {
                        if (neighbor - nd).abs() < f64::EPSILON {
                            continue;
                        }
                    }

                    let drop = (center - neighbor) / distances[idx];
                    if drop > max_drop {
                        max_drop = drop;
                        best = dir.code(DirScheme::TauDem);
                    }
                }

                row_data[col] = best;
            }

            row_data
        })
        .collect();

    let mut output = dem.with_same_meta::<i32>(rows, cols);
    output.set_nodata(Some(0));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Core(hydroshed_core::Error::Other(e.to_string())))?;

    Ok(output)
}
