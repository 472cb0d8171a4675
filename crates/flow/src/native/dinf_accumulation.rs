//! D-infinity flow accumulation
//!
//! Propagates contributing area along the weighted two-neighbor split of
//! each cell's D-infinity angle, in topological order over the induced flow
//! graph. Pit cells (negative angle) and nodata terminate flow paths.

use crate::dinf::downstream_index_dinf;
use crate::error::Result;
use hydroshed_core::raster::Raster;
use ndarray::Array2;

/// Calculate flow accumulation from a D-infinity angle raster.
///
/// Accumulation counts upstream cells (weighted by flow fractions);
/// headwater cells hold 0.
pub fn dinf_accumulation(angles: &Raster<f64>) -> Result<Raster<f64>> {
    let (rows, cols) = angles.shape();

    let receivers = |row: usize, col: usize| -> Vec<(usize, usize, f64)> {
        let angle = unsafe { angles.get_unchecked(row, col) };
        if angles.is_nodata(angle) || angle < 0.0 {
            return Vec::new();
        }
        match downstream_index_dinf(row, col, angle) {
            Ok(neighbors) => neighbors
                .into_iter()
                .filter(|&(r, c, w)| {
                    w > 0.0 && r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols
                })
                .map(|(r, c, w)| (r as usize, c as usize, w))
                .collect(),
            Err(_) => Vec::new(),
        }
    };

    // In-degree over the weighted flow graph
    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            for (nr, nc, _) in receivers(row, col) {
                in_degree[(nr, nc)] += 1;
            }
        }
    }

    let mut queue: Vec<(usize, usize)> = Vec::new();
    let mut accumulation = Array2::<f64>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 {
                queue.push((row, col));
            }
        }
    }

    while let Some((row, col)) = queue.pop() {
        let outflow = accumulation[(row, col)] + 1.0;
        for (nr, nc, w) in receivers(row, col) {
            accumulation[(nr, nc)] += outflow * w;
            in_degree[(nr, nc)] = in_degree[(nr, nc)].saturating_sub(1);
            if in_degree[(nr, nc)] == 0 {
                queue.push((nr, nc));
            }
        }
    }

    let mut output = angles.with_same_meta::<f64>(rows, cols);
    *output.data_mut() = accumulation;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::flow_direction_dinf;
    use hydroshed_core::GeoTransform;

    #[test]
    fn test_dinf_accumulation_linear_east() {
        // 1x5 strip of due-east angles: plain D8-like chain
        let mut angles: Raster<f64> = Raster::new(1, 5);
        angles.set_nodata(Some(f64::NAN));
        for col in 0..4 {
            angles.set(0, col, 0.0).unwrap(); // East
        }
        angles.set(0, 4, -1.0).unwrap(); // outlet pit

        let acc = dinf_accumulation(&angles).unwrap();
        assert_eq!(acc.get(0, 0).unwrap(), 0.0);
        assert_eq!(acc.get(0, 4).unwrap(), 4.0);
    }

    #[test]
    fn test_dinf_accumulation_split_conserves_flow() {
        // One cell at 22.5 degrees splits between E and NE; total flow
        // arriving downstream must equal the outflow.
        let mut angles: Raster<f64> = Raster::new(3, 3);
        angles.set_nodata(Some(f64::NAN));
        for row in 0..3 {
            for col in 0..3 {
                angles.set(row, col, -1.0).unwrap();
            }
        }
        angles.set(1, 0, std::f64::consts::FRAC_PI_4 / 2.0).unwrap();

        let acc = dinf_accumulation(&angles).unwrap();
        let east = acc.get(1, 1).unwrap();
        let northeast = acc.get(0, 1).unwrap();
        assert!((east + northeast - 1.0).abs() < 1e-12);
        assert!(east > 0.0 && northeast > 0.0);
    }

    #[test]
    fn test_dinf_accumulation_convergent_dem() {
        // Pit in the center of a bowl: center collects everything
        let mut dem = Raster::new(3, 3);
        dem.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
        for row in 0..3 {
            for col in 0..3 {
                dem.set(row, col, 5.0).unwrap();
            }
        }
        dem.set(1, 1, 1.0).unwrap();

        let angles = flow_direction_dinf(&dem).unwrap();
        let acc = dinf_accumulation(&angles).unwrap();

        let center = acc.get(1, 1).unwrap();
        assert!(
            center > 5.0,
            "Center pit should accumulate most neighbors, got {}",
            center
        );
    }
}
