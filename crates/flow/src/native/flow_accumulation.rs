//! D8 flow accumulation
//!
//! Counts the upstream cells draining through each cell of a TauDEM-coded
//! D8 direction raster, by topological propagation from the headwaters.

use crate::direction::{downstream_index, D8Direction, DirScheme};
use crate::error::Result;
use hydroshed_core::raster::Raster;
use ndarray::Array2;

/// Calculate flow accumulation from a D8 flow direction raster.
///
/// Each cell receives a count of all upstream cells that flow into it;
/// headwater cells have accumulation 0. Codes outside 1..8 (pits, flats,
/// nodata) terminate flow paths.
pub fn flow_accumulation(flow_dir: &Raster<i32>) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();

    let direction_of = |row: usize, col: usize| -> Option<D8Direction> {
        let code = unsafe { flow_dir.get_unchecked(row, col) };
        if flow_dir.is_nodata(code) {
            return None;
        }
        D8Direction::from_code(code, DirScheme::TauDem).ok()
    };

    // Step 1: in-degree of every cell (how many cells flow into it)
    let mut in_degree = Array2::<u32>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            let Some(dir) = direction_of(row, col) else {
                continue;
            };
            let (nr, nc) = downstream_index(row, col, dir);
            if nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols {
                in_degree[(nr as usize, nc as usize)] += 1;
            }
        }
    }

    // Step 2: seed with headwater cells
    let mut queue: Vec<(usize, usize)> = Vec::new();
    let mut accumulation = Array2::<f64>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 {
                queue.push((row, col));
            }
        }
    }

    // Step 3: propagate downstream in topological order
    while let Some((row, col)) = queue.pop() {
        let Some(dir) = direction_of(row, col) else {
            continue;
        };
        let (nr, nc) = downstream_index(row, col, dir);
        if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
            continue;
        }
        let (nr, nc) = (nr as usize, nc as usize);

        accumulation[(nr, nc)] += accumulation[(row, col)] + 1.0;

        in_degree[(nr, nc)] = in_degree[(nr, nc)].saturating_sub(1);
        if in_degree[(nr, nc)] == 0 {
            queue.push((nr, nc));
        }
    }

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    *output.data_mut() = accumulation;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::flow_direction;
    use hydroshed_core::GeoTransform;

    #[test]
    fn test_flow_accumulation_linear() {
        // 1x5 strip sloping east: Cell 0 -> 1 -> 2 -> 3 -> 4
        let mut dem = Raster::new(1, 5);
        dem.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));

        for col in 0..5 {
            dem.set(0, col, (5 - col) as f64).unwrap();
        }

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        assert_eq!(acc.get(0, 0).unwrap(), 0.0); // Headwater
        assert_eq!(acc.get(0, 1).unwrap(), 1.0);
        assert_eq!(acc.get(0, 2).unwrap(), 2.0);
        assert_eq!(acc.get(0, 3).unwrap(), 3.0);
        assert_eq!(acc.get(0, 4).unwrap(), 4.0); // Outlet
    }

    #[test]
    fn test_flow_accumulation_convergent() {
        // 3x3 DEM with center lowest: all flow converges on the center
        let mut dem = Raster::new(3, 3);
        dem.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));

        for row in 0..3 {
            for col in 0..3 {
                dem.set(row, col, 5.0).unwrap();
            }
        }
        dem.set(1, 1, 1.0).unwrap();

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        let center = acc.get(1, 1).unwrap();
        assert_eq!(
            center, 8.0,
            "Center should accumulate all 8 neighbors, got {}",
            center
        );
    }

    #[test]
    fn test_flow_accumulation_plane() {
        // 5x5 plane sloping south: each row accumulates from the rows above
        let mut dem = Raster::new(5, 5);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));

        for row in 0..5 {
            for col in 0..5 {
                dem.set(row, col, (5 - row) as f64 * 10.0).unwrap();
            }
        }

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        for col in 0..5 {
            assert_eq!(
                acc.get(0, col).unwrap(),
                0.0,
                "Top row should have 0 accumulation"
            );
        }

        let bottom_center = acc.get(4, 2).unwrap();
        assert!(
            bottom_center >= 4.0,
            "Bottom center should have high accumulation, got {}",
            bottom_center
        );
    }
}
