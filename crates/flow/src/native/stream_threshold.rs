//! Stream definition by accumulation threshold
//!
//! Cells whose contributing area meets the threshold become stream cells;
//! the binary raster feeds the stream network post-processor.

use crate::error::Result;
use hydroshed_core::raster::Raster;
use ndarray::Array2;

/// Extract a binary stream raster from flow accumulation.
///
/// Returns 1 for cells with accumulation >= `threshold`, 0 elsewhere.
pub fn stream_threshold(flow_acc: &Raster<f64>, threshold: f64) -> Result<Raster<i32>> {
    let (rows, cols) = flow_acc.shape();

    let mut output_data = Array2::<i32>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            let acc = unsafe { flow_acc.get_unchecked(row, col) };
            if !flow_acc.is_nodata(acc) && acc >= threshold {
                output_data[(row, col)] = 1;
            }
        }
    }

    let mut output = flow_acc.with_same_meta::<i32>(rows, cols);
    output.set_nodata(Some(0));
    *output.data_mut() = output_data;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{fill_sinks, flow_accumulation, flow_direction, FillSinksParams};
    use hydroshed_core::GeoTransform;

    #[test]
    fn test_stream_threshold_south_slope() {
        // South-sloping DEM: accumulation grows downslope
        let mut dem = Raster::new(10, 10);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        for row in 0..10 {
            for col in 0..10 {
                dem.set(row, col, (10 - row) as f64 * 10.0).unwrap();
            }
        }

        let filled = fill_sinks(&dem, FillSinksParams { min_slope: 0.0 }).unwrap();
        let fdir = flow_direction(&filled).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();

        let streams = stream_threshold(&facc, 5.0).unwrap();

        for col in 0..10 {
            assert_eq!(
                streams.get(0, col).unwrap(),
                0,
                "Top row should not be stream at col {}",
                col
            );
        }

        let bottom = streams.get(9, 5).unwrap();
        assert_eq!(bottom, 1, "Bottom center should be stream, got {}", bottom);
    }

    #[test]
    fn test_stream_threshold_binary_output() {
        let mut dem = Raster::new(5, 5);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        for row in 0..5 {
            for col in 0..5 {
                dem.set(row, col, (5 - row) as f64 * 10.0).unwrap();
            }
        }

        let fdir = flow_direction(&dem).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();
        let streams = stream_threshold(&facc, 2.0).unwrap();

        let (rows, cols) = streams.shape();
        for row in 0..rows {
            for col in 0..cols {
                let val = streams.get(row, col).unwrap();
                assert!(val == 0 || val == 1, "Expected 0 or 1, got {}", val);
            }
        }
    }

    #[test]
    fn test_stream_threshold_high_threshold_no_streams() {
        let mut dem = Raster::new(5, 5);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        for row in 0..5 {
            for col in 0..5 {
                dem.set(row, col, (5 - row) as f64).unwrap();
            }
        }

        let fdir = flow_direction(&dem).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();
        let streams = stream_threshold(&facc, 1000.0).unwrap();

        let (rows, cols) = streams.shape();
        for row in 0..rows {
            for col in 0..cols {
                assert_eq!(streams.get(row, col).unwrap(), 0, "No streams expected");
            }
        }
    }
}
