//! D-infinity flow direction algebra
//!
//! A D-infinity direction is a continuous angle in [0, 2pi), 0 aligned with
//! East, increasing counter-clockwise (Tarboton 1997). Each angle decomposes
//! into the two adjacent D8 directions bracketing it, with proportional
//! weights, which is how accumulation algorithms and the compressed on-disk
//! representation consume it.

use crate::direction::{downstream_index, D8Direction, DirScheme};
use crate::error::{Error, Result};
use hydroshed_core::Raster;
use ndarray::Array2;
use std::f64::consts::{FRAC_PI_4, PI};

const TWO_PI: f64 = 2.0 * PI;

/// Fixed-precision steps per 45-degree sector for the compressed format.
///
/// Four decimal digits of weight resolution; the worst-case angle error
/// introduced by quantization is (pi/4) / (2 * WEIGHT_SCALE).
pub const WEIGHT_SCALE: u16 = 10_000;

/// ArcGIS pair-sum codes per sector (sum of the two bracketing D8 codes),
/// counter-clockwise from the E-NE sector.
const ARCGIS_PAIR_CODES: [i32; 8] = [129, 192, 96, 48, 24, 12, 6, 3];

/// Decomposition of a D-infinity angle into two adjacent D8 directions.
///
/// `w1 + w2 == 1`; when the angle sits exactly on a 45-degree boundary,
/// `w1 == 1` and `dir2` is still reported but carries zero weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DinfPair {
    pub dir1: D8Direction,
    pub dir2: D8Direction,
    pub w1: f64,
    pub w2: f64,
}

/// Normalize an angle into [0, 2pi), rejecting values that are not a flow
/// direction at all.
///
/// A small overshoot past 2pi is wrapped rather than rejected: angle grids
/// round-tripped through 32-bit storage land marginally above the period.
fn normalize_angle(angle: f64) -> Result<f64> {
    if !angle.is_finite() || angle < 0.0 || angle > TWO_PI + 1e-6 {
        return Err(Error::AngleOutOfRange(angle));
    }
    if angle >= TWO_PI {
        Ok(angle - TWO_PI)
    } else {
        Ok(angle)
    }
}

/// Decompose a D-infinity angle into its bracketing D8 pair.
pub fn dinf_to_d8_pair(angle: f64) -> Result<DinfPair> {
    let angle = normalize_angle(angle)?;

    let sector = ((angle / FRAC_PI_4).floor() as usize).min(7);
    let frac = (angle / FRAC_PI_4 - sector as f64).clamp(0.0, 1.0);

    Ok(DinfPair {
        dir1: D8Direction::from_index(sector),
        dir2: D8Direction::from_index(sector + 1),
        w1: 1.0 - frac,
        w2: frac,
    })
}

/// Whether an angle is within `epsilon` of a multiple of pi/2.
///
/// Degenerate flow along a grid axis can be treated as pure D8 by callers
/// that want to skip the proportional split.
pub fn check_orthogonal(angle: f64, epsilon: f64) -> bool {
    let half_pi = PI / 2.0;
    let k = (angle / half_pi).round();
    (angle - k * half_pi).abs() <= epsilon
}

/// Weighted downstream neighbors for a D-infinity angle.
///
/// Returns one entry for pure single-direction flow, two otherwise. Bounds
/// checking against the grid extent is the caller's concern.
pub fn downstream_index_dinf(
    row: usize,
    col: usize,
    angle: f64,
) -> Result<Vec<(isize, isize, f64)>> {
    let pair = dinf_to_d8_pair(angle)?;
    let mut neighbors = Vec::with_capacity(2);

    if pair.w1 > 0.0 {
        let (r, c) = downstream_index(row, col, pair.dir1);
        neighbors.push((r, c, pair.w1));
    }
    if pair.w2 > 0.0 {
        let (r, c) = downstream_index(row, col, pair.dir2);
        neighbors.push((r, c, pair.w2));
    }

    Ok(neighbors)
}

/// A D-infinity angle grid quantized for compact serialization.
///
/// Each valid cell stores an ArcGIS-convention direction code (a single D8
/// code on a 45-degree boundary, a pair-sum code otherwise) in `codes`, and
/// the first direction's weight in fixed `WEIGHT_SCALE` steps in `weights`.
#[derive(Debug, Clone)]
pub struct CompressedDinf {
    codes: Raster<i16>,
    weights: Raster<u16>,
    max_error: f64,
    rows: usize,
    cols: usize,
}

impl CompressedDinf {
    /// The compressed direction-code raster (ArcGIS convention).
    pub fn codes(&self) -> &Raster<i16> {
        &self.codes
    }

    /// The quantized first-direction weight raster.
    pub fn weights(&self) -> &Raster<u16> {
        &self.weights
    }

    /// Largest per-cell angle error introduced by quantization.
    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    /// The guaranteed bound on per-cell quantization error.
    pub fn error_bound() -> f64 {
        FRAC_PI_4 / (2.0 * WEIGHT_SCALE as f64)
    }

    /// Reconstruct the angle grid from the compressed representation.
    ///
    /// Reconstructed angles are exact quantization points, so compressing
    /// the result again is a no-op.
    pub fn decompress(&self) -> Raster<f64> {
        let mut angles = Array2::<f64>::from_elem((self.rows, self.cols), f64::NAN);

        for row in 0..self.rows {
            for col in 0..self.cols {
                let code = unsafe { self.codes.get_unchecked(row, col) };
                if self.codes.is_nodata(code) {
                    continue;
                }
                let Some(sector) = sector_of_code(code as i32) else {
                    continue;
                };
                let w1 = unsafe { self.weights.get_unchecked(row, col) };
                let q = WEIGHT_SCALE.saturating_sub(w1) as f64;
                angles[(row, col)] =
                    (sector as f64 + q / WEIGHT_SCALE as f64) * FRAC_PI_4;
            }
        }

        let mut output = self.codes.with_same_meta::<f64>(self.rows, self.cols);
        output.set_nodata(Some(f64::NAN));
        *output.data_mut() = angles;
        output
    }
}

/// Sector index for a compressed code: single codes map to their own
/// direction, pair-sum codes to the sector they span.
fn sector_of_code(code: i32) -> Option<usize> {
    if let Some(sector) = ARCGIS_PAIR_CODES.iter().position(|&c| c == code) {
        return Some(sector);
    }
    DirScheme::ArcGis.codes().iter().position(|&c| c == code)
}

/// Quantize a D-infinity angle grid for serialization.
///
/// Cells holding nodata, negative angles (the pit marker emitted by the
/// external flow-direction tool), or values outside [0, 2pi) come through as
/// nodata in both output rasters. Quantization is canonical: a weight that
/// rounds to zero rolls over into the next sector's pure direction, so every
/// representable angle has exactly one encoding and re-compression is a
/// stable fixed point.
pub fn compress_dinf(angles: &Raster<f64>) -> CompressedDinf {
    let (rows, cols) = angles.shape();
    let code_nodata = -9999i16;

    let mut codes = angles.with_same_meta::<i16>(rows, cols);
    codes.set_nodata(Some(code_nodata));
    let mut weights = angles.with_same_meta::<u16>(rows, cols);
    weights.set_nodata(Some(u16::MAX));

    let mut code_data = Array2::<i16>::from_elem((rows, cols), code_nodata);
    let mut weight_data = Array2::<u16>::from_elem((rows, cols), u16::MAX);
    let mut max_error = 0.0f64;

    for row in 0..rows {
        for col in 0..cols {
            let angle = unsafe { angles.get_unchecked(row, col) };
            if angles.is_nodata(angle) || angle < 0.0 {
                continue;
            }
            let Ok(angle) = normalize_angle(angle) else {
                tracing::warn!(row, col, angle, "flow angle outside [0, 2pi) set to nodata");
                continue;
            };

            let sector = ((angle / FRAC_PI_4).floor() as usize).min(7);
            let frac = (angle / FRAC_PI_4 - sector as f64).clamp(0.0, 1.0);
            let mut q = (frac * WEIGHT_SCALE as f64).round() as u32;
            let mut sector = sector;
            if q == WEIGHT_SCALE as u32 {
                // Rolls over onto the next sector boundary
                sector = (sector + 1) % 8;
                q = 0;
            }

            let code = if q == 0 {
                // Pure single-direction flow on a 45-degree boundary
                D8Direction::from_index(sector).code(DirScheme::ArcGis) as i16
            } else {
                ARCGIS_PAIR_CODES[sector] as i16
            };
            let w1 = WEIGHT_SCALE - q as u16;

            let reconstructed =
                (sector as f64 + q as f64 / WEIGHT_SCALE as f64) * FRAC_PI_4;
            let diff = (angle - reconstructed).abs();
            let circular = diff.min(TWO_PI - diff);
            if circular > max_error {
                max_error = circular;
            }

            code_data[(row, col)] = code;
            weight_data[(row, col)] = w1;
        }
    }

    *codes.data_mut() = code_data;
    *weights.data_mut() = weight_data;

    CompressedDinf {
        codes,
        weights,
        max_error,
        rows,
        cols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pair_weights_sum_to_one() {
        let mut angle = 0.0;
        while angle < TWO_PI {
            let pair = dinf_to_d8_pair(angle).unwrap();
            assert_relative_eq!(pair.w1 + pair.w2, 1.0, epsilon = 1e-12);
            assert!(pair.w1 >= 0.0 && pair.w2 >= 0.0);
            angle += 0.01;
        }
    }

    #[test]
    fn test_pair_at_exact_multiples() {
        for k in 0..8 {
            let angle = k as f64 * FRAC_PI_4;
            let pair = dinf_to_d8_pair(angle).unwrap();
            assert_eq!(pair.dir1, D8Direction::from_index(k));
            assert_eq!(pair.dir2, D8Direction::from_index(k + 1));
            assert_relative_eq!(pair.w1, 1.0);
            assert_relative_eq!(pair.w2, 0.0);
        }
    }

    #[test]
    fn test_pair_mid_sector() {
        // 30 degrees: between E and NE, 2/3 toward E
        let pair = dinf_to_d8_pair(PI / 6.0).unwrap();
        assert_eq!(pair.dir1, D8Direction::East);
        assert_eq!(pair.dir2, D8Direction::Northeast);
        assert_relative_eq!(pair.w1, 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(pair.w2, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_out_of_range() {
        assert!(dinf_to_d8_pair(-0.5).is_err());
        assert!(dinf_to_d8_pair(7.0).is_err());
        assert!(dinf_to_d8_pair(f64::NAN).is_err());
    }

    #[test]
    fn test_check_orthogonal() {
        let eps = 1e-6;
        for angle in [0.0, PI / 2.0, PI, 3.0 * PI / 2.0] {
            assert!(check_orthogonal(angle, eps), "angle {} should be orthogonal", angle);
        }
        assert!(!check_orthogonal(FRAC_PI_4, eps));
        assert!(!check_orthogonal(1.0, eps));
        assert!(check_orthogonal(PI / 2.0 + 1e-8, eps));
    }

    #[test]
    fn test_downstream_index_dinf_pure() {
        // Due north: single neighbor at (row-1, col)
        let neighbors = downstream_index_dinf(5, 5, PI / 2.0).unwrap();
        assert_eq!(neighbors, vec![(4, 5, 1.0)]);
    }

    #[test]
    fn test_downstream_index_dinf_split() {
        // 22.5 degrees: split between E and NE
        let neighbors = downstream_index_dinf(5, 5, FRAC_PI_4 / 2.0).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!((neighbors[0].0, neighbors[0].1), (5, 6));
        assert_eq!((neighbors[1].0, neighbors[1].1), (4, 6));
        assert_relative_eq!(neighbors[0].2 + neighbors[1].2, 1.0, epsilon = 1e-12);
    }

    fn synthetic_angles() -> Raster<f64> {
        let mut angles: Raster<f64> = Raster::new(16, 16);
        angles.set_nodata(Some(f64::NAN));
        for row in 0..16 {
            for col in 0..16 {
                let a = (row * 16 + col) as f64 / 256.0 * TWO_PI;
                angles.set(row, col, a).unwrap();
            }
        }
        // A pit marker and a nodata hole
        angles.set(3, 3, -1.0).unwrap();
        angles.set(7, 7, f64::NAN).unwrap();
        angles
    }

    #[test]
    fn test_compress_error_bounded() {
        let angles = synthetic_angles();
        let compressed = compress_dinf(&angles);

        assert!(compressed.max_error() <= CompressedDinf::error_bound() + 1e-12);

        let restored = compressed.decompress();
        for row in 0..16 {
            for col in 0..16 {
                let orig = angles.get(row, col).unwrap();
                let back = restored.get(row, col).unwrap();
                if orig.is_nan() || orig < 0.0 {
                    assert!(back.is_nan());
                    continue;
                }
                let diff = (orig - back).abs();
                let circular = diff.min(TWO_PI - diff);
                assert!(
                    circular <= CompressedDinf::error_bound() + 1e-12,
                    "cell ({},{}): error {} exceeds bound",
                    row,
                    col,
                    circular
                );
            }
        }
    }

    #[test]
    fn test_recompression_is_fixed_point() {
        let angles = synthetic_angles();
        let first = compress_dinf(&angles);
        let second = compress_dinf(&first.decompress());

        assert_relative_eq!(second.max_error(), 0.0, epsilon = 1e-9);
        for row in 0..16 {
            for col in 0..16 {
                assert_eq!(
                    first.codes().get(row, col).unwrap(),
                    second.codes().get(row, col).unwrap(),
                    "code mismatch at ({},{})",
                    row,
                    col
                );
                assert_eq!(
                    first.weights().get(row, col).unwrap(),
                    second.weights().get(row, col).unwrap(),
                    "weight mismatch at ({},{})",
                    row,
                    col
                );
            }
        }
    }

    #[test]
    fn test_compressed_codes_match_convention() {
        let mut angles: Raster<f64> = Raster::new(1, 3);
        angles.set_nodata(Some(f64::NAN));
        angles.set(0, 0, 0.0).unwrap(); // due East -> ArcGIS 1
        angles.set(0, 1, FRAC_PI_4).unwrap(); // due NE -> ArcGIS 128
        angles.set(0, 2, FRAC_PI_4 / 2.0).unwrap(); // E-NE split -> 129

        let compressed = compress_dinf(&angles);
        assert_eq!(compressed.codes().get(0, 0).unwrap(), 1);
        assert_eq!(compressed.codes().get(0, 1).unwrap(), 128);
        assert_eq!(compressed.codes().get(0, 2).unwrap(), 129);
        assert_eq!(compressed.weights().get(0, 2).unwrap(), WEIGHT_SCALE / 2);
    }
}
