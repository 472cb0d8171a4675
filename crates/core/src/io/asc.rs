//! ESRI ASCII grid codec
//!
//! Simple interchange format: a six-line header (NCOLS, NROWS, XLLCENTER or
//! XLLCORNER, YLLCENTER or YLLCORNER, CELLSIZE, NODATA_VALUE) followed by
//! whitespace-separated cell values in row-major order, top row first.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Read an ESRI ASCII grid into a Raster
pub fn read_asc_grid<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut ncols: Option<usize> = None;
    let mut nrows: Option<usize> = None;
    let mut xll: Option<f64> = None;
    let mut yll: Option<f64> = None;
    let mut center_registered = false;
    let mut cellsize: Option<f64> = None;
    let mut nodata: Option<f64> = None;
    let mut values: Vec<T> = Vec::new();

    let corrupt = |reason: &str| Error::CorruptHeader {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut tokens = trimmed.split_whitespace();
        let first = tokens.next().unwrap();
        let key = first.to_ascii_uppercase();

        if matches!(
            key.as_str(),
            "NCOLS" | "NROWS" | "XLLCENTER" | "XLLCORNER" | "YLLCENTER" | "YLLCORNER"
                | "CELLSIZE" | "NODATA_VALUE"
        ) {
            let value: f64 = tokens
                .next()
                .ok_or_else(|| corrupt("missing header value"))?
                .parse()
                .map_err(|_| corrupt("non-numeric header value"))?;
            match key.as_str() {
                "NCOLS" => ncols = Some(value as usize),
                "NROWS" => nrows = Some(value as usize),
                "XLLCENTER" => {
                    xll = Some(value);
                    center_registered = true;
                }
                "XLLCORNER" => xll = Some(value),
                "YLLCENTER" => {
                    yll = Some(value);
                    center_registered = true;
                }
                "YLLCORNER" => yll = Some(value),
                "CELLSIZE" => cellsize = Some(value),
                _ => nodata = Some(value),
            }
        } else {
            // Data row: the first token is a cell value too
            for tok in std::iter::once(first).chain(tokens) {
                let v = tok
                    .parse::<f64>()
                    .map_err(|_| corrupt("non-numeric cell value"))?;
                values.push(num_traits::cast(v).unwrap_or(T::default_nodata()));
            }
        }
    }

    let ncols = ncols.ok_or_else(|| corrupt("missing NCOLS"))?;
    let nrows = nrows.ok_or_else(|| corrupt("missing NROWS"))?;
    let cellsize = cellsize.ok_or_else(|| corrupt("missing CELLSIZE"))?;
    let xll = xll.ok_or_else(|| corrupt("missing XLLCENTER/XLLCORNER"))?;
    let yll = yll.ok_or_else(|| corrupt("missing YLLCENTER/YLLCORNER"))?;

    if values.len() != nrows * ncols {
        return Err(corrupt(&format!(
            "expected {} cells, found {}",
            nrows * ncols,
            values.len()
        )));
    }

    let mut raster = Raster::from_vec(values, nrows, ncols)?;

    // The header references the lower-left cell; the geotransform origin is
    // the upper-left corner.
    let half = if center_registered { 0.5 * cellsize } else { 0.0 };
    let origin_x = xll - half;
    let origin_y = yll - half + nrows as f64 * cellsize;
    raster.set_transform(GeoTransform::new(origin_x, origin_y, cellsize, -cellsize));

    if let Some(nd) = nodata {
        raster.set_nodata(num_traits::cast(nd));
    }

    Ok(raster)
}

/// Write a Raster as an ESRI ASCII grid
///
/// Cells are registered by center (XLLCENTER/YLLCENTER), matching the
/// external hydrology toolset's output convention.
pub fn write_asc_grid<T, P>(path: P, raster: &Raster<T>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    let (rows, cols) = raster.shape();
    let gt = raster.transform();
    let cellsize = gt.cell_size_x();
    let nodata = raster
        .nodata()
        .and_then(|nd| nd.to_f64())
        .unwrap_or(crate::raster::DEFAULT_NODATA);

    // Lower-left cell center, derived from the upper-left origin
    let xll_center = gt.origin_x + 0.5 * cellsize;
    let yll_center = gt.origin_y - (rows as f64 - 0.5) * cellsize;

    writeln!(writer, "NCOLS {}", cols)?;
    writeln!(writer, "NROWS {}", rows)?;
    writeln!(writer, "XLLCENTER {}", xll_center)?;
    writeln!(writer, "YLLCENTER {}", yll_center)?;
    writeln!(writer, "CELLSIZE {}", cellsize)?;
    writeln!(writer, "NODATA_VALUE {}", nodata)?;

    for row in 0..rows {
        let mut line = String::with_capacity(cols * 8);
        for col in 0..cols {
            let value = unsafe { raster.get_unchecked(row, col) };
            let v = if raster.is_nodata(value) {
                nodata
            } else {
                value.to_f64().unwrap_or(nodata)
            };
            if col > 0 {
                line.push(' ');
            }
            line.push_str(&format!("{}", v));
        }
        writeln!(writer, "{}", line)?;
    }

    writer.flush()?;
    Ok(())
}
