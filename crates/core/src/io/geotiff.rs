//! GeoTIFF reading/writing built on the `tiff` crate
//!
//! Supports single-band rasters with ModelPixelScale/ModelTiepoint
//! georeferencing and a GDAL-style NoData ASCII tag. This is the narrow
//! contract the delineation pipeline needs; exotic layouts (tiled, multi-band,
//! complex types) are rejected rather than guessed at.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Read a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P, _band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder = Decoder::new(file).map_err(|e| Error::CorruptHeader {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let (width, height) = decoder.dimensions().map_err(|e| Error::CorruptHeader {
        path: path.display().to_string(),
        reason: format!("cannot read dimensions: {}", e),
    })?;

    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("cannot read image data: {}", e)))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_buffer(&buf),
        DecodingResult::F64(buf) => cast_buffer(&buf),
        DecodingResult::U8(buf) => cast_buffer(&buf),
        DecodingResult::U16(buf) => cast_buffer(&buf),
        DecodingResult::U32(buf) => cast_buffer(&buf),
        DecodingResult::I8(buf) => cast_buffer(&buf),
        DecodingResult::I16(buf) => cast_buffer(&buf),
        DecodingResult::I32(buf) => cast_buffer(&buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Ok(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    if let Some(nodata) = read_nodata(&mut decoder) {
        raster.set_nodata(num_traits::cast(nodata));
    }

    Ok(raster)
}

fn cast_buffer<S, T>(buf: &[S]) -> Vec<T>
where
    S: Copy + num_traits::NumCast,
    T: RasterElement,
{
    buf.iter()
        .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
        .collect()
}

/// Attempt to read a GeoTransform from TIFF tags
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::Other("no pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::Other("no tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z]; scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        let pixel_width = scale[0];
        let pixel_height = -scale[1]; // negative for north-up

        return Ok(GeoTransform::new(origin_x, origin_y, pixel_width, pixel_height));
    }

    Err(Error::Other("cannot determine geotransform".into()))
}

/// Attempt to read the GDAL NoData ASCII tag
fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let text = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()?;
    text.trim().trim_end_matches('\0').parse::<f64>().ok()
}

/// Write a Raster to a GeoTIFF file
///
/// Writes a single 32-bit float band with georeferencing tags and a GDAL
/// NoData tag when a sentinel is set.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut encoder =
        TiffEncoder::new(file).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();

    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();

    // ModelPixelScaleTag
    let scale = vec![gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, scale.as_slice())
        .map_err(|e| Error::Other(format!("cannot write scale tag: {}", e)))?;

    // ModelTiepointTag
    let tiepoint = vec![0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())
        .map_err(|e| Error::Other(format!("cannot write tiepoint tag: {}", e)))?;

    // Minimal GeoKeyDirectoryTag: projected model, pixel-is-area
    let geokeys: Vec<u16> = vec![
        1, 1, 0, 2, // Version 1.1.0, 2 keys
        1024, 0, 1, 1, // GTModelTypeGeoKey = ModelTypeProjected
        1025, 0, 1, 1, // GTRasterTypeGeoKey = RasterPixelIsArea
    ];
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())
        .map_err(|e| Error::Other(format!("cannot write geokey tag: {}", e)))?;

    if let Some(nodata) = raster.nodata().and_then(|nd| nd.to_f64()) {
        let text = format!("{}", nodata);
        image
            .encoder()
            .write_tag(Tag::GdalNodata, text.as_str())
            .map_err(|e| Error::Other(format!("cannot write nodata tag: {}", e)))?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("cannot write image data: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_geotiff_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.tif");

        let mut raster: Raster<f64> = Raster::new(4, 3);
        raster.set_transform(GeoTransform::new(100.0, 200.0, 30.0, -30.0));
        raster.set_nodata(Some(-9999.0));
        for row in 0..4 {
            for col in 0..3 {
                raster.set(row, col, (row * 3 + col) as f64).unwrap();
            }
        }

        write_geotiff(&raster, &path).unwrap();
        let back: Raster<f64> = read_geotiff(&path, None).unwrap();

        assert_eq!(back.shape(), (4, 3));
        assert_eq!(back.get(2, 1).unwrap(), 7.0);
        assert_relative_eq!(back.transform().origin_x, 100.0);
        assert_relative_eq!(back.transform().pixel_width, 30.0);
        assert_relative_eq!(back.transform().pixel_height, -30.0);
        assert_eq!(back.nodata(), Some(-9999.0));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<Raster<f64>> = read_geotiff("/nonexistent/path.tif", None);
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
