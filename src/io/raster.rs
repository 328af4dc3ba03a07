//! GeoTIFF reading and writing for images and classification products.
//!
//! On disk, no-data is the -9999 sentinel (and 0 counts as no-data on read,
//! matching provider surface-reflectance products); in memory it is NaN.
//! Integer-scaled reflectance is detected and rescaled to 0..1 on read.

use std::path::Path;

use chrono::NaiveDateTime;
use gdal::raster::Buffer;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};
use log::{debug, info, warn};
use ndarray::Array2;

use crate::core::stats::nan_mean;
use crate::types::{
    ClassifiedRaster, GeoTransform, SnowError, SnowResult, SpectralImage, CLASS_NO_DATA,
    RASTER_NO_DATA, REFLECTANCE_SCALE,
};

/// Acquisition timestamp from a provider-style file name, whose stem starts
/// with `YYYYMMDD_HHMMSS`.
pub fn parse_acquisition_datetime(path: &Path) -> SnowResult<NaiveDateTime> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SnowError::InvalidFormat(format!("bad file name: {}", path.display())))?;
    if stem.len() < 15 {
        return Err(SnowError::InvalidFormat(format!(
            "file name too short for a timestamp: {stem}"
        )));
    }
    NaiveDateTime::parse_from_str(&stem[..15], "%Y%m%d_%H%M%S").map_err(|e| {
        SnowError::InvalidFormat(format!("no acquisition timestamp in '{stem}': {e}"))
    })
}

fn epsg_of(dataset: &Dataset) -> SnowResult<u32> {
    let srs = dataset.spatial_ref()?;
    let code = srs.auth_code()?;
    Ok(code as u32)
}

/// Read a 4-band surface-reflectance image.
///
/// The acquisition timestamp comes from the file name. Bands beyond the
/// first four are ignored.
pub fn read_image(path: &Path) -> SnowResult<SpectralImage> {
    let acquired = parse_acquisition_datetime(path)?;
    let dataset = Dataset::open(path)?;
    let n_bands = dataset.raster_count() as usize;
    if n_bands < 4 {
        return Err(SnowError::InvalidFormat(format!(
            "expected at least 4 bands, found {n_bands} in {}",
            path.display()
        )));
    }
    if n_bands > 4 {
        warn!("{}: using the first 4 of {n_bands} bands", path.display());
    }
    let (width, height) = dataset.raster_size();
    let geo_transform = GeoTransform::from_array(dataset.geo_transform()?);
    let epsg = epsg_of(&dataset)?;

    let read_band = |i: usize| -> SnowResult<Array2<f32>> {
        let band = dataset.rasterband(i)?;
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let data = Array2::from_shape_vec((height, width), buffer.into_shape_and_vec().1)
            .map_err(|e| SnowError::InvalidFormat(format!("band {i} shape mismatch: {e}")))?;
        Ok(data.mapv(|v| {
            if v == 0.0 || v == RASTER_NO_DATA as f32 {
                f32::NAN
            } else {
                v
            }
        }))
    };
    let mut bands = [read_band(1)?, read_band(2)?, read_band(3)?, read_band(4)?];

    // provider products often store reflectance as scaled integers
    let overall_mean = nan_mean(bands.iter().flat_map(|b| b.iter().copied()));
    if overall_mean > 1e3 {
        debug!("Rescaling integer reflectance by 1/{REFLECTANCE_SCALE}");
        for band in &mut bands {
            band.mapv_inplace(|v| v / REFLECTANCE_SCALE);
        }
    }

    info!(
        "Read {}x{} image acquired {} from {}",
        width,
        height,
        acquired,
        path.display()
    );
    SpectralImage::new(bands, geo_transform, epsg, acquired)
}

/// Write a 4-band image as GeoTIFF, mapping NaN to the no-data sentinel
pub fn write_image(path: &Path, image: &SpectralImage) -> SnowResult<()> {
    let (height, width) = image.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<f32, _>(path, width, height, 4)?;
    dataset.set_geo_transform(&image.geo_transform.to_array())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(image.epsg)?)?;

    for (i, band_data) in image.bands().iter().enumerate() {
        let values: Vec<f32> = band_data
            .iter()
            .map(|&v| if v.is_finite() { v } else { RASTER_NO_DATA as f32 })
            .collect();
        let mut band = dataset.rasterband(i + 1)?;
        band.set_no_data_value(Some(RASTER_NO_DATA))?;
        band.write((0, 0), (width, height), &mut Buffer::new((width, height), values))?;
    }
    debug!("Wrote image to {}", path.display());
    Ok(())
}

/// Read a single-band class raster
pub fn read_classified(path: &Path) -> SnowResult<ClassifiedRaster> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let geo_transform = GeoTransform::from_array(dataset.geo_transform()?);
    let epsg = epsg_of(&dataset)?;

    let band = dataset.rasterband(1)?;
    let buffer = band.read_as::<i16>((0, 0), (width, height), (width, height), None)?;
    let classes = Array2::from_shape_vec((height, width), buffer.into_shape_and_vec().1)
        .map_err(|e| SnowError::InvalidFormat(format!("class raster shape mismatch: {e}")))?;
    Ok(ClassifiedRaster {
        classes,
        geo_transform,
        epsg,
    })
}

/// Write a class raster as a single-band GeoTIFF
pub fn write_classified(path: &Path, classified: &ClassifiedRaster) -> SnowResult<()> {
    let (height, width) = classified.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<i16, _>(path, width, height, 1)?;
    dataset.set_geo_transform(&classified.geo_transform.to_array())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(classified.epsg)?)?;

    let mut band = dataset.rasterband(1)?;
    band.set_no_data_value(Some(CLASS_NO_DATA as f64))?;
    let values: Vec<i16> = classified.classes.iter().copied().collect();
    band.write((0, 0), (width, height), &mut Buffer::new((width, height), values))?;
    debug!("Wrote class raster to {}", path.display());
    Ok(())
}

/// Read one f32 band with its georeferencing, values untouched
pub fn read_single_band(path: &Path) -> SnowResult<(Array2<f32>, GeoTransform, u32)> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let geo_transform = GeoTransform::from_array(dataset.geo_transform()?);
    let epsg = epsg_of(&dataset)?;

    let band = dataset.rasterband(1)?;
    let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.into_shape_and_vec().1)
        .map_err(|e| SnowError::InvalidFormat(format!("band shape mismatch: {e}")))?;
    Ok((data, geo_transform, epsg))
}

/// Write one f32 band with georeferencing, values untouched
pub fn write_single_band(
    path: &Path,
    data: &Array2<f32>,
    geo_transform: &GeoTransform,
    epsg: u32,
) -> SnowResult<()> {
    let (height, width) = data.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<f32, _>(path, width, height, 1)?;
    dataset.set_geo_transform(&geo_transform.to_array())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;

    let mut band = dataset.rasterband(1)?;
    let values: Vec<f32> = data.iter().copied().collect();
    band.write((0, 0), (width, height), &mut Buffer::new((width, height), values))?;
    Ok(())
}

/// Image center as WGS84 (latitude, longitude)
pub fn image_center_wgs84(image: &SpectralImage) -> SnowResult<(f64, f64)> {
    let bounds = image.bounds();
    let cx = (bounds.min_x + bounds.max_x) / 2.0;
    let cy = (bounds.min_y + bounds.max_y) / 2.0;

    let mut source = SpatialRef::from_epsg(image.epsg)?;
    let mut target = SpatialRef::from_epsg(4326)?;
    source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    let transform = CoordTransform::new(&source, &target)?;

    let mut xs = [cx];
    let mut ys = [cy];
    let mut zs = [0.0];
    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
    // traditional GIS order puts longitude in x
    Ok((ys[0], xs[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn sample_image() -> SpectralImage {
        let acquired = NaiveDate::from_ymd_opt(2021, 8, 2)
            .unwrap()
            .and_hms_opt(21, 5, 44)
            .unwrap();
        let mut blue = Array2::from_elem((8, 6), 0.8f32);
        blue[[2, 3]] = f32::NAN;
        let bands = [
            blue,
            Array2::from_elem((8, 6), 0.7),
            Array2::from_elem((8, 6), 0.6),
            Array2::from_elem((8, 6), 0.5),
        ];
        SpectralImage::new(
            bands,
            GeoTransform::north_up(590000.0, 6740000.0, 3.0, -3.0),
            32606,
            acquired,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_acquisition_datetime() {
        let dt = parse_acquisition_datetime(Path::new("/data/20210802_210544_1014_3B.tif"))
            .unwrap();
        assert_eq!(
            dt,
            NaiveDate::from_ymd_opt(2021, 8, 2)
                .unwrap()
                .and_hms_opt(21, 5, 44)
                .unwrap()
        );
        assert!(parse_acquisition_datetime(Path::new("/data/scene.tif")).is_err());
    }

    #[test]
    fn test_image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20210802_210544_test.tif");
        let image = sample_image();
        write_image(&path, &image).unwrap();

        let back = read_image(&path).unwrap();
        assert_eq!(back.dim(), image.dim());
        assert_eq!(back.epsg, 32606);
        assert_eq!(back.acquired, image.acquired);
        assert_relative_eq!(
            back.geo_transform.top_left_x,
            image.geo_transform.top_left_x
        );
        // values survive, NaN survives via the sentinel
        assert_relative_eq!(
            back.band(crate::types::SpectralBandKind::Green)[[0, 0]],
            0.7,
            epsilon = 1e-6
        );
        assert!(back.band(crate::types::SpectralBandKind::Blue)[[2, 3]].is_nan());
    }

    #[test]
    fn test_classified_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.tif");
        let mut classes = Array2::from_elem((5, 7), 3i16);
        classes[[0, 0]] = 1;
        classes[[4, 6]] = CLASS_NO_DATA;
        let classified = ClassifiedRaster {
            classes,
            geo_transform: GeoTransform::north_up(0.0, 50.0, 10.0, -10.0),
            epsg: 32606,
        };
        write_classified(&path, &classified).unwrap();

        let back = read_classified(&path).unwrap();
        assert_eq!(back.classes, classified.classes);
        assert_eq!(back.epsg, 32606);
    }

    #[test]
    fn test_single_band_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shade.tif");
        let data = Array2::from_shape_fn((4, 5), |(r, c)| (r * 5 + c) as f32);
        let gt = GeoTransform::north_up(100.0, 200.0, 30.0, -30.0);
        write_single_band(&path, &data, &gt, 32606).unwrap();

        let (back, back_gt, epsg) = read_single_band(&path).unwrap();
        assert_eq!(back, data);
        assert_relative_eq!(back_gt.pixel_width, gt.pixel_width);
        assert_eq!(epsg, 32606);
    }

    #[test]
    fn test_image_center_wgs84() {
        // UTM 6N around Anchorage; latitude must come out near 61 N
        let image = sample_image();
        let (lat, lon) = image_center_wgs84(&image).unwrap();
        assert!((55.0..70.0).contains(&lat), "latitude {lat}");
        assert!((-155.0..-140.0).contains(&lon), "longitude {lon}");
    }
}
