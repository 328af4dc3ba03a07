//! DEM loading and UTM zone selection.

use std::path::Path;

use gdal::Dataset;
use log::info;
use ndarray::Array2;

use crate::types::{Dem, GeoTransform, SnowError, SnowResult, RASTER_NO_DATA};

/// Reads single-band elevation rasters
#[derive(Debug, Clone, Copy, Default)]
pub struct DemReader;

impl DemReader {
    /// Load a DEM, mapping its no-data value (or the -9999 sentinel) to NaN
    pub fn read(path: &Path) -> SnowResult<Dem> {
        let dataset = Dataset::open(path).map_err(|e| {
            SnowError::ResourceMissing(format!("DEM {}: {e}", path.display()))
        })?;
        let (width, height) = dataset.raster_size();
        let geo_transform = GeoTransform::from_array(dataset.geo_transform()?);
        let epsg = dataset.spatial_ref()?.auth_code()? as u32;

        let band = dataset.rasterband(1)?;
        let no_data = band.no_data_value().unwrap_or(RASTER_NO_DATA);
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let elevation = Array2::from_shape_vec((height, width), buffer.into_shape_and_vec().1)
            .map_err(|e| SnowError::InvalidFormat(format!("DEM shape mismatch: {e}")))?
            .mapv(|v| {
                if v == no_data as f32 || v == RASTER_NO_DATA as f32 {
                    f32::NAN
                } else {
                    v
                }
            });

        info!(
            "Read {}x{} DEM (EPSG:{}) from {}",
            width,
            height,
            epsg,
            path.display()
        );
        Ok(Dem {
            elevation,
            geo_transform,
            epsg,
        })
    }
}

/// EPSG code of the WGS84/UTM zone containing a (longitude, latitude) point
pub fn convert_wgs_to_utm(longitude: f64, latitude: f64) -> u32 {
    let zone = (((longitude + 180.0) / 6.0).floor() as u32 % 60) + 1;
    if latitude >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}
