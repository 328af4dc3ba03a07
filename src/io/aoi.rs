//! Area-of-interest loading from vector files (GeoPackage, Shapefile,
//! GeoJSON, anything OGR reads).

use std::path::Path;

use gdal::spatial_ref::{AxisMappingStrategy, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::MultiPolygon;
use log::info;

use crate::types::{Aoi, SnowError, SnowResult};

/// Read the AOI from the first layer of a vector file, reprojected to
/// `target_epsg`. All polygon features are merged into one multi-polygon.
pub fn read_aoi(path: &Path, target_epsg: u32) -> SnowResult<Aoi> {
    let dataset = Dataset::open(path).map_err(|e| {
        SnowError::ResourceMissing(format!("AOI {}: {e}", path.display()))
    })?;
    let mut layer = dataset.layer(0)?;

    let mut target = SpatialRef::from_epsg(target_epsg)?;
    target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

    let mut polygons = Vec::new();
    for feature in layer.features() {
        let Some(geometry) = feature.geometry() else {
            continue;
        };
        let reprojected = geometry.transform_to(&target)?;
        match reprojected.to_geo()? {
            geo::Geometry::Polygon(p) => polygons.push(p),
            geo::Geometry::MultiPolygon(mp) => polygons.extend(mp),
            other => {
                return Err(SnowError::InvalidFormat(format!(
                    "AOI features must be polygons, found {other:?}"
                )))
            }
        }
    }
    if polygons.is_empty() {
        return Err(SnowError::InvalidFormat(format!(
            "no polygon features in {}",
            path.display()
        )));
    }

    info!(
        "Read AOI with {} polygon(s) from {}",
        polygons.len(),
        path.display()
    );
    Ok(Aoi::new(MultiPolygon::new(polygons), target_epsg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use std::io::Write;

    const AOI_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "EPSG:4326" } },
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-148.2, 60.4], [-148.1, 60.4],
                    [-148.1, 60.5], [-148.2, 60.5],
                    [-148.2, 60.4]
                ]]
            }
        }]
    }"#;

    #[test]
    fn test_read_aoi_geojson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aoi.geojson");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(AOI_GEOJSON.as_bytes()).unwrap();
        drop(file);

        let aoi = read_aoi(&path, 4326).unwrap();
        assert_eq!(aoi.epsg, 4326);
        assert_eq!(aoi.geometry.0.len(), 1);
        assert!(aoi.geometry.unsigned_area() > 0.0);
    }

    #[test]
    fn test_read_aoi_reprojects_to_utm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aoi.geojson");
        std::fs::write(&path, AOI_GEOJSON).unwrap();

        let aoi = read_aoi(&path, 32606).unwrap();
        // ~0.1 x 0.1 degrees near 60N is a few km on a side
        let area = aoi.geometry.unsigned_area();
        assert!(area > 1e7 && area < 1e9, "area {area}");
    }

    #[test]
    fn test_read_missing_aoi_is_resource_error() {
        let err = read_aoi(Path::new("/nonexistent/aoi.gpkg"), 32606);
        assert!(matches!(err, Err(SnowError::ResourceMissing(_))));
    }
}
