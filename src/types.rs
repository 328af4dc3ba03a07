use chrono::{Datelike, NaiveDateTime};
use geo::{LineString, MultiLineString, MultiPolygon, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued reflectance data for a single spectral band
pub type BandArray = Array2<f32>;

/// No-data sentinel used in rasters written to disk
pub const RASTER_NO_DATA: f64 = -9999.0;

/// No-data sentinel for classified rasters (in memory and on disk)
pub const CLASS_NO_DATA: i16 = -9999;

/// Scale factor applied by providers that store reflectance as integers
pub const REFLECTANCE_SCALE: f32 = 10_000.0;

/// Spectral bands of a 4-band visible/near-infrared image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralBandKind {
    Blue,
    Green,
    Red,
    Nir,
}

impl SpectralBandKind {
    /// All bands in storage order (blue, green, red, NIR)
    pub const ALL: [SpectralBandKind; 4] = [
        SpectralBandKind::Blue,
        SpectralBandKind::Green,
        SpectralBandKind::Red,
        SpectralBandKind::Nir,
    ];

    pub fn index(self) -> usize {
        match self {
            SpectralBandKind::Blue => 0,
            SpectralBandKind::Green => 1,
            SpectralBandKind::Red => 2,
            SpectralBandKind::Nir => 3,
        }
    }
}

impl std::fmt::Display for SpectralBandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectralBandKind::Blue => write!(f, "blue"),
            SpectralBandKind::Green => write!(f, "green"),
            SpectralBandKind::Red => write!(f, "red"),
            SpectralBandKind::Nir => write!(f, "NIR"),
        }
    }
}

/// Surface classes produced by the per-pixel classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceClass {
    Snow,
    ShadowedSnow,
    Ice,
    RockDebris,
    Water,
}

impl SurfaceClass {
    pub fn code(self) -> i16 {
        match self {
            SurfaceClass::Snow => 1,
            SurfaceClass::ShadowedSnow => 2,
            SurfaceClass::Ice => 3,
            SurfaceClass::RockDebris => 4,
            SurfaceClass::Water => 5,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(SurfaceClass::Snow),
            2 => Some(SurfaceClass::ShadowedSnow),
            3 => Some(SurfaceClass::Ice),
            4 => Some(SurfaceClass::RockDebris),
            5 => Some(SurfaceClass::Water),
            _ => None,
        }
    }
}

/// Snow and shadowed snow both count as snow cover
pub fn is_snow_code(code: i16) -> bool {
    code == 1 || code == 2
}

/// Geospatial bounding box in projected (world) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// True when `other` lies strictly inside this box
    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        other.min_x > self.min_x
            && other.max_x < self.max_x
            && other.min_y > self.min_y
            && other.max_y < self.max_y
    }
}

/// Geospatial transformation parameters (GDAL affine convention)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_array(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    /// Map fractional pixel coordinates (col, row) on the pixel corner lattice
    /// to world coordinates.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// World coordinates of a pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Invert the affine map: world (x, y) to fractional (col, row)
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        (col, row)
    }

    /// Pixel-center x coordinates for a raster of the given width
    pub fn x_coords(&self, width: usize) -> Vec<f64> {
        (0..width)
            .map(|c| self.pixel_to_world(c as f64 + 0.5, 0.5).0)
            .collect()
    }

    /// Pixel-center y coordinates for a raster of the given height
    pub fn y_coords(&self, height: usize) -> Vec<f64> {
        (0..height)
            .map(|r| self.pixel_to_world(0.5, r as f64 + 0.5).1)
            .collect()
    }

    /// Ground resolution (|pixel_width|, |pixel_height|)
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    /// Ground area covered by one pixel
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    /// World-coordinate extent of a raster with this transform
    pub fn bounds(&self, dims: (usize, usize)) -> BoundingBox {
        let (rows, cols) = dims;
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(cols as f64, rows as f64);
        BoundingBox {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }
}

/// A 4-band (blue, green, red, NIR) reflectance image on a single grid.
///
/// No-data pixels are NaN in memory; I/O maps them to [`RASTER_NO_DATA`].
#[derive(Debug, Clone)]
pub struct SpectralImage {
    bands: [BandArray; 4],
    pub geo_transform: GeoTransform,
    pub epsg: u32,
    pub acquired: NaiveDateTime,
}

impl SpectralImage {
    /// Assemble an image, enforcing that all bands share one shape
    pub fn new(
        bands: [BandArray; 4],
        geo_transform: GeoTransform,
        epsg: u32,
        acquired: NaiveDateTime,
    ) -> SnowResult<Self> {
        let dim = bands[0].dim();
        if bands.iter().any(|b| b.dim() != dim) {
            return Err(SnowError::InvalidFormat(format!(
                "all bands must share one shape, got {:?}",
                bands.iter().map(|b| b.dim()).collect::<Vec<_>>()
            )));
        }
        Ok(Self {
            bands,
            geo_transform,
            epsg,
            acquired,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.bands[0].dim()
    }

    pub fn height(&self) -> usize {
        self.dim().0
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    pub fn band(&self, kind: SpectralBandKind) -> &BandArray {
        &self.bands[kind.index()]
    }

    pub fn band_mut(&mut self, kind: SpectralBandKind) -> &mut BandArray {
        &mut self.bands[kind.index()]
    }

    pub fn bands(&self) -> &[BandArray; 4] {
        &self.bands
    }

    pub fn bounds(&self) -> BoundingBox {
        self.geo_transform.bounds(self.dim())
    }

    pub fn acquisition_month(&self) -> u32 {
        self.acquired.date().month()
    }
}

/// Single-band integer-coded classification on the source image grid
#[derive(Debug, Clone)]
pub struct ClassifiedRaster {
    pub classes: Array2<i16>,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
}

impl ClassifiedRaster {
    pub fn dim(&self) -> (usize, usize) {
        self.classes.dim()
    }

    /// Number of pixels classified as snow or shadowed snow
    pub fn snow_pixel_count(&self) -> usize {
        self.classes.iter().filter(|&&c| is_snow_code(c)).count()
    }
}

/// Area of interest: a multi-part polygon in a projected CRS
#[derive(Debug, Clone)]
pub struct Aoi {
    pub geometry: MultiPolygon<f64>,
    pub epsg: u32,
}

impl Aoi {
    pub fn new(geometry: MultiPolygon<f64>, epsg: u32) -> Self {
        Self { geometry, epsg }
    }

    /// The AOI with interior rings (holes) discarded; used when cropping for
    /// classification so nunataks and debris islands stay inside the grid.
    pub fn exterior_only(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(
            self.geometry
                .0
                .iter()
                .map(|p| Polygon::new(p.exterior().clone(), vec![]))
                .collect(),
        )
    }

    /// Every boundary ring as a line set, for distance-to-edge filtering
    pub fn boundary(&self) -> MultiLineString<f64> {
        let mut rings: Vec<LineString<f64>> = Vec::new();
        for poly in &self.geometry {
            rings.push(poly.exterior().clone());
            rings.extend(poly.interiors().iter().cloned());
        }
        MultiLineString::new(rings)
    }
}

/// Digital elevation model: read-only reference grid with nearest-neighbor lookup
#[derive(Debug, Clone)]
pub struct Dem {
    pub elevation: Array2<f32>,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
}

impl Dem {
    pub fn dim(&self) -> (usize, usize) {
        self.elevation.dim()
    }

    /// Elevation of the cell containing (x, y); NaN outside the DEM extent
    pub fn elevation_at(&self, x: f64, y: f64) -> f32 {
        let (col, row) = self.geo_transform.world_to_pixel(x, y);
        let (rows, cols) = self.elevation.dim();
        if col < 0.0 || row < 0.0 {
            return f32::NAN;
        }
        let (r, c) = (row.floor() as usize, col.floor() as usize);
        if r >= rows || c >= cols {
            return f32::NAN;
        }
        self.elevation[[r, c]]
    }

    /// Nearest-neighbor resampling onto another raster grid
    pub fn sample_grid(&self, target: &GeoTransform, dims: (usize, usize)) -> Array2<f32> {
        let (rows, cols) = dims;
        let mut out = Array2::from_elem(dims, f32::NAN);
        for r in 0..rows {
            for c in 0..cols {
                let (x, y) = target.pixel_center(r, c);
                out[[r, c]] = self.elevation_at(x, y);
            }
        }
        out
    }
}

/// Preconditions that make a correction stage inapplicable to one image.
///
/// These are per-image, non-fatal: the stage reports the reason and the batch
/// moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Band maxima below the clipping threshold: sensor saturation suspected
    ClippedBands,
    /// Reference polygon has no overlap with the image's valid extent
    ReferenceOutsideImage,
    /// No real (non-zero, non-NaN) reflectance in the reference region
    NoValidReflectance,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ClippedBands => write!(f, "image bands appear clipped"),
            SkipReason::ReferenceOutsideImage => {
                write!(f, "reference polygon outside image coverage")
            }
            SkipReason::NoValidReflectance => {
                write!(f, "no valid reflectance in reference region")
            }
        }
    }
}

/// Result of a radiometric correction stage: either a corrected product or a
/// "not applicable" sentinel
#[derive(Debug)]
pub enum CorrectionOutcome<T> {
    Applied(T),
    Skipped(SkipReason),
}

impl<T> CorrectionOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            CorrectionOutcome::Applied(v) => Some(v),
            CorrectionOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CorrectionOutcome::Skipped(_))
    }
}

/// Error types for snow-cover processing
#[derive(Debug, thiserror::Error)]
pub enum SnowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    /// Classifier invocation failed; the image is skipped, the batch continues
    #[error("Classification error: {0}")]
    Classification(String),

    /// A required shared input (DEM, AOI, classifier artifact) is unavailable.
    /// Fatal for the pipeline run.
    #[error("Missing resource: {0}")]
    ResourceMissing(String),
}

/// Result type for snow-cover operations
pub type SnowResult<T> = Result<T, SnowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_geo_transform_round_trip() {
        let gt = GeoTransform::north_up(5000.0, 8000.0, 3.0, -3.0);
        let (x, y) = gt.pixel_to_world(10.0, 20.0);
        assert_relative_eq!(x, 5030.0);
        assert_relative_eq!(y, 7940.0);
        let (col, row) = gt.world_to_pixel(x, y);
        assert_relative_eq!(col, 10.0, epsilon = 1e-9);
        assert_relative_eq!(row, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pixel_center_and_area() {
        let gt = GeoTransform::north_up(0.0, 100.0, 10.0, -10.0);
        let (x, y) = gt.pixel_center(0, 0);
        assert_relative_eq!(x, 5.0);
        assert_relative_eq!(y, 95.0);
        assert_relative_eq!(gt.pixel_area(), 100.0);
    }

    #[test]
    fn test_bounds_orientation() {
        let gt = GeoTransform::north_up(0.0, 100.0, 10.0, -10.0);
        let bbox = gt.bounds((10, 10));
        assert_relative_eq!(bbox.min_x, 0.0);
        assert_relative_eq!(bbox.max_x, 100.0);
        assert_relative_eq!(bbox.min_y, 0.0);
        assert_relative_eq!(bbox.max_y, 100.0);
    }

    #[test]
    fn test_surface_class_codes() {
        for class in [
            SurfaceClass::Snow,
            SurfaceClass::ShadowedSnow,
            SurfaceClass::Ice,
            SurfaceClass::RockDebris,
            SurfaceClass::Water,
        ] {
            assert_eq!(SurfaceClass::from_code(class.code()), Some(class));
        }
        assert_eq!(SurfaceClass::from_code(CLASS_NO_DATA), None);
        assert!(is_snow_code(1));
        assert!(is_snow_code(2));
        assert!(!is_snow_code(3));
        assert!(!is_snow_code(CLASS_NO_DATA));
    }

    #[test]
    fn test_image_rejects_mismatched_bands() {
        let acquired = chrono::NaiveDate::from_ymd_opt(2021, 7, 1)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap();
        let gt = GeoTransform::north_up(0.0, 30.0, 3.0, -3.0);
        let bands = [
            Array2::zeros((10, 10)),
            Array2::zeros((10, 10)),
            Array2::zeros((10, 11)),
            Array2::zeros((10, 10)),
        ];
        assert!(SpectralImage::new(bands, gt, 32606, acquired).is_err());
    }

    #[test]
    fn test_dem_nearest_lookup() {
        let gt = GeoTransform::north_up(0.0, 30.0, 10.0, -10.0);
        let mut elev = Array2::zeros((3, 3));
        elev[[0, 0]] = 100.0;
        elev[[2, 2]] = 900.0;
        let dem = Dem {
            elevation: elev,
            geo_transform: gt,
            epsg: 32606,
        };
        assert_relative_eq!(dem.elevation_at(5.0, 25.0), 100.0);
        assert_relative_eq!(dem.elevation_at(25.0, 5.0), 900.0);
        assert!(dem.elevation_at(-5.0, 25.0).is_nan());
        assert!(dem.elevation_at(35.0, 25.0).is_nan());
    }
}
