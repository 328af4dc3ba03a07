//! Snowline delineation.
//!
//! The snowline is the boundary between the snow-covered and snow-free parts
//! of the glacier. It is traced on a cleaned binary snow/no-snow raster, then
//! pruned: points hugging data gaps or the AOI boundary say more about the
//! image footprint than about snow, so they are dropped, and what remains is
//! split into segments long enough to be meaningful.

use geo::{Coord, Distance, Euclidean, Length, LineString, MultiPolygon, Point};
use log::{debug, info};
use ndarray::Array2;

use crate::core::contour::find_contours;
use crate::core::filter::{fill_holes, median_filter_binary};
use crate::core::mask::{
    largest_by_area, mask_raster_by_polygon, mask_to_polygons, PixelInclusion,
};
use crate::types::{Aoi, ClassifiedRaster, Dem, SnowResult, CLASS_NO_DATA};

/// Parameters for snowline delineation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnowlineParams {
    /// Elevation histogram bin width in meters
    pub bin_width: f32,
    /// Snow fraction above which an elevation bin counts as fully snow-covered
    pub full_snow_fraction: f64,
    /// Odd kernel size of the binary median filter
    pub median_kernel: usize,
    /// Minimum distance in meters from data gaps and the AOI boundary
    pub edge_buffer: f64,
    /// Minimum segment length in meters
    pub min_length: f64,
}

impl Default for SnowlineParams {
    fn default() -> Self {
        Self {
            bin_width: 10.0,
            full_snow_fraction: 0.75,
            median_kernel: 33,
            edge_buffer: 100.0,
            min_length: 100.0,
        }
    }
}

/// One contiguous stretch of the snowline
#[derive(Debug, Clone)]
pub struct SnowlineSegment {
    pub line: LineString<f64>,
    /// DEM elevations at the segment's vertices, parallel to the line;
    /// NaN where the DEM has no data
    pub elevations: Vec<f32>,
}

/// The delineated snowline. May legitimately be empty: a fully snow-covered
/// or fully snow-free glacier has no snowline.
#[derive(Debug, Clone, Default)]
pub struct Snowline {
    pub segments: Vec<SnowlineSegment>,
}

impl Snowline {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Combined length of all segments in meters
    pub fn total_length(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.line.length::<Euclidean>())
            .sum()
    }

    /// Median elevation over all segment vertices; NaN when empty
    pub fn median_elevation(&self) -> f32 {
        crate::core::stats::nan_median(
            self.segments.iter().flat_map(|s| s.elevations.iter().copied()),
        )
    }
}

/// Snow fraction per elevation bin
#[derive(Debug, Clone, Default)]
pub struct SnowOccupancy {
    /// Lower edge of each bin, ascending
    pub bin_starts: Vec<f32>,
    /// Snow-pixel fraction per bin; NaN for bins with no pixels
    pub fractions: Vec<f64>,
    /// Lower edge of the lowest fully snow-covered bin, when one exists
    pub full_snow_elevation: Option<f32>,
}

/// A snowline together with the occupancy histogram that shaped it
#[derive(Debug, Clone)]
pub struct Delineation {
    pub snowline: Snowline,
    pub occupancy: SnowOccupancy,
}

/// Traces snowlines on classified rasters
#[derive(Debug, Clone, Default)]
pub struct SnowlineDelineator {
    pub params: SnowlineParams,
}

impl SnowlineDelineator {
    pub fn new(params: SnowlineParams) -> Self {
        Self { params }
    }

    pub fn delineate(
        &self,
        classified: &ClassifiedRaster,
        aoi: &Aoi,
        dem: &Dem,
    ) -> SnowResult<Delineation> {
        let p = &self.params;
        let dims = classified.dim();
        let gt = &classified.geo_transform;
        let elev = dem.sample_grid(gt, dims);

        // data gaps the line must keep clear of
        let nodata_mask = classified.classes.mapv(|c| c == CLASS_NO_DATA);
        let nodata = MultiPolygon::new(mask_to_polygons(&nodata_mask, gt, 0.0));

        let aoi_mask =
            mask_raster_by_polygon(dims, gt, &aoi.geometry, PixelInclusion::CenterOnly);
        let occupancy = snow_occupancy(
            &classified.classes,
            &elev,
            &aoi_mask,
            p.bin_width,
            p.full_snow_fraction,
        );

        // snow-free mask: no-data sides with snow so gaps do not fabricate
        // boundaries of their own
        let mut binary: Array2<u8> =
            classified.classes.mapv(|c| (c != CLASS_NO_DATA && !crate::types::is_snow_code(c)) as u8);
        if let Some(full) = occupancy.full_snow_elevation {
            // above the lowest fully snow-covered bin, isolated snow-free
            // pixels are misclassifications
            binary.zip_mut_with(&elev, |b, &e| {
                if e.is_finite() && e >= full {
                    *b = 0;
                }
            });
            debug!("Forcing snow above {full} m");
        }

        let cleaned = fill_holes(&median_filter_binary(&binary, p.median_kernel));
        let contours = find_contours(&cleaned.mapv(|v| v as f32), 0.5);
        debug!("Found {} candidate contours", contours.len());

        // the main snow-free region's outline; smaller blobs are noise
        let Some(candidate) = largest_by_area(contours, |ring| ring_area(ring)) else {
            info!("No snow boundary found");
            return Ok(Delineation {
                snowline: Snowline::default(),
                occupancy,
            });
        };

        // contour samples sit on pixel centers
        let world: Vec<Coord<f64>> = candidate
            .iter()
            .map(|&(r, c)| {
                let (x, y) = gt.pixel_to_world(c + 0.5, r + 0.5);
                Coord { x, y }
            })
            .collect();

        let boundary = aoi.boundary();
        let keep = |pt: Point<f64>| {
            Euclidean::distance(&pt, &boundary) > p.edge_buffer
                && (nodata.0.is_empty() || Euclidean::distance(&pt, &nodata) > p.edge_buffer)
        };

        let mut snowline = Snowline::default();
        let mut run: Vec<Coord<f64>> = Vec::new();
        for coord in world {
            if keep(coord.into()) {
                run.push(coord);
            } else {
                self.flush_run(&mut run, dem, &mut snowline);
            }
        }
        self.flush_run(&mut run, dem, &mut snowline);

        info!(
            "Snowline: {} segments, {:.0} m total",
            snowline.segments.len(),
            snowline.total_length()
        );
        Ok(Delineation { snowline, occupancy })
    }

    fn flush_run(&self, run: &mut Vec<Coord<f64>>, dem: &Dem, snowline: &mut Snowline) {
        if run.len() < 2 {
            run.clear();
            return;
        }
        let line = LineString::from(std::mem::take(run));
        if line.length::<Euclidean>() <= self.params.min_length {
            return;
        }
        let elevations: Vec<f32> = line
            .coords()
            .map(|c| dem.elevation_at(c.x, c.y))
            .collect();
        snowline.segments.push(SnowlineSegment { line, elevations });
    }
}

/// Snow fraction per elevation bin over AOI pixels with valid DEM.
///
/// Classification gaps stay in the denominator, so a bin riddled with
/// no-data cannot look fully snow-covered. Bin edges run from the valid
/// minimum truncated to a bin multiple up to the maximum rounded to one;
/// the topmost bin is closed on both sides.
fn snow_occupancy(
    classes: &Array2<i16>,
    elev: &Array2<f32>,
    aoi_mask: &Array2<bool>,
    bin_width: f32,
    full_snow_fraction: f64,
) -> SnowOccupancy {
    let valid = || {
        classes
            .iter()
            .zip(elev.iter())
            .zip(aoi_mask.iter())
            .filter(|((_, e), &m)| m && e.is_finite())
            .map(|((c, e), _)| (c, e))
    };
    let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
    for (_, &e) in valid() {
        lo = lo.min(e);
        hi = hi.max(e);
    }
    if !lo.is_finite() || !hi.is_finite() {
        return SnowOccupancy::default();
    }

    let elev_min = (lo / bin_width).trunc() * bin_width;
    let elev_max = (hi / bin_width).round() * bin_width;
    let n = (((elev_max - elev_min) / bin_width).ceil() as usize).max(1);

    let mut snow = vec![0u64; n];
    let mut total = vec![0u64; n];
    for (&c, &e) in valid() {
        let idx = (((e - elev_min) / bin_width).floor() as isize).clamp(0, n as isize - 1) as usize;
        total[idx] += 1;
        if crate::types::is_snow_code(c) {
            snow[idx] += 1;
        }
    }

    let bin_starts: Vec<f32> = (0..n).map(|i| elev_min + i as f32 * bin_width).collect();
    let fractions: Vec<f64> = snow
        .iter()
        .zip(&total)
        .map(|(&s, &t)| if t == 0 { f64::NAN } else { s as f64 / t as f64 })
        .collect();
    let full_snow_elevation = bin_starts
        .iter()
        .zip(&fractions)
        .find(|(_, &f)| f > full_snow_fraction)
        .map(|(&start, _)| start);

    SnowOccupancy {
        bin_starts,
        fractions,
        full_snow_elevation,
    }
}

/// Unsigned shoelace area of a contour treated as a ring, in pixel units
fn ring_area(points: &[(f64, f64)]) -> f64 {
    let mut sum = 0.0;
    for i in 0..points.len() {
        let (r0, c0) = points[i];
        let (r1, c1) = points[(i + 1) % points.len()];
        sum += c0 * r1 - c1 * r0;
    }
    (sum / 2.0).abs()
}
