//! Reference-surface radiometric normalization.
//!
//! Per-band linear gains map the median reflectance of the glacier's bright
//! upper surface onto published targets for snow or ice, and the band's
//! darkest pixel onto zero. This puts every image of a series on a
//! comparable radiometric footing before classification.

use geo::MultiPolygon;
use log::{debug, info};

use crate::core::mask::{mask_raster_by_polygon, mask_to_polygons, PixelInclusion};
use crate::core::stats::{nan_max, nan_median, nan_min, nan_percentile};
use crate::types::{
    Aoi, CorrectionOutcome, Dem, GeoTransform, SkipReason, SnowResult, SpectralBandKind,
    SpectralImage,
};

/// Bright-surface reflectance targets for snow, per band (blue, green, red, NIR)
pub const SNOW_TARGET_BRIGHT: [f32; 4] = [0.94, 0.95, 0.94, 0.78];

/// Bright-surface reflectance targets for bare ice, per band
pub const ICE_TARGET_BRIGHT: [f32; 4] = [0.58, 0.59, 0.57, 0.40];

/// Dark-surface reflectance target, all bands
pub const TARGET_DARK: f32 = 0.0;

/// Thresholds separating a snow-covered upper surface from bare ice
const ICE_TOP_MEDIAN_MAX: f32 = 0.45;
const ICE_CONTRAST_MAX: f32 = 0.1;

/// Which surface type the bright reference region looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SurfaceKind {
    Snow,
    Ice,
}

impl SurfaceKind {
    pub fn bright_targets(self) -> [f32; 4] {
        match self {
            SurfaceKind::Snow => SNOW_TARGET_BRIGHT,
            SurfaceKind::Ice => ICE_TARGET_BRIGHT,
        }
    }
}

impl std::fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceKind::Snow => write!(f, "SNOW"),
            SurfaceKind::Ice => write!(f, "ICE"),
        }
    }
}

/// Bright (upper) and dark (lower) reference regions of the glacier
#[derive(Debug, Clone)]
pub struct ReferencePolygons {
    /// Highest fifth of the glacier by elevation
    pub top: MultiPolygon<f64>,
    /// Lowest fifth of the glacier by elevation
    pub bottom: MultiPolygon<f64>,
}

/// Split the AOI into its upper and lower elevation fifths on the given
/// working grid. The cut points are the 80th and 20th DEM percentiles over
/// the AOI.
pub fn derive_reference_polygons(
    aoi: &Aoi,
    grid: &GeoTransform,
    dims: (usize, usize),
    dem: &Dem,
) -> SnowResult<ReferencePolygons> {
    let aoi_mask = mask_raster_by_polygon(dims, grid, &aoi.geometry, PixelInclusion::CenterOnly);
    let elev = dem.sample_grid(grid, dims);

    let inside = || {
        elev.iter()
            .zip(aoi_mask.iter())
            .filter(|(_, &m)| m)
            .map(|(e, _)| *e)
    };
    let p80 = nan_percentile(inside(), 80.0);
    let p20 = nan_percentile(inside(), 20.0);
    if !p80.is_finite() || !p20.is_finite() {
        return Err(crate::types::SnowError::Processing(
            "no valid DEM elevations inside the AOI".into(),
        ));
    }
    debug!("Reference elevation cuts: p20 {p20} p80 {p80}");

    let select = |keep: &dyn Fn(f32) -> bool| {
        let mask = ndarray::Array2::from_shape_fn(dims, |idx| {
            aoi_mask[idx] && elev[idx].is_finite() && keep(elev[idx])
        });
        MultiPolygon::new(mask_to_polygons(&mask, grid, 0.0))
    };

    Ok(ReferencePolygons {
        top: select(&|e| e >= p80),
        bottom: select(&|e| e <= p20),
    })
}

/// One band's linear gain: `adjusted = value * scale - offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandGain {
    pub scale: f32,
    pub offset: f32,
}

impl BandGain {
    pub fn apply(self, value: f32) -> f32 {
        value * self.scale - self.offset
    }
}

/// A normalized image and the decisions behind it
#[derive(Debug)]
pub struct NormalizedImage {
    pub image: SpectralImage,
    /// Surface type inferred for the bright reference region
    pub surface: SurfaceKind,
    /// Per-band gains in storage order
    pub gains: [BandGain; 4],
}

/// Parameters for reference-surface normalization
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NormalizeParams {
    /// Reflectance ceiling each visible band must reach
    pub clip_threshold: f32,
    /// Skip images where any visible band stays below the clip threshold
    pub skip_clipped: bool,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            clip_threshold: 0.8,
            skip_clipped: true,
        }
    }
}

/// Applies reference-surface normalization to one image at a time
#[derive(Debug, Clone, Default)]
pub struct RadiometricNormalizer {
    pub params: NormalizeParams,
}

impl RadiometricNormalizer {
    pub fn new(params: NormalizeParams) -> Self {
        Self { params }
    }

    /// Normalize one image against its reference regions.
    ///
    /// Skips rather than fails when the bands look clipped, when the
    /// reference regions carry no usable reflectance, or when a band shows
    /// no bright/dark contrast at all.
    pub fn normalize(
        &self,
        image: &SpectralImage,
        refs: &ReferencePolygons,
    ) -> SnowResult<CorrectionOutcome<NormalizedImage>> {
        if self.params.skip_clipped {
            for kind in [
                SpectralBandKind::Blue,
                SpectralBandKind::Green,
                SpectralBandKind::Red,
            ] {
                let band_max = nan_max(image.band(kind).iter().copied());
                if !(band_max >= self.params.clip_threshold) {
                    debug!("Band {kind} maximum {band_max} below clip threshold, skipping");
                    return Ok(CorrectionOutcome::Skipped(SkipReason::ClippedBands));
                }
            }
        }

        let dims = image.dim();
        let gt = &image.geo_transform;
        let top_mask = mask_raster_by_polygon(dims, gt, &refs.top, PixelInclusion::CenterOnly);
        let bottom_mask =
            mask_raster_by_polygon(dims, gt, &refs.bottom, PixelInclusion::CenterOnly);
        if !top_mask.iter().any(|&m| m) || !bottom_mask.iter().any(|&m| m) {
            return Ok(CorrectionOutcome::Skipped(SkipReason::ReferenceOutsideImage));
        }

        let mut top_medians = [0.0f32; 4];
        let mut bottom_medians = [0.0f32; 4];
        for kind in SpectralBandKind::ALL {
            let band = image.band(kind);
            fn masked<'a>(
                band: &'a ndarray::Array2<f32>,
                mask: &'a ndarray::Array2<bool>,
            ) -> impl Iterator<Item = f32> + 'a {
                band.iter()
                    .zip(mask.iter())
                    .filter(|(_, &m)| m)
                    .map(|(v, _)| *v)
            }
            top_medians[kind.index()] = nan_median(masked(band, &top_mask));
            bottom_medians[kind.index()] = nan_median(masked(band, &bottom_mask));
        }
        if top_medians.iter().chain(&bottom_medians).any(|m| !m.is_finite()) {
            return Ok(CorrectionOutcome::Skipped(SkipReason::NoValidReflectance));
        }

        let top_mean = top_medians.iter().sum::<f32>() / 4.0;
        let contrast = top_medians
            .iter()
            .zip(&bottom_medians)
            .map(|(t, b)| t - b)
            .sum::<f32>()
            / 4.0;
        let surface = if top_mean < ICE_TOP_MEDIAN_MAX && contrast < ICE_CONTRAST_MAX {
            SurfaceKind::Ice
        } else {
            SurfaceKind::Snow
        };
        info!("Bright reference surface: {surface} (top median {top_mean}, contrast {contrast})");

        let targets = surface.bright_targets();
        let mut gains = [BandGain {
            scale: 1.0,
            offset: 0.0,
        }; 4];
        let mut normalized = image.clone();
        for kind in SpectralBandKind::ALL {
            let i = kind.index();
            let bright = top_medians[i];
            // the dark endpoint is the band's darkest real pixel
            let dark = nan_min(image.band(kind).iter().copied());
            let span = bright - dark;
            if !(span > 0.0) {
                return Ok(CorrectionOutcome::Skipped(SkipReason::NoValidReflectance));
            }
            let scale = (targets[i] - TARGET_DARK) / span;
            let offset = (dark * targets[i] - bright * TARGET_DARK) / span;
            gains[i] = BandGain { scale, offset };
            normalized
                .band_mut(kind)
                .mapv_inplace(|v| v * scale - offset);
            debug!("Band {kind}: scale {scale} offset {offset}");
        }

        Ok(CorrectionOutcome::Applied(NormalizedImage {
            image: normalized,
            surface,
            gains,
        }))
    }
}
