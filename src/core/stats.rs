//! Snow-covered-area and snow-elevation statistics, plus the NaN-aware
//! reducers shared by the radiometric correction stages.

use crate::types::{is_snow_code, ClassifiedRaster, Dem};

/// Mean of the finite values; NaN when none are finite
pub fn nan_mean<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for v in values {
        if v.is_finite() {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        f32::NAN
    } else {
        (sum / count as f64) as f32
    }
}

/// Population standard deviation of the finite values; NaN when none are finite
pub fn nan_std<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    let finite: Vec<f64> = values
        .into_iter()
        .filter(|v| v.is_finite())
        .map(|v| v as f64)
        .collect();
    if finite.is_empty() {
        return f32::NAN;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let var = finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / finite.len() as f64;
    var.sqrt() as f32
}

/// Minimum of the finite values; NaN when none are finite
pub fn nan_min<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(f32::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
}

/// Maximum of the finite values; NaN when none are finite
pub fn nan_max<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(f32::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

/// Linear-interpolated percentile of the finite values (numpy convention);
/// NaN when none are finite. `p` in [0, 100].
pub fn nan_percentile<I: IntoIterator<Item = f32>>(values: I, p: f64) -> f32 {
    let mut finite: Vec<f32> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f32::NAN;
    }
    finite.sort_by(f32::total_cmp);
    let rank = p / 100.0 * (finite.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        finite[lo]
    } else {
        let frac = (rank - lo as f64) as f32;
        finite[lo] * (1.0 - frac) + finite[hi] * frac
    }
}

/// Median of the finite values; NaN when none are finite
pub fn nan_median<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    nan_percentile(values, 50.0)
}

/// Total snow-covered area in square meters: pixel area times the number of
/// pixels classified as snow or shadowed snow. No-data pixels never count.
pub fn calculate_sca(classified: &ClassifiedRaster) -> f64 {
    let pixel_area = classified.geo_transform.pixel_area();
    pixel_area * classified.snow_pixel_count() as f64
}

/// Elevation distribution of snow-covered pixels
#[derive(Debug, Clone)]
pub struct SnowElevationStats {
    /// Lowest valid DEM elevation on the classification grid
    pub min_elevation: f32,
    /// Highest valid DEM elevation on the classification grid
    pub max_elevation: f32,
    /// Elevations of all snow-classified pixels, ascending, NaN-free
    pub snow_elevations: Vec<f32>,
}

/// Elevations at snow-classified pixels together with the valid-DEM elevation
/// range of the grid (used elsewhere to build histogram bin edges).
pub fn snow_elevation_stats(dem: &Dem, classified: &ClassifiedRaster) -> SnowElevationStats {
    let grid = dem.sample_grid(&classified.geo_transform, classified.dim());

    let mut snow_elevations: Vec<f32> = grid
        .iter()
        .zip(classified.classes.iter())
        .filter(|(e, &c)| e.is_finite() && is_snow_code(c))
        .map(|(e, _)| *e)
        .collect();
    snow_elevations.sort_by(f32::total_cmp);

    SnowElevationStats {
        min_elevation: nan_min(grid.iter().copied()),
        max_elevation: nan_max(grid.iter().copied()),
        snow_elevations,
    }
}
