//! Hillshade-based radiometric correction.
//!
//! Rugged terrain shades parts of a scene; subtracting a scaled, normalized
//! hillshade flattens that illumination gradient. The scale factor is chosen
//! per band by minimizing the reflectance spread over a reference polygon
//! whose true surface is homogeneous (typically the glacier's upper
//! accumulation area).

use geo::MultiPolygon;
use log::{debug, info};
use ndarray::Array2;

use crate::core::cache::ArtifactCache;
use crate::core::mask::{mask_raster_by_polygon, PixelInclusion};
use crate::core::stats::{nan_max, nan_min, nan_std};
use crate::core::sunpos::{sun_position, SunPosition};
use crate::types::{
    CorrectionOutcome, Dem, GeoTransform, SkipReason, SnowResult, SpectralBandKind, SpectralImage,
};

/// Parameters for the hillshade correction
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HillshadeParams {
    /// Smallest candidate shade scalar
    pub scalar_min: f64,
    /// Largest candidate shade scalar
    pub scalar_max: f64,
    /// Number of evenly spaced candidate scalars
    pub scalar_steps: usize,
    /// Reflectance ceiling each visible band must reach
    pub clip_threshold: f32,
    /// Skip images where any visible band stays below the clip threshold
    pub skip_clipped: bool,
    /// Vertical exaggeration applied to the DEM gradient
    pub z_factor: f64,
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            scalar_min: 0.0,
            scalar_max: 0.5,
            scalar_steps: 21,
            clip_threshold: 0.8,
            skip_clipped: true,
            z_factor: 1.0,
        }
    }
}

/// A shade-corrected image and the choices that produced it
#[derive(Debug)]
pub struct HillshadeCorrection {
    pub image: SpectralImage,
    /// Per-band shade scalars in storage order (blue, green, red, NIR)
    pub scalars: [f64; 4],
    pub sun: SunPosition,
}

/// Applies the scaled-hillshade correction to one image at a time
#[derive(Debug, Clone, Default)]
pub struct HillshadeCorrector {
    pub params: HillshadeParams,
}

impl HillshadeCorrector {
    pub fn new(params: HillshadeParams) -> Self {
        Self { params }
    }

    /// Correct one image. `location` is the (latitude, longitude) used for
    /// the solar geometry, normally the image center in WGS84.
    ///
    /// Hillshades are cached per sun geometry on the DEM grid and resampled
    /// onto the image grid.
    pub fn correct(
        &self,
        image: &SpectralImage,
        reference: &MultiPolygon<f64>,
        dem: &Dem,
        location: (f64, f64),
        cache: &dyn ArtifactCache,
    ) -> SnowResult<CorrectionOutcome<HillshadeCorrection>> {
        let p = &self.params;

        if p.skip_clipped {
            for kind in [
                SpectralBandKind::Blue,
                SpectralBandKind::Green,
                SpectralBandKind::Red,
            ] {
                let band_max = nan_max(image.band(kind).iter().copied());
                if !(band_max >= p.clip_threshold) {
                    debug!("Band {kind} maximum {band_max} below clip threshold, skipping");
                    return Ok(CorrectionOutcome::Skipped(SkipReason::ClippedBands));
                }
            }
        }

        let sun = sun_position(image.acquired, location.0, location.1, true);
        let key = sun.cache_key();
        let shade_dem = match cache.load(&key) {
            Some(shade) if shade.dim() == dem.dim() => shade,
            _ => {
                info!(
                    "Computing hillshade for sun azimuth {} elevation {}",
                    sun.azimuth, sun.elevation
                );
                let shade = compute_hillshade(dem, sun, p.z_factor);
                cache.store(&key, &shade);
                shade
            }
        };

        let dims = image.dim();
        let shade = resample_to_grid(&shade_dem, &dem.geo_transform, &image.geo_transform, dims);
        let shade_norm = normalize_unit(&shade);

        let mask = mask_raster_by_polygon(
            dims,
            &image.geo_transform,
            reference,
            PixelInclusion::CenterOnly,
        );
        if !mask.iter().any(|&m| m) {
            return Ok(CorrectionOutcome::Skipped(SkipReason::ReferenceOutsideImage));
        }

        // the scalar search sees the shade normalized within the reference
        // polygon; the correction subtracts the globally normalized shade
        let local_lo = nan_min(
            shade
                .iter()
                .zip(mask.iter())
                .filter(|(_, &m)| m)
                .map(|(&s, _)| s),
        );
        let local_hi = nan_max(
            shade
                .iter()
                .zip(mask.iter())
                .filter(|(_, &m)| m)
                .map(|(&s, _)| s),
        );
        let local_span = local_hi - local_lo;
        let rescale_local = move |s: f32| -> f32 {
            if local_span.is_finite() && local_span > 0.0 {
                (s - local_lo) / local_span
            } else {
                0.0
            }
        };

        let candidates: Vec<f64> = (0..p.scalar_steps)
            .map(|i| {
                p.scalar_min
                    + (p.scalar_max - p.scalar_min) * i as f64 / (p.scalar_steps - 1).max(1) as f64
            })
            .collect();

        let mut corrected = image.clone();
        let mut scalars = [0.0f64; 4];
        for kind in SpectralBandKind::ALL {
            let band = image.band(kind);

            // reflectance/shade pairs inside the reference polygon
            let pairs: Vec<(f32, f32)> = band
                .iter()
                .zip(shade.iter())
                .zip(mask.iter())
                .filter(|((v, s), &m)| m && v.is_finite() && s.is_finite())
                .map(|((v, s), _)| (*v, rescale_local(*s)))
                .collect();
            if pairs.is_empty() {
                return Ok(CorrectionOutcome::Skipped(SkipReason::NoValidReflectance));
            }

            let best = candidates
                .iter()
                .map(|&s| (s, nan_std(pairs.iter().map(|&(v, h)| v - s as f32 * h))))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(s, _)| s)
                .unwrap_or(p.scalar_min);
            scalars[kind.index()] = best;

            let out = corrected.band_mut(kind);
            out.zip_mut_with(&shade_norm, |v, &s| *v -= best as f32 * s);
            debug!("Band {kind}: shade scalar {best}");
        }

        Ok(CorrectionOutcome::Applied(HillshadeCorrection {
            image: corrected,
            scalars,
            sun,
        }))
    }
}

/// Hillshade of a DEM for the given sun geometry, 0..255.
///
/// Horn gradient over a 3x3 neighborhood with edge replication; NaN cells
/// stay NaN.
pub fn compute_hillshade(dem: &Dem, sun: SunPosition, z_factor: f64) -> Array2<f32> {
    let (rows, cols) = dem.dim();
    let (res_x, res_y) = dem.geo_transform.resolution();
    let zenith = (90.0 - sun.elevation).to_radians();
    let azimuth = (360.0 - sun.azimuth + 90.0).to_radians();

    let at = |r: isize, c: isize| -> f64 {
        let r = r.clamp(0, rows as isize - 1) as usize;
        let c = c.clamp(0, cols as isize - 1) as usize;
        dem.elevation[[r, c]] as f64
    };

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        if !dem.elevation[[r, c]].is_finite() {
            return f32::NAN;
        }
        let (r, c) = (r as isize, c as isize);
        let a = at(r - 1, c - 1);
        let b = at(r - 1, c);
        let cc = at(r - 1, c + 1);
        let d = at(r, c - 1);
        let f = at(r, c + 1);
        let g = at(r + 1, c - 1);
        let h = at(r + 1, c);
        let i = at(r + 1, c + 1);

        let dzdx = ((cc + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * res_x);
        let dzdy = ((g + 2.0 * h + i) - (a + 2.0 * b + cc)) / (8.0 * res_y);
        let slope = (z_factor * (dzdx * dzdx + dzdy * dzdy).sqrt()).atan();
        let aspect = dzdy.atan2(-dzdx);

        let shade = zenith.cos() * slope.cos()
            + zenith.sin() * slope.sin() * (azimuth - aspect).cos();
        (255.0 * shade.max(0.0)) as f32
    })
}

/// Bilinear resampling of a raster onto another grid. Targets outside the
/// source extent, or touching non-finite source cells, come back NaN.
pub fn resample_to_grid(
    src: &Array2<f32>,
    src_transform: &GeoTransform,
    target: &GeoTransform,
    dims: (usize, usize),
) -> Array2<f32> {
    let (src_rows, src_cols) = src.dim();
    Array2::from_shape_fn(dims, |(r, c)| {
        let (x, y) = target.pixel_center(r, c);
        let (col, row) = src_transform.world_to_pixel(x, y);
        // center-of-cell sample coordinates
        let col = col - 0.5;
        let row = row - 0.5;
        if col < 0.0 || row < 0.0 || col > (src_cols - 1) as f64 || row > (src_rows - 1) as f64 {
            return f32::NAN;
        }
        let c0 = col.floor() as usize;
        let r0 = row.floor() as usize;
        let c1 = (c0 + 1).min(src_cols - 1);
        let r1 = (r0 + 1).min(src_rows - 1);
        let fc = (col - c0 as f64) as f32;
        let fr = (row - r0 as f64) as f32;

        let v00 = src[[r0, c0]];
        let v01 = src[[r0, c1]];
        let v10 = src[[r1, c0]];
        let v11 = src[[r1, c1]];
        v00 * (1.0 - fr) * (1.0 - fc)
            + v01 * (1.0 - fr) * fc
            + v10 * fr * (1.0 - fc)
            + v11 * fr * fc
    })
}

/// Min-max normalize to [0, 1]; a constant raster maps to all zeros
fn normalize_unit(data: &Array2<f32>) -> Array2<f32> {
    let lo = nan_min(data.iter().copied());
    let hi = nan_max(data.iter().copied());
    let span = hi - lo;
    if !span.is_finite() || span <= 0.0 {
        return Array2::zeros(data.dim());
    }
    data.mapv(|v| (v - lo) / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{MemoryCache, NullCache};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use geo::polygon;

    fn flat_dem() -> Dem {
        Dem {
            elevation: Array2::from_elem((20, 20), 500.0),
            geo_transform: GeoTransform::north_up(0.0, 600.0, 30.0, -30.0),
            epsg: 32606,
        }
    }

    fn east_ramp_dem() -> Dem {
        // rises 10 m per 30 m pixel toward the east
        Dem {
            elevation: Array2::from_shape_fn((20, 20), |(_, c)| c as f32 * 10.0),
            geo_transform: GeoTransform::north_up(0.0, 600.0, 30.0, -30.0),
            epsg: 32606,
        }
    }

    #[test]
    fn test_hillshade_flat_dem_is_uniform() {
        let sun = SunPosition {
            azimuth: 180.0,
            elevation: 40.0,
        };
        let shade = compute_hillshade(&flat_dem(), sun, 1.0);
        let expected = (255.0 * (90.0f64 - 40.0).to_radians().cos()) as f32;
        for &v in shade.iter() {
            assert_relative_eq!(v, expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_hillshade_overhead_sun_saturates_flat_ground() {
        let sun = SunPosition {
            azimuth: 0.0,
            elevation: 90.0,
        };
        let shade = compute_hillshade(&flat_dem(), sun, 1.0);
        for &v in shade.iter() {
            assert_relative_eq!(v, 255.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_hillshade_slope_facing_sun_is_brighter() {
        let dem = east_ramp_dem();
        // the ramp faces west; light from the west beats light from the east
        let from_west = compute_hillshade(
            &dem,
            SunPosition {
                azimuth: 270.0,
                elevation: 30.0,
            },
            1.0,
        );
        let from_east = compute_hillshade(
            &dem,
            SunPosition {
                azimuth: 90.0,
                elevation: 30.0,
            },
            1.0,
        );
        assert!(from_west[[10, 10]] > from_east[[10, 10]]);
    }

    #[test]
    fn test_hillshade_nan_propagates() {
        let mut dem = flat_dem();
        dem.elevation[[5, 5]] = f32::NAN;
        let shade = compute_hillshade(
            &dem,
            SunPosition {
                azimuth: 180.0,
                elevation: 45.0,
            },
            1.0,
        );
        assert!(shade[[5, 5]].is_nan());
    }

    #[test]
    fn test_resample_same_grid_is_identity() {
        let dem = east_ramp_dem();
        let out = resample_to_grid(
            &dem.elevation,
            &dem.geo_transform,
            &dem.geo_transform,
            dem.dim(),
        );
        for (a, b) in out.iter().zip(dem.elevation.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_resample_outside_is_nan() {
        let dem = flat_dem();
        let target = GeoTransform::north_up(-6000.0, 600.0, 30.0, -30.0);
        let out = resample_to_grid(&dem.elevation, &dem.geo_transform, &target, (5, 5));
        assert!(out.iter().all(|v| v.is_nan()));
    }

    fn image_with_bands(bands: [Array2<f32>; 4]) -> SpectralImage {
        let acquired = NaiveDate::from_ymd_opt(2021, 8, 2)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap();
        SpectralImage::new(
            bands,
            GeoTransform::north_up(0.0, 600.0, 30.0, -30.0),
            32606,
            acquired,
        )
        .unwrap()
    }

    fn full_reference() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 600.0, y: 0.0),
            (x: 600.0, y: 600.0),
            (x: 0.0, y: 600.0),
            (x: 0.0, y: 0.0),
        ]])
    }

    #[test]
    fn test_correct_recovers_shade_scalar() {
        let dem = east_ramp_dem();
        let acquired = NaiveDate::from_ymd_opt(2021, 8, 2)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap();
        let sun = sun_position(acquired, 61.0, -148.0, true);
        let shade = compute_hillshade(&dem, sun, 1.0);
        let shade_norm = normalize_unit(&shade);

        // flat 0.55 reflectance plus a 0.3-scaled shade imprint
        let band = |base: f32| shade_norm.mapv(|s| base + 0.3 * s);
        let image = image_with_bands([band(0.55), band(0.6), band(0.55), band(0.4)]);

        let corrector = HillshadeCorrector::default();
        let cache = MemoryCache::new();
        let outcome = corrector
            .correct(&image, &full_reference(), &dem, (61.0, -148.0), &cache)
            .unwrap();
        let result = outcome.applied().expect("correction applies");

        for s in result.scalars {
            assert_relative_eq!(s, 0.3, epsilon = 1e-9);
        }
        // shade imprint removed: band is flat again
        let corrected = result.image.band(SpectralBandKind::Green);
        let spread = nan_std(corrected.iter().copied());
        assert!(spread < 1e-4, "residual spread {spread}");
        // second call hits the hillshade cache
        assert!(cache.load(&result.sun.cache_key()).is_some());
    }

    #[test]
    fn test_correct_skips_dim_images() {
        let dem = flat_dem();
        let image = image_with_bands([
            Array2::from_elem((20, 20), 0.2),
            Array2::from_elem((20, 20), 0.2),
            Array2::from_elem((20, 20), 0.2),
            Array2::from_elem((20, 20), 0.1),
        ]);
        let corrector = HillshadeCorrector::default();
        let outcome = corrector
            .correct(&image, &full_reference(), &dem, (61.0, -148.0), &NullCache)
            .unwrap();
        assert!(matches!(
            outcome,
            CorrectionOutcome::Skipped(SkipReason::ClippedBands)
        ));
    }

    #[test]
    fn test_correct_skips_image_with_one_clipped_band() {
        let dem = flat_dem();
        // blue never reaches the threshold even though green and red do
        let image = image_with_bands([
            Array2::from_elem((20, 20), 0.5),
            Array2::from_elem((20, 20), 0.9),
            Array2::from_elem((20, 20), 0.9),
            Array2::from_elem((20, 20), 0.7),
        ]);
        let corrector = HillshadeCorrector::default();
        let outcome = corrector
            .correct(&image, &full_reference(), &dem, (61.0, -148.0), &NullCache)
            .unwrap();
        assert!(matches!(
            outcome,
            CorrectionOutcome::Skipped(SkipReason::ClippedBands)
        ));
    }

    #[test]
    fn test_correct_skips_reference_outside_image() {
        let dem = flat_dem();
        let image = image_with_bands([
            Array2::from_elem((20, 20), 0.9),
            Array2::from_elem((20, 20), 0.9),
            Array2::from_elem((20, 20), 0.9),
            Array2::from_elem((20, 20), 0.7),
        ]);
        let far_away = MultiPolygon::new(vec![polygon![
            (x: 9000.0, y: 9000.0),
            (x: 9100.0, y: 9000.0),
            (x: 9100.0, y: 9100.0),
            (x: 9000.0, y: 9100.0),
            (x: 9000.0, y: 9000.0),
        ]]);
        let corrector = HillshadeCorrector::default();
        let outcome = corrector
            .correct(&image, &far_away, &dem, (61.0, -148.0), &NullCache)
            .unwrap();
        assert!(matches!(
            outcome,
            CorrectionOutcome::Skipped(SkipReason::ReferenceOutsideImage)
        ));
    }
}
