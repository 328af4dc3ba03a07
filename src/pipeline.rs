//! End-to-end per-image processing and batch orchestration.
//!
//! One image flows through hillshade correction, radiometric normalization,
//! classification, snow-covered-area accounting and snowline delineation.
//! Correction stages may declare an image unusable; that skips the image and
//! never aborts the batch. Images in a batch are independent and processed
//! in parallel.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use log::{info, warn};
use rayon::prelude::*;

use crate::core::cache::ArtifactCache;
use crate::core::classify::{classify_image, Classifier, ClassifyParams};
use crate::core::hillshade::{HillshadeCorrector, HillshadeParams};
use crate::core::normalize::{
    derive_reference_polygons, NormalizeParams, RadiometricNormalizer, ReferencePolygons,
    SurfaceKind,
};
use crate::core::snowline::{SnowOccupancy, Snowline, SnowlineDelineator, SnowlineParams};
use crate::core::stats::{calculate_sca, snow_elevation_stats, SnowElevationStats};
use crate::core::sunpos::SunPosition;
use crate::io::raster::{image_center_wgs84, read_image};
use crate::types::{
    Aoi, ClassifiedRaster, CorrectionOutcome, Dem, SkipReason, SnowResult, SpectralImage,
};

/// Knobs for the whole pipeline
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    /// Run the hillshade correction stage
    pub apply_hillshade_correction: bool,
    /// Run the reference-surface normalization stage
    pub apply_normalization: bool,
    pub hillshade: HillshadeParams,
    pub normalize: NormalizeParams,
    pub classify: ClassifyParams,
    pub snowline: SnowlineParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            apply_hillshade_correction: true,
            apply_normalization: true,
            hillshade: HillshadeParams::default(),
            normalize: NormalizeParams::default(),
            classify: ClassifyParams::default(),
            snowline: SnowlineParams::default(),
        }
    }
}

/// Shared inputs for a batch: everything that is constant across images
pub struct PipelineContext<'a> {
    pub aoi: &'a Aoi,
    pub dem: &'a Dem,
    pub classifier: &'a dyn Classifier,
    pub cache: &'a dyn ArtifactCache,
    pub references: ReferencePolygons,
    pub config: PipelineConfig,
}

impl<'a> PipelineContext<'a> {
    /// Derive the reference regions once, on the DEM grid, and hold them for
    /// the whole batch.
    pub fn new(
        aoi: &'a Aoi,
        dem: &'a Dem,
        classifier: &'a dyn Classifier,
        cache: &'a dyn ArtifactCache,
        config: PipelineConfig,
    ) -> SnowResult<Self> {
        let references = derive_reference_polygons(aoi, &dem.geo_transform, dem.dim(), dem)?;
        Ok(Self {
            aoi,
            dem,
            classifier,
            cache,
            references,
            config,
        })
    }
}

/// Everything the pipeline learned from one image
#[derive(Debug)]
pub struct ImageRecord {
    pub acquired: NaiveDateTime,
    /// Surface type of the bright reference region, when normalization ran
    pub surface: Option<SurfaceKind>,
    /// Per-band hillshade scalars, when the correction ran
    pub hillshade_scalars: Option<[f64; 4]>,
    /// Sun geometry, when the hillshade correction ran
    pub sun: Option<SunPosition>,
    pub classified: ClassifiedRaster,
    /// Snow-covered area in square meters
    pub sca: f64,
    pub snowline: Snowline,
    pub occupancy: SnowOccupancy,
    pub elevation_stats: SnowElevationStats,
}

/// Per-image result: a full record, or the reason the image was unusable
#[derive(Debug)]
pub enum ImageOutcome {
    Processed(Box<ImageRecord>),
    Skipped(SkipReason),
}

impl ImageOutcome {
    pub fn record(self) -> Option<Box<ImageRecord>> {
        match self {
            ImageOutcome::Processed(r) => Some(r),
            ImageOutcome::Skipped(_) => None,
        }
    }
}

/// Run one image through the full pipeline
pub fn process_image(ctx: &PipelineContext<'_>, image: &SpectralImage) -> SnowResult<ImageOutcome> {
    let acquired = image.acquired;
    info!("Processing image acquired {acquired}");

    let mut hillshade_scalars = None;
    let mut sun = None;
    let mut working = image.clone();

    if ctx.config.apply_hillshade_correction {
        let location = image_center_wgs84(image)?;
        let corrector = HillshadeCorrector::new(ctx.config.hillshade.clone());
        match corrector.correct(image, &ctx.references.top, ctx.dem, location, ctx.cache)? {
            CorrectionOutcome::Applied(correction) => {
                hillshade_scalars = Some(correction.scalars);
                sun = Some(correction.sun);
                working = correction.image;
            }
            CorrectionOutcome::Skipped(reason) => {
                info!("Skipping image {acquired}: {reason}");
                return Ok(ImageOutcome::Skipped(reason));
            }
        }
    }

    let mut surface = None;
    if ctx.config.apply_normalization {
        let normalizer = RadiometricNormalizer::new(ctx.config.normalize.clone());
        match normalizer.normalize(&working, &ctx.references)? {
            CorrectionOutcome::Applied(n) => {
                surface = Some(n.surface);
                working = n.image;
            }
            CorrectionOutcome::Skipped(reason) => {
                info!("Skipping image {acquired}: {reason}");
                return Ok(ImageOutcome::Skipped(reason));
            }
        }
    }

    let classified = classify_image(&working, Some(ctx.aoi), ctx.classifier, &ctx.config.classify)?;
    let sca = calculate_sca(&classified);

    let delineation =
        SnowlineDelineator::new(ctx.config.snowline.clone()).delineate(&classified, ctx.aoi, ctx.dem)?;
    let elevation_stats = snow_elevation_stats(ctx.dem, &classified);

    info!(
        "Image {acquired}: SCA {:.0} m2, {} snowline segment(s)",
        sca,
        delineation.snowline.segments.len()
    );
    Ok(ImageOutcome::Processed(Box::new(ImageRecord {
        acquired,
        surface,
        hillshade_scalars,
        sun,
        classified,
        sca,
        snowline: delineation.snowline,
        occupancy: delineation.occupancy,
        elevation_stats,
    })))
}

/// Process a set of image files in parallel.
///
/// Per-image failures (unreadable file, classifier breakage) are logged and
/// reported in the per-path results; the batch always runs to completion.
pub fn process_batch(
    ctx: &PipelineContext<'_>,
    paths: &[PathBuf],
) -> Vec<(PathBuf, SnowResult<ImageOutcome>)> {
    info!("Processing batch of {} images", paths.len());
    paths
        .par_iter()
        .map(|path| {
            let result = read_image(path).and_then(|image| process_image(ctx, &image));
            if let Err(e) = &result {
                warn!("Image {} failed: {e}", path.display());
            }
            (path.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::MemoryCache;
    use crate::core::classify::{Feature, FeatureTable};
    use crate::types::GeoTransform;
    use chrono::NaiveDate;
    use geo::{polygon, MultiPolygon};
    use ndarray::Array2;

    struct BlueThreshold;

    impl Classifier for BlueThreshold {
        fn predict(&self, table: &FeatureTable) -> anyhow::Result<Vec<i16>> {
            let blue = table
                .column(Feature::Blue)
                .ok_or_else(|| anyhow::anyhow!("missing blue column"))?;
            Ok(blue.iter().map(|&v| if v > 0.5 { 1 } else { 3 }).collect())
        }
    }

    fn grid() -> GeoTransform {
        GeoTransform::north_up(590000.0, 6_740_000.0, 10.0, -10.0)
    }

    fn scene() -> (Aoi, Dem) {
        let aoi = Aoi::new(
            MultiPolygon::new(vec![polygon![
                (x: 590000.0, y: 6_739_400.0),
                (x: 590600.0, y: 6_739_400.0),
                (x: 590600.0, y: 6_740_000.0),
                (x: 590000.0, y: 6_740_000.0),
                (x: 590000.0, y: 6_739_400.0),
            ]]),
            32606,
        );
        let dem = Dem {
            elevation: Array2::from_shape_fn((60, 60), |(r, _)| 1000.0 - r as f32 * 10.0),
            geo_transform: grid(),
            epsg: 32606,
        };
        (aoi, dem)
    }

    fn snow_over_ice_image() -> SpectralImage {
        let make = |bright: f32, dark: f32| {
            Array2::from_shape_fn((60, 60), |(r, _)| if r < 30 { bright } else { dark })
        };
        let acquired = NaiveDate::from_ymd_opt(2021, 8, 2)
            .unwrap()
            .and_hms_opt(21, 5, 44)
            .unwrap();
        SpectralImage::new(
            [
                make(0.9, 0.3),
                make(0.9, 0.3),
                make(0.9, 0.3),
                make(0.7, 0.2),
            ],
            grid(),
            32606,
            acquired,
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_processes_snow_over_ice_scene() {
        let (aoi, dem) = scene();
        let cache = MemoryCache::new();
        let ctx = PipelineContext::new(
            &aoi,
            &dem,
            &BlueThreshold,
            &cache,
            PipelineConfig::default(),
        )
        .unwrap();

        let outcome = process_image(&ctx, &snow_over_ice_image()).unwrap();
        let record = outcome.record().expect("image processes");

        assert_eq!(record.surface, Some(SurfaceKind::Snow));
        assert!(record.hillshade_scalars.is_some());
        // 30 snow rows of 60 pixels at 100 m2 each
        let expected_sca = 30.0 * 60.0 * 100.0;
        assert!(
            (record.sca - expected_sca).abs() / expected_sca < 0.05,
            "sca {}",
            record.sca
        );
        assert!(!record.snowline.is_empty());
        let median = record.snowline.median_elevation();
        assert!((median - 700.0).abs() < 20.0, "median elevation {median}");
    }

    #[test]
    fn test_pipeline_skips_dim_image() {
        let (aoi, dem) = scene();
        let cache = MemoryCache::new();
        let ctx = PipelineContext::new(
            &aoi,
            &dem,
            &BlueThreshold,
            &cache,
            PipelineConfig::default(),
        )
        .unwrap();

        let dim = Array2::from_elem((60, 60), 0.2f32);
        let acquired = NaiveDate::from_ymd_opt(2021, 8, 2)
            .unwrap()
            .and_hms_opt(21, 5, 44)
            .unwrap();
        let image = SpectralImage::new(
            [dim.clone(), dim.clone(), dim.clone(), dim],
            grid(),
            32606,
            acquired,
        )
        .unwrap();

        let outcome = process_image(&ctx, &image).unwrap();
        assert!(matches!(
            outcome,
            ImageOutcome::Skipped(SkipReason::ClippedBands)
        ));
    }

    #[test]
    fn test_broken_classifier_is_an_error_not_a_panic() {
        struct Broken;
        impl Classifier for Broken {
            fn predict(&self, _table: &FeatureTable) -> anyhow::Result<Vec<i16>> {
                anyhow::bail!("model artifact corrupt")
            }
        }

        let (aoi, dem) = scene();
        let cache = MemoryCache::new();
        let ctx = PipelineContext::new(&aoi, &dem, &Broken, &cache, PipelineConfig::default())
            .unwrap();
        let result = process_image(&ctx, &snow_over_ice_image());
        assert!(matches!(
            result,
            Err(crate::types::SnowError::Classification(_))
        ));
    }
}
