//! Per-pixel surface classification.
//!
//! The classifier itself is external (a pre-trained model behind the
//! [`Classifier`] trait); this module builds its feature table from an image
//! and scatters predictions back onto the raster grid. Pixels with any
//! non-finite feature, and pixels outside the area of interest when cropping
//! is on, never reach the classifier and stay no-data.

use log::{debug, info};
use ndarray::{Array2, ArrayView1, Axis};

use crate::core::mask::{mask_raster_by_polygon, PixelInclusion};
use crate::types::{
    Aoi, ClassifiedRaster, SnowError, SnowResult, SpectralBandKind, SpectralImage, CLASS_NO_DATA,
};

/// Features the classifier can be fed, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Feature {
    Blue,
    Green,
    Red,
    Nir,
    /// Normalized-difference snow index, (red - NIR) / (red + NIR)
    Ndsi,
    /// Acquisition month, constant per image
    Month,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Blue,
        Feature::Green,
        Feature::Red,
        Feature::Nir,
        Feature::Ndsi,
        Feature::Month,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::Blue => "blue",
            Feature::Green => "green",
            Feature::Red => "red",
            Feature::Nir => "nir",
            Feature::Ndsi => "ndsi",
            Feature::Month => "month",
        }
    }
}

/// One row per candidate pixel, one column per feature
#[derive(Debug, Clone)]
pub struct FeatureTable {
    features: Vec<Feature>,
    data: Array2<f32>,
}

impl FeatureTable {
    pub fn num_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// All rows as a (rows, features) matrix
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// One feature's column, if present in this table
    pub fn column(&self, feature: Feature) -> Option<ArrayView1<'_, f32>> {
        let idx = self.features.iter().position(|&f| f == feature)?;
        Some(self.data.index_axis(Axis(1), idx))
    }
}

/// A pre-trained per-pixel model.
///
/// Implementations wrap whatever inference runtime hosts the model; they
/// must return exactly one class code per table row. Failures are reported,
/// not panicked, so a broken model skips an image instead of killing a batch.
pub trait Classifier: Send + Sync {
    fn predict(&self, table: &FeatureTable) -> anyhow::Result<Vec<i16>>;
}

/// Classification options
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClassifyParams {
    /// Restrict classification to the AOI's exterior rings
    pub crop_to_aoi: bool,
    /// Features to feed the model, in model input order
    pub features: Vec<Feature>,
}

impl Default for ClassifyParams {
    fn default() -> Self {
        Self {
            crop_to_aoi: true,
            features: Feature::ALL.to_vec(),
        }
    }
}

/// Normalized-difference snow index on the image grid
pub fn compute_ndsi(image: &SpectralImage) -> Array2<f32> {
    let red = image.band(SpectralBandKind::Red);
    let nir = image.band(SpectralBandKind::Nir);
    let mut ndsi = red - nir;
    ndsi.zip_mut_with(&(red + nir), |d, &s| *d /= s);
    ndsi
}

/// Classify one image. Returns a class raster on the image grid with
/// [`CLASS_NO_DATA`] wherever no prediction was made.
pub fn classify_image(
    image: &SpectralImage,
    aoi: Option<&Aoi>,
    classifier: &dyn Classifier,
    params: &ClassifyParams,
) -> SnowResult<ClassifiedRaster> {
    let dims = image.dim();
    let ndsi = compute_ndsi(image);
    let month = image.acquisition_month() as f32;

    let aoi_mask = match (params.crop_to_aoi, aoi) {
        (true, Some(aoi)) => Some(mask_raster_by_polygon(
            dims,
            &image.geo_transform,
            &aoi.exterior_only(),
            PixelInclusion::CenterOnly,
        )),
        _ => None,
    };

    let feature_at = |feature: Feature, idx: (usize, usize)| -> f32 {
        match feature {
            Feature::Blue => image.band(SpectralBandKind::Blue)[idx],
            Feature::Green => image.band(SpectralBandKind::Green)[idx],
            Feature::Red => image.band(SpectralBandKind::Red)[idx],
            Feature::Nir => image.band(SpectralBandKind::Nir)[idx],
            Feature::Ndsi => ndsi[idx],
            Feature::Month => month,
        }
    };

    let mut indices: Vec<(usize, usize)> = Vec::new();
    let mut rows: Vec<f32> = Vec::new();
    for r in 0..dims.0 {
        for c in 0..dims.1 {
            if let Some(mask) = &aoi_mask {
                if !mask[[r, c]] {
                    continue;
                }
            }
            let values: Vec<f32> = params
                .features
                .iter()
                .map(|&f| feature_at(f, (r, c)))
                .collect();
            if values.iter().any(|v| !v.is_finite()) {
                continue;
            }
            indices.push((r, c));
            rows.extend(values);
        }
    }
    debug!(
        "Classifying {} of {} pixels",
        indices.len(),
        dims.0 * dims.1
    );

    let mut classes = Array2::from_elem(dims, CLASS_NO_DATA);
    if !indices.is_empty() {
        let data = Array2::from_shape_vec((indices.len(), params.features.len()), rows).map_err(
            |e| SnowError::Processing(format!("feature table shape error: {e}")),
        )?;
        let table = FeatureTable {
            features: params.features.clone(),
            data,
        };
        let predictions = classifier
            .predict(&table)
            .map_err(|e| SnowError::Classification(format!("{e:#}")))?;
        if predictions.len() != indices.len() {
            return Err(SnowError::Classification(format!(
                "model returned {} predictions for {} pixels",
                predictions.len(),
                indices.len()
            )));
        }
        for (idx, code) in indices.into_iter().zip(predictions) {
            classes[idx] = code;
        }
    }

    info!(
        "Classification done: {} snow pixels",
        classes.iter().filter(|&&c| crate::types::is_snow_code(c)).count()
    );
    Ok(ClassifiedRaster {
        classes,
        geo_transform: image.geo_transform,
        epsg: image.epsg,
    })
}
