//! Firnline: snow-cover and snowline mapping from multispectral satellite
//! imagery.
//!
//! Given a time series of 4-band (blue, green, red, NIR) surface-reflectance
//! images over a glacier, a DEM and a glacier outline, the pipeline corrects
//! each image radiometrically, classifies every pixel with an external
//! pre-trained model, measures the snow-covered area and traces the snowline
//! against the DEM.
//!
//! # Example
//!
//! ```no_run
//! use firnline::core::{Classifier, FeatureTable, MemoryCache};
//! use firnline::io::{read_aoi, DemReader};
//! use firnline::pipeline::{process_batch, PipelineConfig, PipelineContext};
//!
//! struct Model;
//!
//! impl Classifier for Model {
//!     fn predict(&self, table: &FeatureTable) -> anyhow::Result<Vec<i16>> {
//!         // call into the hosted model here
//!         Ok(vec![1; table.num_rows()])
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let dem = DemReader::read("dem.tif".as_ref())?;
//!     let aoi = read_aoi("glacier.gpkg".as_ref(), dem.epsg)?;
//!     let cache = MemoryCache::new();
//!     let ctx = PipelineContext::new(&aoi, &dem, &Model, &cache, PipelineConfig::default())?;
//!     let paths = vec![std::path::PathBuf::from("20210802_210544_scene.tif")];
//!     let results = process_batch(&ctx, &paths);
//!     for (path, outcome) in results {
//!         println!("{}: {:?}", path.display(), outcome.map(|o| o.record().is_some()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

pub use pipeline::{process_batch, process_image, ImageOutcome, ImageRecord, PipelineConfig,
    PipelineContext};
pub use types::{
    Aoi, BoundingBox, ClassifiedRaster, CorrectionOutcome, Dem, GeoTransform, SkipReason,
    SnowError, SnowResult, SpectralBandKind, SpectralImage, SurfaceClass,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
