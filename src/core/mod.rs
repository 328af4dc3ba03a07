//! Core processing algorithms

pub mod cache;
pub mod classify;
pub mod contour;
pub mod filter;
pub mod hillshade;
pub mod mask;
pub mod normalize;
pub mod snowline;
pub mod stats;
pub mod sunpos;

pub use cache::{ArtifactCache, DirCache, MemoryCache, NullCache};
pub use classify::{classify_image, Classifier, ClassifyParams, Feature, FeatureTable};
pub use hillshade::{compute_hillshade, HillshadeCorrection, HillshadeCorrector, HillshadeParams};
pub use normalize::{
    derive_reference_polygons, BandGain, NormalizedImage, NormalizeParams, RadiometricNormalizer,
    ReferencePolygons, SurfaceKind,
};
pub use snowline::{
    Delineation, Snowline, SnowlineDelineator, SnowlineParams, SnowlineSegment, SnowOccupancy,
};
pub use stats::{calculate_sca, snow_elevation_stats, SnowElevationStats};
pub use sunpos::{sun_position, SunPosition};
