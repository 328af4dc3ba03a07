//! Cache for derived raster artifacts, keyed by a stable string.
//!
//! Hillshades are the main client: one hillshade per sun geometry serves
//! every image acquired under that geometry, and recomputing it per image is
//! the most expensive part of the correction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, warn};
use ndarray::Array2;

use crate::io::raster::{read_single_band, write_single_band};
use crate::types::GeoTransform;

/// Keyed storage for derived single-band rasters.
///
/// Implementations are shared across worker threads; a lost store under a
/// concurrent race is acceptable (last writer wins, entries for one key are
/// interchangeable).
pub trait ArtifactCache: Send + Sync {
    fn load(&self, key: &str) -> Option<Array2<f32>>;
    fn store(&self, key: &str, data: &Array2<f32>);
}

/// In-process cache, useful for tests and single-run batches
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Array2<f32>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactCache for MemoryCache {
    fn load(&self, key: &str) -> Option<Array2<f32>> {
        match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(_) => None,
        }
    }

    fn store(&self, key: &str, data: &Array2<f32>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), data.clone());
        }
    }
}

/// Directory-backed cache persisting artifacts as GeoTIFFs, so repeated runs
/// over the same acquisition series reuse them.
///
/// I/O failures are logged and treated as cache misses; the caller falls back
/// to recomputing.
#[derive(Debug)]
pub struct DirCache {
    dir: PathBuf,
    geo_transform: GeoTransform,
    epsg: u32,
}

impl DirCache {
    pub fn new(dir: PathBuf, geo_transform: GeoTransform, epsg: u32) -> Self {
        Self {
            dir,
            geo_transform,
            epsg,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.tif"))
    }
}

impl ArtifactCache for DirCache {
    fn load(&self, key: &str) -> Option<Array2<f32>> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }
        match read_single_band(&path) {
            Ok((data, _, _)) => {
                debug!("Cache hit: {}", path.display());
                Some(data)
            }
            Err(e) => {
                warn!("Failed to read cached artifact {}: {}", path.display(), e);
                None
            }
        }
    }

    fn store(&self, key: &str, data: &Array2<f32>) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Failed to create cache dir {}: {}", self.dir.display(), e);
            return;
        }
        let path = self.path_for(key);
        if let Err(e) = write_single_band(&path, data, &self.geo_transform, self.epsg) {
            warn!("Failed to store cached artifact {}: {}", path.display(), e);
        }
    }
}

/// Cache that never hits and never stores
#[derive(Debug, Default)]
pub struct NullCache;

impl ArtifactCache for NullCache {
    fn load(&self, _key: &str) -> Option<Array2<f32>> {
        None
    }

    fn store(&self, _key: &str, _data: &Array2<f32>) {}
}
