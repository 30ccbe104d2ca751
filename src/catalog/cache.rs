//! Catalog caching with FILE, MEMORY, and NONE modes.
//!
//! File mode tries a primary directory then a fallback directory, validates
//! structure, age, and package-version compatibility on load, and treats
//! every write as best-effort: cache failures degrade to a warning, never an
//! error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{Catalog, CatalogMetadata, CatalogSource, ModelEntry};
use crate::config::{CacheMode, CatalogConfig};

const CACHE_FILENAME: &str = "model-catalog.json";

/// Persisted cache file layout. All top-level fields are required; a file
/// missing any of them is invalid.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    package_version: String,
    models: BTreeMap<String, ModelEntry>,
    metadata: CacheFileMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFileMetadata {
    source: CatalogSource,
    retrieval_timestamp: DateTime<Utc>,
    api_regions_queried: Vec<String>,
}

/// Manages catalog caching for one configured mode.
pub struct CacheManager {
    mode: CacheMode,
    locations: Vec<PathBuf>,
    max_age_hours: f64,
    memory: Mutex<Option<Catalog>>,
}

impl CacheManager {
    pub fn new(config: &CatalogConfig) -> Self {
        let locations = if config.cache_mode == CacheMode::File {
            let primary = config
                .cache_directory
                .clone()
                .unwrap_or_else(default_cache_directory);
            let fallback = std::env::temp_dir().join("stratus");
            vec![primary.join(CACHE_FILENAME), fallback.join(CACHE_FILENAME)]
        } else {
            Vec::new()
        };

        Self {
            mode: config.cache_mode,
            locations,
            max_age_hours: config.max_age_hours,
            memory: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_locations(locations: Vec<PathBuf>, max_age_hours: f64) -> Self {
        Self {
            mode: CacheMode::File,
            locations,
            max_age_hours,
            memory: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Primary cache file path (file mode only).
    pub fn cache_file_path(&self) -> Option<&Path> {
        self.locations.first().map(PathBuf::as_path)
    }

    /// Load a valid cached catalog, if one exists.
    pub fn load(&self) -> Option<Catalog> {
        match self.mode {
            CacheMode::None => None,
            CacheMode::Memory => {
                let cached = self.memory.lock().clone();
                if let Some(catalog) = cached {
                    debug!("returning catalog from memory cache");
                    let mut catalog = catalog;
                    catalog.metadata.source = CatalogSource::CacheMemory;
                    Some(catalog)
                } else {
                    None
                }
            }
            CacheMode::File => {
                for path in &self.locations {
                    match self.load_file(path) {
                        Ok(catalog) => {
                            info!(
                                path = %path.display(),
                                models = catalog.model_count(),
                                "loaded model catalog from cache"
                            );
                            return Some(catalog);
                        }
                        Err(reason) => {
                            debug!(path = %path.display(), reason, "cache file not usable");
                        }
                    }
                }
                None
            }
        }
    }

    fn load_file(&self, path: &Path) -> Result<Catalog, String> {
        if !path.exists() {
            return Err("cache file does not exist".to_string());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let file: CacheFile = serde_json::from_str(&raw).map_err(|e| e.to_string())?;

        let age = Utc::now() - file.metadata.retrieval_timestamp;
        let max_age = Duration::seconds((self.max_age_hours * 3600.0) as i64);
        if age > max_age {
            return Err(format!(
                "cache expired (age {:.1}h)",
                age.num_seconds() as f64 / 3600.0
            ));
        }

        if !version_compatible(&file.package_version, env!("CARGO_PKG_VERSION")) {
            return Err(format!(
                "package version mismatch (cached {}, current {})",
                file.package_version,
                env!("CARGO_PKG_VERSION")
            ));
        }

        Ok(Catalog {
            models: file.models,
            metadata: CatalogMetadata {
                source: CatalogSource::CacheFile,
                retrieved_at: file.metadata.retrieval_timestamp,
                regions_queried: file.metadata.api_regions_queried,
                package_version: file.package_version,
            },
        })
    }

    /// Persist a catalog. Best-effort: failures are logged and swallowed so
    /// a retrieved catalog keeps working in memory.
    pub fn save(&self, catalog: &Catalog) {
        match self.mode {
            CacheMode::None => {}
            CacheMode::Memory => {
                *self.memory.lock() = Some(catalog.clone());
                debug!("catalog saved to memory cache");
            }
            CacheMode::File => {
                let file = CacheFile {
                    package_version: env!("CARGO_PKG_VERSION").to_string(),
                    models: catalog.models.clone(),
                    metadata: CacheFileMetadata {
                        source: catalog.metadata.source,
                        retrieval_timestamp: catalog.metadata.retrieved_at,
                        api_regions_queried: catalog.metadata.regions_queried.clone(),
                    },
                };

                let serialized = match serde_json::to_string_pretty(&file) {
                    Ok(serialized) => serialized,
                    Err(error) => {
                        warn!(%error, "failed to serialize catalog cache");
                        return;
                    }
                };

                for (i, path) in self.locations.iter().enumerate() {
                    if let Err(error) = write_cache_file(path, &serialized) {
                        warn!(path = %path.display(), %error, "failed to write catalog cache");
                        continue;
                    }
                    if i == 0 {
                        info!(path = %path.display(), "saved catalog to cache");
                    } else {
                        warn!(path = %path.display(), "catalog cache written to fallback location");
                    }
                    return;
                }

                warn!(
                    "catalog retrieved successfully but could not be written to any cache \
                     location; using retrieved data in memory"
                );
            }
        }
    }

    /// Remove cached state.
    pub fn clear(&self) {
        match self.mode {
            CacheMode::None => {}
            CacheMode::Memory => {
                *self.memory.lock() = None;
            }
            CacheMode::File => {
                if let Some(path) = self.cache_file_path()
                    && path.exists()
                    && let Err(error) = std::fs::remove_file(path)
                {
                    warn!(path = %path.display(), %error, "failed to delete cache file");
                }
            }
        }
    }
}

fn write_cache_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

fn default_cache_directory() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stratus")
}

/// Compare `major.minor` components of two semantic versions. A patch-level
/// mismatch is deliberately tolerated so patch releases reuse the cache.
fn version_compatible(cached: &str, current: &str) -> bool {
    fn major_minor(version: &str) -> Option<(u64, u64)> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    }

    match (major_minor(cached), major_minor(current)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
