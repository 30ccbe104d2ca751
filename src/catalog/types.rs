//! Type definitions for the model catalog.
//!
//! The catalog is the union of all models x regions x access methods known
//! to the manager, with metadata recording where it came from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-region access methods available for a model.
///
/// Invariant: at least one `has_*` flag is true, and each `*_id` is present
/// iff the corresponding flag is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessInfo {
    pub region: String,

    #[serde(default)]
    pub has_direct: bool,
    #[serde(default)]
    pub has_regional_profile: bool,
    #[serde(default)]
    pub has_global_profile: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regional_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_profile_id: Option<String>,
}

impl AccessInfo {
    /// Check the flag/id pairing invariant, returning a description of the
    /// first violation.
    pub fn validate(&self) -> Result<(), String> {
        if !self.has_direct && !self.has_regional_profile && !self.has_global_profile {
            return Err(format!(
                "access info for region '{}' exposes no access method",
                self.region
            ));
        }
        let pairs = [
            (self.has_direct, self.direct_model_id.is_some(), "direct"),
            (
                self.has_regional_profile,
                self.regional_profile_id.is_some(),
                "regional profile",
            ),
            (
                self.has_global_profile,
                self.global_profile_id.is_some(),
                "global profile",
            ),
        ];
        for (flag, id_present, label) in pairs {
            if flag != id_present {
                return Err(format!(
                    "access info for region '{}': {} flag and id disagree",
                    self.region, label
                ));
            }
        }
        Ok(())
    }
}

/// A catalog entry: one model with its per-region access information.
/// Immutable after catalog load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Primary key of the entry, chosen at catalog build time.
    pub canonical_name: String,

    /// Underlying service model id (e.g. `anthropic.claude-3-haiku-...`).
    /// Regional catalog variants may share the same id.
    pub model_id: String,

    /// Provider name (e.g. "Anthropic").
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,

    #[serde(default)]
    pub streaming_supported: bool,

    /// Region -> access methods. BTreeMap keeps region iteration stable.
    #[serde(default)]
    pub regions: BTreeMap<String, AccessInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
}

impl ModelEntry {
    /// Access info for a region, if the model is available there.
    pub fn access_in(&self, region: &str) -> Option<&AccessInfo> {
        self.regions.get(region)
    }
}

/// Where a loaded catalog came from, in load-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Api,
    CacheFile,
    CacheMemory,
    Bundled,
}

impl std::fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Api => "api",
            Self::CacheFile => "cache-file",
            Self::CacheMemory => "cache-memory",
            Self::Bundled => "bundled",
        };
        f.write_str(label)
    }
}

/// Catalog provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub source: CatalogSource,
    pub retrieved_at: DateTime<Utc>,
    #[serde(default)]
    pub regions_queried: Vec<String>,
    pub package_version: String,
}

/// The complete model catalog.
///
/// Invariant: keys are unique after canonicalization (enforced at build
/// time by the fetch correlator and the alias index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub models: BTreeMap<String, ModelEntry>,
    pub metadata: CatalogMetadata,
}

impl Catalog {
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn get(&self, canonical_name: &str) -> Option<&ModelEntry> {
        self.models.get(canonical_name)
    }

    /// All regions referenced by any entry, sorted and deduplicated.
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self
            .models
            .values()
            .flat_map(|m| m.regions.keys().cloned())
            .collect();
        regions.sort();
        regions.dedup();
        regions
    }
}
