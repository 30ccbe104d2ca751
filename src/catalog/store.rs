//! Catalog construction and lifecycle.
//!
//! A catalog is built from the first available source in priority order:
//! live fetch, file cache (primary then fallback directory), in-memory
//! cache, bundled artifact. Refreshes swap the catalog atomically; cache
//! writes are best-effort.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::cache::CacheManager;
use super::types::{AccessInfo, Catalog, CatalogMetadata, CatalogSource, ModelEntry};
use crate::config::CatalogConfig;
use crate::error::LlmError;

/// Bundled fallback catalog, shipped with the crate so a cold start without
/// network access still resolves the common models.
const BUNDLED_CATALOG: &str = include_str!("../../data/bundled-catalog.json");

/// Source of live catalog data. Implemented by the Bedrock control-plane
/// client; tests substitute a scripted fetcher.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetch and correlate model listings for the given regions.
    async fn fetch(&self, regions: &[String]) -> Result<Catalog, LlmError>;
}

/// One model row from a region's foundation-model listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundationModelSummary {
    pub model_id: String,
    pub model_name: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,
    #[serde(default)]
    pub response_streaming_supported: bool,
    #[serde(default)]
    pub inference_types_supported: Vec<String>,
}

/// One inference profile row from a region's profile listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceProfileSummary {
    pub inference_profile_id: String,
    #[serde(default)]
    pub models: Vec<ProfileModelRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileModelRef {
    #[serde(default)]
    pub model_arn: String,
}

impl InferenceProfileSummary {
    /// Whether this profile routes the given model id.
    pub fn covers_model(&self, model_id: &str) -> bool {
        self.models
            .iter()
            .any(|m| m.model_arn.ends_with(&format!("/{model_id}")))
    }

    /// Global profiles carry a `global.` id prefix; everything else is a
    /// regional (geo-zoned) profile.
    pub fn is_global(&self) -> bool {
        self.inference_profile_id.starts_with("global.")
    }
}

/// Merge one region's listings into the catalog under construction.
///
/// Entries are keyed by model name; a name collision between different
/// model ids gets the model id appended to keep catalog keys unique.
pub fn merge_region(
    models: &mut BTreeMap<String, ModelEntry>,
    region: &str,
    summaries: &[FoundationModelSummary],
    profiles: &[InferenceProfileSummary],
) {
    for summary in summaries {
        let has_direct = summary
            .inference_types_supported
            .iter()
            .any(|t| t == "ON_DEMAND");

        let regional_profile = profiles
            .iter()
            .find(|p| !p.is_global() && p.covers_model(&summary.model_id));
        let global_profile = profiles
            .iter()
            .find(|p| p.is_global() && p.covers_model(&summary.model_id));

        if !has_direct && regional_profile.is_none() && global_profile.is_none() {
            // No usable access method in this region (e.g. provisioned-only).
            continue;
        }

        let access = AccessInfo {
            region: region.to_string(),
            has_direct,
            has_regional_profile: regional_profile.is_some(),
            has_global_profile: global_profile.is_some(),
            direct_model_id: has_direct.then(|| summary.model_id.clone()),
            regional_profile_id: regional_profile.map(|p| p.inference_profile_id.clone()),
            global_profile_id: global_profile.map(|p| p.inference_profile_id.clone()),
        };

        let key = canonical_key(models, summary);
        let entry = models.entry(key.clone()).or_insert_with(|| ModelEntry {
            canonical_name: key,
            model_id: summary.model_id.clone(),
            provider: summary.provider_name.clone(),
            input_modalities: summary.input_modalities.clone(),
            output_modalities: summary.output_modalities.clone(),
            streaming_supported: summary.response_streaming_supported,
            regions: BTreeMap::new(),
            documentation_url: None,
        });
        entry.regions.insert(region.to_string(), access);
    }
}

fn canonical_key(
    models: &BTreeMap<String, ModelEntry>,
    summary: &FoundationModelSummary,
) -> String {
    match models.get(&summary.model_name) {
        Some(existing) if existing.model_id != summary.model_id => {
            format!("{} ({})", summary.model_name, summary.model_id)
        }
        _ => summary.model_name.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct BundledFile {
    models: BTreeMap<String, ModelEntry>,
    #[serde(default)]
    regions_queried: Vec<String>,
}

/// Holds the current catalog and orchestrates loads and refreshes.
pub struct CatalogStore {
    config: CatalogConfig,
    cache: CacheManager,
    fetcher: Option<Arc<dyn CatalogFetcher>>,
    regions: Vec<String>,
    current: RwLock<Option<Arc<Catalog>>>,
}

impl CatalogStore {
    pub fn new(
        config: CatalogConfig,
        regions: Vec<String>,
        fetcher: Option<Arc<dyn CatalogFetcher>>,
    ) -> Result<Self, LlmError> {
        config.validate().map_err(LlmError::Configuration)?;
        Ok(Self {
            cache: CacheManager::new(&config),
            config,
            fetcher,
            regions,
            current: RwLock::new(None),
        })
    }

    /// The currently loaded catalog, if any.
    pub fn current(&self) -> Option<Arc<Catalog>> {
        self.current.read().clone()
    }

    /// Load the catalog, building it on first use. Source priority: live
    /// fetch, cache, bundled artifact.
    pub async fn load(&self) -> Result<Arc<Catalog>, LlmError> {
        if let Some(catalog) = self.current() {
            return Ok(catalog);
        }

        let catalog = self.build().await?;
        let catalog = Arc::new(catalog);
        *self.current.write() = Some(catalog.clone());
        Ok(catalog)
    }

    /// Force a live fetch and swap the catalog on success. The previous
    /// catalog stays in place when the fetch fails.
    pub async fn refresh(&self) -> Result<Arc<Catalog>, LlmError> {
        let Some(fetcher) = &self.fetcher else {
            return Err(LlmError::Configuration(
                "no catalog fetcher configured; refresh unavailable".to_string(),
            ));
        };

        let catalog = fetcher.fetch(&self.regions).await?;
        info!(
            models = catalog.model_count(),
            regions = self.regions.len(),
            "refreshed model catalog"
        );
        self.cache.save(&catalog);

        let catalog = Arc::new(catalog);
        *self.current.write() = Some(catalog.clone());
        Ok(catalog)
    }

    async fn build(&self) -> Result<Catalog, LlmError> {
        if let Some(fetcher) = &self.fetcher {
            match fetcher.fetch(&self.regions).await {
                Ok(catalog) => {
                    info!(
                        models = catalog.model_count(),
                        source = %catalog.metadata.source,
                        "built model catalog from live fetch"
                    );
                    self.cache.save(&catalog);
                    return Ok(catalog);
                }
                Err(error) => {
                    warn!(%error, "live catalog fetch failed, falling back to cache");
                }
            }
        }

        if let Some(catalog) = self.cache.load() {
            debug!(source = %catalog.metadata.source, "using cached model catalog");
            return Ok(catalog);
        }

        let bundled = Self::bundled()?;
        warn!(
            models = bundled.model_count(),
            "using bundled model catalog; data may be stale"
        );
        Ok(bundled)
    }

    /// Parse the bundled artifact.
    pub fn bundled() -> Result<Catalog, LlmError> {
        let file: BundledFile = serde_json::from_str(BUNDLED_CATALOG)
            .map_err(|e| LlmError::Catalog(format!("bundled catalog is invalid: {e}")))?;
        Ok(Catalog {
            models: file.models,
            metadata: CatalogMetadata {
                source: CatalogSource::Bundled,
                retrieved_at: Utc::now(),
                regions_queried: file.regions_queried,
                package_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheMode;

    fn summary(model_id: &str, name: &str, on_demand: bool) -> FoundationModelSummary {
        FoundationModelSummary {
            model_id: model_id.to_string(),
            model_name: name.to_string(),
            provider_name: "Anthropic".into(),
            input_modalities: vec!["TEXT".into()],
            output_modalities: vec!["TEXT".into()],
            response_streaming_supported: true,
            inference_types_supported: if on_demand {
                vec!["ON_DEMAND".into()]
            } else {
                vec!["INFERENCE_PROFILE".into()]
            },
        }
    }

    fn profile(id: &str, model_id: &str) -> InferenceProfileSummary {
        InferenceProfileSummary {
            inference_profile_id: id.to_string(),
            models: vec![ProfileModelRef {
                model_arn: format!("arn:aws:bedrock:us-east-1::foundation-model/{model_id}"),
            }],
        }
    }

    struct ScriptedFetcher {
        result: Result<Catalog, String>,
    }

    #[async_trait]
    impl CatalogFetcher for ScriptedFetcher {
        async fn fetch(&self, _regions: &[String]) -> Result<Catalog, LlmError> {
            self.result
                .clone()
                .map_err(LlmError::Catalog)
        }
    }

    fn fetched_catalog() -> Catalog {
        let mut models = BTreeMap::new();
        merge_region(
            &mut models,
            "us-east-1",
            &[summary(
                "anthropic.claude-3-haiku-20240307-v1:0",
                "Claude 3 Haiku",
                true,
            )],
            &[],
        );
        Catalog {
            models,
            metadata: CatalogMetadata {
                source: CatalogSource::Api,
                retrieved_at: Utc::now(),
                regions_queried: vec!["us-east-1".into()],
                package_version: env!("CARGO_PKG_VERSION").into(),
            },
        }
    }

    #[test]
    fn test_merge_region_direct_and_profiles() {
        let mut models = BTreeMap::new();
        merge_region(
            &mut models,
            "us-east-1",
            &[summary(
                "anthropic.claude-3-haiku-20240307-v1:0",
                "Claude 3 Haiku",
                true,
            )],
            &[
                profile(
                    "us.anthropic.claude-3-haiku-20240307-v1:0",
                    "anthropic.claude-3-haiku-20240307-v1:0",
                ),
                profile(
                    "global.anthropic.claude-3-haiku-20240307-v1:0",
                    "anthropic.claude-3-haiku-20240307-v1:0",
                ),
            ],
        );

        let entry = models.get("Claude 3 Haiku").unwrap();
        let access = entry.access_in("us-east-1").unwrap();
        assert!(access.has_direct);
        assert!(access.has_regional_profile);
        assert!(access.has_global_profile);
        assert_eq!(
            access.regional_profile_id.as_deref(),
            Some("us.anthropic.claude-3-haiku-20240307-v1:0")
        );
        assert_eq!(
            access.global_profile_id.as_deref(),
            Some("global.anthropic.claude-3-haiku-20240307-v1:0")
        );
        assert!(access.validate().is_ok());
    }

    #[test]
    fn test_merge_region_profile_only_model() {
        let mut models = BTreeMap::new();
        merge_region(
            &mut models,
            "us-east-1",
            &[summary(
                "anthropic.claude-opus-4-20250514-v1:0",
                "Claude Opus 4",
                false,
            )],
            &[profile(
                "us.anthropic.claude-opus-4-20250514-v1:0",
                "anthropic.claude-opus-4-20250514-v1:0",
            )],
        );

        let access = models
            .get("Claude Opus 4")
            .unwrap()
            .access_in("us-east-1")
            .unwrap();
        assert!(!access.has_direct);
        assert!(access.has_regional_profile);
        assert!(access.direct_model_id.is_none());
    }

    #[test]
    fn test_merge_region_skips_unreachable_model() {
        let mut models = BTreeMap::new();
        merge_region(
            &mut models,
            "us-east-1",
            &[summary("provisioned.only-v1:0", "Provisioned Only", false)],
            &[],
        );
        assert!(models.is_empty());
    }

    #[test]
    fn test_merge_multiple_regions_accumulates() {
        let mut models = BTreeMap::new();
        let model = summary(
            "anthropic.claude-3-haiku-20240307-v1:0",
            "Claude 3 Haiku",
            true,
        );
        merge_region(&mut models, "us-east-1", std::slice::from_ref(&model), &[]);
        merge_region(&mut models, "us-west-2", &[model], &[]);

        let entry = models.get("Claude 3 Haiku").unwrap();
        assert_eq!(entry.regions.len(), 2);
    }

    #[test]
    fn test_name_collision_gets_disambiguated_key() {
        let mut models = BTreeMap::new();
        merge_region(
            &mut models,
            "us-east-1",
            &[summary("vendor.model-v1:0", "Shiny Model", true)],
            &[],
        );
        merge_region(
            &mut models,
            "us-east-1",
            &[summary("vendor.model-v2:0", "Shiny Model", true)],
            &[],
        );

        assert_eq!(models.len(), 2);
        assert!(models.contains_key("Shiny Model"));
        assert!(models.contains_key("Shiny Model (vendor.model-v2:0)"));
    }

    #[tokio::test]
    async fn test_store_prefers_live_fetch() {
        let store = CatalogStore::new(
            CatalogConfig {
                cache_mode: CacheMode::None,
                ..Default::default()
            },
            vec!["us-east-1".into()],
            Some(Arc::new(ScriptedFetcher {
                result: Ok(fetched_catalog()),
            })),
        )
        .unwrap();

        let catalog = store.load().await.unwrap();
        assert_eq!(catalog.metadata.source, CatalogSource::Api);
        assert_eq!(catalog.model_count(), 1);
    }

    #[tokio::test]
    async fn test_store_falls_back_to_bundled() {
        let store = CatalogStore::new(
            CatalogConfig {
                cache_mode: CacheMode::None,
                ..Default::default()
            },
            vec!["us-east-1".into()],
            Some(Arc::new(ScriptedFetcher {
                result: Err("fetch unavailable".to_string()),
            })),
        )
        .unwrap();

        let catalog = store.load().await.unwrap();
        assert_eq!(catalog.metadata.source, CatalogSource::Bundled);
        assert!(catalog.model_count() > 0);
    }

    #[tokio::test]
    async fn test_store_memory_cache_between_loads() {
        let store = CatalogStore::new(
            CatalogConfig {
                cache_mode: CacheMode::Memory,
                ..Default::default()
            },
            vec!["us-east-1".into()],
            Some(Arc::new(ScriptedFetcher {
                result: Ok(fetched_catalog()),
            })),
        )
        .unwrap();

        let first = store.load().await.unwrap();
        let second = store.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_refresh_without_fetcher_fails() {
        let store = CatalogStore::new(
            CatalogConfig {
                cache_mode: CacheMode::None,
                ..Default::default()
            },
            vec!["us-east-1".into()],
            None,
        )
        .unwrap();

        assert!(matches!(
            store.refresh().await,
            Err(LlmError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_keeps_catalog_on_failure() {
        let store = CatalogStore::new(
            CatalogConfig {
                cache_mode: CacheMode::None,
                ..Default::default()
            },
            vec!["us-east-1".into()],
            Some(Arc::new(ScriptedFetcher {
                result: Err("down".to_string()),
            })),
        )
        .unwrap();

        // Initial load degrades to bundled.
        let before = store.load().await.unwrap();
        assert!(store.refresh().await.is_err());
        let after = store.current().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_bundled_catalog_parses() {
        let catalog = CatalogStore::bundled().unwrap();
        assert!(catalog.model_count() > 0);
        for entry in catalog.models.values() {
            for access in entry.regions.values() {
                assert!(access.validate().is_ok(), "bundled entry {} invalid", entry.canonical_name);
            }
        }
    }
}
