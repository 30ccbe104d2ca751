//! The manager: the public surface tying together catalog, resolver,
//! selector, trackers, retry engine, and transport.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::access::parameters::{CompatibilityStatistics, ParameterCompatibilityTracker};
use crate::access::preference::AccessPreferenceTracker;
use crate::aws::AwsCredentials;
use crate::catalog::resolver::{NameResolution, NameResolver};
use crate::catalog::store::{CatalogFetcher, CatalogStore};
use crate::catalog::types::Catalog;
use crate::config::{CatalogConfig, ClientConfig, RetryConfig};
use crate::error::LlmError;
use crate::request::{ConverseArgs, validate_args};
use crate::response::ConverseResponse;
use crate::retry::engine::{ResponseValidationConfig, RetryEngine};
use crate::retry::targets::build_retry_targets;
use crate::transport::{BedrockCatalogFetcher, BedrockConverseClient, ConverseTransport};

/// Construction options for [`LlmManager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    pub credentials: AwsCredentials,
    pub retry: RetryConfig,
    pub client: ClientConfig,
    pub catalog: CatalogConfig,
    /// Inference parameters applied when a request does not set its own.
    pub default_inference_config: Option<crate::request::InferenceConfig>,
}

/// Result of [`LlmManager::validate_configuration`].
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Number of usable (model, region) combinations.
    pub model_region_combinations: usize,
    pub auth_status: String,
}

/// Snapshot of the process-wide trackers.
#[derive(Debug, Clone)]
pub struct AccessMethodStatistics {
    pub learned_preferences: usize,
    pub learned_from_error: usize,
    pub parameter_statistics: CompatibilityStatistics,
}

/// Orchestrates converse calls with multi-region failover, access-method
/// selection, and learned preferences.
pub struct LlmManager {
    models: Vec<String>,
    regions: Vec<String>,
    options: ManagerOptions,
    store: CatalogStore,
    transport: Arc<dyn ConverseTransport>,
    /// Resolver cache, invalidated when the catalog instance changes.
    resolver: Mutex<Option<(Arc<Catalog>, Arc<NameResolver>)>>,
}

impl LlmManager {
    /// Create a manager backed by the live Bedrock transport and catalog
    /// fetcher.
    pub fn new(
        models: Vec<String>,
        regions: Vec<String>,
        options: ManagerOptions,
    ) -> Result<Self, LlmError> {
        let transport = Arc::new(BedrockConverseClient::new(
            options.credentials.clone(),
            options.client.clone(),
        ));
        let fetcher = Arc::new(BedrockCatalogFetcher::new(
            options.credentials.clone(),
            options.client.clone(),
        ));
        Self::with_transport(models, regions, options, transport, Some(fetcher))
    }

    /// Create a manager with explicit transport and catalog fetcher.
    /// This is the seam used by tests and by callers embedding their own
    /// transport.
    pub fn with_transport(
        models: Vec<String>,
        regions: Vec<String>,
        options: ManagerOptions,
        transport: Arc<dyn ConverseTransport>,
        fetcher: Option<Arc<dyn CatalogFetcher>>,
    ) -> Result<Self, LlmError> {
        if models.is_empty() {
            return Err(LlmError::Configuration(
                "no models specified".to_string(),
            ));
        }
        if regions.is_empty() {
            return Err(LlmError::Configuration(
                "no regions specified".to_string(),
            ));
        }

        let store = CatalogStore::new(options.catalog.clone(), regions.clone(), fetcher)?;

        info!(
            models = models.len(),
            regions = regions.len(),
            "initialized manager"
        );
        Ok(Self {
            models,
            regions,
            options,
            store,
            transport,
            resolver: Mutex::new(None),
        })
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn configured_models(&self) -> &[String] {
        &self.models
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.options.retry
    }

    async fn catalog_and_resolver(&self) -> Result<(Arc<Catalog>, Arc<NameResolver>), LlmError> {
        let catalog = self.store.load().await?;

        let mut cached = self.resolver.lock();
        if let Some((cached_catalog, resolver)) = cached.as_ref()
            && Arc::ptr_eq(cached_catalog, &catalog)
        {
            return Ok((catalog, resolver.clone()));
        }

        let resolver = Arc::new(NameResolver::new(
            catalog.clone(),
            self.options.catalog.max_aliases_per_model,
        ));
        *cached = Some((catalog.clone(), resolver.clone()));
        Ok((catalog, resolver))
    }

    /// Resolve a user-supplied model name, with suggestions on a miss.
    pub async fn resolve_model(&self, name: &str) -> Result<NameResolution, LlmError> {
        let (_, resolver) = self.catalog_and_resolver().await?;
        resolver
            .resolve(name, false)
            .ok_or_else(|| LlmError::ModelNotFound {
                name: name.to_string(),
                suggestions: resolver.suggestions(name, 5),
            })
    }

    /// Resolve the configured model names to canonical catalog keys,
    /// keeping the configured preference order.
    async fn resolved_models(
        &self,
        resolver: &NameResolver,
        model_override: Option<&str>,
    ) -> Result<Vec<String>, LlmError> {
        let names: Vec<&str> = match model_override {
            Some(name) => vec![name],
            None => self.models.iter().map(String::as_str).collect(),
        };

        let mut resolved = Vec::new();
        let mut misses = Vec::new();
        for name in names {
            match resolver.resolve(name, false) {
                Some(resolution) => {
                    if !resolved.contains(&resolution.canonical_name) {
                        resolved.push(resolution.canonical_name);
                    }
                }
                None => misses.push(name.to_string()),
            }
        }

        if resolved.is_empty() {
            let name = misses.first().cloned().unwrap_or_default();
            let suggestions = resolver.suggestions(&name, 5);
            return Err(LlmError::ModelNotFound { name, suggestions });
        }
        if !misses.is_empty() {
            warn!(misses = ?misses, "some configured models did not resolve");
        }

        Ok(resolved)
    }

    /// Send one converse call with retries, failover, and learned access
    /// preferences.
    pub async fn converse(&self, args: ConverseArgs) -> Result<ConverseResponse, LlmError> {
        self.converse_with_options(args, None, None, None).await
    }

    /// Full-control variant of [`LlmManager::converse`].
    pub async fn converse_with_options(
        &self,
        args: ConverseArgs,
        model_override: Option<&str>,
        region_override: Option<&[String]>,
        validation: Option<&ResponseValidationConfig>,
    ) -> Result<ConverseResponse, LlmError> {
        match self
            .converse_inner(args, model_override, region_override, validation)
            .await?
        {
            Ok(response) => Ok(response),
            Err(failure) => Err(LlmError::RetryExhausted(failure.error)),
        }
    }

    /// Like converse, but returns the diagnostic response instead of an
    /// error when every target failed. The parallel path aggregates these.
    pub(crate) async fn converse_collecting(
        &self,
        args: ConverseArgs,
        model_override: Option<&str>,
        region_override: Option<&[String]>,
        validation: Option<&ResponseValidationConfig>,
    ) -> Result<ConverseResponse, LlmError> {
        match self
            .converse_inner(args, model_override, region_override, validation)
            .await?
        {
            Ok(response) => Ok(response),
            Err(failure) => Ok(failure.response),
        }
    }

    async fn converse_inner(
        &self,
        mut args: ConverseArgs,
        model_override: Option<&str>,
        region_override: Option<&[String]>,
        validation: Option<&ResponseValidationConfig>,
    ) -> Result<Result<ConverseResponse, crate::retry::engine::EngineFailure>, LlmError> {
        validate_args(&args)?;

        if args.inference_config.is_none() {
            args.inference_config = self.options.default_inference_config.clone();
        }

        let (catalog, resolver) = self.catalog_and_resolver().await?;
        let models = self.resolved_models(&resolver, model_override).await?;
        let regions: &[String] = region_override.unwrap_or(&self.regions);

        let targets = build_retry_targets(
            &catalog,
            &models,
            regions,
            self.options.retry.retry_strategy,
        );
        if targets.is_empty() {
            return Err(LlmError::Configuration(format!(
                "no valid (model, region) combination for models {models:?} in regions {regions:?}"
            )));
        }
        debug!(targets = targets.len(), "built retry target list");

        let engine = RetryEngine::new(self.transport.as_ref(), &self.options.retry);
        Ok(engine.execute(&targets, args, validation).await)
    }

    /// Force a catalog refresh from the live source.
    pub async fn refresh_catalog(&self) -> Result<(), LlmError> {
        self.store.refresh().await?;
        *self.resolver.lock() = None;
        Ok(())
    }

    /// All canonical model names in the catalog.
    pub async fn get_available_models(&self) -> Result<Vec<String>, LlmError> {
        let catalog = self.store.load().await?;
        Ok(catalog.models.keys().cloned().collect())
    }

    /// The configured regions.
    pub fn get_available_regions(&self) -> Vec<String> {
        self.regions.clone()
    }

    /// Snapshot of the process-wide trackers.
    pub fn get_access_method_statistics(&self) -> AccessMethodStatistics {
        let (learned_preferences, learned_from_error) =
            AccessPreferenceTracker::global().statistics();
        AccessMethodStatistics {
            learned_preferences,
            learned_from_error,
            parameter_statistics: ParameterCompatibilityTracker::global().statistics(),
        }
    }

    /// Validate the configuration against the loaded catalog.
    pub async fn validate_configuration(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut combinations = 0usize;

        match self.catalog_and_resolver().await {
            Ok((catalog, resolver)) => {
                for model in &self.models {
                    match resolver.resolve(model, false) {
                        Some(resolution) => {
                            if let Some(entry) = catalog.get(&resolution.canonical_name) {
                                let usable = self
                                    .regions
                                    .iter()
                                    .filter(|region| entry.access_in(region).is_some())
                                    .count();
                                if usable == 0 {
                                    warnings.push(format!(
                                        "model '{model}' is not available in any configured region"
                                    ));
                                }
                                combinations += usable;
                            }
                        }
                        None => {
                            errors.push(format!("model '{model}' not found in catalog"));
                        }
                    }
                }
                if combinations == 0 {
                    errors.push("no valid (model, region) combinations".to_string());
                }
            }
            Err(error) => errors.push(format!("catalog unavailable: {error}")),
        }

        let auth_status = match &self.options.credentials {
            AwsCredentials::Static { .. } => "static".to_string(),
            AwsCredentials::Profile { name } => format!("profile:{name}"),
            AwsCredentials::Default => "default-chain".to_string(),
        };

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            model_region_combinations: combinations,
            auth_status,
        }
    }
}
