//! Parallel front-end over [`LlmManager`].
//!
//! Validates a batch, distributes requests across regions, executes them
//! under the bounded worker pool, and aggregates per-access-method
//! statistics.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::distributor::RegionDistributor;
use super::executor::ParallelExecutor;
use super::response::ParallelResponse;
use crate::config::ParallelConfig;
use crate::error::LlmError;
use crate::manager::LlmManager;
use crate::request::{ConverseRequest, validate_batch};
use crate::retry::engine::ResponseValidationConfig;

/// Default number of regions assigned to each request.
pub const DEFAULT_TARGET_REGIONS_PER_REQUEST: usize = 1;

/// Executes batches of converse requests in parallel across regions.
pub struct ParallelLlmManager {
    manager: LlmManager,
    config: ParallelConfig,
    distributor: Mutex<RegionDistributor>,
}

impl ParallelLlmManager {
    pub fn new(manager: LlmManager, config: ParallelConfig) -> Result<Self, LlmError> {
        config.validate().map_err(LlmError::Configuration)?;

        if manager.regions().len() < 2 {
            warn!(
                "only one region configured; parallel processing benefits from multiple regions"
            );
        }

        let distributor = RegionDistributor::new(config.load_balancing_strategy);
        info!(
            max_concurrent = config.max_concurrent_requests,
            strategy = ?config.load_balancing_strategy,
            "initialized parallel manager"
        );
        Ok(Self {
            manager,
            config,
            distributor: Mutex::new(distributor),
        })
    }

    pub fn parallel_config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn manager(&self) -> &LlmManager {
        &self.manager
    }

    /// Execute a batch of requests in parallel.
    ///
    /// The returned response carries batch-level `success` under the
    /// configured failure-handling strategy together with every
    /// per-request response; use [`ParallelResponse::into_result`] for
    /// raising behavior.
    pub async fn converse_parallel(
        &self,
        requests: Vec<ConverseRequest>,
        target_regions_per_request: usize,
        validation: Option<&ResponseValidationConfig>,
    ) -> Result<ParallelResponse, LlmError> {
        let started = Instant::now();

        validate_batch(&requests)?;

        // Materialize ids so generated ones stay stable for the whole batch.
        let mut request_map: HashMap<String, ConverseRequest> = HashMap::new();
        let mut request_ids = Vec::with_capacity(requests.len());
        for request in requests {
            let id = request.effective_id();
            request_ids.push(id.clone());
            request_map.insert(id, request);
        }

        let assignments = {
            let mut distributor = self.distributor.lock();
            let assignments = distributor.distribute(
                &request_ids,
                self.manager.regions(),
                target_regions_per_request,
            )?;
            let mut assignments = assignments;
            distributor.optimize(&mut assignments, self.config.load_variance_threshold);
            assignments
        };

        let executor = ParallelExecutor::new(self.config.clone());
        let request_map = &request_map;
        let outcome = executor
            .execute(assignments.clone(), |assignment| async move {
                let Some(request) = request_map.get(&assignment.request_id).cloned() else {
                    return failure_placeholder(LlmError::Configuration(format!(
                        "assignment references unknown request id '{}'",
                        assignment.request_id
                    )));
                };
                match self
                    .manager
                    .converse_collecting(
                        request.args,
                        request.model_name.as_deref(),
                        Some(&assignment.assigned_regions),
                        validation,
                    )
                    .await
                {
                    Ok(response) => response,
                    Err(error) => failure_placeholder(error),
                }
            })
            .await;

        let response = ParallelResponse::aggregate(
            outcome.responses,
            &assignments,
            &self.config,
            outcome.concurrent_peak,
            started.elapsed().as_secs_f64() * 1000.0,
        );

        info!(
            total = response.stats.total_requests,
            succeeded = response.stats.successful_requests,
            failed = response.stats.failed_requests_count,
            cancelled = outcome.cancelled,
            duration_ms = response.total_duration_ms as u64,
            "parallel batch finished"
        );
        Ok(response)
    }

    /// Validate both the underlying manager and the parallel settings.
    pub async fn validate_configuration(&self) -> crate::manager::ValidationReport {
        let mut report = self.manager.validate_configuration().await;

        if self.config.max_concurrent_requests > self.manager.regions().len() * 2 {
            report.warnings.push(format!(
                "high concurrency ({}) compared to available regions ({})",
                self.config.max_concurrent_requests,
                self.manager.regions().len()
            ));
        }

        report
    }
}

/// A request that failed before reaching the retry engine (validation or
/// configuration); recorded so it still appears in the result map.
fn failure_placeholder(error: LlmError) -> crate::response::ConverseResponse {
    crate::response::ConverseResponse {
        success: false,
        output: None,
        stop_reason: None,
        usage: None,
        metrics: None,
        additional_response_fields: None,
        model_used: None,
        region_used: None,
        access_method_used: crate::access::method::AccessMethod::Unknown,
        profile_used: false,
        profile_id: None,
        attempts: vec![],
        warnings: vec![format!("request failed before dispatch: {error}")],
        features_disabled: vec![],
        validation_attempts: 0,
        total_duration_ms: 0.0,
    }
}
