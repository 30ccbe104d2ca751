//! Aggregated results of a parallel batch.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::access::method::AccessMethod;
use crate::config::{FailureHandlingStrategy, ParallelConfig};
use crate::error::LlmError;
use crate::parallel::distributor::RequestAssignment;
use crate::response::ConverseResponse;

/// Execution statistics for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelExecutionStats {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests_count: usize,
    pub average_request_duration_ms: f64,
    pub max_request_duration_ms: f64,
    pub min_request_duration_ms: f64,
    /// Highest number of requests in flight at once.
    pub concurrent_peak: usize,
    /// Region -> number of assignments that targeted it.
    pub region_distribution: BTreeMap<String, usize>,
    /// Access method -> response count. Sums to `total_requests`.
    pub per_method_counts: BTreeMap<String, usize>,
    /// Percentage of responses that went through an inference profile.
    pub profile_usage_percentage: f64,
    /// Profile id -> request ids that used it.
    pub profile_to_requests: BTreeMap<String, Vec<String>>,
}

/// Profile usage summary derived from a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUsageDetails {
    pub requests_using_profiles: Vec<String>,
    pub profile_usage_percentage: f64,
    pub profile_to_requests: BTreeMap<String, Vec<String>>,
}

/// Aggregated result of `converse_parallel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelResponse {
    /// Batch-level success under the configured failure-handling strategy.
    pub success: bool,
    pub request_responses: HashMap<String, ConverseResponse>,
    pub total_duration_ms: f64,
    pub stats: ParallelExecutionStats,
    pub failed_request_ids: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParallelResponse {
    /// Build the aggregate from per-request responses.
    pub fn aggregate(
        responses: HashMap<String, ConverseResponse>,
        assignments: &[RequestAssignment],
        config: &ParallelConfig,
        concurrent_peak: usize,
        total_duration_ms: f64,
    ) -> Self {
        let mut failed_request_ids: Vec<String> = responses
            .iter()
            .filter(|(_, response)| !response.success)
            .map(|(id, _)| id.clone())
            .collect();
        failed_request_ids.sort();

        let successful = responses.len() - failed_request_ids.len();
        let success = match config.failure_handling_strategy {
            FailureHandlingStrategy::ContinueOnFailure => successful > 0,
            FailureHandlingStrategy::StopOnFirstFailure => failed_request_ids.is_empty(),
            FailureHandlingStrategy::StopOnThreshold => {
                let rate = if responses.is_empty() {
                    0.0
                } else {
                    failed_request_ids.len() as f64 / responses.len() as f64
                };
                rate <= config.failure_threshold
            }
        };

        let durations: Vec<f64> = responses
            .values()
            .filter(|r| r.success)
            .map(|r| r.total_duration_ms)
            .collect();
        let (average, max, min) = if durations.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                durations.iter().sum::<f64>() / durations.len() as f64,
                durations.iter().cloned().fold(f64::MIN, f64::max),
                durations.iter().cloned().fold(f64::MAX, f64::min),
            )
        };

        let mut region_distribution = BTreeMap::new();
        for assignment in assignments {
            for region in &assignment.assigned_regions {
                *region_distribution.entry(region.clone()).or_insert(0) += 1;
            }
        }

        let mut per_method_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut profile_to_requests: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut profile_users = 0usize;
        for (id, response) in &responses {
            *per_method_counts
                .entry(response.access_method_used.as_str().to_string())
                .or_insert(0) += 1;
            if response.profile_used {
                profile_users += 1;
                if let Some(profile_id) = &response.profile_id {
                    profile_to_requests
                        .entry(profile_id.clone())
                        .or_default()
                        .push(id.clone());
                }
            }
        }
        for ids in profile_to_requests.values_mut() {
            ids.sort();
        }
        let profile_usage_percentage = if responses.is_empty() {
            0.0
        } else {
            profile_users as f64 / responses.len() as f64 * 100.0
        };

        let mut warnings: Vec<String> = Vec::new();
        for response in responses.values() {
            warnings.extend(response.warnings.iter().cloned());
        }

        Self {
            success,
            stats: ParallelExecutionStats {
                total_requests: responses.len(),
                successful_requests: successful,
                failed_requests_count: failed_request_ids.len(),
                average_request_duration_ms: average,
                max_request_duration_ms: max,
                min_request_duration_ms: min,
                concurrent_peak,
                region_distribution,
                per_method_counts,
                profile_usage_percentage,
                profile_to_requests,
            },
            request_responses: responses,
            total_duration_ms,
            failed_request_ids,
            warnings,
        }
    }

    /// Request ids whose response used the given access method, sorted.
    pub fn get_requests_by_access_method(&self, method: AccessMethod) -> Vec<String> {
        let mut ids: Vec<String> = self
            .request_responses
            .iter()
            .filter(|(_, response)| response.access_method_used == method)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Profile usage breakdown for the batch.
    pub fn get_profile_usage_details(&self) -> ProfileUsageDetails {
        let mut requests_using_profiles: Vec<String> = self
            .request_responses
            .iter()
            .filter(|(_, response)| response.profile_used)
            .map(|(id, _)| id.clone())
            .collect();
        requests_using_profiles.sort();

        ProfileUsageDetails {
            requests_using_profiles,
            profile_usage_percentage: self.stats.profile_usage_percentage,
            profile_to_requests: self.stats.profile_to_requests.clone(),
        }
    }

    /// Success rate over all requests, 0-100.
    pub fn success_rate(&self) -> f64 {
        if self.request_responses.is_empty() {
            return 0.0;
        }
        self.stats.successful_requests as f64 / self.request_responses.len() as f64 * 100.0
    }

    /// Convert a strategy-tripped batch into an error for callers that want
    /// raising behavior; partial results stay available in the `Ok` case.
    pub fn into_result(self) -> Result<ParallelResponse, LlmError> {
        if self.success {
            Ok(self)
        } else {
            Err(LlmError::ParallelExecution {
                message: format!(
                    "{} of {} requests failed",
                    self.failed_request_ids.len(),
                    self.request_responses.len()
                ),
                failed_request_ids: self.failed_request_ids,
            })
        }
    }
}
