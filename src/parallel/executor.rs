//! Bounded-concurrency execution of a parallel batch.
//!
//! Work items run as independent futures under a concurrency cap. A failure
//! in one request never interrupts others unless the failure-handling
//! strategy trips, in which case pending work is cancelled cooperatively:
//! in-flight requests run to completion, not-yet-started ones resolve to a
//! cancelled failure that still appears in the result map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::distributor::RequestAssignment;
use crate::access::method::AccessMethod;
use crate::config::{FailureHandlingStrategy, ParallelConfig};
use crate::response::ConverseResponse;

/// Marker placed in the warnings of a response that never ran.
pub const CANCELLED_MARKER: &str = "cancelled";

/// Raw executor output before aggregation.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub responses: HashMap<String, ConverseResponse>,
    pub concurrent_peak: usize,
    /// True when the failure-handling strategy cancelled pending work.
    pub cancelled: bool,
}

/// Runs assignments through a worker pool of
/// `max_concurrent_requests` independent futures.
pub struct ParallelExecutor {
    config: ParallelConfig,
}

impl ParallelExecutor {
    pub fn new(config: ParallelConfig) -> Self {
        Self { config }
    }

    /// Execute every assignment. `run` performs one request against its
    /// assigned regions and never panics; its only suspension points are
    /// inside the transport.
    pub async fn execute<F, Fut>(
        &self,
        assignments: Vec<RequestAssignment>,
        run: F,
    ) -> ExecutionOutcome
    where
        F: Fn(RequestAssignment) -> Fut,
        Fut: std::future::Future<Output = ConverseResponse>,
    {
        let total = assignments.len();
        let token = CancellationToken::new();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let timeout = Duration::from_secs(self.config.request_timeout_seconds);

        let run = &run;
        let in_flight = &in_flight;
        let peak = &peak;
        let mut stream = futures::stream::iter(assignments.into_iter().map(|assignment| {
            let token = token.clone();
            async move {
                let request_id = assignment.request_id.clone();

                // The stop flag is checked before picking up new work.
                if token.is_cancelled() {
                    return (request_id, cancelled_response());
                }

                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);

                let response = match tokio::time::timeout(timeout, run(assignment)).await {
                    Ok(response) => response,
                    Err(_) => timeout_response(timeout),
                };

                in_flight.fetch_sub(1, Ordering::SeqCst);
                (request_id, response)
            }
        }))
        .buffer_unordered(self.config.max_concurrent_requests.max(1));

        let mut responses = HashMap::with_capacity(total);
        let mut failed = 0usize;
        let mut cancelled = false;

        while let Some((request_id, response)) = stream.next().await {
            if !response.success {
                failed += 1;
            }
            debug!(
                request_id = request_id.as_str(),
                success = response.success,
                "parallel request completed"
            );
            responses.insert(request_id, response);

            if !cancelled && self.should_cancel(failed, total) {
                warn!(
                    failed,
                    total,
                    strategy = ?self.config.failure_handling_strategy,
                    "failure strategy tripped; cancelling pending requests"
                );
                token.cancel();
                cancelled = true;
            }
        }

        ExecutionOutcome {
            responses,
            concurrent_peak: peak.load(Ordering::SeqCst),
            cancelled,
        }
    }

    fn should_cancel(&self, failed: usize, total: usize) -> bool {
        match self.config.failure_handling_strategy {
            FailureHandlingStrategy::ContinueOnFailure => false,
            FailureHandlingStrategy::StopOnFirstFailure => failed > 0,
            FailureHandlingStrategy::StopOnThreshold => {
                total > 0 && failed as f64 / total as f64 > self.config.failure_threshold
            }
        }
    }
}

fn failure_response(warning: String) -> ConverseResponse {
    ConverseResponse {
        success: false,
        output: None,
        stop_reason: None,
        usage: None,
        metrics: None,
        additional_response_fields: None,
        model_used: None,
        region_used: None,
        access_method_used: AccessMethod::Unknown,
        profile_used: false,
        profile_id: None,
        attempts: vec![],
        warnings: vec![warning],
        features_disabled: vec![],
        validation_attempts: 0,
        total_duration_ms: 0.0,
    }
}

fn cancelled_response() -> ConverseResponse {
    failure_response(format!("{CANCELLED_MARKER}: request not started"))
}

fn timeout_response(timeout: Duration) -> ConverseResponse {
    failure_response(format!(
        "request timed out after {}s",
        timeout.as_secs()
    ))
}
