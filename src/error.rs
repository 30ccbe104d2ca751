//! Error taxonomy surfaced to callers.
//!
//! Local recovery (transient errors, throttling, profile requirements,
//! feature incompatibilities, cache failures) happens inside the retry engine
//! and the catalog store; everything here is what escapes upward.

use thiserror::Error;

use crate::transport::TransportError;

/// One classified failure kept for exhaustion diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptError {
    /// Canonical model name of the target that failed.
    pub model: String,
    /// Region of the target that failed.
    pub region: String,
    /// Stable label of the classified error kind (e.g. `"throttled"`).
    pub kind: String,
    /// Provider error message.
    pub message: String,
}

/// Interpretation of the collected failures, attached to
/// [`RetryExhaustedError::details`].
#[derive(Debug, Clone, Default)]
pub struct ExhaustionDetails {
    /// Models that demanded an inference profile while none was available.
    pub profile_requirements_unmet: Vec<String>,
    /// Union of parameter names rejected as unsupported.
    pub incompatible_parameters: Vec<String>,
}

/// All targets failed; carries every attempt's classified error.
#[derive(Debug, Clone, Error)]
pub struct RetryExhaustedError {
    /// Chargeable attempts made before giving up.
    pub attempts_made: u32,
    /// Classified error per failed attempt, in attempt order.
    pub last_errors: Vec<AttemptError>,
    /// Distinct canonical model names tried, in first-tried order.
    pub models_tried: Vec<String>,
    /// Distinct regions tried, in first-tried order.
    pub regions_tried: Vec<String>,
    /// Interpretation of the failure set.
    pub details: ExhaustionDetails,
}

impl std::fmt::Display for RetryExhaustedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all retry targets failed after {} attempts across {} model(s) and {} region(s)",
            self.attempts_made,
            self.models_tried.len(),
            self.regions_tried.len()
        )?;

        if !self.details.profile_requirements_unmet.is_empty() {
            write!(
                f,
                "; {} of {} models require inference profiles but none was available ({}). \
                 Refreshing the model catalog may pick up newly published profiles",
                self.details.profile_requirements_unmet.len(),
                self.models_tried.len(),
                self.details.profile_requirements_unmet.join(", ")
            )?;
        }

        if !self.details.incompatible_parameters.is_empty() {
            write!(
                f,
                "; unsupported request parameters: {}",
                self.details.incompatible_parameters.join(", ")
            )?;
        }

        Ok(())
    }
}

/// Top-level error type returned by the manager surface.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid configuration at construction time. Not recoverable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed request detected before any network call. Not recoverable.
    #[error("request validation failed: {0}")]
    RequestValidation(String),

    /// The resolver could not map the supplied model name.
    #[error("model '{name}' not found{}", format_suggestions(suggestions))]
    ModelNotFound {
        /// The name as supplied by the caller.
        name: String,
        /// Closest catalog entries, best first.
        suggestions: Vec<String>,
    },

    /// Every retry target failed.
    #[error(transparent)]
    RetryExhausted(#[from] RetryExhaustedError),

    /// A parallel batch tripped its failure-handling strategy.
    #[error("parallel execution failed: {message} (failed requests: {})", failed_request_ids.join(", "))]
    ParallelExecution {
        /// Human-readable description of the tripped strategy.
        message: String,
        /// Request ids whose responses were unsuccessful.
        failed_request_ids: Vec<String>,
    },

    /// The catalog could not be built from any source.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Transport-level failure that escaped the retry engine.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("; did you mean: {}?", suggestions.join(", "))
    }
}
