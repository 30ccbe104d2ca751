//! The retry and failover engine.
//!
//! Drives an ordered target list through select -> dispatch -> classify,
//! recovering locally from transient errors, throttling, profile
//! requirements, feature incompatibilities, and incompatible parameters.
//!
//! The engine makes passes over the target list: targets that failed with a
//! non-recoverable kind leave the rotation, while throttled or transient
//! targets stay in it for later passes. The total chargeable attempt budget
//! is `max_retries + 1` (the initial attempt plus the configured retries).
//! A profile retry redispatches inside the current attempt and consumes
//! nothing from the budget.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::classifier::{ErrorKind, classify};
use super::targets::RetryTarget;
use crate::access::method::AccessMethod;
use crate::access::parameters::ParameterCompatibilityTracker;
use crate::access::preference::AccessPreferenceTracker;
use crate::access::selector::select;
use crate::config::RetryConfig;
use crate::error::{AttemptError, ExhaustionDetails, RetryExhaustedError};
use crate::request::{CompatibilityFeature, ConverseArgs};
use crate::response::{AttemptRecord, ConverseResponse, WireConverseResponse};
use crate::transport::{ConverseTransport, TransportError};

/// Response validation hook: a predicate retried like a failed call when it
/// rejects an otherwise-successful response.
#[derive(Clone)]
pub struct ResponseValidationConfig {
    /// Maximum validation rejections tolerated per call.
    pub max_attempts: u32,
    pub validator: Arc<dyn Fn(&WireConverseResponse) -> bool + Send + Sync>,
}

impl ResponseValidationConfig {
    pub fn new(validator: impl Fn(&WireConverseResponse) -> bool + Send + Sync + 'static) -> Self {
        Self {
            max_attempts: 3,
            validator: Arc::new(validator),
        }
    }
}

impl std::fmt::Debug for ResponseValidationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseValidationConfig")
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Exhaustion outcome: the typed error plus a diagnostic response carrying
/// the full attempt trail for callers that aggregate failures.
#[derive(Debug)]
pub struct EngineFailure {
    pub error: RetryExhaustedError,
    pub response: ConverseResponse,
}

/// Executes one converse call against an ordered target list.
pub struct RetryEngine<'a> {
    transport: &'a dyn ConverseTransport,
    config: &'a RetryConfig,
    preferences: &'static AccessPreferenceTracker,
    parameters: &'static ParameterCompatibilityTracker,
}

struct CallState {
    attempts: Vec<AttemptRecord>,
    last_errors: Vec<AttemptError>,
    warnings: Vec<String>,
    features_disabled: Vec<String>,
    models_tried: Vec<String>,
    regions_tried: Vec<String>,
    profile_unmet: Vec<String>,
    incompatible_parameters: BTreeSet<String>,
    validation_attempts: u32,
    budget_used: u32,
}

impl CallState {
    fn new() -> Self {
        Self {
            attempts: Vec::new(),
            last_errors: Vec::new(),
            warnings: Vec::new(),
            features_disabled: Vec::new(),
            models_tried: Vec::new(),
            regions_tried: Vec::new(),
            profile_unmet: Vec::new(),
            incompatible_parameters: BTreeSet::new(),
            validation_attempts: 0,
            budget_used: 0,
        }
    }

    fn note_target(&mut self, target: &RetryTarget) {
        if !self.models_tried.contains(&target.model_name) {
            self.models_tried.push(target.model_name.clone());
        }
        if !self.regions_tried.contains(&target.region) {
            self.regions_tried.push(target.region.clone());
        }
    }

    fn record_error(&mut self, target: &RetryTarget, kind: &ErrorKind, message: &str) {
        self.last_errors.push(AttemptError {
            model: target.model_name.clone(),
            region: target.region.clone(),
            kind: kind.label().to_string(),
            message: message.to_string(),
        });
    }
}

/// What to do with the target after one attempt resolved.
enum TargetOutcome {
    Success(Box<ConverseResponse>),
    /// Keep the target in the rotation (throttled / transient).
    KeepTarget { throttled: bool },
    /// Retry the same target right away (feature fallback, validation).
    RetrySameTarget,
    /// Remove the target from the rotation.
    DropTarget,
}

impl<'a> RetryEngine<'a> {
    pub fn new(transport: &'a dyn ConverseTransport, config: &'a RetryConfig) -> Self {
        Self {
            transport,
            config,
            preferences: AccessPreferenceTracker::global(),
            parameters: ParameterCompatibilityTracker::global(),
        }
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }

    /// Run the call. `args` is owned because feature fallback and parameter
    /// stripping mutate it.
    pub async fn execute(
        &self,
        targets: &[RetryTarget],
        mut args: ConverseArgs,
        validation: Option<&ResponseValidationConfig>,
    ) -> Result<ConverseResponse, EngineFailure> {
        let started = Instant::now();
        let mut state = CallState::new();
        let mut live: Vec<bool> = vec![true; targets.len()];

        'passes: while live.iter().any(|alive| *alive) {
            let mut dispatched_this_pass = false;

            for (index, target) in targets.iter().enumerate() {
                if !live[index] {
                    continue;
                }
                if state.budget_used >= self.max_attempts() {
                    break 'passes;
                }

                state.note_target(target);
                dispatched_this_pass = true;

                let outcome = self
                    .try_target(target, &mut args, validation, &mut state)
                    .await;

                match outcome {
                    TargetOutcome::Success(response) => {
                        let mut response = *response;
                        response.total_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                        response.warnings = state.warnings.clone();
                        response.features_disabled = state.features_disabled.clone();
                        response.validation_attempts = state.validation_attempts;
                        response.attempts = state.attempts.clone();
                        return Ok(response);
                    }
                    TargetOutcome::KeepTarget { throttled } => {
                        self.backoff_if_more_work(&state, &live, index, throttled)
                            .await;
                    }
                    TargetOutcome::RetrySameTarget => {
                        // Re-enter the same target immediately; handled by
                        // try_target's own loop, so reaching here means the
                        // retry budget intervened.
                    }
                    TargetOutcome::DropTarget => {
                        live[index] = false;
                    }
                }
            }

            if !dispatched_this_pass {
                break;
            }
        }

        let details = ExhaustionDetails {
            profile_requirements_unmet: state.profile_unmet.clone(),
            incompatible_parameters: state.incompatible_parameters.iter().cloned().collect(),
        };
        let error = RetryExhaustedError {
            attempts_made: state.attempts.len() as u32,
            last_errors: state.last_errors.clone(),
            models_tried: state.models_tried.clone(),
            regions_tried: state.regions_tried.clone(),
            details,
        };
        warn!(
            attempts = state.attempts.len(),
            models = state.models_tried.len(),
            regions = state.regions_tried.len(),
            "converse call exhausted all targets"
        );

        let response = ConverseResponse {
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
            attempts: state.attempts,
            warnings: state.warnings,
            features_disabled: state.features_disabled,
            validation_attempts: state.validation_attempts,
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        Err(EngineFailure { error, response })
    }

    /// Dispatch against one target, looping locally for feature fallback
    /// and validation retries. Profile retries happen inside a single
    /// attempt record.
    async fn try_target(
        &self,
        target: &RetryTarget,
        args: &mut ConverseArgs,
        validation: Option<&ResponseValidationConfig>,
        state: &mut CallState,
    ) -> TargetOutcome {
        loop {
            if state.budget_used >= self.max_attempts() {
                return TargetOutcome::RetrySameTarget;
            }

            let preference = self
                .preferences
                .get_preference(&target.model_id, &target.region);
            let Some((mut send_id, mut method)) = select(&target.access, preference.as_ref())
            else {
                state.record_error(
                    target,
                    &ErrorKind::Fatal,
                    "no access method available for target",
                );
                return TargetOutcome::DropTarget;
            };

            state.budget_used += 1;
            let mut record = AttemptRecord::open(
                &target.model_name,
                &target.region,
                method,
                state.attempts.len() as u32 + 1,
            );

            // Known-incompatible parameters are omitted from the wire for
            // this target instead of provoking a certain failure.
            let (wire, params_sent) = self.effective_wire(target, args, state);

            // Inner dispatch loop: a profile-required error substitutes the
            // profile id and redispatches without a new attempt record.
            let mut profile_retried = false;
            let result = loop {
                debug!(
                    model = target.model_name.as_str(),
                    region = target.region.as_str(),
                    send_id = send_id.as_str(),
                    method = %method,
                    attempt = record.attempt_number,
                    "dispatching attempt"
                );
                match self.transport.converse(&target.region, &send_id, &wire).await {
                    Ok(response) => break Ok(response),
                    Err(error) => {
                        let kind = classify(&error);
                        if let ErrorKind::ProfileRequired { .. } = &kind
                            && !profile_retried
                        {
                            profile_retried = true;
                            if target.access.has_regional_profile {
                                send_id = target
                                    .access
                                    .regional_profile_id
                                    .clone()
                                    .unwrap_or(send_id);
                                method = AccessMethod::RegionalCris;
                                self.preferences.record_profile_requirement(
                                    &target.model_id,
                                    &target.region,
                                    false,
                                );
                                info!(
                                    model = target.model_name.as_str(),
                                    region = target.region.as_str(),
                                    profile = send_id.as_str(),
                                    "retrying immediately with regional inference profile"
                                );
                                continue;
                            }
                            if target.access.has_global_profile {
                                send_id =
                                    target.access.global_profile_id.clone().unwrap_or(send_id);
                                method = AccessMethod::GlobalCris;
                                self.preferences.record_profile_requirement(
                                    &target.model_id,
                                    &target.region,
                                    true,
                                );
                                info!(
                                    model = target.model_name.as_str(),
                                    region = target.region.as_str(),
                                    profile = send_id.as_str(),
                                    "retrying immediately with global inference profile"
                                );
                                continue;
                            }
                            state.profile_unmet.push(target.model_name.clone());
                            state.warnings.push(format!(
                                "model '{}' requires an inference profile in {} but the \
                                 catalog lists none",
                                target.model_name, target.region
                            ));
                        }
                        break Err((error, kind));
                    }
                }
            };

            match result {
                Ok(response) => {
                    if let Some(validation) = validation
                        && !(validation.validator)(&response)
                    {
                        state.validation_attempts += 1;
                        record.close_failure("response validation failed");
                        state.attempts.push(record);
                        state.record_error(
                            target,
                            &ErrorKind::Validation,
                            "response validation failed",
                        );
                        if state.validation_attempts < validation.max_attempts {
                            continue;
                        }
                        return TargetOutcome::DropTarget;
                    }

                    record.close_success(method);
                    state.attempts.push(record);
                    // A success after an in-attempt profile retry keeps the
                    // error-learned preference written when the retry was
                    // triggered; a plain success records the method that
                    // worked.
                    if !profile_retried {
                        self.preferences
                            .record_success(&target.model_id, &target.region, method);
                    }
                    if let Some(params) = &params_sent {
                        self.parameters
                            .record_success(&target.model_id, &target.region, params);
                    }

                    return TargetOutcome::Success(Box::new(ConverseResponse {
                        success: true,
                        output: Some(response.output.message),
                        stop_reason: response.stop_reason,
                        usage: response.usage,
                        metrics: response.metrics,
                        additional_response_fields: response.additional_model_response_fields,
                        model_used: Some(target.model_name.clone()),
                        region_used: Some(target.region.clone()),
                        access_method_used: method,
                        profile_used: method.is_profile(),
                        profile_id: method.is_profile().then(|| send_id.clone()),
                        attempts: Vec::new(),
                        warnings: Vec::new(),
                        features_disabled: Vec::new(),
                        validation_attempts: 0,
                        total_duration_ms: 0.0,
                    }));
                }
                Err((error, kind)) => {
                    record.close_failure(error.to_string());
                    state.attempts.push(record);
                    state.record_error(target, &kind, &error.message);

                    match kind {
                        ErrorKind::Throttled => {
                            return TargetOutcome::KeepTarget { throttled: true };
                        }
                        ErrorKind::RetryableTransient => {
                            return TargetOutcome::KeepTarget { throttled: false };
                        }
                        ErrorKind::FeatureIncompatible(feature)
                        | ErrorKind::ContentIncompatible(feature) => {
                            if self.config.enable_feature_fallback && args.has_feature(feature) {
                                args.disable_feature(feature);
                                state.features_disabled.push(feature.as_str().to_string());
                                state.warnings.push(format!(
                                    "disabled '{feature}' for compatibility with '{}'",
                                    target.model_name
                                ));
                                warn!(
                                    model = target.model_name.as_str(),
                                    feature = feature.as_str(),
                                    "feature rejected by model; disabled and retrying"
                                );
                                continue;
                            }
                            return TargetOutcome::DropTarget;
                        }
                        ErrorKind::ParameterIncompatible(names) => {
                            return self.handle_incompatible_parameters(
                                target, args, state, names, &error,
                            );
                        }
                        ErrorKind::ProfileRequired { .. }
                        | ErrorKind::AccessDenied
                        | ErrorKind::Validation
                        | ErrorKind::Fatal => {
                            return TargetOutcome::DropTarget;
                        }
                    }
                }
            }
        }
    }

    fn handle_incompatible_parameters(
        &self,
        target: &RetryTarget,
        args: &mut ConverseArgs,
        state: &mut CallState,
        names: Vec<String>,
        error: &TransportError,
    ) -> TargetOutcome {
        let Some(params) = args.additional_model_request_fields.clone() else {
            // Nothing left to strip; the target rejects the request as-is.
            return TargetOutcome::DropTarget;
        };

        self.parameters
            .record_failure(&target.model_id, &target.region, &params, &error.message);

        let mut removed_any = false;
        if let Some(map) = args
            .additional_model_request_fields
            .as_mut()
            .and_then(|v| v.as_object_mut())
        {
            for name in &names {
                removed_any |= map.remove(name).is_some();
            }
            if map.is_empty() {
                args.additional_model_request_fields = None;
            }
        }
        if !removed_any {
            // The named parameters are not ours to strip; retrying this
            // target would provoke the same rejection.
            for name in names {
                state.incompatible_parameters.insert(name);
            }
            return TargetOutcome::DropTarget;
        }

        for name in names {
            state.incompatible_parameters.insert(name.clone());
            state
                .warnings
                .push(format!("stripped unsupported parameter '{name}'"));
        }

        // An attempt wasted on a provably-incompatible parameter set does
        // not consume the retry budget.
        state.budget_used = state.budget_used.saturating_sub(1);
        TargetOutcome::KeepTarget { throttled: false }
    }

    /// Build the wire map, omitting parameters already known incompatible
    /// for this target. Returns the map together with the parameter set
    /// actually sent, so a success is recorded for what went out rather
    /// than what the caller asked for.
    fn effective_wire(
        &self,
        target: &RetryTarget,
        args: &ConverseArgs,
        state: &mut CallState,
    ) -> (serde_json::Value, Option<serde_json::Value>) {
        let Some(params) = &args.additional_model_request_fields else {
            return (args.to_wire(), None);
        };

        if self
            .parameters
            .is_known_incompatible(&target.model_id, &target.region, params)
        {
            let mut stripped = args.clone();
            stripped.additional_model_request_fields = None;
            state.warnings.push(format!(
                "omitted additional request fields known to be incompatible with '{}' in {}",
                target.model_name, target.region
            ));
            return (stripped.to_wire(), None);
        }

        (args.to_wire(), Some(params.clone()))
    }

    async fn backoff_if_more_work(
        &self,
        state: &CallState,
        live: &[bool],
        current_index: usize,
        throttled: bool,
    ) {
        let budget_left = state.budget_used < self.max_attempts();
        let another_target = live
            .iter()
            .enumerate()
            .any(|(i, alive)| *alive && i != current_index)
            || live[current_index];
        if !budget_left || !another_target {
            return;
        }

        let attempt = state.budget_used.saturating_sub(1);
        let delay = self.config.delay_for_attempt(attempt, throttled);
        debug!(delay_ms = delay.as_millis() as u64, throttled, "backing off before next target");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serial_test::serial;

    use super::*;
    use crate::catalog::types::AccessInfo;

    struct MockTransport {
        script: Mutex<VecDeque<Result<WireConverseResponse, TransportError>>>,
        calls: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    impl MockTransport {
        fn new(script: Vec<Result<WireConverseResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConverseTransport for MockTransport {
        async fn converse(
            &self,
            region: &str,
            model_id: &str,
            body: &serde_json::Value,
        ) -> Result<WireConverseResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((region.to_string(), model_id.to_string(), body.clone()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("ScriptExhausted", "no more", None)))
        }
    }

    fn ok_response(text: &str) -> WireConverseResponse {
        serde_json::from_value(serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [{"text": text}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 1, "outputTokens": 1, "totalTokens": 2}
        }))
        .unwrap()
    }

    fn profile_required_error(model_id: &str) -> TransportError {
        TransportError::new(
            "ValidationException",
            format!(
                "Invocation of model ID {model_id} with on-demand throughput isn't supported. \
                 Retry your request with the ID or ARN of an inference profile that contains \
                 this model."
            ),
            Some(400),
        )
    }

    fn full_target(model_name: &str, model_id: &str, region: &str) -> RetryTarget {
        RetryTarget {
            model_name: model_name.to_string(),
            model_id: model_id.to_string(),
            region: region.to_string(),
            access: AccessInfo {
                region: region.to_string(),
                has_direct: true,
                has_regional_profile: true,
                direct_model_id: Some(model_id.to_string()),
                regional_profile_id: Some(format!("us.{model_id}")),
                ..Default::default()
            },
        }
    }

    fn direct_only_target(model_name: &str, model_id: &str, region: &str) -> RetryTarget {
        RetryTarget {
            model_name: model_name.to_string(),
            model_id: model_id.to_string(),
            region: region.to_string(),
            access: AccessInfo {
                region: region.to_string(),
                has_direct: true,
                direct_model_id: Some(model_id.to_string()),
                ..Default::default()
            },
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            throttle_delay_ms: 1,
            ..Default::default()
        }
    }

    fn reset_trackers() {
        AccessPreferenceTracker::global().reset_for_testing();
        ParameterCompatibilityTracker::global().reset_for_testing();
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_direct_success_single_attempt() {
        reset_trackers();
        let transport = MockTransport::new(vec![Ok(ok_response("hello"))]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let response = engine
            .execute(
                std::slice::from_ref(&target),
                ConverseArgs::from_text("hi"),
                None,
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.text(), "hello");
        assert_eq!(response.access_method_used, AccessMethod::Direct);
        assert!(!response.profile_used);
        assert_eq!(response.attempts.len(), 1);
        assert!(response.attempts[0].success);
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_profile_retry_consumes_no_attempt() {
        reset_trackers();
        let model_id = "anthropic.claude-opus-4-20250514-v1:0";
        let transport = MockTransport::new(vec![
            Err(profile_required_error(model_id)),
            Ok(ok_response("via profile")),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let target = full_target("Claude Opus 4", model_id, "us-east-1");
        let response = engine
            .execute(
                std::slice::from_ref(&target),
                ConverseArgs::from_text("hi"),
                None,
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.attempts.len(), 1, "profile retry must not add an attempt");
        assert!(response.attempts[0].success);
        assert_eq!(response.access_method_used, AccessMethod::RegionalCris);
        assert!(response.profile_used);
        assert_eq!(response.profile_id.as_deref(), Some(&*format!("us.{model_id}")));

        // Second dispatch used the profile id.
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, model_id);
        assert_eq!(calls[1].1, format!("us.{model_id}"));

        // The preference was learned from the error.
        let preference = AccessPreferenceTracker::global()
            .get_preference(model_id, "us-east-1")
            .unwrap();
        assert!(preference.prefer_regional);
        assert!(preference.learned_from_error);
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_learned_preference_skips_direct_on_next_call() {
        reset_trackers();
        let model_id = "anthropic.claude-opus-4-20250514-v1:0";
        AccessPreferenceTracker::global().record_profile_requirement(model_id, "us-east-1", false);

        let transport = MockTransport::new(vec![Ok(ok_response("direct skipped"))]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let target = full_target("Claude Opus 4", model_id, "us-east-1");
        let response = engine
            .execute(
                std::slice::from_ref(&target),
                ConverseArgs::from_text("hi"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.attempts.len(), 1);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, format!("us.{model_id}"), "first dispatch must use profile");
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_profile_required_without_profile_moves_on() {
        reset_trackers();
        let transport = MockTransport::new(vec![
            Err(profile_required_error("vendor.model-a-v1:0")),
            Ok(ok_response("second target")),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let targets = vec![
            direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1"),
            direct_only_target("Model B", "vendor.model-b-v1:0", "us-east-1"),
        ];
        let response = engine
            .execute(&targets, ConverseArgs::from_text("hi"), None)
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.model_used.as_deref(), Some("Model B"));
        assert!(response
            .warnings
            .iter()
            .any(|w| w.contains("requires an inference profile")));
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_feature_fallback_disables_guardrails() {
        reset_trackers();
        let transport = MockTransport::new(vec![
            Err(TransportError::new(
                "ValidationException",
                "Guardrail configuration is not supported for this model.",
                Some(400),
            )),
            Ok(ok_response("no guardrails")),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let mut args = ConverseArgs::from_text("hi");
        args.guardrail_config = Some(serde_json::json!({"guardrailIdentifier": "g-1"}));

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let response = engine
            .execute(std::slice::from_ref(&target), args, None)
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.features_disabled.contains(&"guardrails".to_string()));
        assert!(!response.warnings.is_empty());
        // Two attempts on the same target: rejected, then stripped.
        assert_eq!(response.attempts.len(), 2);

        let calls = transport.calls();
        assert!(calls[0].2.get("guardrailConfig").is_some());
        assert!(calls[1].2.get("guardrailConfig").is_none());
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_feature_fallback_disabled_by_config() {
        reset_trackers();
        let transport = MockTransport::new(vec![Err(TransportError::new(
            "ValidationException",
            "Guardrail configuration is not supported for this model.",
            Some(400),
        ))]);
        let config = RetryConfig {
            enable_feature_fallback: false,
            ..fast_config()
        };
        let engine = RetryEngine::new(&transport, &config);

        let mut args = ConverseArgs::from_text("hi");
        args.guardrail_config = Some(serde_json::json!({"guardrailIdentifier": "g-1"}));

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let failure = engine
            .execute(std::slice::from_ref(&target), args, None)
            .await
            .unwrap_err();
        assert_eq!(failure.error.attempts_made, 1);
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_throttled_target_retried_across_passes() {
        reset_trackers();
        let throttle = || {
            Err(TransportError::new(
                "ThrottlingException",
                "Rate exceeded",
                Some(429),
            ))
        };
        // Target 1 always fails with no profile available; target 2 throttles
        // three times. Budget of 4 attempts total (max_retries=3).
        let transport = MockTransport::new(vec![
            Err(profile_required_error("vendor.model-a-v1:0")),
            throttle(),
            throttle(),
            throttle(),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let targets = vec![
            direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1"),
            direct_only_target("Model B", "vendor.model-b-v1:0", "us-east-1"),
        ];
        let failure = engine
            .execute(&targets, ConverseArgs::from_text("hi"), None)
            .await
            .unwrap_err();

        assert!(failure.error.attempts_made >= 4);
        assert_eq!(failure.error.models_tried, vec!["Model A", "Model B"]);
        let text = failure.error.to_string();
        assert!(text.contains("1 of 2 models require inference profiles"));
        assert!(
            failure
                .error
                .last_errors
                .iter()
                .filter(|e| e.kind == "throttled")
                .count()
                >= 3
        );
        assert!(!failure.response.success);
        assert_eq!(failure.response.attempts.len() as u32, failure.error.attempts_made);
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_parameter_incompatibility_strips_and_learns() {
        reset_trackers();
        let transport = MockTransport::new(vec![
            Err(TransportError::new(
                "ValidationException",
                "unsupported parameter 'anthropic_beta'",
                Some(400),
            )),
            Ok(ok_response("stripped")),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let mut args = ConverseArgs::from_text("hi");
        args.additional_model_request_fields =
            Some(serde_json::json!({"anthropic_beta": ["context-1m-2025-08-07"]}));

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let response = engine
            .execute(std::slice::from_ref(&target), args, None)
            .await
            .unwrap();

        assert!(response.success);
        assert!(response
            .warnings
            .iter()
            .any(|w| w.contains("anthropic_beta")));

        let calls = transport.calls();
        assert!(calls[0].2.get("additionalModelRequestFields").is_some());
        assert!(calls[1].2.get("additionalModelRequestFields").is_none());

        // The incompatible combination is remembered.
        let stats = ParameterCompatibilityTracker::global().statistics();
        assert_eq!(stats.incompatible_count, 1);
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_known_incompatible_parameters_not_sent() {
        reset_trackers();
        let params = serde_json::json!({"anthropic_beta": ["context-1m-2025-08-07"]});
        ParameterCompatibilityTracker::global().record_failure(
            "vendor.model-a-v1:0",
            "us-east-1",
            &params,
            "unsupported parameter 'anthropic_beta'",
        );

        let transport = MockTransport::new(vec![Ok(ok_response("clean"))]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let mut args = ConverseArgs::from_text("hi");
        args.additional_model_request_fields = Some(params);

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let response = engine
            .execute(std::slice::from_ref(&target), args, None)
            .await
            .unwrap();

        assert!(response.success);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1, "no obviously-incompatible call should be issued");
        assert!(calls[0].2.get("additionalModelRequestFields").is_none());
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_all_parameter_failures_enumerated_on_exhaustion() {
        reset_trackers();
        let parameter_error = || {
            Err(TransportError::new(
                "ValidationException",
                "unsupported parameter 'top_k'",
                Some(400),
            ))
        };
        let transport = MockTransport::new(vec![parameter_error(), parameter_error()]);
        let config = RetryConfig {
            max_retries: 1,
            ..fast_config()
        };
        let engine = RetryEngine::new(&transport, &config);

        let mut args = ConverseArgs::from_text("hi");
        args.additional_model_request_fields = Some(serde_json::json!({"top_k": 50}));

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let failure = engine
            .execute(std::slice::from_ref(&target), args, None)
            .await
            .unwrap_err();

        assert!(failure
            .error
            .details
            .incompatible_parameters
            .contains(&"top_k".to_string()));
        assert!(failure.error.to_string().contains("top_k"));
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_validation_hook_retries_then_gives_up() {
        reset_trackers();
        let transport = MockTransport::new(vec![
            Ok(ok_response("bad")),
            Ok(ok_response("bad")),
            Ok(ok_response("good")),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let validation = ResponseValidationConfig::new(|response| {
            response
                .message()
                .content
                .first()
                .and_then(|b| b.text.as_deref())
                == Some("good")
        });

        let target = direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1");
        let response = engine
            .execute(
                std::slice::from_ref(&target),
                ConverseArgs::from_text("hi"),
                Some(&validation),
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.text(), "good");
        assert_eq!(response.validation_attempts, 2);
        assert_eq!(response.attempts.len(), 3);
    }

    #[tokio::test]
    #[serial(preference_tracker, parameter_tracker)]
    async fn test_access_denied_drops_target() {
        reset_trackers();
        let transport = MockTransport::new(vec![
            Err(TransportError::new("AccessDeniedException", "nope", Some(403))),
            Ok(ok_response("second")),
        ]);
        let config = fast_config();
        let engine = RetryEngine::new(&transport, &config);

        let targets = vec![
            direct_only_target("Model A", "vendor.model-a-v1:0", "us-east-1"),
            direct_only_target("Model B", "vendor.model-b-v1:0", "us-west-2"),
        ];
        let response = engine
            .execute(&targets, ConverseArgs::from_text("hi"), None)
            .await
            .unwrap();

        assert_eq!(response.region_used.as_deref(), Some("us-west-2"));
        assert_eq!(response.attempts.len(), 2);
        assert!(!response.attempts[0].success);
        assert!(response.attempts[1].success);
    }
}
