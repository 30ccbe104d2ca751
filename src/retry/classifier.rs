//! Error classification for the retry engine.
//!
//! Classification is pattern matching over the provider error code and
//! message. Profile-required detection is a predicate on the error, not a
//! specialized exception type; the engine matches on the returned kind.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::request::CompatibilityFeature;
use crate::transport::TransportError;

static PROFILE_MODEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"model ID ([^\s,]+)").expect("static regex"));
static CONTENT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"doesn't support the (video|image|document) content block").expect("static regex")
});
static SINGLE_PARAMETER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Uu]nsupported parameter '([^']+)'").expect("static regex"));
static PARAMETER_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"parameters?\s+([A-Za-z0-9_]+(?:\s*,\s*[A-Za-z0-9_]+)+)").expect("static regex")
});

/// Outcome of classifying one transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient network or server-side trouble; back off and try the next
    /// target.
    RetryableTransient,
    /// Rate limited; back off with the throttle delay.
    Throttled,
    /// Direct invocation rejected; retry immediately with an inference
    /// profile. Carries the offending model id when it could be extracted.
    ProfileRequired { model_id: Option<String> },
    /// A request feature the model rejects (guardrails, tool use, ...).
    FeatureIncompatible(CompatibilityFeature),
    /// A content block type the model rejects (image, document, video).
    ContentIncompatible(CompatibilityFeature),
    /// Named request parameters the model rejects.
    ParameterIncompatible(Vec<String>),
    /// Credentials lack access to this (model, region).
    AccessDenied,
    /// Request rejected as invalid for reasons not covered above.
    Validation,
    /// Unrecognized failure; not retried on the same target.
    Fatal,
}

impl ErrorKind {
    /// Stable label used in attempt records and exhaustion details.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RetryableTransient => "retryable_transient",
            Self::Throttled => "throttled",
            Self::ProfileRequired { .. } => "profile_required",
            Self::FeatureIncompatible(_) => "feature_incompatible",
            Self::ContentIncompatible(_) => "content_incompatible",
            Self::ParameterIncompatible(_) => "parameter_incompatible",
            Self::AccessDenied => "access_denied",
            Self::Validation => "validation",
            Self::Fatal => "fatal",
        }
    }
}

/// Classify a transport error.
pub fn classify(error: &TransportError) -> ErrorKind {
    let message = error.message.as_str();
    let code = error.code.as_str();

    // Profile requirement arrives as a ValidationException with a
    // distinctive message, so it must be checked before generic validation.
    if message.contains("with on-demand throughput isn't supported")
        && message.to_lowercase().contains("inference profile")
    {
        let model_id = PROFILE_MODEL_ID
            .captures(message)
            .map(|c| c[1].trim_end_matches(['.', ',']).to_string());
        return ErrorKind::ProfileRequired { model_id };
    }

    if code == "ThrottlingException"
        || code == "ServiceQuotaExceededException"
        || message.to_lowercase().contains("rate exceeded")
        || message.to_lowercase().contains("too many requests")
        || message.to_lowercase().contains("rate limit")
    {
        return ErrorKind::Throttled;
    }

    if let Some(captures) = CONTENT_BLOCK.captures(message) {
        let feature = match &captures[1] {
            "image" => CompatibilityFeature::ImageContent,
            "document" => CompatibilityFeature::DocumentContent,
            _ => CompatibilityFeature::VideoContent,
        };
        return ErrorKind::ContentIncompatible(feature);
    }

    if message.contains("Guardrail configuration is not supported") {
        return ErrorKind::FeatureIncompatible(CompatibilityFeature::Guardrails);
    }
    if message.contains("does not support tool use")
        || message.contains("toolConfig is not supported")
    {
        return ErrorKind::FeatureIncompatible(CompatibilityFeature::ToolUse);
    }
    if message.contains("does not support system messages") {
        return ErrorKind::FeatureIncompatible(CompatibilityFeature::SystemMessages);
    }
    if message.contains("does not support prompt caching")
        || message.contains("cachePoint is not supported")
    {
        return ErrorKind::FeatureIncompatible(CompatibilityFeature::PromptCaching);
    }

    let parameters = extract_parameter_names(message);
    if !parameters.is_empty() {
        return ErrorKind::ParameterIncompatible(parameters);
    }

    if code == "AccessDeniedException" || code == "UnrecognizedClientException" {
        return ErrorKind::AccessDenied;
    }

    if code == "ValidationException" {
        return ErrorKind::Validation;
    }

    if is_transient(error) {
        return ErrorKind::RetryableTransient;
    }

    ErrorKind::Fatal
}

fn is_transient(error: &TransportError) -> bool {
    if matches!(
        error.code.as_str(),
        "NetworkError"
            | "Timeout"
            | "InternalServerException"
            | "ServiceUnavailableException"
            | "ModelTimeoutException"
            | "ModelNotReadyException"
    ) {
        return true;
    }

    if error.status.is_some_and(|s| s >= 500) {
        return true;
    }

    let message = error.message.to_lowercase();
    message.contains("connection reset")
        || message.contains("connection refused")
        || message.contains("broken pipe")
        || message.contains("unexpected eof")
        || message.contains("timed out")
        || message.contains("timeout")
}

/// Best-effort extraction of rejected parameter names from a message.
/// Returns an empty list when the message does not look parameter-related.
pub fn extract_parameter_names(message: &str) -> Vec<String> {
    let mut names = Vec::new();

    for captures in SINGLE_PARAMETER.captures_iter(message) {
        names.push(captures[1].to_string());
    }

    if names.is_empty()
        && message.to_lowercase().contains("unsupported")
        && let Some(captures) = PARAMETER_LIST.captures(message)
    {
        for name in captures[1].split(',') {
            let name = name.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }

    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn error(code: &str, message: &str) -> TransportError {
        TransportError::new(code, message, Some(400))
    }

    #[test]
    fn test_profile_required_detection_and_extraction() {
        let kind = classify(&error(
            "ValidationException",
            "Invocation of model ID anthropic.claude-opus-4-20250514-v1:0 with on-demand \
             throughput isn't supported. Retry your request with the ID or ARN of an \
             inference profile that contains this model.",
        ));
        assert_eq!(kind, ErrorKind::ProfileRequired {
            model_id: Some("anthropic.claude-opus-4-20250514-v1:0".to_string()),
        });
    }

    #[test]
    fn test_profile_required_without_extractable_id() {
        let kind = classify(&error(
            "ValidationException",
            "This model with on-demand throughput isn't supported. Use an inference profile.",
        ));
        assert_eq!(kind, ErrorKind::ProfileRequired { model_id: None });
        assert_eq!(kind.label(), "profile_required");
    }

    #[rstest]
    #[case("ThrottlingException", "Rate exceeded")]
    #[case("ServiceQuotaExceededException", "Quota exceeded for this model")]
    #[case("SomeError", "Too many requests, slow down")]
    fn test_throttled(#[case] code: &str, #[case] message: &str) {
        assert_eq!(classify(&error(code, message)), ErrorKind::Throttled);
    }

    #[rstest]
    #[case("image", CompatibilityFeature::ImageContent)]
    #[case("document", CompatibilityFeature::DocumentContent)]
    #[case("video", CompatibilityFeature::VideoContent)]
    fn test_content_incompatible(#[case] block: &str, #[case] expected: CompatibilityFeature) {
        let kind = classify(&error(
            "ValidationException",
            &format!("This model doesn't support the {block} content block."),
        ));
        assert_eq!(kind, ErrorKind::ContentIncompatible(expected));
    }

    #[test]
    fn test_guardrail_incompatible() {
        let kind = classify(&error(
            "ValidationException",
            "Guardrail configuration is not supported for this model.",
        ));
        assert_eq!(
            kind,
            ErrorKind::FeatureIncompatible(CompatibilityFeature::Guardrails)
        );
    }

    #[test]
    fn test_parameter_incompatible_single() {
        let kind = classify(&error(
            "ValidationException",
            "unsupported parameter 'anthropic_beta' for this model",
        ));
        assert_eq!(
            kind,
            ErrorKind::ParameterIncompatible(vec!["anthropic_beta".to_string()])
        );
    }

    #[test]
    fn test_parameter_incompatible_list() {
        let kind = classify(&error(
            "ValidationException",
            "The model returned an error: unsupported parameters top_k, anthropic_beta",
        ));
        assert_eq!(
            kind,
            ErrorKind::ParameterIncompatible(vec![
                "top_k".to_string(),
                "anthropic_beta".to_string()
            ])
        );
    }

    #[test]
    fn test_access_denied() {
        assert_eq!(
            classify(&error("AccessDeniedException", "not authorized")),
            ErrorKind::AccessDenied
        );
    }

    #[test]
    fn test_plain_validation() {
        assert_eq!(
            classify(&error("ValidationException", "messages: too long")),
            ErrorKind::Validation
        );
    }

    #[rstest]
    #[case("Timeout", "deadline exceeded")]
    #[case("NetworkError", "connection refused")]
    #[case("InternalServerException", "internal error")]
    #[case("ModelNotReadyException", "model warming up")]
    fn test_transient_codes(#[case] code: &str, #[case] message: &str) {
        assert_eq!(
            classify(&TransportError::new(code, message, None)),
            ErrorKind::RetryableTransient
        );
    }

    #[test]
    fn test_transient_by_status_and_message() {
        assert_eq!(
            classify(&TransportError::new("Whatever", "boom", Some(503))),
            ErrorKind::RetryableTransient
        );
        assert_eq!(
            classify(&TransportError::new("Whatever", "connection reset by peer", None)),
            ErrorKind::RetryableTransient
        );
    }

    #[test]
    fn test_unknown_is_fatal() {
        assert_eq!(
            classify(&TransportError::new("MysteryException", "what", Some(400))),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_extract_parameter_names_multiple_quoted() {
        let names = extract_parameter_names(
            "unsupported parameter 'top_k' and unsupported parameter 'beta'",
        );
        assert_eq!(names, vec!["top_k", "beta"]);
    }

    #[test]
    fn test_extract_parameter_names_none() {
        assert!(extract_parameter_names("some unrelated failure").is_empty());
    }
}
