//! Response structures: the wire Converse response and the user-facing
//! aggregate returned by the manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::method::AccessMethod;
use crate::request::ContentBlock;

/// Token usage reported by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_input_tokens: Option<u64>,
}

/// Latency metrics reported by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetrics {
    #[serde(default)]
    pub latency_ms: u64,
}

/// The assistant message in a Converse response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireOutput {
    pub message: OutputMessage,
}

/// Raw Converse response as deserialized from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConverseResponse {
    pub(crate) output: WireOutput,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metrics: Option<ResponseMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_model_response_fields: Option<serde_json::Value>,
}

impl WireConverseResponse {
    /// The output message.
    pub fn message(&self) -> &OutputMessage {
        &self.output.message
    }
}

/// One chargeable dispatch against a target. A profile retry inside one
/// target does not produce an additional record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub model: String,
    pub region: String,
    pub access_method: AccessMethod,
    /// 1-indexed attempt number within the call.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl AttemptRecord {
    pub(crate) fn open(
        model: impl Into<String>,
        region: impl Into<String>,
        access_method: AccessMethod,
        attempt_number: u32,
    ) -> Self {
        Self {
            model: model.into(),
            region: region.into(),
            access_method,
            attempt_number,
            started_at: Utc::now(),
            completed_at: None,
            success: false,
            error: None,
        }
    }

    pub(crate) fn close_success(&mut self, access_method: AccessMethod) {
        self.completed_at = Some(Utc::now());
        self.success = true;
        self.access_method = access_method;
    }

    pub(crate) fn close_failure(&mut self, error: impl Into<String>) {
        self.completed_at = Some(Utc::now());
        self.success = false;
        self.error = Some(error.into());
    }

    /// Duration of the attempt in milliseconds, if completed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Aggregated result of a single converse call, successful or not.
///
/// On failure `success` is false and the full diagnostic trail (attempts,
/// warnings, disabled features) is still populated so callers can surface a
/// meaningful message without re-parsing errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Option<OutputMessage>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metrics: Option<ResponseMetrics>,
    #[serde(default)]
    pub additional_response_fields: Option<serde_json::Value>,

    /// Canonical model name that produced the response.
    #[serde(default)]
    pub model_used: Option<String>,
    /// Region that produced the response.
    #[serde(default)]
    pub region_used: Option<String>,
    /// Access method of the successful attempt.
    pub access_method_used: AccessMethod,
    /// True when an inference profile id was sent instead of the model id.
    pub profile_used: bool,
    #[serde(default)]
    pub profile_id: Option<String>,

    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub features_disabled: Vec<String>,
    /// Number of times response validation rejected an otherwise-successful
    /// response before this result.
    #[serde(default)]
    pub validation_attempts: u32,
    pub total_duration_ms: f64,
}

impl ConverseResponse {
    /// First text part of the output message, or empty string.
    pub fn text(&self) -> &str {
        self.output
            .as_ref()
            .and_then(|m| m.content.iter().find_map(|b| b.text.as_deref()))
            .unwrap_or("")
    }

    pub fn input_tokens(&self) -> u64 {
        self.usage.as_ref().map_or(0, |u| u.input_tokens)
    }

    pub fn output_tokens(&self) -> u64 {
        self.usage.as_ref().map_or(0, |u| u.output_tokens)
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage.as_ref().map_or(0, |u| u.total_tokens)
    }

    /// Error string of the last failed attempt, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_json() -> &'static str {
        r#"{
            "output": {
                "message": {
                    "role": "assistant",
                    "content": [{"text": "hello"}]
                }
            },
            "stopReason": "end_turn",
            "usage": {
                "inputTokens": 10,
                "outputTokens": 5,
                "totalTokens": 15,
                "cacheReadInputTokens": 3
            },
            "metrics": {"latencyMs": 420}
        }"#
    }

    #[test]
    fn test_parse_wire_response() {
        let response: WireConverseResponse = serde_json::from_str(wire_json()).unwrap();
        assert_eq!(response.message().role, "assistant");
        assert_eq!(response.message().content[0].text.as_deref(), Some("hello"));
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));

        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.cache_read_input_tokens, Some(3));
        assert_eq!(usage.cache_write_input_tokens, None);

        assert_eq!(response.metrics.unwrap().latency_ms, 420);
    }

    #[test]
    fn test_parse_wire_response_without_optional_fields() {
        let json = r#"{
            "output": {"message": {"role": "assistant", "content": [{"text": "ok"}]}}
        }"#;
        let response: WireConverseResponse = serde_json::from_str(json).unwrap();
        assert!(response.usage.is_none());
        assert!(response.metrics.is_none());
        assert!(response.stop_reason.is_none());
    }

    #[test]
    fn test_attempt_record_lifecycle() {
        let mut record = AttemptRecord::open("model-a", "us-east-1", AccessMethod::Direct, 1);
        assert!(!record.success);
        assert!(record.completed_at.is_none());

        record.close_success(AccessMethod::RegionalCris);
        assert!(record.success);
        assert!(record.completed_at.is_some());
        // A profile retry rewrites the method on the same record.
        assert_eq!(record.access_method, AccessMethod::RegionalCris);
        assert!(record.duration_ms().is_some());
    }

    #[test]
    fn test_attempt_record_failure() {
        let mut record = AttemptRecord::open("model-a", "us-east-1", AccessMethod::Direct, 1);
        record.close_failure("ThrottlingException: rate exceeded");
        assert!(!record.success);
        assert_eq!(
            record.error.as_deref(),
            Some("ThrottlingException: rate exceeded")
        );
    }

    #[test]
    fn test_response_text_accessor() {
        let wire: WireConverseResponse = serde_json::from_str(wire_json()).unwrap();
        let response = ConverseResponse {
            success: true,
            output: Some(wire.output.message),
            stop_reason: wire.stop_reason,
            usage: wire.usage,
            metrics: wire.metrics,
            additional_response_fields: None,
            model_used: Some("model-a".into()),
            region_used: Some("us-east-1".into()),
            access_method_used: AccessMethod::Direct,
            profile_used: false,
            profile_id: None,
            attempts: vec![],
            warnings: vec![],
            features_disabled: vec![],
            validation_attempts: 0,
            total_duration_ms: 12.0,
        };

        assert_eq!(response.text(), "hello");
        assert_eq!(response.input_tokens(), 10);
        assert_eq!(response.total_tokens(), 15);
        assert!(response.last_error().is_none());
    }
}
