//! Typed request structures for the Converse API.
//!
//! The public surface accepts a typed [`ConverseArgs`] whose optional fields
//! are explicit; it is marshalled into the camelCase wire map at the last
//! moment before dispatch. `additional_model_request_fields` stays an opaque
//! JSON object end to end.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Cache point block for prompt caching. Only `"default"` is supported.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachePoint {
    #[serde(rename = "type", default = "default_cache_point_type")]
    pub type_: String,
}

fn default_cache_point_type() -> String {
    "default".to_string()
}

/// Content block within a message.
///
/// Exactly one field should be set; the wire format uses the field name as
/// the block discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_point: Option<CachePoint>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn cache_point() -> Self {
        Self {
            cache_point: Some(CachePoint::default()),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.image.is_none()
            && self.document.is_none()
            && self.video.is_none()
            && self.tool_use.is_none()
            && self.tool_result.is_none()
            && self.cache_point.is_none()
    }
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }
}

/// System content block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_point: Option<CachePoint>,
}

impl SystemBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            cache_point: None,
        }
    }
}

/// Inference parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Request features the retry engine may disable for compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompatibilityFeature {
    Guardrails,
    ToolUse,
    SystemMessages,
    PromptCaching,
    ImageContent,
    DocumentContent,
    VideoContent,
}

impl CompatibilityFeature {
    /// Stable name used in `features_disabled` lists and warnings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardrails => "guardrails",
            Self::ToolUse => "tool_use",
            Self::SystemMessages => "system_messages",
            Self::PromptCaching => "prompt_caching",
            Self::ImageContent => "image_content",
            Self::DocumentContent => "document_content",
            Self::VideoContent => "video_content",
        }
    }
}

impl std::fmt::Display for CompatibilityFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed arguments for a single converse call.
#[derive(Debug, Clone, Default)]
pub struct ConverseArgs {
    pub messages: Vec<Message>,
    pub system: Option<Vec<SystemBlock>>,
    pub inference_config: Option<InferenceConfig>,
    pub tool_config: Option<serde_json::Value>,
    pub guardrail_config: Option<serde_json::Value>,
    pub additional_model_request_fields: Option<serde_json::Value>,
    pub prompt_variables: Option<serde_json::Value>,
    pub additional_model_response_field_paths: Option<Vec<String>>,
    pub request_metadata: Option<HashMap<String, String>>,
    pub performance_config: Option<serde_json::Value>,
}

impl ConverseArgs {
    /// Shorthand for a single-user-message request.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    /// Marshal into the wire map sent to the transport. `None` fields are
    /// omitted entirely; an empty `request_metadata` map is also omitted
    /// since the service rejects it.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "messages".to_string(),
            serde_json::to_value(&self.messages).unwrap_or_default(),
        );

        if let Some(system) = &self.system {
            map.insert(
                "system".to_string(),
                serde_json::to_value(system).unwrap_or_default(),
            );
        }
        if let Some(config) = &self.inference_config {
            map.insert(
                "inferenceConfig".to_string(),
                serde_json::to_value(config).unwrap_or_default(),
            );
        }
        if let Some(tools) = &self.tool_config {
            map.insert("toolConfig".to_string(), tools.clone());
        }
        if let Some(guardrails) = &self.guardrail_config {
            map.insert("guardrailConfig".to_string(), guardrails.clone());
        }
        if let Some(fields) = &self.additional_model_request_fields {
            map.insert("additionalModelRequestFields".to_string(), fields.clone());
        }
        if let Some(vars) = &self.prompt_variables {
            map.insert("promptVariables".to_string(), vars.clone());
        }
        if let Some(paths) = &self.additional_model_response_field_paths {
            map.insert(
                "additionalModelResponseFieldPaths".to_string(),
                serde_json::to_value(paths).unwrap_or_default(),
            );
        }
        if let Some(metadata) = &self.request_metadata
            && !metadata.is_empty()
        {
            map.insert(
                "requestMetadata".to_string(),
                serde_json::to_value(metadata).unwrap_or_default(),
            );
        }
        if let Some(perf) = &self.performance_config {
            map.insert("performanceConfig".to_string(), perf.clone());
        }

        serde_json::Value::Object(map)
    }

    /// Disable one compatibility feature in place, removing the offending
    /// argument keys or content blocks.
    pub fn disable_feature(&mut self, feature: CompatibilityFeature) {
        match feature {
            CompatibilityFeature::Guardrails => self.guardrail_config = None,
            CompatibilityFeature::ToolUse => self.tool_config = None,
            CompatibilityFeature::SystemMessages => self.system = None,
            CompatibilityFeature::PromptCaching => {
                if let Some(system) = &mut self.system {
                    system.retain(|b| b.cache_point.is_none());
                }
                for message in &mut self.messages {
                    message.content.retain(|b| b.cache_point.is_none());
                }
            }
            CompatibilityFeature::ImageContent => {
                self.strip_content(|b| b.image.is_some());
            }
            CompatibilityFeature::DocumentContent => {
                self.strip_content(|b| b.document.is_some());
            }
            CompatibilityFeature::VideoContent => {
                self.strip_content(|b| b.video.is_some());
            }
        }
    }

    fn strip_content(&mut self, offending: impl Fn(&ContentBlock) -> bool) {
        for message in &mut self.messages {
            message.content.retain(|b| !offending(b));
        }
    }

    /// Whether the feature is present in the current arguments.
    pub fn has_feature(&self, feature: CompatibilityFeature) -> bool {
        match feature {
            CompatibilityFeature::Guardrails => self.guardrail_config.is_some(),
            CompatibilityFeature::ToolUse => self.tool_config.is_some(),
            CompatibilityFeature::SystemMessages => {
                self.system.as_ref().is_some_and(|s| !s.is_empty())
            }
            CompatibilityFeature::PromptCaching => {
                self.system
                    .as_ref()
                    .is_some_and(|s| s.iter().any(|b| b.cache_point.is_some()))
                    || self
                        .messages
                        .iter()
                        .any(|m| m.content.iter().any(|b| b.cache_point.is_some()))
            }
            CompatibilityFeature::ImageContent => self.any_content(|b| b.image.is_some()),
            CompatibilityFeature::DocumentContent => self.any_content(|b| b.document.is_some()),
            CompatibilityFeature::VideoContent => self.any_content(|b| b.video.is_some()),
        }
    }

    fn any_content(&self, predicate: impl Fn(&ContentBlock) -> bool) -> bool {
        self.messages
            .iter()
            .any(|m| m.content.iter().any(&predicate))
    }
}

/// One request in a parallel batch. `request_id` must be unique per batch;
/// a generated id is assigned when omitted.
#[derive(Debug, Clone)]
pub struct ConverseRequest {
    pub request_id: Option<String>,
    pub args: ConverseArgs,
    /// Optional model name override for this request; falls back to the
    /// manager's configured models when unset.
    pub model_name: Option<String>,
}

impl ConverseRequest {
    pub fn new(args: ConverseArgs) -> Self {
        Self {
            request_id: None,
            args,
            model_name: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// The effective request id, generating a random one when unset.
    pub fn effective_id(&self) -> String {
        self.request_id
            .clone()
            .unwrap_or_else(|| format!("req-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]))
    }
}

/// Validate a single request's arguments before any network call.
pub fn validate_args(args: &ConverseArgs) -> Result<(), LlmError> {
    if args.messages.is_empty() {
        return Err(LlmError::RequestValidation(
            "messages must not be empty".to_string(),
        ));
    }

    for (i, message) in args.messages.iter().enumerate() {
        if message.content.is_empty() {
            return Err(LlmError::RequestValidation(format!(
                "message {i} has no content blocks"
            )));
        }
        if message.content.iter().any(ContentBlock::is_empty) {
            return Err(LlmError::RequestValidation(format!(
                "message {i} contains an empty content block"
            )));
        }
    }

    if let Some(config) = &args.inference_config {
        if let Some(temperature) = config.temperature
            && !(0.0..=1.0).contains(&temperature)
        {
            return Err(LlmError::RequestValidation(format!(
                "temperature must be within [0, 1], got {temperature}"
            )));
        }
        if let Some(top_p) = config.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(LlmError::RequestValidation(format!(
                "top_p must be within [0, 1], got {top_p}"
            )));
        }
        if let Some(max_tokens) = config.max_tokens
            && max_tokens == 0
        {
            return Err(LlmError::RequestValidation(
                "max_tokens must be at least 1".to_string(),
            ));
        }
    }

    if let Some(fields) = &args.additional_model_request_fields
        && !fields.is_object()
    {
        return Err(LlmError::RequestValidation(
            "additional_model_request_fields must be a JSON object".to_string(),
        ));
    }

    Ok(())
}

/// Validate a parallel batch: per-request checks plus request-id uniqueness.
pub fn validate_batch(requests: &[ConverseRequest]) -> Result<(), LlmError> {
    if requests.is_empty() {
        return Err(LlmError::RequestValidation(
            "request list cannot be empty".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for request in requests {
        validate_args(&request.args)?;
        if let Some(id) = &request.request_id
            && !seen.insert(id.clone())
        {
            return Err(LlmError::RequestValidation(format!(
                "duplicate request_id '{id}' in batch"
            )));
        }
    }

    Ok(())
}
