//! Request and response bodies of the OpenFeature Remote Evaluation Protocol.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resolution::ErrorCode;

/// Body of single-flag and bulk evaluation requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Context to evaluate against. Omitted when the caller has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<WireContext>,
}

/// Wire form of an [`EvaluationContext`](crate::EvaluationContext).
///
/// Custom fields are flattened next to `targetingKey`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireContext {
    /// Sent as `targetingKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting_key: Option<String>,
    /// Custom fields, encoded as JSON values.
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

/// Successful evaluation of a single flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvaluationSuccess {
    /// Key of the evaluated flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Raw reason string, e.g. `"TARGETING_MATCH"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Name of the served variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Arbitrary metadata attached to the flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, FlagMetadataValue>>,
    /// Whether the server allows the client to cache this evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable: Option<bool>,
    /// The evaluated value.
    pub value: FlagValue,
}

/// Value of an evaluated flag.
///
/// The wire format carries no type tag, so the variant is inferred from the JSON shape. Numbers
/// that fit into `i64` become [`FlagValue::Integer`]; all other numbers become
/// [`FlagValue::Float`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum FlagValue {
    /// A JSON boolean.
    Boolean(bool),
    /// A JSON number that fits into `i64`.
    Integer(i64),
    /// Any other JSON number.
    Float(f64),
    /// A JSON string.
    String(String),
    /// A JSON object.
    Object(Map<String, Value>),
}

impl FlagValue {
    /// Stable label used in type mismatch messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            FlagValue::Boolean(_) => "Bool",
            FlagValue::Integer(_) => "Int",
            FlagValue::Float(_) => "Double",
            FlagValue::String(_) => "String",
            FlagValue::Object(_) => "Object",
        }
    }
}

/// Value of a flag metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum FlagMetadataValue {
    /// A boolean value.
    Bool(bool),
    /// A string value.
    String(String),
    /// A numeric value.
    Double(f64),
}

impl From<&str> for FlagMetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Structured failure for a single flag (`400` and `404` responses, and failed entries of a bulk
/// response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationFailure {
    /// Key of the flag that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Machine-readable failure kind.
    pub error_code: ErrorCode,
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Body of a `500` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralErrorResponse {
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Body of a successful bulk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEvaluationSuccess {
    /// One entry per evaluated flag.
    pub flags: Vec<BulkFlagEvaluation>,
    /// Metadata shared by the whole evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, FlagMetadataValue>>,
}

/// One entry of a bulk evaluation: either a flag value or a per-flag failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum BulkFlagEvaluation {
    /// The flag was evaluated.
    Success(ServerEvaluationSuccess),
    /// The flag could not be evaluated.
    Failure(EvaluationFailure),
}

/// Body of a `400` response to a bulk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEvaluationFailure {
    /// Machine-readable failure kind.
    pub error_code: ErrorCode,
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Server configuration returned by `GET /ofrep/v1/configuration`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationResponse {
    /// Name of the flag management system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional protocol features the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// Capabilities advertised in a [`ConfigurationResponse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// How clients learn that evaluations changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_invalidation: Option<CacheInvalidation>,
    /// Evaluation features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_evaluation: Option<FlagEvaluationCapabilities>,
}

/// Cache invalidation capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInvalidation {
    /// Polling settings for bulk evaluations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling: Option<Polling>,
}

/// Polling capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Polling {
    /// Whether the server expects clients to poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Minimum polling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_polling_interval: Option<u64>,
}

/// Flag evaluation capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagEvaluationCapabilities {
    /// Flag types the server can evaluate, e.g. `"boolean"`, `"string"`.
    #[serde(default)]
    pub supported_types: Vec<String>,
}
