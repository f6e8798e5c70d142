//! Typed flag resolutions and the mapping from OFREP responses to them.
//!
//! Every function in this module is total: whatever the server answered (or failed to answer),
//! the caller gets a value of the requested type, falling back to the caller's default.
use std::{collections::HashMap, fmt};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    client::{EvaluateFlagOutput, EvaluateFlagsBulkOutput, GetConfigurationOutput},
    context::ContextError,
    schema::{
        BulkFlagEvaluation, ConfigurationResponse, EvaluationFailure, FlagMetadataValue,
        FlagValue, GeneralErrorResponse, ServerEvaluationSuccess,
    },
    Error,
};

/// JSON object flag value.
pub type StructValue = Map<String, Value>;

/// Flag metadata attached to a resolution.
pub type FlagMetadata = HashMap<String, FlagMetadataValue>;

/// Outcome of resolving a flag to a value of type `T`.
///
/// `value` is always usable: it holds either the server's value or the caller's default. Inspect
/// `error` and `reason` to tell them apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResolution<T> {
    /// The server's value, or the caller's default on error.
    pub value: T,
    /// Set when `value` is the default because resolution failed.
    pub error: Option<ResolutionError>,
    /// Why the flag resolved to `value`. [`Reason::Error`] whenever `error` is set.
    pub reason: Option<Reason>,
    /// Variant reported by the server. Kept on type mismatches.
    pub variant: Option<String>,
    /// Metadata reported by the server. Empty if there was none.
    pub flag_metadata: FlagMetadata,
}

impl<T> FlagResolution<T> {
    /// A resolution that fell back to `default_value` because of `error`.
    pub fn failed(default_value: T, error: ResolutionError) -> Self {
        FlagResolution {
            value: default_value,
            error: Some(error),
            reason: Some(Reason::Error),
            variant: None,
            flag_metadata: FlagMetadata::new(),
        }
    }

    /// Returns `true` if `value` is the caller's default because resolution failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<T: FlagType> FlagResolution<T> {
    /// Map a successful evaluation, checking the value against the requested type.
    pub fn from_success(success: ServerEvaluationSuccess, default_value: T) -> Self {
        let reason = success.reason.map(Reason::from);
        let variant = success.variant;
        let flag_metadata = success.metadata.unwrap_or_default();

        match T::from_flag_value(success.value) {
            Ok(value) => FlagResolution {
                value,
                error: None,
                reason,
                variant,
                flag_metadata,
            },
            Err(actual) => FlagResolution {
                value: default_value,
                error: Some(ResolutionError::type_mismatch(T::TYPE_LABEL, &actual)),
                reason: Some(Reason::Error),
                variant,
                flag_metadata,
            },
        }
    }

    /// Map the routed response of a single-flag evaluation.
    pub fn from_output(output: EvaluateFlagOutput, default_value: T) -> Self {
        let error = match output {
            EvaluateFlagOutput::Ok(success) => return Self::from_success(success, default_value),
            EvaluateFlagOutput::BadRequest(failure) | EvaluateFlagOutput::NotFound(failure) => {
                failure.into()
            }
            EvaluateFlagOutput::Unauthorized => ResolutionError::unauthorized(),
            EvaluateFlagOutput::Forbidden => ResolutionError::forbidden(),
            EvaluateFlagOutput::TooManyRequests { retry_after } => {
                ResolutionError::too_many_requests(retry_after)
            }
            EvaluateFlagOutput::InternalServerError(body) => body.into(),
            EvaluateFlagOutput::Undocumented { status, .. } => {
                ResolutionError::unexpected_status(status.as_u16())
            }
        };
        Self::failed(default_value, error)
    }

    /// A request that could not be completed at all.
    pub fn from_error(error: &Error, default_value: T) -> Self {
        Self::failed(default_value, ResolutionError::general(error.to_string()))
    }

    /// A context that could not be encoded. No request is sent in this case.
    pub fn from_context_error(error: &ContextError, default_value: T) -> Self {
        Self::failed(
            default_value,
            ResolutionError::new(ErrorCode::InvalidContext, error.to_string()),
        )
    }
}

/// Types a flag can be resolved to.
///
/// Implemented for `bool`, `String`, `i64`, `f64`, and [`StructValue`].
pub trait FlagType: Serialize + Sized + sealed::Sealed {
    /// Label used in type mismatch messages.
    const TYPE_LABEL: &'static str;

    /// Unwrap `value` if it has this type, or hand it back otherwise.
    fn from_flag_value(value: FlagValue) -> Result<Self, FlagValue>;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for String {}
    impl Sealed for i64 {}
    impl Sealed for f64 {}
    impl Sealed for super::StructValue {}
}

impl FlagType for bool {
    const TYPE_LABEL: &'static str = "Bool";

    fn from_flag_value(value: FlagValue) -> Result<Self, FlagValue> {
        match value {
            FlagValue::Boolean(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl FlagType for String {
    const TYPE_LABEL: &'static str = "String";

    fn from_flag_value(value: FlagValue) -> Result<Self, FlagValue> {
        match value {
            FlagValue::String(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl FlagType for i64 {
    const TYPE_LABEL: &'static str = "Int";

    fn from_flag_value(value: FlagValue) -> Result<Self, FlagValue> {
        match value {
            FlagValue::Integer(i) => Ok(i),
            other => Err(other),
        }
    }
}

impl FlagType for f64 {
    const TYPE_LABEL: &'static str = "Double";

    fn from_flag_value(value: FlagValue) -> Result<Self, FlagValue> {
        match value {
            FlagValue::Float(f) => Ok(f),
            other => Err(other),
        }
    }
}

impl FlagType for StructValue {
    const TYPE_LABEL: &'static str = "Object";

    fn from_flag_value(value: FlagValue) -> Result<Self, FlagValue> {
        match value {
            FlagValue::Object(map) => Ok(map),
            other => Err(other),
        }
    }
}

/// Why a flag resolved to its value.
///
/// Reasons the crate does not know are kept verbatim in [`Reason::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Reason {
    /// The flag has a single static value.
    Static,
    /// A targeting rule matched.
    TargetingMatch,
    /// The flag's default variant was served.
    Default,
    /// A pseudorandom split assigned the variant.
    Split,
    /// The value came from a cache.
    Cached,
    /// The flag is disabled.
    Disabled,
    /// The reason is not known.
    Unknown,
    /// The value may be stale.
    Stale,
    /// Resolution failed and the default value was used.
    Error,
    /// Any other reason reported by the server.
    Other(String),
}

impl Reason {
    /// Wire name, e.g. `"TARGETING_MATCH"`.
    pub fn as_str(&self) -> &str {
        match self {
            Reason::Static => "STATIC",
            Reason::TargetingMatch => "TARGETING_MATCH",
            Reason::Default => "DEFAULT",
            Reason::Split => "SPLIT",
            Reason::Cached => "CACHED",
            Reason::Disabled => "DISABLED",
            Reason::Unknown => "UNKNOWN",
            Reason::Stale => "STALE",
            Reason::Error => "ERROR",
            Reason::Other(other) => other,
        }
    }
}

impl From<String> for Reason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STATIC" => Reason::Static,
            "TARGETING_MATCH" => Reason::TargetingMatch,
            "DEFAULT" => Reason::Default,
            "SPLIT" => Reason::Split,
            "CACHED" => Reason::Cached,
            "DISABLED" => Reason::Disabled,
            "UNKNOWN" => Reason::Unknown,
            "STALE" => Reason::Stale,
            "ERROR" => Reason::Error,
            _ => Reason::Other(value),
        }
    }
}

impl From<&str> for Reason {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

impl From<Reason> for String {
    fn from(value: Reason) -> Self {
        match value {
            Reason::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a [`ResolutionError`].
///
/// Codes the crate does not know are forwarded verbatim in [`ErrorCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// The provider cannot evaluate flags yet.
    ProviderNotReady,
    /// The flag does not exist.
    FlagNotFound,
    /// The flag definition could not be parsed.
    ParseError,
    /// The flag value does not have the requested type.
    TypeMismatch,
    /// The flag requires a targeting key and none was sent.
    TargetingKeyMissing,
    /// The context could not be encoded or was rejected by the server.
    InvalidContext,
    /// Any other failure, including transport and HTTP errors.
    General,
    /// A code the crate does not know, as sent by the server.
    Other(String),
}

impl ErrorCode {
    /// Wire name, e.g. `"FLAG_NOT_FOUND"`.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ProviderNotReady => "PROVIDER_NOT_READY",
            ErrorCode::FlagNotFound => "FLAG_NOT_FOUND",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::TargetingKeyMissing => "TARGETING_KEY_MISSING",
            ErrorCode::InvalidContext => "INVALID_CONTEXT",
            ErrorCode::General => "GENERAL",
            ErrorCode::Other(other) => other,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PROVIDER_NOT_READY" => ErrorCode::ProviderNotReady,
            "FLAG_NOT_FOUND" => ErrorCode::FlagNotFound,
            "PARSE_ERROR" => ErrorCode::ParseError,
            "TYPE_MISMATCH" => ErrorCode::TypeMismatch,
            "TARGETING_KEY_MISSING" => ErrorCode::TargetingKeyMissing,
            "INVALID_CONTEXT" => ErrorCode::InvalidContext,
            "GENERAL" => ErrorCode::General,
            _ => ErrorCode::Other(value),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(value: ErrorCode) -> Self {
        match value {
            ErrorCode::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a resolution fell back to the default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionError {
    /// Kind of failure.
    pub code: ErrorCode,
    /// Human-readable details, if any.
    pub message: Option<String>,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ResolutionError {}

impl ResolutionError {
    /// An error with a message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ResolutionError {
            code,
            message: Some(message.into()),
        }
    }

    /// An [`ErrorCode::General`] error with a message.
    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::General, message)
    }

    fn type_mismatch(expected: &str, actual: &FlagValue) -> Self {
        Self::new(
            ErrorCode::TypeMismatch,
            format!(
                "Expected flag value of type \"{expected}\" but received \"{}\".",
                actual.type_label()
            ),
        )
    }

    fn unauthorized() -> Self {
        Self::general("Unauthorized.")
    }

    fn forbidden() -> Self {
        Self::general("Forbidden.")
    }

    fn too_many_requests(retry_after: Option<DateTime<Utc>>) -> Self {
        match retry_after {
            Some(retry_after) => Self::general(format!(
                "Too many requests. Retry after \"{}\".",
                retry_after.to_rfc3339_opts(SecondsFormat::Secs, true)
            )),
            None => Self::general("Too many requests."),
        }
    }

    fn unexpected_status(status: u16) -> Self {
        Self::general(format!(
            "Received unexpected response status code \"{status}\"."
        ))
    }
}

impl From<EvaluationFailure> for ResolutionError {
    fn from(failure: EvaluationFailure) -> Self {
        ResolutionError {
            code: failure.error_code,
            message: failure.error_details,
        }
    }
}

impl From<GeneralErrorResponse> for ResolutionError {
    fn from(body: GeneralErrorResponse) -> Self {
        ResolutionError {
            code: ErrorCode::General,
            message: body.error_details,
        }
    }
}

impl BulkFlagEvaluation {
    /// Key of the evaluated flag, if the server reported it.
    pub fn key(&self) -> Option<&str> {
        match self {
            BulkFlagEvaluation::Success(success) => success.key.as_deref(),
            BulkFlagEvaluation::Failure(failure) => failure.key.as_deref(),
        }
    }

    /// Resolve this entry to a value of type `T`, with the same rules as single-flag
    /// evaluation.
    pub fn resolve<T: FlagType>(&self, default_value: T) -> FlagResolution<T> {
        match self {
            BulkFlagEvaluation::Success(success) => {
                FlagResolution::from_success(success.clone(), default_value)
            }
            BulkFlagEvaluation::Failure(failure) => {
                FlagResolution::failed(default_value, failure.clone().into())
            }
        }
    }
}

/// Outcome of a bulk evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkResolution {
    /// The server evaluated all flags.
    Evaluated {
        /// Entity tag to send as `If-None-Match` on the next bulk evaluation.
        etag: Option<String>,
        /// One entry per flag, each resolved on demand with [`BulkFlagEvaluation::resolve`].
        flags: Vec<BulkFlagEvaluation>,
        /// Metadata shared by the whole evaluation.
        metadata: FlagMetadata,
    },
    /// Nothing changed since the evaluation identified by the `If-None-Match` tag.
    NotModified,
    /// The evaluation failed as a whole.
    Failed(ResolutionError),
}

impl BulkResolution {
    /// Map the routed response of a bulk evaluation. `304` is not an error.
    pub fn from_output(output: EvaluateFlagsBulkOutput) -> Self {
        let error = match output {
            EvaluateFlagsBulkOutput::Ok { etag, body } => {
                return BulkResolution::Evaluated {
                    etag,
                    flags: body.flags,
                    metadata: body.metadata.unwrap_or_default(),
                }
            }
            EvaluateFlagsBulkOutput::NotModified => return BulkResolution::NotModified,
            EvaluateFlagsBulkOutput::BadRequest(failure) => ResolutionError {
                code: failure.error_code,
                message: failure.error_details,
            },
            EvaluateFlagsBulkOutput::Unauthorized => ResolutionError::unauthorized(),
            EvaluateFlagsBulkOutput::Forbidden => ResolutionError::forbidden(),
            EvaluateFlagsBulkOutput::TooManyRequests { retry_after } => {
                ResolutionError::too_many_requests(retry_after)
            }
            EvaluateFlagsBulkOutput::InternalServerError(body) => body.into(),
            EvaluateFlagsBulkOutput::Undocumented { status, .. } => {
                ResolutionError::unexpected_status(status.as_u16())
            }
        };
        BulkResolution::Failed(error)
    }

    /// A request that could not be completed at all.
    pub fn from_error(error: &Error) -> Self {
        BulkResolution::Failed(ResolutionError::general(error.to_string()))
    }

    /// Look up the entry for `flag_key`. Returns `None` unless the evaluation succeeded.
    pub fn flag(&self, flag_key: &str) -> Option<&BulkFlagEvaluation> {
        match self {
            BulkResolution::Evaluated { flags, .. } => {
                flags.iter().find(|flag| flag.key() == Some(flag_key))
            }
            BulkResolution::NotModified | BulkResolution::Failed(_) => None,
        }
    }
}

/// Outcome of a configuration request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationResolution {
    /// The server returned its configuration.
    Fetched {
        /// Entity tag to send as `If-None-Match` on the next request.
        etag: Option<String>,
        /// Server name and capabilities.
        configuration: ConfigurationResponse,
    },
    /// The configuration identified by the `If-None-Match` tag is still current.
    NotModified,
    /// The request failed.
    Failed(ResolutionError),
}

impl ConfigurationResolution {
    /// Map the routed response of a configuration request. `304` is not an error.
    pub fn from_output(output: GetConfigurationOutput) -> Self {
        let error = match output {
            GetConfigurationOutput::Ok { etag, body } => {
                return ConfigurationResolution::Fetched {
                    etag,
                    configuration: body,
                }
            }
            GetConfigurationOutput::NotModified => return ConfigurationResolution::NotModified,
            GetConfigurationOutput::Unauthorized => ResolutionError::unauthorized(),
            GetConfigurationOutput::Forbidden => ResolutionError::forbidden(),
            GetConfigurationOutput::InternalServerError(body) => body.into(),
            GetConfigurationOutput::Undocumented { status, .. } => {
                ResolutionError::unexpected_status(status.as_u16())
            }
        };
        ConfigurationResolution::Failed(error)
    }

    /// A request that could not be completed at all.
    pub fn from_error(error: &Error) -> Self {
        ConfigurationResolution::Failed(ResolutionError::general(error.to_string()))
    }
}
