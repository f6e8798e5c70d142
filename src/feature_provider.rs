//! [`FeatureProvider`] implementation, so an [`OfrepProvider`] can be registered with the
//! OpenFeature SDK.
//!
//! ```no_run
//! # async fn test() -> ofrep::Result<()> {
//! use open_feature::OpenFeature;
//! use ofrep::ProviderConfig;
//!
//! let provider = ProviderConfig::new("http://localhost:8016").to_provider()?;
//! OpenFeature::singleton_mut().await.set_provider(provider).await;
//!
//! let client = OpenFeature::singleton().await.create_client();
//! let enabled = client
//!     .get_bool_value("new-checkout", None, None)
//!     .await
//!     .unwrap_or(false);
//! # Ok(())
//! # }
//! ```
use async_trait::async_trait;
use chrono::DateTime;
use open_feature::{
    provider::{FeatureProvider, ProviderMetadata, ResolutionDetails},
    EvaluationContextFieldValue, EvaluationError, EvaluationErrorCode, EvaluationReason,
    EvaluationResult,
};
use serde_json::{Map, Number, Value};

use crate::{
    resolution::{ErrorCode, FlagMetadata, FlagResolution, Reason, ResolutionError, StructValue},
    schema::FlagMetadataValue,
    ContextError, EvaluationContext, FieldValue, ObjectValue, OfrepProvider,
};

#[async_trait]
impl FeatureProvider for OfrepProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn resolve_bool_value(
        &self,
        flag_key: &str,
        evaluation_context: &open_feature::EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<bool>> {
        let context = EvaluationContext::try_from(evaluation_context)?;
        let resolution = self.resolve(flag_key, false, Some(&context)).await;
        into_details(resolution, |value| value)
    }

    async fn resolve_int_value(
        &self,
        flag_key: &str,
        evaluation_context: &open_feature::EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<i64>> {
        let context = EvaluationContext::try_from(evaluation_context)?;
        let resolution = self.resolve(flag_key, 0_i64, Some(&context)).await;
        into_details(resolution, |value| value)
    }

    async fn resolve_float_value(
        &self,
        flag_key: &str,
        evaluation_context: &open_feature::EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<f64>> {
        let context = EvaluationContext::try_from(evaluation_context)?;
        let resolution = self.resolve(flag_key, 0.0, Some(&context)).await;
        into_details(resolution, |value| value)
    }

    async fn resolve_string_value(
        &self,
        flag_key: &str,
        evaluation_context: &open_feature::EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<String>> {
        let context = EvaluationContext::try_from(evaluation_context)?;
        let resolution = self.resolve(flag_key, String::new(), Some(&context)).await;
        into_details(resolution, |value| value)
    }

    async fn resolve_struct_value(
        &self,
        flag_key: &str,
        evaluation_context: &open_feature::EvaluationContext,
    ) -> EvaluationResult<ResolutionDetails<open_feature::StructValue>> {
        let context = EvaluationContext::try_from(evaluation_context)?;
        let resolution = self.resolve(flag_key, StructValue::new(), Some(&context)).await;
        into_details(resolution, struct_to_openfeature)
    }
}

/// The SDK applies the caller's default itself, so a failed resolution becomes an `Err`.
fn into_details<T, U>(
    resolution: FlagResolution<T>,
    convert: impl FnOnce(T) -> U,
) -> EvaluationResult<ResolutionDetails<U>> {
    if let Some(error) = resolution.error {
        return Err(error.into());
    }
    Ok(ResolutionDetails {
        value: convert(resolution.value),
        variant: resolution.variant,
        reason: resolution.reason.map(EvaluationReason::from),
        flag_metadata: metadata_to_openfeature(resolution.flag_metadata),
    })
}

impl From<Reason> for EvaluationReason {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::Static => EvaluationReason::Static,
            Reason::TargetingMatch => EvaluationReason::TargetingMatch,
            Reason::Default => EvaluationReason::Default,
            Reason::Split => EvaluationReason::Split,
            Reason::Cached => EvaluationReason::Cached,
            Reason::Disabled => EvaluationReason::Disabled,
            Reason::Unknown => EvaluationReason::Unknown,
            Reason::Error => EvaluationReason::Error,
            Reason::Stale => EvaluationReason::Other("STALE".to_owned()),
            Reason::Other(other) => EvaluationReason::Other(other),
        }
    }
}

impl From<ResolutionError> for EvaluationError {
    fn from(error: ResolutionError) -> Self {
        let code = match error.code {
            ErrorCode::ProviderNotReady => EvaluationErrorCode::ProviderNotReady,
            ErrorCode::FlagNotFound => EvaluationErrorCode::FlagNotFound,
            ErrorCode::ParseError => EvaluationErrorCode::ParseError,
            ErrorCode::TypeMismatch => EvaluationErrorCode::TypeMismatch,
            ErrorCode::TargetingKeyMissing => EvaluationErrorCode::TargetingKeyMissing,
            ErrorCode::InvalidContext => EvaluationErrorCode::InvalidContext,
            ErrorCode::General => {
                EvaluationErrorCode::General(error.message.clone().unwrap_or_default())
            }
            // Codes unknown to OpenFeature keep their wire name.
            ErrorCode::Other(code) => EvaluationErrorCode::General(code),
        };
        match error.message {
            Some(message) => EvaluationError::builder().code(code).message(message).build(),
            None => EvaluationError::builder().code(code).build(),
        }
    }
}

impl From<ContextError> for EvaluationError {
    fn from(error: ContextError) -> Self {
        ResolutionError::new(ErrorCode::InvalidContext, error.to_string()).into()
    }
}

fn metadata_to_openfeature(metadata: FlagMetadata) -> Option<open_feature::FlagMetadata> {
    if metadata.is_empty() {
        return None;
    }
    let metadata = metadata.into_iter().fold(
        open_feature::FlagMetadata::default(),
        |metadata, (key, value)| {
            let value = match value {
                FlagMetadataValue::Bool(b) => open_feature::FlagMetadataValue::Bool(b),
                FlagMetadataValue::String(s) => open_feature::FlagMetadataValue::String(s),
                FlagMetadataValue::Double(f) => open_feature::FlagMetadataValue::Float(f),
            };
            metadata.with_value(key, value)
        },
    );
    Some(metadata)
}

fn struct_to_openfeature(fields: StructValue) -> open_feature::StructValue {
    open_feature::StructValue {
        fields: fields
            .into_iter()
            .filter_map(|(key, value)| Some((key, json_to_openfeature(value)?)))
            .collect(),
    }
}

// OpenFeature values have no null, so nulls are dropped.
fn json_to_openfeature(value: Value) -> Option<open_feature::Value> {
    let value = match value {
        Value::Null => return None,
        Value::Bool(b) => open_feature::Value::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => open_feature::Value::Int(i),
            None => open_feature::Value::Float(n.as_f64()?),
        },
        Value::String(s) => open_feature::Value::String(s),
        Value::Array(values) => open_feature::Value::Array(
            values.into_iter().filter_map(json_to_openfeature).collect(),
        ),
        Value::Object(fields) => open_feature::Value::Struct(struct_to_openfeature(fields)),
    };
    Some(value)
}

impl TryFrom<&open_feature::EvaluationContext> for EvaluationContext {
    type Error = ContextError;

    /// Convert an OpenFeature context.
    ///
    /// Struct fields are accepted when they hold an [`open_feature::StructValue`], a
    /// `serde_json::Value`, or an [`ObjectValue`]. Any other struct payload is rejected.
    fn try_from(context: &open_feature::EvaluationContext) -> Result<Self, ContextError> {
        let mut converted = EvaluationContext {
            targeting_key: context.targeting_key.clone(),
            fields: Default::default(),
        };
        for (key, value) in &context.custom_fields {
            converted
                .fields
                .insert(key.clone(), field_from_openfeature(key, value)?);
        }
        Ok(converted)
    }
}

fn field_from_openfeature(
    field: &str,
    value: &EvaluationContextFieldValue,
) -> Result<FieldValue, ContextError> {
    let unsupported = || ContextError::Unsupported {
        field: field.to_owned(),
    };

    let value = match value {
        EvaluationContextFieldValue::Bool(b) => FieldValue::Bool(*b),
        EvaluationContextFieldValue::Int(i) => FieldValue::Int(*i),
        EvaluationContextFieldValue::Float(f) => FieldValue::Double(*f),
        EvaluationContextFieldValue::String(s) => FieldValue::String(s.clone()),
        EvaluationContextFieldValue::DateTime(date) => {
            DateTime::from_timestamp(date.unix_timestamp(), date.nanosecond())
                .map(FieldValue::Timestamp)
                .ok_or_else(unsupported)?
        }
        EvaluationContextFieldValue::Struct(any) => {
            if let Some(value) = any.downcast_ref::<open_feature::StructValue>() {
                FieldValue::from(Value::Object(struct_to_json(field, value)?))
            } else if let Some(value) = any.downcast_ref::<Value>() {
                FieldValue::from(value.clone())
            } else if let Some(value) = any.downcast_ref::<ObjectValue>() {
                FieldValue::Object(value.clone())
            } else {
                return Err(unsupported());
            }
        }
    };
    Ok(value)
}

fn struct_to_json(
    field: &str,
    value: &open_feature::StructValue,
) -> Result<Map<String, Value>, ContextError> {
    value
        .fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), openfeature_to_json(field, value)?)))
        .collect()
}

fn openfeature_to_json(field: &str, value: &open_feature::Value) -> Result<Value, ContextError> {
    let value = match value {
        open_feature::Value::Bool(b) => Value::Bool(*b),
        open_feature::Value::Int(i) => Value::Number((*i).into()),
        open_feature::Value::Float(f) => {
            Value::Number(Number::from_f64(*f).ok_or_else(|| ContextError::NonFiniteNumber {
                field: field.to_owned(),
            })?)
        }
        open_feature::Value::String(s) => Value::String(s.clone()),
        open_feature::Value::Array(values) => Value::Array(
            values
                .iter()
                .map(|value| openfeature_to_json(field, value))
                .collect::<Result<_, _>>()?,
        ),
        open_feature::Value::Struct(value) => Value::Object(struct_to_json(field, value)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use open_feature::{
        provider::FeatureProvider, EvaluationContextFieldValue, EvaluationErrorCode,
        EvaluationReason, FlagMetadataValue, OpenFeature,
    };
    use serde_json::json;

    use crate::{
        test_utils::{json_response, ClosureTransport, UnreachableTransport},
        ContextError, EvaluationContext, OfrepProvider, Transport, PROVIDER_NAME,
    };

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn provider(transport: Arc<dyn Transport>) -> OfrepProvider {
        OfrepProvider::with_transport("http://localhost:8016", transport).unwrap()
    }

    fn responding(status: u16, body: serde_json::Value) -> OfrepProvider {
        provider(ClosureTransport::new(move |_request| {
            Ok(json_response(status, body.clone()))
        }))
    }

    #[test]
    fn reports_metadata_through_the_sdk_trait() {
        let provider = provider(Arc::new(UnreachableTransport));
        assert_eq!(FeatureProvider::metadata(&provider).name, PROVIDER_NAME);
    }

    #[tokio::test]
    async fn resolves_details_with_reason_variant_and_metadata() {
        init();
        let provider = provider(ClosureTransport::new(|request: http::Request<Vec<u8>>| {
            let body: serde_json::Value = serde_json::from_slice(request.body()).unwrap();
            assert_eq!(
                body,
                json!({"context": {"targetingKey": "user-1", "plan": "pro", "seats": 12}})
            );
            Ok(json_response(
                200,
                json!({
                    "value": true,
                    "reason": "TARGETING_MATCH",
                    "variant": "on",
                    "metadata": {"team": "growth", "rollout": 0.5}
                }),
            ))
        }));
        let context = open_feature::EvaluationContext::default()
            .with_targeting_key("user-1")
            .with_custom_field("plan", "pro")
            .with_custom_field("seats", 12_i64);

        let details = FeatureProvider::resolve_bool_value(&provider, "flag", &context)
            .await
            .unwrap();

        assert!(details.value);
        assert_eq!(details.variant.as_deref(), Some("on"));
        assert_eq!(details.reason, Some(EvaluationReason::TargetingMatch));
        let metadata = details.flag_metadata.unwrap();
        assert_eq!(
            metadata.values.get("team"),
            Some(&FlagMetadataValue::String("growth".to_owned()))
        );
        assert_eq!(
            metadata.values.get("rollout"),
            Some(&FlagMetadataValue::Float(0.5))
        );
    }

    #[tokio::test]
    async fn resolves_every_type_through_the_sdk_trait() {
        init();
        let context = open_feature::EvaluationContext::default();

        let provider = responding(200, json!({"value": 42}));
        let details = FeatureProvider::resolve_int_value(&provider, "flag", &context)
            .await
            .unwrap();
        assert_eq!(details.value, 42);
        assert!(details.flag_metadata.is_none());

        let provider = responding(200, json!({"value": 4.2}));
        let details = FeatureProvider::resolve_float_value(&provider, "flag", &context)
            .await
            .unwrap();
        assert_eq!(details.value, 4.2);

        let provider = responding(200, json!({"value": "blue", "reason": "STALE"}));
        let details = FeatureProvider::resolve_string_value(&provider, "flag", &context)
            .await
            .unwrap();
        assert_eq!(details.value, "blue");
        assert_eq!(details.reason, Some(EvaluationReason::Other("STALE".to_owned())));

        let provider = responding(
            200,
            json!({"value": {"color": "red", "size": 3, "ratio": 1.5, "tags": ["a", null], "none": null, "nested": {"on": true}}}),
        );
        let details = FeatureProvider::resolve_struct_value(&provider, "flag", &context)
            .await
            .unwrap();
        let fields = details.value.fields;
        assert_eq!(fields["color"], open_feature::Value::String("red".to_owned()));
        assert_eq!(fields["size"], open_feature::Value::Int(3));
        assert_eq!(fields["ratio"], open_feature::Value::Float(1.5));
        assert_eq!(
            fields["tags"],
            open_feature::Value::Array(vec![open_feature::Value::String("a".to_owned())])
        );
        assert!(!fields.contains_key("none"));
        assert_eq!(
            fields["nested"],
            open_feature::Value::Struct(open_feature::StructValue {
                fields: HashMap::from([("on".to_owned(), open_feature::Value::Bool(true))]),
            })
        );
    }

    #[tokio::test]
    async fn failed_resolutions_become_evaluation_errors() {
        init();
        let context = open_feature::EvaluationContext::default();

        let provider = responding(
            404,
            json!({"key": "missing", "errorCode": "FLAG_NOT_FOUND", "errorDetails": "flag does not exist"}),
        );
        let error = FeatureProvider::resolve_bool_value(&provider, "missing", &context)
            .await
            .unwrap_err();
        assert_eq!(error.code, EvaluationErrorCode::FlagNotFound);
        assert_eq!(error.message.as_deref(), Some("flag does not exist"));

        let provider = responding(200, json!({"value": "not a number"}));
        let error = FeatureProvider::resolve_int_value(&provider, "flag", &context)
            .await
            .unwrap_err();
        assert_eq!(error.code, EvaluationErrorCode::TypeMismatch);
        assert_eq!(
            error.message.as_deref(),
            Some(r#"Expected flag value of type "Int" but received "String"."#)
        );

        let provider = responding(401, json!({}));
        let error = FeatureProvider::resolve_string_value(&provider, "flag", &context)
            .await
            .unwrap_err();
        assert_eq!(
            error.code,
            EvaluationErrorCode::General("Unauthorized.".to_owned())
        );

        let provider = responding(400, json!({"errorCode": "QUOTA_EXCEEDED"}));
        let error = FeatureProvider::resolve_bool_value(&provider, "flag", &context)
            .await
            .unwrap_err();
        assert_eq!(
            error.code,
            EvaluationErrorCode::General("QUOTA_EXCEEDED".to_owned())
        );
        assert_eq!(error.message, None);
    }

    #[tokio::test]
    async fn unsupported_struct_field_is_invalid_context() {
        init();
        struct Opaque;
        let provider = provider(Arc::new(UnreachableTransport));
        let context = open_feature::EvaluationContext::default().with_custom_field(
            "opaque",
            EvaluationContextFieldValue::Struct(Arc::new(Opaque)),
        );

        let error = FeatureProvider::resolve_bool_value(&provider, "flag", &context)
            .await
            .unwrap_err();

        assert_eq!(error.code, EvaluationErrorCode::InvalidContext);
        assert_eq!(
            error.message.as_deref(),
            Some("field \"opaque\" holds a value that cannot be sent")
        );
    }

    #[test]
    fn converts_struct_fields_to_plain_json() {
        let nested = open_feature::StructValue {
            fields: HashMap::from([
                ("name".to_owned(), open_feature::Value::String("rust".to_owned())),
                (
                    "versions".to_owned(),
                    open_feature::Value::Array(vec![
                        open_feature::Value::Int(1),
                        open_feature::Value::Float(2.5),
                    ]),
                ),
            ]),
        };
        let context = open_feature::EvaluationContext::default()
            .with_custom_field("language", EvaluationContextFieldValue::Struct(Arc::new(nested)))
            .with_custom_field(
                "raw",
                EvaluationContextFieldValue::Struct(Arc::new(json!({"a": [true]}))),
            );

        let converted = EvaluationContext::try_from(&context).unwrap();

        assert_eq!(
            serde_json::to_value(converted.to_wire().unwrap()).unwrap(),
            json!({
                "language": {"name": "rust", "versions": [1, 2.5]},
                "raw": {"a": [true]}
            })
        );
    }

    #[test]
    fn rejects_non_finite_floats_inside_structs() {
        let nested = open_feature::StructValue {
            fields: HashMap::from([("ratio".to_owned(), open_feature::Value::Float(f64::NAN))]),
        };
        let context = open_feature::EvaluationContext::default()
            .with_custom_field("stats", EvaluationContextFieldValue::Struct(Arc::new(nested)));

        assert!(matches!(
            EvaluationContext::try_from(&context),
            Err(ContextError::NonFiniteNumber { field }) if field == "stats"
        ));
    }

    #[tokio::test]
    async fn registers_with_the_openfeature_sdk() {
        init();
        let provider = responding(
            200,
            json!({"value": "blue", "reason": "STATIC", "variant": "b"}),
        );
        OpenFeature::singleton_mut()
            .await
            .set_provider(provider)
            .await;
        let client = OpenFeature::singleton().await.create_client();

        let value = client
            .get_string_value("color", None, None)
            .await
            .unwrap_or_else(|_| "red".to_owned());

        assert_eq!(value, "blue");
    }
}
