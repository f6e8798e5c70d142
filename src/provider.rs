use std::{future::Future, sync::Arc};

use open_feature::provider::ProviderMetadata;
use url::Url;

use crate::{
    client::OfrepClient,
    resolution::{
        BulkResolution, ConfigurationResolution, ErrorCode, FlagResolution, FlagType,
        ResolutionError, StructValue,
    },
    schema::EvaluationRequest,
    transport::Transport,
    Error, EvaluationContext, Result,
};

/// Name reported in the provider's [`ProviderMetadata`].
pub const PROVIDER_NAME: &str = "OpenFeature Remote Evaluation Protocol Provider";

/// A feature flag provider that evaluates flags remotely over OFREP.
///
/// Resolution methods never fail: on any error they return the default value along with a
/// [`ResolutionError`] describing what went wrong.
///
/// The provider also implements [`FeatureProvider`](open_feature::provider::FeatureProvider), so
/// it can be registered with the OpenFeature SDK.
///
/// # Examples
/// ```no_run
/// # async fn test() -> ofrep::Result<()> {
/// use ofrep::{EvaluationContext, ProviderConfig};
///
/// let provider = ProviderConfig::new("http://localhost:8016").to_provider()?;
/// let context = EvaluationContext::new().with_targeting_key("user-42");
///
/// let resolution = provider
///     .resolve_bool_value("new-checkout", false, Some(&context))
///     .await;
/// if resolution.value {
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OfrepProvider {
    pub(crate) metadata: ProviderMetadata,
    client: OfrepClient,
}

impl OfrepProvider {
    /// Create a provider sending requests through a custom `transport`.
    ///
    /// Use [`ProviderConfig`](crate::ProviderConfig) for the default HTTP transport.
    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> Result<OfrepProvider> {
        let base_url = Url::parse(base_url).map_err(Error::InvalidBaseUrl)?;
        Ok(OfrepProvider::from_client(OfrepClient::new(base_url, transport)?))
    }

    pub(crate) fn from_client(client: OfrepClient) -> OfrepProvider {
        OfrepProvider {
            metadata: ProviderMetadata::new(PROVIDER_NAME),
            client,
        }
    }

    /// The underlying protocol client, for raw access to OFREP responses.
    pub fn client(&self) -> &OfrepClient {
        &self.client
    }

    /// Resolve a boolean flag.
    pub async fn resolve_bool_value(
        &self,
        flag_key: &str,
        default_value: bool,
        context: Option<&EvaluationContext>,
    ) -> FlagResolution<bool> {
        self.resolve(flag_key, default_value, context).await
    }

    /// Resolve a string flag.
    pub async fn resolve_string_value(
        &self,
        flag_key: &str,
        default_value: impl Into<String>,
        context: Option<&EvaluationContext>,
    ) -> FlagResolution<String> {
        self.resolve(flag_key, default_value.into(), context).await
    }

    /// Resolve an integer flag. Numbers with a fractional part are a type mismatch.
    pub async fn resolve_int_value(
        &self,
        flag_key: &str,
        default_value: i64,
        context: Option<&EvaluationContext>,
    ) -> FlagResolution<i64> {
        self.resolve(flag_key, default_value, context).await
    }

    /// Resolve a floating-point flag. Integral numbers are a type mismatch.
    pub async fn resolve_float_value(
        &self,
        flag_key: &str,
        default_value: f64,
        context: Option<&EvaluationContext>,
    ) -> FlagResolution<f64> {
        self.resolve(flag_key, default_value, context).await
    }

    /// Resolve a flag whose value is a JSON object.
    pub async fn resolve_struct_value(
        &self,
        flag_key: &str,
        default_value: StructValue,
        context: Option<&EvaluationContext>,
    ) -> FlagResolution<StructValue> {
        self.resolve(flag_key, default_value, context).await
    }

    /// Resolve a flag to a value of type `T`.
    ///
    /// The typed `resolve_*_value` methods delegate here.
    pub async fn resolve<T: FlagType>(
        &self,
        flag_key: &str,
        default_value: T,
        context: Option<&EvaluationContext>,
    ) -> FlagResolution<T> {
        let resolution = match EvaluationRequest::from_context(context) {
            Ok(request) => match self.client.evaluate_flag(flag_key, &request).await {
                Ok(output) => FlagResolution::from_output(output, default_value),
                Err(err) => FlagResolution::from_error(&err, default_value),
            },
            Err(err) => FlagResolution::from_context_error(&err, default_value),
        };

        if let Some(error) = &resolution.error {
            log::warn!(target: "ofrep",
                       flag_key,
                       error_code:display = error.code;
                       "flag resolved to default value: {error}");
        }
        log::trace!(target: "ofrep",
                    flag_key,
                    resolution:serde = resolution;
                    "resolved a flag");

        resolution
    }

    /// Evaluate all flags for `context` at once.
    ///
    /// Pass the `etag` of a previous [`BulkResolution::Evaluated`] as `if_none_match` to get
    /// [`BulkResolution::NotModified`] when nothing changed.
    pub async fn evaluate_all_flags(
        &self,
        context: Option<&EvaluationContext>,
        if_none_match: Option<&str>,
    ) -> BulkResolution {
        let request = match EvaluationRequest::from_context(context) {
            Ok(request) => request,
            Err(err) => {
                return BulkResolution::Failed(ResolutionError::new(
                    ErrorCode::InvalidContext,
                    err.to_string(),
                ))
            }
        };

        let resolution = match self.client.evaluate_flags_bulk(&request, if_none_match).await {
            Ok(output) => BulkResolution::from_output(output),
            Err(err) => BulkResolution::from_error(&err),
        };
        if let BulkResolution::Failed(error) = &resolution {
            log::warn!(target: "ofrep", error_code:display = error.code; "bulk evaluation failed: {error}");
        }
        resolution
    }

    /// Fetch the server configuration.
    pub async fn configuration(&self, if_none_match: Option<&str>) -> ConfigurationResolution {
        let resolution = match self.client.get_configuration(if_none_match).await {
            Ok(output) => ConfigurationResolution::from_output(output),
            Err(err) => ConfigurationResolution::from_error(&err),
        };
        if let ConfigurationResolution::Failed(error) = &resolution {
            log::warn!(target: "ofrep", error_code:display = error.code; "fetching configuration failed: {error}");
        }
        resolution
    }

    /// Wait for `shutdown_signal`, then shut the transport down.
    ///
    /// The transport is shut down even if waiting for the signal fails; that failure is returned
    /// afterwards.
    ///
    /// ```no_run
    /// # async fn test(provider: ofrep::OfrepProvider) -> ofrep::Result<()> {
    /// provider.run(tokio::signal::ctrl_c()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, shutdown_signal: impl Future<Output = std::io::Result<()>>) -> Result<()> {
        let signal = shutdown_signal.await;
        if let Err(err) = &signal {
            log::warn!(target: "ofrep", "failed to wait for shutdown signal: {err}");
        }

        log::debug!(target: "ofrep", "shutting down");
        self.shutdown().await?;
        log::debug!(target: "ofrep", "shut down");

        signal.map_err(Error::from)
    }

    /// Shut the transport down immediately.
    ///
    /// Transports built around a caller-supplied HTTP client are left untouched.
    pub async fn shutdown(&self) -> Result<()> {
        self.client.transport().shutdown_gracefully().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use chrono::{TimeZone, Utc};
    use http::{header::IF_NONE_MATCH, HeaderValue};
    use serde::{ser::Error as _, Serialize, Serializer};
    use serde_json::json;

    use super::OfrepProvider;
    use crate::{
        resolution::{BulkResolution, ConfigurationResolution, ErrorCode, Reason, StructValue},
        test_utils::{empty_response, json_response, ClosureTransport, RecordingTransport, UnreachableTransport},
        Error, EvaluationContext, FieldValue, FlagResolution, ResolutionError, Transport,
        TransportError,
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

    #[tokio::test]
    async fn resolves_static_flag_without_context() {
        init();
        let provider = provider(ClosureTransport::new(|request: http::Request<Vec<u8>>| {
            assert_eq!(request.body().as_slice(), b"{}");
            Ok(json_response(200, json!({"value": true, "reason": "STATIC", "variant": "on"})))
        }));

        let resolution = provider.resolve_bool_value("static-on", false, None).await;

        assert_eq!(resolution.value, true);
        assert_eq!(resolution.error, None);
        assert_eq!(resolution.reason, Some(Reason::Static));
        assert_eq!(resolution.variant.as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn resolves_every_type() {
        init();
        let provider = responding(200, json!({"value": "Hello", "variant": "b"}));
        assert_eq!(
            provider.resolve_string_value("flag", "default", None).await.value,
            "Hello"
        );

        let provider = responding(200, json!({"value": 42}));
        assert_eq!(provider.resolve_int_value("flag", 0, None).await.value, 42);

        let provider = responding(200, json!({"value": 4.2}));
        assert_eq!(provider.resolve_float_value("flag", 0.0, None).await.value, 4.2);

        let provider = responding(200, json!({"value": {"color": "red"}}));
        let resolution = provider
            .resolve_struct_value("flag", StructValue::new(), None)
            .await;
        assert_eq!(resolution.value["color"], "red");
    }

    #[tokio::test]
    async fn integer_flag_does_not_resolve_as_double() {
        init();
        let provider = responding(200, json!({"value": 42, "variant": "answer"}));

        let resolution = provider.resolve_float_value("flag", 1.5, None).await;

        assert_eq!(resolution.value, 1.5);
        assert_eq!(resolution.reason, Some(Reason::Error));
        assert_eq!(resolution.variant.as_deref(), Some("answer"));
        assert_eq!(
            resolution.error,
            Some(ResolutionError::new(
                ErrorCode::TypeMismatch,
                r#"Expected flag value of type "Double" but received "Int"."#
            ))
        );
    }

    #[tokio::test]
    async fn missing_flag_falls_back_to_default() {
        init();
        let provider = responding(
            404,
            json!({"key": "missing-flag", "errorCode": "FLAG_NOT_FOUND", "errorDetails": "flag does not exist"}),
        );

        let resolution = provider.resolve_bool_value("missing-flag", true, None).await;

        assert_eq!(
            resolution,
            FlagResolution::failed(
                true,
                ResolutionError::new(ErrorCode::FlagNotFound, "flag does not exist")
            )
        );
    }

    #[tokio::test]
    async fn rate_limited_with_retry_date() {
        init();
        let provider = provider(ClosureTransport::new(|_request| {
            let mut response = empty_response(429);
            response.headers_mut().insert(
                http::header::RETRY_AFTER,
                HeaderValue::from_static("2025-01-26T23:54:16Z"),
            );
            Ok(response)
        }));

        let resolution = provider.resolve_bool_value("flag", false, None).await;

        assert_eq!(resolution.value, false);
        assert_eq!(resolution.reason, Some(Reason::Error));
        assert_eq!(
            resolution.error,
            Some(ResolutionError::general(
                r#"Too many requests. Retry after "2025-01-26T23:54:16Z"."#
            ))
        );
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_default() {
        init();
        let provider = provider(ClosureTransport::new(|_request| {
            Err(TransportError::other("Example error."))
        }));

        let resolution = provider.resolve_int_value("flag", 7, None).await;

        assert_eq!(
            resolution,
            FlagResolution::failed(7, ResolutionError::general("Example error."))
        );
    }

    #[tokio::test]
    async fn dot_segment_keys_fall_back_to_default_without_a_request() {
        init();
        let provider = provider(Arc::new(UnreachableTransport));

        for key in ["", ".", ".."] {
            let resolution = provider.resolve_bool_value(key, true, None).await;

            assert_eq!(
                resolution,
                FlagResolution::failed(
                    true,
                    ResolutionError::general(format!(
                        "flag key {key:?} cannot be used as a path segment"
                    ))
                )
            );
        }
    }

    #[tokio::test]
    async fn invalid_context_is_reported_without_a_request() {
        init();
        struct Failing;
        impl Serialize for Failing {
            fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
                Err(S::Error::custom("An error description."))
            }
        }
        let provider = provider(Arc::new(UnreachableTransport));
        let context = EvaluationContext::new()
            .with_targeting_key("user-1")
            .with_field("object", FieldValue::object(Failing));

        let resolution = provider
            .resolve_string_value("flag", "default", Some(&context))
            .await;

        assert_eq!(
            resolution,
            FlagResolution::failed(
                "default".to_owned(),
                ResolutionError::new(ErrorCode::InvalidContext, "An error description.")
            )
        );

        let bulk = provider.evaluate_all_flags(Some(&context), None).await;
        assert_eq!(
            bulk,
            BulkResolution::Failed(ResolutionError::new(
                ErrorCode::InvalidContext,
                "An error description."
            ))
        );
    }

    #[tokio::test]
    async fn sends_context_with_timestamp_fields() {
        init();
        let provider = provider(ClosureTransport::new(|request: http::Request<Vec<u8>>| {
            let body: serde_json::Value = serde_json::from_slice(request.body()).unwrap();
            assert_eq!(
                body,
                json!({"context": {"targetingKey": "user-1", "signup": 42.0}})
            );
            Ok(json_response(200, json!({"value": true})))
        }));
        let context = EvaluationContext::new()
            .with_targeting_key("user-1")
            .with_field("signup", Utc.timestamp_opt(42, 0).unwrap());

        let resolution = provider.resolve_bool_value("flag", false, Some(&context)).await;
        assert_eq!(resolution.error, None);
    }

    #[tokio::test]
    async fn bulk_evaluation_not_modified() {
        init();
        let provider = provider(ClosureTransport::new(|request: http::Request<Vec<u8>>| {
            assert_eq!(request.headers()[IF_NONE_MATCH], "\"abc\"");
            Ok(empty_response(304))
        }));

        let resolution = provider.evaluate_all_flags(None, Some("\"abc\"")).await;
        assert_eq!(resolution, BulkResolution::NotModified);
    }

    #[tokio::test]
    async fn configuration_failure() {
        init();
        let provider = responding(401, json!({}));

        assert_eq!(
            provider.configuration(None).await,
            ConfigurationResolution::Failed(ResolutionError::general("Unauthorized."))
        );
    }

    #[tokio::test]
    async fn run_shuts_transport_down_after_signal() {
        init();
        let transport = RecordingTransport::new();
        let provider = provider(transport.clone());

        provider.run(async { Ok(()) }).await.unwrap();

        assert_eq!(transport.shutdowns(), 1);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn run_shuts_transport_down_when_signal_fails() {
        init();
        let transport = RecordingTransport::new();
        let provider = provider(transport.clone());

        let result = provider
            .run(async { Err(io::Error::other("no signal handler")) })
            .await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(transport.shutdowns(), 1);
    }

    #[tokio::test]
    async fn unexpected_status_from_recording_transport() {
        init();
        let transport = RecordingTransport::new();
        let provider = provider(transport.clone());

        let resolution = provider.resolve_bool_value("flag", true, None).await;

        assert_eq!(
            resolution.error,
            Some(ResolutionError::general(
                r#"Received unexpected response status code "501"."#
            ))
        );
        assert_eq!(transport.requests()[0].operation_id, "evaluateFlag");
    }
}
