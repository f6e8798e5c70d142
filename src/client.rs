//! Low-level OFREP protocol client.
//!
//! [`OfrepClient`] builds requests for the three OFREP operations and routes responses by status
//! code into closed output enums. It does not interpret them any further; see
//! [`resolution`](crate::resolution) for that.
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use http::{
    header::{ACCEPT, CONTENT_TYPE, ETAG, IF_NONE_MATCH, RETRY_AFTER},
    HeaderMap, HeaderValue, Method, Request, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    schema::{
        BulkEvaluationFailure, BulkEvaluationSuccess, ConfigurationResponse, EvaluationFailure,
        EvaluationRequest, GeneralErrorResponse, ServerEvaluationSuccess,
    },
    transport::Transport,
    Error, Result,
};

/// Operation id of single-flag evaluation, passed to [`Transport::send`].
pub const EVALUATE_FLAG: &str = "evaluateFlag";
/// Operation id of bulk evaluation.
pub const EVALUATE_FLAGS_BULK: &str = "evaluateFlagsBulk";
/// Operation id of the configuration request.
pub const GET_CONFIGURATION: &str = "getConfiguration";

const APPLICATION_JSON: &str = "application/json";

/// Response to `POST /ofrep/v1/evaluate/flags/{key}`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluateFlagOutput {
    /// `200`: the flag was evaluated.
    Ok(ServerEvaluationSuccess),
    /// `400`: the server rejected the evaluation.
    BadRequest(EvaluationFailure),
    /// `404`: the flag does not exist.
    NotFound(EvaluationFailure),
    /// `401`.
    Unauthorized,
    /// `403`.
    Forbidden,
    /// `429`, with the parsed `Retry-After` header if present.
    TooManyRequests {
        /// When the client may retry.
        retry_after: Option<DateTime<Utc>>,
    },
    /// `500`.
    InternalServerError(GeneralErrorResponse),
    /// A status code the protocol does not define for this operation.
    Undocumented {
        /// Status received.
        status: StatusCode,
        /// Raw response body.
        body: Vec<u8>,
    },
}

/// Response to `POST /ofrep/v1/evaluate/flags`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluateFlagsBulkOutput {
    /// `200`: all flags were evaluated.
    Ok {
        /// Value of the `ETag` header.
        etag: Option<String>,
        /// Evaluated flags.
        body: BulkEvaluationSuccess,
    },
    /// `304`: the `If-None-Match` tag is still current.
    NotModified,
    /// `400`: the evaluation failed as a whole.
    BadRequest(BulkEvaluationFailure),
    /// `401`.
    Unauthorized,
    /// `403`.
    Forbidden,
    /// `429`, with the parsed `Retry-After` header if present.
    TooManyRequests {
        /// When the client may retry.
        retry_after: Option<DateTime<Utc>>,
    },
    /// `500`.
    InternalServerError(GeneralErrorResponse),
    /// A status code the protocol does not define for this operation.
    Undocumented {
        /// Status received.
        status: StatusCode,
        /// Raw response body.
        body: Vec<u8>,
    },
}

/// Response to `GET /ofrep/v1/configuration`.
#[derive(Debug, Clone, PartialEq)]
pub enum GetConfigurationOutput {
    /// `200`.
    Ok {
        /// Value of the `ETag` header.
        etag: Option<String>,
        /// Server configuration.
        body: ConfigurationResponse,
    },
    /// `304`.
    NotModified,
    /// `401`.
    Unauthorized,
    /// `403`.
    Forbidden,
    /// `500`.
    InternalServerError(GeneralErrorResponse),
    /// Any other status, including `429`.
    Undocumented {
        /// Status received.
        status: StatusCode,
        /// Raw response body.
        body: Vec<u8>,
    },
}

/// OFREP protocol client.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct OfrepClient {
    base_url: Url,
    transport: Arc<dyn Transport>,
    headers: HeaderMap,
}

impl OfrepClient {
    /// Create a client sending requests relative to `base_url` through `transport`.
    ///
    /// OFREP paths are appended to the path of `base_url`, so `https://flags.example.com/api`
    /// evaluates flags at `https://flags.example.com/api/ofrep/v1/evaluate/flags/{key}`.
    pub fn new(base_url: Url, transport: Arc<dyn Transport>) -> Result<OfrepClient> {
        if base_url.cannot_be_a_base() {
            return Err(Error::BaseUrlCannotBeABase);
        }
        Ok(OfrepClient {
            base_url,
            transport,
            headers: HeaderMap::new(),
        })
    }

    /// Headers to send with every request (e.g., `Authorization`).
    pub fn with_headers(mut self, headers: HeaderMap) -> OfrepClient {
        self.headers = headers;
        self
    }

    /// URL the OFREP paths are appended to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Transport requests are sent through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Evaluate a single flag.
    ///
    /// The key is percent-encoded into one path segment. Keys that a URL resolver would collapse
    /// (`""`, `"."` and `".."`) are rejected with [`Error::InvalidFlagKey`] without a request.
    pub async fn evaluate_flag(
        &self,
        key: &str,
        request: &EvaluationRequest,
    ) -> Result<EvaluateFlagOutput> {
        if matches!(key, "" | "." | "..") {
            return Err(Error::InvalidFlagKey(key.to_owned()));
        }
        let request = self.build_request(
            Method::POST,
            &["evaluate", "flags", key],
            Some(request),
            None,
        )?;
        let response = self.send(request, EVALUATE_FLAG).await?;
        let body = response.body();

        let output = match response.status() {
            StatusCode::OK => EvaluateFlagOutput::Ok(decode(EVALUATE_FLAG, body)?),
            StatusCode::BAD_REQUEST => EvaluateFlagOutput::BadRequest(decode(EVALUATE_FLAG, body)?),
            StatusCode::NOT_FOUND => EvaluateFlagOutput::NotFound(decode(EVALUATE_FLAG, body)?),
            StatusCode::UNAUTHORIZED => EvaluateFlagOutput::Unauthorized,
            StatusCode::FORBIDDEN => EvaluateFlagOutput::Forbidden,
            StatusCode::TOO_MANY_REQUESTS => EvaluateFlagOutput::TooManyRequests {
                retry_after: retry_after(&response),
            },
            StatusCode::INTERNAL_SERVER_ERROR => {
                EvaluateFlagOutput::InternalServerError(decode_general_error(EVALUATE_FLAG, body)?)
            }
            status => EvaluateFlagOutput::Undocumented {
                status,
                body: response.into_body(),
            },
        };
        Ok(output)
    }

    /// Evaluate all flags at once.
    ///
    /// Pass the `ETag` of a previous evaluation as `if_none_match` to receive
    /// [`EvaluateFlagsBulkOutput::NotModified`] when nothing changed.
    pub async fn evaluate_flags_bulk(
        &self,
        request: &EvaluationRequest,
        if_none_match: Option<&str>,
    ) -> Result<EvaluateFlagsBulkOutput> {
        let request = self.build_request(
            Method::POST,
            &["evaluate", "flags"],
            Some(request),
            if_none_match,
        )?;
        let response = self.send(request, EVALUATE_FLAGS_BULK).await?;
        let body = response.body();

        let output = match response.status() {
            StatusCode::OK => EvaluateFlagsBulkOutput::Ok {
                etag: etag(&response),
                body: decode(EVALUATE_FLAGS_BULK, body)?,
            },
            StatusCode::NOT_MODIFIED => EvaluateFlagsBulkOutput::NotModified,
            StatusCode::BAD_REQUEST => {
                EvaluateFlagsBulkOutput::BadRequest(decode(EVALUATE_FLAGS_BULK, body)?)
            }
            StatusCode::UNAUTHORIZED => EvaluateFlagsBulkOutput::Unauthorized,
            StatusCode::FORBIDDEN => EvaluateFlagsBulkOutput::Forbidden,
            StatusCode::TOO_MANY_REQUESTS => EvaluateFlagsBulkOutput::TooManyRequests {
                retry_after: retry_after(&response),
            },
            StatusCode::INTERNAL_SERVER_ERROR => EvaluateFlagsBulkOutput::InternalServerError(
                decode_general_error(EVALUATE_FLAGS_BULK, body)?,
            ),
            status => EvaluateFlagsBulkOutput::Undocumented {
                status,
                body: response.into_body(),
            },
        };
        Ok(output)
    }

    /// Fetch the server configuration.
    pub async fn get_configuration(
        &self,
        if_none_match: Option<&str>,
    ) -> Result<GetConfigurationOutput> {
        let request =
            self.build_request(Method::GET, &["configuration"], None, if_none_match)?;
        let response = self.send(request, GET_CONFIGURATION).await?;
        let body = response.body();

        let output = match response.status() {
            StatusCode::OK => GetConfigurationOutput::Ok {
                etag: etag(&response),
                body: decode(GET_CONFIGURATION, body)?,
            },
            StatusCode::NOT_MODIFIED => GetConfigurationOutput::NotModified,
            StatusCode::UNAUTHORIZED => GetConfigurationOutput::Unauthorized,
            StatusCode::FORBIDDEN => GetConfigurationOutput::Forbidden,
            StatusCode::INTERNAL_SERVER_ERROR => GetConfigurationOutput::InternalServerError(
                decode_general_error(GET_CONFIGURATION, body)?,
            ),
            status => GetConfigurationOutput::Undocumented {
                status,
                body: response.into_body(),
            },
        };
        Ok(output)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::BaseUrlCannotBeABase)?
            .pop_if_empty()
            .extend(["ofrep", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn build_request(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&EvaluationRequest>,
        if_none_match: Option<&str>,
    ) -> Result<Request<Vec<u8>>> {
        let url = self.url(segments)?;

        let mut builder = Request::builder().method(method).uri(url.as_str());
        if let Some(etag) = if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        let body = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, APPLICATION_JSON);
                serde_json::to_vec(body).map_err(|err| Error::Encode(Arc::new(err)))?
            }
            None => Vec::new(),
        };

        let mut request = builder.body(body)?;
        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        Ok(request)
    }

    async fn send(
        &self,
        request: Request<Vec<u8>>,
        operation_id: &'static str,
    ) -> Result<Response<Vec<u8>>> {
        let response = self
            .transport
            .send(request, &self.base_url, operation_id)
            .await?;
        log::debug!(target: "ofrep",
                    operation_id,
                    status = response.status().as_u16();
                    "received response");
        Ok(response)
    }
}

fn decode<T: DeserializeOwned>(operation_id: &'static str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|err| Error::Decode {
        operation_id,
        source: Arc::new(err),
    })
}

// The body of a 500 carries nothing but optional details, so an empty one is accepted.
fn decode_general_error(operation_id: &'static str, body: &[u8]) -> Result<GeneralErrorResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(GeneralErrorResponse::default());
    }
    decode(operation_id, body)
}

fn etag(response: &Response<Vec<u8>>) -> Option<String> {
    let value = response.headers().get(ETAG)?;
    match value.to_str() {
        Ok(etag) => Some(etag.to_owned()),
        Err(_) => {
            log::debug!(target: "ofrep", etag:? = value; "ignoring non-ASCII ETag header");
            None
        }
    }
}

fn retry_after(response: &Response<Vec<u8>>) -> Option<DateTime<Utc>> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    let retry_after = parse_retry_after(value, Utc::now());
    if retry_after.is_none() {
        log::debug!(target: "ofrep", retry_after = value; "ignoring unparsable Retry-After header");
    }
    retry_after
}

/// Parse a `Retry-After` header value.
///
/// Accepts RFC 3339 timestamps, HTTP-dates (RFC 2822), and delay-seconds relative to `now`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    let seconds = value.parse::<i64>().ok().filter(|s| *s >= 0)?;
    now.checked_add_signed(TimeDelta::try_seconds(seconds)?)
}
