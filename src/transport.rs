//! HTTP transport used by [`OfrepClient`](crate::OfrepClient).
use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use url::Url;

use crate::TransportError;

/// Sends fully-built OFREP requests.
///
/// The client builds absolute request URLs, so most implementations can ignore `base_url`. It is
/// passed along (together with the `operation_id`, e.g. `"evaluateFlag"`) for transports that
/// route, record, or instrument requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the server response, whatever its status code.
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
        base_url: &Url,
        operation_id: &str,
    ) -> Result<http::Response<Vec<u8>>, TransportError>;

    /// Release resources held by the transport. Must be idempotent.
    async fn shutdown_gracefully(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Default transport backed by [`reqwest::Client`].
///
/// A transport created with [`ReqwestTransport::new`] owns its client and drops it on shutdown;
/// any later request fails with [`TransportError::ShutDown`]. A transport created with
/// [`ReqwestTransport::with_client`] shares the caller's client and never shuts it down.
pub struct ReqwestTransport {
    // Client holds a connection pool internally, so it's reused between requests.
    client: RwLock<Option<reqwest::Client>>,
    owned: bool,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Create a transport with its own HTTP client.
    pub fn new(timeout: Option<Duration>) -> Result<ReqwestTransport, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(ReqwestTransport {
            client: RwLock::new(Some(client)),
            owned: true,
            timeout,
        })
    }

    /// Create a transport that shares `client` with the caller.
    pub fn with_client(client: reqwest::Client, timeout: Option<Duration>) -> ReqwestTransport {
        ReqwestTransport {
            client: RwLock::new(Some(client)),
            owned: false,
            timeout,
        }
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
        _base_url: &Url,
        operation_id: &str,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        let client = self.client().ok_or(TransportError::ShutDown)?;

        let mut request = reqwest::Request::try_from(request)?;
        if self.timeout.is_some() {
            *request.timeout_mut() = self.timeout;
        }

        log::debug!(target: "ofrep",
                    operation_id,
                    method:display = request.method(),
                    url:display = request.url();
                    "sending request");
        let response = client.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut response = http::Response::new(body.to_vec());
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }

    async fn shutdown_gracefully(&self) -> Result<(), TransportError> {
        if self.owned {
            let client = self
                .client
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if client.is_some() {
                log::debug!(target: "ofrep", "released HTTP client");
            }
        }
        Ok(())
    }
}
