//! Transports for unit tests.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;
use url::Url;

use crate::{Transport, TransportError};

type Response = http::Response<Vec<u8>>;

pub fn empty_response(status: u16) -> Response {
    http::Response::builder()
        .status(status)
        .body(Vec::new())
        .unwrap()
}

pub fn json_response(status: u16, body: serde_json::Value) -> Response {
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(&body).unwrap())
        .unwrap()
}

/// Answers every request with the result of a closure.
pub struct ClosureTransport<F> {
    handler: F,
}

impl<F> ClosureTransport<F>
where
    F: Fn(http::Request<Vec<u8>>) -> Result<Response, TransportError> + Send + Sync,
{
    pub fn new(handler: F) -> Arc<ClosureTransport<F>> {
        Arc::new(ClosureTransport { handler })
    }
}

#[async_trait]
impl<F> Transport for ClosureTransport<F>
where
    F: Fn(http::Request<Vec<u8>>) -> Result<Response, TransportError> + Send + Sync,
{
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
        _base_url: &Url,
        _operation_id: &str,
    ) -> Result<Response, TransportError> {
        (self.handler)(request)
    }
}

pub struct RecordedRequest {
    pub request: http::Request<Vec<u8>>,
    pub base_url: Url,
    pub operation_id: String,
}

/// Records requests and shutdowns. Answers every request with `501 Not Implemented`.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    shutdowns: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport::default())
    }

    pub fn requests(&self) -> MutexGuard<'_, Vec<RecordedRequest>> {
        self.requests.lock().unwrap()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
        base_url: &Url,
        operation_id: &str,
    ) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            request,
            base_url: base_url.clone(),
            operation_id: operation_id.to_owned(),
        });
        Ok(empty_response(501))
    }

    async fn shutdown_gracefully(&self) -> Result<(), TransportError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the test if any request is sent.
pub struct UnreachableTransport;

#[async_trait]
impl Transport for UnreachableTransport {
    async fn send(
        &self,
        _request: http::Request<Vec<u8>>,
        _base_url: &Url,
        operation_id: &str,
    ) -> Result<Response, TransportError> {
        panic!("unexpected {operation_id} request");
    }
}
