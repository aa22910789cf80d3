//! Transport wrapper that logs every exchange

use std::time::Instant;

use async_trait::async_trait;

use super::Transport;
use crate::request::Request;
use crate::response::{RawResponse, Response};

/// Logs method, URL, status and latency of each exchange at debug level
#[derive(Debug, Clone, Default)]
pub struct TracingTransport<T> {
    inner: T,
}

impl<T> TracingTransport<T> {
    /// Wrap `inner`
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for TracingTransport<T> {
    async fn round_trip(&self, request: Request) -> Response<RawResponse> {
        let method = request.method().clone();
        let url = request.url().clone();
        let id = request.id();
        let started = Instant::now();

        tracing::debug!(request_id = %id, %method, %url, "Sending request");
        let result = self.inner.round_trip(request).await;

        match &result {
            Ok(response) => tracing::debug!(
                request_id = %id,
                %method,
                %url,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Received response"
            ),
            Err(err) => tracing::debug!(
                request_id = %id,
                %method,
                %url,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Exchange failed: {}",
                err
            ),
        }
        result
    }

    fn nested_transport(&self) -> Option<&dyn Transport> {
        Some(&self.inner)
    }
}
