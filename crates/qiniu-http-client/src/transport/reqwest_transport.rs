//! reqwest-based transport

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use http::header::CONTENT_LENGTH;
use tokio_util::sync::CancellationToken;

use super::{CancelRequest, Transport};
use crate::error::HttpError;
use crate::request::{Request, RequestBody, RequestId};
use crate::response::{RawResponse, Response};

type InFlight = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

/// Default transport, backed by a shared `reqwest::Client`
///
/// Every exchange is registered under its [`RequestId`] while it runs, so
/// [`CancelRequest::cancel_request`] can abort it.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    in_flight: InFlight,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Create a new transport with default settings
    pub fn new() -> Self {
        Self::from_reqwest(reqwest::Client::new())
    }

    /// Create a new transport builder
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Create a transport from a configured reqwest::Client
    pub fn from_reqwest(client: reqwest::Client) -> Self {
        Self {
            inner: client,
            in_flight: Arc::default(),
        }
    }

    /// Number of exchanges currently registered
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|map| map.len()).unwrap_or_default()
    }
}

/// Removes an exchange from the in-flight table when it finishes
struct Registration {
    id: RequestId,
    in_flight: InFlight,
}

impl Registration {
    fn new(in_flight: &InFlight, id: RequestId, token: CancellationToken) -> Self {
        if let Ok(mut map) = in_flight.lock() {
            map.insert(id, token);
        }
        Self {
            id,
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut map) = self.in_flight.lock() {
            map.remove(&self.id);
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: Request) -> Response<RawResponse> {
        let (id, method, url, headers, body) = request.into_parts();

        let mut builder = self.inner.request(method, url).headers(headers);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream { stream, length } => {
                if let Some(length) = length {
                    builder = builder.header(CONTENT_LENGTH, length);
                }
                builder.body(reqwest::Body::wrap_stream(stream))
            }
        };

        let token = CancellationToken::new();
        let _registration = Registration::new(&self.in_flight, id, token.clone());

        let response = tokio::select! {
            result = builder.send() => result.map_err(HttpError::from)?,
            _ = token.cancelled() => return Err(HttpError::Cancelled),
        };

        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(HttpError::from).boxed();

        Ok(RawResponse::from_stream(
            status,
            headers,
            content_length,
            body,
        ))
    }

    fn as_request_canceler(&self) -> Option<&dyn CancelRequest> {
        Some(self)
    }
}

impl CancelRequest for ReqwestTransport {
    fn cancel_request(&self, id: RequestId) {
        let token = self
            .in_flight
            .lock()
            .ok()
            .and_then(|map| map.get(&id).cloned());
        if let Some(token) = token {
            tracing::debug!(request_id = %id, "Aborting in-flight request");
            token.cancel();
        }
    }
}

/// Builder for [`ReqwestTransport`] proxy, TLS and connect settings
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    accept_invalid_certs: bool,
    proxy: Option<ProxyConfig>,
    connect_timeout: Option<Duration>,
}

#[derive(Debug)]
struct ProxyConfig {
    url: url::Url,
    matcher: Option<regex::Regex>,
}

impl ReqwestTransportBuilder {
    /// Accept invalid TLS certificates
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Set a proxy URL
    pub fn proxy(mut self, url: url::Url) -> Self {
        self.proxy = Some(ProxyConfig { url, matcher: None });
        self
    }

    /// Set a proxy URL used only for hosts matching `pattern`
    pub fn proxy_with_matcher(mut self, url: url::Url, pattern: &str) -> Response<Self> {
        let matcher = regex::Regex::new(pattern)
            .map_err(|e| HttpError::Proxy(format!("Invalid proxy pattern: {}", e)))?;
        self.proxy = Some(ProxyConfig {
            url,
            matcher: Some(matcher),
        });
        Ok(self)
    }

    /// Limit the time spent establishing a connection
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the transport
    pub fn build(self) -> Response<ReqwestTransport> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(self.accept_invalid_certs);

        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        if let Some(proxy_config) = self.proxy {
            let proxy_url = proxy_config.url.to_string();
            let proxy = if let Some(matcher) = proxy_config.matcher {
                reqwest::Proxy::custom(move |url| {
                    if matcher.is_match(url.host_str().unwrap_or("")) {
                        Some(proxy_url.clone())
                    } else {
                        None
                    }
                })
            } else {
                reqwest::Proxy::all(&proxy_url).map_err(|e| HttpError::Proxy(e.to_string()))?
            };
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(HttpError::from)?;
        Ok(ReqwestTransport::from_reqwest(client))
    }
}
