//! Authenticated, cancellable HTTP caller

use std::collections::BTreeMap;
use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::instrument;
use url::Url;

use crate::context::CallContext;
use crate::error::HttpError;
use crate::request::{Request, RequestBody};
use crate::response::{interpret_response, RawResponse, Response, X_REQID};
use crate::transport::{request_canceler, ReqwestTransport, Transport};
use crate::user_agent::UserAgent;

/// Form parameters, encoded in key order
pub type FormData = BTreeMap<String, Vec<String>>;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const APPLICATION_JSON: &str = "application/json";

/// Turns a method, URL, headers and body into a signed, cancellable exchange
#[derive(Debug, Clone)]
pub struct HttpCaller {
    transport: Arc<dyn Transport>,
    user_agent: UserAgent,
}

impl Default for HttpCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCaller {
    /// Caller over the default [`ReqwestTransport`]
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new())
    }

    /// Create a new caller builder
    pub fn builder() -> HttpCallerBuilder {
        HttpCallerBuilder::default()
    }

    /// Caller over a custom transport
    pub fn with_transport<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            transport: Arc::new(transport),
            user_agent: UserAgent::default(),
        }
    }

    /// The transport requests are dispatched on
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// User agent set on requests that do not carry one
    pub fn user_agent(&self) -> &UserAgent {
        &self.user_agent
    }

    /// Build a request, signing it when `ctx` carries credentials
    pub fn new_request(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Response<Request> {
        let url = Url::parse(url).map_err(|e| HttpError::Construction(e.to_string()))?;
        let mut request = Request::new(method, url, headers, body);

        if let Some(credentials) = ctx.credentials() {
            let token = credentials
                .sign(&request)
                .map_err(|e| HttpError::Construction(format!("Failed to sign request: {}", e)))?;
            let value = HeaderValue::try_from(format!("QBox {}", token))
                .map_err(|e| HttpError::Construction(e.to_string()))?;
            request.headers_mut().append(AUTHORIZATION, value);
        }

        Ok(request)
    }

    /// Send `request`, racing it against cancellation of `ctx`
    ///
    /// Cancellation only interrupts the exchange when the transport, or a
    /// transport it wraps, supports [`CancelRequest`](crate::CancelRequest).
    /// Otherwise the exchange runs to completion and its result is returned.
    #[instrument(skip_all, fields(method = %request.method(), url = %request.url(), reqid = ctx.reqid()))]
    pub async fn dispatch(
        &self,
        ctx: &CallContext,
        mut request: Request,
    ) -> Response<RawResponse> {
        if let Some(reqid) = ctx.reqid() {
            let value =
                HeaderValue::from_str(reqid).map_err(|e| HttpError::Construction(e.to_string()))?;
            request.headers_mut().insert(X_REQID, value);
        }

        if !request.headers().contains_key(USER_AGENT) {
            request
                .headers_mut()
                .insert(USER_AGENT, self.user_agent.header_value()?);
        }

        // Cancellation between this check and the send below is not observed.
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let Some(canceler) = request_canceler(self.transport.as_ref()) else {
            return self.transport.round_trip(request).await;
        };

        let id = request.id();
        let transport = Arc::clone(&self.transport);
        let mut exchange = tokio::spawn(async move { transport.round_trip(request).await });

        tokio::select! {
            joined = &mut exchange => joined.map_err(|e| HttpError::Transport(e.to_string()))?,
            err = ctx.done() => {
                tracing::debug!(request_id = %id, "Call context done, cancelling request");
                canceler.cancel_request(id);
                // Wait for the exchange so the task does not outlive the call.
                let _ = exchange.await;
                Err(err)
            }
        }
    }

    /// Request without a body
    pub async fn do_request(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
    ) -> Response<RawResponse> {
        let request = self.new_request(ctx, method, url, headers, RequestBody::Empty)?;
        self.dispatch(ctx, request).await
    }

    /// Request with a body of `length` bytes read from `body`
    pub async fn do_request_with<B>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: B,
        length: usize,
    ) -> Response<RawResponse>
    where
        B: AsyncRead + Send + Sync + 'static,
    {
        self.do_request_with_64(ctx, method, url, headers, body, length as u64)
            .await
    }

    /// Request with a body of `length` bytes read from `body`, for large payloads
    pub async fn do_request_with_64<B>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: B,
        length: u64,
    ) -> Response<RawResponse>
    where
        B: AsyncRead + Send + Sync + 'static,
    {
        let body = RequestBody::from_reader(body, Some(length));
        let request = self.new_request(ctx, method, url, headers, body)?;
        self.dispatch(ctx, request).await
    }

    /// Request carrying `data` as `application/x-www-form-urlencoded`
    ///
    /// GET, HEAD and DELETE carry the form in the query string instead of
    /// the body.
    pub async fn do_request_with_form(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        mut headers: HeaderMap,
        data: &FormData,
    ) -> Response<RawResponse> {
        let encoded = encode_form(data)?;

        if matches!(method, Method::GET | Method::HEAD | Method::DELETE) {
            let url = append_query(url, &encoded);
            return self.do_request(ctx, method, &url, headers).await;
        }

        headers.append(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
        let request = self.new_request(ctx, method, url, headers, encoded.into())?;
        self.dispatch(ctx, request).await
    }

    /// Request carrying `data` serialized as JSON
    pub async fn do_request_with_json<P>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        mut headers: HeaderMap,
        data: &P,
    ) -> Response<RawResponse>
    where
        P: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(data)
            .map_err(|e| HttpError::Construction(format!("Failed to encode JSON body: {}", e)))?;
        headers.append(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        let request = self.new_request(ctx, method, url, headers, body.into())?;
        self.dispatch(ctx, request).await
    }

    /// Call without a body and decode the result
    pub async fn call<R>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
    ) -> Response<Option<R>>
    where
        R: DeserializeOwned,
    {
        let response = self.do_request(ctx, method, url, headers).await?;
        interpret_response(response).await
    }

    /// Call with a streamed body of `length` bytes and decode the result
    pub async fn call_with<R, B>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: B,
        length: usize,
    ) -> Response<Option<R>>
    where
        R: DeserializeOwned,
        B: AsyncRead + Send + Sync + 'static,
    {
        let response = self
            .do_request_with(ctx, method, url, headers, body, length)
            .await?;
        interpret_response(response).await
    }

    /// Call with a streamed body of `length` bytes (64-bit) and decode the result
    pub async fn call_with_64<R, B>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: B,
        length: u64,
    ) -> Response<Option<R>>
    where
        R: DeserializeOwned,
        B: AsyncRead + Send + Sync + 'static,
    {
        let response = self
            .do_request_with_64(ctx, method, url, headers, body, length)
            .await?;
        interpret_response(response).await
    }

    /// Call with form data and decode the result
    pub async fn call_with_form<R>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        data: &FormData,
    ) -> Response<Option<R>>
    where
        R: DeserializeOwned,
    {
        let response = self
            .do_request_with_form(ctx, method, url, headers, data)
            .await?;
        interpret_response(response).await
    }

    /// Call with a JSON body and decode the result
    pub async fn call_with_json<R, P>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        headers: HeaderMap,
        data: &P,
    ) -> Response<Option<R>>
    where
        R: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let response = self
            .do_request_with_json(ctx, method, url, headers, data)
            .await?;
        interpret_response(response).await
    }
}

fn encode_form(data: &FormData) -> Response<String> {
    let pairs: Vec<(&str, &str)> = data
        .iter()
        .flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
        .collect();
    serde_urlencoded::to_string(pairs).map_err(|e| HttpError::Construction(e.to_string()))
}

fn append_query(url: &str, encoded: &str) -> String {
    if encoded.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, encoded)
}

/// Builder for [`HttpCaller`]
#[derive(Debug, Default)]
pub struct HttpCallerBuilder {
    transport: Option<Arc<dyn Transport>>,
    user_agent: Option<UserAgent>,
}

impl HttpCallerBuilder {
    /// Dispatch on `transport` instead of the default [`ReqwestTransport`]
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Name the calling application in the user agent
    pub fn app_name(mut self, app_name: &str) -> Response<Self> {
        self.user_agent = Some(UserAgent::with_app_name(app_name)?);
        Ok(self)
    }

    /// Build the caller
    pub fn build(self) -> HttpCaller {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()),
        };
        HttpCaller {
            transport,
            user_agent: self.user_agent.unwrap_or_default(),
        }
    }
}
