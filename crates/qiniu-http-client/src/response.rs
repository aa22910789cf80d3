//! HTTP response types and response classification

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ErrorInfo, HttpError};

/// HTTP Response type - generic over the body type R and error type E
/// This is the primary return type for all HTTP operations
pub type Response<R, E = HttpError> = Result<R, E>;

/// Header carrying the request id (`X-Reqid`)
pub const X_REQID: HeaderName = HeaderName::from_static("x-reqid");

/// Raw HTTP response with status code, headers and a body stream
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    content_length: Option<u64>,
    body: BoxStream<'static, Result<Bytes, HttpError>>,
}

impl RawResponse {
    /// Build a response around a body stream
    pub fn from_stream(
        status: StatusCode,
        headers: HeaderMap,
        content_length: Option<u64>,
        body: BoxStream<'static, Result<Bytes, HttpError>>,
    ) -> Self {
        Self {
            status,
            headers,
            content_length,
            body,
        }
    }

    /// Build a response with an in-memory body
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let content_length = Some(body.len() as u64);
        Self::from_stream(
            status,
            headers,
            content_length,
            stream::once(async move { Ok(body) }).boxed(),
        )
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Declared body length, `None` when unknown
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Check if the response status is a success (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Read the body to the end, releasing the underlying connection
    pub async fn into_bytes(self) -> Response<Bytes> {
        self.body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await
            .map(BytesMut::freeze)
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    errno: i64,
}

/// Decode a 2xx response into `R`, or turn any other status into [`ErrorInfo`]
///
/// The body is always drained. `Ok(None)` means the body was empty.
pub async fn interpret_response<R>(response: RawResponse) -> Response<Option<R>>
where
    R: DeserializeOwned,
{
    if !response.is_success() {
        return Err(response_error(response).await.into());
    }

    let body = response.into_bytes().await?;
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| HttpError::Decode(e.to_string()))
}

/// Like [`interpret_response`] for callers that do not want the body decoded
pub async fn check_response(response: RawResponse) -> Response<()> {
    if !response.is_success() {
        return Err(response_error(response).await.into());
    }
    response.into_bytes().await?;
    Ok(())
}

/// Build the structured error for a failed response, draining its body
pub async fn response_error(response: RawResponse) -> ErrorInfo {
    let mut info = ErrorInfo::new(response.status().as_u16());
    info.reqid = response.header_str(&X_REQID).map(str::to_owned);

    let is_json = response
        .header_str(&CONTENT_TYPE)
        .is_some_and(|ct| ct.starts_with("application/json"));

    let body = match response.into_bytes().await {
        Ok(body) => body,
        Err(err) => {
            info.err = Some(err.to_string());
            return info;
        }
    };
    if body.is_empty() {
        return info;
    }

    if is_json {
        if let Ok(remote) = serde_json::from_slice::<RemoteErrorBody>(&body) {
            if !remote.error.is_empty() {
                info.err = Some(remote.error);
                info.key = Some(remote.key).filter(|key| !key.is_empty());
                info.errno = Some(remote.errno).filter(|errno| *errno != 0);
                return info;
            }
        }
    }

    info.err = Some(String::from_utf8_lossy(&body).into_owned());
    info
}
