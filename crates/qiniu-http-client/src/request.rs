//! HTTP request types

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, Method};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use url::Url;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process unique identity of a [`Request`], used to cancel it in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Streamed request body chunks
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// Request body
#[derive(Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// In-memory body
    Bytes(Bytes),
    /// Streamed body, `length` is `None` for chunked transfer
    Stream {
        /// Body chunks
        stream: BodyStream,
        /// Declared length
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Stream the body out of an async reader with a declared length
    pub fn from_reader<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        RequestBody::Stream {
            stream: Box::pin(ReaderStream::new(reader)),
            length,
        }
    }

    /// Declared length; `None` when unknown
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream { length, .. } => *length,
        }
    }

    /// Body bytes when they are held in memory
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RequestBody::Empty => Some(b"".as_slice()),
            RequestBody::Bytes(bytes) => Some(bytes.as_ref()),
            RequestBody::Stream { .. } => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(bytes.into())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(text.into())
    }
}

/// A request ready to be dispatched
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
}

impl Request {
    /// Create a request with a fresh [`RequestId`]
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: RequestBody) -> Self {
        Self {
            id: RequestId::next(),
            method,
            url,
            headers,
            body,
        }
    }

    /// Identity used for in-flight cancellation
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Request body
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Split into parts, consuming the request
    pub fn into_parts(self) -> (RequestId, Method, Url, HeaderMap, RequestBody) {
        (self.id, self.method, self.url, self.headers, self.body)
    }
}
