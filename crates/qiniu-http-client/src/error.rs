//! HTTP error types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error returned by external collaborators such as credential signers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP errors that can occur while building, sending or decoding a call
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request could not be built (bad URL, body setup or signing failure)
    #[error("Request construction error: {0}")]
    Construction(String),
    /// The call context was cancelled
    #[error("Request cancelled")]
    Cancelled,
    /// The call context deadline passed
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
    /// Transport level timeout
    #[error("Request timeout")]
    Timeout,
    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
    /// The response body did not decode into the expected shape
    #[error("Decode error: {0}")]
    Decode(String),
    /// The server answered with a non-success status
    #[error(transparent)]
    Remote(#[from] ErrorInfo),
    /// Client build error
    #[error("Client build error: {0}")]
    Build(String),
    /// Proxy error
    #[error("Proxy error: {0}")]
    Proxy(String),
}

impl HttpError {
    /// True for [`HttpError::Cancelled`] and [`HttpError::DeadlineExceeded`]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HttpError::Cancelled | HttpError::DeadlineExceeded)
    }

    /// Structured remote error, if the server produced one
    pub fn as_error_info(&self) -> Option<&ErrorInfo> {
        match self {
            HttpError::Remote(info) => Some(info),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if err.is_builder() {
            HttpError::Build(err.to_string())
        } else if err.is_connect() {
            HttpError::Connection(err.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else {
            HttpError::Transport(err.to_string())
        }
    }
}

/// Structured description of a failed API call
///
/// `Display` only prints the server message. Use [`ErrorInfo::detail`] for
/// the full record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Server supplied message
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Resource key the error refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Request id echoed by the server in `X-Reqid`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reqid: Option<String>,
    /// Vendor error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<i64>,
    /// HTTP status code
    pub code: u16,
}

impl ErrorInfo {
    /// Create an error record for the given HTTP status
    pub fn new(code: u16) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    /// Full JSON dump of every present field
    pub fn detail(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"code\":{}}}", self.code))
    }

    /// `(code, errno, key, message)` with absent fields defaulted
    pub fn rpc_error(&self) -> (u16, i64, &str, &str) {
        (
            self.code,
            self.errno.unwrap_or_default(),
            self.key.as_deref().unwrap_or_default(),
            self.err.as_deref().unwrap_or_default(),
        )
    }

    /// HTTP status code
    pub fn http_code(&self) -> u16 {
        self.code
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.err.as_deref().unwrap_or_default())
    }
}

impl std::error::Error for ErrorInfo {}
