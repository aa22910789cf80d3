//! Per-call context: credentials, request id and cancellation

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, HttpError};
use crate::request::Request;

/// Signs outgoing requests
///
/// The returned token is sent as `Authorization: QBox <token>`.
pub trait Credentials: Debug + Send + Sync {
    /// Produce the access token for `request`
    fn sign(&self, request: &Request) -> Result<String, BoxError>;
}

/// Values scoped to a single call
///
/// Clones share the same cancellation token, so cancelling any clone
/// cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    credentials: Option<Arc<dyn Credentials>>,
    reqid: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Empty context that is never done until cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach credentials used to sign requests
    pub fn with_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach the request id propagated as `X-Reqid`
    pub fn with_reqid(mut self, reqid: impl Into<String>) -> Self {
        self.reqid = Some(reqid.into());
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Context is done once `deadline` passes
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Context is done `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Credentials, if any
    pub fn credentials(&self) -> Option<&Arc<dyn Credentials>> {
        self.credentials.as_ref()
    }

    /// Request id, if any
    pub fn reqid(&self) -> Option<&str> {
        self.reqid.as_deref()
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancellation token shared by every clone of this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<HttpError> {
        if self.cancel.is_cancelled() {
            return Some(HttpError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(HttpError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> HttpError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => HttpError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => HttpError::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                HttpError::Cancelled
            }
        }
    }
}
