//! Transports that carry a [`Request`] to the server
//!
//! A transport may optionally support aborting an exchange that is already
//! in flight ([`CancelRequest`]). Wrapper transports expose the transport they
//! wrap through [`Transport::nested_transport`], and [`request_canceler`]
//! walks that chain until it finds the capability.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::request::{Request, RequestId};
use crate::response::{RawResponse, Response};

mod reqwest_transport;
mod tracing_transport;

pub use reqwest_transport::{ReqwestTransport, ReqwestTransportBuilder};
pub use tracing_transport::TracingTransport;

/// Performs a single HTTP exchange
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Send `request` and return the response head with an unread body
    async fn round_trip(&self, request: Request) -> Response<RawResponse>;

    /// In-flight cancellation support, if this transport has it
    fn as_request_canceler(&self) -> Option<&dyn CancelRequest> {
        None
    }

    /// The transport this one wraps, if any
    fn nested_transport(&self) -> Option<&dyn Transport> {
        None
    }
}

/// Aborts an exchange that is still running
pub trait CancelRequest: Send + Sync {
    /// Abort the exchange for `id`; unknown ids are ignored
    fn cancel_request(&self, id: RequestId);
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, request: Request) -> Response<RawResponse> {
        (**self).round_trip(request).await
    }

    fn as_request_canceler(&self) -> Option<&dyn CancelRequest> {
        (**self).as_request_canceler()
    }

    fn nested_transport(&self) -> Option<&dyn Transport> {
        (**self).nested_transport()
    }
}

/// Find the first transport in the wrapper chain that can cancel in flight
pub fn request_canceler(transport: &dyn Transport) -> Option<&dyn CancelRequest> {
    let mut current = transport;
    loop {
        if let Some(canceler) = current.as_request_canceler() {
            return Some(canceler);
        }
        current = current.nested_transport()?;
    }
}
