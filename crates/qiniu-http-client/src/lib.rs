//! HTTP caller for the Qiniu storage API
//!
//! [`HttpCaller`] builds requests, signs them with the [`Credentials`] carried
//! by a [`CallContext`], dispatches them on a [`Transport`] while honouring
//! cancellation of the context, and turns responses into either a decoded
//! payload or a structured [`ErrorInfo`].
//!
//! # Example
//!
//! ```no_run
//! use http::{HeaderMap, Method};
//! use qiniu_http_client::{CallContext, FormData, HttpCaller, Response};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Stat {
//!     fsize: u64,
//! }
//!
//! async fn example() -> Response<Option<Stat>> {
//!     let caller = HttpCaller::builder().app_name("photo-sync")?.build();
//!     let ctx = CallContext::new().with_reqid("sync-42");
//!     let mut form = FormData::new();
//!     form.insert("entry".to_string(), vec!["bucket:key".to_string()]);
//!     caller
//!         .call_with_form(&ctx, Method::POST, "https://rs.qiniu.com/stat", HeaderMap::new(), &form)
//!         .await
//! }
//! ```

mod client;
mod context;
mod error;
mod request;
mod response;
mod transport;
mod user_agent;

pub use client::{FormData, HttpCaller, HttpCallerBuilder};
pub use context::{CallContext, Credentials};
pub use error::{BoxError, ErrorInfo, HttpError};
pub use request::{BodyStream, Request, RequestBody, RequestId};
pub use response::{
    check_response, interpret_response, response_error, RawResponse, Response, X_REQID,
};
pub use transport::{
    request_canceler, CancelRequest, ReqwestTransport, ReqwestTransportBuilder, TracingTransport,
    Transport,
};
pub use user_agent::UserAgent;
