//! Integration tests for qiniu-http-client using mockito

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderValue, USER_AGENT};
use http::{HeaderMap, Method, StatusCode};
use mockito::Matcher;
use qiniu_http_client::{
    check_response, BoxError, CallContext, CancelRequest, Credentials, FormData, HttpCaller,
    HttpError, RawResponse, Request, RequestBody, RequestId, ReqwestTransport, Response,
    TracingTransport, Transport,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct PutPolicy {
    scope: String,
    deadline: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct UploadRet {
    hash: String,
    key: String,
}

#[derive(Debug)]
struct StaticCredentials(&'static str);

impl Credentials for StaticCredentials {
    fn sign(&self, _request: &Request) -> Result<String, BoxError> {
        Ok(self.0.to_string())
    }
}

#[derive(Debug)]
struct FailingCredentials;

impl Credentials for FailingCredentials {
    fn sign(&self, _request: &Request) -> Result<String, BoxError> {
        Err("secret key missing".into())
    }
}

fn form(pairs: &[(&str, &str)]) -> FormData {
    let mut data = FormData::new();
    for (key, value) in pairs {
        data.entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }
    data
}

// === call_with_json ===

#[tokio::test]
async fn test_call_with_json_success() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/put-policy")
        .match_header("content-type", "application/json")
        .match_header("x-reqid", "req-1")
        .match_header("user-agent", Matcher::Regex(r"^QiniuRust/\S+ \(.+; .+; \) rustc/".into()))
        .match_body(Matcher::Json(serde_json::json!({
            "scope": "photos",
            "deadline": 1700000000
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"hash": "Fh8x", "key": "a.jpg"}"#)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let ctx = CallContext::new().with_reqid("req-1");
    let url = format!("{}/put-policy", server.url());
    let policy = PutPolicy {
        scope: "photos".to_string(),
        deadline: 1_700_000_000,
    };
    let result: Response<Option<UploadRet>> = caller
        .call_with_json(&ctx, Method::POST, &url, HeaderMap::new(), &policy)
        .await;

    let ret = result.expect("call should succeed");
    assert_eq!(
        ret,
        Some(UploadRet {
            hash: "Fh8x".to_string(),
            key: "a.jpg".to_string(),
        })
    );

    mock.assert_async().await;
}

#[tokio::test]
async fn test_call_with_json_empty_body_on_200() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/delete")
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/delete", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call_with_json(&CallContext::new(), Method::POST, &url, HeaderMap::new(), &())
        .await;

    assert!(matches!(result, Ok(None)));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_call_decode_error() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/stat")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"hash": 42}"#)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/stat", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call(&CallContext::new(), Method::GET, &url, HeaderMap::new())
        .await;

    assert!(matches!(result, Err(HttpError::Decode(_))));

    mock.assert_async().await;
}

// === call_with_form ===

#[tokio::test]
async fn test_call_with_form_post_uses_body() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/y")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body("a=1")
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/y", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call_with_form(
            &CallContext::new(),
            Method::POST,
            &url,
            HeaderMap::new(),
            &form(&[("a", "1")]),
        )
        .await;

    assert!(matches!(result, Ok(None)));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_call_with_form_get_uses_query() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/y")
        .match_query(Matcher::UrlEncoded("a".into(), "1".into()))
        .match_header("content-type", Matcher::Missing)
        .match_body("")
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/y", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call_with_form(
            &CallContext::new(),
            Method::GET,
            &url,
            HeaderMap::new(),
            &form(&[("a", "1")]),
        )
        .await;

    assert!(result.is_ok());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_call_with_form_get_extends_existing_query() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("DELETE", "/y")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("z".into(), "2".into()),
            Matcher::UrlEncoded("a".into(), "1".into()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/y?z=2", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call_with_form(
            &CallContext::new(),
            Method::DELETE,
            &url,
            HeaderMap::new(),
            &form(&[("a", "1")]),
        )
        .await;

    assert!(result.is_ok());

    mock.assert_async().await;
}

// === call_with / call_with_64 ===

#[tokio::test]
async fn test_call_with_raw_body() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("PUT", "/mkblk/5")
        .match_header("content-length", "5")
        .match_body("hello")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"hash": "ctx-1", "key": "blk"}"#)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/mkblk/5", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call_with(
            &CallContext::new(),
            Method::PUT,
            &url,
            HeaderMap::new(),
            &b"hello"[..],
            5,
        )
        .await;

    let ret = result.expect("upload should succeed").expect("body present");
    assert_eq!(ret.hash, "ctx-1");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_call_with_64_raw_body() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/upload")
        .match_header("content-length", "11")
        .match_body("large bytes")
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/upload", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call_with_64(
            &CallContext::new(),
            Method::POST,
            &url,
            HeaderMap::new(),
            &b"large bytes"[..],
            11u64,
        )
        .await;

    assert!(matches!(result, Ok(None)));

    mock.assert_async().await;
}

// === Headers ===

#[tokio::test]
async fn test_credentials_add_qbox_authorization() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/stat")
        .match_header("authorization", "QBox ak:c2lnbmF0dXJl")
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let ctx =
        CallContext::new().with_credentials(Arc::new(StaticCredentials("ak:c2lnbmF0dXJl")));
    let url = format!("{}/stat", server.url());
    let response = caller
        .do_request(&ctx, Method::POST, &url, HeaderMap::new())
        .await
        .expect("request should succeed");

    assert!(check_response(response).await.is_ok());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_no_credentials_no_authorization() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/public")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/public", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call(&CallContext::new(), Method::GET, &url, HeaderMap::new())
        .await;

    assert!(result.is_ok());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_signing_failure_is_construction_error() {
    let caller = HttpCaller::new();
    let ctx = CallContext::new().with_credentials(Arc::new(FailingCredentials));
    let result: Response<Option<UploadRet>> = caller
        .call(&ctx, Method::GET, "http://127.0.0.1:1/never", HeaderMap::new())
        .await;

    match result {
        Err(HttpError::Construction(msg)) => assert!(msg.contains("secret key missing")),
        _ => panic!("Expected HttpError::Construction"),
    }
}

#[tokio::test]
async fn test_explicit_user_agent_is_kept() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/ua")
        .match_header("user-agent", "custom-agent/1.0")
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::builder()
        .app_name("ignored")
        .expect("valid app name")
        .build();
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("custom-agent/1.0"));
    let url = format!("{}/ua", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call(&CallContext::new(), Method::GET, &url, headers)
        .await;

    assert!(result.is_ok());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_app_name_in_user_agent() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/ua")
        .match_header("user-agent", Matcher::Regex(r"; photo-sync\) rustc/".into()))
        .with_status(200)
        .create_async()
        .await;

    let caller = HttpCaller::builder()
        .app_name("photo-sync")
        .expect("valid app name")
        .build();
    let url = format!("{}/ua", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call(&CallContext::new(), Method::GET, &url, HeaderMap::new())
        .await;

    assert!(result.is_ok());

    mock.assert_async().await;
}

// === Remote errors ===

#[tokio::test]
async fn test_json_error_body() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/stat")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_header("x-reqid", "srv-reqid")
        .with_body(r#"{"error":"bad token","key":"k1","errno":612}"#)
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/stat", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call(&CallContext::new(), Method::POST, &url, HeaderMap::new())
        .await;

    let err = result.expect_err("401 should fail");
    assert_eq!(err.to_string(), "bad token");
    let info = err.as_error_info().expect("structured error");
    assert_eq!(info.code, 401);
    assert_eq!(info.err.as_deref(), Some("bad token"));
    assert_eq!(info.key.as_deref(), Some("k1"));
    assert_eq!(info.errno, Some(612));
    assert_eq!(info.reqid.as_deref(), Some("srv-reqid"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_text_error_body() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/stat")
        .with_status(500)
        .with_header("content-type", "text/plain")
        .with_body("internal failure")
        .create_async()
        .await;

    let caller = HttpCaller::new();
    let url = format!("{}/stat", server.url());
    let result: Response<Option<UploadRet>> = caller
        .call(&CallContext::new(), Method::GET, &url, HeaderMap::new())
        .await;

    let err = result.expect_err("500 should fail");
    let info = err.as_error_info().expect("structured error");
    assert_eq!(info.code, 500);
    assert_eq!(info.err.as_deref(), Some("internal failure"));
    assert!(info.errno.is_none());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_code_matches_status() {
    let mut server = mockito::Server::new_async().await;

    for status in [400usize, 404, 579, 612] {
        let path = format!("/status/{}", status);
        let mock = server
            .mock("GET", path.as_str())
            .with_status(status)
            .create_async()
            .await;

        let caller = HttpCaller::new();
        let url = format!("{}{}", server.url(), path);
        let response = caller
            .do_request(&CallContext::new(), Method::GET, &url, HeaderMap::new())
            .await
            .expect("exchange should complete");
        let err = check_response(response).await.expect_err("non-2xx should fail");
        assert_eq!(
            err.as_error_info().map(|info| info.code as usize),
            Some(status)
        );

        mock.assert_async().await;
    }
}

// === Cancellation ===

/// Counts round trips and always answers 200
#[derive(Debug, Default)]
struct CountingTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn round_trip(&self, _request: Request) -> Response<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), ""))
    }
}

/// Blocks every exchange until it is cancelled
#[derive(Debug, Default)]
struct HangingTransport {
    release: CancellationToken,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl CancelRequest for HangingTransport {
    fn cancel_request(&self, _id: RequestId) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.release.cancel();
    }
}

#[async_trait]
impl Transport for HangingTransport {
    async fn round_trip(&self, _request: Request) -> Response<RawResponse> {
        self.release.cancelled().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.finished.store(true, Ordering::SeqCst);
        Err(HttpError::Cancelled)
    }

    fn as_request_canceler(&self) -> Option<&dyn CancelRequest> {
        Some(self)
    }
}

/// Answers 200 after a delay and cannot be cancelled
#[derive(Debug)]
struct SlowTransport {
    delay: Duration,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn round_trip(&self, _request: Request) -> Response<RawResponse> {
        tokio::time::sleep(self.delay).await;
        Ok(RawResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            r#"{"hash":"h","key":"k"}"#,
        ))
    }
}

fn request(caller: &HttpCaller, ctx: &CallContext) -> Request {
    caller
        .new_request(
            ctx,
            Method::GET,
            "http://storage.example.com/stat",
            HeaderMap::new(),
            RequestBody::Empty,
        )
        .expect("valid request")
}

#[tokio::test]
async fn test_cancelled_context_skips_transport() {
    let transport = Arc::new(CountingTransport::default());
    let caller = HttpCaller::with_transport(Arc::clone(&transport));
    let ctx = CallContext::new();
    ctx.cancel();

    let result = caller.dispatch(&ctx, request(&caller, &ctx)).await;

    assert!(matches!(result, Err(HttpError::Cancelled)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_expired_deadline_skips_transport() {
    let transport = Arc::new(CountingTransport::default());
    let caller = HttpCaller::with_transport(Arc::clone(&transport));
    let ctx = CallContext::new().with_timeout(Duration::ZERO);

    let result = caller.dispatch(&ctx, request(&caller, &ctx)).await;

    assert!(matches!(result, Err(HttpError::DeadlineExceeded)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_in_flight_waits_for_exchange() {
    let transport = Arc::new(HangingTransport::default());
    let caller = HttpCaller::with_transport(TracingTransport::new(Arc::clone(&transport)));
    let ctx = CallContext::new();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = caller.dispatch(&ctx, request(&caller, &ctx)).await;

    assert!(matches!(result, Err(HttpError::Cancelled)));
    assert!(transport.cancelled.load(Ordering::SeqCst));
    assert!(transport.finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_deadline_cancels_in_flight() {
    let transport = Arc::new(HangingTransport::default());
    let caller = HttpCaller::with_transport(Arc::clone(&transport));
    let ctx = CallContext::new().with_timeout(Duration::from_millis(20));

    let result = caller.dispatch(&ctx, request(&caller, &ctx)).await;

    assert!(matches!(result, Err(HttpError::DeadlineExceeded)));
    assert!(transport.finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancel_without_capability_completes() {
    let caller = HttpCaller::with_transport(SlowTransport {
        delay: Duration::from_millis(50),
    });
    let ctx = CallContext::new();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let response = caller
        .dispatch(&ctx, request(&caller, &ctx))
        .await
        .expect("uncancellable exchange completes");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(ctx.err().is_some());
}

#[tokio::test]
async fn test_reqwest_transport_aborts_hanging_server() {
    // Accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let transport = ReqwestTransport::new();
    let caller = HttpCaller::with_transport(transport.clone());
    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));

    let result: Response<Option<UploadRet>> = caller
        .call(&ctx, Method::GET, &format!("http://{}/stat", addr), HeaderMap::new())
        .await;

    assert!(matches!(result, Err(HttpError::DeadlineExceeded)));
    assert_eq!(transport.in_flight(), 0);
}
