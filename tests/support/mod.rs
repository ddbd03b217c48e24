//! Mock Graph and identity endpoints for integration tests
#![allow(dead_code)] // Test utility module - not all methods used in every test
//!
//! One axum server answers both the token endpoint
//! (`/tenant/oauth2/v2.0/token`) and `sendMail`. Send responses are scripted
//! in order; once the script runs out every send gets `202 Accepted`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use graph_relay::RelayConfig;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A scripted sendMail response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn graph_error(status: u16, code: &str) -> Self {
        Self::new(
            status,
            format!(r#"{{"error":{{"code":"{}","message":"mock {}"}}}}"#, code, code),
        )
    }

    pub fn with_retry_after(mut self, value: &str) -> Self {
        self.retry_after = Some(value.to_string());
        self
    }
}

/// A sendMail request as the server saw it
#[derive(Debug, Clone)]
pub struct ReceivedSend {
    pub sender: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    pub body: Vec<u8>,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    token_calls: AtomicUsize,
    token_failure: Mutex<Option<MockResponse>>,
    token_delay: Mutex<Duration>,
    send_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    send_delay: Mutex<Duration>,
    script: Mutex<VecDeque<MockResponse>>,
    received: Mutex<Vec<ReceivedSend>>,
}

/// Running mock server; stops when dropped
pub struct MockGraph {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockGraph {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let router = Router::new()
            .route("/tenant/oauth2/v2.0/token", post(token))
            .route("/v1.0/users/{sender}/sendMail", post(send_mail))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Configuration pointing at this server with a secret identity
    pub fn config(&self) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.auth.authority = format!("{}/tenant", self.url());
        config.auth.client_id = Some("test-client".to_string());
        config.auth.client_secret = Some("test-secret".to_string());
        config.graph.url = self.url();
        config.graph.initial_backoff_ms = 10;
        config
    }

    /// Queue sendMail responses, answered in order
    pub fn script(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.state.script.lock().unwrap().extend(responses);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.state.send_delay.lock().unwrap() = delay;
    }

    pub fn set_token_delay(&self, delay: Duration) {
        *self.state.token_delay.lock().unwrap() = delay;
    }

    pub fn fail_token_requests(&self, response: MockResponse) {
        *self.state.token_failure.lock().unwrap() = Some(response);
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.state.send_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<ReceivedSend> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn token(State(state): State<Arc<MockState>>) -> Response {
    state.token_calls.fetch_add(1, Ordering::SeqCst);

    let delay = *state.token_delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let failure = state.token_failure.lock().unwrap().clone();
    if let Some(failure) = failure {
        return scripted(failure);
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"token_type":"Bearer","expires_in":3599,"access_token":"mock-token"}"#,
    )
        .into_response()
}

async fn send_mail(
    State(state): State<Arc<MockState>>,
    Path(sender): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let at = Instant::now();
    state.send_calls.fetch_add(1, Ordering::SeqCst);
    let now_in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.received.lock().unwrap().push(ReceivedSend {
        sender,
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        user_agent: header_value(header::USER_AGENT),
        body: body.to_vec(),
        at,
    });

    let delay = *state.send_delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let next = state.script.lock().unwrap().pop_front();
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    match next {
        Some(response) => scripted(response),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// A request as seen by [`MockProxy`]
#[derive(Debug, Clone)]
pub struct ProxiedRequest {
    pub method: Method,
    /// Request target as sent, absolute-form when proxied
    pub target: String,
    pub proxy_authorization: Option<String>,
}

/// Plain HTTP forward proxy stand-in
///
/// Records every request and answers it itself: token requests get a token,
/// everything else `202 Accepted`.
pub struct MockProxy {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<ProxiedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockProxy {
    pub async fn start() -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let router = Router::new()
            .fallback(proxied)
            .with_state(Arc::clone(&seen));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, seen, handle }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn seen(&self) -> Vec<ProxiedRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn proxied(
    State(seen): State<Arc<Mutex<Vec<ProxiedRequest>>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    _body: Bytes,
) -> Response {
    let is_token = uri.path().ends_with("/oauth2/v2.0/token");
    seen.lock().unwrap().push(ProxiedRequest {
        method,
        target: uri.to_string(),
        proxy_authorization: headers
            .get(header::PROXY_AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    if is_token {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"token_type":"Bearer","expires_in":3599,"access_token":"proxied-token"}"#,
        )
            .into_response()
    } else {
        StatusCode::ACCEPTED.into_response()
    }
}

fn scripted(response: MockResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap();
    let mut headers = HeaderMap::new();
    if let Some(ref value) = response.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from_str(value).unwrap());
    }
    if response.body.starts_with('{') {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    (status, headers, response.body).into_response()
}

/// Write an EML file into `dir`
pub fn write_eml(dir: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub const SIMPLE_MESSAGE: &str = "From: Operations <ops@example.com>\r\n\
To: someone@example.org\r\n\
Subject: Quarterly report\r\n\
\r\n\
Numbers attached.\r\n";
