//! Retry-aware request executor
//!
//! Runs one logical HTTP request as a sequence of attempts. Each attempt is
//! raced against two timers:
//!
//! - a connect timer, disarmed as soon as the transport starts pulling the
//!   request body (the connection is up and headers are on the wire);
//! - an attempt timer bounding the whole call, response body included.
//!
//! Whichever fires first drops the in-flight request and fails the attempt
//! with a timeout. Throttling responses (429, 503, 504) are retried through
//! [`with_retry`]; everything else fails immediately.

use super::retry::{with_retry, RetryConfig, RetryDecision, RetryableError};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, RETRY_AFTER};
use reqwest::{Body, Client, Method, StatusCode};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::debug;

/// Time allowed until the request body starts flowing
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Time allowed for a whole attempt
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send + Sync>>;

/// Per-attempt timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub attempt: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            attempt: ATTEMPT_TIMEOUT,
        }
    }
}

/// Request payload, re-opened for every attempt
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// File contents streamed from disk as base64 text
    Base64File(PathBuf),
}

/// Everything needed to issue (and re-issue) one request
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub bearer_token: Option<String>,
    pub headers: Vec<(HeaderName, String)>,
    pub body: RequestBody,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer_token: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone)]
pub struct ExecutedResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Failure of a request after retries have been applied
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Non-success status; `body` is whatever the server sent
    #[error("HTTP {status}: {body}")]
    Status {
        status: StatusCode,
        retry_after: Option<u64>,
        body: String,
    },

    /// One of the attempt timers fired
    #[error("{0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("reading request body: {0}")]
    Io(#[from] io::Error),
}

impl ExecuteError {
    /// Whether the provider asked us to slow down
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            ExecuteError::Status { status, .. }
                if matches!(status.as_u16(), 429 | 503 | 504)
        )
    }
}

impl RetryableError for ExecuteError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            ExecuteError::Status { retry_after, .. } if self.is_throttled() => match retry_after {
                Some(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
                None => RetryDecision::Retry,
            },
            _ => RetryDecision::NoRetry,
        }
    }
}

/// Issues requests with timers and throttling-aware retries
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Client,
    timeouts: Timeouts,
    retry: RetryConfig,
}

impl RequestExecutor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeouts: Timeouts::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run the request to completion
    ///
    /// Retry state lives only for this call.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<ExecutedResponse, ExecuteError> {
        let operation = format!("{} {}", spec.method, spec.url);
        with_retry(&self.retry, &operation, |attempt| self.attempt(spec, attempt)).await
    }

    async fn attempt(
        &self,
        spec: &RequestSpec,
        attempt: u32,
    ) -> Result<ExecutedResponse, ExecuteError> {
        let (progress_tx, mut progress_rx) = oneshot::channel();
        let (body, content_length) = spec.body.open(progress_tx).await?;

        let mut request = self
            .client
            .request(spec.method.clone(), &spec.url)
            .body(body);
        if let Some(ref token) = spec.bearer_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(len) = content_length {
            request = request.header(CONTENT_LENGTH, len);
        }

        debug!(method = %spec.method, url = %spec.url, attempt, "Sending request");

        let exchange = async move {
            let response = request.send().await?;
            let status = response.status();
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await?;
            Ok::<_, ExecuteError>((status, retry_after, body))
        };

        let connect_timer = sleep(self.timeouts.connect);
        let attempt_timer = sleep(self.timeouts.attempt);
        tokio::pin!(exchange, connect_timer, attempt_timer);
        let mut awaiting_progress = true;

        let (status, retry_after, body) = loop {
            tokio::select! {
                biased;
                result = &mut exchange => break result?,
                _ = &mut progress_rx, if awaiting_progress => {
                    awaiting_progress = false;
                }
                _ = &mut connect_timer, if awaiting_progress => {
                    return Err(ExecuteError::Timeout(format!(
                        "no connection to {} within {:?}",
                        spec.url, self.timeouts.connect
                    )));
                }
                _ = &mut attempt_timer => {
                    return Err(ExecuteError::Timeout(format!(
                        "{} {} did not complete within {:?}",
                        spec.method, spec.url, self.timeouts.attempt
                    )));
                }
            }
        };

        debug!(status = status.as_u16(), attempt, "Received response");

        if status.is_success() {
            Ok(ExecutedResponse { status, body })
        } else {
            Err(ExecuteError::Status {
                status,
                retry_after,
                body,
            })
        }
    }
}

impl RequestBody {
    /// Build a fresh body stream that reports on `progress` when first polled
    async fn open(
        &self,
        progress: oneshot::Sender<()>,
    ) -> Result<(Body, Option<u64>), ExecuteError> {
        let (mut chunks, content_length): (ChunkStream, Option<u64>) = match self {
            RequestBody::Empty => (Box::pin(stream::empty()), None),
            RequestBody::Bytes(bytes) => {
                let bytes = bytes.clone();
                let len = bytes.len() as u64;
                (Box::pin(stream::iter([Ok(bytes)])), Some(len))
            }
            RequestBody::Base64File(path) => {
                let file = File::open(path).await?;
                let raw_len = file.metadata().await?.len();
                (
                    Box::pin(eml::base64_stream(file).map_ok(String::into_bytes)),
                    Some(eml::encoded_len(raw_len)),
                )
            }
        };

        let mut progress = Some(progress);
        let observed = stream::poll_fn(move |cx| {
            if let Some(tx) = progress.take() {
                let _ = tx.send(());
            }
            chunks.poll_next_unpin(cx)
        });

        Ok((Body::wrap_stream(observed), content_length))
    }
}

/// Numeric `Retry-After` in seconds; HTTP-date values are ignored
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpSocket, TcpStream};

    fn status_error(code: u16, retry_after: Option<u64>) -> ExecuteError {
        ExecuteError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            retry_after,
            body: String::new(),
        }
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_secs(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after_secs(&headers), Some(2));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_secs(&headers), None);
    }

    #[test]
    fn test_throttling_statuses_are_retried() {
        for code in [429, 503, 504] {
            assert_eq!(status_error(code, None).retry_decision(), RetryDecision::Retry);
        }
        assert_eq!(
            status_error(429, Some(2)).retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        for code in [400, 401, 403, 404, 413, 500, 502] {
            assert_eq!(status_error(code, None).retry_decision(), RetryDecision::NoRetry);
        }
        assert_eq!(
            ExecuteError::Timeout("late".to_string()).retry_decision(),
            RetryDecision::NoRetry
        );
    }

    #[tokio::test]
    async fn test_unpolled_body_reports_no_progress() {
        let (tx, mut rx) = oneshot::channel();
        let (body, len) = RequestBody::Bytes(b"hello".to_vec()).open(tx).await.unwrap();
        assert_eq!(len, Some(5));
        drop(body);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_body_file_fails_without_retry() {
        let executor = RequestExecutor::new(Client::new());
        let spec = RequestSpec::post("http://127.0.0.1:9/unused")
            .body(RequestBody::Base64File(PathBuf::from("/nonexistent/message.eml")));

        let result = executor.execute(&spec).await;
        assert!(matches!(result, Err(ExecuteError::Io(_))));
    }

    #[tokio::test]
    async fn test_attempt_timer_cancels_stalled_request() {
        // Accepts and reads forever, never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });

        let executor = RequestExecutor::new(Client::new()).with_timeouts(Timeouts {
            connect: Duration::from_secs(5),
            attempt: Duration::from_millis(200),
        });
        let spec = RequestSpec::post(format!("http://{}/stall", addr))
            .body(RequestBody::Bytes(b"payload".to_vec()));

        let started = std::time::Instant::now();
        let result = executor.execute(&spec).await;

        match result {
            Err(ExecuteError::Timeout(reason)) => assert!(reason.contains("did not complete")),
            other => panic!("expected timeout, got {:?}", other),
        }
        // Timeouts are not retried
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_timer_fires_when_connection_never_completes() {
        // A listener that never accepts, with its backlog filled up
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(0).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut backlog = Vec::new();
        for _ in 0..8 {
            if let Ok(Ok(stream)) =
                tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await
            {
                backlog.push(stream);
            }
        }

        let executor = RequestExecutor::new(Client::new()).with_timeouts(Timeouts {
            connect: Duration::from_millis(300),
            attempt: Duration::from_secs(5),
        });
        let spec = RequestSpec::post(format!("http://{}/sendMail", addr))
            .body(RequestBody::Bytes(b"payload".to_vec()));

        let started = std::time::Instant::now();
        let result = executor.execute(&spec).await;
        let elapsed = started.elapsed();

        match result {
            Err(ExecuteError::Timeout(reason)) => assert!(reason.contains("no connection"), "{}", reason),
            other => panic!("expected connect timeout, got {:?}", other),
        }
        // One attempt only: a retry would add at least another 300ms
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);

        drop(backlog);
        drop(listener);
    }
}
