//! Access tokens for the Graph API
//!
//! [`TokenProvider`] hands out a bearer token for the service identity. The
//! last token is cached until it gets close to expiry, and concurrent callers
//! that find no usable token share a single exchange (and its outcome,
//! success or failure) instead of each starting their own.

mod credential;

pub use credential::{ClientCredentialExchange, Credential};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens this close to expiry are replaced
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Token acquisition failures
///
/// `Clone` so one failed exchange can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no application identity configured")]
    NotConfigured,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("token request failed: {0}")]
    Request(String),

    #[error("token request rejected: {error}: {description}")]
    Rejected { error: String, description: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

/// A bearer token and when it stops being valid
#[derive(Clone)]
pub struct AccessToken {
    secret: Arc<str>,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(secret: impl Into<Arc<str>>, expires_in: Duration) -> Self {
        Self {
            secret: secret.into(),
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Remaining lifetime, zero once expired
    pub fn expires_in(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Whether the token outlives `margin`
    pub fn is_valid_for(&self, margin: Duration) -> bool {
        self.expires_in() > margin
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_in", &self.expires_in())
            .finish()
    }
}

/// Obtains a fresh token from the identity platform
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<AccessToken, TokenError>;
}

type PendingExchange = Shared<BoxFuture<'static, Result<AccessToken, TokenError>>>;

#[derive(Default)]
struct TokenState {
    cached: Option<AccessToken>,
    pending: Option<PendingExchange>,
}

impl TokenState {
    /// Retire the pending exchange, keeping its token if it produced one
    fn settle(&mut self, result: &Result<AccessToken, TokenError>) {
        self.pending = None;
        match result {
            Ok(token) => {
                debug!(expires_in_secs = token.expires_in().as_secs(), "Token cached");
                self.cached = Some(token.clone());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token exchange failed");
            }
        }
    }
}

/// Caching, singleflight token source
pub struct TokenProvider {
    exchange: Arc<dyn TokenExchange>,
    refresh_margin: Duration,
    state: Mutex<TokenState>,
}

impl TokenProvider {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            state: Mutex::new(TokenState::default()),
        }
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Get a token, exchanging for a new one only when needed
    ///
    /// Exchange failures are returned as-is and never retried here. Once an
    /// exchange settles the next caller without a usable token starts a new one.
    pub async fn acquire(&self) -> Result<AccessToken, TokenError> {
        let pending = {
            let mut state = self.state.lock().await;

            // A finished exchange whose callers were all cancelled before
            // collecting it must not be joined again
            if let Some(settled) = state.pending.as_ref().and_then(|p| p.peek().cloned()) {
                state.settle(&settled);
            }

            if let Some(ref token) = state.cached {
                if token.is_valid_for(self.refresh_margin) {
                    return Ok(token.clone());
                }
            }

            match state.pending {
                Some(ref pending) => {
                    debug!("Joining in-flight token exchange");
                    pending.clone()
                }
                None => {
                    debug!("Starting token exchange");
                    let exchange = Arc::clone(&self.exchange);
                    let pending = async move { exchange.exchange().await }.boxed().shared();
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.state.lock().await;
        if state.pending.as_ref().is_some_and(|p| p.ptr_eq(&pending)) {
            state.settle(&result);
        }

        result
    }

    /// Drop the cached token so the next call exchanges again
    pub async fn invalidate(&self) {
        self.state.lock().await.cached = None;
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts exchanges and answers after a short delay
    struct CountingExchange {
        calls: AtomicU32,
        lifetime: Duration,
        fail: bool,
    }

    impl CountingExchange {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                lifetime,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                lifetime: Duration::ZERO,
                fail: true,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange(&self) -> Result<AccessToken, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(TokenError::Rejected {
                    error: "invalid_client".to_string(),
                    description: "bad secret".to_string(),
                });
            }
            Ok(AccessToken::new(format!("token-{}", n), self.lifetime))
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let exchange = CountingExchange::new(Duration::from_secs(3600));
        let provider = Arc::new(TokenProvider::new(exchange.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.acquire().await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.secret(), "token-1");
        }
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let exchange = CountingExchange::new(Duration::from_secs(3600));
        let provider = TokenProvider::new(exchange.clone());

        provider.acquire().await.unwrap();
        let token = provider.acquire().await.unwrap();

        assert_eq!(token.secret(), "token-1");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_near_expiry_token_is_replaced() {
        // Lifetime inside the refresh margin: never good enough to reuse
        let exchange = CountingExchange::new(Duration::from_secs(60));
        let provider = TokenProvider::new(exchange.clone());

        provider.acquire().await.unwrap();
        let token = provider.acquire().await.unwrap();

        assert_eq!(token.secret(), "token-2");
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_cleared() {
        let exchange = CountingExchange::failing();
        let provider = Arc::new(TokenProvider::new(exchange.clone()));

        let (a, b) = tokio::join!(provider.acquire(), provider.acquire());
        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert!(matches!(a, TokenError::Rejected { .. }));
        assert_eq!(a, b);
        assert_eq!(exchange.calls(), 1);

        // The failed exchange is not reused
        assert!(provider.acquire().await.is_err());
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_exchange_is_not_joined_again() {
        let exchange = CountingExchange::failing();
        let provider = Arc::new(TokenProvider::new(exchange.clone()));

        let caller = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Keep the caller from getting back into the state once the exchange
        // has finished, then cancel it
        let guard = provider.state.lock().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert!(guard.pending.as_ref().is_some_and(|p| p.peek().is_some()));
        drop(guard);

        assert!(provider.acquire().await.is_err());
        assert_eq!(exchange.calls(), 2);
        assert!(provider.state.lock().await.pending.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_token_is_cached() {
        let exchange = CountingExchange::new(Duration::from_secs(3600));
        let provider = Arc::new(TokenProvider::new(exchange.clone()));

        let caller = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard = provider.state.lock().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        let _ = caller.await;
        drop(guard);

        let token = provider.acquire().await.unwrap();
        assert_eq!(token.secret(), "token-1");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_exchange() {
        let exchange = CountingExchange::new(Duration::from_secs(3600));
        let provider = TokenProvider::new(exchange.clone());

        provider.acquire().await.unwrap();
        provider.invalidate().await;
        let token = provider.acquire().await.unwrap();

        assert_eq!(token.secret(), "token-2");
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = AccessToken::new("eyJ0eXAiOiJKV1Qi", Duration::from_secs(60));
        assert!(!format!("{:?}", token).contains("eyJ0"));
    }

    #[test]
    fn test_token_validity() {
        let token = AccessToken::new("t", Duration::from_secs(600));
        assert!(token.is_valid_for(Duration::from_secs(300)));
        assert!(!token.is_valid_for(Duration::from_secs(900)));

        let expired = AccessToken::new("t", Duration::ZERO);
        assert_eq!(expired.expires_in(), Duration::ZERO);
    }
}
