//! Microsoft Graph HTTP plumbing
//!
//! The shared HTTP client, the retry-aware request executor and parsing of
//! Graph error payloads.

pub mod error;
pub mod executor;
pub mod retry;

pub use error::{ErrorCode, GraphError};
pub use executor::{
    ExecuteError, ExecutedResponse, RequestBody, RequestExecutor, RequestSpec, Timeouts,
};
pub use retry::{with_retry, Backoff, RetryConfig, RetryDecision, RetryableError};

use crate::config::ProxyConfig;
use crate::Result;
use reqwest::{Client, NoProxy, Proxy};

/// Public Graph endpoint
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";

/// `User-Agent` sent with every request
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the token exchange and the sender
///
/// Without a configured proxy, proxies from the environment are ignored too.
pub fn http_client(proxy: Option<&ProxyConfig>) -> Result<Client> {
    let mut builder = Client::builder().user_agent(USER_AGENT);

    match proxy {
        Some(config) => {
            let mut proxy = Proxy::all(&config.url)?;
            if let Some(ref username) = config.username {
                proxy = proxy.basic_auth(username, config.password.as_deref().unwrap_or_default());
            }
            if let Some(ref hosts) = config.no_proxy {
                proxy = proxy.no_proxy(NoProxy::from_string(hosts));
            }
            tracing::debug!(proxy = %config.url, "Routing Graph traffic through proxy");
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    Ok(builder.build()?)
}
