//! graph-relay - Relay raw EML messages through Microsoft Graph
//!
//! Takes RFC822 messages from disk and submits them to the Graph `sendMail`
//! endpoint as base64-encoded MIME, authenticating with an OAuth2
//! client-credential flow.
//!
//! # Architecture
//!
//! - **relay**: Send orchestration (concurrency slots, sender resolution, error classification)
//! - **auth**: Token provider with caching and singleflight exchange
//! - **graph**: HTTP client, retry-aware request executor, Graph error payloads
//! - **config**: YAML configuration and validation
//! - **eml** (crate): Sender extraction and streaming base64 encoding
//!
//! # Example
//!
//! ```no_run
//! use graph_relay::{RelayConfig, RelayService};
//!
//! # async fn example() -> graph_relay::Result<()> {
//! let config = RelayConfig::load_default()?;
//! let service = RelayService::from_config(&config)?;
//! service.send_message("/var/spool/relay/0001.eml").await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod relay;

// Re-exports
pub use auth::{AccessToken, TokenError, TokenProvider};
pub use config::RelayConfig;
pub use eml::Address;
pub use error::{RelayError, Result};
pub use relay::RelayService;
