//! Configuration system
//!
//! Loads ~/.config/graph-relay/config.yaml with support for:
//! - Client secret or certificate identities
//! - Secrets resolved from environment variables
//! - Send concurrency, retry and timer tuning
//! - An optional outbound proxy

mod relay_config;
pub mod validation;

pub use relay_config::{AuthConfig, CertificateConfig, GraphConfig, ProxyConfig, RelayConfig};
pub use validation::{validate_config, validate_config_result, ValidationError};
