//! Configuration validation
//!
//! Validates graph-relay configuration for correctness:
//! - Valid authority, Graph and proxy URLs
//! - A single, complete credential
//! - Certificate thumbprint and key file
//! - Usable concurrency and timer settings

use super::relay_config::{AuthConfig, GraphConfig, ProxyConfig, RelayConfig};
use crate::RelayError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a graph-relay configuration
///
/// A missing identity is not an error here: the relay still starts and
/// every token request fails as not configured.
pub fn validate_config(config: &RelayConfig) -> ValidationResult {
    let mut errors = Vec::new();

    errors.extend(validate_auth(&config.auth).err().unwrap_or_default());
    errors.extend(validate_graph(&config.graph).err().unwrap_or_default());
    if let Some(ref proxy) = config.proxy {
        errors.extend(validate_proxy(proxy).err().unwrap_or_default());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_auth(auth: &AuthConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if !is_http_url(&auth.authority) {
        errors.push(
            ValidationError::new("authority", format!("Invalid URL: {}", auth.authority))
                .with_context("auth"),
        );
    }

    let has_secret = auth.client_secret.is_some() || auth.client_secret_env.is_some();

    if auth.client_id.is_none() {
        if has_secret || auth.certificate.is_some() {
            errors.push(
                ValidationError::new("client_id", "A credential is set but client_id is missing")
                    .with_context("auth"),
            );
        } else {
            tracing::warn!("No application identity configured; token requests will fail");
        }
    }

    if has_secret && auth.certificate.is_some() {
        errors.push(
            ValidationError::new(
                "certificate",
                "Configure either a client secret or a certificate, not both",
            )
            .with_context("auth"),
        );
    }

    if let Some(ref cert) = auth.certificate {
        if !is_sha1_thumbprint(&cert.thumbprint) {
            errors.push(
                ValidationError::new(
                    "certificate.thumbprint",
                    format!("Expected 40 hex digits, got '{}'", cert.thumbprint),
                )
                .with_context("auth"),
            );
        }

        if !cert.private_key_path.exists() {
            errors.push(
                ValidationError::new(
                    "certificate.private_key_path",
                    format!("File not found: {}", cert.private_key_path.display()),
                )
                .with_context("auth"),
            );
        }
    }

    if let Some(ref var) = auth.client_secret_env {
        if std::env::var(var).is_err() {
            tracing::warn!(
                env_var = %var,
                "Environment variable not set (this may be intentional if set at runtime)"
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_graph(graph: &GraphConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if !is_http_url(&graph.url) {
        errors.push(
            ValidationError::new("url", format!("Invalid URL: {}", graph.url)).with_context("graph"),
        );
    }

    if graph.max_concurrency == 0 {
        errors.push(
            ValidationError::new("max_concurrency", "Must be greater than 0").with_context("graph"),
        );
    }

    if graph.connect_timeout_secs == 0 {
        errors.push(
            ValidationError::new("connect_timeout_secs", "Must be greater than 0")
                .with_context("graph"),
        );
    }

    if graph.attempt_timeout_secs < graph.connect_timeout_secs {
        errors.push(
            ValidationError::new(
                "attempt_timeout_secs",
                format!(
                    "Must not be shorter than connect_timeout_secs ({})",
                    graph.connect_timeout_secs
                ),
            )
            .with_context("graph"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_proxy(proxy: &ProxyConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if reqwest::Proxy::all(&proxy.url).is_err() {
        errors.push(
            ValidationError::new("url", format!("Invalid proxy URL: {}", proxy.url))
                .with_context("proxy"),
        );
    }

    if proxy.password.is_some() && proxy.username.is_none() {
        errors.push(
            ValidationError::new("username", "A password is set but username is missing")
                .with_context("proxy"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn is_sha1_thumbprint(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &RelayConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RelayError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
