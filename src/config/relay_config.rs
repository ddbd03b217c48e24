//! graph-relay configuration file handling
//!
//! Loads and manages the ~/.config/graph-relay/config.yaml file.

use crate::graph::{RetryConfig, Timeouts};
use crate::{RelayError, Result};
use eml::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Certificate identity for the client assertion flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// Hex SHA-1 thumbprint of the uploaded certificate
    pub thumbprint: String,

    /// PEM-encoded RSA private key matching the certificate
    pub private_key_path: PathBuf,
}

/// Application identity used for the client-credential exchange
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token authority, including the tenant
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Application (client) id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret given inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Name of an environment variable holding the client secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,

    /// Certificate credential, used instead of a secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateConfig>,
}

fn default_authority() -> String {
    "https://login.microsoftonline.com/common".to_string()
}

impl AuthConfig {
    /// Resolve the client secret, preferring the inline value
    pub fn client_secret(&self) -> Option<String> {
        if let Some(ref secret) = self.client_secret {
            return Some(secret.clone());
        }
        let var = self.client_secret_env.as_ref()?;
        match std::env::var(var) {
            Ok(secret) if !secret.is_empty() => Some(secret),
            _ => {
                tracing::warn!(env_var = %var, "Client secret environment variable not set");
                None
            }
        }
    }

    /// Token endpoint derived from the authority
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority.trim_end_matches('/'))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            client_id: None,
            client_secret: None,
            client_secret_env: None,
            certificate: None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("client_secret_env", &self.client_secret_env)
            .field("certificate", &self.certificate)
            .finish()
    }
}

/// Graph endpoint and send tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Base URL of the Graph API
    #[serde(default = "default_graph_url")]
    pub url: String,

    /// Send every message as this mailbox instead of the header sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_sender: Option<Address>,

    /// Sends allowed in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries after a throttled attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First exponential backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Time allowed until the upload starts
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Time allowed for a whole attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_graph_url() -> String {
    crate::graph::DEFAULT_GRAPH_URL.to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

impl GraphConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..Default::default()
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            attempt: Duration::from_secs(self.attempt_timeout_secs),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: default_graph_url(),
            force_sender: None,
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

/// Outbound HTTP proxy
#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Comma-separated hosts that bypass the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("no_proxy", &self.no_proxy)
            .finish()
    }
}

/// graph-relay configuration
///
/// Represents the complete ~/.config/graph-relay/config.yaml file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

impl RelayConfig {
    /// Load configuration from the default path (~/.config/graph-relay/config.yaml)
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RelayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading graph-relay configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;

        tracing::debug!(
            graph_url = %config.graph.url,
            max_concurrency = config.graph.max_concurrency,
            proxy = config.proxy.is_some(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Get the default config path (~/.config/graph-relay/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("graph-relay");
        path.push("config.yaml");
        path
    }
}
