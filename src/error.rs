//! Error types for graph-relay
//!
//! Every failure a send can end in maps to exactly one variant. The variants
//! produced from provider error codes are permanent: resubmitting the same
//! message will fail the same way.

use crate::auth::TokenError;
use crate::graph::retry::{RetryDecision, RetryableError};
use eml::Address;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for graph-relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token acquisition errors
    #[error("Authentication error: {0}")]
    Auth(#[from] TokenError),

    /// No forced sender configured and none found in the message headers
    #[error("No sender address found in {}", path.display())]
    NoSender { path: PathBuf },

    /// Graph refused to send as this mailbox
    #[error("Mailbox access denied for sender {sender}")]
    MailboxAccessDenied { sender: Address },

    /// Graph could not decode the message
    #[error("Invalid mail content in {}", path.display())]
    InvalidMailContent { path: PathBuf },

    /// Graph rejected the message as too large
    #[error("Message size exceeded for {}", path.display())]
    MessageSizeExceeded { path: PathBuf },

    /// A request timer fired before the call completed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Graph error payload with a code we don't classify
    #[error("Graph API error (HTTP {status}): {payload}")]
    Provider { status: u16, payload: String },

    /// Non-success response without a Graph error payload
    #[error("Unexpected response (HTTP {status}): {body}")]
    UnexpectedResponse { status: u16, body: String },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Whether resubmitting the same message can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RelayError::Config(_)
                | RelayError::Auth(TokenError::NotConfigured)
                | RelayError::NoSender { .. }
                | RelayError::MailboxAccessDenied { .. }
                | RelayError::InvalidMailContent { .. }
                | RelayError::MessageSizeExceeded { .. }
        )
    }
}

impl RetryableError for RelayError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            // Throttling that outlasted the executor's own retries
            RelayError::UnexpectedResponse { status, .. } | RelayError::Provider { status, .. }
                if matches!(*status, 429 | 503 | 504) =>
            {
                RetryDecision::Retry
            }
            RelayError::Http(e) if e.is_connect() => RetryDecision::Retry,
            // Token exchange failures are surfaced, never resubmitted
            _ => RetryDecision::NoRetry,
        }
    }
}
