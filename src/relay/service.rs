//! The relay service

use crate::auth::{ClientCredentialExchange, TokenProvider};
use crate::config::{validate_config_result, RelayConfig};
use crate::graph::{
    self, ErrorCode, ExecuteError, GraphError, RequestBody, RequestExecutor, RequestSpec,
};
use crate::{RelayError, Result};
use eml::Address;
use futures::future::join_all;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, Instrument};

/// Result of one send in a batch
pub type SendOutcome = (PathBuf, Result<()>);

/// Relays EML files through Graph `sendMail`
///
/// Owns the shared state of all sends: the token provider, the executor and
/// the slots bounding how many sends run at once.
#[derive(Debug)]
pub struct RelayService {
    tokens: Arc<TokenProvider>,
    executor: RequestExecutor,
    slots: Semaphore,
    graph_url: String,
    force_sender: Option<Address>,
}

impl RelayService {
    pub fn new(
        tokens: Arc<TokenProvider>,
        executor: RequestExecutor,
        graph_url: impl Into<String>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            tokens,
            executor,
            slots: Semaphore::new(max_concurrency),
            graph_url: graph_url.into().trim_end_matches('/').to_string(),
            force_sender: None,
        }
    }

    /// Send every message as `sender`, ignoring the message headers
    pub fn with_force_sender(mut self, sender: Option<Address>) -> Self {
        self.force_sender = sender;
        self
    }

    /// Build the service and everything it shares from configuration
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        validate_config_result(config)?;

        let client = graph::http_client(config.proxy.as_ref())?;
        let exchange =
            ClientCredentialExchange::from_config(client.clone(), &config.auth, &config.graph.url)?;
        let tokens = Arc::new(TokenProvider::new(Arc::new(exchange)));
        let executor = RequestExecutor::new(client)
            .with_retry_config(config.graph.retry_config())
            .with_timeouts(config.graph.timeouts());

        info!(
            graph_url = %config.graph.url,
            max_concurrency = config.graph.max_concurrency,
            force_sender = ?config.graph.force_sender.as_ref().map(|a| a.to_string()),
            "Relay service ready"
        );

        Ok(
            Self::new(tokens, executor, &config.graph.url, config.graph.max_concurrency)
                .with_force_sender(config.graph.force_sender.clone()),
        )
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    /// Sends that may start right now
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Relay one message
    ///
    /// Waits for a free send slot first; the slot is held until the send has
    /// settled either way.
    pub async fn send_message(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|e| RelayError::Other(format!("send slots closed: {}", e)))?;

        let sender = self.resolve_sender(path).await?;
        let token = self.tokens.acquire().await?;

        let spec = RequestSpec::post(self.send_mail_url(&sender))
            .bearer(token.secret())
            .header(CONTENT_TYPE, "text/plain")
            .header(USER_AGENT, graph::USER_AGENT)
            .body(RequestBody::Base64File(path.to_path_buf()));

        debug!(sender = %sender, "Submitting message");

        match self.executor.execute(&spec).await {
            Ok(response) => {
                info!(sender = %sender, status = response.status.as_u16(), "Message relayed");
                Ok(())
            }
            Err(e) => Err(classify_failure(e, path, &sender)),
        }
    }

    /// Relay many messages at once, bounded by the send slots
    ///
    /// Outcomes come back in the order of `paths`.
    pub async fn send_all(&self, paths: &[PathBuf]) -> Vec<SendOutcome> {
        let sends = paths.iter().map(|path| {
            let span = info_span!("send", path = %path.display());
            async move { (path.clone(), self.send_message(path).await) }.instrument(span)
        });
        join_all(sends).await
    }

    async fn resolve_sender(&self, path: &Path) -> Result<Address> {
        if let Some(ref sender) = self.force_sender {
            return Ok(sender.clone());
        }

        eml::extract_sender(path)
            .await?
            .ok_or_else(|| RelayError::NoSender {
                path: path.to_path_buf(),
            })
    }

    fn send_mail_url(&self, sender: &Address) -> String {
        format!(
            "{}/v1.0/users/{}/sendMail",
            self.graph_url,
            urlencoding::encode(&sender.to_string())
        )
    }
}

/// Map a failed send to the error the caller sees
///
/// Only failures carrying a Graph error payload are reclassified; transport
/// failures and timeouts pass through.
pub fn classify_failure(error: ExecuteError, path: &Path, sender: &Address) -> RelayError {
    match error {
        ExecuteError::Status { status, body, .. } => match GraphError::parse(&body) {
            Some(graph) => match graph.code {
                ErrorCode::AccessDenied => RelayError::MailboxAccessDenied {
                    sender: sender.clone(),
                },
                ErrorCode::InvalidMimeContent => RelayError::InvalidMailContent {
                    path: path.to_path_buf(),
                },
                ErrorCode::MessageSizeExceeded => RelayError::MessageSizeExceeded {
                    path: path.to_path_buf(),
                },
                ErrorCode::Other(_) => RelayError::Provider {
                    status: status.as_u16(),
                    payload: graph.payload,
                },
            },
            None => RelayError::UnexpectedResponse {
                status: status.as_u16(),
                body,
            },
        },
        ExecuteError::Timeout(reason) => RelayError::Timeout(reason),
        ExecuteError::Transport(e) => RelayError::Http(e),
        ExecuteError::Io(e) => RelayError::Io(e),
    }
}
