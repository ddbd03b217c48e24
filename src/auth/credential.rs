//! OAuth2 client-credential exchange against the identity platform
//!
//! Supports a shared secret or a certificate. With a certificate the client
//! proves its identity with a short-lived RS256 JWT (the client assertion)
//! whose header names the certificate by thumbprint.

use super::{AccessToken, TokenError, TokenExchange};
use crate::config::AuthConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for one token request
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime of a client assertion
const ASSERTION_LIFETIME_SECS: i64 = 600;

const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// How the application proves its identity
#[derive(Clone)]
pub enum Credential {
    Secret(String),
    Certificate {
        /// Raw SHA-1 thumbprint bytes
        thumbprint: Vec<u8>,
        key: EncodingKey,
    },
}

impl Credential {
    /// Load a certificate credential from a hex thumbprint and a PEM key file
    pub fn certificate(thumbprint: &str, private_key_pem: &[u8]) -> Result<Self, TokenError> {
        let thumbprint = hex::decode(thumbprint.trim())
            .map_err(|e| TokenError::InvalidCredential(format!("thumbprint: {}", e)))?;
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| TokenError::InvalidCredential(format!("private key: {}", e)))?;
        Ok(Credential::Certificate { thumbprint, key })
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Secret(_) => f.write_str("Secret(<redacted>)"),
            Credential::Certificate { thumbprint, .. } => f
                .debug_struct("Certificate")
                .field("thumbprint", &hex::encode(thumbprint))
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3599
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    nbf: i64,
    exp: i64,
}

/// The production [`TokenExchange`]
#[derive(Debug, Clone)]
pub struct ClientCredentialExchange {
    client: Client,
    token_url: String,
    scope: String,
    identity: Option<(String, Credential)>,
}

impl ClientCredentialExchange {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        graph_url: &str,
        identity: Option<(String, Credential)>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            scope: format!("{}/.default", graph_url.trim_end_matches('/')),
            identity,
        }
    }

    /// Build from configuration
    ///
    /// No client id, or a client id without any credential, leaves the
    /// exchange unconfigured rather than failing here.
    pub fn from_config(client: Client, auth: &AuthConfig, graph_url: &str) -> Result<Self, TokenError> {
        let credential = match auth.certificate {
            Some(ref cert) => {
                let pem = std::fs::read(&cert.private_key_path).map_err(|e| {
                    TokenError::InvalidCredential(format!(
                        "reading {}: {}",
                        cert.private_key_path.display(),
                        e
                    ))
                })?;
                Some(Credential::certificate(&cert.thumbprint, &pem)?)
            }
            None => auth.client_secret().map(Credential::Secret),
        };

        let identity = match (auth.client_id.clone(), credential) {
            (Some(client_id), Some(credential)) => Some((client_id, credential)),
            _ => None,
        };

        Ok(Self::new(client, auth.token_url(), graph_url, identity))
    }

    pub fn is_configured(&self) -> bool {
        self.identity.is_some()
    }

    fn client_assertion(
        &self,
        client_id: &str,
        thumbprint: &[u8],
        key: &EncodingKey,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            aud: &self.token_url,
            iss: client_id,
            sub: client_id,
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(URL_SAFE_NO_PAD.encode(thumbprint));

        jsonwebtoken::encode(&header, &claims, key)
            .map_err(|e| TokenError::InvalidCredential(format!("signing assertion: {}", e)))
    }
}

#[async_trait]
impl TokenExchange for ClientCredentialExchange {
    async fn exchange(&self) -> Result<AccessToken, TokenError> {
        let Some((ref client_id, ref credential)) = self.identity else {
            return Err(TokenError::NotConfigured);
        };

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.clone()),
            ("scope", self.scope.clone()),
        ];
        match credential {
            Credential::Secret(secret) => form.push(("client_secret", secret.clone())),
            Credential::Certificate { thumbprint, key } => {
                form.push(("client_assertion_type", JWT_BEARER_ASSERTION.to_string()));
                form.push((
                    "client_assertion",
                    self.client_assertion(client_id, thumbprint, key)?,
                ));
            }
        }

        tracing::debug!(url = %self.token_url, client_id = %client_id, "Requesting access token");

        let response = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(rejection) => TokenError::Rejected {
                    error: rejection.error,
                    description: rejection.error_description.unwrap_or_default(),
                },
                Err(_) => TokenError::Request(format!("HTTP {}: {}", status, body)),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| TokenError::MalformedResponse(e.to_string()))?;

        tracing::info!(expires_in_secs = token.expires_in, "Access token acquired");

        Ok(AccessToken::new(
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }
}
