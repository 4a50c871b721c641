//! `AuthProvider` — the external identity provider seam.
//!
//! The funnel only sees the shape of the exchange result: whether the
//! authenticated identity is new to the service, plus an opaque
//! certification record for new identities.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

/// Outcome of exchanging an authorization code with the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityOutcome {
    pub is_new_user: bool,
    /// Present for new identities; stored verbatim in the session.
    #[serde(default)]
    pub certification: Option<Value>,
}

/// Provider-side failures. These never kill the session — the bridge folds
/// them into `VerificationResult::Failed`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Request(String),

    #[error("Provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider denied the authorization code")]
    Denied,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Exchange an authorization code for an identity outcome.
    async fn exchange_code(&self, code: &str) -> Result<IdentityOutcome, ProviderError>;
}

/// HTTP identity provider — POSTs the code to the provider's exchange
/// endpoint and parses the JSON outcome.
pub struct HttpAuthProvider {
    client: reqwest::Client,
    exchange_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl HttpAuthProvider {
    pub fn new(
        exchange_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            exchange_url: exchange_url.into(),
            client_id: client_id.into(),
            client_secret,
        }
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn exchange_code(&self, code: &str) -> Result<IdentityOutcome, ProviderError> {
        let response = self
            .client
            .post(&self.exchange_url)
            .json(&serde_json::json!({
                "code": code,
                "client_id": self.client_id,
                "client_secret": self.client_secret.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Denied);
        }
        if !status.is_success() {
            return Err(ProviderError::Request(format!(
                "unexpected status {status}"
            )));
        }

        response
            .json::<IdentityOutcome>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Canned provider for tests and demos. Optionally sleeps before answering
/// to exercise timeout and cancellation paths.
pub struct StaticAuthProvider {
    is_new_user: bool,
    certification: Option<Value>,
    delay: Duration,
}

impl StaticAuthProvider {
    /// Provider that reports a brand-new identity.
    pub fn new_user(certification: Value) -> Self {
        Self {
            is_new_user: true,
            certification: Some(certification),
            delay: Duration::ZERO,
        }
    }

    /// Provider that reports an already-registered identity.
    pub fn existing_user() -> Self {
        Self {
            is_new_user: false,
            certification: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn exchange_code(&self, _code: &str) -> Result<IdentityOutcome, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(IdentityOutcome {
            is_new_user: self.is_new_user,
            certification: self.certification.clone(),
        })
    }
}
