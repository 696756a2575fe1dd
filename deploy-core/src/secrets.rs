//! Secret delivery to a verified instance.
//!
//! The delivery client is pinned to the exact certificate returned by
//! attestation verification, not the system trust store: the certificate
//! was already judged trustworthy, and pinning rules out a downgrade onto
//! an unverified connection between verification and delivery.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;

/// Header the bootstrap stub sets while the real application has not yet
/// taken over serving.
pub const BOOTSTRAPPING_HEADER: &str = "x-app-bootstrapping";

/// Secret material posted to the instance's bootstrap endpoint.
#[derive(Debug, Serialize)]
pub struct SecretPayload {
    pub instance_id: Uuid,
    /// Hex-encoded code decryption key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_secrets: Option<Value>,
}

/// Client for the in-enclave bootstrap endpoint.
pub struct SecretDeliveryClient {
    client: reqwest::Client,
    base_url: String,
    cancel: CancellationToken,
}

impl SecretDeliveryClient {
    /// Build a client pinned to `certificate_der`, talking to the
    /// instance's configured domain.
    pub fn new(domain: &str, certificate_der: &[u8]) -> Result<Self, Error> {
        let client = attestation_verifier::tls::pinned_client(certificate_der)?;
        Ok(Self {
            client,
            base_url: format!("https://{domain}"),
            cancel: CancellationToken::new(),
        })
    }

    /// Bypass pinning with a caller-supplied client. Test seam.
    #[doc(hidden)]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the readiness poll cleanly when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Post the secrets to the bootstrap endpoint.
    pub async fn deliver(&self, payload: &SecretPayload) -> Result<(), Error> {
        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedResponse {
                status_code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Poll the healthcheck until the application itself (not the
    /// bootstrap stub) answers, or `timeout` elapses.
    pub async fn await_ready(
        &self,
        healthcheck_path: &str,
        timeout: Duration,
        period: Duration,
    ) -> Result<(), Error> {
        let attempts = (timeout.as_millis() / period.as_millis()).max(1) as u64;
        let url = format!("{}{healthcheck_path}", self.base_url);

        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.client.get(&url).send().await {
                Ok(response)
                    if response.status().is_success()
                        && !response.headers().contains_key(BOOTSTRAPPING_HEADER) =>
                {
                    return Ok(());
                }
                Ok(response) => {
                    debug!(
                        "healthcheck not ready yet (status {}, bootstrapping={})",
                        response.status(),
                        response.headers().contains_key(BOOTSTRAPPING_HEADER)
                    );
                }
                // The instance may briefly drop connections while the real
                // application takes over the listener.
                Err(e) => debug!("healthcheck connection failed: {e}"),
            }

            if attempt + 1 < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }

        Err(Error::Timeout {
            waited: timeout,
            hint: format!("application never became ready on {healthcheck_path}"),
        })
    }
}
