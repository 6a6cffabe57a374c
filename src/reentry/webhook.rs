use crate::config::WebhookSettings;
use crate::error::OrchestrationError;
use crate::messaging::StepMessage;
use crate::orchestration::{OrchestrationEngine, StepOutcome};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body
pub const SIGNATURE_HEADER: &str = "X-Stepflow-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature missing or wrong; the engine was not called
    #[error("Webhook rejected: {reason}")]
    Rejected { reason: String },

    #[error("Malformed webhook body: {0}")]
    Malformed(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Engine(#[from] OrchestrationError),
}

impl WebhookError {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Current key plus the key being rotated in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeys {
    pub current: String,
    pub next: Option<String>,
}

impl SigningKeys {
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            next: None,
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Keys from configuration; `None` when no current key is set
    pub fn from_settings(settings: &WebhookSettings) -> Option<Self> {
        let current = settings.current_signing_key.clone()?;
        Some(Self {
            current,
            next: settings.next_signing_key.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    keys: SigningKeys,
}

impl SignatureVerifier {
    pub fn new(keys: SigningKeys) -> Self {
        Self { keys }
    }

    /// Hex signature of `body` under the current key
    pub fn sign(&self, body: &[u8]) -> Result<String, WebhookError> {
        let mac = mac_for(&self.keys.current, body)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check `signature` against the current key, then the next key.
    /// Accepts an optional `sha256=` prefix.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let signature = signature.trim();
        let signature = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };

        std::iter::once(&self.keys.current)
            .chain(self.keys.next.iter())
            .any(|key| mac_for(key, body).is_ok_and(|mac| mac.verify_slice(&expected).is_ok()))
    }
}

fn mac_for(key: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(mac)
}

/// Verifies signed step deliveries and passes them to the engine
#[derive(Debug, Clone)]
pub struct WebhookHandler {
    engine: Arc<OrchestrationEngine>,
    verifier: SignatureVerifier,
}

impl WebhookHandler {
    pub fn new(engine: Arc<OrchestrationEngine>, keys: SigningKeys) -> Self {
        Self {
            engine,
            verifier: SignatureVerifier::new(keys),
        }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<StepOutcome, WebhookError> {
        let Some(signature) = signature else {
            warn!("Webhook delivery without signature rejected");
            return Err(WebhookError::rejected(format!("missing {SIGNATURE_HEADER} header")));
        };
        if !self.verifier.verify(body, signature) {
            warn!("Webhook delivery with invalid signature rejected");
            return Err(WebhookError::rejected("signature does not match"));
        }

        let message =
            StepMessage::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        debug!(
            execution_id = %message.execution_id,
            step_id = %message.step_id,
            "Verified webhook delivery"
        );

        Ok(self.engine.handle_step(message).await?)
    }
}
