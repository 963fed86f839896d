//! Inbound provider notifications.
//!
//! Deliveries are signed with HMAC-SHA256 over `"{timestamp}.{body}"` and
//! carry the signature as `t=<unix seconds>,v1=<hex digest>`. Each event is
//! mapped onto the same compare-and-swap transitions the engine uses, so a
//! redelivered event finds the work already done and changes nothing.

use crate::application::escrow::EscrowEngine;
use crate::domain::ids::PaymentId;
use crate::domain::payment::Payment;
use crate::domain::payment_method::ProviderKind;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Default allowed clock skew between sender and receiver.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: u64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| EscrowError::ValidationError("Unusable webhook secret".to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Produces the signature header for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let timestamp = timestamp.to_string();
        let digest = self.mac(&timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }

    /// Checks the signature header against `payload` as of `now`.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<()> {
        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = Some(t),
                Some(("v1", v)) => signature = Some(v),
                _ => {}
            }
        }
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(EscrowError::Unauthorized(
                "Missing webhook timestamp or signature".to_string(),
            ));
        };

        let sent_at: i64 = timestamp
            .parse()
            .map_err(|_| EscrowError::Unauthorized("Invalid webhook timestamp".to_string()))?;
        let age = (now.timestamp() - sent_at).unsigned_abs();
        if age > self.tolerance_secs {
            return Err(EscrowError::Unauthorized(format!(
                "Webhook timestamp outside tolerance: {} seconds",
                age
            )));
        }

        let expected = hex::decode(signature)
            .map_err(|_| EscrowError::Unauthorized("Malformed webhook signature".to_string()))?;
        self.mac(timestamp, payload)?
            .verify_slice(&expected)
            .map_err(|_| EscrowError::Unauthorized("Webhook signature mismatch".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: WebhookResource,
}

/// The payment an event refers to and what happened to it.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookResource {
    pub payment_id: Option<PaymentId>,
    /// The idempotency key the payout or refund was sent with.
    pub idempotency_key: Option<String>,
    pub provider: Option<ProviderKind>,
    pub payout_ref: Option<String>,
    pub capture_ref: Option<String>,
    pub reason: Option<String>,
}

impl WebhookResource {
    fn payment_id(&self) -> Result<PaymentId> {
        self.payment_id
            .or_else(|| {
                self.idempotency_key
                    .as_deref()
                    .and_then(PaymentId::from_idempotency_key)
            })
            .ok_or_else(|| {
                EscrowError::ValidationError("Webhook does not identify a payment".to_string())
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied(Payment),
    /// The event was delivered before; nothing changed.
    Duplicate,
    /// Unknown event type, or one that no longer applies to the payment.
    Ignored,
}

pub struct WebhookHandler {
    engine: EscrowEngine,
    verifier: WebhookVerifier,
}

impl WebhookHandler {
    pub fn new(engine: EscrowEngine, verifier: WebhookVerifier) -> Self {
        Self { engine, verifier }
    }

    pub async fn handle(&self, body: &[u8], signature: &str) -> Result<WebhookOutcome> {
        self.verifier.verify(body, signature, self.engine.now())?;
        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| EscrowError::ValidationError(format!("Malformed webhook body: {}", e)))?;
        debug!(event_id = %event.id, event_type = %event.event_type, "webhook received");

        let result = match event.event_type.as_str() {
            "payout.completed" => self.payout_completed(&event).await,
            "payout.failed" => self.payout_failed(&event).await,
            "capture.completed" => self.capture_completed(&event).await,
            other => {
                debug!(event_id = %event.id, event_type = other, "unhandled webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        match result {
            Ok(Some(payment)) => {
                info!(
                    event_id = %event.id,
                    payment_id = %payment.id,
                    state = %payment.state,
                    "webhook applied"
                );
                Ok(WebhookOutcome::Applied(payment))
            }
            Ok(None) => {
                debug!(event_id = %event.id, "duplicate webhook delivery");
                Ok(WebhookOutcome::Duplicate)
            }
            Err(EscrowError::InvalidTransition { current, requested }) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    %current,
                    %requested,
                    "webhook does not apply to payment state"
                );
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    fn source(event: &WebhookEvent) -> String {
        match event.resource.provider {
            Some(provider) => format!("webhook:{}", provider),
            None => "webhook".to_string(),
        }
    }

    async fn payout_completed(&self, event: &WebhookEvent) -> Result<Option<Payment>> {
        let id = event.resource.payment_id()?;
        let payout_ref = event.resource.payout_ref.as_deref().ok_or_else(|| {
            EscrowError::ValidationError("payout.completed without payout_ref".to_string())
        })?;
        self.engine
            .apply_payout_confirmation(id, payout_ref, &Self::source(event))
            .await
    }

    async fn payout_failed(&self, event: &WebhookEvent) -> Result<Option<Payment>> {
        let id = event.resource.payment_id()?;
        let reason = event.resource.reason.as_deref().unwrap_or("no reason given");
        self.engine
            .apply_payout_failure(id, reason, &Self::source(event))
            .await
    }

    async fn capture_completed(&self, event: &WebhookEvent) -> Result<Option<Payment>> {
        let id = event.resource.payment_id()?;
        let (Some(provider), Some(capture_ref)) =
            (event.resource.provider, event.resource.capture_ref.as_deref())
        else {
            return Err(EscrowError::ValidationError(
                "capture.completed needs provider and capture_ref".to_string(),
            ));
        };
        self.engine.record_capture(id, provider, capture_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::from("whsec_test".to_string()))
    }

    #[test]
    fn test_sign_and_verify() {
        let now = Utc::now();
        let body = br#"{"id":"evt_1","event_type":"payout.completed"}"#;
        let header = verifier().sign(body, now.timestamp()).unwrap();
        assert!(header.starts_with("t="));
        assert!(header.contains(",v1="));
        assert!(verifier().verify(body, &header, now).is_ok());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let now = Utc::now();
        let header = verifier().sign(b"original", now.timestamp()).unwrap();
        assert!(matches!(
            verifier().verify(b"tampered", &header, now),
            Err(EscrowError::Unauthorized(_))
        ));

        let other = WebhookVerifier::new(SecretString::from("other".to_string()));
        assert!(other.verify(b"original", &header, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let now = Utc::now();
        let header = verifier().sign(b"body", now.timestamp() - 600).unwrap();
        assert!(verifier().verify(b"body", &header, now).is_err());
        assert!(
            verifier()
                .with_tolerance(900)
                .verify(b"body", &header, now)
                .is_ok()
        );
        assert!(verifier().verify(b"body", "garbage", now).is_err());
    }
}
