use crate::domain::money::Money;
use crate::domain::payment_method::ProviderKind;
use crate::domain::provider::{
    AccessToken, CaptureOutcome, ChargeHandle, PaymentProvider, PayoutOutcome, PayoutRequest,
    RefundOutcome,
};
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

/// Notification-only provider for networks without a payout API
/// (Cash App, Coinbase, Zelle-style bank transfer).
///
/// A payout raises an operator notification and yields `PendingManual`; the
/// funds are sent by hand and confirmed through the admin handler. Earlier
/// notifications are looked up by idempotency key so a retry never asks the
/// operator to pay twice.
pub struct ManualProvider {
    kind: ProviderKind,
    notified: Mutex<HashMap<String, PayoutOutcome>>,
}

impl ManualProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            notified: Mutex::new(HashMap::new()),
        }
    }

    fn unsupported(&self, capability: &str) -> ProviderError {
        ProviderError::Rejected(format!(
            "{} has no programmatic {} API",
            self.kind, capability
        ))
    }
}

#[async_trait]
impl PaymentProvider for ManualProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authorize(&self) -> ProviderResult<AccessToken> {
        Ok(AccessToken(String::new()))
    }

    async fn create_charge(&self, _money: &Money, _description: &str) -> ProviderResult<ChargeHandle> {
        Err(self.unsupported("charge"))
    }

    async fn capture_charge(&self, _charge_ref: &str) -> ProviderResult<CaptureOutcome> {
        Err(self.unsupported("capture"))
    }

    async fn payout(&self, request: &PayoutRequest) -> ProviderResult<PayoutOutcome> {
        let mut notified = self.notified.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prior) = notified.get(&request.idempotency_key) {
            return Ok(prior.clone());
        }

        tracing::warn!(
            provider = %self.kind,
            destination = %request.destination.account_identifier,
            amount = %request.money,
            key = %request.idempotency_key,
            "manual payout required"
        );
        let outcome = PayoutOutcome::PendingManual {
            reference: request.idempotency_key.clone(),
            raw: json!({
                "instruction": format!(
                    "Send {} via {} to {}",
                    request.money, self.kind, request.destination.account_identifier
                ),
                "memo": request.memo,
            }),
        };
        notified.insert(request.idempotency_key.clone(), outcome.clone());
        Ok(outcome)
    }

    async fn payout_status(&self, idempotency_key: &str) -> ProviderResult<Option<PayoutOutcome>> {
        let notified = self.notified.lock().unwrap_or_else(|e| e.into_inner());
        Ok(notified.get(idempotency_key).cloned())
    }

    async fn refund_charge(
        &self,
        _charge_ref: &str,
        _money: &Money,
        _idempotency_key: &str,
    ) -> ProviderResult<RefundOutcome> {
        Err(self.unsupported("refund"))
    }
}
