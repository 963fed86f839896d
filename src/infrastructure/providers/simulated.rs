use crate::domain::money::Money;
use crate::domain::payment_method::ProviderKind;
use crate::domain::provider::{
    AccessToken, CaptureOutcome, ChargeHandle, PaymentProvider, PayoutOutcome, PayoutRequest,
    RefundOutcome,
};
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the next payout call should do instead of succeeding immediately.
#[derive(Debug, Clone)]
pub enum ScriptedPayout {
    Fail(ProviderError),
    /// Sleep before succeeding; long enough delays exercise the engine timeout.
    Delay(Duration),
    /// Sleep, then carry on with the transfer. The call "lands" even when the
    /// caller gave up waiting.
    DelayThenComplete(Duration),
    PendingManual,
}

/// A transfer the simulator actually performed.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTransfer {
    pub idempotency_key: String,
    pub account_identifier: String,
    pub money: Money,
    pub payout_ref: String,
}

#[derive(Default)]
struct Ledger {
    outcomes: HashMap<String, PayoutOutcome>,
    transfers: Vec<SimulatedTransfer>,
    refunds: HashMap<String, RefundOutcome>,
    script: VecDeque<ScriptedPayout>,
}

/// In-process provider that moves no real money.
///
/// Honours idempotency keys like a real provider and can be scripted to
/// fail, stall or defer to manual confirmation. Used by the `replay`
/// command and throughout the tests.
pub struct SimulatedProvider {
    kind: ProviderKind,
    ledger: Mutex<Ledger>,
    payout_calls: AtomicUsize,
    refund_calls: AtomicUsize,
    sequence: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            ledger: Mutex::new(Ledger::default()),
            payout_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
        }
    }

    /// Queues behaviour for upcoming payout calls, consumed in order.
    pub fn script(&self, step: ScriptedPayout) {
        self.ledger().script.push_back(step);
    }

    /// Number of payout calls received, including idempotent replays.
    pub fn payout_calls(&self) -> usize {
        self.payout_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Transfers that actually moved (simulated) money.
    pub fn transfers(&self) -> Vec<SimulatedTransfer> {
        self.ledger().transfers.clone()
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_ref(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}-{:06}", self.kind, prefix, n)
    }

    fn complete(&self, request: &PayoutRequest) -> PayoutOutcome {
        let mut ledger = self.ledger();
        if let Some(prior) = ledger.outcomes.get(&request.idempotency_key) {
            return prior.clone();
        }
        let payout_ref = self.next_ref("PO");
        ledger.transfers.push(SimulatedTransfer {
            idempotency_key: request.idempotency_key.clone(),
            account_identifier: request.destination.account_identifier.clone(),
            money: request.money.clone(),
            payout_ref: payout_ref.clone(),
        });
        let outcome = PayoutOutcome::Completed {
            raw: json!({
                "payout_ref": payout_ref,
                "amount": request.money.amount.to_string(),
                "currency": request.money.currency.code(),
            }),
            payout_ref,
        };
        ledger
            .outcomes
            .insert(request.idempotency_key.clone(), outcome.clone());
        outcome
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authorize(&self) -> ProviderResult<AccessToken> {
        Ok(AccessToken(format!("simulated-{}", self.kind)))
    }

    async fn create_charge(&self, money: &Money, description: &str) -> ProviderResult<ChargeHandle> {
        tracing::debug!(provider = %self.kind, %money, description, "simulated charge created");
        Ok(ChargeHandle {
            charge_ref: self.next_ref("CH"),
            approval_url: None,
        })
    }

    async fn capture_charge(&self, charge_ref: &str) -> ProviderResult<CaptureOutcome> {
        Ok(CaptureOutcome {
            success: true,
            capture_ref: format!("{}-captured", charge_ref),
            raw: json!({ "status": "COMPLETED", "id": charge_ref }),
        })
    }

    async fn payout(&self, request: &PayoutRequest) -> ProviderResult<PayoutOutcome> {
        self.payout_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(prior) = self.ledger().outcomes.get(&request.idempotency_key) {
            return Ok(prior.clone());
        }

        let step = self.ledger().script.pop_front();
        match step {
            None => Ok(self.complete(request)),
            Some(ScriptedPayout::Fail(err)) => Err(err),
            Some(ScriptedPayout::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.complete(request))
            }
            Some(ScriptedPayout::DelayThenComplete(delay)) => {
                // Record first so the transfer exists even if the caller times out.
                let outcome = self.complete(request);
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
            Some(ScriptedPayout::PendingManual) => {
                let outcome = PayoutOutcome::PendingManual {
                    reference: request.idempotency_key.clone(),
                    raw: json!({ "status": "awaiting_operator" }),
                };
                self.ledger()
                    .outcomes
                    .insert(request.idempotency_key.clone(), outcome.clone());
                Ok(outcome)
            }
        }
    }

    async fn payout_status(&self, idempotency_key: &str) -> ProviderResult<Option<PayoutOutcome>> {
        Ok(self.ledger().outcomes.get(idempotency_key).cloned())
    }

    async fn refund_charge(
        &self,
        charge_ref: &str,
        money: &Money,
        idempotency_key: &str,
    ) -> ProviderResult<RefundOutcome> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let mut ledger = self.ledger();
        if let Some(prior) = ledger.refunds.get(idempotency_key) {
            return Ok(prior.clone());
        }
        let outcome = RefundOutcome {
            refund_ref: format!("{}-refund", charge_ref),
            raw: json!({ "amount": money.amount.to_string(), "currency": money.currency.code() }),
        };
        ledger
            .refunds
            .insert(idempotency_key.to_string(), outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::provider::PayoutDestination;
    use rust_decimal_macros::dec;

    fn request(key: &str) -> PayoutRequest {
        PayoutRequest {
            destination: PayoutDestination {
                provider: ProviderKind::Paypal,
                account_identifier: "nurse@example.com".to_string(),
            },
            money: Money::new(Amount::new(dec!(540.00)).unwrap(), Currency::usd()),
            idempotency_key: key.to_string(),
            memo: "shift payout".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replayed_key_returns_prior_result() {
        let provider = SimulatedProvider::new(ProviderKind::Paypal);
        let first = provider.payout(&request("payout-a")).await.unwrap();
        let second = provider.payout(&request("payout-a")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.payout_calls(), 2);
        assert_eq!(provider.transfers().len(), 1);

        provider.payout(&request("payout-b")).await.unwrap();
        assert_eq!(provider.transfers().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_moves_no_money() {
        let provider = SimulatedProvider::new(ProviderKind::Paypal);
        provider.script(ScriptedPayout::Fail(ProviderError::Rejected(
            "receiver unconfirmed".into(),
        )));
        assert!(provider.payout(&request("payout-a")).await.is_err());
        assert!(provider.transfers().is_empty());
        assert!(provider.payout_status("payout-a").await.unwrap().is_none());

        // The script is consumed; the next attempt goes through.
        assert!(provider.payout(&request("payout-a")).await.is_ok());
        assert_eq!(provider.transfers().len(), 1);
    }
}
