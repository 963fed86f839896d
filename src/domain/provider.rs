use super::money::Money;
use super::payment_method::{PaymentMethod, ProviderKind};
use crate::error::{EscrowError, ProviderResult, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

/// Where a payout goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDestination {
    pub provider: ProviderKind,
    pub account_identifier: String,
}

impl From<&PaymentMethod> for PayoutDestination {
    fn from(method: &PaymentMethod) -> Self {
        Self {
            provider: method.provider,
            account_identifier: method.account_identifier.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    pub destination: PayoutDestination,
    pub money: Money,
    /// Stable across retries of the same payment.
    pub idempotency_key: String,
    pub memo: String,
}

/// A successful payout call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PayoutOutcome {
    /// Funds were sent; `payout_ref` identifies the transfer at the provider.
    Completed {
        payout_ref: String,
        raw: serde_json::Value,
    },
    /// The transfer is not final yet. Either the provider settles it later
    /// (reported by webhook) or, for networks without a payout API, an operator
    /// sends the funds and confirms.
    PendingManual {
        reference: String,
        raw: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeHandle {
    pub charge_ref: String,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub success: bool,
    /// Reference of the captured funds, used for later refunds.
    pub capture_ref: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome {
    pub refund_ref: String,
    pub raw: serde_json::Value,
}

/// Uniform capability set over one payment network.
///
/// Implementations must honour `idempotency_key`: a key that was already
/// processed returns the earlier result instead of moving money again.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn authorize(&self) -> ProviderResult<AccessToken>;

    async fn create_charge(&self, money: &Money, description: &str)
    -> ProviderResult<ChargeHandle>;

    async fn capture_charge(&self, charge_ref: &str) -> ProviderResult<CaptureOutcome>;

    async fn payout(&self, request: &PayoutRequest) -> ProviderResult<PayoutOutcome>;

    /// Looks up the result of an earlier payout by its idempotency key.
    async fn payout_status(&self, idempotency_key: &str) -> ProviderResult<Option<PayoutOutcome>>;

    async fn refund_charge(
        &self,
        charge_ref: &str,
        money: &Money,
        idempotency_key: &str,
    ) -> ProviderResult<RefundOutcome>;
}

pub type SharedProvider = Arc<dyn PaymentProvider>;

/// The adapters available to the engine, one per provider kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ProviderKind, SharedProvider>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: SharedProvider) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Registers `provider` for `kind` regardless of what the adapter reports.
    pub fn with_kind(mut self, kind: ProviderKind, provider: SharedProvider) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<SharedProvider> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| EscrowError::NotFound(format!("No adapter configured for {}", kind)))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
