#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use shift_escrow::application::escrow::{EscrowEngine, PaymentRequest};
use shift_escrow::application::registry::PaymentMethodRegistry;
use shift_escrow::config::EscrowConfig;
use shift_escrow::domain::ids::{ShiftId, UserId};
use shift_escrow::domain::payment::Payment;
use shift_escrow::domain::payment_method::ProviderKind;
use shift_escrow::domain::provider::{ProviderSet, SharedProvider};
use shift_escrow::infrastructure::clock::ManualClock;
use shift_escrow::infrastructure::in_memory::{InMemoryPaymentMethodStore, InMemoryPaymentStore};
use shift_escrow::infrastructure::providers::simulated::SimulatedProvider;
use std::sync::Arc;

pub const FACILITY: UserId = UserId(1);
pub const NURSE: UserId = UserId(2);
pub const OPERATOR: UserId = UserId(99);

/// An engine on in-memory stores with a frozen clock and a simulated PayPal.
pub struct Harness {
    pub engine: EscrowEngine,
    pub registry: PaymentMethodRegistry,
    pub clock: ManualClock,
    pub paypal: Arc<SimulatedProvider>,
    pub payments: Arc<InMemoryPaymentStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EscrowConfig::default())
    }

    pub fn with_config(config: EscrowConfig) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let paypal = Arc::new(SimulatedProvider::new(ProviderKind::Paypal));
        let payments = Arc::new(InMemoryPaymentStore::new());
        let methods = Arc::new(InMemoryPaymentMethodStore::new());
        let shared: SharedProvider = paypal.clone();

        let engine = EscrowEngine::new(
            payments.clone(),
            methods.clone(),
            ProviderSet::new().with(shared),
            Arc::new(clock.clone()),
            config,
        );
        Self {
            engine,
            registry: PaymentMethodRegistry::new(methods, Arc::new(clock.clone())),
            clock,
            paypal,
            payments,
        }
    }

    /// Gives the nurse a default PayPal account.
    pub async fn enrol_nurse(&self) {
        self.registry
            .add(NURSE, ProviderKind::Paypal, "nurse@example.com", true)
            .await
            .unwrap();
    }

    pub async fn escrow(&self, shift: u64) -> Payment {
        self.engine
            .create_payment(PaymentRequest {
                payer: FACILITY,
                payee: NURSE,
                shift_id: ShiftId(shift),
                amount: dec!(540.00),
                payout_method_id: None,
                charge: None,
            })
            .await
            .unwrap()
    }
}
