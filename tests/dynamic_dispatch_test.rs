use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use shift_escrow::domain::ids::{ShiftId, UserId};
use shift_escrow::domain::money::{Amount, Currency};
use shift_escrow::domain::payment::{NewPayment, Payment, PaymentState, PaymentUpdate};
use shift_escrow::domain::payment_method::{PaymentMethod, ProviderKind};
use shift_escrow::domain::ports::{
    PaymentMethodStore, PaymentMethodStoreBox, PaymentStore, PaymentStoreBox,
};
use shift_escrow::domain::provider::{PaymentProvider, ProviderSet};
use shift_escrow::infrastructure::in_memory::{InMemoryPaymentMethodStore, InMemoryPaymentStore};
use shift_escrow::infrastructure::providers::manual::ManualProvider;
use shift_escrow::infrastructure::providers::simulated::SimulatedProvider;
use std::sync::Arc;

#[tokio::test]
async fn test_stores_as_trait_objects() {
    let payment_store: PaymentStoreBox = Arc::new(InMemoryPaymentStore::new());
    let method_store: PaymentMethodStoreBox = Arc::new(InMemoryPaymentMethodStore::new());

    let now = Utc::now();
    let method =
        PaymentMethod::new(UserId(2), ProviderKind::Paypal, "nurse@example.com", true, now)
            .unwrap();
    let payment = Payment::new(
        NewPayment {
            payer: UserId(1),
            payee: UserId(2),
            shift_id: ShiftId(1),
            amount: Amount::new(dec!(100.00)).unwrap(),
            currency: Currency::usd(),
            payout_method_id: method.id,
            charge: None,
        },
        Duration::days(3),
        Duration::days(14),
        now,
    );
    let payment_id = payment.id;

    // Verify Send + Sync by spawning tasks
    let ps_handle = tokio::spawn(async move {
        payment_store.create(payment).await.unwrap();
        payment_store
            .update_state(
                payment_id,
                PaymentState::Escrowed,
                PaymentState::ReadyForRelease,
                PaymentUpdate::at(now),
            )
            .await
            .unwrap();
        payment_store.get(payment_id).await.unwrap().unwrap()
    });

    let ms_handle = tokio::spawn(async move {
        method_store.insert(method).await.unwrap();
        method_store.list(UserId(2)).await.unwrap()
    });

    let retrieved_payment = ps_handle.await.unwrap();
    assert_eq!(retrieved_payment.state, PaymentState::ReadyForRelease);

    let methods = ms_handle.await.unwrap();
    assert_eq!(methods.len(), 1);
    assert!(methods[0].is_default);
}

#[tokio::test]
async fn test_provider_set_dispatches_by_kind() {
    let providers = ProviderSet::new()
        .with(Arc::new(SimulatedProvider::new(ProviderKind::Paypal)))
        .with(Arc::new(ManualProvider::new(ProviderKind::BankTransfer)));

    let handle = tokio::spawn(async move {
        let paypal = providers.get(ProviderKind::Paypal).unwrap();
        let bank = providers.get(ProviderKind::BankTransfer).unwrap();
        assert!(providers.get(ProviderKind::Coinbase).is_err());
        (paypal.kind(), bank.kind(), providers.kinds().len())
    });

    let (paypal, bank, count) = handle.await.unwrap();
    assert_eq!(paypal, ProviderKind::Paypal);
    assert_eq!(bank, ProviderKind::BankTransfer);
    assert_eq!(count, 2);
}
