use super::ids::{PaymentId, PaymentMethodId, ShiftId, UserId};
use super::payment::{Payment, PaymentState, PaymentUpdate};
use super::payment_method::PaymentMethod;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a new payment. Fails with `DuplicatePayment` if the shift
    /// already has a payment that is not refunded.
    async fn create(&self, payment: Payment) -> Result<()>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Compare-and-swap: applies `update` and moves to `new_state` only if the
    /// stored state still equals `expected`. Fails with `Conflict` otherwise.
    async fn update_state(
        &self,
        id: PaymentId,
        expected: PaymentState,
        new_state: PaymentState,
        update: PaymentUpdate,
    ) -> Result<Payment>;

    /// Escrowed payments whose hold ends at or before `before` and that have no open dispute.
    async fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<Payment>>;

    async fn find_in_state(&self, state: PaymentState) -> Result<Vec<Payment>>;

    async fn list_by_payee(&self, payee: UserId) -> Result<Vec<Payment>>;

    async fn list_by_payer(&self, payer: UserId) -> Result<Vec<Payment>>;

    async fn list_by_shift(&self, shift: ShiftId) -> Result<Vec<Payment>>;

    async fn get_all(&self) -> Result<Vec<Payment>>;
}

/// Storage for payout destinations. Every mutation keeps exactly one default
/// per owner (or none when the owner has no methods) within one transaction.
#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    /// Inserts `method`. It becomes the default when `method.is_default` is
    /// set or when the owner has no other method; the previous default is
    /// cleared in the same write.
    async fn insert(&self, method: PaymentMethod) -> Result<PaymentMethod>;

    async fn get(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>>;

    /// Deletes an owned method, promoting the oldest remaining one if the
    /// deleted method was the default. `NotFound` if not owned by `owner`.
    async fn delete(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod>;

    async fn set_default(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod>;

    /// The owner's methods, oldest first.
    async fn list(&self, owner: UserId) -> Result<Vec<PaymentMethod>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type PaymentStoreBox = Arc<dyn PaymentStore>;
pub type PaymentMethodStoreBox = Arc<dyn PaymentMethodStore>;
pub type ClockBox = Arc<dyn Clock>;
