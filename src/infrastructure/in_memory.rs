use crate::domain::ids::{PaymentId, PaymentMethodId, ShiftId, UserId};
use crate::domain::payment::{Payment, PaymentState, PaymentUpdate};
use crate::domain::payment_method::PaymentMethod;
use crate::domain::ports::{PaymentMethodStore, PaymentStore};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct PaymentTable {
    payments: HashMap<PaymentId, Payment>,
    /// Shift to its current non-refunded payment.
    active_shifts: HashMap<ShiftId, PaymentId>,
}

/// A thread-safe in-memory payment store.
///
/// Every mutation happens under the write lock, which makes `update_state`
/// a true compare-and-swap within one process. Clones share the same table.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered<F>(&self, keep: F) -> Vec<Payment>
    where
        F: Fn(&Payment) -> bool,
    {
        let table = self.table.read().await;
        let mut payments: Vec<Payment> = table
            .payments
            .values()
            .filter(|p| keep(p))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: Payment) -> Result<()> {
        let mut table = self.table.write().await;
        if table.active_shifts.contains_key(&payment.shift_id) {
            return Err(EscrowError::DuplicatePayment(payment.shift_id));
        }
        table.active_shifts.insert(payment.shift_id, payment.id);
        table.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table.payments.get(&id).cloned())
    }

    async fn update_state(
        &self,
        id: PaymentId,
        expected: PaymentState,
        new_state: PaymentState,
        update: PaymentUpdate,
    ) -> Result<Payment> {
        let mut table = self.table.write().await;
        let stored = table
            .payments
            .get_mut(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("Payment {}", id)))?;
        if stored.state != expected {
            return Err(EscrowError::Conflict(format!(
                "payment {} is {}, expected {}",
                id, stored.state, expected
            )));
        }

        let mut next = stored.clone();
        next.apply(new_state, update)?;
        *stored = next.clone();

        if new_state == PaymentState::Refunded {
            table.active_shifts.remove(&next.shift_id);
        }
        Ok(next)
    }

    async fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<Payment>> {
        Ok(self.filtered(|p| p.is_due(before)).await)
    }

    async fn find_in_state(&self, state: PaymentState) -> Result<Vec<Payment>> {
        Ok(self.filtered(|p| p.state == state).await)
    }

    async fn list_by_payee(&self, payee: UserId) -> Result<Vec<Payment>> {
        Ok(self.filtered(|p| p.payee_user_id == payee).await)
    }

    async fn list_by_payer(&self, payer: UserId) -> Result<Vec<Payment>> {
        Ok(self.filtered(|p| p.payer_user_id == payer).await)
    }

    async fn list_by_shift(&self, shift: ShiftId) -> Result<Vec<Payment>> {
        Ok(self.filtered(|p| p.shift_id == shift).await)
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        Ok(self.filtered(|_| true).await)
    }
}

/// A thread-safe in-memory store for payout destinations.
#[derive(Default, Clone)]
pub struct InMemoryPaymentMethodStore {
    methods: Arc<RwLock<HashMap<PaymentMethodId, PaymentMethod>>>,
}

impl InMemoryPaymentMethodStore {
    /// Creates a new, empty in-memory payment method store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned_by<'a>(
    methods: &'a mut HashMap<PaymentMethodId, PaymentMethod>,
    owner: UserId,
) -> impl Iterator<Item = &'a mut PaymentMethod> {
    methods.values_mut().filter(move |m| m.owner_user_id == owner)
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn insert(&self, mut method: PaymentMethod) -> Result<PaymentMethod> {
        let mut methods = self.methods.write().await;
        let has_default = methods
            .values()
            .any(|m| m.owner_user_id == method.owner_user_id && m.is_default);

        if method.is_default || !has_default {
            for other in owned_by(&mut methods, method.owner_user_id) {
                other.is_default = false;
            }
            method.is_default = true;
        }
        methods.insert(method.id, method.clone());
        Ok(method)
    }

    async fn get(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods.get(&id).cloned())
    }

    async fn delete(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        let mut methods = self.methods.write().await;
        if !methods.get(&id).is_some_and(|m| m.owner_user_id == owner) {
            return Err(EscrowError::NotFound(format!("Payment method {}", id)));
        }
        let removed = methods
            .remove(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("Payment method {}", id)))?;

        if removed.is_default
            && let Some(oldest) = owned_by(&mut methods, owner).min_by_key(|m| m.created_at)
        {
            oldest.is_default = true;
        }
        Ok(removed)
    }

    async fn set_default(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        let mut methods = self.methods.write().await;
        if !methods.get(&id).is_some_and(|m| m.owner_user_id == owner) {
            return Err(EscrowError::NotFound(format!("Payment method {}", id)));
        }
        for method in owned_by(&mut methods, owner) {
            method.is_default = method.id == id;
        }
        methods
            .get(&id)
            .cloned()
            .ok_or_else(|| EscrowError::NotFound(format!("Payment method {}", id)))
    }

    async fn list(&self, owner: UserId) -> Result<Vec<PaymentMethod>> {
        let methods = self.methods.read().await;
        let mut owned: Vec<PaymentMethod> = methods
            .values()
            .filter(|m| m.owner_user_id == owner)
            .cloned()
            .collect();
        owned.sort_by_key(|m| m.created_at);
        Ok(owned)
    }
}
