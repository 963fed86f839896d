use crate::domain::ids::{PaymentMethodId, UserId};
use crate::domain::payment_method::{PaymentMethod, ProviderKind};
use crate::domain::ports::{ClockBox, PaymentMethodStoreBox};
use crate::error::Result;
use tracing::info;

/// Per-user payout destinations.
///
/// Identifier validation happens here; default uniqueness is the store's job.
#[derive(Clone)]
pub struct PaymentMethodRegistry {
    store: PaymentMethodStoreBox,
    clock: ClockBox,
}

impl PaymentMethodRegistry {
    pub fn new(store: PaymentMethodStoreBox, clock: ClockBox) -> Self {
        Self { store, clock }
    }

    pub async fn add(
        &self,
        owner: UserId,
        provider: ProviderKind,
        account_identifier: &str,
        make_default: bool,
    ) -> Result<PaymentMethod> {
        let method = PaymentMethod::new(
            owner,
            provider,
            account_identifier,
            make_default,
            self.clock.now(),
        )?;
        let stored = self.store.insert(method).await?;
        info!(
            owner = %owner,
            method_id = %stored.id,
            provider = %provider,
            is_default = stored.is_default,
            "payment method added"
        );
        Ok(stored)
    }

    pub async fn remove(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        let removed = self.store.delete(owner, id).await?;
        info!(owner = %owner, method_id = %id, "payment method removed");
        Ok(removed)
    }

    pub async fn set_default(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        self.store.set_default(owner, id).await
    }

    pub async fn list(&self, owner: UserId) -> Result<Vec<PaymentMethod>> {
        self.store.list(owner).await
    }

    pub async fn default_for(&self, owner: UserId) -> Result<Option<PaymentMethod>> {
        Ok(self
            .store
            .list(owner)
            .await?
            .into_iter()
            .find(|m| m.is_default))
    }
}
