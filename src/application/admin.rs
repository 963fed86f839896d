use super::escrow::{EscrowEngine, ReleaseOutcome, Resolution};
use crate::domain::actor::{Actor, Permission};
use crate::domain::ids::PaymentId;
use crate::domain::payment::{Payment, PaymentState};
use crate::error::{EscrowError, Result};
use tracing::info;

/// Operator actions on escrowed payments.
///
/// Checks who is asking and whether the payment can make the requested move,
/// then hands over to the engine.
#[derive(Clone)]
pub struct AdminCommandHandler {
    engine: EscrowEngine,
}

impl AdminCommandHandler {
    pub fn new(engine: EscrowEngine) -> Self {
        Self { engine }
    }

    async fn load(&self, id: PaymentId, requested: PaymentState, legal_from: &[PaymentState]) -> Result<Payment> {
        let payment = self.engine.get(id).await?;
        if !legal_from.contains(&payment.state) {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested,
            });
        }
        Ok(payment)
    }

    /// Ends the hold and pays out immediately.
    pub async fn force_release(&self, actor: &Actor, id: PaymentId) -> Result<ReleaseOutcome> {
        actor.require(Permission::ManageEscrow)?;
        let payment = self
            .load(
                id,
                PaymentState::ReadyForRelease,
                &[PaymentState::Escrowed, PaymentState::ReadyForRelease],
            )
            .await?;
        info!(payment_id = %id, admin = %actor.user_id, "force release");
        if payment.state == PaymentState::Escrowed {
            self.engine.force_ready(id, actor.user_id).await?;
        }
        self.engine.release(id).await
    }

    /// Open to admins and to either party of the payment.
    pub async fn open_dispute(&self, actor: &Actor, id: PaymentId, reason: &str) -> Result<Payment> {
        let payment = self.engine.get(id).await?;
        if !actor.can(Permission::ManageEscrow) && !payment.is_party(actor.user_id) {
            return Err(EscrowError::Unauthorized(format!(
                "User {} is not a party to payment {}",
                actor.user_id, id
            )));
        }
        self.load(
            id,
            PaymentState::Disputed,
            &[PaymentState::Escrowed, PaymentState::ReadyForRelease],
        )
        .await?;
        self.engine.open_dispute(id, actor.user_id, reason).await
    }

    pub async fn resolve_dispute(
        &self,
        actor: &Actor,
        id: PaymentId,
        resolution: Resolution,
        note: &str,
    ) -> Result<Payment> {
        actor.require(Permission::ManageEscrow)?;
        let requested = match resolution {
            Resolution::ReleaseToPayee => PaymentState::ReadyForRelease,
            Resolution::Refund => PaymentState::Refunding,
        };
        self.load(id, requested, &[PaymentState::Disputed]).await?;
        self.engine
            .resolve_dispute(id, actor.user_id, resolution, note)
            .await
    }

    pub async fn refund(&self, actor: &Actor, id: PaymentId) -> Result<Payment> {
        actor.require(Permission::ManageEscrow)?;
        self.load(id, PaymentState::Refunding, &[PaymentState::PayoutFailed])
            .await?;
        self.engine.refund(id, actor.user_id).await
    }

    pub async fn retry_payout(&self, actor: &Actor, id: PaymentId) -> Result<ReleaseOutcome> {
        actor.require(Permission::ManageEscrow)?;
        self.load(id, PaymentState::ReadyForRelease, &[PaymentState::PayoutFailed])
            .await?;
        self.engine.retry_payout(id, actor.user_id).await
    }

    pub async fn confirm_manual_payout(
        &self,
        actor: &Actor,
        id: PaymentId,
        reference: &str,
    ) -> Result<Payment> {
        actor.require(Permission::ManageEscrow)?;
        if reference.trim().is_empty() {
            return Err(EscrowError::ValidationError(
                "Manual payout reference is required".to_string(),
            ));
        }
        self.load(id, PaymentState::Released, &[PaymentState::PayoutPending])
            .await?;
        self.engine
            .confirm_manual_payout(id, actor.user_id, reference.trim())
            .await
    }

    pub async fn report_manual_failure(
        &self,
        actor: &Actor,
        id: PaymentId,
        reason: &str,
    ) -> Result<Payment> {
        actor.require(Permission::ManageEscrow)?;
        self.load(id, PaymentState::PayoutFailed, &[PaymentState::PayoutPending])
            .await?;
        self.engine
            .report_manual_failure(id, actor.user_id, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::escrow::PaymentRequest;
    use crate::config::EscrowConfig;
    use crate::domain::ids::{ShiftId, UserId};
    use crate::domain::payment_method::{PaymentMethod, ProviderKind};
    use crate::domain::ports::{Clock, PaymentMethodStore};
    use crate::domain::provider::ProviderSet;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::{InMemoryPaymentMethodStore, InMemoryPaymentStore};
    use crate::infrastructure::providers::manual::ManualProvider;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const FACILITY: UserId = UserId(1);
    const NURSE: UserId = UserId(2);
    const STRANGER: UserId = UserId(3);
    const OPERATOR: UserId = UserId(99);

    async fn setup() -> (AdminCommandHandler, Payment) {
        let clock = ManualClock::new(Utc::now());
        let methods = Arc::new(InMemoryPaymentMethodStore::new());
        methods
            .insert(
                PaymentMethod::new(NURSE, ProviderKind::BankTransfer, "nurse@example.com", true, clock.now())
                    .unwrap(),
            )
            .await
            .unwrap();
        let engine = EscrowEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            methods,
            ProviderSet::new().with(Arc::new(ManualProvider::new(ProviderKind::BankTransfer))),
            Arc::new(clock),
            EscrowConfig::default(),
        );
        let payment = engine
            .create_payment(PaymentRequest {
                payer: FACILITY,
                payee: NURSE,
                shift_id: ShiftId(7),
                amount: dec!(300),
                payout_method_id: None,
                charge: None,
            })
            .await
            .unwrap();
        (AdminCommandHandler::new(engine), payment)
    }

    #[tokio::test]
    async fn test_members_cannot_release() {
        let (admin, payment) = setup().await;
        assert!(matches!(
            admin.force_release(&Actor::member(FACILITY), payment.id).await,
            Err(EscrowError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_dispute_requires_party_or_admin() {
        let (admin, payment) = setup().await;
        assert!(matches!(
            admin
                .open_dispute(&Actor::member(STRANGER), payment.id, "nosy")
                .await,
            Err(EscrowError::Unauthorized(_))
        ));
        let disputed = admin
            .open_dispute(&Actor::member(NURSE), payment.id, "late arrival recorded wrongly")
            .await
            .unwrap();
        assert_eq!(disputed.state, PaymentState::Disputed);
    }

    #[tokio::test]
    async fn test_manual_payout_flow() {
        let (admin, payment) = setup().await;
        let operator = Actor::admin(OPERATOR);

        let outcome = admin.force_release(&operator, payment.id).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::PendingManual(_)));

        // Illegal: refund from payout_pending.
        assert!(matches!(
            admin.refund(&operator, payment.id).await,
            Err(EscrowError::InvalidTransition {
                current: PaymentState::PayoutPending,
                requested: PaymentState::Refunding
            })
        ));

        let released = admin
            .confirm_manual_payout(&operator, payment.id, "ZELLE-8812")
            .await
            .unwrap();
        assert_eq!(released.state, PaymentState::Released);
        assert_eq!(released.external_payout_ref.as_deref(), Some("ZELLE-8812"));

        assert!(matches!(
            admin
                .confirm_manual_payout(&operator, payment.id, "ZELLE-8813")
                .await,
            Err(EscrowError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_manual_failure_then_refund() {
        let (admin, payment) = setup().await;
        let operator = Actor::admin(OPERATOR);
        admin.force_release(&operator, payment.id).await.unwrap();

        let failed = admin
            .report_manual_failure(&operator, payment.id, "account closed")
            .await
            .unwrap();
        assert_eq!(failed.state, PaymentState::PayoutFailed);

        let refunded = admin.refund(&operator, payment.id).await.unwrap();
        assert_eq!(refunded.state, PaymentState::Refunded);
        assert_eq!(refunded.resolved_by_user_id, Some(OPERATOR));
    }
}
