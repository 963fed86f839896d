use crate::domain::actor::{Actor, Permission};
use crate::domain::ids::{PaymentId, ShiftId, UserId};
use crate::domain::money::Money;
use crate::domain::payment::{Payment, PaymentNote, PaymentState, PublicStatus};
use crate::domain::ports::PaymentStoreBox;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A payment as shown on a dashboard.
///
/// Parties get the coarse status only; the raw state, payout reference and
/// audit notes are filled in for actors allowed to see the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentView {
    pub id: PaymentId,
    pub shift_id: ShiftId,
    pub payer_user_id: UserId,
    pub payee_user_id: UserId,
    pub money: Money,
    pub status: PublicStatus,
    pub escrow_release_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PaymentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_payout_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<PaymentNote>>,
}

impl PaymentView {
    fn for_actor(payment: Payment, actor: &Actor) -> Self {
        let detailed = actor.can(Permission::ViewAuditTrail);
        Self {
            id: payment.id,
            shift_id: payment.shift_id,
            payer_user_id: payment.payer_user_id,
            payee_user_id: payment.payee_user_id,
            money: payment.money(),
            status: payment.state.public_status(),
            escrow_release_at: payment.escrow_release_at,
            released_at: payment.released_at,
            state: detailed.then_some(payment.state),
            external_payout_ref: payment.external_payout_ref.filter(|_| detailed),
            payout_attempts: detailed.then_some(payment.payout_attempts),
            notes: detailed.then_some(payment.notes),
        }
    }
}

/// Read-only payment lookups for dashboards.
#[derive(Clone)]
pub struct PaymentQueries {
    payments: PaymentStoreBox,
}

impl PaymentQueries {
    pub fn new(payments: PaymentStoreBox) -> Self {
        Self { payments }
    }

    pub async fn get_by_id(&self, actor: &Actor, id: PaymentId) -> Result<PaymentView> {
        let payment = self
            .payments
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("Payment {}", id)))?;
        if !actor.can(Permission::ViewAuditTrail) && !payment.is_party(actor.user_id) {
            return Err(EscrowError::Unauthorized(format!(
                "User {} is not a party to payment {}",
                actor.user_id, id
            )));
        }
        Ok(PaymentView::for_actor(payment, actor))
    }

    /// Payments owed to a professional.
    pub async fn list_by_professional(&self, actor: &Actor, payee: UserId) -> Result<Vec<PaymentView>> {
        require_self_or_auditor(actor, payee)?;
        let payments = self.payments.list_by_payee(payee).await?;
        Ok(views(payments, actor))
    }

    /// Payments made by a facility.
    pub async fn list_by_facility(&self, actor: &Actor, payer: UserId) -> Result<Vec<PaymentView>> {
        require_self_or_auditor(actor, payer)?;
        let payments = self.payments.list_by_payer(payer).await?;
        Ok(views(payments, actor))
    }

    /// Everything not yet paid out and not in dispute or refund, soonest
    /// release first. Operators only.
    pub async fn list_pending_release(&self, actor: &Actor) -> Result<Vec<PaymentView>> {
        actor.require(Permission::ViewAuditTrail)?;
        let mut pending = Vec::new();
        for state in [
            PaymentState::Escrowed,
            PaymentState::ReadyForRelease,
            PaymentState::Releasing,
            PaymentState::PayoutPending,
        ] {
            pending.extend(self.payments.find_in_state(state).await?);
        }
        pending.sort_by_key(|p| p.escrow_release_at);
        Ok(views(pending, actor))
    }
}

fn require_self_or_auditor(actor: &Actor, user: UserId) -> Result<()> {
    if actor.user_id == user {
        return Ok(());
    }
    actor.require(Permission::ViewAuditTrail)
}

fn views(payments: Vec<Payment>, actor: &Actor) -> Vec<PaymentView> {
    payments
        .into_iter()
        .map(|p| PaymentView::for_actor(p, actor))
        .collect()
}
