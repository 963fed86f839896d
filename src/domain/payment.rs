use super::ids::{PaymentId, PaymentMethodId, ShiftId, UserId};
use super::money::{Amount, Currency, Money};
use super::payment_method::ProviderKind;
use crate::error::EscrowError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an escrowed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Escrowed,
    ReadyForRelease,
    Releasing,
    PayoutPending,
    Released,
    Disputed,
    Refunding,
    Refunded,
    PayoutFailed,
}

impl PaymentState {
    pub const ALL: [PaymentState; 9] = [
        PaymentState::Escrowed,
        PaymentState::ReadyForRelease,
        PaymentState::Releasing,
        PaymentState::PayoutPending,
        PaymentState::Released,
        PaymentState::Disputed,
        PaymentState::Refunding,
        PaymentState::Refunded,
        PaymentState::PayoutFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Escrowed => "escrowed",
            PaymentState::ReadyForRelease => "ready_for_release",
            PaymentState::Releasing => "releasing",
            PaymentState::PayoutPending => "payout_pending",
            PaymentState::Released => "released",
            PaymentState::Disputed => "disputed",
            PaymentState::Refunding => "refunding",
            PaymentState::Refunded => "refunded",
            PaymentState::PayoutFailed => "payout_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Released | PaymentState::Refunded)
    }

    /// The transition table. A state may always "move" to itself to record
    /// an annotation (capture reference, audit note).
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        use PaymentState::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Escrowed, ReadyForRelease)
                | (Escrowed, Disputed)
                | (ReadyForRelease, Disputed)
                | (ReadyForRelease, Releasing)
                | (Releasing, Released)
                | (Releasing, PayoutPending)
                | (Releasing, PayoutFailed)
                | (PayoutPending, Released)
                | (PayoutPending, PayoutFailed)
                | (Disputed, ReadyForRelease)
                | (Disputed, Refunding)
                | (PayoutFailed, ReadyForRelease)
                | (PayoutFailed, Refunding)
                | (PayoutFailed, Released)
                | (Refunding, Refunded)
                | (Refunding, PayoutFailed)
        )
    }

    /// Coarse status shown to facilities and professionals.
    pub fn public_status(&self) -> PublicStatus {
        match self {
            PaymentState::Escrowed => PublicStatus::InEscrow,
            PaymentState::ReadyForRelease
            | PaymentState::Releasing
            | PaymentState::PayoutPending => PublicStatus::Ready,
            PaymentState::Released => PublicStatus::Released,
            PaymentState::Disputed => PublicStatus::Disputed,
            PaymentState::Refunding => PublicStatus::RefundPending,
            PaymentState::Refunded => PublicStatus::Refunded,
            PaymentState::PayoutFailed => PublicStatus::Failed,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EscrowError::ValidationError(format!("Unknown payment state: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    InEscrow,
    Ready,
    Released,
    Disputed,
    /// A refund was requested and has not been confirmed by the provider.
    RefundPending,
    Refunded,
    Failed,
}

/// One timestamped entry of a payment's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNote {
    pub at: DateTime<Utc>,
    pub author: String,
    pub text: String,
}

/// Which provider captured the facility's charge, and under what reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub provider: ProviderKind,
    pub reference: String,
}

/// A facility's payment for one shift, held in escrow until paid out or refunded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// The facility.
    pub payer_user_id: UserId,
    /// The professional.
    pub payee_user_id: UserId,
    pub shift_id: ShiftId,
    pub amount: Amount,
    pub currency: Currency,
    pub payout_method_id: PaymentMethodId,
    pub charge_provider: Option<ProviderKind>,
    pub external_charge_ref: Option<String>,
    pub external_payout_ref: Option<String>,
    pub state: PaymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub escrow_release_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub hold_started_at: DateTime<Utc>,
    pub hold_duration_secs: i64,
    pub dispute_opened_at: Option<DateTime<Utc>>,
    pub dispute_window_secs: i64,
    pub payout_attempts: u32,
    pub resolved_by_user_id: Option<UserId>,
    pub notes: Vec<PaymentNote>,
}

/// Input for recording a new escrowed payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payer: UserId,
    pub payee: UserId,
    pub shift_id: ShiftId,
    pub amount: Amount,
    pub currency: Currency,
    pub payout_method_id: PaymentMethodId,
    pub charge: Option<ChargeRecord>,
}

impl Payment {
    pub fn new(
        request: NewPayment,
        hold_duration: Duration,
        dispute_window: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let (charge_provider, external_charge_ref) = match request.charge {
            Some(charge) => (Some(charge.provider), Some(charge.reference)),
            None => (None, None),
        };
        Self {
            id: PaymentId::new(),
            payer_user_id: request.payer,
            payee_user_id: request.payee,
            shift_id: request.shift_id,
            amount: request.amount,
            currency: request.currency,
            payout_method_id: request.payout_method_id,
            charge_provider,
            external_charge_ref,
            external_payout_ref: None,
            state: PaymentState::Escrowed,
            created_at: now,
            updated_at: now,
            escrow_release_at: now + hold_duration,
            released_at: None,
            hold_started_at: now,
            hold_duration_secs: hold_duration.num_seconds(),
            dispute_opened_at: None,
            dispute_window_secs: dispute_window.num_seconds(),
            payout_attempts: 0,
            resolved_by_user_id: None,
            notes: Vec::new(),
        }
    }

    pub fn money(&self) -> Money {
        Money::new(self.amount, self.currency.clone())
    }

    pub fn has_open_dispute(&self) -> bool {
        self.dispute_opened_at.is_some()
    }

    /// Whether the hold has elapsed and nothing blocks automatic release.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == PaymentState::Escrowed
            && self.escrow_release_at <= now
            && !self.has_open_dispute()
    }

    /// Whether a dispute has been open longer than its window.
    pub fn dispute_overdue(&self, now: DateTime<Utc>) -> bool {
        self.dispute_opened_at
            .is_some_and(|opened| opened + Duration::seconds(self.dispute_window_secs) < now)
    }

    pub fn is_party(&self, user: UserId) -> bool {
        self.payer_user_id == user || self.payee_user_id == user
    }

    /// Applies a transition with its field changes, enforcing the transition
    /// table and the write-once references.
    pub fn apply(&mut self, next: PaymentState, update: PaymentUpdate) -> Result<(), EscrowError> {
        if !self.state.can_transition_to(next) {
            return Err(EscrowError::InvalidTransition {
                current: self.state,
                requested: next,
            });
        }

        if update.payout_ref.is_some()
            && (next != PaymentState::Released || self.external_payout_ref.is_some())
        {
            return Err(EscrowError::ValidationError(format!(
                "Payout reference can only be set once, on release (payment {})",
                self.id
            )));
        }
        if next == PaymentState::Released
            && self.state != PaymentState::Released
            && update.payout_ref.is_none()
        {
            return Err(EscrowError::ValidationError(format!(
                "Payment {} cannot be released without a payout reference",
                self.id
            )));
        }
        if update.charge.is_some() && self.external_charge_ref.is_some() {
            return Err(EscrowError::ValidationError(format!(
                "Charge reference already recorded for payment {}",
                self.id
            )));
        }

        if let Some(payout_ref) = update.payout_ref {
            self.external_payout_ref = Some(payout_ref);
        }
        if let Some(charge) = update.charge {
            self.charge_provider = Some(charge.provider);
            self.external_charge_ref = Some(charge.reference);
        }

        if next == PaymentState::Disputed && self.state != PaymentState::Disputed {
            self.dispute_opened_at = Some(update.at);
        } else if self.state == PaymentState::Disputed && next != PaymentState::Disputed {
            self.dispute_opened_at = None;
        }
        if next == PaymentState::Released && self.state != PaymentState::Released {
            self.released_at = Some(update.at);
        }
        if next == PaymentState::Releasing {
            self.payout_attempts += 1;
        }
        if let Some(user) = update.resolved_by {
            self.resolved_by_user_id = Some(user);
        }
        if let Some(note) = update.note {
            self.notes.push(note);
        }

        self.state = next;
        self.updated_at = update.at;
        Ok(())
    }
}

/// Field changes that accompany a state transition.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub at: DateTime<Utc>,
    pub payout_ref: Option<String>,
    pub charge: Option<ChargeRecord>,
    pub resolved_by: Option<UserId>,
    pub note: Option<PaymentNote>,
}

impl PaymentUpdate {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            payout_ref: None,
            charge: None,
            resolved_by: None,
            note: None,
        }
    }

    pub fn payout_ref(mut self, reference: impl Into<String>) -> Self {
        self.payout_ref = Some(reference.into());
        self
    }

    pub fn charge(mut self, provider: ProviderKind, reference: impl Into<String>) -> Self {
        self.charge = Some(ChargeRecord {
            provider,
            reference: reference.into(),
        });
        self
    }

    pub fn resolved_by(mut self, user: UserId) -> Self {
        self.resolved_by = Some(user);
        self
    }

    pub fn note(mut self, author: impl Into<String>, text: impl Into<String>) -> Self {
        self.note = Some(PaymentNote {
            at: self.at,
            author: author.into(),
            text: text.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn escrowed(now: DateTime<Utc>) -> Payment {
        Payment::new(
            NewPayment {
                payer: UserId(1),
                payee: UserId(2),
                shift_id: ShiftId(10),
                amount: Amount::new(dec!(540.00)).unwrap(),
                currency: Currency::usd(),
                payout_method_id: PaymentMethodId::new(),
                charge: None,
            },
            Duration::days(3),
            Duration::days(14),
            now,
        )
    }

    #[test]
    fn test_new_payment_starts_escrowed() {
        let now = Utc::now();
        let payment = escrowed(now);
        assert_eq!(payment.state, PaymentState::Escrowed);
        assert_eq!(payment.escrow_release_at, now + Duration::days(3));
        assert!(!payment.is_due(now));
        assert!(payment.is_due(now + Duration::days(3)));
    }

    #[test]
    fn test_no_shortcut_to_released() {
        use PaymentState::*;
        for from in [Escrowed, ReadyForRelease, Disputed, Refunding] {
            assert!(!from.can_transition_to(Released), "{} -> released", from);
        }
        assert!(Releasing.can_transition_to(Released));
        assert!(PayoutPending.can_transition_to(Released));
        // A payout presumed failed can still be confirmed.
        assert!(PayoutFailed.can_transition_to(Released));
    }

    #[test]
    fn test_failed_payout_settles_only_with_reference() {
        let now = Utc::now();
        let mut payment = escrowed(now);
        for next in [
            PaymentState::ReadyForRelease,
            PaymentState::Releasing,
            PaymentState::PayoutFailed,
        ] {
            payment.apply(next, PaymentUpdate::at(now)).unwrap();
        }
        assert!(
            payment
                .clone()
                .apply(PaymentState::Released, PaymentUpdate::at(now))
                .is_err()
        );
        payment
            .apply(PaymentState::Released, PaymentUpdate::at(now).payout_ref("PO-late"))
            .unwrap();
        assert_eq!(payment.external_payout_ref.as_deref(), Some("PO-late"));
        assert_eq!(payment.payout_attempts, 1);
    }

    #[test]
    fn test_terminal_states_only_annotate() {
        for terminal in [PaymentState::Released, PaymentState::Refunded] {
            for next in PaymentState::ALL {
                assert_eq!(terminal.can_transition_to(next), next == terminal);
            }
        }
    }

    #[test]
    fn test_apply_rejects_illegal_edge() {
        let mut payment = escrowed(Utc::now());
        let result = payment.apply(PaymentState::Releasing, PaymentUpdate::at(Utc::now()));
        assert!(matches!(
            result,
            Err(EscrowError::InvalidTransition {
                current: PaymentState::Escrowed,
                requested: PaymentState::Releasing
            })
        ));
        assert_eq!(payment.state, PaymentState::Escrowed);
    }

    #[test]
    fn test_payout_ref_is_write_once() {
        let now = Utc::now();
        let mut payment = escrowed(now);
        payment
            .apply(PaymentState::ReadyForRelease, PaymentUpdate::at(now))
            .unwrap();
        payment
            .apply(PaymentState::Releasing, PaymentUpdate::at(now))
            .unwrap();
        assert_eq!(payment.payout_attempts, 1);

        // Released needs a reference.
        assert!(
            payment
                .clone()
                .apply(PaymentState::Released, PaymentUpdate::at(now))
                .is_err()
        );

        payment
            .apply(PaymentState::Released, PaymentUpdate::at(now).payout_ref("PO-1"))
            .unwrap();
        assert_eq!(payment.external_payout_ref.as_deref(), Some("PO-1"));
        assert_eq!(payment.released_at, Some(now));

        let again = payment.apply(
            PaymentState::Released,
            PaymentUpdate::at(now).payout_ref("PO-2"),
        );
        assert!(matches!(again, Err(EscrowError::ValidationError(_))));
        assert_eq!(payment.external_payout_ref.as_deref(), Some("PO-1"));
    }

    #[test]
    fn test_dispute_timestamps() {
        let now = Utc::now();
        let mut payment = escrowed(now);
        payment
            .apply(PaymentState::Disputed, PaymentUpdate::at(now))
            .unwrap();
        assert_eq!(payment.dispute_opened_at, Some(now));
        assert!(!payment.is_due(now + Duration::days(4)));
        assert!(payment.dispute_overdue(now + Duration::days(15)));

        payment
            .apply(
                PaymentState::ReadyForRelease,
                PaymentUpdate::at(now)
                    .resolved_by(UserId(99))
                    .note("admin:99", "resolved for payee"),
            )
            .unwrap();
        assert!(!payment.has_open_dispute());
        assert_eq!(payment.resolved_by_user_id, Some(UserId(99)));
        assert_eq!(payment.notes.len(), 1);
    }

    #[test]
    fn test_public_status_is_coarse() {
        assert_eq!(
            PaymentState::Releasing.public_status(),
            PublicStatus::Ready
        );
        assert_eq!(
            PaymentState::PayoutFailed.public_status(),
            PublicStatus::Failed
        );
        assert_eq!(
            PaymentState::Refunding.public_status(),
            PublicStatus::RefundPending
        );
        assert_eq!(
            PaymentState::Refunded.public_status(),
            PublicStatus::Refunded
        );
        assert_eq!(
            "payout_pending".parse::<PaymentState>().unwrap(),
            PaymentState::PayoutPending
        );
    }
}
