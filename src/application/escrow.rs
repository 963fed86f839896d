use crate::config::EscrowConfig;
use crate::domain::ids::{PaymentId, PaymentMethodId, ShiftId, UserId};
use crate::domain::money::Amount;
use crate::domain::payment::{ChargeRecord, NewPayment, Payment, PaymentState, PaymentUpdate};
use crate::domain::payment_method::{PaymentMethod, ProviderKind};
use crate::domain::ports::{ClockBox, PaymentMethodStoreBox, PaymentStoreBox};
use crate::domain::provider::{PayoutOutcome, PayoutRequest, ProviderSet};
use crate::error::{EscrowError, ProviderError, ProviderResult, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use tracing::{debug, info, warn};

const SYSTEM: &str = "system";

/// A facility's request to escrow funds for a completed shift.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub payer: UserId,
    pub payee: UserId,
    pub shift_id: ShiftId,
    pub amount: Decimal,
    /// Falls back to the payee's default method when absent.
    pub payout_method_id: Option<PaymentMethodId>,
    /// Charge already confirmed at a provider, if any.
    pub charge: Option<ChargeRecord>,
}

/// How an admin closes a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    ReleaseToPayee,
    Refund,
}

/// Where a release attempt ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(Payment),
    PendingManual(Payment),
    /// The provider failed or timed out; the payment is in `payout_failed`.
    Failed {
        payment: Payment,
        error: ProviderError,
    },
}

impl ReleaseOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            ReleaseOutcome::Released(payment) | ReleaseOutcome::PendingManual(payment) => payment,
            ReleaseOutcome::Failed { payment, .. } => payment,
        }
    }
}

/// The escrow state machine.
///
/// Every state change goes through `PaymentStore::update_state`, so the
/// engine holds no locks of its own and any number of clones (scheduler,
/// admin requests, webhooks) can run against the same store. A payout is
/// only ever attempted by the caller that moved the payment from
/// `ready_for_release` to `releasing`.
#[derive(Clone)]
pub struct EscrowEngine {
    payments: PaymentStoreBox,
    methods: PaymentMethodStoreBox,
    providers: ProviderSet,
    clock: ClockBox,
    config: EscrowConfig,
}

impl EscrowEngine {
    pub fn new(
        payments: PaymentStoreBox,
        methods: PaymentMethodStoreBox,
        providers: ProviderSet,
        clock: ClockBox,
        config: EscrowConfig,
    ) -> Self {
        Self {
            payments,
            methods,
            providers,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("Payment {}", id)))
    }

    /// Records a confirmed charge as an escrowed payment.
    pub async fn create_payment(&self, request: PaymentRequest) -> Result<Payment> {
        if request.payer == request.payee {
            return Err(EscrowError::ValidationError(
                "Payer and payee must be different users".to_string(),
            ));
        }
        let amount = Amount::new(request.amount)?;
        let method = self
            .payout_method_for(request.payee, request.payout_method_id)
            .await?;

        let payment = Payment::new(
            NewPayment {
                payer: request.payer,
                payee: request.payee,
                shift_id: request.shift_id,
                amount,
                currency: self.config.currency.clone(),
                payout_method_id: method.id,
                charge: request.charge,
            },
            self.config.hold_duration,
            self.config.dispute_window,
            self.clock.now(),
        );
        self.payments.create(payment.clone()).await?;

        info!(
            payment_id = %payment.id,
            shift_id = %payment.shift_id,
            amount = %payment.money(),
            release_at = %payment.escrow_release_at,
            "payment escrowed"
        );
        Ok(payment)
    }

    async fn payout_method_for(
        &self,
        payee: UserId,
        requested: Option<PaymentMethodId>,
    ) -> Result<PaymentMethod> {
        match requested {
            Some(id) => {
                let method = self
                    .methods
                    .get(id)
                    .await?
                    .ok_or_else(|| EscrowError::NotFound(format!("Payment method {}", id)))?;
                if method.owner_user_id != payee {
                    return Err(EscrowError::ValidationError(format!(
                        "Payment method {} does not belong to payee {}",
                        id, payee
                    )));
                }
                Ok(method)
            }
            None => self
                .methods
                .list(payee)
                .await?
                .into_iter()
                .find(|m| m.is_default)
                .ok_or_else(|| {
                    EscrowError::ValidationError(format!("Payee {} has no payout method", payee))
                }),
        }
    }

    /// Moves an escrowed payment whose hold has elapsed to `ready_for_release`.
    pub async fn promote_if_due(&self, id: PaymentId) -> Result<Option<Payment>> {
        let payment = self.get(id).await?;
        let now = self.clock.now();
        if !payment.is_due(now) {
            return Ok(None);
        }
        let ready = self
            .payments
            .update_state(
                id,
                PaymentState::Escrowed,
                PaymentState::ReadyForRelease,
                PaymentUpdate::at(now).note(SYSTEM, "hold period elapsed"),
            )
            .await?;
        debug!(payment_id = %id, "hold elapsed, ready for release");
        Ok(Some(ready))
    }

    /// Ends the hold early on an admin's behalf.
    pub async fn force_ready(&self, id: PaymentId, admin: UserId) -> Result<Payment> {
        let payment = self.get(id).await?;
        if payment.state != PaymentState::Escrowed {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested: PaymentState::ReadyForRelease,
            });
        }
        self.payments
            .update_state(
                id,
                PaymentState::Escrowed,
                PaymentState::ReadyForRelease,
                PaymentUpdate::at(self.clock.now()).note(author(admin), "hold ended early"),
            )
            .await
    }

    pub async fn open_dispute(
        &self,
        id: PaymentId,
        opened_by: UserId,
        reason: &str,
    ) -> Result<Payment> {
        let payment = self.get(id).await?;
        require_edge(&payment, PaymentState::Disputed)?;
        let disputed = self
            .payments
            .update_state(
                id,
                payment.state,
                PaymentState::Disputed,
                PaymentUpdate::at(self.clock.now())
                    .note(author(opened_by), format!("dispute opened: {}", reason)),
            )
            .await?;
        info!(payment_id = %id, opened_by = %opened_by, "dispute opened");
        Ok(disputed)
    }

    /// Closes a dispute. A refund resolution runs the refund before returning.
    pub async fn resolve_dispute(
        &self,
        id: PaymentId,
        admin: UserId,
        resolution: Resolution,
        note: &str,
    ) -> Result<Payment> {
        let next = match resolution {
            Resolution::ReleaseToPayee => PaymentState::ReadyForRelease,
            Resolution::Refund => PaymentState::Refunding,
        };
        let payment = self.get(id).await?;
        if payment.state != PaymentState::Disputed {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested: next,
            });
        }
        let resolved = self
            .payments
            .update_state(
                id,
                PaymentState::Disputed,
                next,
                PaymentUpdate::at(self.clock.now())
                    .resolved_by(admin)
                    .note(author(admin), format!("dispute resolved ({:?}): {}", resolution, note)),
            )
            .await?;
        info!(payment_id = %id, admin = %admin, ?resolution, "dispute resolved");

        match resolution {
            Resolution::ReleaseToPayee => Ok(resolved),
            Resolution::Refund => self.spawn_refund(resolved).await,
        }
    }

    /// Attempts the payout of a `ready_for_release` payment.
    ///
    /// Fails with `Conflict` when another caller already claimed the payment.
    /// The provider call runs on its own task: once claimed, the release
    /// reaches `released`, `payout_pending` or `payout_failed` even if this
    /// future is dropped.
    pub async fn release(&self, id: PaymentId) -> Result<ReleaseOutcome> {
        let releasing = self
            .payments
            .update_state(
                id,
                PaymentState::ReadyForRelease,
                PaymentState::Releasing,
                PaymentUpdate::at(self.clock.now()),
            )
            .await?;
        info!(
            payment_id = %id,
            attempt = releasing.payout_attempts,
            amount = %releasing.money(),
            "release claimed"
        );

        let engine = self.clone();
        tokio::spawn(async move { engine.execute_payout(releasing).await })
            .await
            .map_err(|e| EscrowError::InternalError(Box::new(e)))?
    }

    async fn execute_payout(&self, payment: Payment) -> Result<ReleaseOutcome> {
        let method = match self.methods.get(payment.payout_method_id).await? {
            Some(method) => method,
            None => {
                let error = ProviderError::Rejected(format!(
                    "Payout method {} no longer exists",
                    payment.payout_method_id
                ));
                return self.fail_payout(payment, SYSTEM, error).await;
            }
        };
        let provider = match self.providers.get(method.provider) {
            Ok(provider) => provider,
            Err(e) => {
                let error = ProviderError::Rejected(e.to_string());
                return self
                    .fail_payout(payment, &provider_author(method.provider), error)
                    .await;
            }
        };

        let request = PayoutRequest {
            destination: (&method).into(),
            money: payment.money(),
            idempotency_key: payment.id.payout_key(),
            memo: format!("Payment for shift {}", payment.shift_id),
        };

        match self.bounded(provider.payout(&request)).await {
            Ok(PayoutOutcome::Completed { payout_ref, .. }) => {
                let released = self
                    .settle(
                        &payment,
                        PaymentState::Releasing,
                        &payout_ref,
                        &provider_author(method.provider),
                    )
                    .await?;
                info!(
                    payment_id = %payment.id,
                    provider = %method.provider,
                    payout_ref = %payout_ref,
                    "payout completed"
                );
                Ok(ReleaseOutcome::Released(released))
            }
            Ok(PayoutOutcome::PendingManual { reference, .. }) => {
                let pending = self
                    .payments
                    .update_state(
                        payment.id,
                        PaymentState::Releasing,
                        PaymentState::PayoutPending,
                        PaymentUpdate::at(self.clock.now()).note(
                            provider_author(method.provider),
                            format!("awaiting manual payout, reference {}", reference),
                        ),
                    )
                    .await?;
                info!(payment_id = %payment.id, provider = %method.provider, "payout awaits manual confirmation");
                Ok(ReleaseOutcome::PendingManual(pending))
            }
            Err(error) => {
                self.fail_payout(payment, &provider_author(method.provider), error)
                    .await
            }
        }
    }

    async fn fail_payout(
        &self,
        payment: Payment,
        source: &str,
        error: ProviderError,
    ) -> Result<ReleaseOutcome> {
        warn!(payment_id = %payment.id, source, %error, "payout failed");
        let failed = self
            .payments
            .update_state(
                payment.id,
                PaymentState::Releasing,
                PaymentState::PayoutFailed,
                PaymentUpdate::at(self.clock.now()).note(source, format!("payout failed: {}", error)),
            )
            .await?;
        Ok(ReleaseOutcome::Failed {
            payment: failed,
            error,
        })
    }

    /// Moves `payment` from `from` to `released`. Loses gracefully to a
    /// concurrent confirmation of the same payout.
    async fn settle(
        &self,
        payment: &Payment,
        from: PaymentState,
        payout_ref: &str,
        source: &str,
    ) -> Result<Payment> {
        let update = PaymentUpdate::at(self.clock.now())
            .payout_ref(payout_ref)
            .note(source, format!("paid out, reference {}", payout_ref));
        match self
            .payments
            .update_state(payment.id, from, PaymentState::Released, update)
            .await
        {
            Err(e) if e.is_conflict() => {
                let current = self.get(payment.id).await?;
                if current.state == PaymentState::Released {
                    Ok(current)
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    /// Re-arms a failed payout. The next release reuses the same idempotency
    /// key, so a transfer that did land earlier is not repeated.
    pub async fn retry_payout(&self, id: PaymentId, admin: UserId) -> Result<ReleaseOutcome> {
        let payment = self.get(id).await?;
        if payment.state != PaymentState::PayoutFailed {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested: PaymentState::ReadyForRelease,
            });
        }
        if payment.external_payout_ref.is_some() {
            return Err(EscrowError::ValidationError(format!(
                "Payment {} already has a payout reference",
                id
            )));
        }
        self.payments
            .update_state(
                id,
                PaymentState::PayoutFailed,
                PaymentState::ReadyForRelease,
                PaymentUpdate::at(self.clock.now()).note(author(admin), "payout retry requested"),
            )
            .await?;
        self.release(id).await
    }

    /// Refunds a payment whose payout failed.
    pub async fn refund(&self, id: PaymentId, admin: UserId) -> Result<Payment> {
        let payment = self.get(id).await?;
        if payment.state != PaymentState::PayoutFailed {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested: PaymentState::Refunding,
            });
        }
        // A payout that timed out may still have landed.
        if let Some((payout_ref, source)) = self.landed_payout(&payment).await? {
            let released = self
                .settle(&payment, PaymentState::PayoutFailed, &payout_ref, &source)
                .await?;
            warn!(
                payment_id = %id,
                payout_ref = %payout_ref,
                "refund refused, payout had already landed"
            );
            return Err(EscrowError::InvalidTransition {
                current: released.state,
                requested: PaymentState::Refunding,
            });
        }
        let refunding = self
            .payments
            .update_state(
                id,
                PaymentState::PayoutFailed,
                PaymentState::Refunding,
                PaymentUpdate::at(self.clock.now())
                    .resolved_by(admin)
                    .note(author(admin), "refund requested"),
            )
            .await?;
        self.spawn_refund(refunding).await
    }

    /// Asks the payout provider whether the payment's payout key completed.
    /// Returns the payout reference and the provider as note author.
    async fn landed_payout(&self, payment: &Payment) -> Result<Option<(String, String)>> {
        if payment.payout_attempts == 0 {
            return Ok(None);
        }
        let Some(method) = self.methods.get(payment.payout_method_id).await? else {
            return Ok(None);
        };
        let Ok(provider) = self.providers.get(method.provider) else {
            return Ok(None);
        };
        let status = self
            .bounded(provider.payout_status(&payment.id.payout_key()))
            .await?;
        Ok(match status {
            Some(PayoutOutcome::Completed { payout_ref, .. }) => {
                Some((payout_ref, provider_author(method.provider)))
            }
            _ => None,
        })
    }

    async fn spawn_refund(&self, refunding: Payment) -> Result<Payment> {
        let engine = self.clone();
        tokio::spawn(async move { engine.execute_refund(refunding).await })
            .await
            .map_err(|e| EscrowError::InternalError(Box::new(e)))?
    }

    /// Reverses the captured charge of a `refunding` payment. Without a
    /// captured charge there is nothing to reverse and the payment is
    /// refunded directly.
    async fn execute_refund(&self, payment: Payment) -> Result<Payment> {
        let (kind, charge_ref) = match (payment.charge_provider, payment.external_charge_ref.clone()) {
            (Some(kind), Some(charge_ref)) => (kind, charge_ref),
            _ => {
                info!(payment_id = %payment.id, "refunded without a captured charge");
                return self
                    .payments
                    .update_state(
                        payment.id,
                        PaymentState::Refunding,
                        PaymentState::Refunded,
                        PaymentUpdate::at(self.clock.now())
                            .note(SYSTEM, "no captured charge to reverse"),
                    )
                    .await;
            }
        };

        let result = match self.providers.get(kind) {
            Ok(provider) => {
                self.bounded(provider.refund_charge(
                    &charge_ref,
                    &payment.money(),
                    &payment.id.refund_key(),
                ))
                .await
            }
            Err(e) => Err(ProviderError::Rejected(e.to_string())),
        };

        match result {
            Ok(outcome) => {
                info!(payment_id = %payment.id, provider = %kind, refund_ref = %outcome.refund_ref, "charge refunded");
                self.payments
                    .update_state(
                        payment.id,
                        PaymentState::Refunding,
                        PaymentState::Refunded,
                        PaymentUpdate::at(self.clock.now()).note(
                            provider_author(kind),
                            format!("refunded, reference {}", outcome.refund_ref),
                        ),
                    )
                    .await
            }
            Err(error) => {
                warn!(payment_id = %payment.id, provider = %kind, %error, "refund failed");
                self.payments
                    .update_state(
                        payment.id,
                        PaymentState::Refunding,
                        PaymentState::PayoutFailed,
                        PaymentUpdate::at(self.clock.now())
                            .note(provider_author(kind), format!("refund failed: {}", error)),
                    )
                    .await?;
                Err(error.into())
            }
        }
    }

    /// Records that an operator sent a manual payout.
    pub async fn confirm_manual_payout(
        &self,
        id: PaymentId,
        admin: UserId,
        reference: &str,
    ) -> Result<Payment> {
        let payment = self.get(id).await?;
        if payment.state != PaymentState::PayoutPending {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested: PaymentState::Released,
            });
        }
        self.settle(&payment, PaymentState::PayoutPending, reference, &author(admin))
            .await
    }

    pub async fn report_manual_failure(
        &self,
        id: PaymentId,
        admin: UserId,
        reason: &str,
    ) -> Result<Payment> {
        let payment = self.get(id).await?;
        if payment.state != PaymentState::PayoutPending {
            return Err(EscrowError::InvalidTransition {
                current: payment.state,
                requested: PaymentState::PayoutFailed,
            });
        }
        self.payments
            .update_state(
                id,
                PaymentState::PayoutPending,
                PaymentState::PayoutFailed,
                PaymentUpdate::at(self.clock.now())
                    .note(author(admin), format!("manual payout failed: {}", reason)),
            )
            .await
    }

    /// Applies an asynchronous payout confirmation. `None` means the payout
    /// was already recorded and nothing changed.
    ///
    /// A confirmation also settles a `payout_failed` payment that was sent at
    /// least once, since a payout that timed out on our side can still land.
    pub async fn apply_payout_confirmation(
        &self,
        id: PaymentId,
        payout_ref: &str,
        source: &str,
    ) -> Result<Option<Payment>> {
        let payment = self.get(id).await?;
        let late_landing = payment.state == PaymentState::PayoutFailed
            && payment.payout_attempts > 0
            && payment.external_payout_ref.is_none();
        match payment.state {
            PaymentState::Released => Ok(None),
            PaymentState::Releasing | PaymentState::PayoutPending => {
                let released = self.settle(&payment, payment.state, payout_ref, source).await?;
                if released.external_payout_ref.as_deref() == Some(payout_ref) {
                    Ok(Some(released))
                } else {
                    Ok(None)
                }
            }
            PaymentState::PayoutFailed if late_landing => {
                warn!(payment_id = %id, payout_ref, source, "payout presumed failed has landed");
                let released = self
                    .settle(&payment, PaymentState::PayoutFailed, payout_ref, source)
                    .await?;
                Ok(Some(released))
            }
            current => Err(EscrowError::InvalidTransition {
                current,
                requested: PaymentState::Released,
            }),
        }
    }

    /// Applies an asynchronous payout failure. `None` if already recorded.
    pub async fn apply_payout_failure(
        &self,
        id: PaymentId,
        reason: &str,
        source: &str,
    ) -> Result<Option<Payment>> {
        let payment = self.get(id).await?;
        match payment.state {
            PaymentState::PayoutFailed => Ok(None),
            PaymentState::Releasing | PaymentState::PayoutPending => self
                .payments
                .update_state(
                    id,
                    payment.state,
                    PaymentState::PayoutFailed,
                    PaymentUpdate::at(self.clock.now())
                        .note(source, format!("payout failed: {}", reason)),
                )
                .await
                .map(Some),
            current => Err(EscrowError::InvalidTransition {
                current,
                requested: PaymentState::PayoutFailed,
            }),
        }
    }

    /// Annotates a payment with its captured charge. `None` if the same
    /// capture was already recorded.
    pub async fn record_capture(
        &self,
        id: PaymentId,
        provider: ProviderKind,
        capture_ref: &str,
    ) -> Result<Option<Payment>> {
        let payment = self.get(id).await?;
        match payment.external_charge_ref.as_deref() {
            Some(existing) if existing == capture_ref => Ok(None),
            Some(existing) => Err(EscrowError::ValidationError(format!(
                "Payment {} already captured as {}",
                id, existing
            ))),
            None => self
                .payments
                .update_state(
                    id,
                    payment.state,
                    payment.state,
                    PaymentUpdate::at(self.clock.now())
                        .charge(provider, capture_ref)
                        .note(provider_author(provider), "charge captured"),
                )
                .await
                .map(Some),
        }
    }

    /// Resolves payments left in `releasing` since before `older_than`, which
    /// happens when a process dies during the provider call. The provider is
    /// asked what became of the idempotency key.
    ///
    /// Adapters without a status lookup report unknown keys as absent. PayPal
    /// only knows batches submitted by the running process, so after a restart
    /// its stale releases land in `payout_failed`. An operator retry is safe
    /// there because the payout key is replayed as `PayPal-Request-Id`, and a
    /// payout that did land is still settled by its `payout.completed` webhook.
    pub async fn reconcile_releasing(&self, older_than: DateTime<Utc>) -> Result<Vec<Payment>> {
        let stale: Vec<Payment> = self
            .payments
            .find_in_state(PaymentState::Releasing)
            .await?
            .into_iter()
            .filter(|p| p.updated_at < older_than)
            .collect();

        let mut reconciled = Vec::new();
        for payment in stale {
            match self.reconcile_one(&payment).await {
                Ok(Some(updated)) => reconciled.push(updated),
                Ok(None) => {}
                Err(e) if e.is_conflict() => {
                    debug!(payment_id = %payment.id, "stale release already resolved")
                }
                Err(e) => warn!(payment_id = %payment.id, error = %e, "could not reconcile release"),
            }
        }
        Ok(reconciled)
    }

    async fn reconcile_one(&self, payment: &Payment) -> Result<Option<Payment>> {
        let Some(method) = self.methods.get(payment.payout_method_id).await? else {
            return self
                .abandon_release(payment, "payout method no longer exists")
                .await
                .map(Some);
        };
        let provider = self.providers.get(method.provider)?;
        let status = self
            .bounded(provider.payout_status(&payment.id.payout_key()))
            .await?;

        let source = provider_author(method.provider);
        let updated = match status {
            Some(PayoutOutcome::Completed { payout_ref, .. }) => {
                self.settle(payment, PaymentState::Releasing, &payout_ref, &source)
                    .await?
            }
            Some(PayoutOutcome::PendingManual { reference, .. }) => {
                self.payments
                    .update_state(
                        payment.id,
                        PaymentState::Releasing,
                        PaymentState::PayoutPending,
                        PaymentUpdate::at(self.clock.now()).note(
                            source,
                            format!("awaiting manual payout, reference {}", reference),
                        ),
                    )
                    .await?
            }
            None => {
                self.abandon_release(payment, "interrupted payout left no record at provider")
                    .await?
            }
        };
        info!(payment_id = %payment.id, state = %updated.state, "stale release reconciled");
        Ok(Some(updated))
    }

    async fn abandon_release(&self, payment: &Payment, reason: &str) -> Result<Payment> {
        self.payments
            .update_state(
                payment.id,
                PaymentState::Releasing,
                PaymentState::PayoutFailed,
                PaymentUpdate::at(self.clock.now()).note(SYSTEM, reason),
            )
            .await
    }

    pub async fn due_payments(&self) -> Result<Vec<Payment>> {
        self.payments.find_due(self.clock.now()).await
    }

    pub async fn ready_payments(&self) -> Result<Vec<Payment>> {
        self.payments
            .find_in_state(PaymentState::ReadyForRelease)
            .await
    }

    /// Disputes that have stayed open past their window.
    pub async fn overdue_disputes(&self) -> Result<Vec<Payment>> {
        let now = self.clock.now();
        Ok(self
            .payments
            .find_in_state(PaymentState::Disputed)
            .await?
            .into_iter()
            .filter(|p| p.dispute_overdue(now))
            .collect())
    }

    /// Bounds a provider call by the payout timeout.
    async fn bounded<T>(&self, call: impl Future<Output = ProviderResult<T>>) -> ProviderResult<T> {
        let limit = self.config.payout_timeout;
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(ProviderError::TransientNetwork(format!(
                "Provider did not answer within {:?}",
                limit
            )))
        })
    }
}

fn require_edge(payment: &Payment, next: PaymentState) -> Result<()> {
    if payment.state == next || !payment.state.can_transition_to(next) {
        return Err(EscrowError::InvalidTransition {
            current: payment.state,
            requested: next,
        });
    }
    Ok(())
}

fn author(user: UserId) -> String {
    format!("user:{}", user)
}

fn provider_author(kind: ProviderKind) -> String {
    format!("provider:{}", kind)
}
