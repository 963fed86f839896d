use super::csv::command_reader::{CommandOp, CommandRecord};
use crate::application::admin::AdminCommandHandler;
use crate::application::escrow::{EscrowEngine, PaymentRequest, Resolution};
use crate::application::registry::PaymentMethodRegistry;
use crate::application::scheduler::ReleaseScheduler;
use crate::config::EscrowConfig;
use crate::domain::actor::Actor;
use crate::domain::ids::{PaymentId, ShiftId, UserId};
use crate::domain::payment::{Payment, PaymentState};
use crate::domain::payment_method::ProviderKind;
use crate::domain::ports::{PaymentMethodStoreBox, PaymentStoreBox};
use crate::domain::provider::ProviderSet;
use crate::error::{EscrowError, Result};
use crate::infrastructure::clock::ManualClock;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Drives the escrow services from a batch of recorded commands.
///
/// Time only moves when a command carries an `at` timestamp, so a batch
/// replays the same way every time.
pub struct Replayer {
    engine: EscrowEngine,
    registry: PaymentMethodRegistry,
    admin: AdminCommandHandler,
    scheduler: ReleaseScheduler,
    payments: PaymentStoreBox,
    clock: ManualClock,
    admins: HashSet<UserId>,
}

impl Replayer {
    pub fn new(
        payments: PaymentStoreBox,
        methods: PaymentMethodStoreBox,
        providers: ProviderSet,
        config: EscrowConfig,
        admins: impl IntoIterator<Item = UserId>,
        start: DateTime<Utc>,
    ) -> Self {
        let clock = ManualClock::new(start);
        let engine = EscrowEngine::new(
            payments.clone(),
            methods.clone(),
            providers,
            Arc::new(clock.clone()),
            config,
        );
        Self {
            registry: PaymentMethodRegistry::new(methods, Arc::new(clock.clone())),
            admin: AdminCommandHandler::new(engine.clone()),
            scheduler: ReleaseScheduler::new(engine.clone(), Duration::from_secs(1)),
            engine,
            payments,
            clock,
            admins: admins.into_iter().collect(),
        }
    }

    fn actor(&self, record: &CommandRecord) -> Result<Actor> {
        let user = UserId(record.required(&record.actor, "actor")?);
        Ok(if self.admins.contains(&user) {
            Actor::admin(user)
        } else {
            Actor::member(user)
        })
    }

    /// The shift's current payment: the active one if any, else the latest.
    async fn payment_for(&self, record: &CommandRecord) -> Result<PaymentId> {
        let shift = ShiftId(record.required(&record.shift, "shift")?);
        let payments = self.payments.list_by_shift(shift).await?;
        payments
            .iter()
            .find(|p| p.state != PaymentState::Refunded)
            .or_else(|| payments.last())
            .map(|p| p.id)
            .ok_or_else(|| EscrowError::NotFound(format!("No payment for shift {}", shift)))
    }

    pub async fn apply(&self, record: CommandRecord) -> Result<()> {
        if let Some(at) = record.at {
            self.clock.set(at);
        }
        debug!(op = ?record.op, "replaying command");

        match record.op {
            CommandOp::AddMethod => {
                let owner = self.actor(&record)?.user_id;
                let provider: ProviderKind = record.required(&record.provider, "provider")?.parse()?;
                let account = record.required(&record.account, "account")?;
                self.registry.add(owner, provider, &account, true).await?;
            }
            CommandOp::Create => {
                let payer = self.actor(&record)?.user_id;
                self.engine
                    .create_payment(PaymentRequest {
                        payer,
                        payee: UserId(record.required(&record.payee, "payee")?),
                        shift_id: ShiftId(record.required(&record.shift, "shift")?),
                        amount: record.required(&record.amount, "amount")?,
                        payout_method_id: None,
                        charge: None,
                    })
                    .await?;
            }
            CommandOp::Dispute => {
                let actor = self.actor(&record)?;
                let id = self.payment_for(&record).await?;
                let reason = record.account.as_deref().unwrap_or("disputed");
                self.admin.open_dispute(&actor, id, reason).await?;
            }
            CommandOp::ForceRelease => {
                let actor = self.actor(&record)?;
                let id = self.payment_for(&record).await?;
                self.admin.force_release(&actor, id).await?;
            }
            CommandOp::ResolveRelease | CommandOp::ResolveRefund => {
                let actor = self.actor(&record)?;
                let id = self.payment_for(&record).await?;
                let resolution = if record.op == CommandOp::ResolveRelease {
                    Resolution::ReleaseToPayee
                } else {
                    Resolution::Refund
                };
                let note = record.account.as_deref().unwrap_or("");
                self.admin
                    .resolve_dispute(&actor, id, resolution, note)
                    .await?;
            }
            CommandOp::Retry => {
                let actor = self.actor(&record)?;
                let id = self.payment_for(&record).await?;
                self.admin.retry_payout(&actor, id).await?;
            }
            CommandOp::Refund => {
                let actor = self.actor(&record)?;
                let id = self.payment_for(&record).await?;
                self.admin.refund(&actor, id).await?;
            }
            CommandOp::ConfirmManual => {
                let actor = self.actor(&record)?;
                let id = self.payment_for(&record).await?;
                let reference = record.required(&record.account, "account")?;
                self.admin
                    .confirm_manual_payout(&actor, id, &reference)
                    .await?;
            }
            CommandOp::Tick => {
                let report = self.scheduler.tick().await?;
                debug!(?report, "replayed tick");
            }
        }
        Ok(())
    }

    pub async fn payments(&self) -> Result<Vec<Payment>> {
        self.payments.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::{InMemoryPaymentMethodStore, InMemoryPaymentStore};
    use crate::infrastructure::providers::simulated::SimulatedProvider;
    use crate::interfaces::csv::command_reader::CommandReader;

    #[tokio::test]
    async fn test_replay_release_scenario() {
        let providers = ProviderKind::ALL
            .into_iter()
            .fold(ProviderSet::new(), |set, kind| {
                set.with(Arc::new(SimulatedProvider::new(kind)))
            });
        let replayer = Replayer::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(InMemoryPaymentMethodStore::new()),
            providers,
            EscrowConfig::default(),
            [UserId(99)],
            Utc::now(),
        );

        let batch = "op,actor,shift,payee,amount,provider,account,at
add_method,2,,,,paypal,nurse@example.com,
create,1,10,2,540.00,,,2024-03-01T09:00:00Z
create,1,11,2,100.00,,,2024-03-01T09:00:00Z
dispute,1,11,,,,,
force_release,1,10,,,,,
tick,,,,,,,2024-03-04T09:01:00Z
";
        for command in CommandReader::new(batch.as_bytes()).commands() {
            // Non-admin force release fails; the batch continues.
            let _ = replayer.apply(command.unwrap()).await;
        }

        let payments = replayer.payments().await.unwrap();
        let by_shift = |shift: u64| {
            payments
                .iter()
                .find(|p| p.shift_id == ShiftId(shift))
                .unwrap()
                .state
        };
        assert_eq!(by_shift(10), PaymentState::Released);
        assert_eq!(by_shift(11), PaymentState::Disputed);
    }
}
